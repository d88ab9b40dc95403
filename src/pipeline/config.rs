use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Where progress lines go.
#[derive(Clone, Default)]
pub enum ProgressOutput {
    #[default]
    Stdout,
    Discard,
    Writer(SharedWriter),
}

impl ProgressOutput {
    pub fn writer<W>(w: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::Writer(Arc::new(Mutex::new(w)))
    }

    pub(crate) fn emit(&self, line: fmt::Arguments<'_>) -> std::io::Result<()> {
        match self {
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_fmt(line)?;
                out.flush()
            }
            Self::Discard => Ok(()),
            Self::Writer(w) => {
                let mut out = w.lock().unwrap_or_else(PoisonError::into_inner);
                out.write_fmt(line)?;
                out.flush()
            }
        }
    }
}

impl fmt::Debug for ProgressOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("Stdout"),
            Self::Discard => f.write_str("Discard"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Settings for one import run.
///
/// ```
/// use std::time::Duration;
/// use bulkload::pipeline::config::ImportConfig;
///
/// let config = ImportConfig::new()
///     .delimiter(r"\t")?
///     .max_concurrency(16)
///     .validating(false)
///     .progress_interval(Duration::from_millis(250));
/// assert_eq!(config.delimiter_byte(), b'\t');
/// # Ok::<(), bulkload::error::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct ImportConfig {
    delimiter: u8,
    max_concurrency: usize,
    validating: bool,
    progress_interval: Duration,
    channel_capacity: usize,
    progress_output: ProgressOutput,
}

impl ImportConfig {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            validating: true,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            progress_output: ProgressOutput::default(),
        }
    }

    /// Field delimiter, escape-decoded. Must come out as one ASCII character.
    pub fn delimiter(mut self, raw: &str) -> Result<Self> {
        self.delimiter = parse_delimiter(raw)?;
        Ok(self)
    }

    /// Upper bound on write tasks in flight. Zero is rejected when the run starts.
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Whether writes go through the datastore's validation.
    pub fn validating(mut self, yes: bool) -> Self {
        self.validating = yes;
        self
    }

    pub fn progress_interval(mut self, every: Duration) -> Self {
        self.progress_interval = every;
        self
    }

    /// Capacity of the row channel between tokenizer and dispatcher.
    pub fn channel_capacity(mut self, n: usize) -> Self {
        self.channel_capacity = n.max(1);
        self
    }

    pub fn progress_output(mut self, out: ProgressOutput) -> Self {
        self.progress_output = out;
        self
    }

    pub fn quiet(self) -> Self {
        self.progress_output(ProgressOutput::Discard)
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter
    }

    pub fn concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn is_validating(&self) -> bool {
        self.validating
    }

    pub fn interval(&self) -> Duration {
        self.progress_interval
    }

    pub fn capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn output(&self) -> &ProgressOutput {
        &self.progress_output
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::config("max concurrency must be at least 1"));
        }
        if self.progress_interval.is_zero() {
            return Err(Error::config("progress interval must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a user-supplied delimiter such as `";"`, `"\t"` or `"\x1f"`.
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    let decoded = unescape(raw)?;
    let mut chars = decoded.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return Err(Error::config(format!(
            "delimiter must be exactly one character, got {raw:?}"
        )));
    };
    if !c.is_ascii() {
        return Err(Error::config(format!(
            "delimiter must be an ASCII character, got {c:?}"
        )));
    }
    if matches!(c, '"' | '\r' | '\n') {
        return Err(Error::config(format!("{c:?} cannot be used as a delimiter")));
    }

    if c != ',' {
        #[cfg(feature = "tracing")]
        tracing::event!(tracing::Level::INFO, delimiter = format_args!("0x{:X}", c as u32), "using non-default delimiter");
    }

    Ok(c as u8)
}

fn unescape(raw: &str) -> Result<String> {
    let bad = |what: &str| Error::config(format!("invalid delimiter escape in {raw:?}: {what}"));

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            return Err(bad("trailing backslash"));
        };
        let decoded = match esc {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 {
                    return Err(bad("\\x needs two hex digits"));
                }
                let code = u8::from_str_radix(&hex, 16).map_err(|_| bad("bad hex digits"))?;
                char::from(code)
            }
            'u' => {
                if chars.next() != Some('{') {
                    return Err(bad("expected \\u{...}"));
                }
                let mut hex = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => hex.push(c),
                        None => return Err(bad("\\u{...} is missing its closing brace")),
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| bad("bad unicode escape"))?
            }
            other => return Err(bad(&format!("unknown escape \\{other}"))),
        };
        out.push(decoded);
    }
    Ok(out)
}
