use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::Sender;

use crate::error::{Error, RecordError, Result};
use crate::pipeline::cancel::CancelToken;

/// Column names taken from the first record of the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    columns: Vec<String>,
}

impl Header {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// One data record. `position` is 1-based and does not count the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    position: u64,
    fields: Vec<String>,
}

impl Row {
    pub fn new(position: u64, fields: Vec<String>) -> Self {
        Self { position, fields }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Single forward pass over delimited text.
///
/// The header is consumed by [`CsvSource::open`]; afterwards rows come out one
/// at a time through [`CsvSource::next_row`] or are pushed into a channel by
/// [`CsvSource::stream_rows`]. Rows may have any number of fields. Quoting
/// is strict: a quote may only open a field, close it, or appear doubled
/// inside a quoted field. Once a malformed record has been reported the
/// source yields nothing more.
pub struct CsvSource<R> {
    reader: AsyncReader<Tap<R>>,
    raw: Arc<Mutex<RawWindow>>,
    delimiter: u8,
    header: Header,
    record: StringRecord,
    rows_read: u64,
    finished: bool,
}

enum EmitOutcome {
    Continue,
    Stop,
}

impl<R> CsvSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap `reader` and read its header record.
    pub async fn open(reader: R, delimiter: u8) -> Result<Self> {
        let raw = Arc::new(Mutex::new(RawWindow::default()));
        let reader = AsyncReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .create_reader(Tap {
                inner: reader,
                raw: Arc::clone(&raw),
            });

        let mut source = Self {
            reader,
            raw,
            delimiter,
            header: Header::new(Vec::<String>::new()),
            record: StringRecord::new(),
            rows_read: 0,
            finished: false,
        };
        source.header = source.read_header().await?;
        Ok(source)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    async fn read_header(&mut self) -> Result<Header> {
        match self.read_checked().await {
            Ok(true) => {}
            Ok(false) => return Err(Error::MissingHeader { source: None }),
            Err(e) => return Err(Error::MissingHeader { source: Some(e) }),
        }
        if self.record.iter().all(str::is_empty) {
            return Err(Error::MissingHeader { source: None });
        }
        Ok(Header::new(self.record.iter()))
    }

    /// Next data row, `Ok(None)` at end of input.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.finished {
            return Ok(None);
        }

        let position = self.rows_read + 1;
        match self.read_checked().await {
            Ok(true) => {
                self.rows_read = position;
                Ok(Some(Row::new(position, self.record.iter().map(str::to_owned).collect())))
            }
            Ok(false) => {
                self.finished = true;
                Ok(None)
            }
            Err(source) => {
                self.finished = true;
                Err(Error::RowParse {
                    row: position,
                    source,
                })
            }
        }
    }

    /// Read one record and hold its raw bytes to the strict quoting rules.
    async fn read_checked(&mut self) -> std::result::Result<bool, RecordError> {
        let start = self.reader.position().byte();
        if !self.reader.read_record(&mut self.record).await? {
            return Ok(false);
        }
        let end = self.reader.position().byte();

        let mut raw = self.raw.lock().unwrap_or_else(PoisonError::into_inner);
        match raw.check(start, end, self.delimiter) {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    /// Push every remaining row into `output` until input ends, a malformed
    /// record is hit (sent as the final `Err`), the receiver goes away, or
    /// `cancel` fires.
    ///
    /// Returns `true` only when the input was read to its end and every row
    /// was handed to `output`.
    pub async fn stream_rows(mut self, output: Sender<Result<Row>>, cancel: CancelToken) -> bool {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "bulkload.cancelled", stage = "csv_source", where_ = "read", "bulkload.cancelled");
                    return false;
                },
                next = self.next_row() => next,
            };

            let event = match next {
                Ok(Some(row)) => Ok(row),
                Ok(None) => return true,
                Err(err) => Err(err),
            };
            let terminal = event.is_err();

            match emit(&output, event, &cancel).await {
                EmitOutcome::Continue if !terminal => {}
                _ => return false,
            }
        }
    }
}

async fn emit(output: &Sender<Result<Row>>, event: Result<Row>, cancel: &CancelToken) -> EmitOutcome {
    tokio::select! {
        _ = cancel.cancelled() => {
            #[cfg(feature = "tracing")]
            tracing::event!(tracing::Level::DEBUG, event = "bulkload.cancelled", stage = "csv_source", where_ = "send", "bulkload.cancelled");
            EmitOutcome::Stop
        },
        sent = output.send(event) => {
            if sent.is_err() {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::INFO, event = "bulkload.downstream.closed", stage = "csv_source", "bulkload.downstream.closed");
                EmitOutcome::Stop
            } else {
                EmitOutcome::Continue
            }
        }
    }
}

/// Passes reads through while keeping a copy of every byte in `raw`.
struct Tap<R> {
    inner: R,
    raw: Arc<Mutex<RawWindow>>,
}

impl<R> AsyncRead for Tap<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes
            .extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

/// Bytes read from the input but not yet checked. `offset` is the input
/// position of `bytes[0]`.
#[derive(Default)]
struct RawWindow {
    offset: u64,
    bytes: Vec<u8>,
}

impl RawWindow {
    /// Check the record spanning input bytes `start..end`, then forget
    /// everything before `end`.
    fn check(&mut self, start: u64, end: u64, delimiter: u8) -> Option<RecordError> {
        let len = self.bytes.len() as u64;
        let lo = start.saturating_sub(self.offset).min(len) as usize;
        let hi = end.saturating_sub(self.offset).min(len) as usize;
        let found = check_quotes(&self.bytes[lo..hi], delimiter);
        self.bytes.drain(..hi);
        self.offset += hi as u64;
        found
    }
}

#[derive(Clone, Copy)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

fn check_quotes(raw: &[u8], delimiter: u8) -> Option<RecordError> {
    let mut state = QuoteState::FieldStart;
    for &b in raw {
        state = match (state, b) {
            (QuoteState::Quoted, b'"') => QuoteState::QuoteInQuoted,
            (QuoteState::Quoted, _) => QuoteState::Quoted,
            (QuoteState::QuoteInQuoted, b'"') => QuoteState::Quoted,
            (_, b'\r' | b'\n') => QuoteState::FieldStart,
            (_, b) if b == delimiter => QuoteState::FieldStart,
            (QuoteState::FieldStart, b'"') => QuoteState::Quoted,
            (QuoteState::Unquoted, b'"') => return Some(RecordError::BareQuote),
            (QuoteState::QuoteInQuoted, _) => return Some(RecordError::StrayQuote),
            _ => QuoteState::Unquoted,
        };
    }
    matches!(state, QuoteState::Quoted).then_some(RecordError::UnterminatedQuote)
}
