use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::config::ImportConfig;
use crate::pipeline::context::RunContext;
use crate::pipeline::dispatch::{Dispatcher, Drain};
use crate::pipeline::progress::{Outcome, ProgressReporter};
use crate::source::csv::CsvSource;
use crate::store::{EntityFactory, SchemaResolver, WriteMode, WriteSink};

/// Totals for a run that did not hit a fatal error.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportSummary {
    /// Rows written, duplicates included.
    pub processed: u64,
    /// Rows taken off the channel by the dispatcher.
    pub observed: u64,
    pub elapsed: Duration,
    pub rows_per_sec: f64,
    /// The run was stopped through [`Importer::cancel_token`] before its input ended.
    pub interrupted: bool,
}

/// Streams delimited text into a collection.
///
/// ```no_run
/// use std::sync::Arc;
/// use bulkload::import::Importer;
/// use bulkload::pipeline::config::ImportConfig;
/// use bulkload::store::memory::MemoryStore;
/// use bulkload::store::Schema;
///
/// # async fn demo() -> bulkload::error::Result<()> {
/// let store = Arc::new(MemoryStore::new().with_collection(Schema::new("users")));
/// let importer = Importer::new(store, ImportConfig::new().delimiter(";")?);
///
/// let summary = importer.run_file("users.csv", None).await?;
/// println!("{} rows", summary.processed);
/// # Ok(())
/// # }
/// ```
pub struct Importer {
    resolver: Arc<dyn SchemaResolver>,
    factory: Arc<dyn EntityFactory>,
    sink: Arc<dyn WriteSink>,
    config: ImportConfig,
    shutdown: CancelToken,
}

impl Importer {
    /// Use one datastore for schema lookup, record construction and writes.
    pub fn new<S>(store: Arc<S>, config: ImportConfig) -> Self
    where
        S: SchemaResolver + EntityFactory + WriteSink + 'static,
    {
        Self::with_parts(store.clone(), store.clone(), store, config)
    }

    pub fn with_parts(
        resolver: Arc<dyn SchemaResolver>,
        factory: Arc<dyn EntityFactory>,
        sink: Arc<dyn WriteSink>,
        config: ImportConfig,
    ) -> Self {
        Self {
            resolver,
            factory,
            sink,
            config,
            shutdown: CancelToken::new(),
        }
    }

    /// Cancelling this token stops every current and future run of this importer.
    pub fn cancel_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    /// Import the file at `path`. Without an explicit collection the file
    /// name up to its first `.` is used.
    pub async fn run_file(
        &self,
        path: impl AsRef<Path>,
        collection: Option<&str>,
    ) -> Result<ImportSummary> {
        let path = path.as_ref();
        let collection = match collection {
            Some(name) => name.to_owned(),
            None => {
                let name = collection_from_path(path)?;
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::WARN, collection = %name, "collection name not set explicitly, using file name");
                name
            }
        };
        self.preflight(&collection)?;

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::open(path, e))?;
        self.run(file, &collection).await
    }

    /// Import everything readable from `reader` into `collection`.
    ///
    /// Returns the first fatal error, if any. Rows rejected only for a
    /// uniqueness conflict count as processed.
    pub async fn run<R>(&self, reader: R, collection: &str) -> Result<ImportSummary>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let run = self.run_inner(reader, collection);

        #[cfg(feature = "tracing")]
        let run = {
            use tracing::Instrument;
            run.instrument(tracing::info_span!("bulkload.run", collection = collection))
        };

        run.await
    }

    async fn run_inner<R>(&self, reader: R, collection: &str) -> Result<ImportSummary>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.preflight(collection)?;
        let schema = self.resolver.resolve(collection).await?;
        let source = CsvSource::open(reader, self.config.delimiter_byte()).await?;
        let header = Arc::new(source.header().clone());

        let ctx = RunContext::new(self.shutdown.child());
        let reporter =
            ProgressReporter::spawn(Arc::clone(&ctx), self.config.interval(), self.config.output().clone());

        let (tx, rx) = mpsc::channel(self.config.capacity());
        let producer = tokio::spawn(source.stream_rows(tx, ctx.cancel_token().clone()));

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.factory),
            Arc::new(schema),
            header,
        )
        .max_concurrency(self.config.concurrency())
        .mode(WriteMode::from_validating(self.config.is_validating()));

        let dispatched = dispatcher.run(rx, Arc::clone(&ctx)).await;
        let produced = producer.await;
        let result = match (dispatched, produced) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(join)) => Err(Error::Join(join)),
            (Ok(drain), Ok(read_to_end)) => Ok(read_to_end && drain == Drain::Exhausted),
        };

        let outcome = match &result {
            Err(_) => Outcome::Failed,
            Ok(true) if ctx.processed() == ctx.observed() => Outcome::Finished,
            Ok(_) => Outcome::Interrupted,
        };
        let reported = reporter.finish(outcome).await;
        result?;
        reported?;

        let summary = ImportSummary {
            processed: ctx.processed(),
            observed: ctx.observed(),
            elapsed: ctx.elapsed(),
            rows_per_sec: ctx.rows_per_sec(),
            interrupted: outcome == Outcome::Interrupted,
        };

        #[cfg(feature = "tracing")]
        tracing::event!(
            tracing::Level::INFO,
            event = "bulkload.run.finished",
            processed = summary.processed,
            rows_per_sec = summary.rows_per_sec,
            interrupted = summary.interrupted,
            "bulkload.run.finished"
        );

        Ok(summary)
    }

    fn preflight(&self, collection: &str) -> Result<()> {
        self.config.validate()?;
        if collection.trim().is_empty() {
            return Err(Error::config("collection name cannot be empty"));
        }
        Ok(())
    }
}

/// Default collection for a file: its name up to the first `.`.
pub fn collection_from_path(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(Error::config(format!(
            "cannot derive a collection name from {}",
            path.display()
        )));
    }
    Ok(name.to_owned())
}
