//! # bulkload
//!
//! **Streaming bulk import of delimited text into a record datastore.**
//!
//! `bulkload` reads CSV-like input one record at a time, turns each row into a
//! record, and writes the records through a datastore under a fixed
//! concurrency ceiling. It is built for inputs far larger than memory:
//!
//! - rows are streamed, never collected
//! - at most `max_concurrency` writes are in flight
//! - the first fatal error cancels everything else
//! - a background reporter prints live throughput
//!
//! ---
//!
//! ## Core Model
//!
//! ```text
//! CsvSource ──rows──▶ Dispatcher ──▶ write task × N ──▶ WriteSink
//!                          ▲
//!          ProgressReporter┘ (samples the processed counter)
//! ```
//!
//! All three long-running loops share one [`CancelToken`] per run. The
//! tokenizer stops reading, the dispatcher stops accepting rows and the
//! reporter stops ticking as soon as it fires. Writes that already started run
//! to completion.
//!
//! ---
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bulkload::import::Importer;
//! use bulkload::pipeline::config::ImportConfig;
//! use bulkload::store::memory::MemoryStore;
//! use bulkload::store::{FieldSpec, Schema};
//!
//! #[tokio::main]
//! async fn main() -> bulkload::error::Result<()> {
//!     let store = Arc::new(MemoryStore::new().with_collection(
//!         Schema::new("users").field(FieldSpec::text("email").unique()),
//!     ));
//!
//!     let config = ImportConfig::new().delimiter(r"\t")?.max_concurrency(32);
//!     let importer = Importer::new(store, config);
//!
//!     let summary = importer.run_file("users.tsv", Some("users")).await?;
//!     println!("{} rows at {:.1} rows/sec", summary.processed, summary.rows_per_sec);
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! ## Error Handling Contract
//!
//! - Bad configuration (delimiter, concurrency, empty collection) fails before
//!   any I/O.
//! - A missing header, an unknown collection or an unopenable file fails
//!   before the first write.
//! - A malformed row stops the run with [`Error::RowParse`].
//! - A write rejected for a uniqueness conflict counts as processed, so
//!   re-running an import skips rows that already made it in.
//! - Any other write failure stops the run with [`Error::Write`]. When several
//!   writes fail concurrently only the first one is returned.
//!
//! ---
//!
//! ## Cancellation
//!
//! ```no_run
//! # async fn demo(importer: bulkload::import::Importer) -> bulkload::error::Result<()> {
//! let stop = importer.cancel_token();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     stop.cancel();
//! });
//!
//! let summary = importer.run_file("big.csv", None).await?;
//! if summary.interrupted {
//!     eprintln!("stopped early after {} rows", summary.processed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ---
//!
//! ## Observability
//!
//! With the default `tracing` feature the crate emits structured events such as
//! `bulkload.cancelled`, `bulkload.row.duplicate`, `bulkload.worker.failed`,
//! `bulkload.progress` and `bulkload.run.finished`, inside a `bulkload.run`
//! span. Minimal subscriber setup:
//!
//! ```ignore
//! use tracing_subscriber::fmt;
//!
//! fn main() {
//!     fmt()
//!         .with_target(false)
//!         .with_env_filter("bulkload=info")
//!         .init();
//! }
//! ```
//!
//! ---
//!
//! ## Feature Flags
//!
//! - `tracing` *(default)*: structured events and the run span.
//!
//! [`CancelToken`]: pipeline::cancel::CancelToken
//! [`Error::RowParse`]: error::Error::RowParse
//! [`Error::Write`]: error::Error::Write

// Public modules
pub mod error;
pub mod import;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod store;

pub mod prelude {
    //! Convenient imports for most `bulkload` users.

    pub use crate::error::{Error, Result};
    pub use crate::import::{ImportSummary, Importer};
    pub use crate::pipeline::cancel::CancelToken;
    pub use crate::pipeline::config::{ImportConfig, ProgressOutput};
    pub use crate::record::Record;
    pub use crate::store::{EntityFactory, Schema, SchemaResolver, WriteError, WriteMode, WriteSink};
}
