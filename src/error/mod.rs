use std::path::PathBuf;

use thiserror::Error;

use crate::store::{SchemaNotFound, WriteError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("input must start with a header record")]
    MissingHeader {
        #[source]
        source: Option<RecordError>,
    },

    #[error(transparent)]
    SchemaNotFound(#[from] SchemaNotFound),

    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv read error at row {row}: {source}")]
    RowParse {
        row: u64,
        #[source]
        source: RecordError,
    },

    #[error("failed to write row {row}: {source}")]
    Write {
        row: u64,
        #[source]
        source: WriteError,
    },

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Why one input record could not be tokenized.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Csv(#[from] csv_async::Error),

    #[error("bare \" in unquoted field")]
    BareQuote,

    #[error("extraneous \" after closing quote")]
    StrayQuote,

    #[error("quoted field is never closed")]
    UnterminatedQuote,
}

impl Error {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised before the worker pool starts.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::MissingHeader { .. }
                | Self::SchemaNotFound(_)
                | Self::Open { .. }
        )
    }
}
