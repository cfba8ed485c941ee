use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::perf::Configuration;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The header row matches none of the known results layouts.
    #[error("unrecognised results layout in {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    /// Row numbers are 1-based and count the header as row 1.
    #[error("{}:{row}: {message}", path.display())]
    Row {
        path: PathBuf,
        row: u64,
        message: String,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{config} did not finish within {after:?}")]
    Timeout { config: Configuration, after: Duration },

    #[error("{config} exited with status {code:?}")]
    ExitStatus {
        config: Configuration,
        code: Option<i32>,
    },

    #[error("no baseline (sequential or 1 thread) for group '{group}'")]
    MissingBaseline { group: String },

    #[error("no measurements to work with")]
    NoData,

    #[error("plot error: {0}")]
    Plot(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BenchError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn row<P: Into<PathBuf>, S: Into<String>>(path: P, row: u64, message: S) -> Self {
        Self::Row {
            path: path.into(),
            row,
            message: message.into(),
        }
    }
}
