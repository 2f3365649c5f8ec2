use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("malformed frame table {}: {reason}", path.display())]
    Table { path: PathBuf, reason: String },

    #[error("a show is already running on this device")]
    AlreadyRunning,

    #[error("device write failed: {0}")]
    DeviceWrite(String),

    #[error("audio playback failed: {0}")]
    Audio(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("show thread panicked")]
    ShowPanicked,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn table(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Table {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
