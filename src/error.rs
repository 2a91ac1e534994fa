use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that may occur in this library.
///
/// A buffer overflow is deliberately not represented here.
/// It is a flag reported alongside drained bytes, not a failure.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// The line already has a live session.
    #[error("The line `{0}` is already open")]
    AlreadyOpen(String),

    /// No session exists for the line.
    #[error("The line `{0}` is not open")]
    NotOpen(String),

    /// The underlying device could not be opened or closed.
    #[error("Device error on `{line}`: {reason}")]
    Device {
        /// The line the device belongs to.
        line: String,

        /// What the device reported.
        reason: String,
    },

    /// The device rejected or failed a write.
    #[error("Write to `{line}` failed: {reason}")]
    Write {
        /// The line written to.
        line: String,

        /// What went wrong.
        reason: String,
    },

    /// The access policy denied the operation.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The line name did not follow the platform's naming rules.
    #[error("Invalid line name: {0}")]
    BadLineName(String),

    /// A setting was out of range, or a config file was malformed.
    #[error("Bad configuration: {0}")]
    BadConfig(String),
}

impl Error {
    pub(crate) fn device(line: &crate::line::LineName, reason: impl ToString) -> Self {
        Self::Device {
            line: line.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(line: &crate::line::LineName, reason: impl ToString) -> Self {
        Self::Write {
            line: line.to_string(),
            reason: reason.to_string(),
        }
    }
}
