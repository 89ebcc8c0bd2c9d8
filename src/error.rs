use std::fmt::{self, Debug, Display};
use std::io;

/// Provides `MalsimError` and maps other errors to
/// convert to a `MalsimError`
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum MalsimError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CSVError(csv::Error),
    MalsimError(String),
}

impl From<io::Error> for MalsimError {
    fn from(error: io::Error) -> Self {
        MalsimError::IoError(error)
    }
}

impl From<serde_json::Error> for MalsimError {
    fn from(error: serde_json::Error) -> Self {
        MalsimError::JsonError(error)
    }
}

impl From<csv::Error> for MalsimError {
    fn from(error: csv::Error) -> Self {
        MalsimError::CSVError(error)
    }
}

impl From<String> for MalsimError {
    fn from(error: String) -> Self {
        MalsimError::MalsimError(error)
    }
}

impl From<&str> for MalsimError {
    fn from(error: &str) -> Self {
        MalsimError::MalsimError(error.to_string())
    }
}

impl std::error::Error for MalsimError {}

impl Display for MalsimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {self:?}")?;
        Ok(())
    }
}
