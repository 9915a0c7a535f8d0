use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the query layer.
///
/// Build-time problems (`MalformedQuery`, `InvalidArgument`) are reported before
/// any connection work happens. Everything the driver raises while preparing,
/// executing, fetching or committing becomes `Execution`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Execution(String),
    #[error("Unsupported operation")]
    UnsupportedOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Failed,
    /// The driver does not implement an optional method.
    Unsupported,
}

/// Failure reported by a driver behind the boundary traits.
#[derive(Debug)]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Failed,
            message: message.into(),
            source: None,
        }
    }

    pub fn unsupported(operation: &str) -> Self {
        Self {
            kind: DriverErrorKind::Unsupported,
            message: format!("{operation} is not supported by this driver"),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: DriverErrorKind::Failed,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind == DriverErrorKind::Unsupported
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for DriverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

/// Flattens an error and its causes into one message. A cause whose message
/// repeats what has been collected so far is skipped.
pub fn chain_message(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string().trim().to_string();
    let mut cause = error.source();
    while let Some(current) = cause {
        let text = current.to_string();
        let text = text.trim();
        if !text.is_empty() && text != message && !message.ends_with(text) {
            message.push(' ');
            message.push_str(text);
        }
        cause = current.source();
    }
    message
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Execution(chain_message(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_message_skips_repeated_causes_and_trims() {
        let inner = DriverError::new(" inner ");
        let mid = DriverError::with_source("mid", inner);
        let repeated = DriverError::with_source("mid", mid);
        let outer = DriverError::with_source("outer", repeated);
        assert_eq!(chain_message(&outer), "outer mid inner");
    }

    #[test]
    fn driver_error_with_duplicated_source_becomes_one_message() {
        let cause = DriverError::new("ORA-1 boom");
        let err = DriverError::with_source("ORA-1 boom", cause);
        assert_eq!(Error::from(err), Error::Execution("ORA-1 boom".to_string()));
    }

    #[test]
    fn cause_already_ending_the_message_is_not_appended() {
        let cause = DriverError::new("ORA-00942: table or view does not exist");
        let message = "Execution failed: ORA-00942: table or view does not exist";
        let err = DriverError::with_source(message, cause);
        assert_eq!(Error::from(err), Error::Execution(message.to_string()));
    }

    #[test]
    fn unsupported_kind_is_reported() {
        let err = DriverError::unsupported("savepoints");
        assert!(err.is_unsupported());
        assert_eq!(err.kind(), DriverErrorKind::Unsupported);
        assert_eq!(err.message(), "savepoints is not supported by this driver");
        assert!(!DriverError::new("boom").is_unsupported());
    }
}
