mod storage_errors;

use std::io;

pub use storage_errors::InvalidWalFileName;

/// Errors returned by the mutating WAL operations.
///
/// Contract violations are rejected before any state is touched.
/// [`WalError::Io`] is a local storage failure; the caller should stop
/// accepting writes on this node instead of retrying.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum WalError {
    #[error(transparent)]
    Stopped(#[from] WalStopped),

    #[error(transparent)]
    InvalidLogId(#[from] InvalidLogId),

    #[error(transparent)]
    NonContiguous(#[from] LogIdNonContiguous),

    #[error(transparent)]
    RollbackOutOfRange(#[from] RollbackOutOfRange),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WalError {
    /// Returns true if this error is caused by the underlying storage.
    pub fn is_io(&self) -> bool {
        matches!(self, WalError::Io(_))
    }
}

impl From<WalError> for io::Error {
    fn from(value: WalError) -> Self {
        match value {
            WalError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}

/// Error indicating the WAL no longer accepts writes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("WAL is stopped, reject to {when}")]
pub struct WalStopped {
    pub when: &'static str,
}

impl WalStopped {
    pub fn new(when: &'static str) -> Self {
        Self { when }
    }
}

/// Error indicating a log id that can not be stored.
///
/// Log id 0 is reserved for "no log".
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Invalid log id {log_id}: log id must be greater than 0")]
pub struct InvalidLogId {
    pub log_id: u64,
}

impl InvalidLogId {
    pub fn new(log_id: u64) -> Self {
        Self { log_id }
    }
}

/// Error indicating that a log id does not follow the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Log id is not contiguous when append: last {last}, attempted {attempted}")]
pub struct LogIdNonContiguous {
    pub last: u64,
    pub attempted: u64,
}

impl LogIdNonContiguous {
    pub fn new(last: u64, attempted: u64) -> Self {
        Self { last, attempted }
    }
}

/// Error indicating that a rollback target is outside of the stored range.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Rollback target {target} out of range: first {first}, last {last}")]
pub struct RollbackOutOfRange {
    pub target: u64,
    pub first: u64,
    pub last: u64,
}

impl RollbackOutOfRange {
    pub fn new(target: u64, first: u64, last: u64) -> Self {
        Self {
            target,
            first,
            last,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_wal_error_into_io_error() {
        let e = WalError::from(LogIdNonContiguous::new(3, 5));
        assert!(!e.is_io());

        let io_err = io::Error::from(e);
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(
            io_err.to_string(),
            "Log id is not contiguous when append: last 3, attempted 5"
        );

        let e = WalError::from(io::Error::new(io::ErrorKind::Other, "disk"));
        assert!(e.is_io());
        assert_eq!(io::Error::from(e).to_string(), "disk");
    }
}
