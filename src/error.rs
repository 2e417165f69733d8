use chrono::NaiveDate;
use rusqlite::ErrorCode;
use thiserror::Error;

/// A raw record that cannot become a canonical one. Dropped and counted, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("No numeric token in salary text: {0:?}")]
    MalformedSalary(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} shorter than {min} characters")]
    TooShort { field: &'static str, min: usize },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    /// The (job, date) snapshot already exists. Callers treat this as a no-op.
    #[error("Snapshot for {job_id} on {date} already loaded")]
    DuplicateSnapshot { job_id: String, date: NaiveDate },

    /// The store itself cannot be used; the run stops.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] rusqlite::Error),

    /// A statement failed for one record only.
    #[error("Storage error: {0}")]
    Storage(#[source] rusqlite::Error),
}

impl From<rusqlite::Error> for LoadError {
    fn from(e: rusqlite::Error) -> Self {
        if is_unavailable(&e) {
            LoadError::StorageUnavailable(e)
        } else {
            LoadError::Storage(e)
        }
    }
}

impl LoadError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoadError::StorageUnavailable(_))
    }
}

fn is_unavailable(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => matches!(
            err.code,
            ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::ReadOnly
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull
                | ErrorCode::PermissionDenied
        ),
        _ => false,
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Unexpected status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Gave up on {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_error(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_io_errors_are_fatal() {
        let busy: LoadError = sqlite_error(rusqlite::ffi::SQLITE_BUSY).into();
        let io: LoadError = sqlite_error(rusqlite::ffi::SQLITE_IOERR).into();
        assert!(busy.is_fatal());
        assert!(io.is_fatal());
    }

    #[test]
    fn constraint_errors_are_per_record() {
        let e: LoadError = sqlite_error(rusqlite::ffi::SQLITE_CONSTRAINT).into();
        assert!(!e.is_fatal());
        assert!(matches!(e, LoadError::Storage(_)));
    }
}
