//! Error taxonomy for the ORM runtime.

use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OrmError>;

/// A `rusqlite`/SQLite extended result code, carried for diagnostics.
///
/// Mirrors the subset of `SQLITE_*` extended codes this crate's error
/// taxonomy distinguishes; anything else collapses into [`OrmError::Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedCode {
    ConstraintNotNull,
    ConstraintUnique,
    ConstraintForeignKey,
    ConstraintCheck,
    ConstraintOther,
    IoErr,
    Full,
    Busy,
    NoMem,
    Interrupt,
    Other(i32),
}

impl ExtendedCode {
    /// True for the fatal-class codes: a fatal error inside
    /// `begin_transaction`/`save_transaction_point` forces a full rollback
    /// before the error is rethrown.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::IoErr | Self::Full | Self::Busy | Self::NoMem | Self::Interrupt
        )
    }
}

impl fmt::Display for ExtendedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConstraintNotNull => write!(f, "SQLITE_CONSTRAINT_NOTNULL"),
            Self::ConstraintUnique => write!(f, "SQLITE_CONSTRAINT_UNIQUE"),
            Self::ConstraintForeignKey => write!(f, "SQLITE_CONSTRAINT_FOREIGNKEY"),
            Self::ConstraintCheck => write!(f, "SQLITE_CONSTRAINT_CHECK"),
            Self::ConstraintOther => write!(f, "SQLITE_CONSTRAINT"),
            Self::IoErr => write!(f, "SQLITE_IOERR"),
            Self::Full => write!(f, "SQLITE_FULL"),
            Self::Busy => write!(f, "SQLITE_BUSY"),
            Self::NoMem => write!(f, "SQLITE_NOMEM"),
            Self::Interrupt => write!(f, "SQLITE_INTERRUPT"),
            Self::Other(code) => write!(f, "SQLITE code {code}"),
        }
    }
}

/// The full error taxonomy of the ORM runtime.
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    #[error("cannot open database at {path}: {source}")]
    CannotOpen {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("database user_version {found} is newer than configured target {target}")]
    UnsupportedDowngrade { found: i64, target: i64 },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("constraint violation: {message}")]
    Constraint {
        message: String,
        code: ExtendedCode,
    },

    #[error("NOT NULL constraint violated on column(s): {}", columns.join(", "))]
    NotNullConstraintViolation { columns: Vec<String> },

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("engine error ({code}): {message}")]
    Engine { code: ExtendedCode, message: String },
}

impl From<rusqlite::Error> for OrmError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        let code = classify(&err);
        Self::Engine { code, message }
    }
}

/// Classify a raw `rusqlite::Error` into an [`ExtendedCode`].
///
/// Anything we cannot name precisely degrades to `ExtendedCode::Other`
/// carrying the primary result code, which still lets callers check
/// `is_fatal()`.
#[must_use]
pub fn classify(err: &rusqlite::Error) -> ExtendedCode {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = err {
        match ffi_err.code {
            ErrorCode::ConstraintViolation => constraint_subtype(ffi_err.extended_code),
            ErrorCode::DiskFull => ExtendedCode::Full,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ExtendedCode::Busy,
            ErrorCode::OutOfMemory => ExtendedCode::NoMem,
            ErrorCode::OperationInterrupted => ExtendedCode::Interrupt,
            ErrorCode::SystemIoFailure => ExtendedCode::IoErr,
            _ => ExtendedCode::Other(ffi_err.extended_code),
        }
    } else {
        ExtendedCode::Other(-1)
    }
}

// SQLITE_CONSTRAINT_NOTNULL = 1299, SQLITE_CONSTRAINT_UNIQUE = 2067,
// SQLITE_CONSTRAINT_FOREIGNKEY = 787, SQLITE_CONSTRAINT_CHECK = 275.
fn constraint_subtype(extended_code: i32) -> ExtendedCode {
    match extended_code {
        1299 => ExtendedCode::ConstraintNotNull,
        2067 => ExtendedCode::ConstraintUnique,
        787 => ExtendedCode::ConstraintForeignKey,
        275 => ExtendedCode::ConstraintCheck,
        _ => ExtendedCode::ConstraintOther,
    }
}
