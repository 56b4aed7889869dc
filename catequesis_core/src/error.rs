//! Error types for the catequesis_core library.

use crate::types::CatechumenStatus;
use std::io;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for catequesis_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    // ------------------------------------------------------------------
    // Enrollment preconditions, in the order they are checked
    // ------------------------------------------------------------------
    #[error("catechumen {catechumen} is {status:?}, only active catechumens may enroll")]
    IneligibleStatus {
        catechumen: Uuid,
        status: CatechumenStatus,
    },

    #[error("catechumen {catechumen} is {age} at period start, level {level} requires {min}-{max}")]
    AgeOutOfRange {
        catechumen: Uuid,
        level: String,
        age: u32,
        min: u32,
        max: u32,
    },

    #[error("group is at level {actual}, catechumen {catechumen} is expected at level {expected}")]
    LevelMismatch {
        catechumen: Uuid,
        expected: String,
        actual: String,
    },

    #[error("group {group} is full (capacity {capacity})")]
    GroupFull { group: Uuid, capacity: u32 },

    #[error("catechumen {catechumen} already holds enrollment {existing} in period {period}")]
    DuplicateEnrollment {
        catechumen: Uuid,
        period: String,
        existing: Uuid,
    },

    // ------------------------------------------------------------------
    // Progression
    // ------------------------------------------------------------------
    #[error("period {period} has {count} ungraded enrollment(s)")]
    UngradedEnrollment { period: String, count: usize },

    #[error("closing period {period} failed: {reason}")]
    ClosePeriodFailed { period: String, reason: String },

    #[error("period {0} is closed")]
    PeriodClosed(String),

    // ------------------------------------------------------------------
    // Catalog, reporting, persistence
    // ------------------------------------------------------------------
    #[error("catalog invariant violated: {0}")]
    CatalogInvariantViolation(String),

    #[error("export of {requested} rows exceeds the maximum of {max}")]
    ExportTooLarge { requested: usize, max: usize },

    #[error("persistence unavailable after {attempts} attempt(s): {reason}")]
    PersistenceUnavailable { attempts: u32, reason: String },

    /// Referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Rejected input value
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the entity's current state
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether a retry at the persistence boundary may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
