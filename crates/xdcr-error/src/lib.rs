use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for the XDCR self-check harness.
///
/// Every failure a scenario or a verification pass can surface maps onto one
/// of these variants. Graceful procedure failures are carried here too so
/// callers can propagate them with `?` and decide at the join point whether
/// the race simply produced no conflict.
#[derive(Error, Debug)]
pub enum SelfCheckError {
    // === Verification ===
    /// A checker assertion on count, row composition, field value or
    /// timestamp order failed.
    #[error("expectation mismatch: {detail}")]
    ExpectationMismatch { detail: String },

    /// No checker in the chain claimed an expected conflict record.
    #[error("unverifiable conflict shape: {detail}")]
    UnverifiableConflictShape { detail: String },

    /// An enum ordinal or tag string outside the closed set.
    #[error("unrecognized {kind}: '{value}'")]
    UnrecognizedTag { kind: &'static str, value: String },

    // === Procedure calls ===
    /// The cluster rejected the call at the application level before it
    /// reached the replication layer.
    #[error("graceful failure from {procedure}: {detail}")]
    GracefulFailure { procedure: String, detail: String },

    /// Transport, protocol or unexpected server failure.
    #[error("{procedure} failed with status {status}: {detail}")]
    ProcedureFailed {
        procedure: String,
        status: String,
        detail: String,
    },

    /// A result table was missing an expected column.
    #[error("no such column in result table: {name}")]
    MissingColumn { name: String },

    /// A result table had fewer tables or rows than the caller indexed.
    #[error("result shape error: {detail}")]
    ResultShape { detail: String },

    /// The table name is not one of the replicated tables under test.
    #[error("unrecognized table name: {name}")]
    UnknownTable { name: String },

    // === Orchestration ===
    /// A convergence poll ran past its deadline.
    #[error("convergence timeout after {waited_ms} ms waiting for {what}")]
    ConvergenceTimeout { what: String, waited_ms: u64 },

    /// Cleanup of a `cid` partition failed.
    #[error("reset of {table} for cid {cid} failed: {detail}")]
    ResetFailure { table: String, cid: u8, detail: String },

    /// A scenario assertion on terminal table state failed.
    #[error("{cluster} {table}: {detail}")]
    TableStateMismatch {
        cluster: String,
        table: String,
        detail: String,
    },

    // === Configuration / IO ===
    /// Invalid harness configuration.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// Cannot read a configuration or report file.
    #[error("unable to open '{path}'")]
    CannotOpen { path: PathBuf },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse failure classes used for process exit codes and report summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FailureClass {
    /// Not a failure.
    Ok = 0,
    /// A verification assertion failed.
    Mismatch = 1,
    /// Internal logic error.
    Internal = 2,
    /// No checker could verify a conflict.
    Unverifiable = 3,
    /// Bad tag, ordinal or table name.
    Unrecognized = 4,
    /// Benign application-level rejection.
    Graceful = 5,
    /// Remote call failed.
    Procedure = 6,
    /// Convergence deadline exceeded.
    Timeout = 7,
    /// Partition cleanup failed.
    Reset = 8,
    /// Bad configuration.
    Config = 9,
    /// Filesystem or encoding failure.
    Io = 10,
}

impl SelfCheckError {
    /// Map this error to its failure class.
    #[allow(clippy::match_same_arms)]
    pub const fn failure_class(&self) -> FailureClass {
        match self {
            Self::ExpectationMismatch { .. } | Self::TableStateMismatch { .. } => {
                FailureClass::Mismatch
            }
            Self::UnverifiableConflictShape { .. } => FailureClass::Unverifiable,
            Self::UnrecognizedTag { .. } | Self::UnknownTable { .. } => FailureClass::Unrecognized,
            Self::GracefulFailure { .. } => FailureClass::Graceful,
            Self::ProcedureFailed { .. }
            | Self::MissingColumn { .. }
            | Self::ResultShape { .. } => FailureClass::Procedure,
            Self::ConvergenceTimeout { .. } => FailureClass::Timeout,
            Self::ResetFailure { .. } => FailureClass::Reset,
            Self::Config { .. } => FailureClass::Config,
            Self::CannotOpen { .. } | Self::Io(_) | Self::Json(_) => FailureClass::Io,
            Self::Internal(_) => FailureClass::Internal,
        }
    }

    /// Whether this is an application-level rejection that means "no conflict
    /// was produced" rather than a harness or engine failure.
    pub const fn is_graceful(&self) -> bool {
        matches!(self, Self::GracefulFailure { .. })
    }

    /// Human-friendly suggestion for chasing this failure down.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::UnverifiableConflictShape { .. } => {
                Some(
                    "Check the oracle row against the checker guards; \
                     the engine may have logged a new shape",
                )
            }
            Self::ConvergenceTimeout { .. } => {
                Some("Check that replication is running between the clusters")
            }
            Self::ResetFailure { .. } => {
                Some("Delete the rows for this cid by hand before the next run")
            }
            Self::UnknownTable { .. } => Some("Use xdcr_partitioned or xdcr_replicated"),
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        self.failure_class() as i32
    }

    /// Create an expectation mismatch.
    pub fn mismatch(detail: impl Into<String>) -> Self {
        Self::ExpectationMismatch {
            detail: detail.into(),
        }
    }

    /// Create an unrecognized-tag error.
    pub fn unrecognized(kind: &'static str, value: impl ToString) -> Self {
        Self::UnrecognizedTag {
            kind,
            value: value.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `SelfCheckError`.
pub type Result<T> = std::result::Result<T, SelfCheckError>;
