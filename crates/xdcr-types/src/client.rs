//! The synchronous call contract each cluster exposes to the harness.

use std::fmt;

use xdcr_error::SelfCheckError;

use crate::table::ResultTable;
use crate::value::Value;

/// Completion status of a procedure call that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ResponseStatus {
    /// Application-level rejection (constraint violation, missing row)
    /// returned before the change could reach the replication layer.
    GracefulFailure,
    /// The procedure aborted itself.
    UserAbort,
    /// Server-side failure outside the procedure's control.
    UnexpectedFailure,
    /// The connection to the cluster dropped mid-call.
    ConnectionLost,
    /// No response within the client timeout.
    ConnectionTimeout,
}

impl ResponseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GracefulFailure => "GRACEFUL_FAILURE",
            Self::UserAbort => "USER_ABORT",
            Self::UnexpectedFailure => "UNEXPECTED_FAILURE",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call: the status plus the server's status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub status: ResponseStatus,
    pub message: String,
}

impl CallError {
    pub fn new(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn graceful(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::GracefulFailure, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::UnexpectedFailure, message)
    }

    pub const fn is_graceful(&self) -> bool {
        matches!(self.status, ResponseStatus::GracefulFailure)
    }

    /// Attach the procedure name and lift into the harness error type.
    /// Graceful failures stay distinguishable so scenarios can treat them as
    /// "no conflict produced".
    pub fn into_error(self, procedure: &str) -> SelfCheckError {
        if self.is_graceful() {
            SelfCheckError::GracefulFailure {
                procedure: procedure.to_owned(),
                detail: self.message,
            }
        } else {
            SelfCheckError::ProcedureFailed {
                procedure: procedure.to_owned(),
                status: self.status.as_str().to_owned(),
                detail: self.message,
            }
        }
    }
}

/// Outcome of a single call: result tables in procedure order.
pub type CallResult = std::result::Result<Vec<ResultTable>, CallError>;

/// One cluster's call handle.
///
/// Implementations must be usable from several threads at once: the harness
/// races a call on each cluster from its own scoped thread.
pub trait ClusterClient: Send + Sync {
    /// Cluster id the handle is connected to.
    fn cluster_id(&self) -> u8;

    /// Invoke a named stored or system procedure.
    fn call_procedure(&self, procedure: &str, params: &[Value]) -> CallResult;

    /// Run a parameterized ad-hoc statement.
    fn adhoc(&self, sql: &str, params: &[Value]) -> CallResult;
}
