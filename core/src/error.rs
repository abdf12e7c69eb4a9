// escrow-core/src/error.rs

use crate::ports::payments::ProcessorError;
use crate::ports::store::StoreError;
use crate::workflow::WorkflowError;
use thiserror::Error;

/// Classification every coordinator error maps onto. Adapters translate it to their
/// transport (HTTP status, RPC code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Unauthenticated,
  PermissionDenied,
  InvalidArgument,
  NotFound,
  FailedPrecondition,
  AlreadyExists,
  Internal,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Unauthenticated => "unauthenticated",
      ErrorKind::PermissionDenied => "permission-denied",
      ErrorKind::InvalidArgument => "invalid-argument",
      ErrorKind::NotFound => "not-found",
      ErrorKind::FailedPrecondition => "failed-precondition",
      ErrorKind::AlreadyExists => "already-exists",
      ErrorKind::Internal => "internal",
    }
  }

  /// Guard violations are final; only contention and infrastructure failures are
  /// worth retrying as a whole operation.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ErrorKind::AlreadyExists | ErrorKind::Internal)
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum CoreError {
  #[error("Unauthenticated: {0}")]
  Unauthenticated(String),

  #[error("Permission denied: {0}")]
  PermissionDenied(String),

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Failed precondition: {0}")]
  FailedPrecondition(String),

  #[error("Already exists: {0}")]
  AlreadyExists(String),

  #[error("Document store error: {0}")]
  Store(#[from] StoreError),

  #[error("Payment processor error: {0}")]
  Processor(#[from] ProcessorError),

  #[error("Workflow error: {source}")]
  Workflow {
    #[from]
    source: WorkflowError,
  },

  #[error("Internal error: {0}")]
  Internal(String),
}

impl CoreError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      CoreError::Unauthenticated(_) => ErrorKind::Unauthenticated,
      CoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
      CoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
      CoreError::NotFound(_) => ErrorKind::NotFound,
      CoreError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
      CoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
      CoreError::Store(_) | CoreError::Processor(_) | CoreError::Workflow { .. } | CoreError::Internal(_) => {
        ErrorKind::Internal
      }
    }
  }

  pub(crate) fn is_store_conflict(&self) -> bool {
    matches!(self, CoreError::Store(StoreError::Conflict(_)))
  }
}

pub type CoreResult<T, E = CoreError> = std::result::Result<T, E>;
