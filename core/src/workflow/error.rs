// escrow-core/src/workflow/error.rs

use thiserror::Error;

/// Failures of the pipeline machinery itself, as opposed to handler failures.
#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("Step '{step_name}' is not defined in the pipeline")]
  StepNotFound { step_name: String },

  #[error("Required step '{step_name}' has no handlers")]
  HandlerMissing { step_name: String },

  #[error("No pipeline registered for context type {context_type}")]
  NotRegistered { context_type: String },

  #[error("Context handed to the registry is not a {expected_type}")]
  TypeMismatch { expected_type: String },
}
