// escrow_service/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use escrow_core::{CoreError, ErrorKind};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Migration Error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

impl AppError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      AppError::Core(e) => e.kind(),
      AppError::Config(_) | AppError::Sqlx(_) | AppError::Migration(_) => ErrorKind::Internal,
    }
  }

  pub fn unauthenticated(message: impl Into<String>) -> Self {
    AppError::Core(CoreError::Unauthenticated(message.into()))
  }

  pub fn invalid(message: impl Into<String>) -> Self {
    AppError::Core(CoreError::InvalidArgument(message.into()))
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self.kind() {
      ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
      ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
      ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
      ErrorKind::NotFound => StatusCode::NOT_FOUND,
      ErrorKind::FailedPrecondition => StatusCode::UNPROCESSABLE_ENTITY,
      ErrorKind::AlreadyExists => StatusCode::CONFLICT,
      ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    let kind = self.kind();
    // Infrastructure details stay in the log.
    let message = if kind == ErrorKind::Internal {
      tracing::error!(application_error = %self, "Responding with internal error");
      "An internal error occurred. Please retry.".to_string()
    } else {
      tracing::info!(application_error = %self, kind = %kind, "Responding with error");
      self.to_string()
    };
    HttpResponse::build(self.status_code()).json(json!({ "error": message, "kind": kind.as_str() }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
