// escrow_service/src/web/extractors.rs

use actix_web::{web, FromRequest, HttpRequest};
use escrow_core::Caller;
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
  /// Stable subject id of the caller.
  pub sub: String,
  pub exp: usize,
}

pub fn issue_token(subject: &str, expires_at: usize, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
  let claims = Claims {
    sub: subject.to_string(),
    exp: expires_at,
  };
  encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Caller, AppError> {
  let data = decode::<Claims>(
    token,
    &DecodingKey::from_secret(secret.as_bytes()),
    &Validation::new(Algorithm::HS256),
  )
  .map_err(|e| {
    warn!(error = %e, "Rejected caller token.");
    AppError::unauthenticated("Invalid or expired token.")
  })?;
  Ok(Caller::new(data.claims.sub)?)
}

/// The caller behind a `Authorization: Bearer <jwt>` header.
#[derive(Debug)]
pub struct AuthenticatedUser(pub Caller);

impl AuthenticatedUser {
  pub fn caller(&self) -> &Caller {
    &self.0
  }
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AppError> {
  let state = req
    .app_data::<web::Data<AppState>>()
    .ok_or_else(|| AppError::Config("Application state is not configured.".to_string()))?;
  let token = req
    .headers()
    .get(actix_web::http::header::AUTHORIZATION)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.strip_prefix("Bearer "))
    .map(str::trim)
    .filter(|token| !token.is_empty())
    .ok_or_else(|| AppError::unauthenticated("A bearer token is required."))?;
  verify_token(token, &state.config.jwt_secret).map(AuthenticatedUser)
}

impl FromRequest for AuthenticatedUser {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
    ready(authenticate(req))
  }
}
