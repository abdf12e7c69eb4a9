// escrow_service/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use escrow_core::BillingPolicy;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Pretty,
  Json,
}

#[derive(Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: String,

  pub stripe_secret_key: String,
  pub stripe_webhook_secret: String,
  pub stripe_api_base: String,

  /// HS256 key for caller tokens.
  pub jwt_secret: String,
  pub notification_sender: String,

  pub policy: BillingPolicy,

  pub log_format: LogFormat,
  pub run_migrations: bool,
}

// Secrets are left out of the debug output.
impl std::fmt::Debug for AppConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AppConfig")
      .field("server_host", &self.server_host)
      .field("server_port", &self.server_port)
      .field("stripe_api_base", &self.stripe_api_base)
      .field("notification_sender", &self.notification_sender)
      .field("policy", &self.policy)
      .field("log_format", &self.log_format)
      .field("run_migrations", &self.run_migrations)
      .finish_non_exhaustive()
  }
}

fn parse_var<T: FromStr>(name: &str, raw: String) -> Result<T>
where
  T::Err: std::fmt::Display,
{
  raw
    .trim()
    .parse::<T>()
    .map_err(|e| AppError::Config(format!("Invalid {name}: {e}")))
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };
    let defaults = BillingPolicy::default();

    let server_host = get_env("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let server_port = parse_var("SERVER_PORT", get_env("SERVER_PORT").unwrap_or_else(|_| "8080".to_string()))?;
    let database_url = get_env("DATABASE_URL")?;

    let stripe_secret_key = get_env("STRIPE_SECRET_KEY")?;
    let stripe_webhook_secret = get_env("STRIPE_WEBHOOK_SECRET")?;
    let stripe_api_base = get_env("STRIPE_API_BASE").unwrap_or_else(|_| "https://api.stripe.com".to_string());
    let jwt_secret = get_env("JWT_SECRET")?;
    let notification_sender = get_env("NOTIFICATION_SENDER").unwrap_or_else(|_| "noreply@example.com".to_string());

    let policy = BillingPolicy {
      currency: get_env("CURRENCY").unwrap_or(defaults.currency).to_lowercase(),
      booking_fee_rate: match get_env("PLATFORM_FEE_RATE") {
        Ok(raw) => parse_var("PLATFORM_FEE_RATE", raw)?,
        Err(_) => defaults.booking_fee_rate,
      },
      additional_hours_fee_rate: match get_env("ADDITIONAL_HOURS_FEE_RATE") {
        Ok(raw) => parse_var("ADDITIONAL_HOURS_FEE_RATE", raw)?,
        Err(_) => defaults.additional_hours_fee_rate,
      },
      daily_hour_cap: match get_env("DAILY_HOUR_CAP") {
        Ok(raw) => parse_var("DAILY_HOUR_CAP", raw)?,
        Err(_) => defaults.daily_hour_cap,
      },
      payment_lock_ttl_secs: match get_env("PAYMENT_LOCK_TTL_SECS") {
        Ok(raw) => parse_var("PAYMENT_LOCK_TTL_SECS", raw)?,
        Err(_) => defaults.payment_lock_ttl_secs,
      },
      ..defaults
    };
    policy.validate()?;

    let log_format = match get_env("LOG_FORMAT").unwrap_or_default().to_lowercase().as_str() {
      "json" => LogFormat::Json,
      "" | "pretty" | "text" => LogFormat::Pretty,
      other => return Err(AppError::Config(format!("Invalid LOG_FORMAT '{other}'"))),
    };
    let run_migrations = parse_var(
      "RUN_MIGRATIONS",
      get_env("RUN_MIGRATIONS").unwrap_or_else(|_| "true".to_string()),
    )?;

    Ok(Self {
      server_host,
      server_port,
      database_url,
      stripe_secret_key,
      stripe_webhook_secret,
      stripe_api_base,
      jwt_secret,
      notification_sender,
      policy,
      log_format,
      run_migrations,
    })
  }

  pub fn bind_address(&self) -> String {
    format!("{}:{}", self.server_host, self.server_port)
  }
}
