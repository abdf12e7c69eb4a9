// escrow_service/src/main.rs

use actix_web::{web as actix_data, App, HttpServer};
use escrow_core::ports::SystemClock;
use escrow_core::{Coordinator, Deps};
use escrow_service::adapters::{EmailNotifier, PgDocumentStore, StripeClient};
use escrow_service::config::{AppConfig, LogFormat};
use escrow_service::state::AppState;
use escrow_service::web::configure_app_routes;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  match format {
    LogFormat::Json => builder.json().init(),
    LogFormat::Pretty => builder.init(),
  }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
  let app_config = AppConfig::from_env()?;
  init_tracing(app_config.log_format);
  tracing::info!(config = ?app_config, "Starting escrow coordinator server...");

  let db_pool = PgPoolOptions::new()
    .max_connections(10)
    .connect(&app_config.database_url)
    .await
    .map_err(|e| {
      tracing::error!(error = %e, "Failed to connect to the database.");
      e
    })?;
  tracing::info!("Successfully connected to the database.");

  let store = PgDocumentStore::new(db_pool);
  if app_config.run_migrations {
    store.migrate().await?;
    tracing::info!("Database migrations applied.");
  }

  let payments = StripeClient::new(app_config.stripe_secret_key.clone(), app_config.stripe_api_base.clone())?;
  let notifier = EmailNotifier::new(app_config.notification_sender.clone());
  let deps = Deps::new(
    Arc::new(store),
    Arc::new(payments),
    Arc::new(notifier),
    Arc::new(SystemClock),
    app_config.policy.clone(),
  );
  let coordinator = Coordinator::new(deps)?;

  let server_address = app_config.bind_address();
  let app_state = AppState::new(coordinator, app_config);
  tracing::info!("Attempting to bind server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await?;

  tracing::info!("Server stopped.");
  Ok(())
}
