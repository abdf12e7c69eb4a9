// escrow_service/src/state.rs
use crate::config::AppConfig;
use escrow_core::Coordinator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub coordinator: Arc<Coordinator>,
  pub config: Arc<AppConfig>,
}

impl AppState {
  pub fn new(coordinator: Coordinator, config: AppConfig) -> Self {
    Self {
      coordinator: Arc::new(coordinator),
      config: Arc::new(config),
    }
  }
}
