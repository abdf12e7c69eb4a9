// escrow-core/src/memory/notifier.rs

use crate::ports::notifier::{Notification, Notifier};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, instrument};

/// Keeps every notification it is handed; optionally fails all deliveries.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  sent: Mutex<Vec<Notification>>,
  failing: bool,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing() -> Self {
    Self {
      sent: Mutex::new(Vec::new()),
      failing: true,
    }
  }

  pub fn sent(&self) -> Vec<Notification> {
    self.sent.lock().clone()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  #[instrument(skip(self, notification), fields(recipient = %notification.recipient(), order_id = %notification.order_id()))]
  async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
    if self.failing {
      anyhow::bail!("notification channel unavailable");
    }
    info!(subject = %notification.subject(), "Notification recorded.");
    self.sent.lock().push(notification.clone());
    Ok(())
  }
}
