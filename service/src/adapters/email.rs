// escrow_service/src/adapters/email.rs
use async_trait::async_trait;
use escrow_core::ports::{Notification, Notifier};
use tracing::{info, instrument};

/// Renders notifications as emails and hands them to the log-backed outbox.
#[derive(Debug, Clone)]
pub struct EmailNotifier {
  sender: String,
}

#[derive(Debug)]
pub struct OutgoingEmail {
  pub to_user: String,
  pub from: String,
  pub subject: String,
  pub body: String,
}

impl EmailNotifier {
  pub fn new(sender: impl Into<String>) -> Self {
    Self { sender: sender.into() }
  }

  pub fn render(&self, notification: &Notification) -> OutgoingEmail {
    let body = match notification {
      Notification::OrderRejected { reason, .. } => format!(
        "The provider declined your booking: {reason}. The full amount has been refunded."
      ),
      Notification::HoursSubmitted { total_hours, .. } => {
        format!("Your provider logged {total_hours:.2} additional hours. Please review them.")
      }
      _ => notification.subject(),
    };
    OutgoingEmail {
      to_user: notification.recipient().to_string(),
      from: self.sender.clone(),
      subject: notification.subject(),
      body,
    }
  }
}

#[async_trait]
impl Notifier for EmailNotifier {
  #[instrument(name = "EmailNotifier::notify", skip_all, fields(order_id = %notification.order_id()))]
  async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
    let email = self.render(notification);
    anyhow::ensure!(!email.to_user.is_empty(), "Notification has no recipient");
    let message_id = format!("msg_{}", uuid::Uuid::new_v4());
    info!(
      to_user = %email.to_user,
      from = %email.from,
      subject = %email.subject,
      %message_id,
      "Notification email queued."
    );
    Ok(())
  }
}
