//! Proactive outbound messages (reminders) that are not replies.

use tokio::sync::mpsc;

/// A message to push to a user outside the request/reply cycle.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Channel that should deliver it.
    pub channel: String,
    pub user_id: String,
    /// Channel metadata captured from the user's last message (chat id, ...).
    pub metadata: serde_json::Value,
    pub text: String,
}

/// Sending half of the notification queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a notification. Returns `false` once the receiver is gone.
    pub fn notify(&self, notification: Notification) -> bool {
        if self.tx.send(notification).is_err() {
            tracing::warn!("Notification dropped: receiver closed");
            return false;
        }
        true
    }
}
