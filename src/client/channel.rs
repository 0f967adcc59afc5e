use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    Login,
    Logout,
}

/// One message on the cross-tab channel, tagged with the sending tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthMessage {
    pub tab_id: u64,
    pub event: AuthEvent,
}

/// Advisory auth notifications between tabs of the same app.
///
/// Delivery is best-effort: a receiver that lags drops old messages.
#[derive(Debug, Clone)]
pub struct AuthChannel {
    tx: broadcast::Sender<AuthMessage>,
}

impl AuthChannel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthMessage> {
        self.tx.subscribe()
    }

    /// Publishes `message`. No listeners is not an error.
    pub fn publish(&self, message: AuthMessage) {
        if self.tx.send(message).is_err() {
            tracing::trace!(?message, "No other tabs listening");
        }
    }
}

impl Default for AuthChannel {
    fn default() -> Self {
        Self::new()
    }
}
