//! Agent alert broadcaster.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::agent::{Alert, AlertSink};

/// Publishes agent alerts on a tokio broadcast channel.
#[derive(Clone)]
pub struct AlertBroadcaster {
    sender: Arc<broadcast::Sender<Alert>>,
}

impl AlertBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }
}

impl Default for AlertBroadcaster {
    fn default() -> Self {
        Self::new(512)
    }
}

impl AlertSink for AlertBroadcaster {
    fn emit(&self, alert: Alert) {
        log::info!(
            "[{}] {} alert: {}",
            alert.level,
            alert.kind,
            alert.message
        );
        // No active receivers is fine
        let _ = self.sender.send(alert);
    }
}
