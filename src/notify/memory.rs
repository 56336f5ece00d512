//! Capturing sink for drills and tests.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Notifier, NotifyError};
use crate::domain::Notification;

/// Keeps every notification in memory; clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far.
    pub async fn events(&self) -> Vec<Notification> {
        self.events.lock().await.clone()
    }
}

impl Notifier for MemoryNotifier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.events.lock().await.push(notification.clone());
        Ok(())
    }
}
