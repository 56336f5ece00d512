//! Console sink: notifications become `tracing` events.

use super::{Notifier, NotifyError};
use crate::domain::Notification;

/// Logs each notification; failures at `warn`, the rest at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let event = notification.event_type_str();
        let summary = notification.summary();
        if notification.is_failure() {
            tracing::warn!(event, "{summary}");
        } else {
            tracing::info!(event, "{summary}");
        }
        Ok(())
    }
}
