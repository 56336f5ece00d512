//! Notification sinks.
//!
//! Engines hand every [`Notification`] to a [`NotifierSet`]. A failing sink
//! is logged and skipped; notification problems never fail an operation.

pub mod console;
pub mod memory;
pub mod webhook;

use std::future::Future;
use std::time::Duration;

pub use console::ConsoleNotifier;
pub use memory::MemoryNotifier;
pub use webhook::WebhookNotifier;

use crate::config::NotificationSettings;
use crate::domain::Notification;
use crate::error::GuardianError;

/// Delivery failure of one sink.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The request could not be sent.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The receiver answered with a non-success status.
    #[error("receiver rejected notification with status {0}")]
    Rejected(u16),
}

/// A destination for notifications.
pub trait Notifier: Send + Sync {
    /// Short sink name used in logs.
    fn name(&self) -> &'static str;

    /// Delivers one notification.
    fn notify(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// One configured sink.
#[derive(Debug, Clone)]
pub enum Sink {
    /// Log through `tracing`.
    Console(ConsoleNotifier),
    /// JSON POST.
    Webhook(WebhookNotifier),
    /// In-memory capture.
    Memory(MemoryNotifier),
}

impl Sink {
    fn name(&self) -> &'static str {
        match self {
            Self::Console(n) => n.name(),
            Self::Webhook(n) => n.name(),
            Self::Memory(n) => n.name(),
        }
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self {
            Self::Console(n) => n.notify(notification).await,
            Self::Webhook(n) => n.notify(notification).await,
            Self::Memory(n) => n.notify(notification).await,
        }
    }
}

/// Fan-out over every configured sink.
#[derive(Debug, Clone, Default)]
pub struct NotifierSet {
    sinks: Vec<Sink>,
}

impl NotifierSet {
    /// A set with no sinks.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the sinks enabled in the settings.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] if the webhook client cannot be
    /// built.
    pub fn from_settings(settings: &NotificationSettings) -> Result<Self, GuardianError> {
        let mut set = Self::empty();
        if settings.console {
            set = set.with(Sink::Console(ConsoleNotifier));
        }
        if let Some(url) = &settings.webhook_url {
            let webhook = WebhookNotifier::new(
                url,
                Duration::from_secs(settings.webhook_timeout_secs),
            )?;
            set = set.with(Sink::Webhook(webhook));
        }
        Ok(set)
    }

    /// Adds a sink.
    #[must_use]
    pub fn with(mut self, sink: Sink) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns `true` if no sink is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Delivers to every sink, returning how many succeeded.
    pub async fn dispatch(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.notify(notification).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    sink = sink.name(),
                    event = notification.event_type_str(),
                    error = %e,
                    "notification not delivered"
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::SeverityLevel;

    fn alert() -> Notification {
        Notification::AlertRaised {
            level: SeverityLevel::High,
            message: "ogrenciler dropped 40%".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_the_others() {
        let Ok(webhook) = WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_millis(200))
        else {
            panic!("client should build");
        };
        let memory = MemoryNotifier::new();
        let set = NotifierSet::empty()
            .with(Sink::Webhook(webhook))
            .with(Sink::Memory(memory.clone()));
        let delivered = set.dispatch(&alert()).await;
        assert_eq!(delivered, 1);
        assert_eq!(memory.events().await.len(), 1);
    }

    #[test]
    fn settings_select_sinks() {
        let Ok(set) = NotifierSet::from_settings(&NotificationSettings::default()) else {
            panic!("default sinks should build");
        };
        assert_eq!(set.len(), 1);
        let Ok(none) = NotifierSet::from_settings(&NotificationSettings {
            console: false,
            webhook_url: None,
            webhook_timeout_secs: 1,
        }) else {
            panic!("should build");
        };
        assert!(none.is_empty());
    }
}
