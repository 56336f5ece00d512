//! Webhook sink: each notification is POSTed as JSON.

use std::time::Duration;

use reqwest::Client;

use super::{Notifier, NotifyError};
use crate::domain::Notification;
use crate::error::GuardianError;

/// POSTs the serialized [`Notification`] to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Builds a notifier with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`GuardianError::Config`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, GuardianError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardianError::Config(format!("webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected(status.as_u16()))
        }
    }
}
