//! Operator alert delivery.

use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no async runtime available to deliver alert")]
    NoRuntime,

    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// Best-effort notification channel.
pub trait Notifier: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::warn!(to = %to, subject = %subject, body = %body, "Operator alert");
        Ok(())
    }
}

/// Posts alerts as JSON to a webhook.
///
/// Delivery is spawned onto the current Tokio runtime and not awaited; the
/// outcome is only logged.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| NotifyError::NoRuntime)?;
        let request = self.client.post(&self.url).json(&serde_json::json!({
            "to": to,
            "subject": subject,
            "body": body,
        }));
        let url = self.url.clone();
        handle.spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => tracing::debug!(url = %url, "Alert delivered"),
                Err(e) => tracing::error!(url = %url, error = %e, "Alert delivery failed"),
            }
        });
        Ok(())
    }
}

/// A delivered alert, as recorded by [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAlert {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records alerts in memory. Can be told to fail every send.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<SentAlert>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentAlert> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Delivery("configured to fail".into()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::Delivery("recorder poisoned".into()))?;
        sent.push(SentAlert {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_without_runtime_errors() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/alerts");
        assert!(matches!(
            notifier.send("ops@example.com", "s", "b"),
            Err(NotifyError::NoRuntime)
        ));
    }

    #[test]
    fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier.send("ops@example.com", "subject", "body").unwrap();
        assert_eq!(notifier.sent().len(), 1);
        assert!(MemoryNotifier::failing().send("a", "b", "c").is_err());
    }
}
