// Outbound email delivery

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::models::TokenPurpose;

/// A link-bearing message for one recipient
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub purpose: TokenPurpose,
    pub link: String,
}

#[derive(Debug, thiserror::Error)]
#[error("email delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Transport for verification and reset emails
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), DeliveryError>;
}

/// Writes outgoing mail to the log instead of a transport
///
/// Intended for local development: the link is the only way to complete the
/// flow, so it is logged at info level.
#[derive(Debug, Clone, Default)]
pub struct TracingEmailSender;

#[async_trait]
impl EmailSender for TracingEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %message.to,
            purpose = %message.purpose,
            link = %message.link,
            "Email delivery (log transport)"
        );
        Ok(())
    }
}

/// Keeps sent messages in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryEmailSender {
    outbox: Arc<Mutex<Vec<EmailMessage>>>,
    fail: bool,
}

impl MemoryEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every delivery fails
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.outbox.lock().await.clone()
    }

    /// Most recent message sent to `to`
    pub async fn last_to(&self, to: &str) -> Option<EmailMessage> {
        self.outbox
            .lock()
            .await
            .iter()
            .rev()
            .find(|message| message.to == to)
            .cloned()
    }
}

#[async_trait]
impl EmailSender for MemoryEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), DeliveryError> {
        if self.fail {
            return Err(DeliveryError("transport unavailable".to_string()));
        }
        self.outbox.lock().await.push(message);
        Ok(())
    }
}

/// Extract the `token` query parameter from a link
pub fn token_from_link(link: &str) -> Option<String> {
    let parsed = url::Url::parse(link).ok()?;
    let token = parsed
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned());
    token
}
