use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Transactional mail sent on account events
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, to: &str, name: &str, url: &str) -> Result<(), MailError>;

    async fn send_password_reset(&self, to: &str, name: &str, url: &str) -> Result<(), MailError>;
}

/// Writes outgoing mail to the log instead of delivering it. Reset links
/// carry a live token and are only logged in full when `reveal_links` is set.
#[derive(Debug, Default, Clone)]
pub struct LogMailer {
    pub reveal_links: bool,
}

impl LogMailer {
    pub fn new(reveal_links: bool) -> Self {
        Self { reveal_links }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, to: &str, name: &str, url: &str) -> Result<(), MailError> {
        tracing::info!(to, "Welcome to Tourbook, {}! Your account: {}", first_name(name), url);
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, name: &str, url: &str) -> Result<(), MailError> {
        tracing::info!(
            to,
            "Hi {}, forgot your password? Submit a PATCH request with your new password and confirmPassword to: {} (valid for 10 minutes)",
            first_name(name),
            if self.reveal_links { url.to_string() } else { redact_token(url) }
        );
        Ok(())
    }
}

/// Replaces the last path segment (the token) of a reset link
fn redact_token(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, _)) => format!("{}/[redacted]", base),
        None => "[redacted]".to_string(),
    }
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}
