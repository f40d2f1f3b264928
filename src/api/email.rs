//! Outbound email for password reset links.
//!
//! Handlers build an [`EmailMessage`] and hand it to an [`EmailSender`]. The
//! sender decides how to deliver it:
//!
//! - `LogEmailSender` (fallback without a Resend key) delivers nothing. It
//!   warns once when selected and on every send with the recipient and
//!   subject. Bodies carry reset tokens and are never logged.
//! - `ResendEmailSender` posts to the Resend HTTP API.
//! - `MemoryEmailSender` records messages so tests can follow the link.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, info, info_span, warn};

const DEFAULT_FROM: &str = "Studio Admin <noreply@studio-admin.dev>";
const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com/emails";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub html: String,
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error the caller turns into a 500.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        warn!(
            to_email = %message.to_email,
            subject = %message.subject,
            "email not delivered: no email provider configured"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl MemoryEmailSender {
    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn last(&self) -> Option<EmailMessage> {
        self.sent.lock().await.last().cloned()
    }
}

#[async_trait]
impl EmailSender for MemoryEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    from: String,
    resend_api_key: Option<SecretString>,
    resend_api_url: String,
    timeout: Duration,
}

impl EmailConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            from: DEFAULT_FROM.to_string(),
            resend_api_key: None,
            resend_api_url: DEFAULT_RESEND_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_from(mut self, from: String) -> Self {
        self.from = from;
        self
    }

    #[must_use]
    pub fn with_resend_api_key(mut self, key: Option<SecretString>) -> Self {
        self.resend_api_key = key.filter(|key| !key.expose_secret().trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_resend_api_url(mut self, url: String) -> Self {
        self.resend_api_url = url;
        self
    }

    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    #[must_use]
    pub fn uses_resend(&self) -> bool {
        self.resend_api_key.is_some()
    }

    /// Build the sender this configuration describes.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn sender(&self) -> Result<std::sync::Arc<dyn EmailSender>> {
        match &self.resend_api_key {
            Some(key) => Ok(std::sync::Arc::new(ResendEmailSender::new(
                self.from.clone(),
                key.clone(),
                self.resend_api_url.clone(),
                self.timeout,
            )?)),
            None => {
                warn!(
                    "no Resend API key configured; password reset emails will not be delivered"
                );
                Ok(std::sync::Arc::new(LogEmailSender))
            }
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

pub struct ResendEmailSender {
    client: Client,
    from: String,
    api_key: SecretString,
    api_url: String,
}

impl ResendEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        from: String,
        api_key: SecretString,
        api_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build email HTTP client")?;
        Ok(Self {
            client,
            from,
            api_key,
            api_url,
        })
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let payload = ResendPayload {
            from: &self.from,
            to: [message.to_email.as_str()],
            subject: &message.subject,
            html: &message.html,
        };
        let span = info_span!(
            "email.send",
            email.provider = "resend",
            email.subject = %message.subject
        );
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .instrument(span)
            .await
            .context("Email API request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Email API returned {status}"));
        }
        info!(to_email = %message.to_email, "reset email delivered");
        Ok(())
    }
}

/// Build the reset link mailed to the administrator.
#[must_use]
pub fn reset_link(base_url: &str, token: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/reset-password?token={token}")
}

/// Compose the password reset email. `resend` switches the wording for the
/// "send again" flow.
#[must_use]
pub fn reset_email(to_email: &str, link: &str, ttl: Duration, resend: bool) -> EmailMessage {
    let minutes = (ttl.as_secs() / 60).max(1);
    let intro = if resend {
        "You requested to resend the password reset link. Click the following link to reset your password:"
    } else {
        "Click the following link to reset your password:"
    };
    let subject = if resend {
        "Password Reset Link (Resent)"
    } else {
        "Password Reset Link"
    };
    EmailMessage {
        to_email: to_email.to_string(),
        subject: subject.to_string(),
        html: format!(
            "<p>{intro}</p>\n<a href=\"{link}\">{link}</a>\n<p>This link will expire in {minutes} minutes.</p>"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn reset_link_joins_base_url() {
        assert_eq!(
            reset_link("https://studio.example/", "abc.def.ghi"),
            "https://studio.example/reset-password?token=abc.def.ghi"
        );
    }

    #[test]
    fn reset_email_mentions_expiry() {
        let message = reset_email(
            "owner@studio.example",
            "https://studio.example/reset-password?token=t",
            Duration::from_secs(900),
            false,
        );
        assert_eq!(message.subject, "Password Reset Link");
        assert!(message.html.contains("expire in 15 minutes"));
        assert!(message.html.contains("token=t"));

        let resent = reset_email("o@x.com", "link", Duration::from_secs(30), true);
        assert!(resent.html.contains("resend"));
        assert!(resent.html.contains("expire in 1 minutes"));
    }

    #[tokio::test]
    async fn memory_sender_records_messages() -> Result<()> {
        let sender = MemoryEmailSender::default();
        let message = reset_email("a@x.com", "link", Duration::from_secs(60), false);
        sender.send(&message).await?;
        assert_eq!(sender.last().await, Some(message));
        assert_eq!(sender.sent().await.len(), 1);
        Ok(())
    }

    #[test]
    fn config_picks_sender() -> Result<()> {
        let config = EmailConfig::new().with_resend_api_key(Some(SecretString::from(" ")));
        assert!(!config.uses_resend());
        config.sender()?;

        let config = EmailConfig::new().with_resend_api_key(Some(SecretString::from("re_123")));
        assert!(config.uses_resend());
        config.sender()?;
        Ok(())
    }

    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut log) = self.0.lock() {
                log.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn text(&self) -> String {
            self.0
                .lock()
                .map(|log| String::from_utf8_lossy(&log).into_owned())
                .unwrap_or_default()
        }
    }

    #[test]
    fn fallback_sender_warns_when_selected() -> Result<()> {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let config = EmailConfig::new();
        tracing::subscriber::with_default(subscriber, || config.sender())?;

        let text = log.text();
        assert!(text.contains("WARN"));
        assert!(text.contains("will not be delivered"));
        Ok(())
    }

    #[test]
    fn resend_sender_does_not_warn() -> Result<()> {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let config = EmailConfig::new().with_resend_api_key(Some(SecretString::from("re_123")));
        tracing::subscriber::with_default(subscriber, || config.sender())?;

        assert!(!log.text().contains("will not be delivered"));
        Ok(())
    }

    #[test]
    fn config_debug_redacts_key() {
        let config = EmailConfig::new().with_resend_api_key(Some(SecretString::from("re_secret")));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("re_secret"));
    }
}
