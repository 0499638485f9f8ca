//! Delivery channels implementing [`Notifier`].
//!
//! - [`SmtpNotifier`]: sends the digest as a multipart (text + HTML) email
//! - [`LogNotifier`]: logs what would have been sent; used for dry runs

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::distribute::{Notifier, RenderedMessage};
use crate::errors::DeliveryError;

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    /// 465 uses implicit TLS, anything else STARTTLS.
    pub port: u16,
    /// Sender, e.g. `"Digest <digest@example.com>"`.
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Sends digests by email.
#[derive(Debug)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
                address: settings.from.clone(),
                reason: e.to_string(),
            })?;

        let builder = if settings.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| DeliveryError::Transport(e.to_string()))?
        .port(settings.port);

        let builder = match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, address: &str, payload: &RenderedMessage) -> Result<(), DeliveryError> {
        let to: Mailbox = address
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&payload.subject)
            .multipart(MultiPart::alternative_plain_html(
                payload.text_body.clone(),
                payload.html_body.clone(),
            ))
            .map_err(|e| DeliveryError::Message(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        info!(channel = "smtp", %address, subject = %payload.subject, "Email delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "smtp"
    }
}

/// Logs deliveries instead of performing them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, address: &str, payload: &RenderedMessage) -> Result<(), DeliveryError> {
        info!(
            channel = "log",
            %address,
            subject = %payload.subject,
            bytes = payload.html_body.len(),
            "Dry run: digest not sent"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(from: &str) -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            from: from.to_string(),
            username: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn test_smtp_rejects_bad_sender() {
        let err = SmtpNotifier::from_settings(&settings("not-an-email")).unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_smtp_rejects_bad_recipient_before_connecting() {
        let notifier = SmtpNotifier::from_settings(&settings("Digest <digest@example.com>")).unwrap();
        let payload = RenderedMessage {
            subject: "s".to_string(),
            html_body: "<p>h</p>".to_string(),
            text_body: "t".to_string(),
        };
        let err = notifier.send("nobody", &payload).await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let payload = RenderedMessage {
            subject: "s".to_string(),
            html_body: String::new(),
            text_body: String::new(),
        };
        assert!(LogNotifier.send("a@example.com", &payload).await.is_ok());
        assert_eq!(LogNotifier.channel_name(), "log");
    }
}
