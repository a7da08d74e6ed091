//! Notification email seam
//!
//! [`SmtpMailer`] sends through an SMTP relay with lettre, or only logs when
//! no relay is configured. [`RecordingMailer`] keeps every request in memory.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use parking_lot::Mutex;
use tracing::{info, warn};

use nestchat_utils::{NestChatError, Result};

use crate::config::MailConfig;

/// Email notifications the fan-out core sends
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Someone opened a chat about the recipient's listing
    async fn notify_interest(&self, recipient: &str) -> Result<()>;

    /// A group that had gone quiet received a new message
    async fn notify_inactive_reply(&self, recipient: &str) -> Result<()>;
}

/// SMTP-backed mailer (or no-op when no host is configured)
#[derive(Clone)]
pub struct SmtpMailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    chat_url: String,
}

impl SmtpMailer {
    /// Build the mailer from configuration
    ///
    /// If the SMTP host is empty the mailer runs in no-op mode and only logs.
    pub fn new(config: &MailConfig) -> Result<Self> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| NestChatError::config(format!("Invalid mail.from address: {}", e)))?;

        let transport = if config.is_enabled() {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| {
                    NestChatError::config(format!("Failed to configure SMTP transport: {}", e))
                })?
                .port(config.smtp_port);

            let builder = if config.smtp_username.is_empty() {
                builder
            } else {
                builder.credentials(Credentials::new(
                    config.smtp_username.clone(),
                    config.smtp_password.clone(),
                ))
            };
            Some(builder.build())
        } else {
            warn!("SMTP host not configured; notification emails will only be logged");
            None
        };

        Ok(Self {
            transport,
            from,
            chat_url: config.chat_url.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    async fn send(&self, recipient: &str, subject: &str, heading: &str, lead: &str) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(subject, recipient, "mailer in no-op mode; skipping send");
            return Ok(());
        };

        let to = recipient.parse::<Mailbox>().map_err(|e| {
            NestChatError::notification(format!("Invalid recipient {}: {}", recipient, e))
        })?;

        let text_body = format!(
            "{}\n\n{}\n\nOpen the chat: {}\n\nThis message was sent automatically; please do not reply.",
            heading, lead, self.chat_url
        );
        let html_body = render_html(heading, lead, &self.chat_url);

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| NestChatError::notification(format!("Failed to build email: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| NestChatError::notification(format!("Failed to send email: {}", e)))?;
        info!(subject, recipient, "notification email sent");
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn notify_interest(&self, recipient: &str) -> Result<()> {
        self.send(
            recipient,
            "Someone is interested in your listing",
            "Someone is interested in your listing",
            "A buyer sent you a message about one of your products.",
        )
        .await
    }

    async fn notify_inactive_reply(&self, recipient: &str) -> Result<()> {
        self.send(
            recipient,
            "You have a new message",
            "You have a new message",
            "A conversation that was quiet for a while has a new message for you.",
        )
        .await
    }
}

fn render_html(heading: &str, lead: &str, chat_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; background-color: #f7f7f7; padding: 20px;">
    <div style="max-width: 600px; margin: auto; background-color: #ffffff; border-radius: 8px; padding: 30px;">
        <h2 style="color: #333;">{heading}</h2>
        <p style="font-size: 16px;">{lead}</p>
        <a href="{chat_url}" style="display:inline-block; padding: 10px 20px; background-color: #007BFF; color: #ffffff; text-decoration: none; border-radius: 5px;">Go to chat</a>
        <p style="font-size: 14px; color: #999; margin-top: 30px;">This message was sent automatically; please do not reply.</p>
    </div>
</body>
</html>"#
    )
}

/// Kind of notification requested from a [`Mailer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Interest,
    InactiveReply,
}

/// One request observed by [`RecordingMailer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub recipient: String,
}

/// Mailer that records requests instead of sending them
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentNotification>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every request fail (still recorded)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    /// Recipients of one kind, in request order
    pub fn recipients(&self, kind: NotificationKind) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.recipient.clone())
            .collect()
    }

    fn record(&self, kind: NotificationKind, recipient: &str) -> Result<()> {
        self.sent.lock().push(SentNotification {
            kind,
            recipient: recipient.to_string(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(NestChatError::notification("relay unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn notify_interest(&self, recipient: &str) -> Result<()> {
        self.record(NotificationKind::Interest, recipient)
    }

    async fn notify_inactive_reply(&self, recipient: &str) -> Result<()> {
        self.record(NotificationKind::InactiveReply, recipient)
    }
}
