//! SMTP delivery via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::config::SmtpConfig;
use crate::{FeedmailError, Result};

use super::types::{Mailer, OutgoingMail};

/// Port on which the relay expects implicit TLS.
const SMTPS_PORT: u16 = 465;

/// Sends every email from the configured sender to the configured recipient.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    /// Build a mailer from the SMTP configuration.
    ///
    /// No connection is made until the first send.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from = parse_mailbox(config.sender(), "sender")?;
        let to = parse_mailbox(&config.recipient, "recipient")?;

        let builder = if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| FeedmailError::Mail(format!("invalid SMTP host {}: {}", config.host, e)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        debug!(
            "SMTP mailer configured for {}:{} ({} -> {})",
            config.host, config.port, from, to
        );

        Ok(Self {
            transport,
            from,
            to,
        })
    }

    /// Build the MIME message for one mail.
    fn build_message(&self, mail: &OutgoingMail) -> Result<Message> {
        let builder = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(mail.subject.as_str());

        let message = match &mail.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                mail.text_body.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(mail.text_body.clone()),
        };

        message.map_err(|e| FeedmailError::Mail(format!("failed to build email: {}", e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let message = self.build_message(mail)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| FeedmailError::Mail(format!("failed to send email: {}", e)))?;

        info!("Email sent: {}", mail.subject);
        Ok(())
    }
}

fn parse_mailbox(address: &str, role: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| FeedmailError::Mail(format!("invalid {} address {:?}: {}", role, address, e)))
}
