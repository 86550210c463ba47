//! Mail types for feedmail.

use async_trait::async_trait;

use crate::Result;

/// One rendered email, addressed to the configured recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text_body: String,
    /// Optional HTML alternative.
    pub html_body: Option<String>,
}

impl OutgoingMail {
    /// Create a plain-text mail.
    pub fn new(subject: impl Into<String>, text_body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            text_body: text_body.into(),
            html_body: None,
        }
    }

    /// Attach an HTML alternative.
    pub fn with_html(mut self, html_body: impl Into<String>) -> Self {
        self.html_body = Some(html_body.into());
        self
    }
}

/// Delivers one email to the single configured recipient.
///
/// A failure is returned as an error value; the caller decides whether the
/// item is retried.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one email.
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_mail_builder() {
        let mail = OutgoingMail::new("subject", "body");
        assert_eq!(mail.subject, "subject");
        assert_eq!(mail.text_body, "body");
        assert!(mail.html_body.is_none());

        let mail = mail.with_html("<p>body</p>");
        assert_eq!(mail.html_body.as_deref(), Some("<p>body</p>"));
    }
}
