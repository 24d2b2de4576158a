//! Sign-in mail composition and the logging mailer.

use std::fmt::Write as _;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::ports::{MailError, SigninMailer};

/// Default `From` address.
pub const DEFAULT_SENDER: &str = "support@diagramastext.dev";

const BOUNDARY: &str = "00";
const SITE: &str = "https://diagramastext.dev";

/// Subject line carrying the secret.
pub fn signin_subject(secret: &str) -> String {
    format!("diagramastext.dev authentication code: {secret}")
}

/// Build a `multipart/alternative` message with plain-text and HTML bodies.
pub fn compose_signin_message(
    sender: &str,
    recipient: &str,
    secret: &str,
) -> Result<String, MailError> {
    if recipient.contains(['\r', '\n']) || sender.contains(['\r', '\n']) {
        return Err(MailError::Compose("header injection in address".into()));
    }

    let mut message = String::new();
    let parts = [
        (
            "text/plain",
            format!(
                "Complete authentication: copy the code {secret} and paste it in your browser \
                 with {SITE} opened.\r\nPlease ignore the email if you feel that it was received \
                 by mistake.\r\n"
            ),
        ),
        (
            "text/html",
            format!(
                "<html><body><p>Complete authentication: copy the code <b>{secret}</b> and paste \
                 it in your browser with <a href=\"{SITE}\">{SITE}</a> opened.</p><p>Please \
                 ignore the email if you feel that it was received by mistake.</p></body></html>\r\n"
            ),
        ),
    ];

    write!(
        message,
        "From: {sender}\r\nTo: {recipient}\r\nSubject: {}\r\nMIME-Version: 1.0\r\n\
         Content-Type: multipart/alternative; boundary=\"{BOUNDARY}\"\r\n\r\n",
        signin_subject(secret)
    )
    .map_err(|e| MailError::Compose(e.to_string()))?;

    for (content_type, body) in parts {
        write!(
            message,
            "--{BOUNDARY}\r\nContent-Type: {content_type}; charset=\"UTF-8\"\r\n\
             Content-Disposition: inline\r\n\r\n{body}\r\n"
        )
        .map_err(|e| MailError::Compose(e.to_string()))?;
    }
    write!(message, "--{BOUNDARY}--\r\n").map_err(|e| MailError::Compose(e.to_string()))?;

    Ok(message)
}

/// Mailer that writes messages to the log instead of delivering them.
///
/// Only the recipient is logged unless body logging is switched on. The body
/// carries the one-time secret.
#[derive(Debug, Clone)]
pub struct LogMailer {
    sender: String,
    log_body: bool,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            log_body: false,
        }
    }

    /// Also log the full message, secret included. Meant for local development.
    pub fn with_body_logging(mut self, enabled: bool) -> Self {
        self.log_body = enabled;
        self
    }

    fn loggable_body<'a>(&self, message: &'a str) -> Option<&'a str> {
        self.log_body.then_some(message)
    }
}

impl Default for LogMailer {
    fn default() -> Self {
        Self::new(DEFAULT_SENDER)
    }
}

#[async_trait]
impl SigninMailer for LogMailer {
    async fn send_signin_email(&self, recipient: &str, secret: &str) -> Result<(), MailError> {
        let message = compose_signin_message(&self.sender, recipient, secret)?;
        info!(recipient, sender = %self.sender, "sign-in email queued to log");
        if let Some(body) = self.loggable_body(&message) {
            debug!(%body, "sign-in email body");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_secret_in_subject_and_bodies() {
        let message = compose_signin_message(DEFAULT_SENDER, "foo@bar.baz", "a1b2c3").unwrap();
        assert!(message.contains("To: foo@bar.baz\r\n"));
        assert!(message.contains("Subject: diagramastext.dev authentication code: a1b2c3\r\n"));
        assert!(message.contains("Content-Type: text/plain"));
        assert!(message.contains("Content-Type: text/html"));
        assert_eq!(message.matches("a1b2c3").count(), 3);
        assert!(message.ends_with("--00--\r\n"));
    }

    #[test]
    fn rejects_header_injection() {
        assert!(matches!(
            compose_signin_message(DEFAULT_SENDER, "a@b.c\r\nBcc: x@y.z", "a1b2c3"),
            Err(MailError::Compose(_))
        ));
    }

    #[test]
    fn log_mailer_keeps_body_out_of_logs_by_default() {
        let message = compose_signin_message(DEFAULT_SENDER, "foo@bar.baz", "a1b2c3").unwrap();
        assert_eq!(LogMailer::default().loggable_body(&message), None);
        let dev = LogMailer::default().with_body_logging(true);
        assert_eq!(dev.loggable_body(&message), Some(message.as_str()));
    }

    #[tokio::test]
    async fn log_mailer_accepts_valid_recipient() {
        LogMailer::default()
            .send_signin_email("foo@bar.baz", "a1b2c3")
            .await
            .unwrap();
    }
}
