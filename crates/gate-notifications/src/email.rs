//! Email delivery

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notification::{SecurityEvent, SecurityNotification};

/// Email errors
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

pub type EmailResult<T> = Result<T, EmailError>;

/// Email message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub text_body: String,
    pub headers: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
}

/// Email address with optional name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAddress {
    pub email: String,
    pub name: Option<String>,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Format as RFC 5322
    pub fn to_rfc5322(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

impl EmailMessage {
    pub fn new(
        from: EmailAddress,
        to: Vec<EmailAddress>,
        subject: impl Into<String>,
        text_body: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from,
            to,
            subject: subject.into(),
            text_body: text_body.into(),
            headers: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Email sender trait
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send an email, returning the message id
    async fn send(&self, message: &EmailMessage) -> EmailResult<String>;
}

/// Sender that writes the message to the log instead of delivering it
#[derive(Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> EmailResult<String> {
        if message.to.is_empty() {
            return Err(EmailError::InvalidRecipient("no recipients".to_string()));
        }

        tracing::info!(
            message_id = %message.id,
            from = %message.from.to_rfc5322(),
            to = %message
                .to
                .iter()
                .map(EmailAddress::to_rfc5322)
                .collect::<Vec<_>>()
                .join(", "),
            subject = %message.subject,
            "Email delivered to log"
        );
        tracing::debug!(body = %message.text_body, "Email body");

        Ok(message.id.clone())
    }
}

/// Renders security notifications as plain-text emails
pub struct EmailRenderer {
    from_address: EmailAddress,
}

impl EmailRenderer {
    pub fn new(from_address: EmailAddress) -> Self {
        Self { from_address }
    }

    pub fn render(&self, notification: &SecurityNotification) -> EmailMessage {
        EmailMessage::new(
            self.from_address.clone(),
            vec![EmailAddress::new(&notification.recipient_email).with_name(&notification.login)],
            self.subject(notification),
            self.body(notification),
        )
        .header("X-Gate-Event", notification.event.as_str())
    }

    fn subject(&self, notification: &SecurityNotification) -> String {
        match notification.event {
            SecurityEvent::TwoFactorOtpAttemptFailed => {
                "Attempted sign in using a wrong two-factor authentication code".to_string()
            }
            SecurityEvent::AccountLocked => "Your account has been locked".to_string(),
            SecurityEvent::PossibleClonedCredential => {
                "A security key on your account may have been cloned".to_string()
            }
        }
    }

    fn body(&self, notification: &SecurityNotification) -> String {
        let mut body = format!("Hello {},\n\n", notification.login);

        match notification.event {
            SecurityEvent::TwoFactorOtpAttemptFailed => {
                body.push_str(
                    "Someone signed in to your account with your correct password \
                     but a wrong two-factor authentication code.\n",
                );
            }
            SecurityEvent::AccountLocked => {
                body.push_str(
                    "Your account was locked after too many failed sign-in attempts.\n",
                );
                if let Some(until) = notification.locked_until {
                    body.push_str(&format!(
                        "It will unlock automatically at {}.\n",
                        until.format("%Y-%m-%d %H:%M UTC")
                    ));
                }
            }
            SecurityEvent::PossibleClonedCredential => {
                body.push_str(
                    "One of your security keys signed a sign-in request with a counter \
                     that did not advance. The key may have been cloned. Consider \
                     removing it and registering a new one.\n",
                );
            }
        }

        body.push_str(&format!(
            "\nTime: {}\n",
            notification.occurred_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(ip) = &notification.ip_address {
            body.push_str(&format!("IP address: {}\n", ip));
        }

        body.push_str("\nIf this was not you, change your password immediately.\n");
        body
    }
}
