//! Outbound mail collaborator
//!
//! Used when a friend request targets an email with no account behind it.

use async_trait::async_trait;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::MailConfig;
use crate::error::{RelayError, Result};

/// Mail bodies the relay knows how to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailTemplate {
    FriendRequest { sender_email: String },
}

impl MailTemplate {
    /// Template name as known by the mail provider
    pub fn name(&self) -> &'static str {
        match self {
            MailTemplate::FriendRequest { .. } => "friend_request",
        }
    }

    pub fn render_html(&self) -> String {
        match self {
            MailTemplate::FriendRequest { sender_email } => format!(
                "<p><strong>{}</strong> wants to be your friend on SwiftChat.</p>\
                 <p>Create an account with this email address to answer the request.</p>",
                sender_email
            ),
        }
    }
}

/// Provider acknowledgement of an accepted mail
#[derive(Debug, Clone, Deserialize)]
pub struct MailReceipt {
    pub id: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, template: MailTemplate) -> Result<MailReceipt>;
}

/// Development sender: logs the mail instead of delivering it
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, to: &str, subject: &str, template: MailTemplate) -> Result<MailReceipt> {
        let id = uuid::Uuid::new_v4().to_string();
        info!(
            "Mail {} (template {}) to {}: {}",
            id,
            template.name(),
            to,
            subject
        );
        Ok(MailReceipt { id })
    }
}

#[derive(Serialize)]
struct SendMailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
}

/// Sender for a Resend-compatible HTTP mail API
pub struct HttpMailSender {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailSender {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl MailSender for HttpMailSender {
    async fn send(&self, to: &str, subject: &str, template: MailTemplate) -> Result<MailReceipt> {
        let body = SendMailRequest {
            from: &self.config.from_address,
            to: [to],
            subject,
            html: template.render_html(),
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Mail(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            error!("Mail provider rejected {} mail: HTTP {}", template.name(), status);
            return Err(RelayError::Mail(format!("Provider returned {}", status)));
        }

        response
            .json::<MailReceipt>()
            .await
            .map_err(|e| RelayError::Mail(format!("Unreadable provider response: {}", e)))
    }
}

/// Pick the sender matching the configuration
pub fn mail_sender_from_config(config: Option<&MailConfig>) -> Arc<dyn MailSender> {
    match config {
        Some(mail) => Arc::new(HttpMailSender::new(mail.clone())),
        None => Arc::new(LogMailSender),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sender_always_accepts() {
        let receipt = LogMailSender
            .send(
                "b@x.com",
                "subject",
                MailTemplate::FriendRequest {
                    sender_email: "a@x.com".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(!receipt.id.is_empty());
    }

    #[test]
    fn test_friend_request_template_names_sender() {
        let template = MailTemplate::FriendRequest {
            sender_email: "a@x.com".to_string(),
        };
        assert_eq!(template.name(), "friend_request");
        assert!(template.render_html().contains("a@x.com"));
    }
}
