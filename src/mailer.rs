use std::sync::Mutex;

use crate::models::models::User;

/// Outbound email. Delivery is the implementor's business.
pub trait Mailer: Send + Sync {
    fn send_password_reset(&self, user: &User, reset_url: &str) -> anyhow::Result<()>;
}

/// Writes the reset link to the log instead of sending mail.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_password_reset(&self, user: &User, reset_url: &str) -> anyhow::Result<()> {
        tracing::info!(
            to = %user.email,
            username = %user.username,
            reset_url,
            "password reset requested"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub to: String,
    pub username: String,
    pub reset_url: String,
}

/// Keeps every message in memory; handy for tests and local runs.
#[derive(Default)]
pub struct OutboxMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<SentMail> {
        self.sent().pop()
    }
}

impl Mailer for OutboxMailer {
    fn send_password_reset(&self, user: &User, reset_url: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("outbox lock poisoned"))?
            .push(SentMail {
                to: user.email.clone(),
                username: user.username.clone(),
                reset_url: reset_url.to_string(),
            });
        Ok(())
    }
}
