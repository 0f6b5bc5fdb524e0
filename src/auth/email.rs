use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::AppError;

pub const RESET_SUBJECT: &str = "Password Reset Request";

/// Outbound mail boundary. Delivery failure must reach the route layer so
/// the caller is not told to check their inbox for a mail that never left.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: lettre::message::Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let creds = Credentials::new(cfg.username.clone(), cfg.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)?
            .port(cfg.port)
            .credentials(creds)
            .build();
        let from = cfg.from.parse()?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let to = to
            .parse()
            .map_err(|_| AppError::validation("email", "invalid recipient address"))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::Transport(format!("build message: {e}")))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Transport(format!("smtp send: {e}")))?;
        info!(subject, "mail sent");
        Ok(())
    }
}

/// Stand-in when SMTP is unconfigured; fails loudly instead of pretending
/// the mail went out.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), AppError> {
        Err(AppError::Transport("mail transport not configured".into()))
    }
}

pub fn reset_mail_body(app_url: &str, token: &str) -> String {
    format!(
        "To reset your password, visit the following link:\n\
         {app_url}/reset-password?token={token}\n\
         If you did not make this request then simply ignore this email \
         and no changes will be made.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_body_embeds_link_and_token() {
        let body = reset_mail_body("https://blog.example.com", "tok123");
        assert!(body.contains("https://blog.example.com/reset-password?token=tok123"));
        assert!(body.contains("ignore this email"));
    }

    #[tokio::test]
    async fn disabled_mailer_surfaces_transport_error() {
        let err = DisabledMailer
            .send("a@b.c", "subject", "body")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
    }
}
