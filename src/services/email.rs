//! Email service for account emails and overdue reminders

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use std::str::FromStr;

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
};

/// Outbound message channel (overdue reminders, account emails)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send an HTML message; `Err` means the message was not delivered
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()>;
}

#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Generic email sending function
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        let from_name = self.config.smtp_from_name.as_deref().unwrap_or("Bookshelf");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Internal(format!("Invalid to address: {}", e)))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(strip_tags(html)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(format!("<html><body>{}</body></html>", html)),
                    ),
            )
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        let mailer_builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Internal(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer_builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer_builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer_builder
        };

        let mailer = mailer_builder.build();

        // SMTP transport is blocking
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::Internal(format!("Email task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Failed to send email: {}", e)))?;

        tracing::debug!(%to, %subject, "Email sent");

        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailService {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        self.send_email(to, subject, html).await
    }
}

/// Subject and body of the email address verification message
pub fn verification_message(frontend_url: &str, token: &str) -> (String, String) {
    let link = format!(
        "{}/verification-success?token={}",
        frontend_url.trim_end_matches('/'),
        token
    );
    let body = format!(
        r#"<h1>Verify Email Address</h1>
<p>You're receiving this email because you recently created a new account.
Please verify your email address by following the link below.</p>
<p><a href="{link}">Verify email</a></p>"#,
        link = link
    );
    ("Verify Your Email".to_string(), body)
}

/// Subject and body of the password reset message
pub fn password_reset_message(frontend_url: &str, token: &str, valid_minutes: i64) -> (String, String) {
    let link = format!(
        "{}/reset-password?token={}",
        frontend_url.trim_end_matches('/'),
        token
    );
    let body = format!(
        r#"<h1>Reset Your Password</h1>
<p>Follow the link below to reset your password. It expires in {minutes} minutes.</p>
<p><a href="{link}">Reset password</a></p>"#,
        link = link,
        minutes = valid_minutes
    );
    ("Reset Your Password".to_string(), body)
}

/// Escape text placed inside an HTML body
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Plain-text alternative of a small HTML body
fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
