//! Output notification by mail (SMTP via lettre).
//!
//! Sent after an item is recorded. Best effort: a failed send is logged by
//! the orchestrator and never undoes or fails the item.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::{ConfigError, NotifyError};

const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_BODY_LIMIT: usize = 20_000;
const DEFAULT_SUBJECT_PREFIX: &str = "[inbox-bot]";
const SUBJECT_TITLE_MAX: usize = 80;

/// A finished output worth telling someone about.
#[derive(Debug, Clone)]
pub struct OutputNotice {
    pub mode: String,
    /// Human title, usually the input file name.
    pub title: String,
    pub output_name: String,
    pub output_path: String,
    pub input_path: String,
    /// Full output document.
    pub document: String,
}

/// Delivery seam for output notices.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &OutputNotice) -> Result<(), NotifyError>;
}

/// SMTP settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub to: String,
    pub from: String,
    pub app_password: SecretString,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Body characters before truncation; the attachment is always complete.
    pub body_limit: usize,
    pub subject_prefix: String,
}

impl MailConfig {
    /// Load from environment variables. `None` unless `MAIL_ENABLE` is set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup (tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let enabled = get("MAIL_ENABLE").is_some_and(|v| is_truthy(&v));
        if !enabled {
            return Ok(None);
        }

        let required = |key: &str| {
            get(key).ok_or_else(|| ConfigError::MissingRequired {
                key: key.to_string(),
                hint: "required when MAIL_ENABLE is set".to_string(),
            })
        };
        let to = required("MAIL_TO")?;
        let from = required("MAIL_FROM")?;
        // App passwords are often pasted in space-separated groups.
        let app_password = SecretString::from(required("MAIL_APP_PASSWORD")?.replace(' ', ""));

        let smtp_port = match get("MAIL_SMTP_PORT") {
            Some(v) => v.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: "MAIL_SMTP_PORT".into(),
                message: format!("'{v}' is not a port number"),
            })?,
            None => DEFAULT_SMTP_PORT,
        };

        Ok(Some(Self {
            to,
            from,
            app_password,
            smtp_host: get("MAIL_SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port,
            body_limit: get("MAIL_BODY_LIMIT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BODY_LIMIT),
            subject_prefix: get("MAIL_SUBJECT_PREFIX")
                .unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.to_string()),
        }))
    }
}

/// `1`, `true`, `yes`, `on` (any case).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// SMTP notifier.
pub struct MailNotifier {
    config: MailConfig,
}

impl MailNotifier {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// `<prefix> <mode>: <title> (<output name>)`
    pub fn subject(&self, notice: &OutputNotice) -> String {
        let title = notice.title.trim();
        let title = if title.chars().count() > SUBJECT_TITLE_MAX {
            let head: String = title.chars().take(SUBJECT_TITLE_MAX).collect();
            format!("{head}...")
        } else {
            title.to_string()
        };
        format!(
            "{} {}: {title} ({})",
            self.config.subject_prefix, notice.mode, notice.output_name
        )
    }

    /// Plain-text body with the document truncated to the body limit.
    pub fn body(&self, notice: &OutputNotice) -> String {
        let limit = self.config.body_limit;
        let mut text: String = notice.document.chars().take(limit).collect();
        if notice.document.chars().count() > limit {
            text.push_str(&format!("\n\n... (truncated to {limit} chars) ...\n"));
        }
        format!(
            "Output saved: {}\nInput: {}\n\n---- BEGIN OUTPUT ----\n\n{text}\n\n---- END OUTPUT ----\n",
            notice.output_path, notice.input_path
        )
    }

    /// Build the message: text body plus the full document as attachment.
    pub fn build_message(&self, notice: &OutputNotice) -> Result<Message, NotifyError> {
        let from = self
            .config
            .from
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidAddress {
                address: self.config.from.clone(),
                reason: format!("{e}"),
            })?;
        let to = self
            .config
            .to
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidAddress {
                address: self.config.to.clone(),
                reason: format!("{e}"),
            })?;
        let markdown = ContentType::parse("text/markdown; charset=utf-8")
            .map_err(|e| NotifyError::Build(format!("content type: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject(notice))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.body(notice)))
                    .singlepart(
                        Attachment::new(notice.output_name.clone())
                            .body(notice.document.clone(), markdown),
                    ),
            )
            .map_err(|e| NotifyError::Build(e.to_string()))
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        let creds = Credentials::new(
            self.config.from.clone(),
            self.config.app_password.expose_secret().to_string(),
        );
        // 465 is implicit TLS; everything else negotiates STARTTLS.
        let builder = if self.config.smtp_port == 465 {
            SmtpTransport::relay(&self.config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
        }
        .map_err(|e| NotifyError::Send(format!("SMTP relay error: {e}")))?;

        Ok(builder
            .port(self.config.smtp_port)
            .credentials(creds)
            .build())
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn notify(&self, notice: &OutputNotice) -> Result<(), NotifyError> {
        let message = self.build_message(notice)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotifyError::Send(format!("mail task failed: {e}")))?
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        info!(to = %self.config.to, output = %notice.output_name, "Notification mail sent");
        Ok(())
    }
}
