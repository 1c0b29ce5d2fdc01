//! SMTP delivery via lettre, covering the hosted SMTP-family providers
//! (gmail, outlook, yahoo) and arbitrary relays.

use super::{Mailer, OutboundMessage, ProviderKind, SendFailure, parse_settings};
use crate::entities::mailbox;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{
        Attachment, Body, Mailbox as EmailMailbox, Message, MultiPart, SinglePart,
        header::ContentType,
    },
    transport::smtp::authentication::Credentials,
};
use serde::Deserialize;
use std::path::Path;

/// Optional per-mailbox overrides stored in the settings blob. Hosted
/// providers fall back to their well-known endpoint; plain `smtp` requires
/// an explicit host.
#[derive(Debug, Default, Deserialize)]
struct SmtpSettings {
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    use_tls: Option<bool>,
    username: Option<String>,
    password: Option<String>,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    provider: ProviderKind,
}

impl SmtpMailer {
    pub fn from_mailbox(
        provider: ProviderKind,
        mailbox: &mailbox::Model,
    ) -> Result<Self, SendFailure> {
        let settings: SmtpSettings = parse_settings(mailbox);

        let default = provider.default_smtp_endpoint();
        let host = settings
            .smtp_host
            .or_else(|| default.map(|(h, _)| h.to_string()))
            .ok_or_else(|| {
                SendFailure::configuration(format!(
                    "Mailbox {} has no SMTP host configured",
                    mailbox.email
                ))
            })?;
        let port = settings
            .smtp_port
            .or_else(|| default.map(|(_, p)| p))
            .unwrap_or(587);

        // The SMTP login defaults to the mailbox address itself, which is
        // what the hosted providers expect.
        let username = settings
            .username
            .unwrap_or_else(|| mailbox.email.clone());
        let password = settings.password.ok_or_else(|| {
            SendFailure::configuration(format!(
                "Mailbox {} has no SMTP password configured",
                mailbox.email
            ))
        })?;

        let use_tls = settings.use_tls.unwrap_or(true);
        let builder = if !use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
        } else if port == 465 {
            // Implicit TLS from the first byte.
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                .map_err(|e| SendFailure::transient(format!("SMTP relay setup failed: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                .map_err(|e| SendFailure::transient(format!("SMTP relay setup failed: {}", e)))?
        };

        let transport = builder
            .port(port)
            .credentials(Credentials::new(username, password))
            .build();

        Ok(Self {
            transport,
            provider,
        })
    }

    async fn build_message(&self, message: &OutboundMessage) -> Result<Message, SendFailure> {
        let from: EmailMailbox = message
            .from_header()
            .parse()
            .map_err(|e| SendFailure::transient(format!("Invalid From address: {}", e)))?;
        let reply_to: EmailMailbox = message
            .from_email
            .parse()
            .map_err(|e| SendFailure::transient(format!("Invalid Reply-To address: {}", e)))?;
        let to: EmailMailbox = message
            .to
            .parse()
            .map_err(|e| SendFailure::transient(format!("Invalid recipient address: {}", e)))?;

        let mut builder = Message::builder()
            .from(from)
            .reply_to(reply_to)
            .to(to)
            .subject(&message.subject);

        for addr in &message.cc {
            let cc: EmailMailbox = addr
                .parse()
                .map_err(|e| SendFailure::transient(format!("Invalid Cc address: {}", e)))?;
            builder = builder.cc(cc);
        }
        for addr in &message.bcc {
            let bcc: EmailMailbox = addr
                .parse()
                .map_err(|e| SendFailure::transient(format!("Invalid Bcc address: {}", e)))?;
            builder = builder.bcc(bcc);
        }

        let body_part = match &message.html {
            Some(html) => MultiPart::alternative_plain_html(message.text.clone(), html.clone()),
            None => MultiPart::mixed().singlepart(SinglePart::plain(message.text.clone())),
        };

        let attachments = load_attachments(&message.attachments).await;
        let email = if attachments.is_empty() {
            builder.multipart(body_part)
        } else {
            let mut mixed = MultiPart::mixed().multipart(body_part);
            for part in attachments {
                mixed = mixed.singlepart(part);
            }
            builder.multipart(mixed)
        };

        email.map_err(|e| SendFailure::transient(format!("Failed to build message: {}", e)))
    }
}

/// Read attachment files into MIME parts. Unreadable paths are skipped
/// rather than failing the whole send.
async fn load_attachments(paths: &[std::path::PathBuf]) -> Vec<SinglePart> {
    let mut parts = Vec::new();
    for path in paths {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable attachment");
                continue;
            }
        };
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let content_type = guess_content_type(path);
        parts.push(Attachment::new(filename).body(Body::new(bytes), content_type));
    }
    parts
}

fn guess_content_type(path: &Path) -> ContentType {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let mime = match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("txt") => "text/plain",
        Some("html") => "text/html",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    };
    // All strings above are valid MIME types, so parsing cannot fail.
    ContentType::parse(mime).unwrap_or(ContentType::TEXT_PLAIN)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendFailure> {
        let email = self.build_message(message).await?;

        match self.transport.send(email).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let detail = e.to_string();
                let lower = detail.to_ascii_lowercase();
                let diagnostic = if lower.contains("535") || lower.contains("auth") {
                    format!("SMTP authentication failed: {}", detail)
                } else if lower.contains("550") || lower.contains("recipient") {
                    format!("Recipient rejected: {}", detail)
                } else {
                    format!("SMTP error: {}", detail)
                };
                Err(SendFailure::transient(diagnostic))
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        self.provider.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn smtp_mailbox(provider: &str, settings: Option<&str>) -> mailbox::Model {
        mailbox::Model {
            id: 1,
            name: Some("Ops".to_string()),
            email: "ops@example.com".to_string(),
            provider: provider.to_string(),
            auth_type: "smtp".to_string(),
            settings: settings.map(|s| s.to_string()),
            is_verified: true,
            owner_id: 1,
            created_at: Utc::now(),
        }
    }

    // The pooled transport spawns on build, so constructing a mailer needs
    // a runtime even before anything is sent.
    #[tokio::test]
    async fn test_gmail_defaults_apply_when_password_present() {
        let mb = smtp_mailbox("gmail", Some(r#"{"password":"app-password"}"#));
        let mailer = SmtpMailer::from_mailbox(ProviderKind::Gmail, &mb).unwrap();
        assert_eq!(mailer.provider_name(), "gmail");
    }

    #[test]
    fn test_plain_smtp_requires_explicit_host() {
        let mb = smtp_mailbox("smtp", Some(r#"{"password":"secret"}"#));
        let err = SmtpMailer::from_mailbox(ProviderKind::Smtp, &mb).err().unwrap();
        assert!(err.diagnostic.contains("no SMTP host"));
    }

    #[test]
    fn test_missing_password_is_configuration_failure() {
        let mb = smtp_mailbox("gmail", None);
        let err = SmtpMailer::from_mailbox(ProviderKind::Gmail, &mb).err().unwrap();
        assert!(err.diagnostic.contains("no SMTP password"));
    }

    #[tokio::test]
    async fn test_message_carries_reply_to_and_recipients() {
        let mb = smtp_mailbox("gmail", Some(r#"{"password":"app-password"}"#));
        let mailer = SmtpMailer::from_mailbox(ProviderKind::Gmail, &mb).unwrap();
        let msg = OutboundMessage {
            from_name: Some("Ops".to_string()),
            from_email: "ops@example.com".to_string(),
            to: "dest@example.com".to_string(),
            subject: "Status".to_string(),
            text: "All good".to_string(),
            html: Some("<p>All good</p>".to_string()),
            cc: vec!["watcher@example.com".to_string()],
            bcc: vec![],
            attachments: vec![],
        };
        let email = mailer.build_message(&msg).await.unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Reply-To: ops@example.com"));
        assert!(raw.contains("To: dest@example.com"));
        assert!(raw.contains("Cc: watcher@example.com"));
        assert!(raw.contains("Subject: Status"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected_before_transport() {
        let mb = smtp_mailbox("gmail", Some(r#"{"password":"app-password"}"#));
        let mailer = SmtpMailer::from_mailbox(ProviderKind::Gmail, &mb).unwrap();
        let msg = OutboundMessage {
            from_name: None,
            from_email: "ops@example.com".to_string(),
            to: "not-an-address".to_string(),
            subject: "Status".to_string(),
            text: "All good".to_string(),
            html: None,
            cc: vec![],
            bcc: vec![],
            attachments: vec![],
        };
        let err = mailer.build_message(&msg).await.unwrap_err();
        assert!(err.diagnostic.contains("Invalid recipient"));
    }
}
