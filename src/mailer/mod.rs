//! Provider adapters for outbound email.
//!
//! Every backend implements the [`Mailer`] trait: one normalized message in,
//! success or a categorized [`SendFailure`] out. Adapter calls never panic
//! past this boundary; the dispatch pipeline owns all logging and retry.

mod mailgun;
mod sendgrid;
mod ses;
mod smtp;

pub use mailgun::MailgunMailer;
pub use sendgrid::SendgridMailer;
pub use ses::SesMailer;
pub use smtp::SmtpMailer;

use crate::entities::mailbox;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Provider tag carried on a mailbox.
///
/// New providers are added as new variants implementing [`Mailer`], not as
/// another branch in a string-comparison chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gmail,
    Outlook,
    Yahoo,
    Smtp,
    Ses,
    Mailgun,
    Sendgrid,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Yahoo => "yahoo",
            Self::Smtp => "smtp",
            Self::Ses => "ses",
            Self::Mailgun => "mailgun",
            Self::Sendgrid => "sendgrid",
        }
    }

    /// Well-known SMTP endpoint for the hosted SMTP-family providers.
    pub fn default_smtp_endpoint(&self) -> Option<(&'static str, u16)> {
        match self {
            Self::Gmail => Some(("smtp.gmail.com", 587)),
            Self::Outlook => Some(("smtp-mail.outlook.com", 587)),
            Self::Yahoo => Some(("smtp.mail.yahoo.com", 587)),
            _ => None,
        }
    }

    pub fn is_smtp_family(&self) -> bool {
        matches!(self, Self::Gmail | Self::Outlook | Self::Yahoo | Self::Smtp)
    }
}

impl FromStr for ProviderKind {
    type Err = SendFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "outlook" => Ok(Self::Outlook),
            "yahoo" => Ok(Self::Yahoo),
            "smtp" => Ok(Self::Smtp),
            "ses" => Ok(Self::Ses),
            "mailgun" => Ok(Self::Mailgun),
            "sendgrid" => Ok(Self::Sendgrid),
            other => Err(SendFailure::unsupported(format!(
                "Provider '{}' is not supported",
                other
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failed send should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Mailbox is missing required provider settings. Fatal per attempt.
    Configuration,
    /// Unknown provider tag. Fatal per attempt.
    Unsupported,
    /// Network fault, provider rejection, or timeout. Retried up to the bound.
    Transient,
}

/// A categorized send failure with a diagnostic suitable for the delivery
/// log's error field.
#[derive(Debug, Clone)]
pub struct SendFailure {
    pub kind: FailureKind,
    pub diagnostic: String,
}

impl SendFailure {
    pub fn configuration(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Configuration,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn unsupported(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unsupported,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn transient(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.diagnostic)
    }
}

impl std::error::Error for SendFailure {}

/// A normalized outbound message handed to an adapter.
///
/// The From header combines the mailbox display name and address; Reply-To
/// is always the mailbox address.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from_name: Option<String>,
    pub from_email: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<PathBuf>,
}

impl OutboundMessage {
    /// RFC 5322 From value: `Display Name <address>` or the bare address.
    pub fn from_header(&self) -> String {
        match &self.from_name {
            Some(name) if !name.trim().is_empty() => format!("{} <{}>", name, self.from_email),
            _ => self.from_email.clone(),
        }
    }
}

/// Uniform send contract over heterogeneous email backends.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message. Resolves to `Ok(())` or a categorized failure;
    /// never panics across this boundary.
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendFailure>;

    /// Provider name for logging.
    fn provider_name(&self) -> &'static str;
}

/// Parse a mailbox's opaque settings blob into the typed settings an
/// adapter needs. Missing or malformed JSON yields an empty value so each
/// adapter reports the precise missing field instead of a parse error.
pub(crate) fn parse_settings<T: for<'de> Deserialize<'de> + Default>(
    mailbox: &mailbox::Model,
) -> T {
    mailbox
        .settings
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

/// Resolve the adapter for a mailbox's provider tag.
///
/// Fails fast with `Unsupported` for unknown tags and `Configuration` when
/// the mailbox is missing settings the provider requires.
pub fn build_mailer(
    mailbox: &mailbox::Model,
    http: &reqwest::Client,
) -> Result<Box<dyn Mailer>, SendFailure> {
    let kind: ProviderKind = mailbox.provider.parse()?;

    match kind {
        ProviderKind::Gmail | ProviderKind::Outlook | ProviderKind::Yahoo | ProviderKind::Smtp => {
            Ok(Box::new(SmtpMailer::from_mailbox(kind, mailbox)?))
        }
        ProviderKind::Ses => Ok(Box::new(SesMailer::from_mailbox(mailbox, http.clone())?)),
        ProviderKind::Mailgun => Ok(Box::new(MailgunMailer::from_mailbox(mailbox, http.clone())?)),
        ProviderKind::Sendgrid => Ok(Box::new(SendgridMailer::from_mailbox(
            mailbox,
            http.clone(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn mailbox_with(provider: &str, settings: Option<&str>) -> mailbox::Model {
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

    #[test]
    fn test_provider_kind_parses_case_insensitive() {
        assert_eq!("Gmail".parse::<ProviderKind>().unwrap(), ProviderKind::Gmail);
        assert_eq!("SES".parse::<ProviderKind>().unwrap(), ProviderKind::Ses);
        assert_eq!(
            " sendgrid ".parse::<ProviderKind>().unwrap(),
            ProviderKind::Sendgrid
        );
    }

    #[test]
    fn test_unknown_provider_is_unsupported() {
        let err = "postfix".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err.kind, FailureKind::Unsupported);
        assert!(!err.diagnostic.is_empty());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_default_endpoints() {
        assert_eq!(
            ProviderKind::Gmail.default_smtp_endpoint(),
            Some(("smtp.gmail.com", 587))
        );
        assert_eq!(ProviderKind::Ses.default_smtp_endpoint(), None);
    }

    #[test]
    fn test_build_mailer_rejects_unknown_tag() {
        let mb = mailbox_with("carrier-pigeon", None);
        let err = build_mailer(&mb, &reqwest::Client::new()).err().unwrap();
        assert_eq!(err.kind, FailureKind::Unsupported);
    }

    #[test]
    fn test_build_mailer_incomplete_settings_is_configuration_failure() {
        // Gmail needs credentials; SES needs keys; Mailgun needs key+domain.
        for (provider, settings) in [
            ("gmail", None),
            ("ses", Some(r#"{"region":"us-east-1"}"#)),
            ("mailgun", Some(r#"{"api_key":"key-123"}"#)),
            ("sendgrid", Some("{}")),
        ] {
            let mb = mailbox_with(provider, settings);
            let err = build_mailer(&mb, &reqwest::Client::new()).err().unwrap();
            assert_eq!(err.kind, FailureKind::Configuration, "provider {provider}");
            assert!(!err.diagnostic.is_empty());
        }
    }

    #[test]
    fn test_from_header_formats() {
        let msg = OutboundMessage {
            from_name: Some("Marketing".to_string()),
            from_email: "m@example.com".to_string(),
            to: "t@example.com".to_string(),
            subject: "hi".to_string(),
            text: "hi".to_string(),
            html: None,
            cc: vec![],
            bcc: vec![],
            attachments: vec![],
        };
        assert_eq!(msg.from_header(), "Marketing <m@example.com>");

        let bare = OutboundMessage {
            from_name: None,
            ..msg
        };
        assert_eq!(bare.from_header(), "m@example.com");
    }
}
