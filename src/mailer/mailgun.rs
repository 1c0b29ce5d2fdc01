//! Mailgun delivery via its v3 messages API.

use super::{Mailer, OutboundMessage, ProviderKind, SendFailure, parse_settings};
use crate::entities::mailbox;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct MailgunSettings {
    api_key: Option<String>,
    domain: Option<String>,
    /// Set to `eu` for the EU region. Anything else uses the US endpoint.
    region: Option<String>,
    /// Base URL override for test stubs.
    base_url: Option<String>,
}

pub struct MailgunMailer {
    http: reqwest::Client,
    api_key: String,
    domain: String,
    base_url: String,
}

impl MailgunMailer {
    pub fn from_mailbox(
        mailbox: &mailbox::Model,
        http: reqwest::Client,
    ) -> Result<Self, SendFailure> {
        let settings: MailgunSettings = parse_settings(mailbox);

        let api_key = settings.api_key.ok_or_else(|| {
            SendFailure::configuration(format!(
                "Mailbox {} has no Mailgun API key configured",
                mailbox.email
            ))
        })?;
        let domain = settings.domain.ok_or_else(|| {
            SendFailure::configuration(format!(
                "Mailbox {} has no Mailgun domain configured",
                mailbox.email
            ))
        })?;

        let default_base = match settings.region.as_deref() {
            Some(region) if region.eq_ignore_ascii_case("eu") => "https://api.eu.mailgun.net",
            _ => "https://api.mailgun.net",
        };
        let base_url = settings
            .base_url
            .unwrap_or_else(|| default_base.to_string());

        Ok(Self {
            http,
            api_key,
            domain,
            base_url,
        })
    }

    fn form_fields(&self, message: &OutboundMessage) -> Vec<(String, String)> {
        let mut fields = vec![
            ("from".to_string(), message.from_header()),
            ("h:Reply-To".to_string(), message.from_email.clone()),
            ("to".to_string(), message.to.clone()),
            ("subject".to_string(), message.subject.clone()),
            ("text".to_string(), message.text.clone()),
        ];
        if !message.cc.is_empty() {
            fields.push(("cc".to_string(), message.cc.join(", ")));
        }
        if !message.bcc.is_empty() {
            fields.push(("bcc".to_string(), message.bcc.join(", ")));
        }
        if let Some(html) = &message.html {
            fields.push(("html".to_string(), html.clone()));
        }
        fields
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendFailure> {
        let url = format!(
            "{}/v3/{}/messages",
            self.base_url.trim_end_matches('/'),
            self.domain.trim_matches('/')
        );

        let response = self
            .http
            .post(url)
            .basic_auth("api", Some(&self.api_key))
            .form(&self.form_fields(message))
            .send()
            .await
            .map_err(|e| SendFailure::transient(format!("Mailgun request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SendFailure::transient(format!(
            "Mailgun rejected the message (status {}): {}",
            status.as_u16(),
            body
        )))
    }

    fn provider_name(&self) -> &'static str {
        ProviderKind::Mailgun.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn mailgun_mailbox(settings: &str) -> mailbox::Model {
        mailbox::Model {
            id: 1,
            name: Some("News".to_string()),
            email: "news@mg.example.com".to_string(),
            provider: "mailgun".to_string(),
            auth_type: "api_key".to_string(),
            settings: Some(settings.to_string()),
            is_verified: true,
            owner_id: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_eu_region_selects_eu_endpoint() {
        let mb = mailgun_mailbox(
            r#"{"api_key":"key-123","domain":"mg.example.com","region":"EU"}"#,
        );
        let mailer = MailgunMailer::from_mailbox(&mb, reqwest::Client::new()).unwrap();
        assert_eq!(mailer.base_url, "https://api.eu.mailgun.net");
    }

    #[test]
    fn test_missing_domain_is_configuration_failure() {
        let mb = mailgun_mailbox(r#"{"api_key":"key-123"}"#);
        let err = MailgunMailer::from_mailbox(&mb, reqwest::Client::new()).err().unwrap();
        assert!(err.diagnostic.contains("Mailgun domain"));
    }

    #[test]
    fn test_form_fields_include_reply_to_and_html() {
        let mb = mailgun_mailbox(r#"{"api_key":"key-123","domain":"mg.example.com"}"#);
        let mailer = MailgunMailer::from_mailbox(&mb, reqwest::Client::new()).unwrap();
        let msg = OutboundMessage {
            from_name: Some("News".to_string()),
            from_email: "news@mg.example.com".to_string(),
            to: "dest@example.com".to_string(),
            subject: "Digest".to_string(),
            text: "plain".to_string(),
            html: Some("<p>rich</p>".to_string()),
            cc: vec![],
            bcc: vec!["archive@example.com".to_string()],
            attachments: vec![],
        };
        let fields = mailer.form_fields(&msg);
        assert!(fields.contains(&("from".to_string(), "News <news@mg.example.com>".to_string())));
        assert!(fields.contains(&("h:Reply-To".to_string(), "news@mg.example.com".to_string())));
        assert!(fields.contains(&("html".to_string(), "<p>rich</p>".to_string())));
        assert!(fields.contains(&("bcc".to_string(), "archive@example.com".to_string())));
        assert!(!fields.iter().any(|(k, _)| k == "cc"));
    }
}
