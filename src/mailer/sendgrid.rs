//! SendGrid delivery via the v3 mail/send JSON API.

use super::{Mailer, OutboundMessage, ProviderKind, SendFailure, parse_settings};
use crate::entities::mailbox;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Default, Deserialize)]
struct SendgridSettings {
    api_key: Option<String>,
    /// Base URL override for test stubs.
    base_url: Option<String>,
}

pub struct SendgridMailer {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl SendgridMailer {
    pub fn from_mailbox(
        mailbox: &mailbox::Model,
        http: reqwest::Client,
    ) -> Result<Self, SendFailure> {
        let settings: SendgridSettings = parse_settings(mailbox);

        let api_key = settings.api_key.ok_or_else(|| {
            SendFailure::configuration(format!(
                "Mailbox {} has no SendGrid API key configured",
                mailbox.email
            ))
        })?;
        let base_url = settings
            .base_url
            .unwrap_or_else(|| "https://api.sendgrid.com/v3".to_string());

        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }

    fn request_body(message: &OutboundMessage) -> Value {
        let mut personalization = serde_json::Map::new();
        personalization.insert("to".to_string(), json!([{ "email": message.to }]));
        if !message.cc.is_empty() {
            personalization.insert(
                "cc".to_string(),
                Value::Array(
                    message
                        .cc
                        .iter()
                        .map(|addr| json!({ "email": addr }))
                        .collect(),
                ),
            );
        }
        if !message.bcc.is_empty() {
            personalization.insert(
                "bcc".to_string(),
                Value::Array(
                    message
                        .bcc
                        .iter()
                        .map(|addr| json!({ "email": addr }))
                        .collect(),
                ),
            );
        }

        let mut content = vec![json!({ "type": "text/plain", "value": message.text })];
        if let Some(html) = &message.html {
            content.push(json!({ "type": "text/html", "value": html }));
        }

        let mut from = serde_json::Map::new();
        from.insert("email".to_string(), Value::String(message.from_email.clone()));
        if let Some(name) = &message.from_name {
            from.insert("name".to_string(), Value::String(name.clone()));
        }

        json!({
            "personalizations": [Value::Object(personalization)],
            "from": Value::Object(from),
            "reply_to": { "email": message.from_email },
            "subject": message.subject,
            "content": content,
        })
    }
}

#[async_trait]
impl Mailer for SendgridMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendFailure> {
        let url = format!("{}/mail/send", self.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(message))
            .send()
            .await
            .map_err(|e| SendFailure::transient(format!("SendGrid request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SendFailure::transient(format!(
            "SendGrid rejected the message (status {}): {}",
            status.as_u16(),
            body
        )))
    }

    fn provider_name(&self) -> &'static str {
        ProviderKind::Sendgrid.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sendgrid_mailbox(settings: &str) -> mailbox::Model {
        mailbox::Model {
            id: 1,
            name: Some("Alerts".to_string()),
            email: "alerts@example.com".to_string(),
            provider: "sendgrid".to_string(),
            auth_type: "api_key".to_string(),
            settings: Some(settings.to_string()),
            is_verified: true,
            owner_id: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_api_key_is_configuration_failure() {
        let mb = sendgrid_mailbox("{}");
        let err = SendgridMailer::from_mailbox(&mb, reqwest::Client::new()).err().unwrap();
        assert!(err.diagnostic.contains("SendGrid API key"));
    }

    #[test]
    fn test_request_body_shape() {
        let msg = OutboundMessage {
            from_name: Some("Alerts".to_string()),
            from_email: "alerts@example.com".to_string(),
            to: "dest@example.com".to_string(),
            subject: "Disk almost full".to_string(),
            text: "plain".to_string(),
            html: Some("<b>rich</b>".to_string()),
            cc: vec!["cc@example.com".to_string()],
            bcc: vec![],
            attachments: vec![],
        };
        let body = SendgridMailer::request_body(&msg);
        assert_eq!(
            body["personalizations"][0]["to"][0]["email"],
            "dest@example.com"
        );
        assert_eq!(
            body["personalizations"][0]["cc"][0]["email"],
            "cc@example.com"
        );
        assert!(body["personalizations"][0].get("bcc").is_none());
        assert_eq!(body["from"]["name"], "Alerts");
        assert_eq!(body["reply_to"]["email"], "alerts@example.com");
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["content"][1]["type"], "text/html");
    }
}
