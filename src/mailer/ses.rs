//! Amazon SES delivery over the classic SendEmail query API, signed with
//! SigV4 directly so the adapter stays a thin HTTP client.

use super::{Mailer, OutboundMessage, ProviderKind, SendFailure, parse_settings};
use crate::entities::mailbox;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Default, Deserialize)]
struct SesSettings {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    region: Option<String>,
    /// Endpoint override for test stubs; normally derived from the region.
    endpoint: Option<String>,
}

pub struct SesMailer {
    http: reqwest::Client,
    access_key_id: String,
    secret_access_key: String,
    region: String,
    endpoint: String,
}

impl SesMailer {
    pub fn from_mailbox(
        mailbox: &mailbox::Model,
        http: reqwest::Client,
    ) -> Result<Self, SendFailure> {
        let settings: SesSettings = parse_settings(mailbox);

        let access_key_id = settings.access_key_id.ok_or_else(|| {
            SendFailure::configuration(format!(
                "Mailbox {} has no SES access key id configured",
                mailbox.email
            ))
        })?;
        let secret_access_key = settings.secret_access_key.ok_or_else(|| {
            SendFailure::configuration(format!(
                "Mailbox {} has no SES secret access key configured",
                mailbox.email
            ))
        })?;
        let region = settings.region.unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = settings
            .endpoint
            .unwrap_or_else(|| format!("https://email.{}.amazonaws.com", region));

        Ok(Self {
            http,
            access_key_id,
            secret_access_key,
            region,
            endpoint,
        })
    }

    fn form_payload(message: &OutboundMessage) -> Vec<u8> {
        let mut fields: Vec<(String, String)> = vec![
            ("Action".to_string(), "SendEmail".to_string()),
            ("Version".to_string(), "2010-12-01".to_string()),
            ("Source".to_string(), message.from_header()),
            ("ReplyToAddresses.member.1".to_string(), message.from_email.clone()),
            ("Destination.ToAddresses.member.1".to_string(), message.to.clone()),
            ("Message.Subject.Data".to_string(), message.subject.clone()),
            ("Message.Body.Text.Data".to_string(), message.text.clone()),
        ];
        for (idx, addr) in message.cc.iter().enumerate() {
            fields.push((
                format!("Destination.CcAddresses.member.{}", idx + 1),
                addr.clone(),
            ));
        }
        for (idx, addr) in message.bcc.iter().enumerate() {
            fields.push((
                format!("Destination.BccAddresses.member.{}", idx + 1),
                addr.clone(),
            ));
        }
        if let Some(html) = &message.html {
            fields.push(("Message.Body.Html.Data".to_string(), html.clone()));
        }

        fields
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(&k), urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&")
            .into_bytes()
    }
}

struct AwsSignature {
    authorization: String,
    amz_date: String,
    payload_hash: String,
}

fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SendFailure> {
    let key_error = || SendFailure::configuration("Invalid SES secret access key");

    let mut mac =
        HmacSha256::new_from_slice(format!("AWS4{}", secret_key).as_bytes()).map_err(|_| key_error())?;
    mac.update(date_stamp.as_bytes());
    let k_date = mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(k_date.as_slice()).map_err(|_| key_error())?;
    mac.update(region.as_bytes());
    let k_region = mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(k_region.as_slice()).map_err(|_| key_error())?;
    mac.update(service.as_bytes());
    let k_service = mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(k_service.as_slice()).map_err(|_| key_error())?;
    mac.update(b"aws4_request");
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sign_request(
    access_key: &str,
    secret_key: &str,
    region: &str,
    host: &str,
    payload: &[u8],
) -> Result<AwsSignature, SendFailure> {
    let service = "ses";
    let now = Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let payload_hash = hex::encode(Sha256::digest(payload));

    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        host.to_lowercase(),
        payload_hash,
        amz_date
    );
    let signed_headers = "host;x-amz-content-sha256;x-amz-date";

    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers, signed_headers, payload_hash
    );
    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date, credential_scope, canonical_hash
    );

    let signing_key = derive_signing_key(secret_key, &date_stamp, region, service)?;
    let mut mac = HmacSha256::new_from_slice(&signing_key)
        .map_err(|_| SendFailure::configuration("Invalid SES signing key"))?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        access_key, credential_scope, signed_headers, signature
    );

    Ok(AwsSignature {
        authorization,
        amz_date,
        payload_hash,
    })
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendFailure> {
        let payload = Self::form_payload(message);

        let host = self
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        let signature = sign_request(
            &self.access_key_id,
            &self.secret_access_key,
            &self.region,
            &host,
            &payload,
        )?;

        let url = format!("{}/", self.endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header(
                "content-type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .header("x-amz-date", signature.amz_date)
            .header("x-amz-content-sha256", signature.payload_hash)
            .header("authorization", signature.authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| SendFailure::transient(format!("SES request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SendFailure::transient(format!(
            "SES rejected the message (status {}): {}",
            status.as_u16(),
            body
        )))
    }

    fn provider_name(&self) -> &'static str {
        ProviderKind::Ses.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ses_mailbox(settings: &str) -> mailbox::Model {
        mailbox::Model {
            id: 1,
            name: None,
            email: "noreply@example.com".to_string(),
            provider: "ses".to_string(),
            auth_type: "api_key".to_string(),
            settings: Some(settings.to_string()),
            is_verified: true,
            owner_id: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_endpoint_derived_from_region() {
        let mb = ses_mailbox(
            r#"{"access_key_id":"AKIA","secret_access_key":"s","region":"eu-west-1"}"#,
        );
        let mailer = SesMailer::from_mailbox(&mb, reqwest::Client::new()).unwrap();
        assert_eq!(mailer.endpoint, "https://email.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_missing_keys_are_configuration_failures() {
        let mb = ses_mailbox(r#"{"region":"us-east-1"}"#);
        let err = SesMailer::from_mailbox(&mb, reqwest::Client::new()).err().unwrap();
        assert!(err.diagnostic.contains("access key id"));
    }

    #[test]
    fn test_form_payload_encodes_all_parts() {
        let msg = OutboundMessage {
            from_name: Some("News".to_string()),
            from_email: "noreply@example.com".to_string(),
            to: "dest@example.com".to_string(),
            subject: "Weekly digest".to_string(),
            text: "plain".to_string(),
            html: Some("<b>rich</b>".to_string()),
            cc: vec!["cc@example.com".to_string()],
            bcc: vec![],
            attachments: vec![],
        };
        let payload = String::from_utf8(SesMailer::form_payload(&msg)).unwrap();
        assert!(payload.contains("Action=SendEmail"));
        assert!(payload.contains("Version=2010-12-01"));
        assert!(payload.contains("Destination.ToAddresses.member.1=dest%40example.com"));
        assert!(payload.contains("Destination.CcAddresses.member.1=cc%40example.com"));
        assert!(payload.contains("Message.Body.Html.Data=%3Cb%3Erich%3C%2Fb%3E"));
        assert!(payload.contains("ReplyToAddresses.member.1=noreply%40example.com"));
    }

    #[test]
    fn test_signature_shape() {
        let sig = sign_request(
            "AKIAEXAMPLE",
            "secret",
            "us-east-1",
            "email.us-east-1.amazonaws.com",
            b"Action=SendEmail",
        )
        .unwrap();
        assert!(sig.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIAEXAMPLE/"));
        assert!(sig.authorization.contains("/us-east-1/ses/aws4_request"));
        assert!(sig.authorization.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert_eq!(sig.payload_hash.len(), 64);
        assert_eq!(sig.amz_date.len(), 16);
    }
}
