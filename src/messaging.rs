use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::MessagingConfig;

const MESSAGING_PRODUCT: &str = "whatsapp";

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("messaging request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Provider answer for one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    pub body: String,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Sends the configured template to one already-normalized number.
    async fn send_template(&self, to: &str) -> Result<Delivery, MessagingError>;
}

/// Phone-number normalization applied before every send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhonePolicy {
    country_code: String,
}

impl PhonePolicy {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    /// Strips whitespace, dashes and parentheses, then prefixes the default
    /// country code unless the number already carries `+` or that code.
    /// A leading `+<code>` collapses to `<code>`.
    pub fn normalize(&self, raw: &str) -> String {
        let cleaned: String = raw
            .chars()
            .filter(|ch| !ch.is_whitespace() && !matches!(ch, '-' | '(' | ')'))
            .collect();
        let code = self.country_code.as_str();

        if !cleaned.starts_with('+') && !cleaned.starts_with(code) {
            return format!("{code}{cleaned}");
        }

        if let Some(rest) = cleaned
            .strip_prefix('+')
            .and_then(|without_plus| without_plus.strip_prefix(code))
        {
            return format!("{code}{rest}");
        }

        cleaned
    }
}

impl From<&MessagingConfig> for PhonePolicy {
    fn from(config: &MessagingConfig) -> Self {
        PhonePolicy::new(config.default_country_code.clone())
    }
}

#[derive(Serialize)]
struct TemplateMessage<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    template: TemplateRef<'a>,
}

#[derive(Serialize)]
struct TemplateRef<'a> {
    name: &'a str,
    language: TemplateLanguage<'a>,
}

#[derive(Serialize)]
struct TemplateLanguage<'a> {
    code: &'a str,
}

/// Template-message client for the provider's HTTP API.
pub struct TemplateMessenger {
    client: Client,
    endpoint_url: String,
    auth_token: String,
    template_name: String,
    template_locale: String,
}

impl TemplateMessenger {
    pub fn from_config(config: &MessagingConfig) -> Result<Self, MessagingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            auth_token: config.auth_token.clone(),
            template_name: config.template_name.clone(),
            template_locale: config.template_locale.clone(),
        })
    }
}

#[async_trait]
impl MessageSender for TemplateMessenger {
    async fn send_template(&self, to: &str) -> Result<Delivery, MessagingError> {
        let payload = TemplateMessage {
            messaging_product: MESSAGING_PRODUCT,
            to,
            kind: "template",
            template: TemplateRef {
                name: &self.template_name,
                language: TemplateLanguage {
                    code: &self.template_locale,
                },
            },
        };

        debug!(%to, template = %self.template_name, "sending template message");
        let response = self
            .client
            .post(&self.endpoint_url)
            .bearer_auth(&self.auth_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!(%to, status, body = %body, "template message response");

        Ok(Delivery { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn config_for(endpoint_url: String) -> MessagingConfig {
        MessagingConfig {
            endpoint_url,
            auth_token: "test-token".to_string(),
            default_country_code: "91".to_string(),
            template_name: "hello_world".to_string(),
            template_locale: "en_US".to_string(),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn normalizes_local_numbers_with_separators() {
        let policy = PhonePolicy::new("91");
        assert_eq!(policy.normalize("98765-43210"), "919876543210");
        assert_eq!(policy.normalize("(98765) 43210"), "919876543210");
    }

    #[test]
    fn collapses_plus_country_code() {
        let policy = PhonePolicy::new("91");
        assert_eq!(policy.normalize("+919876543210"), "919876543210");
        assert_eq!(policy.normalize("+91 98765 43210"), "919876543210");
    }

    #[test]
    fn leaves_prefixed_numbers_alone() {
        let policy = PhonePolicy::new("91");
        assert_eq!(policy.normalize("919876543210"), "919876543210");
        assert_eq!(policy.normalize("+447700900123"), "+447700900123");
    }

    #[test]
    fn country_code_is_configurable() {
        let policy = PhonePolicy::new("44");
        assert_eq!(policy.normalize("7700 900123"), "447700900123");
        assert_eq!(policy.normalize("+447700900123"), "447700900123");
    }

    #[test]
    fn delivery_success_is_any_2xx() {
        let ok = Delivery {
            status: 200,
            body: String::new(),
        };
        let rejected = Delivery {
            status: 400,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!rejected.is_success());
    }

    #[tokio::test]
    async fn posts_template_payload_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::Json(json!({
                "messaging_product": "whatsapp",
                "to": "919876543210",
                "type": "template",
                "template": { "name": "hello_world", "language": { "code": "en_US" } }
            })))
            .with_status(200)
            .with_body(r#"{"messages":[{"id":"wamid.1"}]}"#)
            .create_async()
            .await;

        let messenger =
            TemplateMessenger::from_config(&config_for(format!("{}/v1/messages", server.url())))
                .unwrap();
        let delivery = messenger.send_template("919876543210").await.unwrap();

        assert!(delivery.is_success());
        assert!(delivery.body.contains("wamid.1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn reports_provider_rejections_as_deliveries() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .with_body(r#"{"error":{"message":"invalid token"}}"#)
            .create_async()
            .await;

        let messenger =
            TemplateMessenger::from_config(&config_for(format!("{}/v1/messages", server.url())))
                .unwrap();
        let delivery = messenger.send_template("919876543210").await.unwrap();

        assert_eq!(delivery.status, 401);
        assert!(!delivery.is_success());
    }
}
