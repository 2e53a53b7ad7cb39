use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{error, info};

use shared_config::AppConfig;

use crate::error::NotificationError;

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Sends one message. `to` must already be in international form.
    async fn send(&self, to: &str, message: &str) -> Result<(), NotificationError>;
}

const KNOWN_ERRORS: &[(i64, &str)] = &[
    (-100, "Missing parameters"),
    (-110, "Wrong credentials (invalid API key)"),
    (-113, "Insufficient balance"),
    (-115, "Sender not available"),
    (-116, "Invalid sender name"),
];

fn strip_html(body: &str) -> String {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    match TAGS.get_or_init(|| Regex::new(r"<[^>]+>").ok()) {
        Some(tags) => tags.replace_all(body, "").into_owned(),
        None => body.to_string(),
    }
}

/// Normalises a local number for the gateway: separators are removed, a
/// leading `+` is dropped and a leading `0` becomes the country code.
pub fn normalize_phone(raw: &str, country_code: &str) -> Result<String, NotificationError> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(NotificationError::InvalidPhone(raw.to_string()));
    }

    Ok(match digits.strip_prefix('0') {
        Some(local) => format!("{}{}", country_code, local),
        None => digits.to_string(),
    })
}

/// Interprets a gateway reply of the form `status:message_id:...`, possibly
/// wrapped in HTML. A status of 1 or more means the message was accepted.
pub fn parse_gateway_response(body: &str) -> Result<i64, NotificationError> {
    let cleaned = strip_html(body.trim());
    let cleaned = cleaned.trim();
    let status_field = cleaned.split(':').next().unwrap_or("").trim();

    let status: i64 = status_field
        .parse()
        .map_err(|_| NotificationError::SmsUnexpectedResponse(cleaned.to_string()))?;

    if status >= 1 {
        return Ok(status);
    }

    match KNOWN_ERRORS.iter().find(|(code, _)| *code == status) {
        Some((code, message)) => Err(NotificationError::SmsGateway {
            code: *code,
            message: message.to_string(),
        }),
        None => Err(NotificationError::SmsUnexpectedResponse(cleaned.to_string())),
    }
}

/// TweetsMS legacy HTTP API client.
#[derive(Debug)]
pub struct TweetSmsSender {
    client: Client,
    base_url: String,
    api_key: String,
    sender: String,
}

impl TweetSmsSender {
    pub fn new(config: &AppConfig) -> Result<Self, NotificationError> {
        if !config.is_sms_configured() {
            return Err(NotificationError::NotConfigured("sms"));
        }

        Ok(Self {
            client: Client::new(),
            base_url: config.tweetsms_base_url.clone(),
            api_key: config.tweetsms_api_key.clone(),
            sender: config.tweetsms_sender.clone(),
        })
    }
}

#[async_trait]
impl SmsSender for TweetSmsSender {
    async fn send(&self, to: &str, message: &str) -> Result<(), NotificationError> {
        info!("[TWEETSMS] Sending SMS to={} sender={}", to, self.sender);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("comm", "sendsms"),
                ("api_key", self.api_key.as_str()),
                ("to", to),
                ("message", message),
                ("sender", self.sender.as_str()),
            ])
            .send()
            .await?;

        let http_status = response.status();
        let body = response.text().await?;

        match parse_gateway_response(&body) {
            Ok(status) => {
                info!("[TWEETSMS] SMS accepted for to={} (status={})", to, status);
                Ok(())
            }
            Err(e) => {
                error!("[TWEETSMS] Sending to={} failed ({}): {}", to, http_status, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn local_numbers_get_country_code() {
        assert_eq!(normalize_phone("0591234567", "970").unwrap(), "970591234567");
        assert_eq!(normalize_phone("059-123 4567", "970").unwrap(), "970591234567");
        assert_eq!(normalize_phone("+970591234567", "970").unwrap(), "970591234567");
        assert_matches!(normalize_phone("call me", "970"), Err(NotificationError::InvalidPhone(_)));
        assert_matches!(normalize_phone("", "970"), Err(NotificationError::InvalidPhone(_)));
    }

    #[test]
    fn gateway_statuses() {
        assert_eq!(parse_gateway_response("1:8842:970591234567:77<br />").unwrap(), 1);
        assert_matches!(
            parse_gateway_response("-113"),
            Err(NotificationError::SmsGateway { code: -113, .. })
        );
        assert_matches!(
            parse_gateway_response("<b>-110</b>"),
            Err(NotificationError::SmsGateway { code: -110, ref message }) if message.contains("credentials")
        );
        assert_matches!(parse_gateway_response("-999"), Err(NotificationError::SmsUnexpectedResponse(_)));
        assert_matches!(parse_gateway_response("OK"), Err(NotificationError::SmsUnexpectedResponse(_)));
    }

    fn config(base_url: String) -> AppConfig {
        AppConfig {
            sms_provider: "TWEETSMS".to_string(),
            tweetsms_api_key: "sms-key".to_string(),
            tweetsms_sender: "Clinic".to_string(),
            tweetsms_base_url: base_url,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn sends_legacy_get_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("comm", "sendsms"))
            .and(query_param("api_key", "sms-key"))
            .and(query_param("to", "970591234567"))
            .and(query_param("sender", "Clinic"))
            .and(query_param("message", "Hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1:555:970591234567:1<br />"))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TweetSmsSender::new(&config(format!("{}/api.php", server.uri()))).unwrap();
        sender.send("970591234567", "Hello").await.unwrap();
    }

    #[tokio::test]
    async fn gateway_error_code_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("-116"))
            .mount(&server)
            .await;

        let sender = TweetSmsSender::new(&config(server.uri())).unwrap();
        let result = sender.send("970591234567", "Hello").await;
        assert_matches!(result, Err(NotificationError::SmsGateway { code: -116, .. }));
    }

    #[test]
    fn requires_full_configuration() {
        let mut partial = config("http://localhost".to_string());
        partial.tweetsms_sender.clear();
        assert_matches!(TweetSmsSender::new(&partial), Err(NotificationError::NotConfigured("sms")));
    }
}
