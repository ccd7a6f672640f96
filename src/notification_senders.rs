//! Channel senders — one implementation per `ChannelType`, all behind
//! the common `ChannelSender` contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::{ChannelType, NotificationChannel};
use crate::error::{ErrorCategory, OrchestratorError};
use crate::notification_templates::NotificationPayload;

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    pub channel_id: Uuid,
    pub channel_type: ChannelType,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
}

fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

fn ok_result(channel: &NotificationChannel, sent_at: DateTime<Utc>, status_code: Option<u16>, duration_ms: u64) -> NotificationResult {
    NotificationResult {
        success: true,
        channel_id: channel.id,
        channel_type: channel.channel_type,
        sent_at: Some(sent_at),
        error: None,
        status_code,
        duration_ms,
    }
}

fn err_result(channel: &NotificationChannel, error: impl std::fmt::Display, status_code: Option<u16>, duration_ms: u64) -> NotificationResult {
    NotificationResult {
        success: false,
        channel_id: channel.id,
        channel_type: channel.channel_type,
        sent_at: None,
        error: Some(error.to_string()),
        status_code,
        duration_ms,
    }
}

/// Common contract every channel-type sender implements.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> NotificationResult;

    /// Sends a canned "test" payload so an operator can validate channel
    /// configuration without waiting for a real event.
    async fn test(&self, channel: &NotificationChannel) -> NotificationResult {
        let payload = NotificationPayload {
            event_type: "test".to_string(),
            title: "Test notification".to_string(),
            message: "This is a test notification from the search orchestrator.".to_string(),
            timestamp: Utc::now(),
            fields: vec![],
            color_hex: crate::events::EventType::FALLBACK_COLOR_HEX.to_string(),
            url: None,
            event_data: json!({}),
        };
        self.send(channel, &payload).await
    }
}

fn classify_http_error(error: &reqwest::Error) -> OrchestratorError {
    if error.is_timeout() {
        OrchestratorError::Timeout
    } else {
        OrchestratorError::Network(error.to_string())
    }
}

/// Computes the webhook `X-Signature` header value: the lowercase hex
/// HMAC-SHA256 digest of `"{timestamp}.{raw_body}"` under `secret`.
pub fn sign_webhook_payload(secret: &str, timestamp: &str, raw_body: &str) -> Result<String, String> {
    let signed = format!("{timestamp}.{raw_body}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(signed.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Generic webhook sender: POST/PUT JSON, optional HMAC-SHA256
/// signature headers.
pub struct WebhookSender {
    http: Client,
}

impl WebhookSender {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    event_type: &'a str,
    title: &'a str,
    message: &'a str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: &'a [crate::notification_templates::PayloadField],
    color: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: &'a Option<String>,
    event_data: &'a Value,
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> NotificationResult {
        let start = Instant::now();
        let Some(url) = config_str(&channel.config, "url") else {
            return err_result(channel, "webhook channel missing url", None, 0);
        };
        let method = config_str(&channel.config, "method").unwrap_or("POST");
        let signature_header = config_str(&channel.config, "signature_header").unwrap_or("X-Signature");
        let timestamp_header = config_str(&channel.config, "timestamp_header").unwrap_or("X-Timestamp");

        let body = WebhookBody {
            event_type: &payload.event_type,
            title: &payload.title,
            message: &payload.message,
            timestamp: payload.timestamp,
            fields: &payload.fields,
            color: &payload.color_hex,
            url: &payload.url,
            event_data: &payload.event_data,
        };
        let raw_body = match serde_json::to_string(&body) {
            Ok(s) => s,
            Err(e) => return err_result(channel, format!("failed to serialize payload: {e}"), None, start.elapsed().as_millis() as u64),
        };

        let mut request = match method {
            "PUT" => self.http.put(url),
            _ => self.http.post(url),
        }
        .header("Content-Type", "application/json");

        if let Some(secret) = config_str(&channel.sensitive_config, "signing_secret") {
            let timestamp = Utc::now().timestamp().to_string();
            let signature = match sign_webhook_payload(secret, &timestamp, &raw_body) {
                Ok(signature) => signature,
                Err(e) => return err_result(channel, format!("invalid signing secret: {e}"), None, start.elapsed().as_millis() as u64),
            };
            request = request.header(signature_header, signature).header(timestamp_header, timestamp);
        }

        match request.body(raw_body).send().await {
            Ok(response) if response.status().is_success() => ok_result(channel, Utc::now(), Some(response.status().as_u16()), start.elapsed().as_millis() as u64),
            Ok(response) => {
                let status = response.status().as_u16();
                err_result(channel, format!("webhook returned HTTP {status}"), Some(status), start.elapsed().as_millis() as u64)
            }
            Err(e) => err_result(channel, classify_http_error(&e), None, start.elapsed().as_millis() as u64),
        }
    }
}

/// Chat-A: Discord-style embeds.
pub struct ChatASender {
    http: Client,
}

impl ChatASender {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChannelSender for ChatASender {
    async fn send(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> NotificationResult {
        let start = Instant::now();
        let Some(url) = config_str(&channel.sensitive_config, "webhook_url").or_else(|| config_str(&channel.config, "webhook_url")) else {
            return err_result(channel, "chatA channel missing webhook_url", None, 0);
        };

        let color_int = crate::events::color_hex_to_int(&payload.color_hex);
        let embed = json!({
            "title": payload.title,
            "description": payload.message,
            "url": payload.url,
            "timestamp": payload.timestamp.to_rfc3339(),
            "color": color_int,
            "fields": payload.fields.iter().map(|f| json!({"name": f.name, "value": f.value, "inline": true})).collect::<Vec<_>>(),
        });
        let body = json!({ "embeds": [embed] });

        match self.http.post(url).json(&body).send().await {
            Ok(response) if response.status().is_success() => ok_result(channel, Utc::now(), Some(response.status().as_u16()), start.elapsed().as_millis() as u64),
            Ok(response) => {
                let status = response.status().as_u16();
                err_result(channel, format!("chatA webhook returned HTTP {status}"), Some(status), start.elapsed().as_millis() as u64)
            }
            Err(e) => err_result(channel, classify_http_error(&e), None, start.elapsed().as_millis() as u64),
        }
    }
}

/// Chat-B: Slack-style blocks.
pub struct ChatBSender {
    http: Client,
}

impl ChatBSender {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChannelSender for ChatBSender {
    async fn send(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> NotificationResult {
        let start = Instant::now();
        let Some(url) = config_str(&channel.sensitive_config, "webhook_url").or_else(|| config_str(&channel.config, "webhook_url")) else {
            return err_result(channel, "chatB channel missing webhook_url", None, 0);
        };

        let mut blocks = vec![
            json!({"type": "header", "text": {"type": "plain_text", "text": payload.title}}),
            json!({"type": "section", "text": {"type": "mrkdwn", "text": payload.message}}),
        ];

        if !payload.fields.is_empty() {
            let fields: Vec<Value> = payload
                .fields
                .iter()
                .take(10)
                .map(|f| json!({"type": "mrkdwn", "text": format!("*{}*\n{}", f.name, f.value)}))
                .collect();
            blocks.push(json!({"type": "section", "fields": fields}));
        }

        if let Some(url) = &payload.url {
            blocks.push(json!({
                "type": "actions",
                "elements": [{"type": "button", "text": {"type": "plain_text", "text": "View Details"}, "url": url}]
            }));
        }

        blocks.push(json!({
            "type": "context",
            "elements": [{"type": "mrkdwn", "text": format!("search-orchestrator · {}", payload.timestamp.to_rfc3339())}]
        }));

        let body = json!({ "text": payload.message, "blocks": blocks });

        match self.http.post(url).json(&body).send().await {
            Ok(response) if response.status().is_success() => ok_result(channel, Utc::now(), Some(response.status().as_u16()), start.elapsed().as_millis() as u64),
            Ok(response) => {
                let status = response.status().as_u16();
                err_result(channel, format!("chatB webhook returned HTTP {status}"), Some(status), start.elapsed().as_millis() as u64)
            }
            Err(e) => err_result(channel, classify_http_error(&e), None, start.elapsed().as_millis() as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    Html,
    Markdown,
    MarkdownV2,
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &['_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!'];
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Chat-C: Telegram-style bot API.
pub struct ChatCSender {
    http: Client,
}

impl ChatCSender {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChannelSender for ChatCSender {
    async fn send(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> NotificationResult {
        let start = Instant::now();
        let Some(token) = config_str(&channel.sensitive_config, "bot_token") else {
            return err_result(channel, "chatC channel missing bot_token", None, 0);
        };
        let Some(chat_id) = config_str(&channel.config, "chat_id") else {
            return err_result(channel, "chatC channel missing chat_id", None, 0);
        };
        let api_base = config_str(&channel.config, "api_base").unwrap_or("https://api.telegram.org");
        let parse_mode = match config_str(&channel.config, "parse_mode") {
            Some("Markdown") => ParseMode::Markdown,
            Some("MarkdownV2") => ParseMode::MarkdownV2,
            _ => ParseMode::Html,
        };

        let (parse_mode_name, text) = match parse_mode {
            ParseMode::Html => ("HTML", format!("<b>{}</b>\n{}", escape_html(&payload.title), escape_html(&payload.message))),
            ParseMode::Markdown => ("Markdown", format!("*{}*\n{}", payload.title, payload.message)),
            ParseMode::MarkdownV2 => (
                "MarkdownV2",
                format!("*{}*\n{}", escape_markdown_v2(&payload.title), escape_markdown_v2(&payload.message)),
            ),
        };

        let url = format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token);
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": parse_mode_name,
            "disable_web_page_preview": true,
            "disable_notification": false,
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => ok_result(channel, Utc::now(), Some(response.status().as_u16()), start.elapsed().as_millis() as u64),
            Ok(response) => {
                let status = response.status().as_u16();
                err_result(channel, format!("telegram api returned HTTP {status}"), Some(status), start.elapsed().as_millis() as u64)
            }
            Err(e) => err_result(channel, classify_http_error(&e), None, start.elapsed().as_millis() as u64),
        }
    }
}

/// Email via SMTP (`lettre`).
pub struct EmailSender;

impl EmailSender {
    fn build_html(payload: &NotificationPayload) -> String {
        let rows: String = payload
            .fields
            .iter()
            .map(|f| format!("<tr><td><strong>{}</strong></td><td>{}</td></tr>", escape_html(&f.name), escape_html(&f.value)))
            .collect();
        let button = payload
            .url
            .as_ref()
            .map(|u| format!(r#"<p><a href="{u}" style="background:{};color:#fff;padding:8px 16px;border-radius:4px;text-decoration:none;">View Details</a></p>"#, payload.color_hex))
            .unwrap_or_default();
        format!(
            r#"<div style="font-family:sans-serif;">
<div style="background:{};color:#fff;padding:12px;">{}</div>
<p>{}</p>
<table>{}</table>
{}
</div>"#,
            payload.color_hex,
            escape_html(&payload.title),
            escape_html(&payload.message),
            rows,
            button
        )
    }

    fn build_plain(payload: &NotificationPayload) -> String {
        let mut text = format!("{}\n\n{}\n", payload.title, payload.message);
        for f in &payload.fields {
            text.push_str(&format!("{}: {}\n", f.name, f.value));
        }
        if let Some(url) = &payload.url {
            text.push_str(&format!("\nDetails: {url}\n"));
        }
        text
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> NotificationResult {
        use lettre::message::{header::ContentType, MultiPart, SinglePart};
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let start = Instant::now();
        let config = &channel.config;
        let (Some(host), Some(from), Some(to)) = (config_str(config, "host"), config_str(config, "from"), config_str(config, "to")) else {
            return err_result(channel, "email channel missing host/from/to", None, 0);
        };
        let port = config.get("port").and_then(Value::as_u64).unwrap_or(587) as u16;
        let secure = config.get("secure").and_then(Value::as_bool).unwrap_or(false);
        let subject_prefix = config_str(config, "subject_prefix").unwrap_or("");

        let message = Message::builder()
            .from(match from.parse() {
                Ok(addr) => addr,
                Err(e) => return err_result(channel, format!("invalid from address: {e}"), None, start.elapsed().as_millis() as u64),
            })
            .to(match to.parse() {
                Ok(addr) => addr,
                Err(e) => return err_result(channel, format!("invalid to address: {e}"), None, start.elapsed().as_millis() as u64),
            })
            .subject(format!("{subject_prefix}{}", payload.title))
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(Self::build_plain(payload)))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(Self::build_html(payload))),
            );

        let message = match message {
            Ok(m) => m,
            Err(e) => return err_result(channel, format!("failed to build email: {e}"), None, start.elapsed().as_millis() as u64),
        };

        // `secure=true` is implicit TLS from connect (typically port 465);
        // `secure=false`, the default, negotiates STARTTLS after connecting
        // (typically port 587) rather than sending in the clear.
        let relay_builder = if secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        };
        let mut builder = match relay_builder {
            Ok(builder) => builder.port(port),
            Err(e) => return err_result(channel, format!("failed to resolve smtp relay: {e}"), None, start.elapsed().as_millis() as u64),
        };
        if let (Some(username), Some(password)) = (config_str(&channel.sensitive_config, "username"), config_str(&channel.sensitive_config, "password")) {
            builder = builder.credentials(Credentials::new(username.to_string(), password.to_string()));
        }
        let transport = builder.build();

        match transport.send(message).await {
            Ok(_) => ok_result(channel, Utc::now(), None, start.elapsed().as_millis() as u64),
            Err(e) => err_result(channel, e, None, start.elapsed().as_millis() as u64),
        }
    }
}

/// Maps a sender-surfaced send failure to the error taxonomy's categories.
pub fn classify_send_failure(error: &OrchestratorError) -> ErrorCategory {
    error.category()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_v2_escapes_special_characters() {
        let escaped = escape_markdown_v2("Hello (world)! [test]");
        assert_eq!(escaped, "Hello \\(world\\)\\! \\[test\\]");
    }

    #[test]
    fn html_escape_covers_ampersand_and_angle_brackets() {
        assert_eq!(escape_html("a & b < c > d"), "a &amp; b &lt; c &gt; d");
    }

    /// S6: body `{"a":1}`, timestamp `"1700000000"`, secret `"s3cret"`.
    #[test]
    fn webhook_signature_matches_known_hmac_digest() {
        let signature = sign_webhook_payload("s3cret", "1700000000", r#"{"a":1}"#).unwrap();
        assert_eq!(signature, "1698a50bc74d1ff1db85c4e0a5297c2ad9fdba245d5737cdb789e4cc6e098940");
    }
}
