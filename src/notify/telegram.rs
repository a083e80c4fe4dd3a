//! Telegram Bot API notifier.
//!
//! Photos go out as `multipart/form-data` to `sendPhoto`. The body is built
//! in memory; snapshots are a few hundred kilobytes at most.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde_json::Value;

use super::Notifier;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    pub timeout: Duration,
    /// Overridable for tests and self-hosted Bot API servers.
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
            timeout: DEFAULT_TIMEOUT,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("timeout", &self.timeout)
            .field("api_base", &self.api_base)
            .finish()
    }
}

pub struct TelegramNotifier {
    config: TelegramConfig,
    agent: ureq::Agent,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(anyhow!("telegram bot token is empty"));
        }
        if config.chat_id.trim().is_empty() {
            return Err(anyhow!("telegram chat id is empty"));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }

    /// `getMe`: confirms the token is valid. Returns the bot's username.
    pub fn verify(&self) -> Result<String> {
        let response = self.agent.get(&self.method_url("getMe")).call();
        let body = self.read_reply("getMe", response)?;
        let username = body
            .get("result")
            .and_then(|r| r.get("username"))
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        Ok(username)
    }

    /// `sendMessage` with plain text.
    pub fn send_text(&self, text: &str) -> Result<()> {
        let payload = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
        });
        let response = self
            .agent
            .post(&self.method_url("sendMessage"))
            .set("Content-Type", "application/json")
            .send_string(&payload.to_string());
        self.read_reply("sendMessage", response).map(|_| ())
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.token,
            method
        )
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send_photo(&self, photo: &Path, caption: &str) -> Result<()> {
        let bytes = std::fs::read(photo)
            .with_context(|| format!("read snapshot {}", photo.display()))?;
        let file_name = photo
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("snapshot.jpg");
        let boundary = new_boundary();
        let body = MultipartBody::new(&boundary)
            .text("chat_id", &self.config.chat_id)
            .text("caption", caption)
            .file("photo", file_name, "image/jpeg", &bytes)
            .finish();
        let response = self
            .agent
            .post(&self.method_url("sendPhoto"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body);
        self.read_reply("sendPhoto", response).map(|_| ())
    }
}

impl TelegramNotifier {
    /// Bot API replies carry `{"ok": bool, "description": ...}` on success and
    /// on HTTP errors alike.
    fn read_reply(
        &self,
        method: &str,
        response: Result<ureq::Response, ureq::Error>,
    ) -> Result<Value> {
        let (status, response) = match response {
            Ok(response) => (response.status(), response),
            Err(ureq::Error::Status(code, response)) => (code, response),
            Err(ureq::Error::Transport(t)) => {
                return Err(anyhow!(
                    "telegram {}: transport error: {}",
                    method,
                    self.scrub(&describe_transport(&t))
                ));
            }
        };
        let body: Value = serde_json::from_reader(response.into_reader()).with_context(|| {
            format!("telegram {}: HTTP {} with unreadable body", method, status)
        })?;
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }
        let description = body
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        Err(anyhow!(
            "telegram {}: HTTP {}: {}",
            method,
            status,
            self.scrub(description)
        ))
    }

    /// Remove the bot token from text that may end up in logs.
    fn scrub(&self, text: &str) -> String {
        let token = self.config.token.trim();
        if token.is_empty() {
            text.to_string()
        } else {
            text.replace(token, "<redacted>")
        }
    }
}

/// Transport failure without the request URL, which carries the token.
fn describe_transport(t: &ureq::Transport) -> String {
    let mut text = t.kind().to_string();
    if let Some(message) = t.message() {
        text.push_str(": ");
        text.push_str(message);
    }
    if let Some(source) = std::error::Error::source(t) {
        text.push_str(": ");
        text.push_str(&source.to_string());
    }
    text
}

fn new_boundary() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..24)
        .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
        .collect();
    format!("arrival-watch-{}", suffix)
}

/// `multipart/form-data` encoder; ureq 2 only sends raw bodies.
struct MultipartBody<'a> {
    boundary: &'a str,
    buf: Vec<u8>,
}

impl<'a> MultipartBody<'a> {
    fn new(boundary: &'a str) -> Self {
        Self {
            boundary,
            buf: Vec::new(),
        }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.part_header(name, None, None);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.part_header(name, Some(file_name), Some(content_type));
        self.buf.extend_from_slice(bytes);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.buf
    }

    fn part_header(&mut self, name: &str, file_name: Option<&str>, content_type: Option<&str>) {
        let mut header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary, name
        );
        if let Some(file_name) = file_name {
            header.push_str(&format!("; filename=\"{}\"", file_name.replace('"', "")));
        }
        header.push_str("\r\n");
        if let Some(content_type) = content_type {
            header.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        header.push_str("\r\n");
        self.buf.extend_from_slice(header.as_bytes());
    }
}
