// Telegram Bot API client. Delivery side only; update polling lives in the host.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::traits::{AudioUpload, ChatId, DeliveryGateway, MessageRef};
use crate::config::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    description: Option<String>,
}

pub struct TelegramGateway {
    client: Client,
    base_url: String,
}

impl TelegramGateway {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(API_BASE, token)
    }

    /// Use a different API host, e.g. a local Bot API server.
    pub fn with_base_url(base: &str, token: &str) -> Result<Self> {
        Self::with_request_timeout(base, token, REQUEST_TIMEOUT)
    }

    /// Like [`with_base_url`](Self::with_base_url) with a custom budget for
    /// text calls. `sendAudio` always uses the timeout passed to it.
    pub fn with_request_timeout(base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", base.trim_end_matches('/'), token),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;
        Self::unpack(method, resp).await
    }

    async fn unpack(method: &str, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| anyhow!("{}: unreadable response (HTTP {}): {}", method, status.as_u16(), e))?;
        if !parsed.ok {
            let desc = parsed.description.unwrap_or_else(|| "unknown error".to_string());
            warn!("telegram {} rejected: HTTP {} {}", method, status.as_u16(), desc);
            return Err(anyhow!("{} failed: {}", method, desc));
        }
        Ok(parsed.result)
    }
}

#[async_trait]
impl DeliveryGateway for TelegramGateway {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef> {
        let result = self
            .call("sendMessage", json!({ "chat_id": chat.0, "text": text }))
            .await?;
        let message_id = result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("sendMessage: missing message_id"))?;
        Ok(MessageRef { chat, message_id })
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
        self.call(
            "editMessageText",
            json!({
                "chat_id": message.chat.0,
                "message_id": message.message_id,
                "text": text,
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": message.chat.0, "message_id": message.message_id }),
        )
        .await?;
        Ok(())
    }

    async fn send_audio(&self, chat: ChatId, audio: AudioUpload, timeout: Duration) -> Result<()> {
        let size = audio.data.len();
        let part = Part::stream_with_length(audio.data, size as u64)
            .file_name(audio.file_name)
            .mime_str("audio/mpeg")?;
        let form = Form::new()
            .text("chat_id", chat.0.to_string())
            .text("caption", audio.caption)
            .text("title", audio.title)
            .text("performer", audio.performer)
            .text("duration", audio.duration_seconds.to_string())
            .part("audio", part);

        debug!("telegram sendAudio chat={} bytes={}", chat.0, size);
        let resp = self
            .client
            .post(self.method_url("sendAudio"))
            .multipart(form)
            .timeout(timeout)
            .send()
            .await?;
        Self::unpack("sendAudio", resp).await?;
        Ok(())
    }
}
