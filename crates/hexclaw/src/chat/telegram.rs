//! Telegram operator channel: Bot HTTP API over long-polling.
//!
//! One allowlisted chat id gates everything inbound; unknown senders get a
//! terse rejection and a log line. Outbound sends are best-effort and
//! never raise into callers.

use crate::chat::commands::CommandHandler;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use hexclaw_gate::ApprovalGate;
use hexclaw_protocol::{defaults, Button, ChatTransport};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT_SEC: u64 = 25;

#[derive(Clone)]
pub struct TelegramTransport {
    client: reqwest::Client,
    token: String,
    chat_id: i64,
}

impl TelegramTransport {
    pub fn new(token: &str, chat_id: i64) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            chat_id,
        }
    }

    fn api(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    async fn post(&self, method: &str, body: serde_json::Value) {
        let result = self
            .client
            .post(self.api(method))
            .json(&body)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                error!(
                    "Telegram {} failed: HTTP {}",
                    method,
                    response.status().as_u16()
                );
            }
            Ok(_) => {}
            Err(err) => error!("Telegram {} failed: {}", method, err),
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, text: &str) {
        let capped: String = text
            .chars()
            .take(defaults::CHAT_MESSAGE_MAX_CHARS)
            .collect();
        self.post(
            "sendMessage",
            json!({
                "chat_id": self.chat_id,
                "text": capped,
                "parse_mode": "Markdown",
            }),
        )
        .await;
    }

    async fn send_file(&self, path: &Path, caption: Option<&str>) {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("File not found for Telegram: {} ({})", path.display(), err);
                return;
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.to_string())
            .part("document", part);
        if let Some(caption) = caption {
            let capped: String = caption.chars().take(1024).collect();
            form = form.text("caption", capped);
        }

        let result = self
            .client
            .post(self.api("sendDocument"))
            .multipart(form)
            .send()
            .await;
        if let Err(err) = result {
            error!("Telegram file send failed: {}", err);
        }
    }

    async fn send_with_buttons(&self, prompt: &str, buttons: &[Button]) {
        let keyboard: Vec<Vec<serde_json::Value>> = buttons
            .iter()
            .map(|button| {
                vec![json!({
                    "text": button.label,
                    "callback_data": button.payload,
                })]
            })
            .collect();
        let capped: String = prompt
            .chars()
            .take(defaults::CHAT_MESSAGE_MAX_CHARS)
            .collect();
        self.post(
            "sendMessage",
            json!({
                "chat_id": self.chat_id,
                "text": capped,
                "parse_mode": "Markdown",
                "reply_markup": {"inline_keyboard": keyboard},
            }),
        )
        .await;
    }
}

// ============================================================================
// Update polling
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<Message>,
}

/// The inbound half: long-poll loop feeding commands and button callbacks
/// into the core.
pub struct TelegramBot {
    transport: TelegramTransport,
    gate: ApprovalGate,
    handler: CommandHandler,
    allowed_chat: i64,
}

impl TelegramBot {
    pub fn new(
        transport: TelegramTransport,
        gate: ApprovalGate,
        handler: CommandHandler,
        allowed_chat: i64,
    ) -> Self {
        Self {
            transport,
            gate,
            handler,
            allowed_chat,
        }
    }

    /// Long-poll until shutdown.
    pub async fn run(&self, shutdown: Shutdown) {
        info!("Telegram bot polling (chat allowlist: {})", self.allowed_chat);
        let mut offset: i64 = 0;

        while !shutdown.is_triggered() {
            let updates = tokio::select! {
                _ = shutdown.wait() => break,
                updates = self.fetch_updates(offset) => updates,
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                self.handle_update(update).await;
            }
        }
        info!("Telegram bot stopped.");
    }

    async fn fetch_updates(&self, offset: i64) -> Vec<Update> {
        let result = self
            .transport
            .client
            .post(self.transport.api("getUpdates"))
            .json(&json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SEC,
                "allowed_updates": ["message", "callback_query"],
            }))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SEC + 10))
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<UpdatesResponse>().await {
                Ok(parsed) if parsed.ok => parsed.result,
                Ok(_) => {
                    warn!("Telegram getUpdates returned ok=false");
                    Vec::new()
                }
                Err(err) => {
                    warn!("Telegram getUpdates parse error: {}", err);
                    Vec::new()
                }
            },
            Err(err) => {
                debug!("Telegram getUpdates error: {}", err);
                tokio::time::sleep(Duration::from_secs(3)).await;
                Vec::new()
            }
        }
    }

    async fn handle_update(&self, update: Update) {
        if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await;
            return;
        }

        let Some(message) = update.message else {
            return;
        };
        if message.chat.id != self.allowed_chat {
            warn!("Unauthorized access attempt from chat {}", message.chat.id);
            // A minimal rejection only; no command output leaks
            self.transport
                .post(
                    "sendMessage",
                    json!({"chat_id": message.chat.id, "text": "Unauthorized."}),
                )
                .await;
            return;
        }

        let Some(text) = message.text else {
            return;
        };
        let reply = self.handler.handle(&text).await;
        if !reply.is_empty() {
            self.transport.send_text(&reply).await;
        }
    }

    async fn handle_callback(&self, callback: CallbackQuery) {
        // Ack first so the operator's client stops spinning
        self.transport
            .post("answerCallbackQuery", json!({"callback_query_id": callback.id}))
            .await;

        let from_allowed = callback
            .message
            .as_ref()
            .map(|m| m.chat.id == self.allowed_chat)
            .unwrap_or(false);
        if !from_allowed {
            warn!("Ignoring callback from outside the allowlisted chat");
            return;
        }

        let Some(payload) = callback.data else {
            return;
        };
        match self.gate.handle_callback(&payload) {
            Some(result) if result.resolved => {
                self.transport
                    .send_text(&format!("Recorded: {}", result.outcome.as_str()))
                    .await;
            }
            Some(_) => {
                // Late press after timeout: deliberately silent
                debug!("Late callback for {}", payload);
            }
            None => {}
        }
    }
}
