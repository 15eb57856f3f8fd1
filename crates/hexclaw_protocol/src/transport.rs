//! Operator chat transport abstraction.
//!
//! The daemon talks to the operator through this narrow seam; the shipped
//! implementation is the Telegram long-poll client in the launcher crate,
//! and tests substitute a recording transport. Sends are best-effort:
//! implementations log failures and never raise into a worker.

use async_trait::async_trait;
use std::path::Path;

/// An inline button: label shown to the operator, opaque payload echoed
/// back through the callback channel when pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

impl Button {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound operator channel.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a markdown message (truncated to the channel's message cap).
    async fn send_text(&self, text: &str);

    /// Send a document with an optional caption.
    async fn send_file(&self, path: &Path, caption: Option<&str>);

    /// Send a prompt with inline buttons. Button payloads come back via the
    /// callback channel (`ApprovalGate::handle_callback`).
    async fn send_with_buttons(&self, prompt: &str, buttons: &[Button]);
}

/// Transport used when no chat channel is configured: logs and drops.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl ChatTransport for NullTransport {
    async fn send_text(&self, text: &str) {
        tracing::info!("[notify] {}", text.chars().take(120).collect::<String>());
    }

    async fn send_file(&self, path: &Path, _caption: Option<&str>) {
        tracing::info!("[notify] file: {}", path.display());
    }

    async fn send_with_buttons(&self, prompt: &str, buttons: &[Button]) {
        tracing::info!(
            "[notify] {} (buttons: {})",
            prompt.chars().take(120).collect::<String>(),
            buttons
                .iter()
                .map(|b| b.label.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}
