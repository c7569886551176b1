pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Result;

/// What an inbound message carries. Only text is relayed.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    /// Anything else (photo, sticker, service message, ...), by kind name
    Other(String),
}

/// A message received from the bot backend
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Source chat id as string
    pub chat_id: String,
    pub content: Content,
    /// The full envelope as delivered by the backend
    pub raw: serde_json::Value,
}

/// Outbound side of a connected bot
#[async_trait]
pub trait BotTransport: Send + Sync {
    /// Send plain text to `chat_id` with link previews disabled.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    /// The bot's own profile, as reported by the backend.
    async fn describe_self(&self) -> Result<serde_json::Value>;
}

/// Connects a bot and starts its receive loop
#[async_trait]
pub trait Backend: Send + Sync {
    /// Authenticate with `token` and start receiving in the background.
    ///
    /// Every inbound message is pushed into `inbound`. The loop stops once
    /// `shutdown` turns `true`, dropping its sender.
    async fn connect(
        &self,
        token: &str,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<dyn BotTransport>>;
}
