use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::platform::{BotTransport, Content, InboundMessage};
use crate::routing;
use crate::settings::{SettingsStore, CHAT_ID_RECEIVE, CHAT_ID_SEND};

/// Telegram's message limit, counted in UTF-16 code units
const MAX_MESSAGE_UNITS: usize = 4096;

/// Reply with the bot's own profile
pub const BOT_INFO_COMMAND: &str = "/bot2";
/// Reply with the raw inbound message
pub const MESSAGE_INFO_COMMAND: &str = "/me2";

/// Outcome of sending one text to a list of chats
#[derive(Debug, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    /// Chat id and the error that chat's send failed with
    pub failed: Vec<(String, String)>,
}

/// Cut a diagnostic dump into messages Telegram accepts, preferring line
/// breaks. A line longer than `max_units` is cut between characters.
fn chunk_text(text: &str, max_units: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut units = 0;

    for line in text.split_inclusive('\n') {
        let line_units = line.encode_utf16().count();
        if units + line_units > max_units && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            units = 0;
        }
        if line_units <= max_units {
            current.push_str(line);
            units += line_units;
            continue;
        }
        for ch in line.chars() {
            if units + ch.len_utf16() > max_units {
                chunks.push(std::mem::take(&mut current));
                units = 0;
            }
            current.push(ch);
            units += ch.len_utf16();
        }
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Forwards inbound text according to the receive/send mapping
pub struct Relay {
    transport: Arc<dyn BotTransport>,
    settings: SettingsStore,
}

impl Relay {
    pub fn new(transport: Arc<dyn BotTransport>, settings: SettingsStore) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Handle one inbound message.
    ///
    /// Returns what was sent. Non-text messages and unmapped chats produce an
    /// empty report.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<DispatchReport> {
        let text = match &msg.content {
            Content::Text(text) => text,
            Content::Other(kind) => {
                debug!("Ignoring {} message from chat {}", kind, msg.chat_id);
                return Ok(DispatchReport::default());
            }
        };

        if text == BOT_INFO_COMMAND {
            let me = self.transport.describe_self().await?;
            return Ok(self.reply_dump(&msg.chat_id, &me).await);
        }

        if text == MESSAGE_INFO_COMMAND {
            return Ok(self.reply_dump(&msg.chat_id, &msg.raw).await);
        }

        let receive = self.required_setting(CHAT_ID_RECEIVE).await?;
        if routing::match_index(&msg.chat_id, &receive).is_none() {
            return Ok(DispatchReport::default());
        }
        let send = self.required_setting(CHAT_ID_SEND).await?;
        let destinations = routing::resolve(&msg.chat_id, &receive, &send)?;

        debug!(
            "Relaying message from chat {} to {:?}",
            msg.chat_id, destinations
        );
        Ok(self.dispatch(text, &destinations).await)
    }

    async fn required_setting(&self, key: &str) -> Result<String> {
        self.settings
            .get(key)
            .await?
            .ok_or_else(|| RelayError::Config(format!("setting '{}' is missing", key)))
    }

    /// Pretty-printed JSON back to `chat_id` only, split if it is too long.
    async fn reply_dump(&self, chat_id: &str, value: &serde_json::Value) -> DispatchReport {
        let chunks = chunk_text(&pretty(value), MAX_MESSAGE_UNITS);
        self.deliver(&chunks, &[chat_id.to_string()]).await
    }

    /// Send `text` unchanged to every non-empty chat id. A failed chat
    /// doesn't stop the rest.
    pub async fn dispatch(&self, text: &str, chat_ids: &[String]) -> DispatchReport {
        self.deliver(&[text.to_string()], chat_ids).await
    }

    async fn deliver(&self, chunks: &[String], chat_ids: &[String]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for chat_id in chat_ids.iter().filter(|id| !id.is_empty()) {
            let mut result = Ok(());
            for chunk in chunks {
                result = self.transport.send_text(chat_id, chunk).await;
                if result.is_err() {
                    break;
                }
            }
            match result {
                Ok(()) => report.delivered.push(chat_id.clone()),
                Err(e) => {
                    warn!("Failed to send to chat {}: {}", chat_id, e);
                    report.failed.push((chat_id.clone(), e.to_string()));
                }
            }
        }

        if !report.delivered.is_empty() {
            info!("Delivered message to {} chat(s)", report.delivered.len());
        }
        report
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
