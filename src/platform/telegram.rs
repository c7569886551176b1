use std::sync::Arc;

use async_trait::async_trait;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::RequestError;
use teloxide::types::{LinkPreviewOptions, Recipient};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::{RelayError, Result};
use crate::platform::{Backend, BotTransport, Content, InboundMessage};

/// Sending side backed by a teloxide `Bot`
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Numeric ids are chats, anything else (`@channel`) a public username.
fn recipient(chat_id: &str) -> Recipient {
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

#[async_trait]
impl BotTransport for TelegramTransport {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.bot
            .send_message(recipient(chat_id), text)
            .link_preview_options(no_link_preview())
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn describe_self(&self) -> Result<serde_json::Value> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        serde_json::to_value(&me).map_err(|e| RelayError::Transport(e.to_string()))
    }
}

fn content_kind(msg: &Message) -> &'static str {
    if msg.photo().is_some() {
        "photo"
    } else if msg.sticker().is_some() {
        "sticker"
    } else if msg.document().is_some() {
        "document"
    } else if msg.video().is_some() {
        "video"
    } else if msg.voice().is_some() {
        "voice"
    } else if msg.audio().is_some() {
        "audio"
    } else if msg.animation().is_some() {
        "animation"
    } else if msg.location().is_some() {
        "location"
    } else if msg.contact().is_some() {
        "contact"
    } else if msg.poll().is_some() {
        "poll"
    } else {
        "other"
    }
}

pub fn to_inbound(msg: &Message) -> InboundMessage {
    let content = match msg.text() {
        Some(text) => Content::Text(text.to_string()),
        None => Content::Other(content_kind(msg).to_string()),
    };
    InboundMessage {
        chat_id: msg.chat.id.0.to_string(),
        content,
        raw: serde_json::to_value(msg).unwrap_or(serde_json::Value::Null),
    }
}

async fn forward_message(
    msg: Message,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) -> ResponseResult<()> {
    if inbound.send(to_inbound(&msg)).is_err() {
        warn!("Relay is gone, dropping message from chat {}", msg.chat.id);
    }
    Ok(())
}

/// New messages, channel posts and edits of either all go to the relay.
fn update_handler() -> UpdateHandler<RequestError> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(forward_message))
        .branch(Update::filter_edited_message().endpoint(forward_message))
        .branch(Update::filter_channel_post().endpoint(forward_message))
        .branch(Update::filter_edited_channel_post().endpoint(forward_message))
}

/// Long-polling Telegram backend
pub struct TelegramBackend;

#[async_trait]
impl Backend for TelegramBackend {
    async fn connect(
        &self,
        token: &str,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<dyn BotTransport>> {
        let bot = Bot::new(token);

        // Reject a bad token here instead of inside the polling loop
        let me = bot
            .get_me()
            .await
            .map_err(|e| RelayError::Lifecycle(format!("Failed to authenticate bot: {}", e)))?;
        info!(
            "Connected as @{}",
            me.user.username.as_deref().unwrap_or("<no username>")
        );

        let handler = update_handler();

        let polling_bot = bot.clone();
        tokio::spawn(async move {
            let mut dispatcher = Dispatcher::builder(polling_bot, handler)
                .dependencies(dptree::deps![inbound])
                .default_handler(|upd| async move {
                    warn!("Unhandled update: {:?}", upd.id);
                })
                .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
                .build();

            tokio::select! {
                _ = dispatcher.dispatch() => {
                    warn!("Telegram dispatcher exited");
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Telegram receive loop stopping");
                }
            }
        });

        let transport: Arc<dyn BotTransport> = Arc::new(TelegramTransport::new(bot));
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_numeric_ids() {
        assert_eq!(recipient("123456"), Recipient::Id(ChatId(123456)));
        assert_eq!(
            recipient("-1001234567890"),
            Recipient::Id(ChatId(-1001234567890))
        );
    }

    #[test]
    fn test_recipient_channel_username() {
        assert_eq!(
            recipient("@my_channel"),
            Recipient::ChannelUsername("@my_channel".to_string())
        );
    }

    #[tokio::test]
    async fn test_edited_message_is_forwarded() {
        let update: Update = serde_json::from_str(&serde_json::json!({
            "update_id": 1,
            "edited_message": {
                "message_id": 7,
                "date": 1700000000,
                "edit_date": 1700000100,
                "chat": { "id": 111, "type": "private", "first_name": "Kim" },
                "from": { "id": 111, "is_bot": false, "first_name": "Kim" },
                "text": "fixed typo"
            }
        }).to_string())
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();

        let _ = update_handler().dispatch(dptree::deps![update, tx]).await;

        let inbound = rx.try_recv().unwrap();
        assert_eq!(inbound.chat_id, "111");
        assert_eq!(inbound.content, Content::Text("fixed typo".to_string()));
    }

    #[test]
    fn test_link_preview_disabled() {
        assert!(no_link_preview().is_disabled);
    }
}
