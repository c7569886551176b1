use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::platform::{Backend, InboundMessage};
use crate::relay::Relay;
use crate::settings::{SettingsStore, BOT_TOKEN};

/// A receive loop that has been started
struct RunningLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoopStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Owns the bot connection and its receive loop
pub struct RelayService {
    settings: SettingsStore,
    backend: Arc<dyn Backend>,
    running: Mutex<Option<RunningLoop>>,
}

impl RelayService {
    pub fn new(settings: SettingsStore, backend: Arc<dyn Backend>) -> Self {
        Self {
            settings,
            backend,
            running: Mutex::new(None),
        }
    }

    /// Start receiving unless a loop is already running.
    ///
    /// A loop whose task has ended counts as stopped, so calling this again
    /// after a failure retries.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                debug!("Receive loop already running");
                return Ok(());
            }
            info!("Previous receive loop has ended, restarting");
        }
        *running = None;

        let token = self.settings.get_or_empty(BOT_TOKEN).await?;
        if token.trim().is_empty() {
            return Err(RelayError::Lifecycle("bot_token is not set".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = self
            .backend
            .connect(token.trim(), inbound_tx, shutdown_rx)
            .await?;

        let relay = Relay::new(transport, self.settings.clone());
        let task = tokio::spawn(consume(relay, inbound_rx));

        *running = Some(RunningLoop {
            shutdown: shutdown_tx,
            task,
            started_at: Utc::now(),
        });
        info!("Receive loop started");
        Ok(())
    }

    /// Ask the receive loop to stop. A message being relayed is finished first.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(current) => {
                // Receivers may already be gone if the loop exited on its own
                let _ = current.shutdown.send(true);
                info!("Receive loop stopping");
            }
            None => debug!("Receive loop not running"),
        }
    }

    pub async fn status(&self) -> LoopStatus {
        let running = self.running.lock().await;
        match running.as_ref() {
            Some(current) if !current.task.is_finished() => LoopStatus {
                running: true,
                started_at: Some(current.started_at),
            },
            _ => LoopStatus {
                running: false,
                started_at: None,
            },
        }
    }
}

/// Handle inbound messages one at a time until the backend drops its sender.
async fn consume(relay: Relay, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
    while let Some(msg) = inbound.recv().await {
        match relay.handle(&msg).await {
            Ok(report) if !report.failed.is_empty() => warn!(
                "Message from chat {} failed for {} of {} destination(s)",
                msg.chat_id,
                report.failed.len(),
                report.failed.len() + report.delivered.len()
            ),
            Ok(_) => {}
            Err(e) => error!("Failed to handle message from chat {}: {}", msg.chat_id, e),
        }
    }
    info!("Receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::BotTransport;
    use crate::relay::tests::{text_message, MockTransport};
    use crate::settings::{CHAT_ID_RECEIVE, CHAT_ID_SEND};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Hands the inbound sender to the test instead of polling anything.
    #[derive(Default)]
    struct MockBackend {
        connects: AtomicUsize,
        reject: bool,
        transport: Arc<MockTransport>,
        inbound: std::sync::Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn connect(
            &self,
            _token: &str,
            inbound: mpsc::UnboundedSender<InboundMessage>,
            mut shutdown: watch::Receiver<bool>,
        ) -> Result<Arc<dyn BotTransport>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(RelayError::Lifecycle("Unauthorized".to_string()));
            }
            *self.inbound.lock().unwrap() = Some(inbound.clone());
            tokio::spawn(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                drop(inbound);
            });
            let transport: Arc<dyn BotTransport> = self.transport.clone();
            Ok(transport)
        }
    }

    async fn service_with(backend: Arc<MockBackend>, token: &str) -> RelayService {
        let settings = SettingsStore::open_in_memory().unwrap();
        settings.init_defaults().await.unwrap();
        settings
            .save([(BOT_TOKEN, token), (CHAT_ID_RECEIVE, ""), (CHAT_ID_SEND, "a")])
            .await
            .unwrap();
        RelayService::new(settings, backend)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let backend = Arc::new(MockBackend::default());
        let service = service_with(backend.clone(), "123:abc").await;

        service.start().await.unwrap();
        service.start().await.unwrap();

        assert_eq!(backend.connects.load(Ordering::SeqCst), 1);
        assert!(service.status().await.running);
        assert!(service.status().await.started_at.is_some());
    }

    #[tokio::test]
    async fn test_start_without_token_stays_stopped() {
        let backend = Arc::new(MockBackend::default());
        let service = service_with(backend.clone(), "").await;

        assert!(matches!(service.start().await, Err(RelayError::Lifecycle(_))));
        assert_eq!(backend.connects.load(Ordering::SeqCst), 0);
        assert!(!service.status().await.running);
    }

    #[tokio::test]
    async fn test_rejected_token_can_retry() {
        let backend = Arc::new(MockBackend {
            reject: true,
            ..Default::default()
        });
        let service = service_with(backend.clone(), "bad").await;

        assert!(service.start().await.is_err());
        assert!(service.start().await.is_err());
        assert_eq!(backend.connects.load(Ordering::SeqCst), 2);
        assert!(!service.status().await.running);
    }

    #[tokio::test]
    async fn test_inbound_messages_are_relayed() {
        let backend = Arc::new(MockBackend::default());
        let service = service_with(backend.clone(), "123:abc").await;
        service.start().await.unwrap();

        let sender = backend.inbound.lock().unwrap().clone().unwrap();
        sender.send(text_message("777", "ping")).unwrap();

        for _ in 0..50 {
            if !backend.transport.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            backend.transport.sent(),
            vec![("a".to_string(), "ping".to_string())]
        );
    }

    #[tokio::test]
    async fn test_bad_message_does_not_stop_the_loop() {
        let backend = Arc::new(MockBackend::default());
        let service = service_with(backend.clone(), "123:abc").await;
        service
            .settings
            .save([(CHAT_ID_RECEIVE, "111|222"), (CHAT_ID_SEND, "a")])
            .await
            .unwrap();
        service.start().await.unwrap();

        let sender = backend.inbound.lock().unwrap().clone().unwrap();
        // 222 has no send group
        sender.send(text_message("222", "lost")).unwrap();
        sender.send(text_message("111", "kept")).unwrap();

        for _ in 0..50 {
            if !backend.transport.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            backend.transport.sent(),
            vec![("a".to_string(), "kept".to_string())]
        );
        assert!(service.status().await.running);
    }

    #[tokio::test]
    async fn test_stop_then_start_reconnects() {
        let backend = Arc::new(MockBackend::default());
        let service = service_with(backend.clone(), "123:abc").await;

        service.start().await.unwrap();
        service.stop().await;
        assert!(!service.status().await.running);

        service.start().await.unwrap();
        assert_eq!(backend.connects.load(Ordering::SeqCst), 2);
        assert!(service.status().await.running);
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let backend = Arc::new(MockBackend::default());
        let service = service_with(backend, "123:abc").await;
        service.stop().await;
        assert!(!service.status().await.running);
    }
}
