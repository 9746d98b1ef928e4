//! Redis-backed [`BarBus`].

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::debug;

use super::{BarBus, BusError, BusEvent, BusResult, Subscription, SUBSCRIPTION_BUFFER};

/// Publishes over a shared [`ConnectionManager`], which reconnects on its own;
/// a publish attempted while the link is down still surfaces as an error so
/// the caller can count it. Each subscription holds a dedicated connection,
/// since Redis parks pub/sub connections in subscriber mode.
pub struct RedisBus {
    client: Client,
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").finish_non_exhaustive()
    }
}

impl RedisBus {
    /// Connects to the broker at `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = Client::open(url).map_err(|e| BusError::Connection {
            message: format!("invalid broker url {}: {}", url, e),
        })?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Connection {
                message: format!("failed to connect to {}: {}", url, e),
            })?;
        debug!("Connected to broker at: {}", url);
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl BarBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> BusResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Publish {
                message: format!("PUBLISH {} failed: {}", channel, e),
            })?;
        Ok(())
    }

    async fn subscribe_pattern(&self, pattern: &str) -> BusResult<Subscription> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BusError::Subscribe {
                message: format!("failed to open subscriber connection: {}", e),
            })?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| BusError::Subscribe {
                message: format!("PSUBSCRIBE {} failed: {}", pattern, e),
            })?;

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let event = BusEvent {
                    channel: msg.get_channel_name().to_string(),
                    payload: msg.get_payload_bytes().to_vec(),
                };
                if sender.send(event).await.is_err() {
                    // subscriber dropped, tear the connection down
                    break;
                }
            }
        });
        Ok(Subscription::new(pattern.to_string(), receiver))
    }
}
