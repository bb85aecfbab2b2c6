//! Relay client: publish/subscribe over per-room channels
//!
//! The relay delivers events at-least-once, in no guaranteed order, and only
//! to currently-subscribed listeners. Everything built on top of it must
//! tolerate loss, duplication, and reordering.

use crate::error::{DuelError, Result};
use crate::relay::messages::{RelayEnvelope, MATCHMAKING_EVENTS_EXCHANGE, RACE_EVENTS_EXCHANGE};
use amqprs::{
    channel::{
        BasicConsumeArguments, BasicPublishArguments, Channel, ExchangeDeclareArguments,
        QueueBindArguments, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// Stream of envelopes delivered to a subscriber
pub type EventStream = Pin<Box<dyn Stream<Item = RelayEnvelope> + Send>>;

/// Publish/subscribe boundary to the event relay
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Publish a named event with a JSON payload to a channel.
    ///
    /// Best-effort: the relay offers no acknowledgment suitable for blocking
    /// on, so callers log failures and carry on.
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()>;

    /// Subscribe to a channel. Only events published after subscription are
    /// delivered.
    async fn subscribe(&self, channel: &str) -> Result<EventStream>;
}

/// AMQP-backed relay client.
///
/// Channels map to routing-key prefixes on a topic exchange; a subscriber
/// gets an exclusive server-named queue bound to `{channel}.*`.
pub struct AmqpRelayClient {
    channel: Channel,
    /// Correlation ids already published, so an at-least-once retry upstream
    /// does not fan out twice
    published: StdMutex<std::collections::HashSet<String>>,
}

impl AmqpRelayClient {
    pub async fn new(channel: Channel) -> Result<Self> {
        for exchange in [RACE_EVENTS_EXCHANGE, MATCHMAKING_EVENTS_EXCHANGE] {
            let args = ExchangeDeclareArguments::new(exchange, "topic");
            channel.exchange_declare(args).await.map_err(|e| {
                DuelError::RelayError {
                    message: format!("Failed to declare exchange '{}': {}", exchange, e),
                }
            })?;
        }

        Ok(Self {
            channel,
            published: StdMutex::new(std::collections::HashSet::new()),
        })
    }

    /// Matchmaking notifications travel on their own exchange; everything
    /// else is a race event.
    fn exchange_for(channel: &str) -> &'static str {
        if channel.starts_with("matchmaking-") {
            MATCHMAKING_EVENTS_EXCHANGE
        } else {
            RACE_EVENTS_EXCHANGE
        }
    }

    fn routing_key(channel: &str, event: &str) -> String {
        format!("{}.{}", channel, event)
    }
}

#[async_trait]
impl RelayClient for AmqpRelayClient {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        let envelope = RelayEnvelope::new(channel.to_string(), event.to_string(), payload);

        {
            let mut published = self
                .published
                .lock()
                .map_err(|_| DuelError::InternalError {
                    message: "Failed to acquire publish dedup lock".to_string(),
                })?;
            if !published.insert(envelope.correlation_id.clone()) {
                debug!("Envelope {} already published, skipping", envelope.correlation_id);
                return Ok(());
            }
        }

        let body = envelope.to_bytes()?;
        let args = BasicPublishArguments::new(
            Self::exchange_for(channel),
            &Self::routing_key(channel, event),
        );
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, body, args)
            .await
            .map_err(|e| {
                DuelError::RelayError {
                    message: format!("Failed to publish '{}' on '{}': {}", event, channel, e),
                }
                .into()
            })
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream> {
        let declare = QueueDeclareArguments::exclusive_server_named();
        let (queue_name, _, _) = self
            .channel
            .queue_declare(declare)
            .await
            .map_err(|e| DuelError::RelayError {
                message: format!("Failed to declare subscriber queue: {}", e),
            })?
            .ok_or_else(|| DuelError::RelayError {
                message: "Broker returned no queue for subscription".to_string(),
            })?;

        let bind = QueueBindArguments::new(
            &queue_name,
            Self::exchange_for(channel),
            &format!("{}.*", channel),
        );
        self.channel
            .queue_bind(bind)
            .await
            .map_err(|e| DuelError::RelayError {
                message: format!("Failed to bind subscriber queue: {}", e),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer_tag = format!("relay-sub-{}", uuid::Uuid::new_v4());
        let args = BasicConsumeArguments::new(&queue_name, &consumer_tag)
            .auto_ack(true)
            .finish();

        self.channel
            .basic_consume(EnvelopeConsumer { tx }, args)
            .await
            .map_err(|e| DuelError::RelayError {
                message: format!("Failed to start subscriber consumer: {}", e),
            })?;

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Internal consumer forwarding deliveries into the subscriber stream
struct EnvelopeConsumer {
    tx: mpsc::UnboundedSender<RelayEnvelope>,
}

#[async_trait]
impl AsyncConsumer for EnvelopeConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        match RelayEnvelope::from_bytes(&content) {
            Ok(envelope) => {
                // A closed receiver means the subscriber went away; the
                // relay contract says undelivered events are simply lost
                let _ = self.tx.send(envelope);
            }
            Err(e) => {
                warn!(
                    "Dropping malformed relay delivery (routing key '{}'): {}",
                    deliver.routing_key(),
                    e
                );
            }
        }
    }
}

/// In-process relay for tests and the race-tester binary.
///
/// Mirrors the broker contract: fan-out to current subscribers only, no
/// replay, no ordering promise between publishers.
#[derive(Default)]
pub struct InMemoryRelay {
    channels: StdMutex<HashMap<String, broadcast::Sender<RelayEnvelope>>>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> Result<broadcast::Sender<RelayEnvelope>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| DuelError::InternalError {
                message: "Failed to acquire relay channel lock".to_string(),
            })?;
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone())
    }
}

#[async_trait]
impl RelayClient for InMemoryRelay {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        let envelope = RelayEnvelope::new(channel.to_string(), event.to_string(), payload);
        let sender = self.sender_for(channel)?;
        // No subscribers is not an error: delivery is only to current listeners
        let _ = sender.send(envelope);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream> {
        let receiver = self.sender_for(channel)?.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }
}
