//! Message broker access.
//!
//! Jobs are pulled one at a time with manual acknowledgment and completion
//! events are published with publisher confirms. The AMQP implementation
//! talks to RabbitMQ through `lapin`.

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::models::CompletionEvent;
use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicRejectOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info};

/// An in-flight message.
///
/// Settling consumes the value, so each delivery is acknowledged or
/// rejected exactly once.
#[derive(Debug)]
pub struct Delivery {
    /// Broker-assigned delivery tag.
    pub tag: u64,
    pub body: Vec<u8>,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
}

/// Source of jobs.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Non-blocking fetch of the next message, if any.
    async fn fetch(&self) -> Result<Option<Delivery>, BrokerError>;

    /// Mark the message as processed.
    async fn ack(&self, delivery: Delivery) -> Result<(), BrokerError>;

    /// Give the message back: for redelivery when `requeue`, discarded otherwise.
    async fn reject(&self, delivery: Delivery, requeue: bool) -> Result<(), BrokerError>;
}

/// Downstream notification of finished jobs.
#[async_trait]
pub trait CompletionPublisher: Send + Sync {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), BrokerError>;
}

/// RabbitMQ connection with one channel.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    queue: String,
    completion_exchange: String,
    completion_routing_key: String,
}

impl AmqpBroker {
    /// Connect, enable publisher confirms, and declare the job queue.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        info!("Connecting to RabbitMQ at {}:{}", config.host, config.port);

        let connection = Connection::connect(&config.uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: config.durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        debug!("Declared queue {} (durable: {})", config.queue, config.durable);

        Ok(Self {
            connection,
            channel,
            queue: config.queue.clone(),
            completion_exchange: config.completion_exchange.clone(),
            completion_routing_key: config.completion_routing_key.clone(),
        })
    }

    /// Close the connection cleanly.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection.close(200, "OK").await?;
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for AmqpBroker {
    async fn fetch(&self) -> Result<Option<Delivery>, BrokerError> {
        if !self.channel.status().connected() {
            return Err(BrokerError::Unavailable("channel closed".to_string()));
        }

        let message = self
            .channel
            .basic_get(&self.queue, BasicGetOptions { no_ack: false })
            .await?;

        Ok(message.map(|message| Delivery {
            tag: message.delivery.delivery_tag,
            redelivered: message.delivery.redelivered,
            body: message.delivery.data,
        }))
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery.tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn reject(&self, delivery: Delivery, requeue: bool) -> Result<(), BrokerError> {
        if requeue {
            self.channel
                .basic_reject(delivery.tag, BasicRejectOptions { requeue: true })
                .await?;
        } else {
            self.channel
                .basic_nack(
                    delivery.tag,
                    BasicNackOptions {
                        multiple: false,
                        requeue: false,
                    },
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionPublisher for AmqpBroker {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(event)?;

        let confirmation = self
            .channel
            .basic_publish(
                &self.completion_exchange,
                &self.completion_routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::Nacked {
                routing_key: self.completion_routing_key.clone(),
            });
        }

        debug!(
            "Published completion for {} to {:?}",
            event.repo_id, self.completion_routing_key
        );
        Ok(())
    }
}
