use crate::config::MessageBrokerConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, ConnectionProperties, ExchangeKind,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Job queue used for capture requests and processing jobs. Payloads are
/// self-describing JSON; delivery is at-least-once, so consumers treat
/// duplicates as no-ops.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<()>;
}

/// RabbitMQ-backed job queue publishing to a durable topic exchange.
pub struct RabbitMqJobQueue {
    /// Connection pool
    pool: Pool,
    /// Configuration
    config: MessageBrokerConfig,
    /// Cached publish channel
    channel: Arc<Mutex<Option<Channel>>>,
}

impl RabbitMqJobQueue {
    /// Create a new job queue and declare the exchange
    pub async fn new(config: MessageBrokerConfig) -> Result<Self> {
        let pool_config = Config {
            url: Some(config.uri.clone()),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: Some(Duration::from_millis(config.timeout_ms)),
                    create: Some(Duration::from_millis(config.timeout_ms)),
                    recycle: Some(Duration::from_millis(config.timeout_ms)),
                },
            }),
            connection_properties: ConnectionProperties::default(),
        };
        let pool = pool_config.create_pool(Some(deadpool_lapin::Runtime::Tokio1))?;

        let queue = Self {
            pool,
            config,
            channel: Arc::new(Mutex::new(None)),
        };

        queue.init().await?;

        Ok(queue)
    }

    /// Declare the topic exchange all jobs are routed through
    async fn init(&self) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Queue(format!("Failed to declare exchange: {}", e)))?;

        info!("RabbitMQ job queue initialized");

        Ok(())
    }

    /// Get a connection from the pool with retry
    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        let mut attempts = 0;
        let max_attempts = self.config.retry_attempts;

        loop {
            attempts += 1;
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    if attempts >= max_attempts {
                        return Err(Error::Queue(format!(
                            "Failed to get RabbitMQ connection after {} attempts: {}",
                            attempts, err
                        ))
                        .into());
                    }

                    warn!(
                        "Failed to get RabbitMQ connection (attempt {}/{}): {}",
                        attempts, max_attempts, err
                    );

                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    /// Get the cached channel or open a new one
    async fn get_channel(&self) -> Result<Channel> {
        let mut channel_guard = self.channel.lock().await;

        if let Some(channel) = &*channel_guard {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let conn = self.get_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Queue(format!("Failed to create RabbitMQ channel: {}", e)))?;

        *channel_guard = Some(channel.clone());

        Ok(channel)
    }
}

#[async_trait]
impl JobQueue for RabbitMqJobQueue {
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<()> {
        let channel = self.get_channel().await?;

        let body = serde_json::to_vec(&payload)
            .map_err(|e| Error::Serialization(format!("Failed to serialize payload: {}", e)))?;

        channel
            .basic_publish(
                &self.config.exchange,
                topic,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| Error::Queue(format!("Failed to publish to {}: {}", topic, e)))?
            .await
            .map_err(|e| Error::Queue(format!("Publish to {} not confirmed: {}", topic, e)))?;

        debug!("Published job to {}", topic);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Test that we can publish to a live broker
    #[tokio::test]
    async fn test_enqueue_roundtrip() -> Result<()> {
        // Skip test if no RabbitMQ is available
        if std::env::var("TEST_RABBITMQ").is_err() {
            println!("Skipping RabbitMQ test. Set TEST_RABBITMQ=1 to run.");
            return Ok(());
        }

        let config = MessageBrokerConfig {
            exchange: format!("test.exchange.{}", uuid::Uuid::new_v4()),
            ..MessageBrokerConfig::default()
        };

        let queue = RabbitMqJobQueue::new(config.clone()).await?;
        queue
            .enqueue(
                &config.capture_topic,
                json!({"video": {"id": uuid::Uuid::new_v4()}}),
            )
            .await?;

        Ok(())
    }
}
