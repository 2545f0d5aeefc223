//! RabbitMQ gateway (AMQP 0-9-1 via lapin)

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{info, warn};

use super::{Acknowledger, InboundMessage, MessageSource, NoticePublisher, QueueError, Result};
use crate::config::{InboundConfig, OutboundConfig};
use crate::job::Job;

/// One unacknowledged delivery at a time; the staging directory is not shareable
const PREFETCH: u16 = 1;

/// AMQP `delivery_mode` for messages that survive a broker restart
const PERSISTENT: u8 = 2;

const REPLY_SUCCESS: u16 = 200;

/// Broker connections and channels, owned for the worker's lifetime
pub struct AmqpGateway {
    inbound: Connection,
    /// Present only when notices go to a different broker
    outbound: Option<Connection>,
    consume_channel: Channel,
    publish_channel: Channel,
    inbound_config: InboundConfig,
    outbound_config: OutboundConfig,
}

impl AmqpGateway {
    /// Open the inbound connection (and the outbound one if it differs) and
    /// limit the consuming channel to a single unacknowledged delivery
    pub async fn connect(inbound: &InboundConfig, outbound: &OutboundConfig) -> Result<Self> {
        let inbound_url = inbound
            .url
            .as_deref()
            .ok_or(QueueError::MissingUrl("inbound"))?;

        info!("Connecting to RabbitMQ");
        let inbound_conn = Connection::connect(inbound_url, ConnectionProperties::default()).await?;
        let consume_channel = inbound_conn.create_channel().await?;
        consume_channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await?;

        let (outbound_conn, publish_channel) = match outbound.url.as_deref() {
            Some(url) if url != inbound_url => {
                info!("Connecting to outbound RabbitMQ");
                let conn = Connection::connect(url, ConnectionProperties::default()).await?;
                let channel = conn.create_channel().await?;
                (Some(conn), channel)
            }
            _ => (None, inbound_conn.create_channel().await?),
        };
        // Notices are only reported as published once the broker confirms them
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        info!(prefetch = PREFETCH, "Connection to RabbitMQ established");

        Ok(Self {
            inbound: inbound_conn,
            outbound: outbound_conn,
            consume_channel,
            publish_channel,
            inbound_config: inbound.clone(),
            outbound_config: outbound.clone(),
        })
    }

    /// Check the inbound queue exists and declare the outbound exchange,
    /// queue and binding
    pub async fn assert_topology(&self) -> Result<()> {
        let inbound = &self.inbound_config;
        let outbound = &self.outbound_config;

        info!(queue = %inbound.queue, "Checking inbound queue");
        self.consume_channel
            .queue_declare(
                &inbound.queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!(queue = %inbound.queue, "Inbound queue confirmed");

        info!(exchange = %outbound.exchange, "Asserting outbound exchange");
        self.publish_channel
            .exchange_declare(
                &outbound.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %outbound.queue, "Asserting outbound queue");
        self.publish_channel
            .queue_declare(
                &outbound.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %outbound.queue,
            exchange = %outbound.exchange,
            routing_key = %outbound.routing_key,
            "Binding outbound queue to exchange"
        );
        self.publish_channel
            .queue_bind(
                &outbound.queue,
                &outbound.exchange,
                &outbound.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!("Topology asserted");

        Ok(())
    }

    /// Start consuming the inbound queue
    pub async fn consume(&self) -> Result<AmqpSource> {
        let consumer = self
            .consume_channel
            .basic_consume(
                &self.inbound_config.queue,
                &self.inbound_config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.inbound_config.queue, "Awaiting messages");
        Ok(AmqpSource { consumer })
    }

    pub fn publisher(&self) -> AmqpPublisher {
        AmqpPublisher {
            channel: self.publish_channel.clone(),
            exchange: self.outbound_config.exchange.clone(),
            routing_key: self.outbound_config.routing_key.clone(),
        }
    }

    /// Close all connections; errors are logged, the worker is stopping anyway
    pub async fn close(self) {
        if let Err(e) = self.inbound.close(REPLY_SUCCESS, "worker shutdown").await {
            warn!(error = %e, "Failed to close inbound connection");
        }

        if let Some(outbound) = self.outbound {
            if let Err(e) = outbound.close(REPLY_SUCCESS, "worker shutdown").await {
                warn!(error = %e, "Failed to close outbound connection");
            }
        }

        info!("RabbitMQ connections closed");
    }
}

/// Inbound consumer
pub struct AmqpSource {
    consumer: Consumer,
}

#[async_trait]
impl MessageSource for AmqpSource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(e.into())),
        };

        let acker = AmqpAcker {
            acker: delivery.acker,
        };
        Some(Ok(InboundMessage::new(
            delivery.data,
            delivery.redelivered,
            Box::new(acker),
        )))
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}

/// Publishes completion notices to the outbound exchange
#[derive(Clone)]
pub struct AmqpPublisher {
    channel: Channel,
    exchange: String,
    routing_key: String,
}

#[async_trait]
impl NoticePublisher for AmqpPublisher {
    async fn publish(&self, job: &Job) -> Result<()> {
        let payload = job.to_notice()?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);

        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;

        confirmed(&self.exchange, confirmation)
    }
}

fn confirmed(exchange: &str, confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(QueueError::Rejected(exchange.to_string())),
        Confirmation::NotRequested => Err(QueueError::Closed(
            "publisher confirms are not enabled on the notice channel".to_string(),
        )),
    }
}
