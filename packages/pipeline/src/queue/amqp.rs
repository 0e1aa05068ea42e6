use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};

use super::{Delivery, DeliveryHandler, DeliverySettle, MessageBroker};
use crate::error::QueueError;

/// A durable direct exchange with one durable queue per routing key,
/// matching the RabbitMQ topology `talos.util.queue_helpers` declares
/// on startup (`exchange.exchange_declare` / `channel.queue_declare` +
/// `queue_bind`, both `durable=True`).
pub struct AmqpBroker {
    channel: lapin::Channel,
    _connection: Connection,
    declared_queues: HashSet<String>,
}

impl AmqpBroker {
    pub async fn connect(
        amqp_url: &str,
        exchange: &str,
        queues: &[String],
    ) -> Result<Self, QueueError> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .map_err(QueueError::from)?;
        let channel = connection.create_channel().await.map_err(QueueError::from)?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::from)?;

        for queue in queues {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(QueueError::from)?;

            channel
                .queue_bind(
                    queue,
                    exchange,
                    queue,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(QueueError::from)?;
        }

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(QueueError::from)?;

        Ok(Self {
            channel,
            _connection: connection,
            declared_queues: queues.iter().cloned().collect(),
        })
    }

    fn check_declared(&self, queue: &str) -> Result<(), QueueError> {
        if self.declared_queues.contains(queue) {
            Ok(())
        } else {
            Err(QueueError::UnknownQueue(queue.to_string()))
        }
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.check_declared(queue)?;
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(QueueError::from)?
            .await
            .map_err(QueueError::from)?;
        Ok(())
    }

    async fn consume_one(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        self.check_declared(queue)?;
        let got = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(QueueError::from)?;

        Ok(got.map(|message| Delivery {
            payload: message.data.clone(),
            settle: DeliverySettle::Amqp(message),
        }))
    }

    async fn consume_forever(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), QueueError> {
        self.check_declared(queue)?;
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                "pipeline-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(QueueError::from)?;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery.map_err(QueueError::from)?;
            let payload = delivery.data.clone();

            match handler.handle(payload).await {
                Ok(()) => {
                    delivery
                        .ack(BasicAckOptions::default())
                        .await
                        .map_err(QueueError::from)?;
                }
                Err(err) => {
                    tracing::warn!(error = %err, queue, "handler failed, nack-requeueing");
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await
                        .map_err(QueueError::from)?;
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}
