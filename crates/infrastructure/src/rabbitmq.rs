use std::time::Duration;

use async_trait::async_trait;
use classifier_domain::{
    BrokerMessage, BrokerTopology, BrokerTransport, ExchangeKind, MessageHandler,
    PublishProperties, QueueBinding,
};
use classifier_errors::{ClassifierError, ClassifierResult};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::*,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const PRECONDITION_FAILED: u16 = 406;

/// 基于lapin的RabbitMQ传输实现
///
/// 每次操作建立独立的连接和通道，操作结束（包括调用方被取消）时关闭。
pub struct RabbitMqTransport {
    url: String,
    connection_timeout: Duration,
}

impl RabbitMqTransport {
    pub fn new(url: impl Into<String>, connection_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connection_timeout,
        }
    }

    /// 建立连接并创建通道
    async fn open_session(&self) -> ClassifierResult<BrokerSession> {
        let connect = Connection::connect(&self.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(self.connection_timeout, connect)
            .await
            .map_err(|_| {
                ClassifierError::broker_unavailable(format!(
                    "连接RabbitMQ超时 ({:?})",
                    self.connection_timeout
                ))
            })?
            .map_err(|e| ClassifierError::broker_unavailable(format!("连接RabbitMQ失败: {e}")))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(200, "创建通道失败").await;
                return Err(ClassifierError::broker_unavailable(format!(
                    "创建通道失败: {e}"
                )));
            }
        };

        debug!("已建立RabbitMQ会话");
        Ok(BrokerSession {
            connection: Some(connection),
            channel,
        })
    }

    async fn declare_exchange(
        channel: &Channel,
        topology: &BrokerTopology,
    ) -> ClassifierResult<()> {
        channel
            .exchange_declare(
                &topology.exchange,
                lapin_exchange_kind(topology.kind),
                ExchangeDeclareOptions {
                    durable: topology.exchange_durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                    passive: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                map_channel_error(&e, format!("声明交换机 {} 失败", topology.exchange))
            })?;

        debug!("交换机 {} 声明成功", topology.exchange);
        Ok(())
    }

    async fn declare_binding(
        channel: &Channel,
        exchange: &str,
        binding: &QueueBinding,
    ) -> ClassifierResult<()> {
        let mut arguments = FieldTable::default();
        if let Some(expires) = binding.expires {
            let millis = u32::try_from(expires.as_millis()).unwrap_or(u32::MAX);
            arguments.insert(ShortString::from("x-expires"), AMQPValue::LongUInt(millis));
        }

        channel
            .queue_declare(
                &binding.queue,
                QueueDeclareOptions {
                    durable: binding.durable,
                    exclusive: false,
                    auto_delete: binding.auto_delete,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| map_channel_error(&e, format!("声明队列 {} 失败", binding.queue)))?;

        channel
            .queue_bind(
                &binding.queue,
                exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                map_channel_error(
                    &e,
                    format!(
                        "绑定队列 {} 到 {} ({}) 失败",
                        binding.queue, exchange, binding.routing_key
                    ),
                )
            })?;

        debug!(
            "队列 {} 已绑定到 {} (routing_key: {})",
            binding.queue, exchange, binding.routing_key
        );
        Ok(())
    }

    /// 在已有会话上声明拓扑
    async fn declare_on(channel: &Channel, topology: &BrokerTopology) -> ClassifierResult<()> {
        Self::declare_exchange(channel, topology).await?;
        for binding in &topology.bindings {
            Self::declare_binding(channel, &topology.exchange, binding).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerTransport for RabbitMqTransport {
    async fn declare_topology(&self, topology: &BrokerTopology) -> ClassifierResult<()> {
        let session = self.open_session().await?;
        let result = Self::declare_on(&session.channel, topology).await;
        session.close().await;

        if result.is_ok() {
            info!(
                "拓扑声明完成: 交换机 {}，{} 个队列",
                topology.exchange,
                topology.bindings.len()
            );
        }
        result
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> ClassifierResult<()> {
        let session = self.open_session().await?;
        let result = publish_on(&session.channel, exchange, routing_key, payload, properties).await;
        session.close().await;

        if result.is_ok() {
            debug!("消息已发布到 {} (routing_key: {})", exchange, routing_key);
        }
        result
    }

    async fn consume_one(&self, queue: &str, timeout: Duration) -> ClassifierResult<BrokerMessage> {
        let session = self.open_session().await?;
        let result = consume_one_on(&session.channel, queue, timeout).await;
        session.close().await;
        result
    }

    async fn consume_session(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        stop: &mut broadcast::Receiver<()>,
    ) -> ClassifierResult<()> {
        let session = self.open_session().await?;
        let mut consumer = session
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ClassifierError::broker_unavailable(format!("订阅队列 {queue} 失败: {e}"))
            })?;

        info!("开始消费队列: {}", queue);

        let result = loop {
            tokio::select! {
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => {
                        let message = acknowledge(delivery).await?;
                        if let Err(e) = handler.handle(message).await {
                            warn!("处理队列 {} 的消息失败: {}", queue, e);
                        }
                    }
                    Some(Err(e)) => {
                        break Err(ClassifierError::broker_unavailable(format!(
                            "队列 {queue} 的消费连接中断: {e}"
                        )));
                    }
                    None => {
                        break Err(ClassifierError::broker_unavailable(format!(
                            "队列 {queue} 的消费者已被关闭"
                        )));
                    }
                },
                _ = stop.recv() => break Ok(()),
            }
        };

        session.close().await;
        result
    }
}

async fn publish_on(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
    properties: &PublishProperties,
) -> ClassifierResult<()> {
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| ClassifierError::broker_unavailable(format!("开启发布确认失败: {e}")))?;

    let mut amqp_properties = BasicProperties::default();
    if properties.persistent {
        amqp_properties = amqp_properties.with_delivery_mode(2);
    }
    if let Some(correlation_id) = &properties.correlation_id {
        amqp_properties = amqp_properties.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(reply_to) = &properties.reply_to {
        amqp_properties = amqp_properties.with_reply_to(ShortString::from(reply_to.clone()));
    }

    let confirm = channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            payload,
            amqp_properties,
        )
        .await
        .map_err(|e| map_channel_error(&e, format!("发布消息到 {exchange} 失败")))?;

    confirm
        .await
        .map_err(|e| ClassifierError::broker_unavailable(format!("消息发布确认失败: {e}")))?;

    Ok(())
}

async fn consume_one_on(
    channel: &Channel,
    queue: &str,
    timeout: Duration,
) -> ClassifierResult<BrokerMessage> {
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .map_err(|e| ClassifierError::broker_unavailable(format!("设置预取数量失败: {e}")))?;

    let mut consumer = channel
        .basic_consume(
            queue,
            "",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| ClassifierError::broker_unavailable(format!("订阅队列 {queue} 失败: {e}")))?;

    match tokio::time::timeout(timeout, consumer.next()).await {
        Ok(Some(Ok(delivery))) => acknowledge(delivery).await,
        Ok(Some(Err(e))) => Err(ClassifierError::broker_unavailable(format!(
            "从队列 {queue} 接收消息失败: {e}"
        ))),
        Ok(None) => Err(ClassifierError::broker_unavailable(format!(
            "队列 {queue} 的消费者已被关闭"
        ))),
        Err(_) => Err(ClassifierError::timeout(format!(
            "队列 {queue} 在 {timeout:?} 内没有消息"
        ))),
    }
}

/// 收到即确认，然后转换为领域消息
async fn acknowledge(delivery: Delivery) -> ClassifierResult<BrokerMessage> {
    delivery
        .ack(BasicAckOptions::default())
        .await
        .map_err(|e| ClassifierError::broker_unavailable(format!("确认消息失败: {e}")))?;

    Ok(BrokerMessage {
        correlation_id: delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string()),
        reply_to: delivery
            .properties
            .reply_to()
            .as_ref()
            .map(|to| to.as_str().to_string()),
        body: delivery.data,
    })
}

/// 参数不兼容的重复声明会得到 PRECONDITION_FAILED (406)
fn map_channel_error(error: &lapin::Error, context: String) -> ClassifierError {
    let message = format!("{context}: {error}");
    match error.kind() {
        lapin::ErrorKind::ProtocolError(amqp_error)
            if amqp_error.get_id() == PRECONDITION_FAILED =>
        {
            ClassifierError::TopologyConflict(message)
        }
        _ => ClassifierError::BrokerUnavailable(message),
    }
}

fn lapin_exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
    }
}

/// 一次操作独占的连接和通道
struct BrokerSession {
    connection: Option<Connection>,
    channel: Channel,
}

impl BrokerSession {
    async fn close(mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "正常关闭").await {
                debug!("关闭RabbitMQ连接失败: {}", e);
            }
        }
    }
}

impl Drop for BrokerSession {
    // 调用方的future被取消时连接仍会被关闭
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = connection.close(200, "操作已取消").await;
                });
            }
        }
    }
}
