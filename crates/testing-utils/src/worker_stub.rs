//! 模拟Worker池
//!
//! 从请求队列取出任务，记录收到的 `WorkItem`，然后按 `reply_to`
//! （或固定路由键）发布响应。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use classifier_config::BrokerConfig;
use classifier_domain::{
    BrokerTopology, BrokerTransport, ClassifierError, ExchangeKind, PublishProperties,
    QueueBinding, WorkItem,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type ReplyFn = Arc<dyn Fn(&WorkItem) -> String + Send + Sync>;

/// 响应发往哪里
#[derive(Debug, Clone)]
pub enum ReplyRoute {
    /// 使用请求消息的 reply_to 作为路由键
    ReplyTo,
    /// 固定路由键，忽略 reply_to
    Fixed(String),
}

pub struct WorkerStub {
    transport: Arc<dyn BrokerTransport>,
    exchange: String,
    request_binding: QueueBinding,
    reply: ReplyFn,
    route: ReplyRoute,
    echo_correlation_id: bool,
    delay: Duration,
}

impl WorkerStub {
    pub fn new(transport: Arc<dyn BrokerTransport>, config: &BrokerConfig) -> Self {
        Self {
            transport,
            exchange: config.exchange.clone(),
            request_binding: QueueBinding::durable(
                &config.request_queue,
                &config.request_routing_key,
            ),
            reply: Arc::new(|_| "class=1".to_string()),
            route: ReplyRoute::ReplyTo,
            echo_correlation_id: true,
            delay: Duration::ZERO,
        }
    }

    pub fn with_reply<F>(mut self, reply: F) -> Self
    where
        F: Fn(&WorkItem) -> String + Send + Sync + 'static,
    {
        self.reply = Arc::new(reply);
        self
    }

    pub fn with_route(mut self, route: ReplyRoute) -> Self {
        self.route = route;
        self
    }

    /// 不回传关联ID，模拟只认固定响应队列的旧Worker
    pub fn without_correlation_id(mut self) -> Self {
        self.echo_correlation_id = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 声明请求队列后在后台开始处理
    pub async fn spawn(self) -> Result<WorkerStubHandle, ClassifierError> {
        let topology = BrokerTopology::new(&self.exchange, ExchangeKind::Direct)
            .with_binding(self.request_binding.clone());
        self.transport.declare_topology(&topology).await?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let received = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let received = Arc::clone(&received);
            tokio::spawn(async move { self.run(shutdown_rx, received).await })
        };

        Ok(WorkerStubHandle {
            shutdown_tx,
            received,
            task,
        })
    }

    async fn run(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
        received: Arc<Mutex<Vec<WorkItem>>>,
    ) {
        loop {
            let delivery = tokio::select! {
                delivery = self
                    .transport
                    .consume_one(&self.request_binding.queue, Duration::from_millis(100)) => delivery,
                _ = shutdown_rx.recv() => break,
            };

            let message = match delivery {
                Ok(message) => message,
                Err(ClassifierError::Timeout(_)) => continue,
                Err(e) => {
                    debug!("模拟Worker读取请求失败: {}", e);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    continue;
                }
            };

            let item = match WorkItem::from_wire(&message.body) {
                Ok(item) => item,
                Err(e) => {
                    warn!("模拟Worker收到无效任务: {}", e);
                    continue;
                }
            };
            if let Ok(mut items) = received.lock() {
                items.push(item.clone());
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let routing_key = match &self.route {
                ReplyRoute::ReplyTo => match message.reply_to {
                    Some(reply_to) => reply_to,
                    None => continue,
                },
                ReplyRoute::Fixed(key) => key.clone(),
            };
            let properties = PublishProperties {
                correlation_id: if self.echo_correlation_id {
                    message.correlation_id
                } else {
                    None
                },
                reply_to: None,
                persistent: false,
            };
            let payload = (self.reply)(&item);
            if let Err(e) = self
                .transport
                .publish(&self.exchange, &routing_key, payload.as_bytes(), &properties)
                .await
            {
                warn!("模拟Worker发布响应失败: {}", e);
            }
        }
    }
}

/// 运行中的模拟Worker
pub struct WorkerStubHandle {
    shutdown_tx: broadcast::Sender<()>,
    received: Arc<Mutex<Vec<WorkItem>>>,
    task: JoinHandle<()>,
}

impl WorkerStubHandle {
    /// 迄今收到的任务
    pub fn received(&self) -> Vec<WorkItem> {
        self.received
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}
