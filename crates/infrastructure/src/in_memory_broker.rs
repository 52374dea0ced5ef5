use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use classifier_domain::{
    BrokerMessage, BrokerTopology, BrokerTransport, ExchangeKind, MessageHandler,
    PublishProperties, QueueBinding,
};
use classifier_errors::{ClassifierError, ClassifierResult};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

/// 进程内消息代理
///
/// 与 `RabbitMqTransport` 遵循相同的约定，用于嵌入式运行和测试。
/// 支持direct/fanout/topic路由、声明冲突检测，以及模拟代理故障。
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    available: AtomicBool,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
}

#[derive(Debug)]
struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    /// (路由键, 队列名)
    bindings: Vec<(String, String)>,
}

#[derive(Debug)]
struct QueueState {
    declaration: QueueBinding,
    messages: VecDeque<BrokerMessage>,
    notify: Arc<Notify>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        info!("创建进程内消息代理");
        Self {
            state: Mutex::new(BrokerState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// 模拟代理宕机或恢复；宕机期间所有操作返回 `BrokerUnavailable`，
    /// 正在进行的消费会话立即断开
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            info!("进程内消息代理已恢复");
        } else {
            warn!("进程内消息代理进入故障模式");
            for queue in self.lock().queues.values() {
                queue.notify.notify_waiters();
            }
        }
    }

    /// 模拟代理重启：非持久的交换机和队列连同其中的消息一起丢失，
    /// 持久队列保留但失去与已删除交换机的绑定
    pub fn restart(&self) {
        let mut state = self.lock();
        state.exchanges.retain(|_, exchange| exchange.durable);

        let lost: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, queue)| !queue.declaration.durable)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &lost {
            if let Some(queue) = state.queues.remove(name) {
                queue.notify.notify_waiters();
            }
        }
        for exchange in state.exchanges.values_mut() {
            exchange.bindings.retain(|(_, bound)| !lost.contains(bound));
        }

        warn!("进程内消息代理已重启，丢失 {} 个非持久队列", lost.len());
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// 队列中尚未被消费的消息数
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|q| q.messages.len())
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // 锁内没有会panic的操作，中毒时继续使用内部数据
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> ClassifierResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ClassifierError::broker_unavailable("进程内消息代理不可用"))
        }
    }

    fn queue_notify(&self, queue: &str) -> ClassifierResult<Arc<Notify>> {
        self.ensure_available()?;
        self.lock()
            .queues
            .get(queue)
            .map(|q| Arc::clone(&q.notify))
            .ok_or_else(|| {
                ClassifierError::broker_unavailable(format!("队列 {queue} 不存在 (NOT_FOUND)"))
            })
    }

    fn try_pop(&self, queue: &str) -> ClassifierResult<Option<BrokerMessage>> {
        self.ensure_available()?;
        let mut state = self.lock();
        let queue_state = state.queues.get_mut(queue).ok_or_else(|| {
            ClassifierError::broker_unavailable(format!("队列 {queue} 不存在 (NOT_FOUND)"))
        })?;
        Ok(queue_state.messages.pop_front())
    }

    /// 等待队列中的下一条消息
    async fn next_delivery(&self, queue: &str) -> ClassifierResult<BrokerMessage> {
        loop {
            let notify = self.queue_notify(queue)?;
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_pop(queue)? {
                return Ok(message);
            }
            notified.await;
        }
    }

    /// auto_delete 队列在消费者离开后删除
    fn release_consumer(&self, queue: &str) {
        let mut state = self.lock();
        let auto_delete = state
            .queues
            .get(queue)
            .map(|q| q.declaration.auto_delete)
            .unwrap_or(false);

        if auto_delete {
            state.queues.remove(queue);
            for exchange in state.exchanges.values_mut() {
                exchange.bindings.retain(|(_, bound)| bound != queue);
            }
            debug!("自动删除队列: {}", queue);
        }
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn declare_topology(&self, topology: &BrokerTopology) -> ClassifierResult<()> {
        self.ensure_available()?;
        let mut state = self.lock();

        // 先检查全部冲突，保证失败时不留下部分声明
        if let Some(existing) = state.exchanges.get(&topology.exchange) {
            if existing.kind != topology.kind || existing.durable != topology.exchange_durable {
                return Err(ClassifierError::topology_conflict(format!(
                    "交换机 {} 已以不同参数声明 (PRECONDITION_FAILED)",
                    topology.exchange
                )));
            }
        }
        for binding in &topology.bindings {
            if let Some(existing) = state.queues.get(&binding.queue) {
                if !existing.declaration.is_compatible_with(binding) {
                    return Err(ClassifierError::topology_conflict(format!(
                        "队列 {} 已以不同参数声明 (PRECONDITION_FAILED)",
                        binding.queue
                    )));
                }
            }
        }

        for binding in &topology.bindings {
            state
                .queues
                .entry(binding.queue.clone())
                .or_insert_with(|| QueueState {
                    declaration: binding.clone(),
                    messages: VecDeque::new(),
                    notify: Arc::new(Notify::new()),
                });
        }

        let exchange = state
            .exchanges
            .entry(topology.exchange.clone())
            .or_insert_with(|| ExchangeState {
                kind: topology.kind,
                durable: topology.exchange_durable,
                bindings: Vec::new(),
            });
        for binding in &topology.bindings {
            let entry = (binding.routing_key.clone(), binding.queue.clone());
            if !exchange.bindings.contains(&entry) {
                exchange.bindings.push(entry);
            }
        }

        debug!(
            "拓扑声明完成: 交换机 {}，{} 个队列",
            topology.exchange,
            topology.bindings.len()
        );
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> ClassifierResult<()> {
        self.ensure_available()?;
        let mut state = self.lock();

        let exchange_state = state.exchanges.get(exchange).ok_or_else(|| {
            ClassifierError::broker_unavailable(format!("交换机 {exchange} 不存在 (NOT_FOUND)"))
        })?;

        let mut targets: Vec<String> = Vec::new();
        for (key, queue) in &exchange_state.bindings {
            let matched = match exchange_state.kind {
                ExchangeKind::Direct => key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(key, routing_key),
            };
            if matched && !targets.contains(queue) {
                targets.push(queue.clone());
            }
        }

        if targets.is_empty() {
            debug!(
                "交换机 {} 上没有队列绑定路由键 {}，消息被丢弃",
                exchange, routing_key
            );
            return Ok(());
        }

        let message = BrokerMessage {
            body: payload.to_vec(),
            correlation_id: properties.correlation_id.clone(),
            reply_to: properties.reply_to.clone(),
        };
        for queue in targets {
            if let Some(queue_state) = state.queues.get_mut(&queue) {
                queue_state.messages.push_back(message.clone());
                queue_state.notify.notify_waiters();
            }
        }

        Ok(())
    }

    async fn consume_one(&self, queue: &str, timeout: Duration) -> ClassifierResult<BrokerMessage> {
        let result = match tokio::time::timeout(timeout, self.next_delivery(queue)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::timeout(format!(
                "队列 {queue} 在 {timeout:?} 内没有消息"
            ))),
        };
        self.release_consumer(queue);
        result
    }

    async fn consume_session(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        stop: &mut broadcast::Receiver<()>,
    ) -> ClassifierResult<()> {
        self.queue_notify(queue)?;
        debug!("开始消费队列: {}", queue);

        let result = loop {
            tokio::select! {
                delivery = self.next_delivery(queue) => match delivery {
                    Ok(message) => {
                        if let Err(e) = handler.handle(message).await {
                            warn!("处理队列 {} 的消息失败: {}", queue, e);
                        }
                    }
                    Err(e) => break Err(e),
                },
                _ = stop.recv() => break Ok(()),
            }
        };

        self.release_consumer(queue);
        result
    }
}

/// AMQP topic匹配：`*` 匹配一个单词，`#` 匹配零个或多个单词
fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn classifier_topology() -> BrokerTopology {
        BrokerTopology::new("direct_logs", ExchangeKind::Direct)
            .with_binding(QueueBinding::durable("request_queue", "request_key"))
            .with_binding(QueueBinding::transient("response_queue", "response_key"))
    }

    #[tokio::test]
    async fn test_declare_topology_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&classifier_topology()).await.unwrap();
        broker.declare_topology(&classifier_topology()).await.unwrap();

        broker
            .publish("direct_logs", "request_key", b"job", &PublishProperties::default())
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("request_queue"), Some(1));
    }

    #[tokio::test]
    async fn test_incompatible_redeclaration_conflicts() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&classifier_topology()).await.unwrap();

        let conflicting = BrokerTopology::new("direct_logs", ExchangeKind::Direct)
            .with_binding(QueueBinding::durable("response_queue", "response_key"));
        let result = broker.declare_topology(&conflicting).await;
        assert!(matches!(result, Err(ClassifierError::TopologyConflict(_))));

        let fanout = BrokerTopology::new("direct_logs", ExchangeKind::Fanout);
        let result = broker.declare_topology(&fanout).await;
        assert!(matches!(result, Err(ClassifierError::TopologyConflict(_))));
    }

    #[tokio::test]
    async fn test_publish_without_binding_is_dropped() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&classifier_topology()).await.unwrap();

        broker
            .publish("direct_logs", "unknown_key", b"lost", &PublishProperties::default())
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("request_queue"), Some(0));
        assert_eq!(broker.queue_depth("response_queue"), Some(0));
    }

    #[tokio::test]
    async fn test_consume_one_preserves_properties() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&classifier_topology()).await.unwrap();

        let properties = PublishProperties {
            correlation_id: Some("abc".to_string()),
            reply_to: Some("response_key".to_string()),
            persistent: true,
        };
        broker
            .publish("direct_logs", "request_key", b"job", &properties)
            .await
            .unwrap();

        let message = broker
            .consume_one("request_queue", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(message.body, b"job");
        assert_eq!(message.correlation_id.as_deref(), Some("abc"));
        assert_eq!(message.reply_to.as_deref(), Some("response_key"));
        assert_eq!(broker.queue_depth("request_queue"), Some(0));
    }

    #[tokio::test]
    async fn test_consume_one_waits_for_late_message() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_topology(&classifier_topology()).await.unwrap();

        let publisher = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher
                .publish("direct_logs", "response_key", b"class=1", &PublishProperties::default())
                .await
                .unwrap();
        });

        let message = broker
            .consume_one("response_queue", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(message.body, b"class=1");
    }

    #[tokio::test]
    async fn test_consume_one_times_out() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&classifier_topology()).await.unwrap();

        let started = std::time::Instant::now();
        let result = broker
            .consume_one("response_queue", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(ClassifierError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_temporary_queue_removed_after_consume() {
        let broker = InMemoryBroker::new();
        let topology = BrokerTopology::new("direct_logs", ExchangeKind::Direct)
            .with_binding(QueueBinding::temporary("reply.1", Duration::from_secs(30)));
        broker.declare_topology(&topology).await.unwrap();

        broker
            .publish("direct_logs", "reply.1", b"ok", &PublishProperties::default())
            .await
            .unwrap();
        broker
            .consume_one("reply.1", Duration::from_millis(100))
            .await
            .unwrap();

        assert!(!broker.queue_exists("reply.1"));
    }

    #[tokio::test]
    async fn test_outage_fails_operations() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&classifier_topology()).await.unwrap();
        broker.set_available(false);

        let result = broker
            .publish("direct_logs", "request_key", b"job", &PublishProperties::default())
            .await;
        assert!(matches!(result, Err(ClassifierError::BrokerUnavailable(_))));

        let result = broker
            .consume_one("response_queue", Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(ClassifierError::BrokerUnavailable(_))));

        broker.set_available(true);
        assert!(broker
            .publish("direct_logs", "request_key", b"job", &PublishProperties::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_restart_drops_transient_topology() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&classifier_topology()).await.unwrap();

        broker.restart();

        assert!(broker.queue_exists("request_queue"));
        assert!(!broker.queue_exists("response_queue"));
        let result = broker
            .publish("direct_logs", "request_key", b"job", &PublishProperties::default())
            .await;
        assert!(matches!(result, Err(ClassifierError::BrokerUnavailable(_))));

        broker.declare_topology(&classifier_topology()).await.unwrap();
        assert!(broker.queue_exists("response_queue"));
    }

    struct CountingHandler(AtomicUsize);

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _message: BrokerMessage) -> ClassifierResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_consume_session_ends_on_outage() {
        let broker = Arc::new(InMemoryBroker::new());
        let topology = BrokerTopology::new("direct_logs", ExchangeKind::Direct)
            .with_binding(QueueBinding::transient("model_queue", "model_key"));
        broker.declare_topology(&topology).await.unwrap();

        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let (_tx, mut rx) = broadcast::channel::<()>(1);

        let session = {
            let broker = Arc::clone(&broker);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                broker
                    .consume_session("model_queue", handler.as_ref(), &mut rx)
                    .await
            })
        };

        broker
            .publish("direct_logs", "model_key", b"epoch 1", &PublishProperties::default())
            .await
            .unwrap();
        while handler.0.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        broker.set_available(false);
        let result = tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ClassifierError::BrokerUnavailable(_))));
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("model.*", "model.progress"));
        assert!(topic_matches("model.#", "model"));
        assert!(topic_matches("#", "a.b.c"));
        assert!(!topic_matches("model.*", "model.a.b"));
        assert!(!topic_matches("model_key", "other_key"));
    }
}
