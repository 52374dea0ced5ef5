use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use classifier_config::{BrokerConfig, CorrelationMode};
use classifier_domain::{
    BrokerTopology, BrokerTransport, DispatchState, ExchangeKind, PublishProperties,
    QueueBinding, ResponseMessage, WorkItem,
};
use classifier_errors::{ClassifierError, ClassifierResult};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 临时响应队列在请求超时之后继续保留的时间
const REPLY_QUEUE_GRACE: Duration = Duration::from_secs(30);

/// 分发使用的交换机、队列和默认超时
#[derive(Debug, Clone)]
pub struct DispatchRoutes {
    pub exchange: String,
    pub request_binding: QueueBinding,
    pub response_binding: QueueBinding,
    pub correlation: CorrelationMode,
    pub timeout: Duration,
}

impl DispatchRoutes {
    /// 只有请求队列是持久的，其余沿用现有Worker声明时的默认参数
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            exchange: config.exchange.clone(),
            request_binding: QueueBinding::durable(
                &config.request_queue,
                &config.request_routing_key,
            ),
            response_binding: QueueBinding::transient(
                &config.response_queue,
                &config.response_routing_key,
            ),
            correlation: config.correlation,
            timeout: Duration::from_secs(config.dispatch_timeout_seconds),
        }
    }
}

/// 工作分发器
///
/// 发布分类任务并阻塞等待对应的响应。`SharedQueue` 模式下同一响应绑定
/// 同时只允许一个调用在途；`ReplyQueue` 模式下每次调用使用独立的临时队列。
pub struct WorkDispatcher {
    transport: Arc<dyn BrokerTransport>,
    routes: DispatchRoutes,
    binding_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    declared: Mutex<HashSet<String>>,
}

impl WorkDispatcher {
    pub fn new(transport: Arc<dyn BrokerTransport>, routes: DispatchRoutes) -> Self {
        info!(
            "工作分发器已创建: 交换机 {}，关联方式 {:?}，超时 {:?}",
            routes.exchange, routes.correlation, routes.timeout
        );
        Self {
            transport,
            routes,
            binding_locks: StdMutex::new(HashMap::new()),
            declared: Mutex::new(HashSet::new()),
        }
    }

    pub fn routes(&self) -> &DispatchRoutes {
        &self.routes
    }

    /// 使用配置的路由和超时分发
    pub async fn dispatch(&self, work_item: &WorkItem) -> ClassifierResult<ResponseMessage> {
        let submit_routing_key = self.routes.request_binding.routing_key.clone();
        let response_binding = self.routes.response_binding.clone();
        self.submit_and_await(
            work_item,
            &submit_routing_key,
            &response_binding,
            self.routes.timeout,
        )
        .await
    }

    /// 发布任务并等待响应，整个调用（等锁、发布、等待）不超过 `timeout`
    pub async fn submit_and_await(
        &self,
        work_item: &WorkItem,
        submit_routing_key: &str,
        response_binding: &QueueBinding,
        timeout: Duration,
    ) -> ClassifierResult<ResponseMessage> {
        let payload = work_item.to_wire()?;
        let correlation_id = Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout;
        let mut tracker = DispatchTracker::new(&correlation_id);

        let call = self.exchange_messages(
            &payload,
            submit_routing_key,
            response_binding,
            &correlation_id,
            deadline,
            &mut tracker,
        );
        let outcome = tokio::time::timeout_at(deadline, call).await;

        match outcome {
            Ok(Ok(response)) => {
                tracker.transition(DispatchState::Completed);
                info!(
                    "任务 {} 已完成 (correlation_id: {})",
                    work_item.filename(),
                    correlation_id
                );
                Ok(response)
            }
            Ok(Err(ClassifierError::Timeout(_))) | Err(_) => {
                tracker.transition(DispatchState::TimedOut);
                warn!(
                    "任务 {} 在 {:?} 内没有收到响应 (correlation_id: {})",
                    work_item.filename(),
                    timeout,
                    correlation_id
                );
                Err(ClassifierError::DispatchTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                tracker.transition(DispatchState::Failed);
                if matches!(e, ClassifierError::BrokerUnavailable(_)) {
                    // 代理重启后非持久的队列和交换机都会丢失，下次调用重新声明
                    self.forget_declared(&response_binding.queue).await;
                }
                warn!(
                    "任务 {} 分发失败: {} (correlation_id: {})",
                    work_item.filename(),
                    e,
                    correlation_id
                );
                Err(ClassifierError::dispatch_failed(e.to_string()))
            }
        }
    }

    async fn exchange_messages(
        &self,
        payload: &[u8],
        submit_routing_key: &str,
        response_binding: &QueueBinding,
        correlation_id: &str,
        deadline: Instant,
        tracker: &mut DispatchTracker,
    ) -> ClassifierResult<ResponseMessage> {
        match self.routes.correlation {
            CorrelationMode::SharedQueue => {
                let lock = self.binding_lock(&response_binding.queue);
                let _guard = lock.lock().await;
                debug!("已获得响应队列 {} 的使用权", response_binding.queue);

                self.ensure_declared(response_binding).await?;
                self.publish_request(
                    payload,
                    submit_routing_key,
                    &response_binding.routing_key,
                    correlation_id,
                    tracker,
                )
                .await?;
                self.await_reply(&response_binding.queue, correlation_id, deadline)
                    .await
            }
            CorrelationMode::ReplyQueue => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let reply_binding = QueueBinding::temporary(
                    format!("{}.{}", response_binding.queue, correlation_id),
                    remaining + REPLY_QUEUE_GRACE,
                );

                self.ensure_declared(response_binding).await?;
                let reply_topology =
                    BrokerTopology::new(&self.routes.exchange, ExchangeKind::Direct)
                        .with_binding(reply_binding.clone());
                self.transport.declare_topology(&reply_topology).await?;

                self.publish_request(
                    payload,
                    submit_routing_key,
                    &reply_binding.routing_key,
                    correlation_id,
                    tracker,
                )
                .await?;
                self.await_reply(&reply_binding.queue, correlation_id, deadline)
                    .await
            }
        }
    }

    async fn publish_request(
        &self,
        payload: &[u8],
        submit_routing_key: &str,
        reply_to: &str,
        correlation_id: &str,
        tracker: &mut DispatchTracker,
    ) -> ClassifierResult<()> {
        tracker.transition(DispatchState::Publishing);
        let properties = PublishProperties {
            correlation_id: Some(correlation_id.to_string()),
            reply_to: Some(reply_to.to_string()),
            persistent: self.routes.request_binding.durable,
        };
        self.transport
            .publish(&self.routes.exchange, submit_routing_key, payload, &properties)
            .await?;
        tracker.transition(DispatchState::AwaitingResponse);
        Ok(())
    }

    /// 等待关联ID匹配的响应；不带关联ID的响应视为当前调用的结果
    async fn await_reply(
        &self,
        queue: &str,
        correlation_id: &str,
        deadline: Instant,
    ) -> ClassifierResult<ResponseMessage> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClassifierError::timeout(format!("等待队列 {queue} 的响应超时")));
            }

            let delivery = self.transport.consume_one(queue, remaining).await?;
            match delivery.correlation_id.as_deref() {
                Some(id) if id != correlation_id => {
                    warn!(
                        "丢弃不属于当前请求的响应 (correlation_id: {}，期望: {})",
                        id, correlation_id
                    );
                }
                _ => return ResponseMessage::try_from(delivery),
            }
        }
    }

    fn binding_lock(&self, queue: &str) -> Arc<Mutex<()>> {
        let mut locks = self.binding_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            locks
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// 声明请求队列和响应队列，成功后缓存，直到代理不可用时失效
    async fn ensure_declared(&self, response_binding: &QueueBinding) -> ClassifierResult<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(&response_binding.queue) {
            return Ok(());
        }

        let topology = BrokerTopology::new(&self.routes.exchange, ExchangeKind::Direct)
            .with_binding(self.routes.request_binding.clone())
            .with_binding(response_binding.clone());
        self.transport.declare_topology(&topology).await?;

        declared.insert(response_binding.queue.clone());
        debug!("响应队列 {} 的拓扑已声明", response_binding.queue);
        Ok(())
    }

    async fn forget_declared(&self, queue: &str) {
        if self.declared.lock().await.remove(queue) {
            info!("响应队列 {} 的拓扑缓存已失效，下次分发时重新声明", queue);
        }
    }
}

/// 记录单次调用的状态迁移
struct DispatchTracker {
    correlation_id: String,
    state: DispatchState,
}

impl DispatchTracker {
    fn new(correlation_id: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            state: DispatchState::Idle,
        }
    }

    fn transition(&mut self, next: DispatchState) {
        if !self.state.can_transition_to(next) {
            warn!(
                "无效的分发状态迁移 {} -> {} (correlation_id: {})",
                self.state, next, self.correlation_id
            );
            return;
        }
        debug!(
            "分发状态 {} -> {} (correlation_id: {})",
            self.state, next, self.correlation_id
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_from_default_config() {
        let routes = DispatchRoutes::from_config(&BrokerConfig::default());

        assert_eq!(routes.exchange, "direct_logs");
        assert_eq!(routes.request_binding.queue, "request_queue");
        assert_eq!(routes.request_binding.routing_key, "request_key");
        assert!(routes.request_binding.durable);
        assert_eq!(routes.response_binding.queue, "response_queue");
        assert_eq!(routes.response_binding.routing_key, "response_key");
        assert!(!routes.response_binding.durable);
        assert_eq!(routes.correlation, CorrelationMode::SharedQueue);
        assert_eq!(routes.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_tracker_ignores_invalid_transition() {
        let mut tracker = DispatchTracker::new("abc");
        tracker.transition(DispatchState::Completed);
        assert_eq!(tracker.state, DispatchState::Idle);

        tracker.transition(DispatchState::Publishing);
        tracker.transition(DispatchState::AwaitingResponse);
        tracker.transition(DispatchState::Completed);
        assert_eq!(tracker.state, DispatchState::Completed);
    }
}
