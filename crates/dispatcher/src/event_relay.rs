use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use classifier_config::{BrokerConfig, ReconnectConfig};
use classifier_domain::{
    BrokerMessage, BrokerTopology, BrokerTransport, ExchangeKind, MessageHandler,
    ProgressEvent, QueueBinding, ReconnectPolicy,
};
use classifier_errors::ClassifierResult;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::LiveNotifier;

pub fn reconnect_policy(config: &ReconnectConfig) -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(config.initial_delay_ms),
        max_delay: Duration::from_millis(config.max_delay_ms),
        multiplier: config.multiplier,
        jitter_factor: config.jitter_factor,
    }
}

/// 后台事件转发
///
/// 消费进度队列，把每条消息原样推送给实时订阅者。启动后由应用持有
/// `JoinHandle`，通过停止信号结束并在关闭时等待。
pub struct EventRelay {
    transport: Arc<dyn BrokerTransport>,
    topology: BrokerTopology,
    queue: String,
    notifier: LiveNotifier,
    policy: ReconnectPolicy,
}

impl EventRelay {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        config: &BrokerConfig,
        notifier: LiveNotifier,
    ) -> Self {
        let topology = BrokerTopology::new(&config.exchange, ExchangeKind::Direct).with_binding(
            QueueBinding::transient(&config.progress_queue, &config.progress_routing_key),
        );
        Self {
            transport,
            topology,
            queue: config.progress_queue.clone(),
            notifier,
            policy: reconnect_policy(&config.reconnect),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 在独立任务中运行，直到 `shutdown_rx` 收到停止信号
    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(&mut shutdown_rx).await })
    }

    async fn run(&self, shutdown_rx: &mut broadcast::Receiver<()>) {
        info!("后台事件转发已启动，监听队列: {}", self.queue);
        let handler = RelayHandler {
            notifier: self.notifier.clone(),
        };

        loop {
            let result = self
                .transport
                .consume_forever(
                    &self.queue,
                    &self.topology,
                    &handler,
                    shutdown_rx,
                    &self.policy,
                )
                .await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    error!(
                        "后台事件转发遇到错误: {}，{:?} 后重试",
                        e, self.policy.max_delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.max_delay) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }

        info!("后台事件转发已停止");
    }
}

struct RelayHandler {
    notifier: LiveNotifier,
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle(&self, message: BrokerMessage) -> ClassifierResult<()> {
        let progress = ProgressEvent::from(&message);
        let delivered = self.notifier.publish_progress(&progress);
        debug!("收到进度消息: {}，推送给 {} 个订阅者", progress.message, delivered);
        Ok(())
    }
}
