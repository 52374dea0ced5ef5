use std::time::{Duration, Instant};

use async_trait::async_trait;
use classifier_errors::ClassifierResult;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::{BrokerMessage, BrokerTopology, PublishProperties, ReconnectPolicy};

/// 后台订阅收到消息后的回调
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BrokerMessage) -> ClassifierResult<()>;
}

/// 消息代理传输层
///
/// `publish` 与 `consume_one` 每次调用独立建立并释放连接；
/// `consume_forever` 在一个长连接上持续消费，断线后按策略重连。
/// 底层错误原样返回，由调用方决定如何翻译。
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// 幂等声明交换机、队列与绑定
    async fn declare_topology(&self, topology: &BrokerTopology) -> ClassifierResult<()>;

    /// 发布消息；没有队列绑定该路由键时不报错
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> ClassifierResult<()>;

    /// 等待恰好一条消息，收到即确认；超时返回 `Timeout`
    async fn consume_one(&self, queue: &str, timeout: Duration) -> ClassifierResult<BrokerMessage>;

    /// 单个消费会话：收到停止信号返回 `Ok(())`，连接断开返回错误
    async fn consume_session(
        &self,
        queue: &str,
        handler: &dyn MessageHandler,
        stop: &mut broadcast::Receiver<()>,
    ) -> ClassifierResult<()>;

    /// 持续消费直到停止信号，可重试的错误触发退避重连
    ///
    /// 每个会话开始前重新声明 `topology`，代理重启后非持久队列会被重建。
    async fn consume_forever(
        &self,
        queue: &str,
        topology: &BrokerTopology,
        handler: &dyn MessageHandler,
        stop: &mut broadcast::Receiver<()>,
        policy: &ReconnectPolicy,
    ) -> ClassifierResult<()> {
        let mut attempt: u32 = 0;

        loop {
            if stop_requested(stop) {
                debug!("队列 {} 的消费循环收到停止信号", queue);
                return Ok(());
            }

            let started = Instant::now();
            let session = match self.declare_topology(topology).await {
                Ok(()) => self.consume_session(queue, handler, stop).await,
                Err(e) => Err(e),
            };
            match session {
                Ok(()) => {
                    info!("队列 {} 的消费循环已停止", queue);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    // 会话持续足够久说明连接曾经正常，重新从最短间隔开始退避
                    if started.elapsed() >= policy.max_delay {
                        attempt = 0;
                    }
                    let delay = policy.delay_for(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "队列 {} 的消费连接中断: {}，{:?} 后第 {} 次重连",
                        queue, e, delay, attempt
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.recv() => {
                            debug!("等待重连期间收到停止信号");
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    error!("队列 {} 的消费循环遇到不可恢复的错误: {}", queue, e);
                    return Err(e);
                }
            }
        }
    }
}

/// 非阻塞检查停止信号；发送端已关闭同样视为停止
pub fn stop_requested(stop: &mut broadcast::Receiver<()>) -> bool {
    match stop.try_recv() {
        Err(TryRecvError::Empty) => false,
        Ok(()) | Err(TryRecvError::Lagged(_)) | Err(TryRecvError::Closed) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classifier_errors::ClassifierError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 前 `failures` 次会话以连接错误结束，之后等待停止信号
    struct FlakyTransport {
        failures: usize,
        sessions: AtomicUsize,
        fatal: bool,
    }

    #[async_trait]
    impl BrokerTransport for FlakyTransport {
        async fn declare_topology(&self, _topology: &BrokerTopology) -> ClassifierResult<()> {
            Ok(())
        }

        async fn publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _payload: &[u8],
            _properties: &PublishProperties,
        ) -> ClassifierResult<()> {
            Ok(())
        }

        async fn consume_one(
            &self,
            queue: &str,
            _timeout: Duration,
        ) -> ClassifierResult<BrokerMessage> {
            Err(ClassifierError::timeout(queue))
        }

        async fn consume_session(
            &self,
            _queue: &str,
            _handler: &dyn MessageHandler,
            stop: &mut broadcast::Receiver<()>,
        ) -> ClassifierResult<()> {
            let n = self.sessions.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(ClassifierError::topology_conflict("model_queue"));
            }
            if n < self.failures {
                return Err(ClassifierError::broker_unavailable("connection reset"));
            }
            let _ = stop.recv().await;
            Ok(())
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _message: BrokerMessage) -> ClassifierResult<()> {
            Ok(())
        }
    }

    fn progress_topology() -> BrokerTopology {
        BrokerTopology::new("direct_logs", crate::ExchangeKind::Direct)
            .with_binding(crate::QueueBinding::transient("model_queue", "model_key"))
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_consume_forever_reconnects_after_connection_loss() {
        let transport = Arc::new(FlakyTransport {
            failures: 3,
            sessions: AtomicUsize::new(0),
            fatal: false,
        });
        let (tx, mut rx) = broadcast::channel(1);
        let topology = progress_topology();

        let worker = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .consume_forever(
                        "model_queue",
                        &topology,
                        &NoopHandler,
                        &mut rx,
                        &fast_policy(),
                    )
                    .await
            })
        };

        while transport.sessions.load(Ordering::SeqCst) < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(transport.sessions.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_consume_forever_returns_fatal_errors() {
        let transport = FlakyTransport {
            failures: 0,
            sessions: AtomicUsize::new(0),
            fatal: true,
        };
        let (_tx, mut rx) = broadcast::channel::<()>(1);

        let result = transport
            .consume_forever(
                "model_queue",
                &progress_topology(),
                &NoopHandler,
                &mut rx,
                &fast_policy(),
            )
            .await;
        assert!(matches!(result, Err(ClassifierError::TopologyConflict(_))));
        assert_eq!(transport.sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_consume_forever_stops_during_backoff() {
        let transport = FlakyTransport {
            failures: usize::MAX,
            sessions: AtomicUsize::new(0),
            fatal: false,
        };
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            jitter_factor: 0.0,
        };
        let (tx, mut rx) = broadcast::channel(1);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            transport.consume_forever(
                "model_queue",
                &progress_topology(),
                &NoopHandler,
                &mut rx,
                &policy,
            ),
        )
        .await
        .unwrap();

        assert!(result.is_ok());
        stopper.await.unwrap();
    }

    #[test]
    fn test_stop_requested_on_closed_sender() {
        let (tx, mut rx) = broadcast::channel::<()>(1);
        assert!(!stop_requested(&mut rx));
        drop(tx);
        assert!(stop_requested(&mut rx));
    }
}
