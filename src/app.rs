use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use classifier_api::{create_app, AppState};
use classifier_config::AppConfig;
use classifier_dispatcher::{DispatchRoutes, EventRelay, LiveNotifier, WorkDispatcher};
use classifier_domain::StorageBackend;
use classifier_infrastructure::{BrokerHandle, StorageFactory, TransportFactory};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// 主应用程序
///
/// 持有消息代理、分发器、存储和实时通知中心，`serve` 期间
/// 同时运行HTTP服务和进度事件转发任务。
pub struct Application {
    config: AppConfig,
    broker: BrokerHandle,
    dispatcher: Arc<WorkDispatcher>,
    storage: Arc<dyn StorageBackend>,
    notifier: LiveNotifier,
}

impl Application {
    /// 创建新的应用实例
    pub fn new(config: AppConfig) -> Result<Self> {
        info!(
            "初始化应用程序，关联方式: {:?}，分发超时: {}s",
            config.broker.correlation, config.broker.dispatch_timeout_seconds
        );

        let broker = TransportFactory::create(&config.broker);
        let storage = StorageFactory::create(&config.storage);
        let dispatcher = Arc::new(WorkDispatcher::new(
            broker.transport(),
            DispatchRoutes::from_config(&config.broker),
        ));

        Ok(Self {
            config,
            broker,
            dispatcher,
            storage,
            notifier: LiveNotifier::default(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    pub fn notifier(&self) -> &LiveNotifier {
        &self.notifier
    }

    pub fn router(&self) -> Router {
        let state = AppState::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.storage),
            self.notifier.clone(),
            &self.config,
        );
        create_app(state, &self.config.api)
    }

    /// 绑定配置中的地址并运行，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        self.serve(listener, shutdown_rx).await
    }

    /// 在给定的监听器上运行HTTP服务和事件转发任务
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("启动进度事件转发，消息代理: {}", self.broker.kind());
        let relay = EventRelay::new(
            self.broker.transport(),
            &self.config.broker,
            self.notifier.clone(),
        )
        .spawn(shutdown_rx.resubscribe());

        let local_addr = listener.local_addr().context("读取监听地址失败")?;
        info!("API服务器启动在 http://{local_addr}");

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败");

        // 服务异常退出时不会再有关闭信号，需要直接结束转发任务
        if result.is_err() {
            relay.abort();
        }
        if let Err(e) = relay.await {
            if !e.is_cancelled() {
                error!("进度事件转发任务异常退出: {e}");
            }
        }

        info!("API服务器已停止");
        result
    }
}
