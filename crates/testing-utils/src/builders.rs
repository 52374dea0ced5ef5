//! 测试配置和测试数据构建器

use std::path::Path;

use classifier_config::{AppConfig, CorrelationMode, StorageKind};
use classifier_domain::WorkItem;

/// 构建使用进程内代理和短超时的 `AppConfig`
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.broker.url = "memory://test".to_string();
        config.broker.dispatch_timeout_seconds = 2;
        config.broker.reconnect.initial_delay_ms = 10;
        config.broker.reconnect.max_delay_ms = 50;
        config.api.bind_address = "127.0.0.1:0".to_string();
        config.api.request_timeout_seconds = 5;
        config.api.auth.enabled = false;
        config.storage.kind = StorageKind::Local;
        Self { config }
    }

    pub fn with_dispatch_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.broker.dispatch_timeout_seconds = seconds;
        if self.config.api.request_timeout_seconds <= seconds {
            self.config.api.request_timeout_seconds = seconds + 1;
        }
        self
    }

    pub fn with_correlation(mut self, mode: CorrelationMode) -> Self {
        self.config.broker.correlation = mode;
        self
    }

    pub fn with_broker_url(mut self, url: &str) -> Self {
        self.config.broker.url = url.to_string();
        self
    }

    /// 上传目录和本地存储根目录都放到 `dir` 下
    pub fn with_work_dir(mut self, dir: &Path) -> Self {
        self.config.api.upload_dir = dir.join("uploads").to_string_lossy().into_owned();
        self.config.storage.root_dir = dir.join("storage").to_string_lossy().into_owned();
        self
    }

    pub fn with_auth(mut self, secret: &str) -> Self {
        self.config.api.auth.enabled = true;
        self.config.api.auth.jwt_secret = secret.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sample_work_item() -> WorkItem {
    WorkItem::new("cat.jpg", "/data/images/cat.jpg").expect("sample work item is valid")
}
