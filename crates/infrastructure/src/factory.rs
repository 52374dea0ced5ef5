use std::sync::Arc;
use std::time::Duration;

use classifier_config::{BrokerConfig, StorageConfig, StorageKind};
use classifier_domain::{BrokerTransport, StorageBackend};
use tracing::info;

use crate::{HdfsCommandStorage, InMemoryBroker, LocalStorage, RabbitMqTransport};

/// 按配置选择的消息代理实现
pub enum BrokerHandle {
    RabbitMq(Arc<RabbitMqTransport>),
    InMemory(Arc<InMemoryBroker>),
}

impl BrokerHandle {
    pub fn transport(&self) -> Arc<dyn BrokerTransport> {
        match self {
            BrokerHandle::RabbitMq(transport) => Arc::clone(transport) as Arc<dyn BrokerTransport>,
            BrokerHandle::InMemory(broker) => Arc::clone(broker) as Arc<dyn BrokerTransport>,
        }
    }

    pub fn in_memory(&self) -> Option<Arc<InMemoryBroker>> {
        match self {
            BrokerHandle::InMemory(broker) => Some(Arc::clone(broker)),
            BrokerHandle::RabbitMq(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BrokerHandle::RabbitMq(_) => "rabbitmq",
            BrokerHandle::InMemory(_) => "in_memory",
        }
    }
}

pub struct TransportFactory;

impl TransportFactory {
    pub fn create(config: &BrokerConfig) -> BrokerHandle {
        if config.is_in_memory() {
            info!("使用进程内消息代理");
            BrokerHandle::InMemory(Arc::new(InMemoryBroker::new()))
        } else {
            info!("使用RabbitMQ消息代理: {}", redact_url(&config.url));
            BrokerHandle::RabbitMq(Arc::new(RabbitMqTransport::new(
                config.url.clone(),
                Duration::from_secs(config.connection_timeout_seconds),
            )))
        }
    }
}

pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: &StorageConfig) -> Arc<dyn StorageBackend> {
        match config.kind {
            StorageKind::Local => {
                info!("使用本地存储: {}", config.root_dir);
                Arc::new(LocalStorage::new(&config.root_dir))
            }
            StorageKind::Hdfs => {
                info!("使用HDFS存储: {}", config.hdfs_command);
                Arc::new(HdfsCommandStorage::new(&config.hdfs_command))
            }
        }
    }
}

/// 日志中隐藏连接地址里的密码
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}
