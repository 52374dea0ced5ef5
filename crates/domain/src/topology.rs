use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
        }
    }
}

/// 队列及其在交换机上的绑定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
    pub durable: bool,
    pub auto_delete: bool,
    /// 队列空闲多久后由代理删除（x-expires）
    pub expires: Option<Duration>,
}

impl QueueBinding {
    pub fn durable(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
            durable: true,
            auto_delete: false,
            expires: None,
        }
    }

    pub fn transient(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            durable: false,
            ..Self::durable(queue, routing_key)
        }
    }

    /// 单次请求使用的临时响应队列，路由键与队列名相同
    pub fn temporary(queue: impl Into<String>, expires: Duration) -> Self {
        let queue = queue.into();
        Self {
            routing_key: queue.clone(),
            queue,
            durable: false,
            auto_delete: true,
            expires: Some(expires),
        }
    }

    /// 同名队列的两次声明参数是否兼容
    pub fn is_compatible_with(&self, other: &QueueBinding) -> bool {
        self.queue == other.queue
            && self.durable == other.durable
            && self.auto_delete == other.auto_delete
            && self.expires == other.expires
    }
}

/// 一个交换机及绑定到它的队列集合，可重复声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTopology {
    pub exchange: String,
    pub kind: ExchangeKind,
    pub exchange_durable: bool,
    pub bindings: Vec<QueueBinding>,
}

impl BrokerTopology {
    pub fn new(exchange: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            exchange: exchange.into(),
            kind,
            exchange_durable: false,
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn binding_for(&self, queue: &str) -> Option<&QueueBinding> {
        self.bindings.iter().find(|b| b.queue == queue)
    }
}

/// 发布消息时附带的AMQP属性
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// delivery_mode = 2
    pub persistent: bool,
}
