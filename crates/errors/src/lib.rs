use thiserror::Error;


#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("消息代理不可用: {0}")]
    BrokerUnavailable(String),
    #[error("等待消息超时: {0}")]
    Timeout(String),
    #[error("拓扑声明冲突: {0}")]
    TopologyConflict(String),
    #[error("任务分发失败: {0}")]
    DispatchFailed(String),
    #[error("等待Worker响应超时 ({timeout_ms}ms)")]
    DispatchTimeout { timeout_ms: u64 },
    #[error("存储失败: {0}")]
    StorageFailed(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("认证失败: {0}")]
    Authentication(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;

impl ClassifierError {
    pub fn broker_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BrokerUnavailable(msg.into())
    }
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }
    pub fn topology_conflict<S: Into<String>>(msg: S) -> Self {
        Self::TopologyConflict(msg.into())
    }
    pub fn dispatch_failed<S: Into<String>>(msg: S) -> Self {
        Self::DispatchFailed(msg.into())
    }
    pub fn storage_failed<S: Into<String>>(msg: S) -> Self {
        Self::StorageFailed(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 连接类错误可以通过重连恢复
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClassifierError::BrokerUnavailable(_) | ClassifierError::Timeout(_)
        )
    }

    /// 面向调用方的提示信息，不包含消息代理内部细节
    pub fn user_message(&self) -> &str {
        match self {
            ClassifierError::Validation(_) => "输入数据验证失败",
            ClassifierError::Authentication(_) => "认证失败，请重新登录",
            ClassifierError::DispatchTimeout { .. } | ClassifierError::Timeout(_) => {
                "Prediction timed out, please retry later"
            }
            ClassifierError::StorageFailed(_) => "Prediction failed due to storage error",
            _ => "Prediction failed due to internal error",
        }
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ClassifierError {
    fn from(err: std::io::Error) -> Self {
        ClassifierError::StorageFailed(err.to_string())
    }
}

impl From<anyhow::Error> for ClassifierError {
    fn from(err: anyhow::Error) -> Self {
        ClassifierError::Internal(err.to_string())
    }
}
