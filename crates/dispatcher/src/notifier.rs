use std::sync::{Arc, RwLock};

use classifier_domain::ProgressEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// 前端监听的事件名
pub const PROGRESS_EVENT_NAME: &str = "rabbitmq_message";

/// 推送给实时订阅者的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl LiveEvent {
    pub fn progress(progress: &ProgressEvent) -> Self {
        Self {
            event: PROGRESS_EVENT_NAME.to_string(),
            data: serde_json::json!({ "message": progress.message }),
        }
    }
}

/// 尚未收到任何进度消息时展示的提示
pub const WAITING_MESSAGE: &str = "Waiting for Model training to complete...";

/// 最近一次转发后的界面状态，供新连接的界面恢复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveState {
    pub message: String,
    pub button_enabled: bool,
    pub page_active: bool,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            message: WAITING_MESSAGE.to_string(),
            button_enabled: false,
            page_active: false,
        }
    }
}

/// 实时通知中心
///
/// 广播不缓存历史事件，晚于事件连接的订阅者收不到它。
#[derive(Clone)]
pub struct LiveNotifier {
    sender: broadcast::Sender<LiveEvent>,
    state: Arc<RwLock<LiveState>>,
}

impl LiveNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            state: Arc::new(RwLock::new(LiveState::default())),
        }
    }

    /// 转发进度事件并更新状态快照，返回收到事件的订阅者数量
    pub fn publish_progress(&self, progress: &ProgressEvent) -> usize {
        {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            state.message = progress.message.clone();
            state.button_enabled = true;
            state.page_active = true;
        }

        match self.sender.send(LiveEvent::progress(progress)) {
            Ok(count) => {
                debug!("进度事件已推送给 {} 个订阅者", count);
                count
            }
            Err(_) => {
                debug!("没有实时订阅者，进度事件未推送");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn state(&self) -> LiveState {
        self.state.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Default for LiveNotifier {
    fn default() -> Self {
        Self::new(100)
    }
}
