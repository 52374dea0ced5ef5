use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 断线重连的指数退避策略
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// 第 `attempt` 次重连（从0开始）前的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let exponential = base * self.multiplier.powi(attempt.min(32) as i32);
        let capped = exponential.min(max);

        // 抖动避免多个实例同时重连
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).max(base).min(max);

        Duration::from_secs_f64(delay)
    }
}

/// 单次分发调用的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Idle,
    Publishing,
    AwaitingResponse,
    Completed,
    TimedOut,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchState::Completed | DispatchState::TimedOut | DispatchState::Failed
        )
    }

    /// 状态只能前进，终态之后不再迁移
    pub fn can_transition_to(&self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Idle, Publishing)
                | (Idle, TimedOut)
                | (Idle, Failed)
                | (Publishing, AwaitingResponse)
                | (Publishing, TimedOut)
                | (Publishing, Failed)
                | (AwaitingResponse, Completed)
                | (AwaitingResponse, TimedOut)
                | (AwaitingResponse, Failed)
        )
    }
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DispatchState::Idle => "idle",
            DispatchState::Publishing => "publishing",
            DispatchState::AwaitingResponse => "awaiting_response",
            DispatchState::Completed => "completed",
            DispatchState::TimedOut => "timed_out",
            DispatchState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
