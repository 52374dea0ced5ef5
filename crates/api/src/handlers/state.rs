use axum::{extract::State, Json};
use classifier_dispatcher::LiveState;

use crate::routes::AppState;

/// 最近一次转发的进度状态，页面重新打开时用它恢复显示
pub async fn live_state(State(state): State<AppState>) -> Json<LiveState> {
    Json(state.notifier.state())
}
