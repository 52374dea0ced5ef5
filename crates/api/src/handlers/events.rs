use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};
use tracing::{debug, warn};

use crate::routes::AppState;

/// 实时进度通知，连接之前发出的事件不会补发
pub async fn events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifier.subscribe();
    debug!(
        subscribers = state.notifier.subscriber_count(),
        "新的SSE订阅者已连接"
    );

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(live_event) => match Event::default()
            .event(&live_event.event)
            .json_data(&live_event.data)
        {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("序列化SSE事件失败: {e}");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("SSE订阅者处理过慢，跳过 {skipped} 条事件");
            None
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.sse_keep_alive)
            .text("keep-alive"),
    )
}
