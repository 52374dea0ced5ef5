//! # Classifier API
//!
//! 图像分类桥接服务的HTTP入口，基于Axum构建。
//!
//! ## API 端点
//!
//! - `POST /predict` - 上传图片（multipart字段 `file`），同步返回 `{"Result": ...}`
//! - `GET /events` - SSE实时进度通知，事件名 `rabbitmq_message`
//! - `GET /state` - 最近一次进度通知的快照
//! - `GET /health` - 健康检查
//!
//! 启用认证后 `/predict` 需要 `Authorization: Bearer <token>`（HS256）。
//!
//! ## 错误响应
//!
//! ```json
//! {
//!   "msg": "Prediction timed out, please retry later",
//!   "error": { "type": "PREDICTION_TIMEOUT", "code": 500, "timestamp": "..." }
//! }
//! ```
//!
//! `msg` 只包含面向用户的提示，消息代理和存储的细节只写入日志。
//!
//! ## 中间件
//!
//! - **追踪**: `tower-http` TraceLayer
//! - **超时**: 整个请求的上限，必须大于分发超时
//! - **CORS**: 按配置启用
//! - **日志记录**: 请求和响应日志

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

use std::time::Duration;

use axum::{extract::DefaultBodyLimit, Router};
use classifier_config::ApiConfig;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, timeout_layer, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(DefaultBodyLimit::max(
        api_config.max_upload_size_mb * 1024 * 1024,
    ));

    let router = if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    };

    router.layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(timeout_layer(Duration::from_secs(
                api_config.request_timeout_seconds,
            )))
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
