use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use classifier_config::AppConfig;
use classifier_dispatcher::{LiveNotifier, WorkDispatcher};
use classifier_domain::StorageBackend;

use crate::auth::{auth_middleware, JwtValidator, TokenValidator};
use crate::handlers::{
    events::events_stream, health::health_check, predict::predict, state::live_state,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<WorkDispatcher>,
    pub storage: Arc<dyn StorageBackend>,
    pub notifier: LiveNotifier,
    /// 为 `None` 时不校验令牌
    pub token_validator: Option<Arc<dyn TokenValidator>>,
    pub upload_dir: PathBuf,
    pub destination_prefix: String,
    pub sse_keep_alive: Duration,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<WorkDispatcher>,
        storage: Arc<dyn StorageBackend>,
        notifier: LiveNotifier,
        config: &AppConfig,
    ) -> Self {
        let token_validator = config.api.auth.enabled.then(|| {
            Arc::new(JwtValidator::new(&config.api.auth.jwt_secret)) as Arc<dyn TokenValidator>
        });

        Self {
            dispatcher,
            storage,
            notifier,
            token_validator,
            upload_dir: PathBuf::from(&config.api.upload_dir),
            destination_prefix: config.storage.destination_prefix.clone(),
            sse_keep_alive: Duration::from_secs(config.api.sse_keep_alive_seconds),
        }
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    // 只有预测入口需要令牌
    let protected = Router::new()
        .route("/predict", post(predict))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/events", get(events_stream))
        .route("/state", get(live_state))
        .merge(protected)
        .with_state(state)
}
