use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use classifier_errors::ClassifierError;
use serde_json::json;
use tracing::error;

use crate::auth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("分类服务错误: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("认证错误: {0}")]
    Authentication(#[from] AuthError),
}

impl ApiError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Classifier(ClassifierError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Authentication(_)
            | ApiError::Classifier(ClassifierError::Authentication(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Classifier(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (msg, error_type) = match &self {
            ApiError::BadRequest(msg) => (msg.clone(), "BAD_REQUEST"),
            ApiError::Authentication(err) => (err.to_string(), "AUTHENTICATION_ERROR"),
            ApiError::Classifier(err) => {
                let error_type = match err {
                    ClassifierError::Validation(_) => "VALIDATION_ERROR",
                    ClassifierError::Authentication(_) => "AUTHENTICATION_ERROR",
                    ClassifierError::DispatchTimeout { .. } => "PREDICTION_TIMEOUT",
                    ClassifierError::StorageFailed(_) => "STORAGE_ERROR",
                    _ => "PREDICTION_FAILED",
                };
                (err.user_message().to_string(), error_type)
            }
        };

        // 详细原因只写日志，响应中不暴露消息代理和存储的内部信息
        if status.is_server_error() {
            error!(error = %self, "请求处理失败");
        }

        let body = Json(json!({
            "msg": msg,
            "error": {
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::bad_request("No file part").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ClassifierError::validation_error("empty filename")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AuthError::MissingToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(ClassifierError::DispatchTimeout { timeout_ms: 1000 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(ClassifierError::dispatch_failed("amqp://guest@broker")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_server_error_body_hides_broker_details() {
        let response =
            ApiError::from(ClassifierError::dispatch_failed("amqp://guest@broker:5672 refused"))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["msg"], "Prediction failed due to internal error");
        assert_eq!(body["error"]["type"], "PREDICTION_FAILED");
        assert!(!String::from_utf8_lossy(&bytes).contains("amqp://"));
    }
}
