use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    /// HS256签名密钥，与令牌签发方共享
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: "your-secret-key-change-this-in-production".to_string(),
        }
    }
}

impl ConfigValidator for AuthConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.enabled {
            ValidationUtils::validate_not_empty(&self.jwt_secret, "api.auth.jwt_secret")?;

            if self.jwt_secret.len() < 32 {
                return Err(crate::ConfigError::Validation(
                    "api.auth.jwt_secret must be at least 32 characters long".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_address: String,
    pub cors_enabled: bool,
    /// 必须大于 broker.dispatch_timeout_seconds，否则请求会在分发超时之前被切断
    pub request_timeout_seconds: u64,
    pub max_upload_size_mb: usize,
    /// 上传文件在交给存储之前的本地暂存目录
    pub upload_dir: String,
    pub sse_keep_alive_seconds: u64,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3500".to_string(),
            cors_enabled: true,
            request_timeout_seconds: 90,
            max_upload_size_mb: 16,
            upload_dir: "uploads".to_string(),
            sse_keep_alive_seconds: 15,
            auth: AuthConfig::default(),
        }
    }
}

impl ConfigValidator for ApiConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.bind_address, "api.bind_address")?;
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(crate::ConfigError::Validation(format!(
                "api.bind_address '{}' is not a valid socket address",
                self.bind_address
            )));
        }

        ValidationUtils::validate_timeout_seconds(
            self.request_timeout_seconds,
            "api.request_timeout_seconds",
        )?;
        ValidationUtils::validate_not_empty(&self.upload_dir, "api.upload_dir")?;

        if self.max_upload_size_mb == 0 || self.max_upload_size_mb > 1024 {
            return Err(crate::ConfigError::Validation(
                "api.max_upload_size_mb must be within 1..=1024".to_string(),
            ));
        }
        if self.sse_keep_alive_seconds == 0 {
            return Err(crate::ConfigError::Validation(
                "api.sse_keep_alive_seconds must be greater than 0".to_string(),
            ));
        }

        self.auth.validate()
    }
}
