use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::routes::AppState;

pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Malformed authorization header")]
    MalformedHeader,
    #[error("Invalid authentication token")]
    InvalidToken,
    #[error("Authentication token has expired")]
    ExpiredToken,
}

/// 令牌校验协作方，`/predict` 在分发之前调用
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// 请求通过认证后放入扩展中的调用方身份
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub subject: String,
}

pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// 签发HS256令牌，用于运维脚本和测试
    pub fn issue_token(&self, subject: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            warn!("签发令牌失败: {e}");
            AuthError::InvalidToken
        })
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })
    }
}

/// 未配置校验器时直接放行
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(validator) = state.token_validator.as_ref() else {
        return Ok(next.run(req).await);
    };

    let token = extract_bearer_token(&req)?;
    let claims = validator.validate(&token).map_err(|err| {
        warn!("认证失败: {err}");
        err
    })?;

    debug!(subject = %claims.sub, "请求认证通过");
    req.extensions_mut().insert(AuthenticatedUser {
        subject: claims.sub,
    });
    Ok(next.run(req).await)
}

fn extract_bearer_token(req: &Request) -> Result<String, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    match header.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(AuthError::MalformedHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    const SECRET: &str = "test-secret-key-with-at-least-32-characters";

    #[test]
    fn test_issued_token_validates() {
        let validator = JwtValidator::new(SECRET);
        let token = validator.issue_token("ops", Duration::hours(1)).unwrap();

        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.sub, "ops");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let issuer = JwtValidator::new("another-secret-key-with-32-characters!!");
        let token = issuer.issue_token("ops", Duration::hours(1)).unwrap();

        let result = JwtValidator::new(SECRET).validate(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let validator = JwtValidator::new(SECRET);
        let token = validator.issue_token("ops", Duration::hours(-2)).unwrap();

        assert!(matches!(
            validator.validate(&token),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn test_extract_bearer_token() {
        let req = Request::builder()
            .header(AUTHORIZATION, "Bearer abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer_token(&req).unwrap(), "abc.def.ghi");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(matches!(
            extract_bearer_token(&req),
            Err(AuthError::MissingToken)
        ));

        let req = Request::builder()
            .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            extract_bearer_token(&req),
            Err(AuthError::MalformedHeader)
        ));
    }
}
