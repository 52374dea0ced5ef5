use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// AMQP名称最长255字节，且不能占用 `amq.` 保留前缀
    pub fn validate_amqp_name(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        if value.len() > 255 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be at most 255 bytes"
            )));
        }
        if value.starts_with("amq.") {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot use the reserved 'amq.' prefix"
            )));
        }
        Ok(())
    }

    /// Validate that a timeout is reasonable
    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600"
            )));
        }
        Ok(())
    }

    /// Validate that a URL uses one of the accepted schemes
    pub fn validate_url(url: &str, schemes: &[&str], field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;

        let Some((scheme, _)) = url.split_once("://") else {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a valid URL with protocol"
            )));
        };

        if !schemes.contains(&scheme) {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must use one of: {}",
                schemes.join(", ")
            )));
        }

        Ok(())
    }
}
