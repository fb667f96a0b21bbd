use crate::backends::BackendKind;
use crate::config::Config;
use crate::error::GatewayError;
use crate::validation::is_email;
use validator::Validate;

#[derive(Debug, Validate)]
struct RateLimitParams {
    #[validate(range(min = 1, max = 100_000))]
    limit: u32,
    #[validate(range(min = 1, max = 86_400))]
    window_secs: u64,
    #[validate(range(min = 50, max = 30_000))]
    backend_timeout_ms: u64,
}

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), GatewayError> {
        if url.is_empty() {
            return Err(GatewayError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(GatewayError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates rate limit parameters
    pub fn validate_rate_limit(
        limit: u32,
        window_secs: u64,
        backend_timeout_ms: u64,
    ) -> Result<(), GatewayError> {
        RateLimitParams {
            limit,
            window_secs,
            backend_timeout_ms,
        }
        .validate()
        .map_err(|e| GatewayError::Configuration(format!("invalid rate limit settings: {}", e)))
    }

    /// Validates the submit route
    pub fn validate_endpoint_path(path: &str) -> Result<(), GatewayError> {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(GatewayError::Configuration(format!(
                "Endpoint path '{}' must start with '/' and name a route",
                path
            )));
        }
        Ok(())
    }

    /// Envelope addresses may be left empty, but must be valid when set
    pub fn validate_envelope(from: &str, to: &str) -> Result<(), GatewayError> {
        for (name, address) in [("MAIL_FROM", from), ("MAIL_TO", to)] {
            if !address.is_empty() && !is_email(address) {
                return Err(GatewayError::Configuration(format!(
                    "{} '{}' is not a valid email address",
                    name, address
                )));
            }
        }
        Ok(())
    }

    /// Validates everything the server needs before it starts
    pub fn validate_config(config: &Config) -> Result<(), GatewayError> {
        Self::validate_rate_limit(
            config.rate_limit,
            config.rate_window_secs,
            config.backend_timeout_ms,
        )?;
        Self::validate_endpoint_path(&config.endpoint_path)?;
        Self::validate_envelope(&config.mail_from, &config.mail_to)?;

        match config.rate_backend {
            BackendKind::Redis => Self::validate_redis_url(&config.redis_url)?,
            BackendKind::File if config.rate_limit_dir.as_os_str().is_empty() => {
                return Err(GatewayError::Configuration(
                    "RATE_LIMIT_DIR cannot be empty for the file backend".to_string(),
                ));
            }
            BackendKind::File | BackendKind::Memory => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_valid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://localhost:6379").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("").is_err());
        assert!(ConfigValidator::validate_redis_url("http://localhost:6379").is_err());
    }

    #[test]
    fn test_rate_limit_ranges() {
        assert!(ConfigValidator::validate_rate_limit(5, 60, 1500).is_ok());
        assert!(ConfigValidator::validate_rate_limit(0, 60, 1500).is_err());
        assert!(ConfigValidator::validate_rate_limit(5, 0, 1500).is_err());
        assert!(ConfigValidator::validate_rate_limit(5, 60, 10).is_err());
    }

    #[test]
    fn test_endpoint_path() {
        assert!(ConfigValidator::validate_endpoint_path("/contact").is_ok());
        assert!(ConfigValidator::validate_endpoint_path("contact").is_err());
        assert!(ConfigValidator::validate_endpoint_path("/").is_err());
    }

    #[test]
    fn test_envelope() {
        assert!(ConfigValidator::validate_envelope("", "").is_ok());
        assert!(ConfigValidator::validate_envelope("forms@example.com", "me@example.com").is_ok());
        assert!(ConfigValidator::validate_envelope("forms", "").is_err());
    }

    #[test]
    fn test_redis_backend_needs_redis_url() {
        let vars: HashMap<String, String> = [
            ("RATE_BACKEND".to_string(), "redis".to_string()),
            ("REDIS_URL".to_string(), "http://cache:6379".to_string()),
        ]
        .into();
        let config = Config::from_map(&vars).unwrap();
        assert!(ConfigValidator::validate_config(&config).is_err());

        let defaults = Config::from_map(&HashMap::new()).unwrap();
        assert!(ConfigValidator::validate_config(&defaults).is_ok());
    }
}
