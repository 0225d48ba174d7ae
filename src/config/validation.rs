use crate::config::types::{
    CheckpointConfig, Config, CrawlConfig, OrchestratorConfig, RateConfig, RetryConfig,
    UserAgentConfig, WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_rate_config(&config.rate)?;
    validate_retry_config(&config.retry)?;
    validate_worker_config(&config.workers)?;
    validate_checkpoint_config(&config.checkpoint)?;
    validate_orchestrator_config(&config.orchestrator)?;
    validate_user_agent_config(&config.user_agent)?;

    if config.rate.max_delay >= config.workers.heartbeat_timeout {
        return Err(ConfigError::Validation(format!(
            "max-delay ({}s) must be below heartbeat-timeout ({}s)",
            config.rate.max_delay, config.workers.heartbeat_timeout
        )));
    }
    Ok(())
}

fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.start_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", config.start_url, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "start-url '{}' must use http or https",
            config.start_url
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "start-url '{}' has no host",
            config.start_url
        )));
    }

    if let Some(prefix) = &config.path_prefix {
        if !prefix.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "path-prefix must start with '/', got '{}'",
                prefix
            )));
        }
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_config(config: &RateConfig) -> Result<(), ConfigError> {
    if config.min_workers < 1 {
        return Err(ConfigError::Validation(format!(
            "min-workers must be >= 1, got {}",
            config.min_workers
        )));
    }

    if config.min_workers > config.max_workers {
        return Err(ConfigError::Validation(format!(
            "min-workers ({}) must not exceed max-workers ({})",
            config.min_workers, config.max_workers
        )));
    }

    if config.max_workers > 256 {
        return Err(ConfigError::Validation(format!(
            "max-workers must be <= 256, got {}",
            config.max_workers
        )));
    }

    if config.min_delay < 0.0 || !config.min_delay.is_finite() {
        return Err(ConfigError::Validation(format!(
            "min-delay must be a non-negative number, got {}",
            config.min_delay
        )));
    }

    if config.min_delay > config.max_delay || !config.max_delay.is_finite() {
        return Err(ConfigError::Validation(format!(
            "min-delay ({}) must not exceed max-delay ({})",
            config.min_delay, config.max_delay
        )));
    }

    if config.window_size < 1 {
        return Err(ConfigError::Validation(
            "window-size must be >= 1".to_string(),
        ));
    }

    positive("adjustment-interval", config.adjustment_interval)?;
    non_negative("cooldown", config.cooldown)?;
    non_negative("recovery-dwell", config.recovery_dwell)?;

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.backoff_factor < 1.0 || !config.backoff_factor.is_finite() {
        return Err(ConfigError::Validation(format!(
            "backoff-factor must be >= 1.0, got {}",
            config.backoff_factor
        )));
    }

    non_negative("error-retry-after", config.error_retry_after)?;
    non_negative("session-retry-after", config.session_retry_after)?;
    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    positive("reconcile-interval", config.reconcile_interval)?;
    positive("heartbeat-timeout", config.heartbeat_timeout)?;
    positive("idle-poll", config.idle_poll)?;
    non_negative("shutdown-timeout", config.shutdown_timeout)?;
    Ok(())
}

fn validate_checkpoint_config(config: &CheckpointConfig) -> Result<(), ConfigError> {
    if config.enabled && config.path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint path cannot be empty".to_string(),
        ));
    }
    non_negative("auto-save-interval", config.auto_save_interval)
}

fn validate_orchestrator_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    non_negative("grace-period", config.grace_period)?;
    positive("poll-interval", config.poll_interval)?;
    positive("shutdown-deadline", config.shutdown_deadline)?;
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact) = &config.contact_url {
        Url::parse(contact)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;
    }

    Ok(())
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{} must be > 0 seconds, got {}",
            name, value
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{} must be >= 0 seconds, got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn base() -> Config {
        parse_config("[crawl]\nstart-url = \"https://example.com/\"\n").unwrap()
    }

    #[test]
    fn test_start_url_must_be_http() {
        let mut config = base();
        config.crawl.start_url = "ftp://example.com/".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        config.crawl.start_url = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_path_prefix_must_be_absolute() {
        let mut config = base();
        config.crawl.path_prefix = Some("docs".to_string());
        assert!(validate(&config).is_err());

        config.crawl.path_prefix = Some("/docs".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rate_bounds() {
        let mut config = base();
        config.rate.min_delay = 5.0;
        config.rate.max_delay = 1.0;
        assert!(validate(&config).is_err());

        let mut config = base();
        config.rate.min_workers = 0;
        assert!(validate(&config).is_err());

        let mut config = base();
        config.rate.window_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_max_delay_must_stay_below_heartbeat_timeout() {
        let mut config = base();
        config.rate.max_delay = 120.0;
        config.workers.heartbeat_timeout = 120.0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("heartbeat-timeout"));

        config.workers.heartbeat_timeout = 121.0;
        assert!(validate(&config).is_ok());

        let toml = "[crawl]\nstart-url = \"https://example.com/\"\n\n[workers]\nheartbeat-timeout = 10.0\n";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_backoff_factor_below_one_rejected() {
        let mut config = base();
        config.retry.backoff_factor = 0.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_crawler_name() {
        let mut config = base();
        config.user_agent.crawler_name = "bad name!".to_string();
        assert!(validate(&config).is_err());

        config.user_agent.crawler_name = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_durations() {
        let mut config = base();
        config.orchestrator.poll_interval = 0.0;
        assert!(validate(&config).is_err());

        let mut config = base();
        config.orchestrator.grace_period = 0.0;
        assert!(validate(&config).is_ok());
    }
}
