use fairway_core::{AuditConfig, CancellationConfig, CourseEditRules, PaymentPolicies};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// Rules for courses that have not configured their own
    #[serde(default)]
    pub edit_rules: CourseEditRules,
    #[serde(default)]
    pub payments: PaymentPolicies,
    #[serde(default)]
    pub cancellation: CancellationConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// When absent, rate limits are kept in process memory
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// How often expired payment and audit records are purged
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,
    /// How long a completed idempotency key replays its response
    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: i64,
}

fn default_retention_sweep_secs() -> u64 {
    24 * 60 * 60
}

fn default_idempotency_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `FAIRWAY_SERVER__PORT=9000`
            .add_source(config::Environment::with_prefix("FAIRWAY").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Build from an inline TOML document; used by tests and tooling.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_fall_back_to_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [edit_rules]
            max_players = 5

            [payments]
            hold_days = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.retention_sweep_secs, 86_400);
        assert_eq!(config.server.idempotency_ttl_hours, 24);
        assert_eq!(config.edit_rules.max_players, 5);
        assert_eq!(config.edit_rules.lock_window_hours, 6);
        assert_eq!(config.payments.hold_days, 5);
        assert_eq!(config.payments.min_refund_amount, 50);
        assert_eq!(config.cancellation.manual_review_threshold, 50_000);
        assert_eq!(config.audit.max_search_results, 1000);
        assert!(config.redis.is_none());
    }
}
