use std::env;

/// Timing and retry knobs for the reconciliation tasks.
///
/// Passed explicitly into the sweeper/reaper constructors instead of being
/// read from ambient state, so tests can run with simulated clocks and
/// aggressive intervals.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// How often the polling sweeper wakes up.
    pub poll_interval_secs: i64,
    /// How often the expiry reaper wakes up.
    pub reap_interval_secs: i64,
    /// Age after which an unresolved `in_progress` claim becomes reclaimable.
    pub stale_claim_secs: i64,
    /// Ceiling on claim attempts before a transaction is failed outright.
    pub max_processing_attempts: i64,
    /// Resolution window granted to new transactions when none is given.
    pub default_expiry_minutes: i64,
    /// Minimum gap between polling checks of the same transaction.
    pub recheck_interval_secs: i64,
    /// Parallel workers per sweep pass.
    pub sweep_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            reap_interval_secs: 60,
            stale_claim_secs: 120,
            max_processing_attempts: 3,
            default_expiry_minutes: 30,
            recheck_interval_secs: 30,
            sweep_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub audit_database_path: String,
    pub base_url: String,
    pub audit_log_enabled: bool,
    /// Days to keep audit entries; 0 keeps them forever.
    pub audit_log_retention_days: i64,
    pub dev_mode: bool,

    /// Provider API credentials.
    pub provider_base_url: String,
    pub provider_secret_key: String,
    pub provider_webhook_secret: String,

    /// Optional URL notified when a transaction completes (entitlement callback).
    pub completion_webhook_url: Option<String>,

    pub reconciler: ReconcilerConfig,
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("TALLY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig {
            poll_interval_secs: env_i64("POLL_INTERVAL_SECONDS", defaults.poll_interval_secs),
            reap_interval_secs: env_i64("REAP_INTERVAL_SECONDS", defaults.reap_interval_secs),
            stale_claim_secs: env_i64("STALE_CLAIM_SECONDS", defaults.stale_claim_secs),
            max_processing_attempts: env_i64(
                "MAX_PROCESSING_ATTEMPTS",
                defaults.max_processing_attempts,
            ),
            default_expiry_minutes: env_i64(
                "DEFAULT_EXPIRY_MINUTES",
                defaults.default_expiry_minutes,
            ),
            recheck_interval_secs: env_i64(
                "RECHECK_INTERVAL_SECONDS",
                defaults.recheck_interval_secs,
            ),
            sweep_concurrency: env_i64("SWEEP_CONCURRENCY", defaults.sweep_concurrency as i64)
                .max(1) as usize,
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "tally.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "tally_audit.db".to_string()),
            base_url,
            audit_log_enabled: env::var("AUDIT_LOG_ENABLED")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(true),
            audit_log_retention_days: env_i64("AUDIT_LOG_RETENTION_DAYS", 0),
            dev_mode,
            provider_base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.payments.example".to_string()),
            provider_secret_key: env::var("PROVIDER_SECRET_KEY").unwrap_or_default(),
            provider_webhook_secret: env::var("PROVIDER_WEBHOOK_SECRET").unwrap_or_default(),
            completion_webhook_url: env::var("COMPLETION_WEBHOOK_URL").ok(),
            reconciler,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciler_defaults() {
        let cfg = ReconcilerConfig::default();
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(cfg.stale_claim_secs, 120);
        assert_eq!(cfg.max_processing_attempts, 3);
        assert_eq!(cfg.default_expiry_minutes, 30);
        assert!(cfg.sweep_concurrency >= 1);
    }
}
