use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::observability::LogConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    #[serde(default)]
    pub logging: LogConfig,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Upper bound on any single row or record lock wait.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl StorageSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub default_daily_limit: Decimal,
    pub default_monthly_limit: Decimal,
    pub enforce_limits: bool,
    /// Requests may only be filed this many hours after the transaction.
    pub cancellation_window_hours: i64,
    /// Completed transactions older than this cannot be reversed, even with a pending request.
    pub settlement_window_hours: i64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            default_daily_limit: Decimal::from(crate::models::wallet::DEFAULT_DAILY_LIMIT),
            default_monthly_limit: Decimal::from(crate::models::wallet::DEFAULT_MONTHLY_LIMIT),
            enforce_limits: true,
            cancellation_window_hours: 24,
            settlement_window_hours: 72,
        }
    }
}

/// Argon2id cost parameters for PIN hashing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub max_tracked_clients: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 100,
            window_secs: 60,
            max_tracked_clients: 10_000,
        }
    }
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    const MINIMAL: &str = r#"
        [application]
        host = "127.0.0.1"
        port = 8080

        [database]
        url = "postgres://localhost/wallet_ledger"
        pool_size = 5

        [storage]
        backend = "memory"
    "#;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(MINIMAL, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.storage.lock_timeout(), Duration::from_millis(5_000));
        assert_eq!(settings.ledger.cancellation_window_hours, 24);
        assert!(settings.ledger.enforce_limits);
        assert_eq!(settings.rate_limit.requests_per_window, 100);
        assert!(settings.database.run_migrations);
    }

    #[test]
    fn test_overrides_ledger_section() {
        let toml = format!(
            "{}\n[ledger]\nenforce_limits = false\nsettlement_window_hours = 24\n",
            MINIMAL
        );
        let settings: Settings = Config::builder()
            .add_source(File::from_str(&toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(!settings.ledger.enforce_limits);
        assert_eq!(settings.ledger.settlement_window_hours, 24);
        assert_eq!(settings.ledger.cancellation_window_hours, 24);
    }
}
