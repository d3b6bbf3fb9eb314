//! Configuration module for membership-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub billing: BillingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Where memberships and the ledger live.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Postgres(DatabaseConfig),
    /// Process-local; state is lost on restart.
    Memory,
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Postgres(_) => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
        }
    }
}

impl MembershipConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unknown STORE_BACKEND '{}'; expected postgres or memory",
                    other
                )))
            }
        };

        let interval_secs: u64 = env::var("BILLING_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        if interval_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "BILLING_INTERVAL_SECS must be greater than zero"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "membership-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            billing: BillingConfig {
                enabled: env::var("BILLING_ENABLED")
                    .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
                    .unwrap_or(true),
                interval: Duration::from_secs(interval_secs),
            },
        })
    }

    /// In-memory configuration on a random port, used by the test harness.
    pub fn for_memory_store(port: u16) -> Self {
        Self {
            common: core_config::Config {
                port,
                host: "127.0.0.1".to_string(),
            },
            service_name: "membership-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store: StoreBackend::Memory,
            billing: BillingConfig::default(),
        }
    }
}
