use std::env;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::apply_security_headers;

use crate::gateway::stripe::DEFAULT_API_BASE;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_PENDING_PAYMENT_TTL_MINUTES: i64 = 60;
const DEFAULT_PAYMENT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_SCAN_DEBOUNCE_MS: u64 = 3000;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const DEV_JWT_SECRET: &str = "dev-only-jwt-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a number, got '{value}'")]
    NotANumber { key: &'static str, value: String },

    #[error("{key} must be a UUID, got '{value}'")]
    NotAUuid { key: &'static str, value: String },

    #[error("{0} must be set in production")]
    Missing(&'static str),

    #[error("unknown STORE_BACKEND '{0}', expected 'postgres' or 'memory'")]
    UnknownBackend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub store_backend: StoreBackend,
    pub port: u16,
    pub jwt_secret: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub public_base_url: String,
    pub pending_payment_ttl: chrono::Duration,
    pub payment_sweep_interval: Duration,
    pub scan_debounce: Duration,
    pub cors_allowed_origins: Vec<String>,
    /// Profile granted `admin` at startup.
    pub bootstrap_admin_id: Option<Uuid>,
    pub is_production: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let is_production = lookup("RUST_ENV")
            .map(|v| v.to_lowercase() == "production")
            .unwrap_or(false);

        let store_backend = match var("STORE_BACKEND", "postgres").to_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let jwt_secret = match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ if is_production => return Err(ConfigError::Missing("JWT_SECRET")),
            _ => DEV_JWT_SECRET.to_string(),
        };

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS", DEFAULT_ALLOWED_ORIGINS)
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let bootstrap_admin_id = lookup("BOOTSTRAP_ADMIN_ID")
            .filter(|v| !v.trim().is_empty())
            .map(|value| {
                Uuid::parse_str(value.trim()).map_err(|_| ConfigError::NotAUuid {
                    key: "BOOTSTRAP_ADMIN_ID",
                    value,
                })
            })
            .transpose()?;

        Ok(Self {
            database_url: var("DATABASE_URL", "postgres://localhost/eventhub"),
            database_max_connections: number(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
            store_backend,
            port: number(&lookup, "PORT", DEFAULT_PORT)?,
            jwt_secret,
            stripe_secret_key: var("STRIPE_SECRET_KEY", ""),
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET", ""),
            stripe_api_base: var("STRIPE_API_BASE", DEFAULT_API_BASE),
            public_base_url: var("PUBLIC_BASE_URL", "http://localhost:3000"),
            pending_payment_ttl: chrono::Duration::minutes(number(
                &lookup,
                "PENDING_PAYMENT_TTL_MINUTES",
                DEFAULT_PENDING_PAYMENT_TTL_MINUTES,
            )?),
            payment_sweep_interval: Duration::from_secs(number(
                &lookup,
                "PAYMENT_SWEEP_INTERVAL_SECS",
                DEFAULT_PAYMENT_SWEEP_INTERVAL_SECS,
            )?),
            scan_debounce: Duration::from_millis(number(
                &lookup,
                "SCAN_DEBOUNCE_MS",
                DEFAULT_SCAN_DEBOUNCE_MS,
            )?),
            cors_allowed_origins,
            bootstrap_admin_id,
            is_production,
        })
    }
}

fn number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::NotANumber { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.port, 3001);
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.pending_payment_ttl, chrono::Duration::minutes(60));
        assert_eq!(config.payment_sweep_interval, Duration::from_secs(300));
        assert_eq!(config.scan_debounce, Duration::from_millis(3000));
        assert_eq!(config.stripe_api_base, "https://api.stripe.com");
        assert_eq!(config.cors_allowed_origins.len(), 2);
        assert_eq!(config.bootstrap_admin_id, None);
        assert!(!config.is_production);
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("STORE_BACKEND", "memory"),
            ("SCAN_DEBOUNCE_MS", "500"),
            ("CORS_ALLOWED_ORIGINS", "https://a.test, ,https://b.test"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.scan_debounce, Duration::from_millis(500));
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://a.test".to_string(), "https://b.test".to_string()]
        );

        assert!(matches!(
            config_from(&[("PORT", "eighty")]),
            Err(ConfigError::NotANumber { key: "PORT", .. })
        ));
        assert!(matches!(
            config_from(&[("STORE_BACKEND", "sqlite")]),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_bootstrap_admin_id() {
        let id = Uuid::new_v4();
        let config = config_from(&[("BOOTSTRAP_ADMIN_ID", &id.to_string())]).unwrap();
        assert_eq!(config.bootstrap_admin_id, Some(id));

        assert!(matches!(
            config_from(&[("BOOTSTRAP_ADMIN_ID", "root")]),
            Err(ConfigError::NotAUuid { key: "BOOTSTRAP_ADMIN_ID", .. })
        ));
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        assert!(matches!(
            config_from(&[("RUST_ENV", "production")]),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
        let config = config_from(&[("RUST_ENV", "Production"), ("JWT_SECRET", "s3cret")]).unwrap();
        assert!(config.is_production);
    }
}
