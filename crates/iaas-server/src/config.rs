// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for iaas-server.

use std::net::SocketAddr;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string for the metadata store.
    pub database_url: String,
    /// HTTP bind address.
    pub http_addr: SocketAddr,
    /// Container runtime daemon address; local socket when unset.
    pub docker_host: Option<String>,
    /// Redis URL for the lifecycle event bus; in-process bus when unset.
    pub redis_url: Option<String>,
    /// Database connection pool size.
    pub db_pool_size: u32,
    /// Capacity of the runtime event channel.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("IAAS_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("IAAS_DATABASE_URL"))?;

        let port: u16 = std::env::var("IAAS_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let docker_host = std::env::var("DOCKER_HOST").ok();
        let redis_url = std::env::var("IAAS_REDIS_URL").ok();

        let db_pool_size = std::env::var("IAAS_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let event_channel_capacity = std::env::var("IAAS_EVENT_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        Ok(Self {
            database_url,
            http_addr,
            docker_host,
            redis_url,
            db_pool_size,
            event_channel_capacity,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("IAAS_DATABASE_URL", "postgres://localhost/iaas");
        guard.remove("IAAS_HTTP_PORT");
        guard.remove("DOCKER_HOST");
        guard.remove("IAAS_REDIS_URL");
        guard.remove("IAAS_DB_POOL_SIZE");
        guard.remove("IAAS_EVENT_CHANNEL_CAPACITY");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/iaas");
        assert_eq!(config.http_addr.port(), 8080);
        assert!(config.docker_host.is_none());
        assert!(config.redis_url.is_none());
        assert_eq!(config.db_pool_size, 10);
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("IAAS_DATABASE_URL", "postgres://db:5432/prod");
        guard.set("IAAS_HTTP_PORT", "9000");
        guard.set("DOCKER_HOST", "tcp://10.0.0.5:2375");
        guard.set("IAAS_REDIS_URL", "redis://cache:6379");
        guard.set("IAAS_DB_POOL_SIZE", "25");
        guard.set("IAAS_EVENT_CHANNEL_CAPACITY", "512");

        let config = Config::from_env().unwrap();

        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.docker_host.as_deref(), Some("tcp://10.0.0.5:2375"));
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.db_pool_size, 25);
        assert_eq!(config.event_channel_capacity, 512);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("IAAS_DATABASE_URL");

        let result = Config::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar("IAAS_DATABASE_URL"))
        ));
    }

    #[test]
    fn test_config_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("IAAS_DATABASE_URL", "postgres://localhost/iaas");
        guard.set("IAAS_HTTP_PORT", "not_a_number");

        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidPort)));
    }
}
