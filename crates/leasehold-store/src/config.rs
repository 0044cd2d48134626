// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store configuration loading from environment variables.

/// Which backend a [`StoreConfig`] selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local maps; nothing survives a restart.
    InMemory,
    /// SQLite database at the given URL.
    Sqlite(String),
    /// PostgreSQL database at the given URL.
    Postgres(String),
}

/// Leasehold store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// PostgreSQL or SQLite connection URL; `None` selects the in-memory store
    pub database_url: Option<String>,
    /// Connection pool size
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `LEASEHOLD_DATABASE_URL`: `postgres://…` or `sqlite:…` (default: in-memory)
    /// - `LEASEHOLD_MAX_CONNECTIONS`: pool size (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("LEASEHOLD_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let max_connections: u32 = std::env::var("LEASEHOLD_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "LEASEHOLD_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let config = Self {
            database_url,
            max_connections,
        };
        config.backend()?;
        Ok(config)
    }

    /// Resolve the backend from the URL scheme.
    pub fn backend(&self) -> Result<StoreBackend, ConfigError> {
        match self.database_url.as_deref() {
            None => Ok(StoreBackend::InMemory),
            Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                Ok(StoreBackend::Postgres(url.to_string()))
            }
            Some(url) if url.starts_with("sqlite:") => Ok(StoreBackend::Sqlite(url.to_string())),
            Some(_) => Err(ConfigError::Invalid(
                "LEASEHOLD_DATABASE_URL",
                "must start with postgres://, postgresql:// or sqlite:",
            )),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
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
    fn test_defaults_select_in_memory() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("LEASEHOLD_DATABASE_URL");
        guard.remove("LEASEHOLD_MAX_CONNECTIONS");

        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.backend().unwrap(), StoreBackend::InMemory);
    }

    #[test]
    fn test_postgres_and_sqlite_urls() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("LEASEHOLD_DATABASE_URL", "postgres://user:pass@db:5432/connector");
        guard.set("LEASEHOLD_MAX_CONNECTIONS", "4");

        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(
            config.backend().unwrap(),
            StoreBackend::Postgres("postgres://user:pass@db:5432/connector".to_string())
        );

        guard.set("LEASEHOLD_DATABASE_URL", "sqlite:.data/leasehold.db");
        let config = StoreConfig::from_env().unwrap();
        assert_eq!(
            config.backend().unwrap(),
            StoreBackend::Sqlite("sqlite:.data/leasehold.db".to_string())
        );
    }

    #[test]
    fn test_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("LEASEHOLD_DATABASE_URL", "mysql://localhost/x");
        guard.remove("LEASEHOLD_MAX_CONNECTIONS");
        let err = StoreConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("LEASEHOLD_DATABASE_URL", _)));

        guard.remove("LEASEHOLD_DATABASE_URL");
        guard.set("LEASEHOLD_MAX_CONNECTIONS", "0");
        let err = StoreConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("LEASEHOLD_MAX_CONNECTIONS"));
    }
}
