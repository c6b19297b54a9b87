use crate::service::RemainderPolicy;
use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub posting: PostingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingConfig {
    /// Rounding-remainder handling in the cost allocator (`none` | `last_line`)
    pub allocation_remainder: RemainderPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/nfe_entry".to_string(),
                max_connections: 20,
                run_migrations: true,
            },
            posting: PostingConfig {
                allocation_remainder: RemainderPolicy::None,
            },
        }
    }
}

/// (config key, environment variable)
const ENV_KEYS: &[(&str, &str)] = &[
    ("server.host", "SERVER_HOST"),
    ("server.port", "SERVER_PORT"),
    ("database.url", "DATABASE_URL"),
    ("database.max_connections", "DATABASE_MAX_CONNECTIONS"),
    ("database.run_migrations", "DATABASE_RUN_MIGRATIONS"),
    ("posting.allocation_remainder", "POSTING_ALLOCATION_REMAINDER"),
];

impl AppConfig {
    /// Loads configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::try_from(&AppConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);
        for (key, var) in ENV_KEYS {
            builder = builder.set_override_option(*key, lookup(var))?;
        }
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.max_connections, 20);
        assert!(config.database.run_migrations);
        assert_eq!(config.posting.allocation_remainder, RemainderPolicy::None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = load(&[
            ("SERVER_PORT", "9090"),
            ("DATABASE_URL", "postgres://db/erp"),
            ("DATABASE_RUN_MIGRATIONS", "false"),
            ("POSTING_ALLOCATION_REMAINDER", "last_line"),
        ]);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.url, "postgres://db/erp");
        assert!(!config.database.run_migrations);
        assert_eq!(config.posting.allocation_remainder, RemainderPolicy::LastLine);
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = AppConfig::from_lookup(|name| (name == "SERVER_PORT").then(|| "http".to_string()));
        assert!(result.is_err());
    }
}
