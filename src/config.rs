//! Configuration management for the Marginalia server

use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Response cache sizing and TTL tiers (seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub short_ttl_secs: u64,
    pub medium_ttl_secs: u64,
    pub long_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./marginalia.db".to_string(),
            },
            cache: CacheSettings {
                max_entries: 1024,
                short_ttl_secs: 30,
                medium_ttl_secs: 120,
                long_ttl_secs: 600,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(defaults.server.port),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            cache: CacheSettings {
                max_entries: env::var("CACHE_MAX_ENTRIES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.cache.max_entries),
                short_ttl_secs: env::var("CACHE_SHORT_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.cache.short_ttl_secs),
                medium_ttl_secs: env::var("CACHE_MEDIUM_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.cache.medium_ttl_secs),
                long_ttl_secs: env::var("CACHE_LONG_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.cache.long_ttl_secs),
            },
        }
    }
}
