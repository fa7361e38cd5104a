//! Configuration for the access layer.
//!
//! `DaoConfig` is built from the positional `configure` arguments plus a
//! free-form options map. The map is deserialized with serde; every key is
//! optional and unknown keys are ignored.

use std::collections::HashMap;
use std::time::Duration;

use rkv_client::PoolConfig;
use serde::Deserialize;
use serde_json::{Map, Value as Json};

use crate::error::{DaoError, DaoResult};

/// Store kind this adapter speaks to.
pub const KIND: &str = "redis";

/// Tunables read from the `options` map passed to `configure`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DaoOptions {
    // -------------------------------------------------------------------------
    // Pool Configuration
    // -------------------------------------------------------------------------
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Seconds an idle connection may sit in the pool (0 = forever).
    pub idle_timeout_secs: u64,
    /// Idle connections younger than this skip the borrow-time PING
    /// (0 = always PING).
    pub keep_alive_secs: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP connect timeout in milliseconds (0 = none).
    pub connect_timeout_ms: u64,
    /// TCP read timeout in milliseconds (0 = none).
    pub read_timeout_ms: u64,
    /// TCP write timeout in milliseconds (0 = none).
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Namespaces
    // -------------------------------------------------------------------------
    /// Logical database names to seed the resolver with.
    pub databases: HashMap<String, u32>,
}

impl Default for DaoOptions {
    fn default() -> Self {
        Self {
            max_idle: 8,
            max_total: 16,
            idle_timeout_secs: 240,
            keep_alive_secs: 0,
            connect_timeout_ms: 5000,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            databases: HashMap::new(),
        }
    }
}

/// Connection parameters of one adapter instance.
#[derive(Debug, Clone)]
pub struct DaoConfig {
    pub name: String,
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    /// Database argument as given; parsed into `default_index`.
    pub database: String,
    /// Store index used for unmapped database names.
    pub default_index: u32,
    pub options: DaoOptions,
}

impl DaoConfig {
    /// Validates the `configure` arguments.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        kind: &str,
        host: &str,
        port: u16,
        user: &str,
        pass: &str,
        database: &str,
        options: &Map<String, Json>,
    ) -> DaoResult<Self> {
        if !kind.is_empty() && !kind.eq_ignore_ascii_case(KIND) {
            return Err(DaoError::Config(format!("unsupported store kind {}", kind)));
        }
        if host.trim().is_empty() {
            return Err(DaoError::Config("host is empty".into()));
        }
        if port == 0 {
            return Err(DaoError::Config("port is 0".into()));
        }

        let options: DaoOptions = serde_json::from_value(Json::Object(options.clone()))
            .map_err(|err| DaoError::Config(format!("invalid options: {}", err)))?;
        if options.max_total == 0 {
            return Err(DaoError::Config("max_total must be positive".into()));
        }
        if options.max_idle > options.max_total {
            return Err(DaoError::Config(format!(
                "max_idle {} exceeds max_total {}",
                options.max_idle, options.max_total
            )));
        }
        let mut claimed: HashMap<u32, &str> = HashMap::new();
        for (db, index) in &options.databases {
            if let Some(owner) = claimed.insert(*index, db) {
                return Err(DaoError::Config(format!(
                    "databases {} and {} share index {}",
                    owner, db, index
                )));
            }
        }

        Ok(DaoConfig {
            name: name.to_string(),
            kind: KIND.to_string(),
            host: host.trim().to_string(),
            port,
            user: user.to_string(),
            pass: pass.to_string(),
            database: database.to_string(),
            default_index: database.trim().parse().unwrap_or(0),
            options,
        })
    }

    /// `host:port` address of the store.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pool settings derived from this configuration.
    ///
    /// Dialing never selects a database: every lease issues its own
    /// `SELECT`, so the dial-time one would be a second per operation.
    pub fn pool_config(&self) -> PoolConfig {
        let opts = &self.options;
        PoolConfig {
            addr: self.addr(),
            password: Some(self.pass.clone()).filter(|pass| !pass.is_empty()),
            database: 0,
            max_idle: opts.max_idle,
            max_total: opts.max_total,
            idle_timeout: secs(opts.idle_timeout_secs),
            keep_alive: secs(opts.keep_alive_secs),
            connect_timeout: millis(opts.connect_timeout_ms),
            read_timeout: millis(opts.read_timeout_ms),
            write_timeout: millis(opts.write_timeout_ms),
        }
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Json) -> Map<String, Json> {
        match value {
            Json::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn defaults_fill_missing_options() {
        let config =
            DaoConfig::new("main", "redis", "127.0.0.1", 6379, "", "", "", &Map::new()).unwrap();
        assert_eq!(config.options, DaoOptions::default());
        assert_eq!(config.default_index, 0);

        let pool = config.pool_config();
        assert_eq!(pool.addr, "127.0.0.1:6379");
        assert_eq!(pool.password, None);
        assert_eq!(pool.idle_timeout, Some(Duration::from_secs(240)));
        assert_eq!(pool.keep_alive, None);
        assert_eq!(pool.read_timeout, None);
    }

    #[test]
    fn options_map_overrides_defaults() {
        let opts = options(json!({
            "max_idle": 2,
            "max_total": 4,
            "keep_alive_secs": 30,
            "databases": {"users": 1, "orders": 2},
            "unrelated": true
        }));
        let config =
            DaoConfig::new("main", "REDIS", "cache.local", 6380, "u", "pw", "5", &opts).unwrap();
        assert_eq!(config.default_index, 5);
        assert_eq!(config.options.databases.get("orders"), Some(&2));

        let pool = config.pool_config();
        assert_eq!(pool.max_idle, 2);
        assert_eq!(pool.database, 0);
        assert_eq!(pool.password.as_deref(), Some("pw"));
        assert_eq!(pool.keep_alive, Some(Duration::from_secs(30)));
    }

    #[test]
    fn non_numeric_database_falls_back_to_zero() {
        let config =
            DaoConfig::new("main", "", "localhost", 6379, "", "", "primary", &Map::new()).unwrap();
        assert_eq!(config.default_index, 0);
    }

    #[test]
    fn malformed_parameters_fail_fast() {
        let empty = Map::new();
        assert!(DaoConfig::new("m", "mysql", "h", 1, "", "", "", &empty).is_err());
        assert!(DaoConfig::new("m", "redis", " ", 1, "", "", "", &empty).is_err());
        assert!(DaoConfig::new("m", "redis", "h", 0, "", "", "", &empty).is_err());
        let bad = options(json!({"max_idle": 9, "max_total": 2}));
        assert!(DaoConfig::new("m", "redis", "h", 1, "", "", "", &bad).is_err());
        let shared = options(json!({"databases": {"a": 1, "b": 1}}));
        assert!(DaoConfig::new("m", "redis", "h", 1, "", "", "", &shared).is_err());
        let wrong_type = options(json!({"max_idle": "lots"}));
        let err = DaoConfig::new("m", "redis", "h", 1, "", "", "", &wrong_type).unwrap_err();
        assert!(matches!(err, DaoError::Config(_)));
    }
}
