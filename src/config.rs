//! Configuration management for the account API.
//!
//! Settings come from a line-oriented `KEY=VALUE` env file (default
//! `config.env`). Variables already present in the process environment take
//! precedence over the file, so deployments can override single values.
//!
//! # Recognised keys
//!
//! - `JWT_SECRET` - HS256 key for bearer tokens (required, non-empty)
//! - `SERVER_PORT` - Port to listen on, bound on all interfaces (required)
//! - `DB_URL` - PostgreSQL address, `[user[:password]@]host[:port][/database]`
//!   or a full `postgres://` URL (required)
//! - `DB_NAME` - Named user database, stored as a PostgreSQL schema (required)
//! - `TOKEN_TTL_SECS` - Bearer token lifetime (default: 86400)
//! - `REQUEST_TIMEOUT_SECS` - Per-request deadline (default: 60)
//! - `BCRYPT_COST` - Password hashing cost, 4-31 (default: bcrypt's default)
//!
//! # Example
//!
//! ```ignore
//! use account_api::config::Settings;
//!
//! let settings = Settings::load("config.env")?;
//! println!("Listening on {}", settings.bind_address());
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::store::postgres;

// =============================================================================
// Default Values
// =============================================================================

/// Default env file path.
pub const DEFAULT_CONFIG_FILE: &str = "config.env";

/// Default server host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bearer token lifetime in seconds (24 hours).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Default per-request deadline in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Lowest bcrypt cost accepted.
pub const MIN_BCRYPT_COST: u32 = 4;

/// Highest bcrypt cost accepted.
pub const MAX_BCRYPT_COST: u32 = 31;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Account API - signup, login and profile endpoints over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "account-api")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the KEY=VALUE configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "ACCOUNT_API_CONFIG")]
    pub config: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Settings
// =============================================================================

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    /// Port to bind on all interfaces
    pub server_port: u16,

    /// PostgreSQL address
    pub db_url: String,

    /// Named user database within the server
    pub db_name: String,

    /// Lifetime of issued bearer tokens
    pub token_ttl: Duration,

    /// Deadline applied to every request
    pub request_timeout: Duration,

    /// bcrypt work factor
    pub bcrypt_cost: u32,
}

impl Settings {
    /// Load settings from an env file, letting the process environment
    /// override individual keys.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = read_env_file(path.as_ref())?;
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file.get(key).cloned()))
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = required(&lookup, "JWT_SECRET")?;
        let server_port = parse_port(&required(&lookup, "SERVER_PORT")?)?;
        let db_url = required(&lookup, "DB_URL")?;
        postgres::connect_options(&db_url).map_err(|e| ConfigError::Invalid {
            key: "DB_URL",
            message: e.to_string(),
        })?;
        let db_name = required(&lookup, "DB_NAME")?;

        let token_ttl = optional_secs(&lookup, "TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?;
        let request_timeout =
            optional_secs(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        let bcrypt_cost = match lookup("BCRYPT_COST") {
            Some(raw) => parse_cost(&raw)?,
            None => bcrypt::DEFAULT_COST,
        };

        Ok(Self {
            jwt_secret,
            server_port,
            db_url,
            db_name,
            token_ttl,
            request_timeout,
            bcrypt_cost,
        })
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", DEFAULT_HOST, self.server_port)
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let file_error = |err: dotenvy::Error| ConfigError::File {
        path: path.to_path_buf(),
        message: err.to_string(),
    };

    let mut values = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(file_error)? {
        let (key, value) = item.map_err(file_error)?;
        values.insert(key, value);
    }
    Ok(values)
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or(ConfigError::Missing(key))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::Empty(key));
    }
    Ok(value)
}

fn optional_secs<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(key) {
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.parse::<u16>() {
        Ok(0) => Err(ConfigError::Invalid {
            key: "SERVER_PORT",
            message: "port 0 is not allowed".to_string(),
        }),
        Ok(port) => Ok(port),
        Err(e) => Err(ConfigError::Invalid {
            key: "SERVER_PORT",
            message: e.to_string(),
        }),
    }
}

fn parse_cost(raw: &str) -> Result<u32, ConfigError> {
    let cost = raw
        .trim()
        .parse::<u32>()
        .map_err(|e| ConfigError::Invalid {
            key: "BCRYPT_COST",
            message: e.to_string(),
        })?;
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(ConfigError::Invalid {
            key: "BCRYPT_COST",
            message: format!("must be between {} and {}", MIN_BCRYPT_COST, MAX_BCRYPT_COST),
        });
    }
    Ok(cost)
}

// =============================================================================
// Tests
// =============================================================================
