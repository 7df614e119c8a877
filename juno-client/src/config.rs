//! # Client Configuration
//!
//! Purpose: Describe one client instance's target, pool and operation
//! defaults, and check them once at construction.
//!
//! ## Design Principles
//! 1. **Plain Data**: Public fields, `Default` for everything optional and
//!    `serde` so the struct can be loaded from any format the host uses.
//! 2. **Validate Once**: `validate` runs when the factory is built; afterwards
//!    the configuration is shared read-only.
//! 3. **Diagnostics**: `properties` renders the active values under the
//!    property names operators already know.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{JunoError, JunoResult};

pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_CONNECTION_POOL_SIZE: usize = 1;
pub const DEFAULT_CONNECTION_LIFETIME_MS: u64 = 30_000;
pub const DEFAULT_LIFETIME_SECS: u32 = 259_200;

pub const MAX_RESPONSE_TIMEOUT_MS: u64 = 5_000;
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const MAX_CONNECTION_POOL_SIZE: usize = 3;
pub const MIN_CONNECTION_LIFETIME_MS: u64 = 5_000;
pub const MAX_CONNECTION_LIFETIME_MS: u64 = 30_000;
pub const MAX_NAMESPACE_LEN: usize = 64;
pub const MAX_APP_NAME_LEN: usize = 32;

pub const DEFAULT_MAX_KEY_SIZE: usize = 128;
pub const DEFAULT_MAX_VALUE_SIZE: usize = 204_800;
pub const DEFAULT_MAX_LIFETIME_SECS: u32 = 259_200;

/// Configuration for a client factory and its connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Store or load-balancer host name.
    pub host: String,
    pub port: u16,
    /// Application name sent in every request's source info.
    pub app_name: String,
    /// Namespace all keys of this client live in.
    pub record_namespace: String,
    pub use_ssl: bool,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Maximum concurrent connections.
    pub connection_pool_size: usize,
    /// Connections older than this are replaced at checkout.
    pub connection_lifetime_ms: u64,
    /// Re-dial once immediately when a connect attempt fails.
    pub reconnect_on_fail: bool,
    /// Discover the store behind the load balancer and connect to it directly.
    pub bypass_load_balancer: bool,
    /// Lifetime applied to create and set calls that do not pass one.
    pub default_lifetime_secs: u32,
    /// Retry idempotent operations once on transient failure.
    pub operation_retry: bool,
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub max_lifetime_secs: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: String::new(),
            port: 0,
            app_name: String::new(),
            record_namespace: String::new(),
            use_ssl: false,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            connection_pool_size: DEFAULT_CONNECTION_POOL_SIZE,
            connection_lifetime_ms: DEFAULT_CONNECTION_LIFETIME_MS,
            reconnect_on_fail: false,
            bypass_load_balancer: true,
            default_lifetime_secs: DEFAULT_LIFETIME_SECS,
            operation_retry: false,
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            max_lifetime_secs: DEFAULT_MAX_LIFETIME_SECS,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with the required fields and defaults elsewhere.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        app_name: impl Into<String>,
        record_namespace: impl Into<String>,
    ) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            app_name: app_name.into(),
            record_namespace: record_namespace.into(),
            ..ClientConfig::default()
        }
    }

    /// Checks required fields and bounds.
    pub fn validate(&self) -> JunoResult<()> {
        if self.host.trim().is_empty() {
            return Err(config_err("host is required"));
        }
        if self.port == 0 {
            return Err(config_err("port must be between 1 and 65535"));
        }
        check_text("app_name", &self.app_name, MAX_APP_NAME_LEN)?;
        check_text("record_namespace", &self.record_namespace, MAX_NAMESPACE_LEN)?;
        check_range("connect_timeout_ms", self.connect_timeout_ms, 1, MAX_CONNECT_TIMEOUT_MS)?;
        check_range("response_timeout_ms", self.response_timeout_ms, 1, MAX_RESPONSE_TIMEOUT_MS)?;
        check_range(
            "connection_pool_size",
            self.connection_pool_size as u64,
            1,
            MAX_CONNECTION_POOL_SIZE as u64,
        )?;
        check_range(
            "connection_lifetime_ms",
            self.connection_lifetime_ms,
            MIN_CONNECTION_LIFETIME_MS,
            MAX_CONNECTION_LIFETIME_MS,
        )?;
        if self.max_key_size == 0 || self.max_key_size > usize::from(u16::MAX) {
            return Err(config_err("max_key_size must be between 1 and 65535"));
        }
        if self.default_lifetime_secs == 0 || self.default_lifetime_secs > self.max_lifetime_secs {
            return Err(config_err(format!(
                "default_lifetime_secs must be between 1 and max_lifetime_secs ({})",
                self.max_lifetime_secs
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connection_lifetime(&self) -> Duration {
        Duration::from_millis(self.connection_lifetime_ms)
    }

    /// `host:port` of the configured endpoint.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name of the store pool this client talks to.
    ///
    /// Hosts named `junoserv-<pool>-<suffix>.<domain>` identify the pool
    /// directly; anything else is reported as `host:port`.
    pub fn pool_id(&self) -> String {
        let short = self.host.split('.').next().unwrap_or_default();
        match short.strip_prefix("junoserv-") {
            Some(rest) if !rest.is_empty() => {
                rest.split('-').next().unwrap_or(rest).to_string()
            }
            _ => self.server_addr(),
        }
    }

    /// Active configuration as property name to value, for diagnostics.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let entries: [(&str, String); 17] = [
            ("juno.server.host", self.host.clone()),
            ("juno.server.port", self.port.to_string()),
            ("juno.application_name", self.app_name.clone()),
            ("juno.record_namespace", self.record_namespace.clone()),
            ("juno.useSSL", self.use_ssl.to_string()),
            ("juno.connection.timeout_msec", self.connect_timeout_ms.to_string()),
            ("juno.response.timeout_msec", self.response_timeout_ms.to_string()),
            ("juno.connection.pool_size", self.connection_pool_size.to_string()),
            (
                "juno.connection.recycle_duration_msec",
                self.connection_lifetime_ms.to_string(),
            ),
            ("juno.connection.reconnect_on_fail", self.reconnect_on_fail.to_string()),
            ("juno.connection.byPassLTM", self.bypass_load_balancer.to_string()),
            ("juno.default_record_lifetime_sec", self.default_lifetime_secs.to_string()),
            ("juno.operation.retry", self.operation_retry.to_string()),
            ("juno.max_key_size", self.max_key_size.to_string()),
            ("juno.max_value_size", self.max_value_size.to_string()),
            ("juno.max_record_lifetime_sec", self.max_lifetime_secs.to_string()),
            ("juno.pool_id", self.pool_id()),
        ];
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

fn config_err(msg: impl Into<String>) -> JunoError {
    JunoError::Config(msg.into())
}

fn check_text(name: &str, value: &str, max: usize) -> JunoResult<()> {
    if value.is_empty() || value.len() > max {
        return Err(config_err(format!("{name} must be 1 to {max} bytes")));
    }
    Ok(())
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> JunoResult<()> {
    if value < min || value > max {
        return Err(config_err(format!("{name} must be between {min} and {max}, got {value}")));
    }
    Ok(())
}
