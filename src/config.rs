//! Node configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Wire-level constants such as the
//! listener cool-down are fixed by the protocol and are not configurable.

use std::path::PathBuf;

use crate::domain::{MAX_PAYLOAD_SIZE, Priority};
use crate::error::NodeError;

/// Device id used when `DEVICE_ID` is not set.
pub const DEFAULT_DEVICE_ID: u64 = 0x4a44_0000_0000_0001;

/// Top-level node configuration.
///
/// Loaded once at startup via [`NodeConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// 64-bit device identifier (`DEVICE_ID`, hex).
    pub device_id: u64,

    /// JSON file backing the settings store; in-memory when unset.
    pub settings_path: Option<PathBuf>,

    /// Largest payload the transport carries in one packet.
    pub max_payload_size: usize,

    /// Capacity of the inbound packet queue.
    pub inbound_queue_capacity: usize,

    /// Whether to host the protocol-test service.
    pub proto_test_enabled: bool,

    /// Initial threshold of the local console.
    pub console_min_priority: Priority,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID,
            settings_path: None,
            max_payload_size: MAX_PAYLOAD_SIZE,
            inbound_queue_capacity: 64,
            proto_test_enabled: false,
            console_min_priority: Priority::Log,
        }
    }
}

impl NodeConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] if `DEVICE_ID` or
    /// `CONSOLE_MIN_PRIORITY` is set but cannot be parsed.
    pub fn from_env() -> Result<Self, NodeError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NodeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let device_id = match lookup("DEVICE_ID") {
            Some(raw) => parse_device_id(&raw)?,
            None => defaults.device_id,
        };

        let console_min_priority = match lookup("CONSOLE_MIN_PRIORITY") {
            Some(raw) => raw
                .parse()
                .map_err(|_| NodeError::Config(format!("CONSOLE_MIN_PRIORITY: {raw}")))?,
            None => defaults.console_min_priority,
        };

        let settings_path = lookup("SETTINGS_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let max_payload_size = parse_or(&lookup, "MAX_PAYLOAD_SIZE", defaults.max_payload_size);
        let inbound_queue_capacity = parse_or(
            &lookup,
            "INBOUND_QUEUE_CAPACITY",
            defaults.inbound_queue_capacity,
        )
        .max(1);
        let proto_test_enabled = parse_bool_or(&lookup, "PROTO_TEST_ENABLED", defaults.proto_test_enabled);

        Ok(Self {
            device_id,
            settings_path,
            max_payload_size,
            inbound_queue_capacity,
            proto_test_enabled,
            console_min_priority,
        })
    }
}

fn parse_device_id(raw: &str) -> Result<u64, NodeError> {
    let digits = raw.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    u64::from_str_radix(digits, 16).map_err(|err| NodeError::Config(format!("DEVICE_ID: {err}")))
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`,
/// `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
