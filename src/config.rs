//! Agent configuration loading from environment variables.
//!
//! All configuration values are loaded from `APM_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `APM_SLOW_REQUEST_THRESHOLD_MS` | 200 | Primary span duration classed as slow (ms) |
//! | `APM_SANITIZE_MAX_DEPTH` | 10 | Nesting kept by the sanitizer |
//! | `APM_SKIP_KEYS` | password,password_confirmation,secret,token,api_key,authorization | Redacted keys (comma list) |
//! | `APM_MAX_EVENTS` | 2000 | Events kept before a transaction is truncated |
//! | `APM_DELIVERY_CAPACITY` | 1024 | Records buffered for the dispatcher |
//! | `APM_PROBE_INTERVAL_SECS` | 60 | Probe sampling interval (secs) |
//! | `APM_PROBES_ENABLED` | true | Install and run runtime probes |

use std::time::Duration;

use serde::Serialize;

use crate::delivery::DeliveryConfig;
use crate::sanitizer::{default_skip_keys, SanitizerConfig};

/// Limits applied to transactions at completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Primary span duration at or above which a transaction is slow.
    pub slow_threshold: Duration,
    /// Transactions with more events are truncated before formatting.
    pub max_events: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(200),
            max_events: 2000,
        }
    }
}

/// Probe runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Full agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentConfig {
    pub transactions: TransactionConfig,
    pub sanitizer: SanitizerConfig,
    pub delivery: DeliveryConfig,
    pub probes: ProbeConfig,
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub slow_threshold_ms: u64,
    pub max_events: usize,
    pub sanitize_max_depth: usize,
    pub skip_keys: Vec<String>,
    pub delivery_capacity: usize,
    pub probes_enabled: bool,
    pub probe_interval_secs: u64,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a boolean env var (`1/0`, `true/false`, `yes/no`, `on/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Parse a comma-separated list. An unset variable yields `default`; a set but
/// empty one yields an empty list.
fn parse_list(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(val) => val
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default,
    }
}

fn load_transaction_config() -> TransactionConfig {
    let slow_ms = parse_u64("APM_SLOW_REQUEST_THRESHOLD_MS", 200);
    let max_events = parse_usize("APM_MAX_EVENTS", 2000).max(1);
    TransactionConfig {
        slow_threshold: Duration::from_millis(slow_ms),
        max_events,
    }
}

fn load_sanitizer_config() -> SanitizerConfig {
    let max_depth = parse_usize("APM_SANITIZE_MAX_DEPTH", 10).clamp(1, 64);
    let skip_keys = parse_list("APM_SKIP_KEYS", default_skip_keys());
    SanitizerConfig { max_depth, skip_keys }
}

fn load_delivery_config() -> DeliveryConfig {
    let capacity = parse_usize("APM_DELIVERY_CAPACITY", 1024).max(1);
    DeliveryConfig { capacity }
}

fn load_probe_config() -> ProbeConfig {
    let enabled = parse_bool("APM_PROBES_ENABLED", true);
    let interval_secs = parse_u64("APM_PROBE_INTERVAL_SECS", 60).max(1);
    ProbeConfig {
        enabled,
        interval: Duration::from_secs(interval_secs),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> AgentConfig {
    AgentConfig {
        transactions: load_transaction_config(),
        sanitizer: load_sanitizer_config(),
        delivery: load_delivery_config(),
        probes: load_probe_config(),
    }
}

impl AgentConfig {
    /// Produce a serializable summary of effective configuration.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            slow_threshold_ms: self.transactions.slow_threshold.as_millis() as u64,
            max_events: self.transactions.max_events,
            sanitize_max_depth: self.sanitizer.max_depth,
            skip_keys: self.sanitizer.skip_keys.clone(),
            delivery_capacity: self.delivery.capacity,
            probes_enabled: self.probes.enabled,
            probe_interval_secs: self.probes.interval.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "APM_SLOW_REQUEST_THRESHOLD_MS",
        "APM_SANITIZE_MAX_DEPTH",
        "APM_SKIP_KEYS",
        "APM_MAX_EVENTS",
        "APM_DELIVERY_CAPACITY",
        "APM_PROBE_INTERVAL_SECS",
        "APM_PROBES_ENABLED",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_match_struct_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        assert_eq!(load(), AgentConfig::default());
    }

    #[test]
    fn test_overrides_are_applied() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("APM_SLOW_REQUEST_THRESHOLD_MS", "750");
        std::env::set_var("APM_SKIP_KEYS", "ssn, card_number ,");
        std::env::set_var("APM_PROBES_ENABLED", "off");
        std::env::set_var("APM_DELIVERY_CAPACITY", "16");
        let cfg = load();
        assert_eq!(cfg.transactions.slow_threshold, Duration::from_millis(750));
        assert_eq!(cfg.sanitizer.skip_keys, vec!["ssn", "card_number"]);
        assert!(!cfg.probes.enabled);
        assert_eq!(cfg.delivery.capacity, 16);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("APM_SLOW_REQUEST_THRESHOLD_MS", "fast");
        std::env::set_var("APM_PROBES_ENABLED", "maybe");
        std::env::set_var("APM_MAX_EVENTS", "-3");
        let cfg = load();
        assert_eq!(cfg.transactions.slow_threshold, Duration::from_millis(200));
        assert!(cfg.probes.enabled);
        assert_eq!(cfg.transactions.max_events, 2000);
        clear_env_vars();
    }

    #[test]
    fn test_floors_are_enforced() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("APM_SANITIZE_MAX_DEPTH", "0");
        std::env::set_var("APM_DELIVERY_CAPACITY", "0");
        std::env::set_var("APM_PROBE_INTERVAL_SECS", "0");
        let cfg = load();
        assert_eq!(cfg.sanitizer.max_depth, 1);
        assert_eq!(cfg.delivery.capacity, 1);
        assert_eq!(cfg.probes.interval, Duration::from_secs(1));
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_contains_all_fields() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let eff = load().effective_config();
        assert_eq!(eff.slow_threshold_ms, 200);
        assert_eq!(eff.sanitize_max_depth, 10);
        assert!(eff.skip_keys.contains(&"password".to_string()));
        assert!(eff.delivery_capacity > 0);
        assert_eq!(eff.probe_interval_secs, 60);
    }
}
