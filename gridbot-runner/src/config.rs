//! `GridBotConfig`: a single TOML file drives the whole binary.
//!
//! Nested `Deserialize` structs, `#[serde(default = "fn")]` free functions
//! for defaults, one top-level aggregate, a `validate()` pass after parse:
//! the grid's own vocabulary (ratio, sell_ratio, levels, shift_levels, qty, ...).

use std::path::{Path, PathBuf};
use std::time::Duration;

use gridbot_core::model::RunMode;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridBotConfig {
    pub mode: RunMode,
    pub symbol: String,
    pub instance_id: String,
    pub grid: GridConfigToml,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfigToml {
    pub ratio: Decimal,
    pub sell_ratio: Decimal,
    pub levels: i32,
    pub shift_levels: i32,
    pub qty: Decimal,
    #[serde(default = "default_min_qty_multiple")]
    pub min_qty_multiple: Decimal,
    #[serde(default)]
    pub stop_price: Decimal,
    #[serde(default = "default_ratio_step")]
    pub ratio_step: Decimal,
}

fn default_min_qty_multiple() -> Decimal {
    Decimal::ONE
}

fn default_ratio_step() -> Decimal {
    Decimal::new(2, 3) // 0.002
}

impl GridConfigToml {
    pub fn to_strategy_config(&self) -> gridbot_strategies::GridConfig {
        gridbot_strategies::GridConfig {
            anchor: Decimal::ZERO,
            ratio: self.ratio,
            sell_ratio: self.sell_ratio,
            ratio_step: self.ratio_step,
            levels: self.levels,
            shift_levels: self.shift_levels,
            qty: self.qty,
            min_qty_multiple: self.min_qty_multiple,
            stop_price: self.stop_price,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub lock_takeover: bool,
    #[serde(default = "default_lock_stale_sec")]
    pub lock_stale_sec: u64,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_lock_stale_sec() -> u64 {
    60
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { dir: default_state_dir(), lock_takeover: false, lock_stale_sec: default_lock_stale_sec() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_reconnect_cooldown_sec")]
    pub reconnect_cooldown_sec: u64,
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,
}

fn default_max_failures() -> u32 {
    5
}

fn default_reconnect_cooldown_sec() -> u64 {
    30
}

fn default_half_open_success_threshold() -> u32 {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reconnect_cooldown_sec: default_reconnect_cooldown_sec(),
            half_open_success_threshold: default_half_open_success_threshold(),
        }
    }
}

impl BreakerConfig {
    pub fn to_core_config(&self) -> gridbot_core::circuit_breaker::CircuitBreakerConfig {
        gridbot_core::circuit_breaker::CircuitBreakerConfig {
            max_failures: self.max_failures,
            reconnect_cooldown: Duration::from_secs(self.reconnect_cooldown_sec),
            half_open_success_threshold: self.half_open_success_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub ws_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_keepalive_sec")]
    pub keepalive_sec: u64,
}

fn default_timeout_sec() -> u64 {
    15
}

fn default_keepalive_sec() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub runtime: RuntimeObservabilityConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { runtime: RuntimeObservabilityConfig::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeObservabilityConfig {
    #[serde(default)]
    pub reconcile_interval_sec: u64,
    #[serde(default = "default_heartbeat_interval_sec")]
    pub heartbeat_interval_sec: u64,
}

fn default_heartbeat_interval_sec() -> u64 {
    30
}

impl Default for RuntimeObservabilityConfig {
    fn default() -> Self {
        Self { reconcile_interval_sec: 0, heartbeat_interval_sec: default_heartbeat_interval_sec() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_notify_timeout_sec")]
    pub notify_timeout_sec: u64,
    #[serde(default = "default_drop_report_interval_sec")]
    pub drop_report_interval_sec: u64,
}

fn default_queue_capacity() -> usize {
    128
}

fn default_notify_timeout_sec() -> u64 {
    20
}

fn default_drop_report_interval_sec() -> u64 {
    60
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            notify_timeout_sec: default_notify_timeout_sec(),
            drop_report_interval_sec: default_drop_report_interval_sec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { json: false, level: default_log_level() }
    }
}

impl GridBotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: GridBotConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let symbol_ok = !self.symbol.is_empty()
            && self.symbol.len() <= 20
            && self.symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !symbol_ok {
            return Err(ConfigError::Validation("symbol must be uppercase [A-Z0-9]{1,20}".into()));
        }
        let instance_ok = !self.instance_id.is_empty()
            && self.instance_id.len() <= 24
            && self.instance_id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !instance_ok {
            return Err(ConfigError::Validation("instance_id must be lowercase [a-z0-9_-]{1,24}".into()));
        }
        if self.grid.ratio <= Decimal::ONE || self.grid.sell_ratio <= Decimal::ONE {
            return Err(ConfigError::Validation("grid.ratio and grid.sell_ratio must be > 1".into()));
        }
        if self.grid.shift_levels < 1 || self.grid.shift_levels > self.grid.levels {
            return Err(ConfigError::Validation("grid.shift_levels must satisfy 1 <= shift_levels <= levels".into()));
        }
        if self.grid.qty <= Decimal::ZERO {
            return Err(ConfigError::Validation("grid.qty must be > 0".into()));
        }
        if self.grid.min_qty_multiple < Decimal::ONE {
            return Err(ConfigError::Validation("grid.min_qty_multiple must be >= 1".into()));
        }
        if self.grid.stop_price < Decimal::ZERO {
            return Err(ConfigError::Validation("grid.stop_price must be >= 0".into()));
        }
        if self.grid.ratio_step < Decimal::ZERO {
            return Err(ConfigError::Validation("grid.ratio_step must be >= 0".into()));
        }
        let interval = self.observability.runtime.reconcile_interval_sec;
        if interval != 0 && interval < 10 {
            return Err(ConfigError::Validation("observability.runtime.reconcile_interval_sec must be 0 or >= 10".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = r#"
mode = "testnet"
symbol = "BTCUSDT"
instance_id = "inst-1"

[grid]
ratio = "1.1"
sell_ratio = "1.1"
levels = 5
shift_levels = 1
qty = "0.001"

[exchange]
base_url = "https://testnet.example.com"
ws_url = "wss://testnet.example.com/ws"
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: GridBotConfig = toml::from_str(MINIMAL_TOML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.state.dir, PathBuf::from("./data"));
        assert_eq!(config.circuit_breaker.max_failures, 5);
        assert_eq!(config.grid.ratio_step, Decimal::new(2, 3));
    }

    #[test]
    fn rejects_bad_symbol() {
        let bad = MINIMAL_TOML.replace("BTCUSDT", "btcusdt");
        let config: GridBotConfig = toml::from_str(&bad).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shift_levels_above_levels() {
        let bad = MINIMAL_TOML.replace("shift_levels = 1", "shift_levels = 9");
        let config: GridBotConfig = toml::from_str(&bad).unwrap();
        assert!(config.validate().is_err());
    }
}
