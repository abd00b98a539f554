//! Job settings and pool configuration.
//!
//! [`JobSettings`] is the caller-side configuration a component carries and
//! replicates into every worker it launches. [`PoolConfig`] controls how the
//! component launches those workers.

use crate::error::{JobError, PoolError, Result};
use crate::memory::{DEFAULT_WORKER_BASE, MemorySize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Well-known setting keys.
pub mod keys {
    pub const RESOLUTION: &str = "resolution";
    pub const LANGUAGE: &str = "language";
    pub const PAPER_SIZE: &str = "paper_size";
    pub const MAX_LINE_WIDTH: &str = "max_line_width";
    pub const OUTPUT_FORMAT: &str = "output_format";
    pub const PARALLELISM: &str = "parallelism";
}

/// A single setting value.
///
/// Floats are always finite: JSON has no encoding for NaN or infinity, and
/// every value must survive the copy into a worker. Non-finite floats are
/// kept as their text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    /// Parse a CLI-style value: booleans and integers first, then finite
    /// floats, else text.
    pub fn parse(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            Self::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            Self::Int(i)
        } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
            Self::Float(f)
        } else {
            Self::Text(raw.to_string())
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        if v.is_finite() {
            Self::Float(v)
        } else {
            Self::Text(v.to_string())
        }
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Caller-side job configuration.
///
/// A plain value: cloning it into a worker copies every entry and leaves the
/// source untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSettings {
    entries: BTreeMap<String, SettingValue>,
}

impl JobSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse a `key=value` pair and insert it.
    pub fn set_pair(&mut self, pair: &str) -> std::result::Result<(), JobError> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| JobError::invalid_setting(pair, "expected key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(JobError::invalid_setting(pair, "empty key"));
        }
        self.set(key, SettingValue::parse(value.trim()));
        Ok(())
    }

    /// Integer setting, falling back to `default` when unset.
    pub fn int_or(&self, key: &str, default: i64) -> std::result::Result<i64, JobError> {
        match self.get(key) {
            None => Ok(default),
            Some(SettingValue::Int(i)) => Ok(*i),
            Some(other) => Err(JobError::invalid_setting(
                key,
                format!("expected an integer, got '{}'", other),
            )),
        }
    }

    /// Text setting, falling back to `default` when unset. Scalars are rendered.
    pub fn text_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| default.to_string())
    }
}

/// Worker pool configuration for one component instance.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrently running worker processes. 0 = always run in-process.
    pub max_process_count: usize,
    /// Loopback host workers listen on.
    pub host: String,
    /// Inclusive port range scanned by the port broker.
    pub port_low: u16,
    pub port_high: u16,
    /// How long to wait for a worker's listener.
    pub ready_timeout: Duration,
    /// Fixed part of the worker memory ceiling.
    pub memory_base: MemorySize,
    /// Copy worker stdout/stderr into the parent's stderr.
    pub redirect_output: bool,
    /// Keep the parent alive until the worker has exited.
    pub block_exit: bool,
    /// Worker executable. `None` re-executes the current program.
    pub program: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_process_count: 2,
            host: "127.0.0.1".to_string(),
            port_low: 49200,
            port_high: 49400,
            ready_timeout: Duration::from_secs(15),
            memory_base: DEFAULT_WORKER_BASE,
            redirect_output: true,
            block_exit: true,
            program: None,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that never launches workers.
    pub fn local_only() -> Self {
        Self {
            max_process_count: 0,
            ..Self::default()
        }
    }

    pub fn with_max_process_count(mut self, count: usize) -> Self {
        self.max_process_count = count;
        self
    }

    pub fn with_port_range(mut self, low: u16, high: u16) -> Self {
        self.port_low = low;
        self.port_high = high;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_memory_base(mut self, base: MemorySize) -> Self {
        self.memory_base = base;
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_redirect_output(mut self, enabled: bool) -> Self {
        self.redirect_output = enabled;
        self
    }

    pub fn with_block_exit(mut self, enabled: bool) -> Self {
        self.block_exit = enabled;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// Reads `DOCPOOL_MAX_PROCESSES`, `DOCPOOL_PORT_RANGE` (`low-high`),
    /// `DOCPOOL_READY_TIMEOUT_MS` and `DOCPOOL_MEMORY_BASE`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var("DOCPOOL_MAX_PROCESSES") {
            self.max_process_count = raw
                .trim()
                .parse()
                .map_err(|_| PoolError::Config(format!("DOCPOOL_MAX_PROCESSES='{}'", raw)))?;
        }
        if let Ok(raw) = std::env::var("DOCPOOL_PORT_RANGE") {
            let (low, high) = parse_port_range(&raw)?;
            self.port_low = low;
            self.port_high = high;
        }
        if let Ok(raw) = std::env::var("DOCPOOL_READY_TIMEOUT_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| PoolError::Config(format!("DOCPOOL_READY_TIMEOUT_MS='{}'", raw)))?;
            self.ready_timeout = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var("DOCPOOL_MEMORY_BASE") {
            self.memory_base = raw
                .parse()
                .map_err(|e| PoolError::Config(format!("DOCPOOL_MEMORY_BASE: {}", e)))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_low > self.port_high {
            return Err(PoolError::Config(format!(
                "port range {}-{} is empty",
                self.port_low, self.port_high
            )));
        }
        if self.port_low == 0 {
            return Err(PoolError::Config("port 0 cannot be brokered".into()));
        }
        Ok(())
    }
}

/// Parse `low-high` into an inclusive port range.
pub fn parse_port_range(raw: &str) -> Result<(u16, u16)> {
    let bad = || PoolError::Config(format!("invalid port range '{}', expected low-high", raw));
    let (low, high) = raw.trim().split_once('-').ok_or_else(bad)?;
    let low: u16 = low.trim().parse().map_err(|_| bad())?;
    let high: u16 = high.trim().parse().map_err(|_| bad())?;
    if low == 0 || low > high {
        return Err(bad());
    }
    Ok((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_does_not_alias() {
        let source = JobSettings::new().with(keys::RESOLUTION, 150i64);
        let mut copy = source.clone();
        copy.set(keys::RESOLUTION, 300i64);
        assert_eq!(source.get(keys::RESOLUTION), Some(&SettingValue::Int(150)));
        assert_eq!(copy.get(keys::RESOLUTION), Some(&SettingValue::Int(300)));
    }

    #[test]
    fn test_every_value_survives_the_wire() {
        let settings = JobSettings::new()
            .with("flag", true)
            .with("off", false)
            .with("zero", 0i64)
            .with("min", i64::MIN)
            .with("max", i64::MAX)
            .with("half", 1.5)
            .with("whole_float", 3.0)
            .with("negative", -2.25)
            .with("large", 1e20)
            .with("nan", f64::NAN)
            .with("inf", f64::INFINITY)
            .with("empty", "")
            .with("looks_bool", "true")
            .with("looks_int", "42")
            .with("unicode", "Grüße\n");
        let mut parsed = JobSettings::new();
        for raw in ["nan", "inf", "-inf", "NaN", "1e400", "2.5", "-7", "false", "x=y"] {
            parsed.set(format!("cli_{}", raw), SettingValue::parse(raw));
        }

        for source in [settings, parsed] {
            let json = serde_json::to_string(&source).unwrap();
            assert!(!json.contains("null"), "{json}");
            let back: JobSettings = serde_json::from_str(&json).unwrap();
            assert_eq!(back, source);
        }
    }

    #[test]
    fn test_non_finite_floats_become_text() {
        assert_eq!(SettingValue::parse("nan"), SettingValue::Text("nan".into()));
        assert_eq!(SettingValue::parse("inf"), SettingValue::Text("inf".into()));
        assert_eq!(SettingValue::parse("1e400"), SettingValue::Text("1e400".into()));
        assert_eq!(SettingValue::parse("0.5"), SettingValue::Float(0.5));
        assert_eq!(SettingValue::from(f64::NEG_INFINITY), SettingValue::Text("-inf".into()));
    }

    #[test]
    fn test_set_pair_parses_types() {
        let mut s = JobSettings::new();
        s.set_pair("resolution=300").unwrap();
        s.set_pair("language=de").unwrap();
        s.set_pair("strict=true").unwrap();
        s.set_pair("scale=1.5").unwrap();
        assert_eq!(s.get("resolution"), Some(&SettingValue::Int(300)));
        assert_eq!(s.get("language"), Some(&SettingValue::Text("de".into())));
        assert_eq!(s.get("strict"), Some(&SettingValue::Bool(true)));
        assert_eq!(s.get("scale"), Some(&SettingValue::Float(1.5)));
        assert!(s.set_pair("novalue").is_err());
        assert!(s.set_pair("=3").is_err());
    }

    #[test]
    fn test_settings_json_is_flat() {
        let s = JobSettings::new()
            .with(keys::LANGUAGE, "fr")
            .with(keys::RESOLUTION, 96i64);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"language":"fr","resolution":96}"#);
        let back: JobSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_int_or_rejects_text() {
        let s = JobSettings::new().with(keys::RESOLUTION, "high");
        assert!(matches!(
            s.int_or(keys::RESOLUTION, 72),
            Err(JobError::InvalidSetting { .. })
        ));
        assert_eq!(JobSettings::new().int_or(keys::RESOLUTION, 72).unwrap(), 72);
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_process_count, 2);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.port_low <= config.port_high);
        assert_eq!(config.memory_base.as_mib(), 1024);
        assert!(config.program.is_none());
        assert_eq!(PoolConfig::local_only().max_process_count, 0);
    }

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port_range("50000-50010").unwrap(), (50000, 50010));
        assert_eq!(parse_port_range(" 7 - 7 ").unwrap(), (7, 7));
        assert!(parse_port_range("50010-50000").is_err());
        assert!(parse_port_range("0-10").is_err());
        assert!(parse_port_range("abc").is_err());
    }

    #[test]
    fn test_validate_rejects_empty_range() {
        let config = PoolConfig::default().with_port_range(10, 5);
        assert!(config.validate().is_err());
    }
}
