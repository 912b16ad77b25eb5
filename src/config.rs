use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::inputs::{MissingPolicy, SwitchOp, TempOp};
use crate::outputs::relay::{RelayMissing, RelayOp};

/// Top-level hydromux configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Control step cadence.
    #[serde(default = "default_tick_period", with = "humantime_duration")]
    pub tick_period: Duration,

    /// Backends keyed by name. Key order is registration order, which in
    /// turn is lifecycle phase order.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,

    #[serde(default)]
    pub temperatures: Vec<TemperatureConfig>,

    #[serde(default)]
    pub switches: Vec<SwitchConfig>,

    #[serde(default)]
    pub relays: Vec<RelayConfig>,
}

/// Per-backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,

    /// SPI device node for hw_p1 boards. The wire transport itself is
    /// supplied by a collaborator; without one the board runs simulated.
    pub device: Option<String>,

    #[serde(default)]
    pub sensors: Vec<SensorConfig>,

    #[serde(default)]
    pub relays: Vec<BoardRelayConfig>,

    #[serde(default)]
    pub switches: Vec<SwitchChannelConfig>,
}

/// Backend driver kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendKind {
    /// Prototype SPI sensor/relay board.
    #[serde(rename = "hw_p1")]
    HwP1,
    /// Simulated board with scriptable channels.
    #[serde(rename = "sim")]
    Sim,
}

/// RTD probe family wired to a sensor input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RtdKind {
    #[serde(rename = "PT1000")]
    Pt1000,
    #[serde(rename = "NI1000")]
    Ni1000,
}

/// One sensor channel on a board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    pub name: String,
    /// Board position, 1-based.
    pub id: u32,
    #[serde(rename = "type")]
    pub rtd: RtdKind,
    /// Calibration offset in °C.
    #[serde(default)]
    pub offset: f64,
}

/// State a relay falls back to when its backend goes offline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Failstate {
    On,
    #[default]
    Off,
}

/// One relay channel on a board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardRelayConfig {
    pub name: String,
    /// Board position, 1-based.
    pub id: u32,
    #[serde(default)]
    pub failstate: Failstate,
}

/// One switch channel on a (simulated) board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchChannelConfig {
    pub name: String,
    /// Board position, 1-based.
    pub id: u32,
}

/// Reference to a backend channel by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelRef {
    pub backend: String,
    pub name: String,
}

/// One temperature meta-input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemperatureConfig {
    pub name: String,

    /// Minimum interval between backend fetches.
    #[serde(default = "default_period", with = "humantime_duration")]
    pub period: Duration,

    #[serde(default = "default_temp_op")]
    pub op: TempOp,

    #[serde(default = "default_missing")]
    pub missing: MissingPolicy,

    /// Substitute sample in °C, required under `missing: ignoredef`.
    pub igntemp: Option<f64>,

    pub sources: Vec<ChannelRef>,
}

/// One switch meta-input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchConfig {
    pub name: String,

    #[serde(default = "default_period", with = "humantime_duration")]
    pub period: Duration,

    #[serde(default = "default_switch_op")]
    pub op: SwitchOp,

    #[serde(default = "default_missing")]
    pub missing: MissingPolicy,

    /// Substitute sample under `missing: ignoredef`.
    #[serde(default)]
    pub ignstate: bool,

    pub sources: Vec<ChannelRef>,
}

/// One relay meta-output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub name: String,

    #[serde(default = "default_relay_op")]
    pub op: RelayOp,

    #[serde(default = "default_relay_missing")]
    pub missing: RelayMissing,

    pub targets: Vec<ChannelRef>,
}

// --- Defaults ---

fn default_log_level() -> String {
    "info".to_string()
}
fn default_tick_period() -> Duration {
    Duration::from_secs(1)
}
fn default_period() -> Duration {
    Duration::from_secs(1)
}
fn default_temp_op() -> TempOp {
    TempOp::First
}
fn default_switch_op() -> SwitchOp {
    SwitchOp::First
}
fn default_missing() -> MissingPolicy {
    MissingPolicy::Fail
}
fn default_relay_op() -> RelayOp {
    RelayOp::First
}
fn default_relay_missing() -> RelayMissing {
    RelayMissing::Fail
}

// --- humantime_duration serde helper ---

mod humantime_duration {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime_format(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime_parse(&s).map_err(serde::de::Error::custom)
    }

    fn humantime_format(d: &Duration) -> String {
        let millis = d.as_millis();
        if millis < 1000 || !millis.is_multiple_of(1000) {
            return format!("{millis}ms");
        }
        let secs = d.as_secs();
        if secs.is_multiple_of(60) && secs >= 60 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }

    fn humantime_parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(n) = s.strip_suffix("ms") {
            n.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        } else if let Some(n) = s.strip_suffix('s') {
            n.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        } else if let Some(n) = s.strip_suffix('m') {
            n.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        } else if let Some(n) = s.strip_suffix('h') {
            n.parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        } else {
            // Try parsing as raw seconds
            s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                format!("invalid duration '{s}': expected format like '500ms', '30s', '5m'")
            })
        }
    }
}

// --- Loading ---

impl Config {
    /// Load config from a YAML file.
    ///
    /// Pipeline: read file → expand ${VAR} from the environment →
    /// deserialize YAML → validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let expanded = shellexpand::env(&raw)
            .map_err(|e| anyhow::anyhow!("env var interpolation failed: {e}"))?;

        let config: Config = serde_yaml_ng::from_str(&expanded)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.tick_period.is_zero() {
            anyhow::bail!("tick_period must be non-zero");
        }

        for (name, backend) in &self.backends {
            if backend.kind == BackendKind::HwP1 && !backend.switches.is_empty() {
                anyhow::bail!("backend '{name}': hw_p1 boards have no switch inputs");
            }
            if backend.sensors.is_empty()
                && backend.relays.is_empty()
                && backend.switches.is_empty()
            {
                anyhow::bail!("backend '{name}': no channels configured");
            }
            check_unique(name, "sensor", backend.sensors.iter().map(|s| s.name.as_str()))?;
            check_unique(name, "relay", backend.relays.iter().map(|r| r.name.as_str()))?;
            check_unique(name, "switch", backend.switches.iter().map(|s| s.name.as_str()))?;
        }

        let mut seen = std::collections::HashSet::new();
        for t in &self.temperatures {
            if !seen.insert(t.name.as_str()) {
                anyhow::bail!("duplicate temperature '{}'", t.name);
            }
            if t.sources.is_empty() {
                anyhow::bail!("temperature '{}': no sources", t.name);
            }
            if t.missing == MissingPolicy::IgnoreDefault && t.igntemp.is_none() {
                anyhow::bail!("temperature '{}': missing=ignoredef requires igntemp", t.name);
            }
            if t.period.is_zero() {
                anyhow::bail!("temperature '{}': period must be non-zero", t.name);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for s in &self.switches {
            if !seen.insert(s.name.as_str()) {
                anyhow::bail!("duplicate switch '{}'", s.name);
            }
            if s.sources.is_empty() {
                anyhow::bail!("switch '{}': no sources", s.name);
            }
            if s.period.is_zero() {
                anyhow::bail!("switch '{}': period must be non-zero", s.name);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for r in &self.relays {
            if !seen.insert(r.name.as_str()) {
                anyhow::bail!("duplicate relay '{}'", r.name);
            }
            if r.targets.is_empty() {
                anyhow::bail!("relay '{}': no targets", r.name);
            }
        }

        Ok(())
    }
}

fn check_unique<'a>(
    backend: &str,
    what: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            anyhow::bail!("backend '{backend}': duplicate {what} '{name}'");
        }
    }
    Ok(())
}
