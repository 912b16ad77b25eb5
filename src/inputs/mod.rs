//! Consumer-facing input tables.
//!
//! Meta-inputs are appended during config and never reordered. Handles are
//! `NonZeroU32` carrying `index + 1`, so an all-zero struct field can never
//! alias a real entry and `Option<InputHandle>` costs nothing.

pub mod switch;
pub mod temperature;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Ticks;
use crate::error::{Error, Result};
use crate::logsink::{LogSource, Metric, MetricValue};
use crate::temp::Temp;

use self::switch::SwitchInput;
use self::temperature::TemperatureInput;

/// Hard cap on entries per input class.
pub const MAX_ENTRIES: usize = 4096;

/// Aggregation operation over temperature sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempOp {
    First,
    Min,
    Max,
}

/// Aggregation operation over switch sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchOp {
    First,
    And,
    Or,
}

/// What to do when a source cannot deliver a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Abort the refresh with the source's error.
    Fail,
    /// Skip the source silently.
    Ignore,
    /// Substitute the configured default sample.
    #[serde(rename = "ignoredef")]
    IgnoreDefault,
}

/// Opaque handle to a configured meta-input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputHandle(NonZeroU32);

impl InputHandle {
    fn from_index(index: usize) -> Option<InputHandle> {
        u32::try_from(index + 1).ok().and_then(NonZeroU32::new).map(Self)
    }

    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// External representation: `index + 1`, never zero.
    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

/// Process-wide input tables, one namespace per entity class.
#[derive(Default)]
pub struct Inputs {
    temperatures: Vec<TemperatureInput>,
    switches: Vec<SwitchInput>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    // --- temperatures ---

    pub fn add_temperature(&mut self, input: TemperatureInput) -> Result<InputHandle> {
        if self.temperatures.iter().any(|t| t.name() == input.name()) {
            return Err(Error::Exists);
        }
        if self.temperatures.len() >= MAX_ENTRIES {
            return Err(Error::Oom);
        }
        self.temperatures.push(input);
        InputHandle::from_index(self.temperatures.len() - 1).ok_or(Error::Oom)
    }

    /// Find a temperature by name. Linear: the table is small and frozen.
    pub fn temperature_fbn(&self, name: &str) -> Result<InputHandle> {
        self.temperatures
            .iter()
            .position(|t| t.name() == name)
            .and_then(InputHandle::from_index)
            .ok_or(Error::NotFound)
    }

    pub fn temperature_name(&self, handle: InputHandle) -> Option<&str> {
        self.temperatures.get(handle.index()).map(|t| t.name())
    }

    pub fn temperature_get(&self, handle: InputHandle) -> Result<Temp> {
        self.temperature_entry(handle)?.get()
    }

    pub fn temperature_time(&self, handle: InputHandle) -> Result<Ticks> {
        Ok(self.temperature_entry(handle)?.time())
    }

    pub fn temperature_count(&self) -> usize {
        self.temperatures.len()
    }

    fn temperature_entry(&self, handle: InputHandle) -> Result<&TemperatureInput> {
        self.temperatures.get(handle.index()).ok_or(Error::Invalid)
    }

    // --- switches ---

    pub fn add_switch(&mut self, input: SwitchInput) -> Result<InputHandle> {
        if self.switches.iter().any(|s| s.name() == input.name()) {
            return Err(Error::Exists);
        }
        if self.switches.len() >= MAX_ENTRIES {
            return Err(Error::Oom);
        }
        self.switches.push(input);
        InputHandle::from_index(self.switches.len() - 1).ok_or(Error::Oom)
    }

    pub fn switch_fbn(&self, name: &str) -> Result<InputHandle> {
        self.switches
            .iter()
            .position(|s| s.name() == name)
            .and_then(InputHandle::from_index)
            .ok_or(Error::NotFound)
    }

    pub fn switch_name(&self, handle: InputHandle) -> Option<&str> {
        self.switches.get(handle.index()).map(|s| s.name())
    }

    pub fn switch_get(&self, handle: InputHandle) -> Result<bool> {
        self.switch_entry(handle)?.get()
    }

    pub fn switch_time(&self, handle: InputHandle) -> Result<Ticks> {
        Ok(self.switch_entry(handle)?.time())
    }

    pub fn switch_count(&self) -> usize {
        self.switches.len()
    }

    fn switch_entry(&self, handle: InputHandle) -> Result<&SwitchInput> {
        self.switches.get(handle.index()).ok_or(Error::Invalid)
    }

    /// The temperature log source: one gauge per configured temperature,
    /// value in Celsius, 10-second cadence.
    pub fn log_source(self: &Arc<Self>) -> LogSource {
        let inputs = Arc::clone(self);
        LogSource {
            basename: "inputs",
            identifier: "temperatures",
            period: Duration::from_secs(10),
            collect: Box::new(move || {
                inputs
                    .temperatures
                    .iter()
                    .filter_map(|t| {
                        t.get().ok().map(|v| Metric {
                            name: t.name().to_string(),
                            value: MetricValue::FGauge(v.as_celsius()),
                        })
                    })
                    .collect()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::temperature::TemperatureSpec;
    use super::*;
    use crate::alarms::testing::CollectingAlarms;
    use crate::backend::{BackendId, BackendRegistry, ChannelId, InputAddr, InputKind};
    use crate::temp::TempReading;
    use crate::testutil::MockBackend;

    fn fixture() -> (Arc<BackendRegistry>, MockBackend) {
        let mock = MockBackend::default();
        let mut reg = BackendRegistry::new(Arc::new(CollectingAlarms::default()));
        reg.register("proto", Box::new(mock.clone())).unwrap();
        reg.setup().unwrap();
        reg.online().unwrap();
        (Arc::new(reg), mock)
    }

    fn temp_input(
        name: &str,
        registry: &Arc<BackendRegistry>,
        channel: u32,
    ) -> TemperatureInput {
        TemperatureInput::new(
            TemperatureSpec {
                name: name.to_string(),
                sources: vec![InputAddr {
                    backend: BackendId(0),
                    channel: ChannelId(channel),
                }],
                op: TempOp::First,
                missing: MissingPolicy::Fail,
                igntemp: Temp::from_celsius(25.0),
                period: Ticks(1000),
            },
            Arc::clone(registry),
            Arc::new(CollectingAlarms::default()),
        )
    }

    #[test]
    fn test_handle_is_index_plus_one() {
        let (reg, mock) = fixture();
        mock.script_temp(0, TempReading::Value(Temp::from_celsius(20.0)));
        let mut inputs = Inputs::new();
        let h = inputs.add_temperature(temp_input("boiler", &reg, 0)).unwrap();
        assert_eq!(h.raw(), 1);
        assert_eq!(inputs.temperature_fbn("boiler"), Ok(h));
        assert_eq!(inputs.temperature_name(h), Some("boiler"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (reg, _mock) = fixture();
        let mut inputs = Inputs::new();
        inputs.add_temperature(temp_input("boiler", &reg, 0)).unwrap();
        assert_eq!(
            inputs.add_temperature(temp_input("boiler", &reg, 1)).unwrap_err(),
            Error::Exists
        );
    }

    #[test]
    fn test_unknown_name_and_bad_handle() {
        let (reg, _mock) = fixture();
        let mut inputs = Inputs::new();
        let h = inputs.add_temperature(temp_input("boiler", &reg, 0)).unwrap();
        assert_eq!(inputs.temperature_fbn("ghost"), Err(Error::NotFound));

        // A handle beyond the table maps to Invalid, not a panic.
        let bogus = InputHandle(NonZeroU32::new(99).unwrap());
        assert_eq!(inputs.temperature_get(bogus), Err(Error::Invalid));
        assert!(inputs.temperature_name(bogus).is_none());
        let _ = h;
    }

    #[test]
    fn test_log_source_emits_celsius_gauges() {
        let (reg, mock) = fixture();
        mock.script_temp(0, TempReading::Value(Temp::from_celsius(42.0)));
        mock.script_temp_fault(1, Error::SensorDisconnected);
        // The collector runs on the real clock; a far-future sample time
        // keeps the source from ever looking stale.
        mock.script_time(InputKind::Temperature, 0, Ticks(u64::MAX / 2));

        let mut inputs = Inputs::new();
        inputs.add_temperature(temp_input("boiler", &reg, 0)).unwrap();
        inputs.add_temperature(temp_input("broken", &reg, 1)).unwrap();
        let inputs = Arc::new(inputs);

        let source = inputs.log_source();
        assert_eq!(source.basename, "inputs");
        assert_eq!(source.identifier, "temperatures");
        assert_eq!(source.period, Duration::from_secs(10));

        // The failed sensor is dropped from the metric set, not zeroed.
        let metrics = (source.collect)();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "boiler");
        let MetricValue::FGauge(v) = metrics[0].value else {
            panic!("expected gauge");
        };
        assert!((v - 42.0).abs() < 1e-9);
    }
}
