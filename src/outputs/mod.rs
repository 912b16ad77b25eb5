//! Consumer-facing output tables.
//!
//! Same handle scheme as the input tables: append-only, `NonZeroU32`
//! external ids carrying `index + 1`.

pub mod relay;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logsink::{LogSource, Metric, MetricValue};

use self::relay::{RelayOutput, RelayStats};

/// Hard cap on entries per output class.
pub const MAX_ENTRIES: usize = 4096;

/// Opaque handle to a configured meta-output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputHandle(NonZeroU32);

impl OutputHandle {
    fn from_index(index: usize) -> Option<OutputHandle> {
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

/// Process-wide output tables.
#[derive(Default)]
pub struct Outputs {
    relays: Vec<RelayOutput>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_relay(&mut self, relay: RelayOutput) -> Result<OutputHandle> {
        if self.relays.iter().any(|r| r.name() == relay.name()) {
            return Err(Error::Exists);
        }
        if self.relays.len() >= MAX_ENTRIES {
            return Err(Error::Oom);
        }
        self.relays.push(relay);
        OutputHandle::from_index(self.relays.len() - 1).ok_or(Error::Oom)
    }

    /// Find a relay by name. Linear: the table is small and frozen.
    pub fn relay_fbn(&self, name: &str) -> Result<OutputHandle> {
        self.relays
            .iter()
            .position(|r| r.name() == name)
            .and_then(OutputHandle::from_index)
            .ok_or(Error::NotFound)
    }

    pub fn relay_name(&self, handle: OutputHandle) -> Option<&str> {
        self.relays.get(handle.index()).map(|r| r.name())
    }

    pub fn relay_grab(&self, handle: OutputHandle) -> Result<()> {
        self.relay_entry(handle)?.grab()
    }

    pub fn relay_thaw(&self, handle: OutputHandle) -> Result<()> {
        self.relay_entry(handle)?.thaw();
        Ok(())
    }

    pub fn relay_set(&self, handle: OutputHandle, on: bool) -> Result<()> {
        self.relay_entry(handle)?.set_state(on)
    }

    /// Last requested state; never consults the backend.
    pub fn relay_get(&self, handle: OutputHandle) -> Result<bool> {
        Ok(self.relay_entry(handle)?.state())
    }

    pub fn relay_stats(&self, handle: OutputHandle) -> Result<RelayStats> {
        Ok(self.relay_entry(handle)?.stats())
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    fn relay_entry(&self, handle: OutputHandle) -> Result<&RelayOutput> {
        self.relays.get(handle.index()).ok_or(Error::Invalid)
    }

    /// The relay log source: per relay a state gauge and a cycle counter.
    pub fn log_source(self: &Arc<Self>) -> LogSource {
        let outputs = Arc::clone(self);
        LogSource {
            basename: "outputs",
            identifier: "relays",
            period: Duration::from_secs(10),
            collect: Box::new(move || {
                let mut metrics = Vec::with_capacity(outputs.relays.len() * 2);
                for r in &outputs.relays {
                    metrics.push(Metric {
                        name: r.name().to_string(),
                        value: MetricValue::FGauge(if r.state() { 1.0 } else { 0.0 }),
                    });
                    metrics.push(Metric {
                        name: format!("{}_cycles", r.name()),
                        value: MetricValue::ICounter(u64::from(r.cycles())),
                    });
                }
                metrics
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::relay::{RelayMissing, RelayOp, RelaySpec};
    use super::*;
    use crate::alarms::testing::CollectingAlarms;
    use crate::backend::{BackendId, BackendRegistry, ChannelId, OutputAddr};
    use crate::testutil::MockBackend;

    fn fixture() -> (Arc<BackendRegistry>, MockBackend) {
        let mock = MockBackend::default();
        let mut reg = BackendRegistry::new(Arc::new(CollectingAlarms::default()));
        reg.register("proto", Box::new(mock.clone())).unwrap();
        reg.setup().unwrap();
        reg.online().unwrap();
        (Arc::new(reg), mock)
    }

    fn relay(registry: &Arc<BackendRegistry>, name: &str, channel: u32) -> RelayOutput {
        RelayOutput::new(
            RelaySpec {
                name: name.to_string(),
                targets: vec![OutputAddr {
                    backend: BackendId(0),
                    channel: ChannelId(channel),
                }],
                op: RelayOp::First,
                missing: RelayMissing::Fail,
            },
            Arc::clone(registry),
        )
    }

    #[test]
    fn test_handles_and_lookup() {
        let (reg, _mock) = fixture();
        let mut outputs = Outputs::new();
        let h1 = outputs.add_relay(relay(&reg, "burner", 0)).unwrap();
        let h2 = outputs.add_relay(relay(&reg, "pump", 1)).unwrap();
        assert_eq!(h1.raw(), 1);
        assert_eq!(h2.raw(), 2);

        assert_eq!(outputs.relay_fbn("pump"), Ok(h2));
        assert_eq!(outputs.relay_fbn("nope"), Err(Error::NotFound));
        assert_eq!(outputs.relay_name(h1), Some("burner"));

        let bogus = OutputHandle(NonZeroU32::new(42).unwrap());
        assert_eq!(outputs.relay_get(bogus), Err(Error::Invalid));
        assert_eq!(outputs.relay_grab(bogus), Err(Error::Invalid));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (reg, _mock) = fixture();
        let mut outputs = Outputs::new();
        outputs.add_relay(relay(&reg, "burner", 0)).unwrap();
        assert_eq!(
            outputs.add_relay(relay(&reg, "burner", 1)).unwrap_err(),
            Error::Exists
        );
    }

    #[test]
    fn test_set_get_round_trip() {
        let (reg, mock) = fixture();
        let mut outputs = Outputs::new();
        let h = outputs.add_relay(relay(&reg, "burner", 0)).unwrap();

        assert_eq!(outputs.relay_get(h), Ok(false));
        outputs.relay_set(h, true).unwrap();
        assert_eq!(outputs.relay_get(h), Ok(true));
        assert_eq!(mock.relay_writes(), vec![(0, true)]);
    }

    #[test]
    fn test_log_source_shape() {
        let (reg, _mock) = fixture();
        let mut outputs = Outputs::new();
        let h = outputs.add_relay(relay(&reg, "burner", 0)).unwrap();
        let outputs = Arc::new(outputs);
        outputs.relay_set(h, true).unwrap();

        let source = outputs.log_source();
        assert_eq!(source.basename, "outputs");
        assert_eq!(source.identifier, "relays");

        let metrics = (source.collect)();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "burner");
        assert!(matches!(metrics[0].value, MetricValue::FGauge(v) if v == 1.0));
        assert_eq!(metrics[1].name, "burner_cycles");
        assert!(matches!(metrics[1].value, MetricValue::ICounter(1)));
    }
}
