pub mod hw_p1;
pub mod sim;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use crate::alarms::AlarmSink;
use crate::clock::Ticks;
use crate::error::{Error, Result};
use crate::temp::TempReading;

/// Hard cap on registered backends. A plant installation has a handful of
/// boards; the cap exists so a runaway config fails loudly.
pub const MAX_BACKENDS: usize = 32;

/// Index of a backend within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendId(pub(crate) u32);

/// Backend-local channel number, zero-based and dense. Resolved from the
/// configured channel name by the backend itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelId(pub u32);

/// Kind tag for input channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Temperature,
    Switch,
}

/// Address of an input channel: backend plus backend-local channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAddr {
    pub backend: BackendId,
    pub channel: ChannelId,
}

/// Address of an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputAddr {
    pub backend: BackendId,
    pub channel: ChannelId,
}

/// Capability set every hardware backend implements.
///
/// Lifecycle callbacks with a default body are optional: a backend that
/// leaves them in place is skipped for that phase without counting as a
/// failure. `exit` is mandatory. Channel accessors read/stage against the
/// backend's own cache; they never block on hardware.
pub trait HwBackend: Send + Sync {
    /// Parse/finalize configuration. Runs once, before `online`.
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Bring hardware live. After success, `input_time` must succeed for
    /// every configured channel even before the first `input()`.
    fn online(&self) -> Result<()> {
        Ok(())
    }

    /// Sample all inputs into the backend cache.
    fn input(&self) -> Result<()> {
        Ok(())
    }

    /// Flush staged outputs to hardware. Between consecutive calls,
    /// `set_relay` may hit the same channel any number of times; only the
    /// most recent value is enacted.
    fn output(&self) -> Result<()> {
        Ok(())
    }

    /// Quiesce hardware.
    fn offline(&self) -> Result<()> {
        Ok(())
    }

    /// Release private resources. Unconditional, runs exactly once at
    /// process teardown.
    fn exit(&self);

    /// Last cached reading of a temperature channel.
    fn temperature(&self, _id: ChannelId) -> Result<TempReading> {
        Err(Error::NotImplemented)
    }

    /// Last cached state of a switch channel.
    fn switch(&self, _id: ChannelId) -> Result<bool> {
        Err(Error::NotImplemented)
    }

    /// Timestamp of the last sample taken on an input channel.
    fn input_time(&self, _kind: InputKind, _id: ChannelId) -> Result<Ticks> {
        Err(Error::NotImplemented)
    }

    /// Currently staged state of a relay channel. Diagnostics only.
    fn relay_state(&self, _id: ChannelId) -> Result<bool> {
        Err(Error::NotImplemented)
    }

    /// Stage a relay state, coalesced until the next `output()`.
    fn set_relay(&self, _id: ChannelId, _on: bool) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Resolve a configured input channel name to its backend-local id.
    fn input_by_name(&self, _kind: InputKind, _name: &str) -> Option<ChannelId> {
        None
    }

    /// Resolve a configured output channel name to its backend-local id.
    fn output_by_name(&self, _name: &str) -> Option<ChannelId> {
        None
    }
}

struct BackendEntry {
    name: String,
    initialized: AtomicBool,
    online: AtomicBool,
    driver: Box<dyn HwBackend>,
}

/// Process-wide table of hardware backends.
///
/// Append-only while config runs; frozen behind an `Arc` afterwards. The
/// per-backend run flags are atomics and advance monotonically within a
/// lifecycle phase, so phase drivers and channel accessors never need a
/// lock over the table itself.
pub struct BackendRegistry {
    backends: Vec<BackendEntry>,
    alarms: Arc<dyn AlarmSink>,
}

impl BackendRegistry {
    pub fn new(alarms: Arc<dyn AlarmSink>) -> Self {
        Self {
            backends: Vec::new(),
            alarms,
        }
    }

    /// Append a backend under a unique name.
    pub fn register(&mut self, name: &str, driver: Box<dyn HwBackend>) -> Result<BackendId> {
        if self.backends.iter().any(|b| b.name == name) {
            return Err(Error::Exists);
        }
        if self.backends.len() >= MAX_BACKENDS {
            return Err(Error::Oom);
        }
        let id = BackendId(self.backends.len() as u32);
        self.backends.push(BackendEntry {
            name: name.to_string(),
            initialized: AtomicBool::new(false),
            online: AtomicBool::new(false),
            driver,
        });
        debug!(backend = %name, id = id.0, "backend registered");
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn name(&self, id: BackendId) -> Option<&str> {
        self.backends.get(id.0 as usize).map(|b| b.name.as_str())
    }

    pub fn backend_by_name(&self, name: &str) -> Option<BackendId> {
        self.backends
            .iter()
            .position(|b| b.name == name)
            .map(|i| BackendId(i as u32))
    }

    pub fn is_online(&self, id: BackendId) -> bool {
        self.backends
            .get(id.0 as usize)
            .is_some_and(|b| b.online.load(Ordering::Acquire))
    }

    /// Resolve a (backend name, channel name) pair to an input address.
    pub fn resolve_input(
        &self,
        backend_name: &str,
        kind: InputKind,
        channel_name: &str,
    ) -> Result<InputAddr> {
        let backend = self.backend_by_name(backend_name).ok_or(Error::NotFound)?;
        let channel = self.backends[backend.0 as usize]
            .driver
            .input_by_name(kind, channel_name)
            .ok_or(Error::NotFound)?;
        Ok(InputAddr { backend, channel })
    }

    /// Resolve a (backend name, channel name) pair to an output address.
    pub fn resolve_output(&self, backend_name: &str, channel_name: &str) -> Result<OutputAddr> {
        let backend = self.backend_by_name(backend_name).ok_or(Error::NotFound)?;
        let channel = self.backends[backend.0 as usize]
            .driver
            .output_by_name(channel_name)
            .ok_or(Error::NotFound)?;
        Ok(OutputAddr { backend, channel })
    }

    // --- lifecycle phases ---

    /// Run `setup` on every backend not yet initialized.
    pub fn setup(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::NotConfigured);
        }
        let mut failed = false;
        for b in &self.backends {
            if b.initialized.load(Ordering::Acquire) {
                continue;
            }
            match b.driver.setup() {
                Ok(()) => {
                    b.initialized.store(true, Ordering::Release);
                    info!(backend = %b.name, "backend set up");
                }
                Err(e) => {
                    error!(backend = %b.name, error = %e, "backend setup failed");
                    failed = true;
                }
            }
        }
        if failed { Err(Error::Generic) } else { Ok(()) }
    }

    /// Bring every initialized, not-yet-online backend live. A backend
    /// that never initialized counts as a failure here: the controller
    /// must not come up with dead hardware.
    pub fn online(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::NotConfigured);
        }
        let mut failed = false;
        for b in &self.backends {
            if !b.initialized.load(Ordering::Acquire) {
                error!(backend = %b.name, "backend never initialized, cannot go online");
                failed = true;
                continue;
            }
            if b.online.load(Ordering::Acquire) {
                continue;
            }
            match b.driver.online() {
                Ok(()) => {
                    b.online.store(true, Ordering::Release);
                    info!(backend = %b.name, "backend online");
                }
                Err(e) => {
                    error!(backend = %b.name, error = %e, "backend failed to come online");
                    failed = true;
                }
            }
        }
        if failed { Err(Error::Generic) } else { Ok(()) }
    }

    /// Sample inputs on every online backend. Failures raise alarms and
    /// are folded into the phase result; they never abort the sweep.
    pub fn input(&self) -> Result<()> {
        self.io_phase("input", |d| d.input())
    }

    /// Flush staged outputs on every online backend.
    pub fn output(&self) -> Result<()> {
        self.io_phase("output", |d| d.output())
    }

    fn io_phase(&self, phase: &str, f: impl Fn(&dyn HwBackend) -> Result<()>) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::NotConfigured);
        }
        let mut failed = false;
        for b in &self.backends {
            if !b.online.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = f(b.driver.as_ref()) {
                error!(backend = %b.name, error = %e, "backend {phase} failed");
                self.alarms
                    .raise(e, &format!("backend '{}' {phase} failed: {e}", b.name));
                failed = true;
            }
        }
        if failed { Err(Error::Generic) } else { Ok(()) }
    }

    /// Quiesce every online backend.
    pub fn offline(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::NotConfigured);
        }
        let mut failed = false;
        for b in &self.backends {
            if !b.online.load(Ordering::Acquire) {
                continue;
            }
            match b.driver.offline() {
                Ok(()) => {
                    b.online.store(false, Ordering::Release);
                    info!(backend = %b.name, "backend offline");
                }
                Err(e) => {
                    error!(backend = %b.name, error = %e, "backend offline failed");
                    failed = true;
                }
            }
        }
        if failed { Err(Error::Generic) } else { Ok(()) }
    }

    /// Release every backend unconditionally. Terminal.
    pub fn exit(&self) {
        for b in &self.backends {
            b.driver.exit();
            b.online.store(false, Ordering::Release);
            b.initialized.store(false, Ordering::Release);
            debug!(backend = %b.name, "backend released");
        }
    }

    // --- channel accessors ---

    fn online_entry(&self, id: BackendId) -> Result<&BackendEntry> {
        let entry = self.backends.get(id.0 as usize).ok_or(Error::Invalid)?;
        if !entry.online.load(Ordering::Acquire) {
            return Err(Error::Offline);
        }
        Ok(entry)
    }

    /// Last cached reading of a temperature channel.
    pub fn temperature(&self, addr: InputAddr) -> Result<TempReading> {
        self.online_entry(addr.backend)?
            .driver
            .temperature(addr.channel)
    }

    /// Last cached state of a switch channel.
    pub fn switch(&self, addr: InputAddr) -> Result<bool> {
        self.online_entry(addr.backend)?.driver.switch(addr.channel)
    }

    /// Timestamp of the last sample on an input channel.
    pub fn input_time(&self, kind: InputKind, addr: InputAddr) -> Result<Ticks> {
        self.online_entry(addr.backend)?
            .driver
            .input_time(kind, addr.channel)
    }

    /// Staged state of a relay channel. Diagnostics only.
    pub fn relay_state(&self, addr: OutputAddr) -> Result<bool> {
        self.online_entry(addr.backend)?
            .driver
            .relay_state(addr.channel)
    }

    /// Stage a relay state on a backend channel.
    pub fn set_relay(&self, addr: OutputAddr, on: bool) -> Result<()> {
        self.online_entry(addr.backend)?
            .driver
            .set_relay(addr.channel, on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::testing::CollectingAlarms;
    use crate::temp::Temp;
    use crate::testutil::MockBackend;

    fn registry_with(mocks: &[(&str, &MockBackend)]) -> BackendRegistry {
        let mut reg = BackendRegistry::new(Arc::new(CollectingAlarms::default()));
        for (name, mock) in mocks {
            reg.register(name, Box::new((*mock).clone())).unwrap();
        }
        reg
    }

    #[test]
    fn test_register_name_collision() {
        let mock = MockBackend::default();
        let mut reg = registry_with(&[("proto", &mock)]);
        let err = reg.register("proto", Box::new(mock.clone())).unwrap_err();
        assert_eq!(err, Error::Exists);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_capacity() {
        let mut reg = BackendRegistry::new(Arc::new(CollectingAlarms::default()));
        for i in 0..MAX_BACKENDS {
            reg.register(&format!("b{i}"), Box::new(MockBackend::default()))
                .unwrap();
        }
        let err = reg
            .register("overflow", Box::new(MockBackend::default()))
            .unwrap_err();
        assert_eq!(err, Error::Oom);
    }

    #[test]
    fn test_phases_on_empty_registry() {
        let reg = BackendRegistry::new(Arc::new(CollectingAlarms::default()));
        assert_eq!(reg.setup(), Err(Error::NotConfigured));
        assert_eq!(reg.online(), Err(Error::NotConfigured));
        assert_eq!(reg.input(), Err(Error::NotConfigured));
        assert_eq!(reg.output(), Err(Error::NotConfigured));
        assert_eq!(reg.offline(), Err(Error::NotConfigured));
    }

    #[test]
    fn test_lifecycle_order_and_gating() {
        let mock = MockBackend::default();
        let reg = registry_with(&[("proto", &mock)]);

        reg.setup().unwrap();
        // Second setup sweep skips the already-initialized backend.
        reg.setup().unwrap();
        reg.online().unwrap();
        reg.online().unwrap();
        reg.input().unwrap();
        reg.output().unwrap();
        reg.offline().unwrap();
        reg.exit();

        assert_eq!(
            mock.lifecycle_log(),
            vec!["setup", "online", "input", "output", "offline", "exit"]
        );
    }

    #[test]
    fn test_online_requires_setup() {
        let mock = MockBackend::default();
        mock.fail_phase("setup");
        let reg = registry_with(&[("proto", &mock)]);

        assert_eq!(reg.setup(), Err(Error::Generic));
        // Setup failed, so the backend never initialized: online must fail too.
        assert_eq!(reg.online(), Err(Error::Generic));
        assert!(!reg.is_online(BackendId(0)));
    }

    #[test]
    fn test_io_skips_offline_backends() {
        let live = MockBackend::default();
        let dead = MockBackend::default();
        dead.fail_phase("online");
        let reg = registry_with(&[("live", &live), ("dead", &dead)]);

        reg.setup().unwrap();
        assert_eq!(reg.online(), Err(Error::Generic));

        // The live backend still gets input/output; the dead one is skipped
        // silently (its failure was reported at the online phase).
        reg.input().unwrap();
        reg.output().unwrap();
        assert!(live.lifecycle_log().contains(&"input"));
        assert!(!dead.lifecycle_log().contains(&"input"));
    }

    #[test]
    fn test_input_failure_raises_alarm() {
        let alarms = Arc::new(CollectingAlarms::default());
        let mock = MockBackend::default();
        let mut reg = BackendRegistry::new(Arc::clone(&alarms) as Arc<dyn AlarmSink>);
        reg.register("proto", Box::new(mock.clone())).unwrap();
        reg.setup().unwrap();
        reg.online().unwrap();

        mock.fail_phase("input");
        assert_eq!(reg.input(), Err(Error::Generic));
        assert_eq!(alarms.count(), 1);
        assert_eq!(alarms.raised()[0].0, Error::Generic);
    }

    #[test]
    fn test_accessor_validation() {
        let mock = MockBackend::default();
        mock.script_temp(0, TempReading::Value(Temp::from_celsius(21.0)));
        let reg = registry_with(&[("proto", &mock)]);

        let addr = InputAddr {
            backend: BackendId(0),
            channel: ChannelId(0),
        };
        // Not online yet.
        assert_eq!(reg.temperature(addr), Err(Error::Offline));

        reg.setup().unwrap();
        reg.online().unwrap();
        assert_eq!(
            reg.temperature(addr),
            Ok(TempReading::Value(Temp::from_celsius(21.0)))
        );

        // Out-of-range backend index.
        let bogus = InputAddr {
            backend: BackendId(7),
            channel: ChannelId(0),
        };
        assert_eq!(reg.temperature(bogus), Err(Error::Invalid));
    }

    #[test]
    fn test_name_resolution() {
        let mock = MockBackend::default();
        mock.define_input(InputKind::Temperature, "boiler", ChannelId(3));
        mock.define_output("burner", ChannelId(1));
        let reg = registry_with(&[("proto", &mock)]);

        let addr = reg
            .resolve_input("proto", InputKind::Temperature, "boiler")
            .unwrap();
        assert_eq!(addr.channel, ChannelId(3));

        let out = reg.resolve_output("proto", "burner").unwrap();
        assert_eq!(out.channel, ChannelId(1));

        assert_eq!(
            reg.resolve_input("proto", InputKind::Temperature, "nope"),
            Err(Error::NotFound)
        );
        assert_eq!(reg.resolve_output("ghost", "burner"), Err(Error::NotFound));
    }
}
