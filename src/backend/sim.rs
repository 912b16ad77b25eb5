//! Simulated backend.
//!
//! A virtual board that never touches hardware: channel values are set
//! programmatically (demos, rigs, tests) and sampled like any other
//! backend. Clones share state so a scripting handle survives handing the
//! boxed driver to the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use tracing::debug;

use crate::backend::{ChannelId, HwBackend, InputKind};
use crate::clock::{self, Ticks};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::temp::{Temp, TempReading};

struct SimTemp {
    name: String,
    reading: AtomicI64,
    sampled_at: AtomicU64,
}

struct SimSwitch {
    name: String,
    state: AtomicBool,
    fault: AtomicBool,
    sampled_at: AtomicU64,
}

struct SimRelay {
    name: String,
    staged: AtomicBool,
}

struct SimInner {
    name: String,
    temps: Vec<SimTemp>,
    switches: Vec<SimSwitch>,
    relays: Vec<SimRelay>,
}

#[derive(Clone)]
pub struct SimBackend {
    inner: Arc<SimInner>,
}

impl SimBackend {
    pub fn from_config(name: &str, cfg: &BackendConfig) -> Self {
        Self {
            inner: Arc::new(SimInner {
                name: name.to_string(),
                temps: cfg
                    .sensors
                    .iter()
                    .map(|s| SimTemp {
                        name: s.name.clone(),
                        reading: AtomicI64::new(TempReading::Unset.encode()),
                        sampled_at: AtomicU64::new(0),
                    })
                    .collect(),
                switches: cfg
                    .switches
                    .iter()
                    .map(|s| SimSwitch {
                        name: s.name.clone(),
                        state: AtomicBool::new(false),
                        fault: AtomicBool::new(false),
                        sampled_at: AtomicU64::new(0),
                    })
                    .collect(),
                relays: cfg
                    .relays
                    .iter()
                    .map(|r| SimRelay {
                        name: r.name.clone(),
                        staged: AtomicBool::new(false),
                    })
                    .collect(),
            }),
        }
    }

    /// Script a temperature channel by name.
    pub fn set_temperature(&self, channel: &str, value: Temp) -> Result<()> {
        self.set_temperature_reading(channel, TempReading::Value(value))
    }

    /// Script a temperature channel to any reading, sentinels included.
    pub fn set_temperature_reading(&self, channel: &str, reading: TempReading) -> Result<()> {
        let t = self
            .inner
            .temps
            .iter()
            .find(|t| t.name == channel)
            .ok_or(Error::NotFound)?;
        t.reading.store(reading.encode(), Ordering::Release);
        t.sampled_at.store(clock::now().0, Ordering::Release);
        Ok(())
    }

    /// Script a switch channel by name.
    pub fn set_switch(&self, channel: &str, state: bool) -> Result<()> {
        let s = self
            .inner
            .switches
            .iter()
            .find(|s| s.name == channel)
            .ok_or(Error::NotFound)?;
        s.state.store(state, Ordering::Release);
        s.fault.store(false, Ordering::Release);
        s.sampled_at.store(clock::now().0, Ordering::Release);
        Ok(())
    }

    /// Put a switch channel into a fault state.
    pub fn set_switch_fault(&self, channel: &str) -> Result<()> {
        let s = self
            .inner
            .switches
            .iter()
            .find(|s| s.name == channel)
            .ok_or(Error::NotFound)?;
        s.fault.store(true, Ordering::Release);
        Ok(())
    }

    /// Staged state of a relay channel by name. Rig assertions.
    pub fn relay_by_name(&self, channel: &str) -> Result<bool> {
        self.inner
            .relays
            .iter()
            .find(|r| r.name == channel)
            .map(|r| r.staged.load(Ordering::Acquire))
            .ok_or(Error::NotFound)
    }

    fn stamp_all(&self) {
        let now = clock::now().0;
        for t in &self.inner.temps {
            t.sampled_at.store(now, Ordering::Release);
        }
        for s in &self.inner.switches {
            s.sampled_at.store(now, Ordering::Release);
        }
    }
}

impl HwBackend for SimBackend {
    fn online(&self) -> Result<()> {
        // Stamp every channel so time queries answer before the first
        // input() sweep.
        self.stamp_all();
        Ok(())
    }

    fn input(&self) -> Result<()> {
        self.stamp_all();
        Ok(())
    }

    fn exit(&self) {
        debug!(backend = %self.inner.name, "sim backend released");
    }

    fn temperature(&self, id: ChannelId) -> Result<TempReading> {
        let t = self.inner.temps.get(id.0 as usize).ok_or(Error::Invalid)?;
        Ok(TempReading::decode(t.reading.load(Ordering::Acquire)))
    }

    fn switch(&self, id: ChannelId) -> Result<bool> {
        let s = self
            .inner
            .switches
            .get(id.0 as usize)
            .ok_or(Error::Invalid)?;
        if s.fault.load(Ordering::Acquire) {
            return Err(Error::SensorDisconnected);
        }
        Ok(s.state.load(Ordering::Acquire))
    }

    fn input_time(&self, kind: InputKind, id: ChannelId) -> Result<Ticks> {
        let stamp = match kind {
            InputKind::Temperature => {
                &self
                    .inner
                    .temps
                    .get(id.0 as usize)
                    .ok_or(Error::Invalid)?
                    .sampled_at
            }
            InputKind::Switch => {
                &self
                    .inner
                    .switches
                    .get(id.0 as usize)
                    .ok_or(Error::Invalid)?
                    .sampled_at
            }
        };
        Ok(Ticks(stamp.load(Ordering::Acquire)))
    }

    fn relay_state(&self, id: ChannelId) -> Result<bool> {
        Ok(self
            .inner
            .relays
            .get(id.0 as usize)
            .ok_or(Error::Invalid)?
            .staged
            .load(Ordering::Acquire))
    }

    fn set_relay(&self, id: ChannelId, on: bool) -> Result<()> {
        self.inner
            .relays
            .get(id.0 as usize)
            .ok_or(Error::Invalid)?
            .staged
            .store(on, Ordering::Release);
        Ok(())
    }

    fn input_by_name(&self, kind: InputKind, name: &str) -> Option<ChannelId> {
        match kind {
            InputKind::Temperature => self
                .inner
                .temps
                .iter()
                .position(|t| t.name == name)
                .map(|i| ChannelId(i as u32)),
            InputKind::Switch => self
                .inner
                .switches
                .iter()
                .position(|s| s.name == name)
                .map(|i| ChannelId(i as u32)),
        }
    }

    fn output_by_name(&self, name: &str) -> Option<ChannelId> {
        self.inner
            .relays
            .iter()
            .position(|r| r.name == name)
            .map(|i| ChannelId(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, BoardRelayConfig, Failstate, RtdKind, SensorConfig, SwitchChannelConfig};

    fn sim() -> SimBackend {
        SimBackend::from_config(
            "virtual",
            &BackendConfig {
                kind: BackendKind::Sim,
                device: None,
                sensors: vec![SensorConfig {
                    name: "room".into(),
                    id: 1,
                    rtd: RtdKind::Pt1000,
                    offset: 0.0,
                }],
                relays: vec![BoardRelayConfig {
                    name: "valve".into(),
                    id: 1,
                    failstate: Failstate::Off,
                }],
                switches: vec![SwitchChannelConfig {
                    name: "door".into(),
                    id: 1,
                }],
            },
        )
    }

    #[test]
    fn test_scripted_temperature() {
        let b = sim();
        assert_eq!(b.temperature(ChannelId(0)), Ok(TempReading::Unset));

        b.set_temperature("room", Temp::from_celsius(21.5)).unwrap();
        assert_eq!(
            b.temperature(ChannelId(0)),
            Ok(TempReading::Value(Temp::from_celsius(21.5)))
        );
        assert_eq!(
            b.set_temperature("ghost", Temp::from_celsius(0.0)),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_switch_fault_flow() {
        let b = sim();
        b.set_switch("door", true).unwrap();
        assert_eq!(b.switch(ChannelId(0)), Ok(true));

        b.set_switch_fault("door").unwrap();
        assert_eq!(b.switch(ChannelId(0)), Err(Error::SensorDisconnected));

        // Re-scripting clears the fault.
        b.set_switch("door", false).unwrap();
        assert_eq!(b.switch(ChannelId(0)), Ok(false));
    }

    #[test]
    fn test_relay_staging() {
        let b = sim();
        b.set_relay(ChannelId(0), true).unwrap();
        assert_eq!(b.relay_state(ChannelId(0)), Ok(true));
        assert_eq!(b.relay_by_name("valve"), Ok(true));
        assert_eq!(b.set_relay(ChannelId(5), true), Err(Error::Invalid));
    }

    #[test]
    fn test_online_stamps_channels() {
        let b = sim();
        b.online().unwrap();
        assert!(b.input_time(InputKind::Temperature, ChannelId(0)).is_ok());
        assert!(b.input_time(InputKind::Switch, ChannelId(0)).is_ok());
    }

    #[test]
    fn test_name_resolution() {
        let b = sim();
        assert_eq!(
            b.input_by_name(InputKind::Temperature, "room"),
            Some(ChannelId(0))
        );
        assert_eq!(b.input_by_name(InputKind::Switch, "door"), Some(ChannelId(0)));
        assert_eq!(b.input_by_name(InputKind::Temperature, "door"), None);
        assert_eq!(b.output_by_name("valve"), Some(ChannelId(0)));
    }
}
