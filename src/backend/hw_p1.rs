//! Prototype SPI sensor/relay board backend (`hw_p1`).
//!
//! The board carries up to 16 RTD sensor inputs and 16 relay outputs. The
//! backend owns per-channel sample caches (atomics), a staged relay mask
//! flushed on `output()`, and the RTD linearization for PT1000/NI1000
//! probes. The raw wire protocol lives behind [`P1Bus`]: a transfer returns
//! one raw word per sensor slot and accepts a 16-bit relay mask. A
//! simulated bus is provided; the real SPI transport plugs in through the
//! same trait.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU64, Ordering};

use tracing::{debug, error};

use crate::backend::{ChannelId, HwBackend, InputKind};
use crate::clock::{self, Ticks};
use crate::config::{BackendConfig, Failstate, RtdKind};
use crate::error::{Error, Result};
use crate::temp::{Temp, TempReading};

/// Sensor slots per board.
pub const SENSOR_SLOTS: u32 = 16;
/// Relay slots per board.
pub const RELAY_SLOTS: u32 = 16;

/// Raw sensor words carry the probe resistance in tenths of ohms.
/// An open circuit saturates the ADC; a short reads near zero.
const RAW_OPEN: u16 = 0xFFFF;
const RAW_SHORT_MAX: u16 = 100; // 10 Ω

/// Raw transport to one prototype board.
///
/// Implementations use interior mutability: the backend calls through a
/// shared reference from the registry's phase sweeps.
pub trait P1Bus: Send + Sync {
    /// Transfer all sensor slots; element `i` is board sensor `i+1`.
    fn read_sensors(&self) -> Result<Vec<u16>>;

    /// Commit relay states; bit `n` drives board relay `n+1`.
    fn write_relays(&self, mask: u16) -> Result<()>;
}

/// In-memory bus standing in for the SPI transport.
pub struct SimBus {
    sensors: Mutex<Vec<u16>>,
    writes: Mutex<Vec<u16>>,
}

impl SimBus {
    /// All slots open-circuit until scripted.
    pub fn new() -> Self {
        Self {
            sensors: Mutex::new(vec![RAW_OPEN; SENSOR_SLOTS as usize]),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Set the raw word of a board sensor slot (1-based board numbering).
    pub fn set_raw(&self, board_id: u32, raw: u16) {
        let mut sensors = self.sensors.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = sensors.get_mut((board_id - 1) as usize) {
            *slot = raw;
        }
    }

    /// Set a slot to the resistance of the given probe at `celsius`.
    pub fn set_celsius(&self, board_id: u32, rtd: RtdKind, celsius: f64) {
        let ohms = resistance_at(rtd, celsius);
        self.set_raw(board_id, (ohms * 10.0).round() as u16);
    }

    /// Every relay mask committed, in order.
    pub fn relay_history(&self) -> Vec<u16> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last_relay_mask(&self) -> Option<u16> {
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .copied()
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl P1Bus for SimBus {
    fn read_sensors(&self) -> Result<Vec<u16>> {
        Ok(self.sensors.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write_relays(&self, mask: u16) -> Result<()> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).push(mask);
        Ok(())
    }
}

// --- RTD linearization ---
//
// Both probe families are modeled as R(t) = R0·(1 + A·t + B·t²) and
// inverted with the quadratic formula. Adequate across the measurable
// window (-50..180 °C); the cubic low-temperature correction terms are
// below the board's ADC resolution.

const R0: f64 = 1000.0;
// IEC 60751 platinum coefficients.
const PT_A: f64 = 3.9083e-3;
const PT_B: f64 = -5.775e-7;
// DIN 43760 nickel, quadratic fit.
const NI_A: f64 = 5.485e-3;
const NI_B: f64 = 6.65e-6;

fn coefficients(rtd: RtdKind) -> (f64, f64) {
    match rtd {
        RtdKind::Pt1000 => (PT_A, PT_B),
        RtdKind::Ni1000 => (NI_A, NI_B),
    }
}

/// Probe resistance in ohms at a given temperature.
pub fn resistance_at(rtd: RtdKind, celsius: f64) -> f64 {
    let (a, b) = coefficients(rtd);
    R0 * (1.0 + a * celsius + b * celsius * celsius)
}

/// Invert the probe curve: resistance in ohms to temperature.
pub fn temperature_from_ohms(rtd: RtdKind, ohms: f64) -> Option<f64> {
    let (a, b) = coefficients(rtd);
    let discriminant = a * a - 4.0 * b * (1.0 - ohms / R0);
    if discriminant < 0.0 {
        return None;
    }
    Some((-a + discriminant.sqrt()) / (2.0 * b))
}

struct SensorSlot {
    name: String,
    board_id: u32,
    rtd: RtdKind,
    offset: Temp,
    reading: AtomicI64,
    sampled_at: AtomicU64,
}

struct RelaySlot {
    name: String,
    board_id: u32,
    failstate: bool,
}

/// One prototype board.
pub struct HwP1Backend {
    name: String,
    sensors: Vec<SensorSlot>,
    relays: Vec<RelaySlot>,
    bus: Box<dyn P1Bus>,
    /// Relay mask requested by consumers, coalesced until the next flush.
    staged: AtomicU16,
    /// Relay mask last committed to the bus.
    committed: AtomicU16,
}

impl HwP1Backend {
    pub fn from_config(name: &str, cfg: &BackendConfig, bus: Box<dyn P1Bus>) -> Self {
        let sensors = cfg
            .sensors
            .iter()
            .map(|s| SensorSlot {
                name: s.name.clone(),
                board_id: s.id,
                rtd: s.rtd,
                offset: Temp::from_celsius(s.offset),
                reading: AtomicI64::new(TempReading::Unset.encode()),
                sampled_at: AtomicU64::new(0),
            })
            .collect();
        let relays = cfg
            .relays
            .iter()
            .map(|r| RelaySlot {
                name: r.name.clone(),
                board_id: r.id,
                failstate: r.failstate == Failstate::On,
            })
            .collect();
        Self {
            name: name.to_string(),
            sensors,
            relays,
            bus,
            staged: AtomicU16::new(0),
            committed: AtomicU16::new(0),
        }
    }

    fn sensor(&self, id: ChannelId) -> Result<&SensorSlot> {
        self.sensors.get(id.0 as usize).ok_or(Error::Invalid)
    }

    fn relay(&self, id: ChannelId) -> Result<&RelaySlot> {
        self.relays.get(id.0 as usize).ok_or(Error::Invalid)
    }

    fn decode_raw(&self, slot: &SensorSlot, raw: u16) -> TempReading {
        if raw == RAW_OPEN {
            return TempReading::Disconnected;
        }
        if raw <= RAW_SHORT_MAX {
            return TempReading::Short;
        }
        let ohms = f64::from(raw) / 10.0;
        match temperature_from_ohms(slot.rtd, ohms) {
            Some(celsius) => {
                let t = Temp(Temp::from_celsius(celsius).0 + slot.offset.0);
                if t.is_valid() {
                    TempReading::Value(t)
                } else {
                    TempReading::Invalid
                }
            }
            None => TempReading::Invalid,
        }
    }

    /// One bus transfer: refresh every configured sensor cache.
    fn sample(&self) -> Result<()> {
        let raw = self.bus.read_sensors()?;
        let now = clock::now();
        for slot in &self.sensors {
            let Some(&word) = raw.get((slot.board_id - 1) as usize) else {
                error!(backend = %self.name, sensor = %slot.name, "raw frame short");
                return Err(Error::Truncated);
            };
            let reading = self.decode_raw(slot, word);
            slot.reading.store(reading.encode(), Ordering::Release);
            slot.sampled_at.store(now.0, Ordering::Release);
        }
        Ok(())
    }
}

impl HwBackend for HwP1Backend {
    fn setup(&self) -> Result<()> {
        for (i, s) in self.sensors.iter().enumerate() {
            if s.board_id == 0 || s.board_id > SENSOR_SLOTS {
                error!(backend = %self.name, sensor = %s.name, id = s.board_id, "sensor id out of range");
                return Err(Error::Invalid);
            }
            if self.sensors[..i]
                .iter()
                .any(|p| p.board_id == s.board_id || p.name == s.name)
            {
                error!(backend = %self.name, sensor = %s.name, "duplicate sensor");
                return Err(Error::Exists);
            }
        }
        for (i, r) in self.relays.iter().enumerate() {
            if r.board_id == 0 || r.board_id > RELAY_SLOTS {
                error!(backend = %self.name, relay = %r.name, id = r.board_id, "relay id out of range");
                return Err(Error::Invalid);
            }
            if self.relays[..i]
                .iter()
                .any(|p| p.board_id == r.board_id || p.name == r.name)
            {
                error!(backend = %self.name, relay = %r.name, "duplicate relay");
                return Err(Error::Exists);
            }
        }
        Ok(())
    }

    fn online(&self) -> Result<()> {
        // Initial sample so channel timestamps answer before the first
        // input() sweep.
        self.sample()
    }

    fn input(&self) -> Result<()> {
        self.sample()
    }

    fn output(&self) -> Result<()> {
        let mask = self.staged.load(Ordering::Acquire);
        if mask != self.committed.load(Ordering::Acquire) {
            self.bus.write_relays(mask)?;
            self.committed.store(mask, Ordering::Release);
        }
        Ok(())
    }

    fn offline(&self) -> Result<()> {
        // Park every relay in its configured failstate.
        let mask = self
            .relays
            .iter()
            .filter(|r| r.failstate)
            .fold(0u16, |m, r| m | 1 << (r.board_id - 1));
        self.bus.write_relays(mask)?;
        self.staged.store(mask, Ordering::Release);
        self.committed.store(mask, Ordering::Release);
        Ok(())
    }

    fn exit(&self) {
        debug!(backend = %self.name, "hw_p1 released");
    }

    fn temperature(&self, id: ChannelId) -> Result<TempReading> {
        Ok(TempReading::decode(
            self.sensor(id)?.reading.load(Ordering::Acquire),
        ))
    }

    fn input_time(&self, kind: InputKind, id: ChannelId) -> Result<Ticks> {
        if kind != InputKind::Temperature {
            return Err(Error::NotImplemented);
        }
        let slot = self.sensor(id)?;
        let reading = TempReading::decode(slot.reading.load(Ordering::Acquire));
        if reading == TempReading::Unset {
            return Err(Error::Invalid);
        }
        Ok(Ticks(slot.sampled_at.load(Ordering::Acquire)))
    }

    fn relay_state(&self, id: ChannelId) -> Result<bool> {
        let bit = 1u16 << (self.relay(id)?.board_id - 1);
        Ok(self.staged.load(Ordering::Acquire) & bit != 0)
    }

    fn set_relay(&self, id: ChannelId, on: bool) -> Result<()> {
        let bit = 1u16 << (self.relay(id)?.board_id - 1);
        if on {
            let _ = self.staged.fetch_or(bit, Ordering::AcqRel);
        } else {
            let _ = self.staged.fetch_and(!bit, Ordering::AcqRel);
        }
        Ok(())
    }

    fn input_by_name(&self, kind: InputKind, name: &str) -> Option<ChannelId> {
        if kind != InputKind::Temperature {
            return None;
        }
        self.sensors
            .iter()
            .position(|s| s.name == name)
            .map(|i| ChannelId(i as u32))
    }

    fn output_by_name(&self, name: &str) -> Option<ChannelId> {
        self.relays
            .iter()
            .position(|r| r.name == name)
            .map(|i| ChannelId(i as u32))
    }
}
