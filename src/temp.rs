//! Temperature values and sensor readings.
//!
//! Temperatures are carried as integer millidegrees Celsius so a reading can
//! live in an `AtomicI64`. The sentinel states a sensor can report (unset,
//! invalid, short, disconnected) are a proper sum type; the i64 encoding
//! exists only for the atomic caches and the backend boundary.

use crate::error::{Error, Result};

/// Semantic validity bounds for a measured temperature. Values outside
/// this window are rejected as sensor faults, not clamped.
pub const TEMP_MIN: Temp = Temp(-50_000);
pub const TEMP_MAX: Temp = Temp(180_000);

/// A temperature in millidegrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Temp(pub i64);

impl Temp {
    pub fn from_celsius(c: f64) -> Temp {
        Temp((c * 1000.0).round() as i64)
    }

    pub fn as_celsius(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// True when the value lies inside the measurable window.
    pub fn is_valid(self) -> bool {
        self >= TEMP_MIN && self <= TEMP_MAX
    }
}

/// What a temperature channel currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempReading {
    Value(Temp),
    /// No sample has ever been committed.
    Unset,
    /// The last refresh failed or produced an out-of-range value.
    Invalid,
    /// The sensor input reads as a short circuit.
    Short,
    /// The sensor input reads as an open circuit.
    Disconnected,
}

// Sentinels sit far below TEMP_MIN so no measurable value collides.
const ENC_UNSET: i64 = i64::MIN;
const ENC_INVALID: i64 = i64::MIN + 1;
const ENC_SHORT: i64 = i64::MIN + 2;
const ENC_DISCONNECTED: i64 = i64::MIN + 3;

impl TempReading {
    /// Encode for storage in an `AtomicI64`.
    pub fn encode(self) -> i64 {
        match self {
            TempReading::Value(t) => t.0,
            TempReading::Unset => ENC_UNSET,
            TempReading::Invalid => ENC_INVALID,
            TempReading::Short => ENC_SHORT,
            TempReading::Disconnected => ENC_DISCONNECTED,
        }
    }

    pub fn decode(raw: i64) -> TempReading {
        match raw {
            ENC_UNSET => TempReading::Unset,
            ENC_INVALID => TempReading::Invalid,
            ENC_SHORT => TempReading::Short,
            ENC_DISCONNECTED => TempReading::Disconnected,
            v => TempReading::Value(Temp(v)),
        }
    }

    /// Extract the measured value, mapping each sentinel to its error kind.
    pub fn value(self) -> Result<Temp> {
        match self {
            TempReading::Value(t) => Ok(t),
            TempReading::Unset | TempReading::Invalid => Err(Error::Invalid),
            TempReading::Short => Err(Error::SensorShort),
            TempReading::Disconnected => Err(Error::SensorDisconnected),
        }
    }

    /// The error a consumer sees when a refresh sourced this reading,
    /// before it is committed to a cache.
    pub fn fault(self) -> Option<Error> {
        match self {
            TempReading::Value(t) if t.is_valid() => None,
            TempReading::Value(_) => Some(Error::SensorInvalid),
            TempReading::Unset | TempReading::Invalid => Some(Error::SensorInvalid),
            TempReading::Short => Some(Error::SensorShort),
            TempReading::Disconnected => Some(Error::SensorDisconnected),
        }
    }
}
