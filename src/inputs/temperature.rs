//! Temperature meta-input.
//!
//! A logical temperature maps to an ordered list of backend channels and
//! exposes one thread-safe, cached, period-limited value. The refresh path
//! is guarded by a try-once lock: a caller that loses the race simply reads
//! the cache, which always holds the most recently committed sample or a
//! sentinel.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::alarms::AlarmSink;
use crate::backend::{BackendRegistry, InputAddr, InputKind};
use crate::clock::{self, Ticks};
use crate::error::{Error, Result};
use crate::inputs::{MissingPolicy, TempOp};
use crate::temp::{Temp, TempReading};

/// Configured shape of a temperature meta-input.
pub struct TemperatureSpec {
    pub name: String,
    pub sources: Vec<InputAddr>,
    pub op: TempOp,
    pub missing: MissingPolicy,
    /// Substitute sample under `MissingPolicy::IgnoreDefault`.
    pub igntemp: Temp,
    /// Minimum interval between backend fetches.
    pub period: Ticks,
}

pub struct TemperatureInput {
    spec: TemperatureSpec,
    registry: Arc<BackendRegistry>,
    alarms: Arc<dyn AlarmSink>,
    /// Sentinel-encoded [`TempReading`].
    cache: AtomicI64,
    /// Tick of the last successful publish. Never decreases.
    last_update: AtomicU64,
    /// Refresh critical section. Only ever try-acquired.
    refresh: Mutex<()>,
}

impl TemperatureInput {
    pub fn new(
        spec: TemperatureSpec,
        registry: Arc<BackendRegistry>,
        alarms: Arc<dyn AlarmSink>,
    ) -> Self {
        Self {
            spec,
            registry,
            alarms,
            cache: AtomicI64::new(TempReading::Unset.encode()),
            last_update: AtomicU64::new(0),
            refresh: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Timestamp of the last successful refresh (0 = never).
    pub fn time(&self) -> Ticks {
        Ticks(self.last_update.load(Ordering::Acquire))
    }

    /// Refresh if due, then copy the cached value.
    pub fn get(&self) -> Result<Temp> {
        self.get_at(clock::now())
    }

    pub(crate) fn get_at(&self, now: Ticks) -> Result<Temp> {
        self.update_at(now)?;
        TempReading::decode(self.cache.load(Ordering::Acquire)).value()
    }

    /// Sources older than four periods are rejected.
    fn staleness_bound(&self) -> Ticks {
        Ticks(self.spec.period.0.saturating_mul(4))
    }

    fn update_at(&self, now: Ticks) -> Result<()> {
        if self.spec.sources.is_empty() {
            return Err(Error::NotConfigured);
        }

        // Fast path: a valid cached value younger than the period.
        let cached = TempReading::decode(self.cache.load(Ordering::Acquire));
        if matches!(cached, TempReading::Value(_))
            && now
                .since(self.time())
                .is_some_and(|age| age < self.spec.period)
        {
            return Ok(());
        }

        // Someone else is refreshing: the cache stays readable, done.
        let Ok(_guard) = self.refresh.try_lock() else {
            return Ok(());
        };

        match self.fetch(now) {
            Ok(value) => {
                // Value first, then timestamp, both release: a reader never
                // pairs a fresh timestamp with a stale value.
                self.cache
                    .store(TempReading::Value(value).encode(), Ordering::Release);
                self.last_update.store(now.0, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                let sentinel = match e {
                    Error::SensorShort => TempReading::Short,
                    Error::SensorDisconnected => TempReading::Disconnected,
                    _ => TempReading::Invalid,
                };
                // The timestamp is deliberately left alone on failure.
                self.cache.store(sentinel.encode(), Ordering::Release);
                if self.spec.missing != MissingPolicy::Ignore {
                    self.alarms.raise(
                        e,
                        &format!("temperature '{}' refresh failed: {e}", self.spec.name),
                    );
                }
                Err(e)
            }
        }
    }

    /// Walk the source list and combine per the configured operation.
    fn fetch(&self, now: Ticks) -> Result<Temp> {
        let mut acc: Option<Temp> = None;
        for &source in &self.spec.sources {
            let sample_time = match self.registry.input_time(InputKind::Temperature, source) {
                Ok(t) => t,
                Err(e) => match self.spec.missing {
                    MissingPolicy::Fail => return Err(e),
                    MissingPolicy::Ignore => continue,
                    MissingPolicy::IgnoreDefault => now,
                },
            };

            let value = match self.sample(source, sample_time, now) {
                Ok(v) => v,
                Err(e) => match self.spec.missing {
                    MissingPolicy::Fail => return Err(e),
                    MissingPolicy::Ignore => continue,
                    MissingPolicy::IgnoreDefault => self.spec.igntemp,
                },
            };

            acc = Some(match acc {
                None => value,
                Some(current) => match self.spec.op {
                    TempOp::First => current,
                    TempOp::Min => current.min(value),
                    TempOp::Max => current.max(value),
                },
            });
            if self.spec.op == TempOp::First {
                break;
            }
        }
        // Every source skipped: the refresh failed even under IGNORE.
        acc.ok_or(Error::Invalid)
    }

    /// Read one source, enforcing staleness and semantic validity.
    fn sample(&self, source: InputAddr, sample_time: Ticks, now: Ticks) -> Result<Temp> {
        let reading = self.registry.temperature(source)?;
        // Staleness only counts forward in time: a source clock slightly
        // ahead of ours is not an error.
        if let Some(age) = now.since(sample_time)
            && age > self.staleness_bound()
        {
            return Err(Error::Stale);
        }
        match reading {
            TempReading::Value(t) if t.is_valid() => Ok(t),
            other => Err(other.fault().unwrap_or(Error::Invalid)),
        }
    }
}
