//! Switch meta-input.
//!
//! Same refresh pipeline as the temperature meta-input, with boolean
//! combination operations. The cache keeps a `state` bit and an `error`
//! flag separately: a failed refresh flags the error but preserves the
//! last good state for diagnostics.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::alarms::AlarmSink;
use crate::backend::{BackendRegistry, InputAddr, InputKind};
use crate::clock::{self, Ticks};
use crate::error::{Error, Result};
use crate::inputs::{MissingPolicy, SwitchOp};

/// Configured shape of a switch meta-input.
pub struct SwitchSpec {
    pub name: String,
    pub sources: Vec<InputAddr>,
    pub op: SwitchOp,
    pub missing: MissingPolicy,
    /// Substitute sample under `MissingPolicy::IgnoreDefault`.
    pub ignstate: bool,
    /// Minimum interval between backend fetches.
    pub period: Ticks,
}

pub struct SwitchInput {
    spec: SwitchSpec,
    registry: Arc<BackendRegistry>,
    alarms: Arc<dyn AlarmSink>,
    state: AtomicBool,
    /// Set until the first successful refresh, and again after any failed
    /// one. Distinct from the state bit.
    error: AtomicBool,
    last_update: AtomicU64,
    refresh: Mutex<()>,
}

impl SwitchInput {
    pub fn new(
        spec: SwitchSpec,
        registry: Arc<BackendRegistry>,
        alarms: Arc<dyn AlarmSink>,
    ) -> Self {
        Self {
            spec,
            registry,
            alarms,
            state: AtomicBool::new(false),
            error: AtomicBool::new(true),
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

    /// Last good state, regardless of the error flag. Diagnostics.
    pub fn last_state(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }

    /// Refresh if due, then read the cached state.
    pub fn get(&self) -> Result<bool> {
        self.get_at(clock::now())
    }

    pub(crate) fn get_at(&self, now: Ticks) -> Result<bool> {
        self.update_at(now)?;
        if self.error.load(Ordering::Acquire) {
            return Err(Error::Invalid);
        }
        Ok(self.state.load(Ordering::Acquire))
    }

    fn staleness_bound(&self) -> Ticks {
        Ticks(self.spec.period.0.saturating_mul(4))
    }

    fn update_at(&self, now: Ticks) -> Result<()> {
        if self.spec.sources.is_empty() {
            return Err(Error::NotConfigured);
        }

        // Fast path: a good cached state younger than the period.
        if !self.error.load(Ordering::Acquire)
            && now
                .since(self.time())
                .is_some_and(|age| age < self.spec.period)
        {
            return Ok(());
        }

        let Ok(_guard) = self.refresh.try_lock() else {
            return Ok(());
        };

        match self.fetch(now) {
            Ok(state) => {
                // State, then error flag, then timestamp, all release.
                self.state.store(state, Ordering::Release);
                self.error.store(false, Ordering::Release);
                self.last_update.store(now.0, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                // Only the error flag moves; the last good state and its
                // timestamp stay readable.
                self.error.store(true, Ordering::Release);
                if self.spec.missing != MissingPolicy::Ignore {
                    self.alarms.raise(
                        e,
                        &format!("switch '{}' refresh failed: {e}", self.spec.name),
                    );
                }
                Err(e)
            }
        }
    }

    fn fetch(&self, now: Ticks) -> Result<bool> {
        // AND is seeded true, OR false; FIRST adopts the first good sample.
        let mut acc: Option<bool> = match self.spec.op {
            SwitchOp::First => None,
            SwitchOp::And => Some(true),
            SwitchOp::Or => Some(false),
        };
        let mut sampled = false;

        for &source in &self.spec.sources {
            let sample_time = match self.registry.input_time(InputKind::Switch, source) {
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
                    MissingPolicy::IgnoreDefault => self.spec.ignstate,
                },
            };

            sampled = true;
            acc = Some(match (self.spec.op, acc) {
                (SwitchOp::First, _) => value,
                (SwitchOp::And, Some(current)) => current && value,
                (SwitchOp::Or, Some(current)) => current || value,
                // Seeds above make these unreachable, but keep them total.
                (SwitchOp::And, None) => value,
                (SwitchOp::Or, None) => value,
            });
            if self.spec.op == SwitchOp::First {
                break;
            }
        }

        if !sampled {
            return Err(Error::Invalid);
        }
        acc.ok_or(Error::Invalid)
    }

    fn sample(&self, source: InputAddr, sample_time: Ticks, now: Ticks) -> Result<bool> {
        let state = self.registry.switch(source)?;
        if let Some(age) = now.since(sample_time)
            && age > self.staleness_bound()
        {
            return Err(Error::Stale);
        }
        Ok(state)
    }
}
