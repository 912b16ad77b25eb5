//! Relay meta-output.
//!
//! A logical relay drives an ordered list of backend channels. Repeated
//! requests for the current state are coalesced before any backend is
//! touched; on/off time and cycle accounting is kept under a short mutex
//! while the requested state itself stays readable lock-free.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::backend::{BackendRegistry, OutputAddr};
use crate::clock::{self, Ticks};
use crate::error::{Error, Result};

/// Aggregation operation over relay targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayOp {
    /// Stop after the first target that accepts the state.
    First,
    /// Drive every target.
    All,
}

/// What to do when a target rejects the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMissing {
    Fail,
    Ignore,
}

/// Configured shape of a relay meta-output.
pub struct RelaySpec {
    pub name: String,
    pub targets: Vec<OutputAddr>,
    pub op: RelayOp,
    pub missing: RelayMissing,
}

struct Accounting {
    created_at: Ticks,
    state_since: Ticks,
    on_total: Ticks,
    off_total: Ticks,
}

/// Wall-clock consistent accounting snapshot.
#[derive(Debug, Clone, Copy)]
pub struct RelayStats {
    pub state: bool,
    pub cycles: u32,
    pub on_total: Ticks,
    pub off_total: Ticks,
    pub state_since: Ticks,
}

pub struct RelayOutput {
    spec: RelaySpec,
    registry: Arc<BackendRegistry>,
    /// Last requested state. The plant's view is authoritative for its own
    /// requests; the backend is never consulted on reads.
    turn_on: AtomicBool,
    /// Single-owner exclusion, set-at-most-once until thawed.
    grabbed: AtomicBool,
    /// OFF→ON transitions observed.
    cycles: AtomicU32,
    acct: Mutex<Accounting>,
}

impl RelayOutput {
    pub fn new(spec: RelaySpec, registry: Arc<BackendRegistry>) -> Self {
        Self::new_at(spec, registry, clock::now())
    }

    pub(crate) fn new_at(spec: RelaySpec, registry: Arc<BackendRegistry>, created_at: Ticks) -> Self {
        Self {
            spec,
            registry,
            turn_on: AtomicBool::new(false),
            grabbed: AtomicBool::new(false),
            cycles: AtomicU32::new(0),
            acct: Mutex::new(Accounting {
                created_at,
                state_since: created_at,
                on_total: Ticks(0),
                off_total: Ticks(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Claim exclusive write ownership of this relay.
    pub fn grab(&self) -> Result<()> {
        self.grabbed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::Exists)
    }

    /// Release write ownership.
    pub fn thaw(&self) {
        self.grabbed.store(false, Ordering::Release);
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed.load(Ordering::Acquire)
    }

    /// Last requested state, lock-free.
    pub fn state(&self) -> bool {
        self.turn_on.load(Ordering::Acquire)
    }

    /// Request a state. Equal-state requests are coalesced before any
    /// backend call is made.
    pub fn set_state(&self, on: bool) -> Result<()> {
        self.set_state_at(on, clock::now())
    }

    pub(crate) fn set_state_at(&self, on: bool, now: Ticks) -> Result<()> {
        if self.spec.targets.is_empty() {
            return Err(Error::NotConfigured);
        }
        if self.turn_on.load(Ordering::Acquire) == on {
            return Ok(());
        }

        let mut acct = self.acct.lock().unwrap_or_else(|e| e.into_inner());
        // A racing writer may have enacted the same state while we waited.
        if self.turn_on.load(Ordering::Acquire) == on {
            return Ok(());
        }

        let mut enacted = false;
        let mut last_err = None;
        for &target in &self.spec.targets {
            match self.registry.set_relay(target, on) {
                Ok(()) => {
                    enacted = true;
                    if self.spec.op == RelayOp::First {
                        break;
                    }
                }
                Err(e) => match self.spec.missing {
                    RelayMissing::Fail => return Err(e),
                    RelayMissing::Ignore => last_err = Some(e),
                },
            }
        }
        if !enacted {
            return Err(last_err.unwrap_or(Error::Generic));
        }

        // State publish precedes the accounting update, both under the lock.
        self.turn_on.store(on, Ordering::Release);
        let delta = now.since(acct.state_since).unwrap_or(Ticks(0));
        if on {
            let _ = self.cycles.fetch_add(1, Ordering::AcqRel);
            acct.off_total = acct.off_total.saturating_add(delta);
        } else {
            acct.on_total = acct.on_total.saturating_add(delta);
        }
        acct.state_since = now;
        Ok(())
    }

    /// OFF→ON transition count, lock-free.
    pub fn cycles(&self) -> u32 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Accounting snapshot with the open interval folded into the counter
    /// matching the current state.
    pub fn stats(&self) -> RelayStats {
        self.stats_at(clock::now())
    }

    pub(crate) fn stats_at(&self, now: Ticks) -> RelayStats {
        let acct = self.acct.lock().unwrap_or_else(|e| e.into_inner());
        let state = self.turn_on.load(Ordering::Acquire);
        let open = now.since(acct.state_since).unwrap_or(Ticks(0));
        RelayStats {
            state,
            cycles: self.cycles.load(Ordering::Acquire),
            on_total: if state {
                acct.on_total.saturating_add(open)
            } else {
                acct.on_total
            },
            off_total: if state {
                acct.off_total
            } else {
                acct.off_total.saturating_add(open)
            },
            state_since: acct.state_since,
        }
    }

    #[cfg(test)]
    fn created_at(&self) -> Ticks {
        self.acct.lock().unwrap_or_else(|e| e.into_inner()).created_at
    }
}
