//! Shared test utilities: a fully scriptable mock backend.
//!
//! Tests script per-channel readings, timestamps and faults, inject phase
//! failures, and inspect lifecycle/staging logs — without any hardware or
//! timing dependence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{ChannelId, HwBackend, InputKind};
use crate::clock::Ticks;
use crate::error::{Error, Result};
use crate::temp::TempReading;

#[derive(Default)]
struct MockInner {
    lifecycle: Mutex<Vec<&'static str>>,
    failing_phases: Mutex<Vec<&'static str>>,
    temps: Mutex<HashMap<u32, Result<TempReading>>>,
    switches: Mutex<HashMap<u32, Result<bool>>>,
    times: Mutex<HashMap<(bool, u32), Result<Ticks>>>,
    input_names: Mutex<HashMap<(bool, String), ChannelId>>,
    output_names: Mutex<HashMap<String, ChannelId>>,
    relay_faults: Mutex<HashMap<u32, Error>>,
    relay_writes: Mutex<Vec<(u32, bool)>>,
    relay_staged: Mutex<HashMap<u32, bool>>,
    temp_reads: AtomicUsize,
    switch_reads: AtomicUsize,
}

/// Scriptable backend. Clones share state, so a test can keep a handle
/// while the registry owns the boxed driver.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockInner>,
}

fn kind_key(kind: InputKind) -> bool {
    matches!(kind, InputKind::Switch)
}

impl MockBackend {
    fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the named lifecycle phase fail with `Generic`.
    pub fn fail_phase(&self, phase: &'static str) {
        Self::lock(&self.inner.failing_phases).push(phase);
    }

    pub fn lifecycle_log(&self) -> Vec<&'static str> {
        Self::lock(&self.inner.lifecycle).clone()
    }

    pub fn script_temp(&self, channel: u32, reading: TempReading) {
        Self::lock(&self.inner.temps).insert(channel, Ok(reading));
        // A scripted value implies the channel exists; give it a default
        // timestamp unless the test scripts one explicitly.
        Self::lock(&self.inner.times)
            .entry((false, channel))
            .or_insert(Ok(Ticks(0)));
    }

    pub fn script_temp_fault(&self, channel: u32, err: Error) {
        Self::lock(&self.inner.temps).insert(channel, Err(err));
        Self::lock(&self.inner.times)
            .entry((false, channel))
            .or_insert(Ok(Ticks(0)));
    }

    pub fn script_switch(&self, channel: u32, state: bool) {
        Self::lock(&self.inner.switches).insert(channel, Ok(state));
        Self::lock(&self.inner.times)
            .entry((true, channel))
            .or_insert(Ok(Ticks(0)));
    }

    pub fn script_switch_fault(&self, channel: u32, err: Error) {
        Self::lock(&self.inner.switches).insert(channel, Err(err));
        Self::lock(&self.inner.times)
            .entry((true, channel))
            .or_insert(Ok(Ticks(0)));
    }

    pub fn script_time(&self, kind: InputKind, channel: u32, time: Ticks) {
        Self::lock(&self.inner.times).insert((kind_key(kind), channel), Ok(time));
    }

    pub fn script_time_fault(&self, kind: InputKind, channel: u32, err: Error) {
        Self::lock(&self.inner.times).insert((kind_key(kind), channel), Err(err));
    }

    pub fn script_relay_fault(&self, channel: u32, err: Error) {
        Self::lock(&self.inner.relay_faults).insert(channel, err);
    }

    pub fn clear_relay_fault(&self, channel: u32) {
        let _ = Self::lock(&self.inner.relay_faults).remove(&channel);
    }

    /// Every `set_relay` call observed, in order.
    pub fn relay_writes(&self) -> Vec<(u32, bool)> {
        Self::lock(&self.inner.relay_writes).clone()
    }

    /// Number of `temperature()` reads served.
    pub fn temp_reads(&self) -> usize {
        self.inner.temp_reads.load(Ordering::Acquire)
    }

    /// Number of `switch()` reads served.
    pub fn switch_reads(&self) -> usize {
        self.inner.switch_reads.load(Ordering::Acquire)
    }

    pub fn define_input(&self, kind: InputKind, name: &str, channel: ChannelId) {
        Self::lock(&self.inner.input_names).insert((kind_key(kind), name.to_string()), channel);
    }

    pub fn define_output(&self, name: &str, channel: ChannelId) {
        Self::lock(&self.inner.output_names).insert(name.to_string(), channel);
    }

    fn phase(&self, name: &'static str) -> Result<()> {
        Self::lock(&self.inner.lifecycle).push(name);
        if Self::lock(&self.inner.failing_phases).contains(&name) {
            Err(Error::Generic)
        } else {
            Ok(())
        }
    }
}

impl HwBackend for MockBackend {
    fn setup(&self) -> Result<()> {
        self.phase("setup")
    }

    fn online(&self) -> Result<()> {
        self.phase("online")
    }

    fn input(&self) -> Result<()> {
        self.phase("input")
    }

    fn output(&self) -> Result<()> {
        self.phase("output")
    }

    fn offline(&self) -> Result<()> {
        self.phase("offline")
    }

    fn exit(&self) {
        Self::lock(&self.inner.lifecycle).push("exit");
    }

    fn temperature(&self, id: ChannelId) -> Result<TempReading> {
        let _ = self.inner.temp_reads.fetch_add(1, Ordering::AcqRel);
        Self::lock(&self.inner.temps)
            .get(&id.0)
            .copied()
            .unwrap_or(Err(Error::Invalid))
    }

    fn switch(&self, id: ChannelId) -> Result<bool> {
        let _ = self.inner.switch_reads.fetch_add(1, Ordering::AcqRel);
        Self::lock(&self.inner.switches)
            .get(&id.0)
            .copied()
            .unwrap_or(Err(Error::Invalid))
    }

    fn input_time(&self, kind: InputKind, id: ChannelId) -> Result<Ticks> {
        Self::lock(&self.inner.times)
            .get(&(kind_key(kind), id.0))
            .copied()
            .unwrap_or(Err(Error::Invalid))
    }

    fn relay_state(&self, id: ChannelId) -> Result<bool> {
        Self::lock(&self.inner.relay_staged)
            .get(&id.0)
            .copied()
            .ok_or(Error::Invalid)
    }

    fn set_relay(&self, id: ChannelId, on: bool) -> Result<()> {
        if let Some(&err) = Self::lock(&self.inner.relay_faults).get(&id.0) {
            return Err(err);
        }
        Self::lock(&self.inner.relay_writes).push((id.0, on));
        Self::lock(&self.inner.relay_staged).insert(id.0, on);
        Ok(())
    }

    fn input_by_name(&self, kind: InputKind, name: &str) -> Option<ChannelId> {
        Self::lock(&self.inner.input_names)
            .get(&(kind_key(kind), name.to_string()))
            .copied()
    }

    fn output_by_name(&self, name: &str) -> Option<ChannelId> {
        Self::lock(&self.inner.output_names).get(name).copied()
    }
}
