use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::Serialize;

/// Default maximum number of recent phase events to keep.
const DEFAULT_MAX_RECENT: usize = 256;

/// The three phases of one control step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Input,
    Plant,
    Output,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Input => "input",
            Phase::Plant => "plant",
            Phase::Output => "output",
        }
    }
}

/// A single recorded phase execution.
#[derive(Debug, Clone)]
struct PhaseEvent {
    phase: Phase,
    timestamp: Instant,
    duration: Duration,
    success: bool,
}

/// Serializable summary of a phase event.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseEventSummary {
    pub phase: Phase,
    pub duration_ms: u64,
    pub success: bool,
    /// Seconds ago relative to the snapshot time.
    pub seconds_ago: f64,
}

/// Latency statistics for one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseStats {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub avg_ms: f64,
    pub sample_count: u64,
}

/// Thread-safe tick statistics tracker.
///
/// Keeps a bounded ring of recent phase events plus one HDR histogram per
/// phase for latency percentiles. Histograms sit behind a Mutex because
/// `Histogram::record` needs `&mut self`; the lock is held for nanoseconds.
pub struct TickStats {
    recent: Mutex<VecDeque<PhaseEvent>>,
    input: Mutex<Histogram<u64>>,
    plant: Mutex<Histogram<u64>>,
    output: Mutex<Histogram<u64>>,
    ticks: AtomicU64,
    max_recent: usize,
}

fn new_histogram() -> Mutex<Histogram<u64>> {
    // Track latencies from 1µs to 10 minutes with 3 significant digits.
    Mutex::new(
        Histogram::<u64>::new_with_bounds(1, 600_000_000, 3).expect("valid histogram bounds"),
    )
}

impl TickStats {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RECENT)
    }

    pub fn with_capacity(max_recent: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(max_recent)),
            input: new_histogram(),
            plant: new_histogram(),
            output: new_histogram(),
            ticks: AtomicU64::new(0),
            max_recent,
        }
    }

    fn histogram(&self, phase: Phase) -> &Mutex<Histogram<u64>> {
        match phase {
            Phase::Input => &self.input,
            Phase::Plant => &self.plant,
            Phase::Output => &self.output,
        }
    }

    /// Record one completed phase. Called from the tick driver.
    pub fn record(&self, phase: Phase, duration: Duration, success: bool) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() >= self.max_recent {
                let _ = recent.pop_front();
            }
            recent.push_back(PhaseEvent {
                phase,
                timestamp: Instant::now(),
                duration,
                success,
            });
        }

        let duration_us = duration.as_micros() as u64;
        self.histogram(phase)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(duration_us.max(1)) // clamp to min 1µs
            .ok(); // ignore out-of-range (>10min)
    }

    /// Bump the completed-tick counter.
    pub fn tick_done(&self) {
        let _ = self.ticks.fetch_add(1, Ordering::AcqRel);
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Latency percentiles for one phase, if any samples exist.
    pub fn phase_stats(&self, phase: Phase) -> Option<PhaseStats> {
        let hist = self
            .histogram(phase)
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if hist.is_empty() {
            return None;
        }
        Some(PhaseStats {
            p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            p95_ms: hist.value_at_quantile(0.95) as f64 / 1000.0,
            p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
            avg_ms: hist.mean() / 1000.0,
            sample_count: hist.len(),
        })
    }

    /// Recent phase events as serializable summaries, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<PhaseEventSummary> {
        let now = Instant::now();
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent
            .iter()
            .rev()
            .take(limit)
            .map(|e| PhaseEventSummary {
                phase: e.phase,
                duration_ms: e.duration.as_millis() as u64,
                success: e.success,
                seconds_ago: now.duration_since(e.timestamp).as_secs_f64(),
            })
            .collect()
    }
}

impl Default for TickStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_recent() {
        let stats = TickStats::new();
        stats.record(Phase::Input, Duration::from_millis(10), true);
        stats.record(Phase::Plant, Duration::from_millis(20), true);
        stats.record(Phase::Output, Duration::from_millis(30), false);

        let recent = stats.recent(10);
        assert_eq!(recent.len(), 3);
        // Most recent first.
        assert_eq!(recent[0].phase, Phase::Output);
        assert!(!recent[0].success);
        assert_eq!(recent[2].phase, Phase::Input);
        assert_eq!(recent[2].duration_ms, 10);
    }

    #[test]
    fn test_bounded_ring_buffer() {
        let stats = TickStats::with_capacity(5);
        for i in 0..10u64 {
            stats.record(Phase::Input, Duration::from_millis(i), true);
        }
        let recent = stats.recent(100);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].duration_ms, 9);
        assert_eq!(recent[4].duration_ms, 5);
    }

    #[test]
    fn test_phase_percentiles() {
        let stats = TickStats::new();
        for i in 1..=100u64 {
            stats.record(Phase::Input, Duration::from_millis(i), true);
        }

        let s = stats.phase_stats(Phase::Input).unwrap();
        assert_eq!(s.sample_count, 100);
        assert!(s.p50_ms > 40.0 && s.p50_ms < 60.0, "p50={}", s.p50_ms);
        assert!(s.p95_ms > 85.0 && s.p95_ms < 105.0, "p95={}", s.p95_ms);

        // Untouched phases report nothing.
        assert!(stats.phase_stats(Phase::Output).is_none());
    }

    #[test]
    fn test_tick_counter() {
        let stats = TickStats::new();
        assert_eq!(stats.tick_count(), 0);
        stats.tick_done();
        stats.tick_done();
        assert_eq!(stats.tick_count(), 2);
    }

    #[test]
    fn test_concurrent_recording() {
        use std::sync::Arc;

        let stats = Arc::new(TickStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        s.record(Phase::Input, Duration::from_micros(100 + i), true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let s = stats.phase_stats(Phase::Input).unwrap();
        assert_eq!(s.sample_count, 400);
    }
}
