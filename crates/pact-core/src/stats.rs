//! Dispatch statistics.
//!
//! Global counters plus per-pattern counters with a rolling timing
//! window. Counters are only booked for entry dispatches (depth 1),
//! so prior hops and nested calls do not inflate them.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Rolling sample window with percentile summaries.
#[derive(Debug)]
pub struct TimeWindow {
    cap: usize,
    samples: VecDeque<f64>,
}

impl TimeWindow {
    /// Creates a window holding at most `cap` samples.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(2),
            samples: VecDeque::new(),
        }
    }

    /// Records a sample, dropping the oldest beyond capacity.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Summarizes the current window.
    #[must_use]
    pub fn summary(&self) -> TimeSummary {
        if self.samples.is_empty() {
            return TimeSummary::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        TimeSummary {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean: sum / count as f64,
            p50: percentile(&sorted, 50.0),
            p90: percentile(&sorted, 90.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Summary of a timing window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSummary {
    /// Samples in the window.
    pub count: usize,
    /// Fastest sample, milliseconds.
    pub min: f64,
    /// Slowest sample, milliseconds.
    pub max: f64,
    /// Mean, milliseconds.
    pub mean: f64,
    /// Median.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
}

/// Global counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalSnapshot {
    /// Entry dispatches started.
    pub calls: u64,
    /// Entry dispatches completed successfully.
    pub done: u64,
    /// Entry dispatches failed.
    pub fails: u64,
    /// Cache replays served.
    pub cache: u64,
}

/// Per-pattern counter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PatternSnapshot {
    /// Dispatches routed to this pattern.
    pub calls: u64,
    /// Successful completions.
    pub done: u64,
    /// Failures.
    pub fails: u64,
    /// Rolling timing summary.
    pub time: TimeSummary,
}

struct PatternStats {
    calls: u64,
    done: u64,
    fails: u64,
    times: TimeWindow,
}

/// Counter store shared by one instance.
pub struct Stats {
    calls: AtomicU64,
    done: AtomicU64,
    fails: AtomicU64,
    cache: AtomicU64,
    window: usize,
    per: Mutex<HashMap<String, PatternStats>>,
}

impl Stats {
    /// Creates a store with the given per-pattern window size.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            calls: AtomicU64::new(0),
            done: AtomicU64::new(0),
            fails: AtomicU64::new(0),
            cache: AtomicU64::new(0),
            window,
            per: Mutex::new(HashMap::new()),
        }
    }

    /// Books a dispatch start.
    pub fn inc_calls(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Books a cache replay.
    pub fn inc_cache(&self) {
        self.cache.fetch_add(1, Ordering::Relaxed);
    }

    /// Books a routed dispatch against its pattern.
    pub fn pattern_call(&self, pattern: &str) {
        let mut per = self.per.lock();
        self.slot(&mut per, pattern).calls += 1;
    }

    /// Books a success with its duration. Successes without a
    /// resolved pattern (a `default$` delivery) book globally only.
    pub fn record_done(&self, pattern: Option<&str>, elapsed_ms: f64) {
        self.done.fetch_add(1, Ordering::Relaxed);
        if let Some(pattern) = pattern {
            let mut per = self.per.lock();
            let slot = self.slot(&mut per, pattern);
            slot.done += 1;
            slot.times.push(elapsed_ms);
        }
    }

    /// Books a failure. Failures before pattern resolution book
    /// globally only.
    pub fn record_fail(&self, pattern: Option<&str>) {
        self.fails.fetch_add(1, Ordering::Relaxed);
        if let Some(pattern) = pattern {
            let mut per = self.per.lock();
            self.slot(&mut per, pattern).fails += 1;
        }
    }

    fn slot<'a>(
        &self,
        per: &'a mut HashMap<String, PatternStats>,
        pattern: &str,
    ) -> &'a mut PatternStats {
        per.entry(pattern.to_string()).or_insert_with(|| PatternStats {
            calls: 0,
            done: 0,
            fails: 0,
            times: TimeWindow::new(self.window),
        })
    }

    /// Global counter snapshot.
    #[must_use]
    pub fn snapshot(&self) -> GlobalSnapshot {
        GlobalSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            fails: self.fails.load(Ordering::Relaxed),
            cache: self.cache.load(Ordering::Relaxed),
        }
    }

    /// Snapshot for one canonical pattern.
    #[must_use]
    pub fn snapshot_for(&self, pattern: &str) -> Option<PatternSnapshot> {
        let per = self.per.lock();
        per.get(pattern).map(|s| PatternSnapshot {
            calls: s.calls,
            done: s.done,
            fails: s.fails,
            time: s.times.summary(),
        })
    }

    /// Snapshots every tracked pattern.
    #[must_use]
    pub fn all_patterns(&self) -> HashMap<String, PatternSnapshot> {
        let per = self.per.lock();
        per.iter()
            .map(|(k, s)| {
                (
                    k.clone(),
                    PatternSnapshot {
                        calls: s.calls,
                        done: s.done,
                        fails: s.fails,
                        time: s.times.summary(),
                    },
                )
            })
            .collect()
    }
}
