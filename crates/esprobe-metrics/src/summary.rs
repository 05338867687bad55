//! Sliding-window summary with quantile estimation.
//!
//! Samples are kept in `age_buckets` rotating buckets spanning
//! `max_age / age_buckets` each. A bucket is dropped once its opening time
//! is older than `max_age`, so samples age out without explicit deletion.
//! Each bucket holds at most `buf_cap` samples; the oldest are evicted first.
//!
//! `sum` and `count` are cumulative over the lifetime of the summary, as in
//! the Prometheus summary type.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use esprobe_core::SummaryWindow;

/// Quantiles exported for every summary.
pub const OBJECTIVES: [f64; 3] = [0.5, 0.9, 0.99];

#[derive(Debug, Clone)]
struct AgeBucket {
    opened: Instant,
    samples: VecDeque<f64>,
}

#[derive(Debug, Clone)]
pub struct Summary {
    window: SummaryWindow,
    bucket_span: Duration,
    buckets: VecDeque<AgeBucket>,
    sum: f64,
    count: u64,
}

/// Point-in-time view of a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    /// `(quantile, value)` pairs, `NaN` when the window is empty.
    pub quantiles: Vec<(f64, f64)>,
    pub sum: f64,
    pub count: u64,
}

impl Summary {
    pub fn new(window: SummaryWindow) -> Self {
        let age_buckets = window.age_buckets.max(1);
        Self {
            window,
            bucket_span: window.max_age / age_buckets,
            buckets: VecDeque::with_capacity(age_buckets as usize),
            sum: 0.0,
            count: 0,
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.observe_at(value, Instant::now());
    }

    pub(crate) fn observe_at(&mut self, value: f64, now: Instant) {
        self.expire(now);

        let needs_bucket = match self.buckets.back() {
            Some(b) => now.saturating_duration_since(b.opened) >= self.bucket_span,
            None => true,
        };
        if needs_bucket {
            self.buckets.push_back(AgeBucket {
                opened: now,
                samples: VecDeque::new(),
            });
            while self.buckets.len() > self.window.age_buckets.max(1) as usize {
                self.buckets.pop_front();
            }
        }

        if let Some(bucket) = self.buckets.back_mut() {
            if bucket.samples.len() >= self.window.buf_cap.max(1) {
                bucket.samples.pop_front();
            }
            bucket.samples.push_back(value);
        }

        self.sum += value;
        self.count += 1;
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> SummarySnapshot {
        let mut samples: Vec<f64> = self
            .live_at(now)
            .flat_map(|b| b.samples.iter().copied())
            .collect();
        samples.sort_unstable_by(f64::total_cmp);

        let quantiles = OBJECTIVES
            .iter()
            .map(|&q| (q, quantile(&samples, q)))
            .collect();

        SummarySnapshot {
            quantiles,
            sum: self.sum,
            count: self.count,
        }
    }

    fn live_at(&self, now: Instant) -> impl Iterator<Item = &AgeBucket> {
        let max_age = self.window.max_age;
        self.buckets
            .iter()
            .filter(move |b| now.saturating_duration_since(b.opened) < max_age)
    }

    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.saturating_duration_since(front.opened) >= self.window.max_age {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Nearest-rank quantile over sorted samples.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
