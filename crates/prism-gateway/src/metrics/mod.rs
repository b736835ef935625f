//! Process-wide service metrics: request counts, latency/TTFT percentiles,
//! token throughput, tool-call and error tallies.
//!
//! One `MetricsCollector` is shared by every turn. Each public operation is
//! a single short critical section; `snapshot` computes percentiles from a
//! point-in-time copy of the retained samples.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Instant,
};

use serde::Serialize;

/// Retained latency/TTFT samples; the oldest are evicted beyond this bound.
const MAX_SAMPLES: usize = 1_000;

/// How many tool names the snapshot reports.
const TOP_TOOLS: usize = 10;

// ─── Snapshot types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RequestStats {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TtftStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TokenStats {
    pub input: u64,
    pub output: u64,
    pub throughput_per_second: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolCallCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: RequestStats,
    pub latency_ms: LatencyStats,
    pub ttft_ms: TtftStats,
    pub tokens: TokenStats,
    pub tool_calls: Vec<ToolCallCount>,
    pub errors: HashMap<String, u64>,
}

/// Opaque handle returned by [`MetricsCollector::record_request_start`].
#[derive(Debug, Clone, Copy)]
pub struct RequestStamp {
    start: Instant,
}

// ─── Collector ───────────────────────────────────────────────────────────────

struct Inner {
    requests_total: u64,
    requests_success: u64,
    requests_error: u64,
    latencies_ms: VecDeque<f64>,
    ttft_ms: VecDeque<f64>,
    tokens_in: u64,
    tokens_out: u64,
    tool_calls: HashMap<String, u64>,
    errors: HashMap<String, u64>,
    since: Instant,
}

impl Inner {
    fn fresh() -> Self {
        Self {
            requests_total: 0,
            requests_success: 0,
            requests_error: 0,
            latencies_ms: VecDeque::new(),
            ttft_ms: VecDeque::new(),
            tokens_in: 0,
            tokens_out: 0,
            tool_calls: HashMap::new(),
            errors: HashMap::new(),
            since: Instant::now(),
        }
    }
}

pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::fresh()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("metrics lock poisoned")
    }

    pub fn record_request_start(&self) -> RequestStamp {
        let mut inner = self.lock();
        inner.requests_total += 1;
        RequestStamp {
            start: Instant::now(),
        }
    }

    /// Record time-to-first-token. Called at most once per turn by the
    /// translator when the first visible text is emitted.
    pub fn record_first_token(&self, stamp: &RequestStamp) {
        let elapsed = stamp.start.elapsed().as_secs_f64() * 1000.0;
        let mut inner = self.lock();
        push_bounded(&mut inner.ttft_ms, elapsed);
    }

    pub fn record_request_complete(&self, stamp: &RequestStamp, success: bool) {
        let elapsed = stamp.start.elapsed().as_secs_f64() * 1000.0;
        let mut inner = self.lock();
        if success {
            inner.requests_success += 1;
        } else {
            inner.requests_error += 1;
        }
        push_bounded(&mut inner.latencies_ms, elapsed);
    }

    pub fn record_tokens(&self, input: u64, output: u64) {
        let mut inner = self.lock();
        inner.tokens_in += input;
        inner.tokens_out += output;
    }

    pub fn record_tool_call(&self, name: &str) {
        let mut inner = self.lock();
        *inner.tool_calls.entry(name.to_owned()).or_insert(0) += 1;
    }

    pub fn record_error(&self, kind: &str) {
        let mut inner = self.lock();
        *inner.errors.entry(kind.to_owned()).or_insert(0) += 1;
    }

    pub fn reset(&self) {
        *self.lock() = Inner::fresh();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();

        let latencies: Vec<f64> = inner.latencies_ms.iter().copied().collect();
        let ttft: Vec<f64> = inner.ttft_ms.iter().copied().collect();

        let mut tool_calls: Vec<ToolCallCount> = inner
            .tool_calls
            .iter()
            .map(|(name, count)| ToolCallCount {
                name: name.clone(),
                count: *count,
            })
            .collect();
        tool_calls.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(&b.name)));
        tool_calls.truncate(TOP_TOOLS);

        let finished = inner.requests_success + inner.requests_error;
        let success_rate = if finished == 0 {
            0.0
        } else {
            inner.requests_success as f64 / finished as f64
        };

        let elapsed_secs = inner.since.elapsed().as_secs_f64().max(f64::EPSILON);

        MetricsSnapshot {
            requests: RequestStats {
                total: inner.requests_total,
                success: inner.requests_success,
                error: inner.requests_error,
                success_rate,
            },
            latency_ms: LatencyStats {
                avg: mean(&latencies),
                min: min_of(&latencies),
                max: max_of(&latencies),
                p50: percentile(&latencies, 50.0),
                p95: percentile(&latencies, 95.0),
                p99: percentile(&latencies, 99.0),
            },
            ttft_ms: TtftStats {
                avg: mean(&ttft),
                min: min_of(&ttft),
                max: max_of(&ttft),
                p50: percentile(&ttft, 50.0),
                p95: percentile(&ttft, 95.0),
            },
            tokens: TokenStats {
                input: inner.tokens_in,
                output: inner.tokens_out,
                throughput_per_second: inner.tokens_out as f64 / elapsed_secs,
            },
            tool_calls,
            errors: inner.errors.clone(),
        }
    }
}

fn push_bounded(samples: &mut VecDeque<f64>, value: f64) {
    if samples.len() >= MAX_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(value);
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn min_of(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max_of(samples: &[f64]) -> f64 {
    samples.iter().copied().fold(0.0, f64::max)
}

/// Nearest-rank percentile over a copy of the samples.
fn percentile(samples: &[f64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
