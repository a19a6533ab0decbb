//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention with the
//! allocation path. Reporting is the only operation that resets anything
//! (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or allocation decisions.

use crate::domain::EndReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// Counters and histogram buckets are cumulative so the Prometheus
/// endpoint can expose them directly. Only the per-interval rate and
/// max are reset by `report()`.
pub struct Metrics {
    /// Reservations created (monotonic)
    reservations_created: AtomicU64,
    /// Reservations created since last report (reset on report)
    created_since_report: AtomicU64,
    /// Allocation latency histogram, select + commit (monotonic)
    allocation_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of allocation latencies in microseconds (monotonic)
    allocation_latency_sum_us: AtomicU64,
    /// Max allocation latency (reset on report)
    allocation_latency_max_us: AtomicU64,
    /// Reservations ended by client exit (monotonic)
    reservations_ended: AtomicU64,
    /// Reservations cancelled (monotonic)
    reservations_cancelled: AtomicU64,
    /// Reservations force-ended by the sweep (monotonic)
    reservations_expired: AtomicU64,
    /// Entry events recorded (monotonic)
    entries_total: AtomicU64,
    /// Allocation attempts lost to a concurrent writer (monotonic)
    allocation_conflicts: AtomicU64,
    /// Version-checked writes retried after a conflict (monotonic)
    commit_retries: AtomicU64,
    /// Requests rejected with no available place (monotonic)
    no_place_total: AtomicU64,
    /// Capacity increments rolled back after a failed reservation insert
    compensations_total: AtomicU64,
    /// Completed sweep runs (monotonic)
    sweep_runs: AtomicU64,
    /// Reservations a sweep could not end (monotonic)
    sweep_failures: AtomicU64,
    /// Duration of the most recent sweep
    last_sweep_duration_us: AtomicU64,
    /// Lifecycle notices dropped due to full channel (monotonic)
    notices_dropped: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            reservations_created: AtomicU64::new(0),
            created_since_report: AtomicU64::new(0),
            allocation_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            allocation_latency_sum_us: AtomicU64::new(0),
            allocation_latency_max_us: AtomicU64::new(0),
            reservations_ended: AtomicU64::new(0),
            reservations_cancelled: AtomicU64::new(0),
            reservations_expired: AtomicU64::new(0),
            entries_total: AtomicU64::new(0),
            allocation_conflicts: AtomicU64::new(0),
            commit_retries: AtomicU64::new(0),
            no_place_total: AtomicU64::new(0),
            compensations_total: AtomicU64::new(0),
            sweep_runs: AtomicU64::new(0),
            sweep_failures: AtomicU64::new(0),
            last_sweep_duration_us: AtomicU64::new(0),
            notices_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a committed reservation with its end-to-end allocation latency
    #[inline]
    pub fn record_reservation_created(&self, latency_us: u64) {
        self.reservations_created.fetch_add(1, Ordering::Relaxed);
        self.created_since_report.fetch_add(1, Ordering::Relaxed);
        self.allocation_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.allocation_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.allocation_latency_max_us, latency_us);
    }

    /// Record a reservation reaching a terminal state
    #[inline]
    pub fn record_reservation_finished(&self, reason: EndReason) {
        let counter = match reason {
            EndReason::Exit => &self.reservations_ended,
            EndReason::Cancelled => &self.reservations_cancelled,
            EndReason::Expired => &self.reservations_expired,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_entry(&self) {
        self.entries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_allocation_conflict(&self) {
        self.allocation_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_commit_retry(&self) {
        self.commit_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_no_place(&self) {
        self.no_place_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_compensation(&self) {
        self.compensations_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished sweep run
    pub fn record_sweep(&self, failed: usize, duration_us: u64) {
        self.sweep_runs.fetch_add(1, Ordering::Relaxed);
        self.sweep_failures.fetch_add(failed as u64, Ordering::Relaxed);
        self.last_sweep_duration_us.store(duration_us, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notice_dropped(&self) {
        self.notices_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reservations_created(&self) -> u64 {
        self.reservations_created.load(Ordering::Relaxed)
    }

    pub fn reservations_finished(&self, reason: EndReason) -> u64 {
        match reason {
            EndReason::Exit => self.reservations_ended.load(Ordering::Relaxed),
            EndReason::Cancelled => self.reservations_cancelled.load(Ordering::Relaxed),
            EndReason::Expired => self.reservations_expired.load(Ordering::Relaxed),
        }
    }

    pub fn allocation_conflicts(&self) -> u64 {
        self.allocation_conflicts.load(Ordering::Relaxed)
    }

    pub fn no_place_total(&self) -> u64 {
        self.no_place_total.load(Ordering::Relaxed)
    }

    pub fn notices_dropped(&self) -> u64 {
        self.notices_dropped.load(Ordering::Relaxed)
    }

    /// Generate a summary report
    ///
    /// Resets the per-interval rate and max. Cumulative counters and
    /// histogram buckets are left untouched.
    pub fn report(&self, active_reservations: usize, occupied_places: u64) -> MetricsSummary {
        let created_count = self.created_since_report.swap(0, Ordering::Relaxed);
        let allocation_lat_max_us = self.allocation_latency_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let created_per_sec = if elapsed.as_secs_f64() > 0.0 {
            created_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let allocation_lat_buckets = load_buckets(&self.allocation_latency_buckets);
        let allocation_lat_sum_us = self.allocation_latency_sum_us.load(Ordering::Relaxed);
        let allocation_count: u64 = allocation_lat_buckets.iter().sum();
        let allocation_lat_avg_us =
            if allocation_count > 0 { allocation_lat_sum_us / allocation_count } else { 0 };

        MetricsSummary {
            reservations_created: self.reservations_created.load(Ordering::Relaxed),
            created_per_sec,
            allocation_lat_buckets,
            allocation_lat_sum_us,
            allocation_lat_avg_us,
            allocation_lat_max_us,
            allocation_lat_p50_us: percentile_from_buckets(&allocation_lat_buckets, 0.50),
            allocation_lat_p95_us: percentile_from_buckets(&allocation_lat_buckets, 0.95),
            allocation_lat_p99_us: percentile_from_buckets(&allocation_lat_buckets, 0.99),
            reservations_ended: self.reservations_ended.load(Ordering::Relaxed),
            reservations_cancelled: self.reservations_cancelled.load(Ordering::Relaxed),
            reservations_expired: self.reservations_expired.load(Ordering::Relaxed),
            entries_total: self.entries_total.load(Ordering::Relaxed),
            allocation_conflicts: self.allocation_conflicts.load(Ordering::Relaxed),
            commit_retries: self.commit_retries.load(Ordering::Relaxed),
            no_place_total: self.no_place_total.load(Ordering::Relaxed),
            compensations_total: self.compensations_total.load(Ordering::Relaxed),
            sweep_runs: self.sweep_runs.load(Ordering::Relaxed),
            sweep_failures: self.sweep_failures.load(Ordering::Relaxed),
            last_sweep_duration_us: self.last_sweep_duration_us.load(Ordering::Relaxed),
            notices_dropped: self.notices_dropped.load(Ordering::Relaxed),
            active_reservations,
            occupied_places,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the Prometheus endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub reservations_created: u64,
    pub created_per_sec: f64,
    /// Allocation latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub allocation_lat_buckets: [u64; NUM_BUCKETS],
    pub allocation_lat_sum_us: u64,
    pub allocation_lat_avg_us: u64,
    /// Max allocation latency over the last interval (µs)
    pub allocation_lat_max_us: u64,
    pub allocation_lat_p50_us: u64,
    pub allocation_lat_p95_us: u64,
    pub allocation_lat_p99_us: u64,
    pub reservations_ended: u64,
    pub reservations_cancelled: u64,
    pub reservations_expired: u64,
    pub entries_total: u64,
    pub allocation_conflicts: u64,
    pub commit_retries: u64,
    pub no_place_total: u64,
    pub compensations_total: u64,
    pub sweep_runs: u64,
    pub sweep_failures: u64,
    pub last_sweep_duration_us: u64,
    pub notices_dropped: u64,
    /// Active reservations (snapshot)
    pub active_reservations: usize,
    /// Occupied places across all sectors (snapshot)
    pub occupied_places: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            created = %self.reservations_created,
            created_per_sec = format!("{:.1}", self.created_per_sec),
            alloc_avg_us = %self.allocation_lat_avg_us,
            alloc_max_us = %self.allocation_lat_max_us,
            alloc_p50_us = %self.allocation_lat_p50_us,
            alloc_p95_us = %self.allocation_lat_p95_us,
            alloc_p99_us = %self.allocation_lat_p99_us,
            ended = %self.reservations_ended,
            cancelled = %self.reservations_cancelled,
            expired = %self.reservations_expired,
            conflicts = %self.allocation_conflicts,
            no_place = %self.no_place_total,
            active = %self.active_reservations,
            occupied = %self.occupied_places,
            "metrics"
        );
    }
}
