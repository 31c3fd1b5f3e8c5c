//! Transmit statistics.
//!
//! The scheduler bumps relaxed atomic counters on its hot path; a
//! [`StatsCollector`] on any thread reads them, asks each socket's driver for
//! its counters and turns consecutive samples into deltas and rates.

use pulsetx_transport::{DriverStats, DriverStatsSource, IrqCounter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-socket counters maintained by the scheduler
///
/// The RX-side counters (`rx_npkts`, `rx_frags`, `rx_empty_polls`,
/// `fill_fail_polls`) stay zero in transmit-only mode; they exist so reports
/// keep the same shape as a receiving socket's.
#[derive(Debug, Default)]
pub struct SocketCounters {
    tx_npkts: AtomicU64,
    tx_frags: AtomicU64,
    rx_npkts: AtomicU64,
    rx_frags: AtomicU64,
    rx_empty_polls: AtomicU64,
    fill_fail_polls: AtomicU64,
    copy_tx_sendtos: AtomicU64,
    tx_wakeup_sendtos: AtomicU64,
    tx_ring_full: AtomicU64,
    completions: AtomicU64,
    late_completions: AtomicU64,
    outstanding: AtomicU64,
}

impl SocketCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submitted batch
    pub fn record_tx(&self, packets: u64, frags: u64) {
        self.tx_npkts.fetch_add(packets, Ordering::Relaxed);
        self.tx_frags.fetch_add(frags, Ordering::Relaxed);
    }

    /// Record descriptors returned on the completion ring
    pub fn record_completions(&self, count: u64) {
        self.completions.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a wakeup send; copy-mode sends are counted separately too
    pub fn record_wakeup(&self, copy_mode: bool) {
        self.tx_wakeup_sendtos.fetch_add(1, Ordering::Relaxed);
        if copy_mode {
            self.copy_tx_sendtos.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed TX reservation
    pub fn record_tx_ring_full(&self) {
        self.tx_ring_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cycle that had to wait for its frames to complete
    pub fn record_late_completion(&self) {
        self.late_completions.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the number of descriptors currently owned by the kernel
    pub fn set_outstanding(&self, outstanding: u64) {
        self.outstanding.store(outstanding, Ordering::Relaxed);
    }

    /// Get snapshot of current counters
    pub fn snapshot(&self) -> SocketSnapshot {
        SocketSnapshot {
            tx_npkts: self.tx_npkts.load(Ordering::Relaxed),
            tx_frags: self.tx_frags.load(Ordering::Relaxed),
            rx_npkts: self.rx_npkts.load(Ordering::Relaxed),
            rx_frags: self.rx_frags.load(Ordering::Relaxed),
            rx_empty_polls: self.rx_empty_polls.load(Ordering::Relaxed),
            fill_fail_polls: self.fill_fail_polls.load(Ordering::Relaxed),
            copy_tx_sendtos: self.copy_tx_sendtos.load(Ordering::Relaxed),
            tx_wakeup_sendtos: self.tx_wakeup_sendtos.load(Ordering::Relaxed),
            tx_ring_full: self.tx_ring_full.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            late_completions: self.late_completions.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`SocketCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketSnapshot {
    /// Packets submitted
    pub tx_npkts: u64,
    /// Descriptors submitted (more than packets with multi-buffer)
    pub tx_frags: u64,
    /// Packets received (the generator does not receive, so zero)
    pub rx_npkts: u64,
    /// Descriptors received
    pub rx_frags: u64,
    /// Receive polls that found nothing
    pub rx_empty_polls: u64,
    /// Fill ring refills that found no room
    pub fill_fail_polls: u64,
    /// Wakeup sends issued in copy mode
    pub copy_tx_sendtos: u64,
    /// Wakeup sends issued
    pub tx_wakeup_sendtos: u64,
    /// Failed TX reservations
    pub tx_ring_full: u64,
    /// Completed descriptors
    pub completions: u64,
    /// Cycles that waited for frame reuse
    pub late_completions: u64,
    /// Descriptors owned by the kernel (gauge)
    pub outstanding: u64,
}

impl SocketSnapshot {
    /// Counter increase since `earlier`; the gauge keeps its current value
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            tx_npkts: self.tx_npkts.saturating_sub(earlier.tx_npkts),
            tx_frags: self.tx_frags.saturating_sub(earlier.tx_frags),
            rx_npkts: self.rx_npkts.saturating_sub(earlier.rx_npkts),
            rx_frags: self.rx_frags.saturating_sub(earlier.rx_frags),
            rx_empty_polls: self.rx_empty_polls.saturating_sub(earlier.rx_empty_polls),
            fill_fail_polls: self.fill_fail_polls.saturating_sub(earlier.fill_fail_polls),
            copy_tx_sendtos: self.copy_tx_sendtos.saturating_sub(earlier.copy_tx_sendtos),
            tx_wakeup_sendtos: self.tx_wakeup_sendtos.saturating_sub(earlier.tx_wakeup_sendtos),
            tx_ring_full: self.tx_ring_full.saturating_sub(earlier.tx_ring_full),
            completions: self.completions.saturating_sub(earlier.completions),
            late_completions: self.late_completions.saturating_sub(earlier.late_completions),
            outstanding: self.outstanding,
        }
    }
}

fn driver_since(now: &DriverStats, earlier: &DriverStats) -> DriverStats {
    DriverStats {
        rx_dropped: now.rx_dropped.saturating_sub(earlier.rx_dropped),
        rx_invalid: now.rx_invalid.saturating_sub(earlier.rx_invalid),
        tx_invalid: now.tx_invalid.saturating_sub(earlier.tx_invalid),
        rx_ring_full: now.rx_ring_full.saturating_sub(earlier.rx_ring_full),
        rx_fill_empty: now.rx_fill_empty.saturating_sub(earlier.rx_fill_empty),
        tx_ring_empty: now.tx_ring_empty.saturating_sub(earlier.tx_ring_empty),
    }
}

/// Inter-cycle interval statistics
#[derive(Debug)]
pub struct CycleTiming {
    cycles: AtomicU64,
    intervals: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
    total_ns: AtomicU64,
    overruns: AtomicU64,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            intervals: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }
}

impl CycleTiming {
    /// Create empty timing statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed cycle
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the time between two consecutive cycle starts
    pub fn record_interval(&self, interval: Duration) {
        let ns = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
        self.intervals.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    /// Record a cycle that finished after its deadline
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current timing
    pub fn snapshot(&self) -> TimingSnapshot {
        let intervals = self.intervals.load(Ordering::Relaxed);
        let (min, max, mean) = if intervals == 0 {
            (None, None, None)
        } else {
            let total = self.total_ns.load(Ordering::Relaxed);
            (
                Some(Duration::from_nanos(self.min_ns.load(Ordering::Relaxed))),
                Some(Duration::from_nanos(self.max_ns.load(Ordering::Relaxed))),
                Some(Duration::from_nanos(total / intervals)),
            )
        };
        TimingSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            intervals,
            min,
            max,
            mean,
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`CycleTiming`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingSnapshot {
    /// Cycles completed
    pub cycles: u64,
    /// Intervals measured
    pub intervals: u64,
    /// Shortest interval
    pub min: Option<Duration>,
    /// Longest interval
    pub max: Option<Duration>,
    /// Mean interval
    pub mean: Option<Duration>,
    /// Cycles that missed their deadline
    pub overruns: u64,
}

/// One socket as seen by the collector
pub struct SocketProbe {
    /// Interface queue of the socket
    pub queue_id: u32,
    /// Scheduler-maintained counters
    pub counters: Arc<SocketCounters>,
    /// Driver statistics source, if the socket offers one
    pub driver: Option<Arc<dyn DriverStatsSource>>,
}

/// Point-in-time reading of every counter
#[derive(Debug, Clone)]
pub struct StatsSample {
    /// When the sample was taken
    pub at: Instant,
    /// Per socket: queue id, counters and driver stats (absent if unavailable)
    pub sockets: Vec<(u32, SocketSnapshot, Option<DriverStats>)>,
    /// Cycle timing
    pub timing: TimingSnapshot,
    /// Interrupt total, if counted
    pub interrupts: Option<u64>,
}

/// Per-second rates of the socket counters over one interval
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SocketRates {
    /// Packets submitted per second
    pub tx_npkts: f64,
    /// Descriptors submitted per second
    pub tx_frags: f64,
    /// Packets received per second
    pub rx_npkts: f64,
    /// Descriptors received per second
    pub rx_frags: f64,
    /// Empty receive polls per second
    pub rx_empty_polls: f64,
    /// Failed fill refills per second
    pub fill_fail_polls: f64,
    /// Copy-mode wakeup sends per second
    pub copy_tx_sendtos: f64,
    /// Wakeup sends per second
    pub tx_wakeup_sendtos: f64,
    /// Failed TX reservations per second
    pub tx_ring_full: f64,
    /// Completions per second
    pub completions: f64,
}

impl SocketRates {
    fn from_delta(delta: &SocketSnapshot, elapsed: Duration) -> Self {
        Self {
            tx_npkts: rate(delta.tx_npkts, elapsed),
            tx_frags: rate(delta.tx_frags, elapsed),
            rx_npkts: rate(delta.rx_npkts, elapsed),
            rx_frags: rate(delta.rx_frags, elapsed),
            rx_empty_polls: rate(delta.rx_empty_polls, elapsed),
            fill_fail_polls: rate(delta.fill_fail_polls, elapsed),
            copy_tx_sendtos: rate(delta.copy_tx_sendtos, elapsed),
            tx_wakeup_sendtos: rate(delta.tx_wakeup_sendtos, elapsed),
            tx_ring_full: rate(delta.tx_ring_full, elapsed),
            completions: rate(delta.completions, elapsed),
        }
    }
}

/// Per-second rates of the driver counters over one interval
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriverRates {
    /// Receive drops per second
    pub rx_dropped: f64,
    /// Invalid RX descriptors per second
    pub rx_invalid: f64,
    /// Invalid TX descriptors per second
    pub tx_invalid: f64,
    /// RX ring full events per second
    pub rx_ring_full: f64,
    /// Fill ring empty events per second
    pub rx_fill_empty: f64,
    /// TX ring empty events per second
    pub tx_ring_empty: f64,
}

impl DriverRates {
    fn from_delta(delta: &DriverStats, elapsed: Duration) -> Self {
        Self {
            rx_dropped: rate(delta.rx_dropped, elapsed),
            rx_invalid: rate(delta.rx_invalid, elapsed),
            tx_invalid: rate(delta.tx_invalid, elapsed),
            rx_ring_full: rate(delta.rx_ring_full, elapsed),
            rx_fill_empty: rate(delta.rx_fill_empty, elapsed),
            tx_ring_empty: rate(delta.tx_ring_empty, elapsed),
        }
    }
}

/// Statistics for one socket over one reporting interval
#[derive(Debug, Clone, PartialEq)]
pub struct SocketReport {
    /// Interface queue
    pub queue_id: u32,
    /// Totals since start
    pub totals: SocketSnapshot,
    /// Increase over the interval
    pub delta: SocketSnapshot,
    /// Packets per second over the interval
    pub tx_pps: f64,
    /// Completions per second over the interval
    pub completion_pps: f64,
    /// Every counter's rate over the interval
    pub rates: SocketRates,
    /// Driver totals, absent when the driver cannot report them
    pub driver: Option<DriverStats>,
    /// Driver increase over the interval
    pub driver_delta: Option<DriverStats>,
    /// Driver rates over the interval, absent with the driver block
    pub driver_rates: Option<DriverRates>,
}

/// Derived statistics between two samples
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    /// Interval covered
    pub elapsed: Duration,
    /// Per-socket figures
    pub sockets: Vec<SocketReport>,
    /// Cycle timing totals
    pub timing: TimingSnapshot,
    /// Interrupt total
    pub interrupts: Option<u64>,
    /// Interrupts per second over the interval
    pub irq_rate: Option<f64>,
}

impl StatsReport {
    /// Change from `previous` to `current`
    ///
    /// Sockets are paired by position. A driver block missing from
    /// `previous` counts from zero; one missing from `current` is absent.
    pub fn between(previous: &StatsSample, current: &StatsSample) -> Self {
        let elapsed = current.at.saturating_duration_since(previous.at);

        let sockets = current
            .sockets
            .iter()
            .zip(&previous.sockets)
            .map(|(&(queue_id, totals, driver), (_, before, driver_before))| {
                let delta = totals.since(before);
                let driver_delta = driver.map(|now| {
                    driver_before.map_or(now, |before| driver_since(&now, &before))
                });
                let rates = SocketRates::from_delta(&delta, elapsed);
                SocketReport {
                    queue_id,
                    totals,
                    delta,
                    tx_pps: rates.tx_npkts,
                    completion_pps: rates.completions,
                    rates,
                    driver,
                    driver_delta,
                    driver_rates: driver_delta.map(|d| DriverRates::from_delta(&d, elapsed)),
                }
            })
            .collect();

        let irq_rate = match (current.interrupts, previous.interrupts) {
            (Some(now), Some(before)) => Some(rate(now.saturating_sub(before), elapsed)),
            _ => None,
        };

        Self {
            elapsed,
            sockets,
            timing: current.timing,
            interrupts: current.interrupts,
            irq_rate,
        }
    }

    /// Total packets submitted across sockets
    pub fn total_tx(&self) -> u64 {
        self.sockets.iter().map(|s| s.totals.tx_npkts).sum()
    }

    /// Aggregate packet rate across sockets
    pub fn total_tx_pps(&self) -> f64 {
        self.sockets.iter().map(|s| s.tx_pps).sum()
    }
}

fn rate(delta: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { delta as f64 / secs } else { 0.0 }
}

/// Read-only view over all counters of a run
pub struct StatsCollector {
    sockets: Vec<SocketProbe>,
    timing: Arc<CycleTiming>,
    irq: Option<IrqCounter>,
    previous: StatsSample,
}

impl StatsCollector {
    /// Collector over the given sockets and timing; the baseline is taken now
    pub fn new(sockets: Vec<SocketProbe>, timing: Arc<CycleTiming>, irq: Option<IrqCounter>) -> Self {
        let baseline = StatsSample {
            at: Instant::now(),
            sockets: sockets
                .iter()
                .map(|s| (s.queue_id, SocketSnapshot::default(), None))
                .collect(),
            timing: TimingSnapshot::default(),
            interrupts: irq.as_ref().and_then(IrqCounter::read),
        };
        Self {
            sockets,
            timing,
            irq,
            previous: baseline,
        }
    }

    /// Read every counter without touching the baseline
    pub fn snapshot(&self) -> StatsSample {
        StatsSample {
            at: Instant::now(),
            sockets: self
                .sockets
                .iter()
                .map(|s| {
                    (
                        s.queue_id,
                        s.counters.snapshot(),
                        s.driver.as_ref().and_then(|d| d.driver_stats()),
                    )
                })
                .collect(),
            timing: self.timing.snapshot(),
            interrupts: self.irq.as_ref().and_then(IrqCounter::read),
        }
    }

    /// Take a sample and report the change since the previous one
    pub fn sample(&mut self) -> StatsReport {
        let current = self.snapshot();
        let report = StatsReport::between(&self.previous, &current);
        self.previous = current;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDriver(DriverStats);

    impl DriverStatsSource for FixedDriver {
        fn driver_stats(&self) -> Option<DriverStats> {
            Some(self.0)
        }
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = SocketCounters::new();
        counters.record_tx(4, 8);
        counters.record_tx(4, 8);
        counters.record_completions(5);
        counters.record_wakeup(true);
        counters.record_wakeup(false);
        counters.record_tx_ring_full();
        counters.set_outstanding(3);

        let snap = counters.snapshot();
        assert_eq!(snap.tx_npkts, 8);
        assert_eq!(snap.tx_frags, 16);
        assert_eq!(snap.completions, 5);
        assert_eq!(snap.tx_wakeup_sendtos, 2);
        assert_eq!(snap.copy_tx_sendtos, 1);
        assert_eq!(snap.tx_ring_full, 1);
        assert_eq!(snap.outstanding, 3);
    }

    #[test]
    fn test_timing() {
        let timing = CycleTiming::new();
        assert_eq!(timing.snapshot().mean, None);

        timing.record_interval(Duration::from_millis(9));
        timing.record_interval(Duration::from_millis(11));
        timing.record_overrun();
        let snap = timing.snapshot();
        assert_eq!(snap.min, Some(Duration::from_millis(9)));
        assert_eq!(snap.max, Some(Duration::from_millis(11)));
        assert_eq!(snap.mean, Some(Duration::from_millis(10)));
        assert_eq!(snap.overruns, 1);
    }

    #[test]
    fn test_sample_deltas() {
        let counters = Arc::new(SocketCounters::new());
        let probe = SocketProbe {
            queue_id: 0,
            counters: Arc::clone(&counters),
            driver: None,
        };
        let mut collector = StatsCollector::new(vec![probe], Arc::new(CycleTiming::new()), None);

        counters.record_tx(10, 10);
        std::thread::sleep(Duration::from_millis(5));
        let first = collector.sample();
        assert_eq!(first.sockets[0].delta.tx_npkts, 10);
        assert!(first.sockets[0].tx_pps > 0.0);
        // Driver block degrades to absent
        assert_eq!(first.sockets[0].driver, None);
        assert_eq!(first.interrupts, None);

        counters.record_tx(5, 5);
        let second = collector.sample();
        assert_eq!(second.sockets[0].delta.tx_npkts, 5);
        assert_eq!(second.total_tx(), 15);
    }

    #[test]
    fn test_driver_deltas() {
        let stats = DriverStats {
            tx_invalid: 2,
            tx_ring_empty: 7,
            ..Default::default()
        };
        let probe = SocketProbe {
            queue_id: 1,
            counters: Arc::new(SocketCounters::new()),
            driver: Some(Arc::new(FixedDriver(stats))),
        };
        let mut collector = StatsCollector::new(vec![probe], Arc::new(CycleTiming::new()), None);

        let first = collector.sample();
        assert_eq!(first.sockets[0].driver, Some(stats));
        assert_eq!(first.sockets[0].driver_delta, Some(stats));

        let second = collector.sample();
        assert_eq!(second.sockets[0].driver_delta, Some(DriverStats::default()));
    }

    #[test]
    fn test_rates_between_samples() {
        let start = Instant::now();
        let counters = SocketSnapshot {
            tx_npkts: 100,
            tx_frags: 200,
            copy_tx_sendtos: 4,
            tx_wakeup_sendtos: 10,
            tx_ring_full: 6,
            completions: 80,
            outstanding: 20,
            ..Default::default()
        };
        let driver = DriverStats {
            tx_invalid: 2,
            tx_ring_empty: 8,
            ..Default::default()
        };
        let previous = StatsSample {
            at: start,
            sockets: vec![(0, SocketSnapshot::default(), None), (1, SocketSnapshot::default(), None)],
            timing: TimingSnapshot::default(),
            interrupts: Some(1_000),
        };
        let current = StatsSample {
            at: start + Duration::from_secs(2),
            sockets: vec![(0, counters, Some(driver)), (1, counters, None)],
            timing: TimingSnapshot::default(),
            interrupts: Some(1_500),
        };

        let report = StatsReport::between(&previous, &current);
        assert_eq!(report.elapsed, Duration::from_secs(2));
        assert_eq!(report.irq_rate, Some(250.0));

        let first = &report.sockets[0];
        assert_eq!(first.tx_pps, 50.0);
        assert_eq!(first.completion_pps, 40.0);
        assert_eq!(
            first.rates,
            SocketRates {
                tx_npkts: 50.0,
                tx_frags: 100.0,
                copy_tx_sendtos: 2.0,
                tx_wakeup_sendtos: 5.0,
                tx_ring_full: 3.0,
                completions: 40.0,
                ..Default::default()
            }
        );
        assert_eq!(first.rates.rx_npkts, 0.0);
        assert_eq!(first.rates.rx_empty_polls, 0.0);
        assert_eq!(first.rates.fill_fail_polls, 0.0);
        assert_eq!(
            first.driver_rates,
            Some(DriverRates {
                tx_invalid: 1.0,
                tx_ring_empty: 4.0,
                ..Default::default()
            })
        );

        // No driver counters, no driver rates
        let second = &report.sockets[1];
        assert_eq!(second.rates, first.rates);
        assert_eq!(second.driver, None);
        assert_eq!(second.driver_rates, None);
    }

    #[test]
    fn test_rates_zero_interval() {
        let at = Instant::now();
        let sample = StatsSample {
            at,
            sockets: vec![(0, SocketSnapshot { tx_npkts: 5, ..Default::default() }, None)],
            timing: TimingSnapshot::default(),
            interrupts: None,
        };
        let report = StatsReport::between(&sample, &sample);
        assert_eq!(report.sockets[0].rates, SocketRates::default());
        assert_eq!(report.irq_rate, None);
    }
}
