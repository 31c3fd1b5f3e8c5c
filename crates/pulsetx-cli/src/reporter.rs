//! Periodic statistics reporter.
//!
//! Runs on its own thread, sampling a [`StatsCollector`] every interval and
//! logging the result. Stopped through a channel so shutdown is immediate.

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use pulsetx_core::{StatsCollector, StatsReport};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle on the reporter thread
pub struct Reporter {
    stop_tx: Sender<()>,
    handle: JoinHandle<StatsCollector>,
}

impl Reporter {
    /// Start reporting every `interval`
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(mut collector: StatsCollector, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("pulsetx-stats".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => log_report(&collector.sample()),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                collector
            })?;
        Ok(Self { stop_tx, handle })
    }

    /// Stop the thread and hand back the collector for a final sample
    pub fn stop(self) -> Option<StatsCollector> {
        let _ = self.stop_tx.send(());
        match self.handle.join() {
            Ok(collector) => Some(collector),
            Err(_) => {
                warn!("statistics reporter panicked");
                None
            }
        }
    }
}

/// Log one report: a line per socket, then timing and interrupts
pub fn log_report(report: &StatsReport) {
    for socket in &report.sockets {
        info!(
            queue = socket.queue_id,
            tx_pps = socket.tx_pps.round() as u64,
            tx = socket.totals.tx_npkts,
            frags = socket.totals.tx_frags,
            completed = socket.totals.completions,
            outstanding = socket.totals.outstanding,
            ring_full = socket.delta.tx_ring_full,
            wakeups = socket.delta.tx_wakeup_sendtos,
            copy_sends = socket.delta.copy_tx_sendtos,
            late = socket.totals.late_completions,
            "tx"
        );
        let rates = &socket.rates;
        debug!(
            queue = socket.queue_id,
            frags_per_sec = rates.tx_frags.round() as u64,
            completions_per_sec = rates.completions.round() as u64,
            ring_full_per_sec = rates.tx_ring_full.round() as u64,
            wakeups_per_sec = rates.tx_wakeup_sendtos.round() as u64,
            copy_sends_per_sec = rates.copy_tx_sendtos.round() as u64,
            rx_pps = rates.rx_npkts.round() as u64,
            rx_empty_polls_per_sec = rates.rx_empty_polls.round() as u64,
            fill_fail_per_sec = rates.fill_fail_polls.round() as u64,
            "tx rates"
        );
        if let (Some(driver), Some(rates)) = (socket.driver_delta, socket.driver_rates) {
            info!(
                queue = socket.queue_id,
                tx_invalid = driver.tx_invalid,
                tx_ring_empty = driver.tx_ring_empty,
                rx_dropped = driver.rx_dropped,
                rx_invalid = driver.rx_invalid,
                rx_ring_full = driver.rx_ring_full,
                rx_fill_empty = driver.rx_fill_empty,
                tx_invalid_per_sec = rates.tx_invalid.round() as u64,
                tx_ring_empty_per_sec = rates.tx_ring_empty.round() as u64,
                rx_dropped_per_sec = rates.rx_dropped.round() as u64,
                rx_invalid_per_sec = rates.rx_invalid.round() as u64,
                rx_ring_full_per_sec = rates.rx_ring_full.round() as u64,
                rx_fill_empty_per_sec = rates.rx_fill_empty.round() as u64,
                "driver"
            );
        }
    }

    let timing = &report.timing;
    if let (Some(min), Some(mean), Some(max)) = (timing.min, timing.mean, timing.max) {
        info!(
            cycles = timing.cycles,
            min_us = min.as_micros() as u64,
            mean_us = mean.as_micros() as u64,
            max_us = max.as_micros() as u64,
            overruns = timing.overruns,
            "cycle timing"
        );
    }
    if let (Some(total), Some(rate)) = (report.interrupts, report.irq_rate) {
        info!(total, per_sec = rate.round() as u64, "interrupts");
    }
}
