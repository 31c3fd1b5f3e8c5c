//! End-to-end tests of the transmit engine over the loopback driver.

use pulsetx_core::packet::{PKTGEN_MAGIC, checksums_valid};
use pulsetx_core::{
    CancellationToken, ConfigError, Engine, Error, GeneratorConfig, RunSummary, VlanTag,
};
use pulsetx_integration_tests::{
    Harness, loopback, marker, scaled_timeout, small_config, timing_tolerance, wait_until,
};
use pulsetx_transport::{LoopbackHandle, LoopbackQueue, TransportError};
use pulsetx_transport::sys::XDP_PKT_CONTD;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type Running = JoinHandle<(Engine<LoopbackQueue>, Result<RunSummary, Error>)>;

/// Run the engine on its own thread; the join yields it back with the result
fn spawn_run(harness: Harness) -> (Running, LoopbackHandle, CancellationToken) {
    let Harness {
        mut engine,
        driver,
        token,
    } = harness;
    let handle = thread::spawn(move || {
        let result = engine.run();
        (engine, result)
    });
    (handle, driver, token)
}

#[test]
fn test_scenario_batch_of_four_over_two_cycles() {
    let config = GeneratorConfig {
        batch_size: 4,
        frame_size: 2048,
        cycles: 2,
        fill_pattern: 0xAABB_CCDD,
        ..small_config()
    };
    let Some(mut h) = loopback(config, true) else {
        return;
    };
    let summary = h.engine.run().unwrap();
    assert_eq!(summary.cycles, 2);
    assert_eq!(summary.descriptors, 8);
    assert!(summary.drained);

    let layout = *h.engine.scheduler().template().layout();
    let (stamp_at, stamp_len) = layout.stamp_region();
    let captured = h.driver.take_captured();
    assert_eq!(captured.len(), 8);

    let frames: Vec<u64> = captured.iter().map(|r| r.desc.addr / 2048).collect();
    assert_eq!(frames, vec![0, 2, 4, 6, 1, 3, 5, 7]);

    let pattern = 0xAABB_CCDDu32.to_be_bytes();
    for (i, record) in captured.iter().enumerate() {
        assert_eq!(record.desc.options, 0);
        assert_eq!(record.desc.len as usize, layout.len);
        assert!(checksums_valid(&layout, &record.data));

        for (offset, byte) in record.data.iter().enumerate().skip(layout.payload_offset) {
            if (stamp_at..stamp_at + stamp_len).contains(&offset) {
                continue;
            }
            let k = offset - layout.payload_offset;
            assert_eq!(*byte, pattern[k % 4], "payload byte {offset} of packet {i}");
        }
        let (cycle, frame) = marker(&layout, &record.data);
        assert_eq!(cycle as usize, i / 4);
        assert_eq!(u64::from(frame), frames[i]);
    }
}

#[test]
fn test_descriptor_addresses_follow_frame_law() {
    let config = GeneratorConfig {
        sockets: 2,
        batch_size: 3,
        cycles: 4,
        packet_size: 5000,
        multi_buffer: true,
        ..small_config()
    };
    let Some(mut h) = loopback(config.clone(), true) else {
        return;
    };
    h.engine.run().unwrap();

    let fpp = u64::from(config.frames_per_packet());
    assert_eq!(fpp, 3);
    let frame_size = u64::from(config.frame_size);
    let captured = h.driver.take_captured();
    assert_eq!(captured.len(), 2 * 4 * 3 * 3);

    for record in &captured {
        let addr = record.desc.addr;
        assert_eq!(addr % frame_size, 0);
        let frame = addr / frame_size;
        let slot = frame / fpp;
        // Socket s owns slots [s*2B, (s+1)*2B)
        assert_eq!(slot / 6, u64::from(record.queue));
        let fragment = frame % fpp;
        if fragment + 1 < fpp {
            assert_eq!(record.desc.options, XDP_PKT_CONTD);
            assert_eq!(u64::from(record.desc.len), frame_size);
        } else {
            assert_eq!(record.desc.options, 0);
        }
    }

    let report = h.engine.stats_collector().sample();
    for socket in &report.sockets {
        assert_eq!(socket.totals.tx_npkts, 12);
        assert_eq!(socket.totals.tx_frags, 36);
        assert_eq!(socket.totals.completions, 36);
        assert_eq!(socket.totals.outstanding, 0);
    }
}

#[test]
fn test_outstanding_never_exceeds_ring_capacity() {
    let config = GeneratorConfig {
        tx_ring_size: 8,
        batch_size: 3,
        cycles: 0,
        cycle_period_us: 200,
        ..small_config()
    };
    let Some(h) = loopback(config, false) else {
        return;
    };
    let collector = h.engine.stats_collector();
    let (running, driver, token) = spawn_run(h);

    for round in 0..6 {
        if round % 2 == 0 {
            driver.stall();
        } else {
            driver.resume();
        }
        for _ in 0..20 {
            let sample = collector.snapshot();
            let outstanding = sample.sockets[0].1.outstanding;
            assert!(outstanding <= 8, "{outstanding} descriptors outstanding");
            thread::sleep(Duration::from_micros(500));
        }
    }
    driver.resume();
    token.cancel();

    let (_engine, result) = running.join().unwrap();
    let summary = result.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.packets % 3, 0);
}

#[test]
fn test_parity_not_rewritten_before_completion() {
    let config = GeneratorConfig {
        batch_size: 2,
        cycles: 3,
        cycle_period_us: 200,
        ..small_config()
    };
    let Some(h) = loopback(config, true) else {
        return;
    };
    let collector = h.engine.stats_collector();
    let region = h.engine.umem_region();
    let layout = *h.engine.scheduler().template().layout();
    h.driver.stall();
    let (running, driver, _token) = spawn_run(h);

    // Cycle 2 needs parity 0 back and must wait
    assert!(wait_until(scaled_timeout(Duration::from_secs(2)), || {
        collector.snapshot().sockets[0].1.late_completions == 1
    }));
    thread::sleep(Duration::from_millis(20));
    for frame in [0u64, 2] {
        let bytes = region.copy_out(frame * 2048, layout.len as u32).unwrap();
        assert_eq!(marker(&layout, &bytes), (0, frame as u32));
    }
    assert_eq!(collector.snapshot().sockets[0].1.tx_npkts, 4);

    driver.resume();
    let (_engine, result) = running.join().unwrap();
    let summary = result.unwrap();
    assert_eq!(summary.cycles, 3);
    assert!(summary.drained);

    // Every packet left with the marker of the cycle that submitted it
    let captured = driver.take_captured();
    let cycles: Vec<u32> = captured.iter().map(|r| marker(&layout, &r.data).0).collect();
    assert_eq!(cycles, vec![0, 0, 1, 1, 2, 2]);
    let bytes = region.copy_out(0, layout.len as u32).unwrap();
    assert_eq!(marker(&layout, &bytes), (2, 0));
}

#[test]
fn test_cancellation_stops_at_batch_boundary() {
    let config = GeneratorConfig {
        batch_size: 8,
        cycles: 0,
        cycle_period_us: 1000,
        ..small_config()
    };
    let Some(h) = loopback(config, true) else {
        return;
    };
    let layout = *h.engine.scheduler().template().layout();
    let (running, driver, token) = spawn_run(h);

    thread::sleep(Duration::from_millis(30));
    token.cancel();
    let (_engine, result) = running.join().unwrap();
    let summary = result.unwrap();

    assert!(summary.cancelled);
    assert!(summary.drained);
    assert_eq!(summary.packets % 8, 0);
    assert_eq!(driver.transmitted(0), summary.descriptors);

    let captured = driver.take_captured();
    assert_eq!(captured.len() as u64, summary.packets);
    assert!(captured.iter().all(|r| checksums_valid(&layout, &r.data)));
}

#[test]
fn test_cancellation_while_waiting_on_stalled_driver() {
    let config = GeneratorConfig {
        tx_ring_size: 8,
        batch_size: 4,
        cycles: 0,
        cycle_period_us: 200,
        drain_retries: 2,
        drain_interval_ms: 5,
        ..small_config()
    };
    let Some(h) = loopback(config, true) else {
        return;
    };
    let layout = *h.engine.scheduler().template().layout();
    let collector = h.engine.stats_collector();
    h.driver.stall();
    let (running, driver, token) = spawn_run(h);

    assert!(wait_until(scaled_timeout(Duration::from_secs(2)), || {
        collector.snapshot().sockets[0].1.late_completions > 0
    }));
    token.cancel();
    let (_engine, result) = running.join().unwrap();
    let summary = result.unwrap();

    // Two cycles went out, nothing was reserved after the stop
    assert_eq!(summary.packets, 8);
    assert!(summary.cancelled);
    assert!(!summary.drained);
    assert_eq!(driver.transmitted(0), 0);

    // The submitted descriptors are intact and still deliverable
    driver.resume();
    driver.service();
    let captured = driver.take_captured();
    assert_eq!(captured.len(), 8);
    assert!(captured.iter().all(|r| checksums_valid(&layout, &r.data)));
}

#[test]
fn test_stalled_completions_resume_progress() {
    let config = GeneratorConfig {
        tx_ring_size: 8,
        batch_size: 4,
        cycles: 6,
        cycle_period_us: 200,
        ..small_config()
    };
    let Some(h) = loopback(config, true) else {
        return;
    };
    let layout = *h.engine.scheduler().template().layout();
    let collector = h.engine.stats_collector();
    h.driver.stall();
    let (running, driver, _token) = spawn_run(h);

    assert!(wait_until(scaled_timeout(Duration::from_secs(2)), || {
        collector.snapshot().sockets[0].1.late_completions > 0
    }));
    // Stuck, but nothing is dropped or resubmitted while stalled
    thread::sleep(Duration::from_millis(20));
    let stuck = collector.snapshot().sockets[0].1;
    assert_eq!(stuck.tx_npkts, 8);
    assert_eq!(stuck.completions, 0);
    assert!(!running.is_finished());

    driver.resume();
    let (_engine, result) = running.join().unwrap();
    let summary = result.unwrap();
    assert_eq!(summary.cycles, 6);
    assert_eq!(summary.packets, 24);
    assert!(summary.drained);

    let captured = driver.take_captured();
    assert_eq!(captured.len(), 24);
    for (i, record) in captured.iter().enumerate() {
        assert!(checksums_valid(&layout, &record.data));
        assert_eq!(marker(&layout, &record.data).0 as usize, i / 4);
    }
}

#[test]
fn test_pacing_converges_to_period() {
    let period = Duration::from_millis(2);
    for batch_size in [1, 32] {
        let config = GeneratorConfig {
            batch_size,
            cycles: 60,
            cycle_period_us: period.as_micros() as u64,
            ..small_config()
        };
        let Some(mut h) = loopback(config, false) else {
            return;
        };
        let collector = h.engine.stats_collector();
        h.engine.run().unwrap();

        let timing = collector.snapshot().timing;
        assert_eq!(timing.intervals, 59);
        let mean = timing.mean.unwrap();
        let tolerance = timing_tolerance(0.25);
        assert!(
            mean >= period.mul_f64(1.0 - tolerance) && mean <= period.mul_f64(1.0 + tolerance),
            "mean interval {mean:?} for batch {batch_size}"
        );
    }
}

#[test]
fn test_duration_bound_stops_run() {
    let config = GeneratorConfig {
        cycles: 0,
        duration_secs: Some(1),
        cycle_period_us: 10_000,
        ..small_config()
    };
    let Some(mut h) = loopback(config, false) else {
        return;
    };
    let summary = h.engine.run().unwrap();
    assert!(!summary.cancelled);
    assert!(summary.cycles >= 50 && summary.cycles <= 101, "{} cycles", summary.cycles);
    assert!(summary.elapsed < scaled_timeout(Duration::from_secs(2)));
}

#[test]
fn test_timestamp_trailer() {
    let config = GeneratorConfig {
        timestamp: true,
        vlan: Some(VlanTag { id: 10, priority: 6 }),
        batch_size: 4,
        cycles: 3,
        ..small_config()
    };
    let Some(mut h) = loopback(config, true) else {
        return;
    };
    h.engine.run().unwrap();
    let layout = *h.engine.scheduler().template().layout();
    let trailer = layout.trailer_offset.unwrap();

    let captured = h.driver.take_captured();
    assert_eq!(captured.len(), 12);
    for (seq, record) in captured.iter().enumerate() {
        let field = |at: usize| u32::from_be_bytes(record.data[at..at + 4].try_into().unwrap());
        assert_eq!(field(trailer), PKTGEN_MAGIC);
        assert_eq!(field(trailer + 4), seq as u32);
        assert!(field(trailer + 8) > 0);
        assert!(field(trailer + 12) < 1_000_000);
        assert!(checksums_valid(&layout, &record.data));
    }
}

#[test]
fn test_shared_completions_credit_each_socket() {
    let config = GeneratorConfig {
        sockets: 3,
        batch_size: 5,
        cycles: 4,
        ..small_config()
    };
    let Some(mut h) = loopback(config, true) else {
        return;
    };
    let summary = h.engine.run().unwrap();
    assert_eq!(summary.packets, 60);

    let report = h.engine.stats_collector().sample();
    assert_eq!(report.sockets.len(), 3);
    for (queue, socket) in report.sockets.iter().enumerate() {
        assert_eq!(socket.queue_id, queue as u32);
        assert_eq!(socket.totals.completions, 20);
        assert_eq!(h.driver.transmitted(queue as u32), 20);
    }
}

#[test]
fn test_fatal_wakeup_error_aborts() {
    let Some(mut h) = loopback(small_config(), false) else {
        return;
    };
    h.driver.inject_wake_error(libc::EBADF);
    let err = h.engine.run().unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Wakeup { .. })));
}

#[test]
fn test_transient_wakeup_error_ignored() {
    let Some(mut h) = loopback(small_config(), false) else {
        return;
    };
    h.driver.inject_wake_error(libc::ENOBUFS);
    let summary = h.engine.run().unwrap();
    assert_eq!(summary.cycles, 2);
    assert!(h.driver.wakeups() >= 2);
}

#[test]
fn test_always_kick_without_need_wakeup() {
    let config = GeneratorConfig {
        need_wakeup: false,
        cycles: 5,
        ..small_config()
    };
    let Some(mut h) = loopback(config, false) else {
        return;
    };
    let summary = h.engine.run().unwrap();
    assert_eq!(summary.packets, 20);
    let report = h.engine.stats_collector().sample();
    assert!(report.sockets[0].totals.tx_wakeup_sendtos >= 5);
    assert_eq!(report.sockets[0].totals.copy_tx_sendtos, 0);
}

#[test]
fn test_invalid_config_rejected_before_setup() {
    let config = GeneratorConfig {
        batch_size: 100,
        sockets: 2,
        num_frames: 256,
        ..small_config()
    };
    let result = Engine::loopback(config, CancellationToken::new(), false);
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::PoolTooSmall { needed: 400, .. }))
            | Err(Error::Config(ConfigError::BatchExceedsRing { .. }))
    ));
}
