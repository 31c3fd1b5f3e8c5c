//! Cyclic double-buffered batch transmission.
//!
//! Each socket owns `2 * batch` packet slots of the shared frame pool. Even
//! cycles transmit the even slots and odd cycles the odd ones, so a slot is
//! rewritten only every second cycle. Before a parity is reused the scheduler
//! waits until the kernel has completed its previous transmission.
//!
//! The loop is single-threaded and lock-free: the only shared state is the
//! ring cursors, the stop token and the relaxed statistics counters.

use crate::cancel::CancellationToken;
use crate::clock;
use crate::config::GeneratorConfig;
use crate::error::{ConfigError, Result};
use crate::packet::{PacketTemplate, Stamp};
use crate::stats::{CycleTiming, SocketCounters, SocketProbe};
use pulsetx_transport::{ConsumerRing, TransportError, TxQueue, Umem};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pause between attempts while waiting on the kernel
const RETRY_BACKOFF: Duration = Duration::from_micros(50);

/// Longest uninterrupted sleep while pacing
const SLEEP_SLICE: Duration = Duration::from_millis(1);

/// Frame indices transmitted by one socket, per parity.
///
/// Packet slot `j` of parity `p` for socket `s` is slot
/// `s * 2B + 2j + p`; its first frame is that slot times the frames each
/// packet spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleTable {
    frames: [Vec<u32>; 2],
}

impl CycleTable {
    /// Table for socket `socket` with `batch` packets of `frames_per_packet` frames
    pub fn new(socket: u32, batch: u32, frames_per_packet: u32) -> Self {
        let slot_base = socket * 2 * batch;
        let frames = [0, 1].map(|parity| {
            (0..batch)
                .map(|j| (slot_base + 2 * j + parity) * frames_per_packet)
                .collect()
        });
        Self { frames }
    }

    /// First frame of every packet sent on cycles of `parity`
    pub fn frames(&self, parity: usize) -> &[u32] {
        &self.frames[parity & 1]
    }
}

/// Maps a completed address back to the socket that owns its frame
#[derive(Debug, Clone, Copy)]
struct Geometry {
    frame_size: u64,
    frames_per_packet: u64,
    slots_per_socket: u64,
}

impl Geometry {
    fn socket_of(&self, addr: u64) -> Option<usize> {
        let slot = addr / self.frame_size / self.frames_per_packet;
        usize::try_from(slot / self.slots_per_socket).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Lane<Q> {
    queue: Q,
    table: CycleTable,
    capacity: u64,
    outstanding: u64,
    reaped: u64,
    counters: Arc<SocketCounters>,
}

/// The cyclic transmit loop over one or more sockets sharing a frame pool
pub struct CycleScheduler<Q> {
    config: Arc<GeneratorConfig>,
    template: PacketTemplate,
    lanes: Vec<Lane<Q>>,
    completion: ConsumerRing<u64>,
    geometry: Geometry,
    per_batch: u64,
    token: CancellationToken,
    timing: Arc<CycleTiming>,
    sequence: u32,
    stop_at: Option<Instant>,
}

impl<Q: TxQueue> CycleScheduler<Q> {
    /// Build a scheduler over `queues`, which all complete into `completion`.
    ///
    /// Socket `s` of `queues` transmits from packet slots `[s*2B, (s+1)*2B)`.
    pub fn new(
        config: Arc<GeneratorConfig>,
        queues: Vec<Q>,
        completion: ConsumerRing<u64>,
        token: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        if queues.is_empty() {
            return Err(ConfigError::NoSockets.into());
        }

        let fpp = config.frames_per_packet();
        let per_batch = config.descriptors_per_batch();
        let needed = queues.len() as u64 * 2 * per_batch;
        if needed > u64::from(config.num_frames) {
            return Err(ConfigError::PoolTooSmall {
                needed,
                available: config.num_frames,
            }
            .into());
        }

        let mut lanes = Vec::with_capacity(queues.len());
        for (socket, mut queue) in (0u32..).zip(queues) {
            let capacity = queue.tx_ring().capacity();
            if u64::from(capacity) < per_batch {
                return Err(ConfigError::BatchExceedsRing {
                    needed: u32::try_from(per_batch).unwrap_or(u32::MAX),
                    capacity,
                }
                .into());
            }
            lanes.push(Lane {
                queue,
                table: CycleTable::new(socket, config.batch_size, fpp),
                capacity: u64::from(capacity),
                outstanding: 0,
                reaped: 0,
                counters: Arc::new(SocketCounters::new()),
            });
        }

        Ok(Self {
            template: PacketTemplate::new(&config),
            geometry: Geometry {
                frame_size: u64::from(config.frame_size),
                frames_per_packet: u64::from(fpp),
                slots_per_socket: 2 * u64::from(config.batch_size),
            },
            per_batch,
            lanes,
            completion,
            token,
            timing: Arc::new(CycleTiming::new()),
            sequence: 0,
            stop_at: None,
            config,
        })
    }

    /// The packet every slot is stamped from
    pub fn template(&self) -> &PacketTemplate {
        &self.template
    }

    /// Number of sockets
    pub fn sockets(&self) -> usize {
        self.lanes.len()
    }

    /// Frame table of `socket`
    pub fn table(&self, socket: usize) -> Option<&CycleTable> {
        self.lanes.get(socket).map(|lane| &lane.table)
    }

    /// Descriptors of `socket` not yet returned on the completion ring
    pub fn outstanding(&self, socket: usize) -> Option<u64> {
        self.lanes.get(socket).map(|lane| lane.outstanding)
    }

    /// Descriptors not yet returned, across all sockets
    pub fn total_outstanding(&self) -> u64 {
        self.lanes.iter().map(|lane| lane.outstanding).sum()
    }

    /// Counter handles for a [`StatsCollector`](crate::stats::StatsCollector)
    pub fn probes(&self) -> Vec<SocketProbe> {
        self.lanes
            .iter()
            .map(|lane| SocketProbe {
                queue_id: lane.queue.queue_id(),
                counters: Arc::clone(&lane.counters),
                driver: lane.queue.stats_source(),
            })
            .collect()
    }

    /// Cycle timing shared with collectors
    pub fn timing(&self) -> Arc<CycleTiming> {
        Arc::clone(&self.timing)
    }

    /// Run cycles until the cycle count, the duration bound or cancellation
    /// ends the run. Returns the number of cycles completed.
    ///
    /// Descriptors already submitted are left to the kernel; call
    /// [`drain`](Self::drain) before tearing the pool down.
    pub fn run(&mut self, umem: &mut Umem) -> Result<u64> {
        let period = self.config.cycle_period();
        let limit = self.config.cycles;
        let start = Instant::now();
        self.stop_at = self.config.duration().map(|d| start + d);

        info!(
            sockets = self.lanes.len(),
            batch = self.config.batch_size,
            period_us = self.config.cycle_period_us,
            cycles = limit,
            "transmit loop started"
        );

        let mut deadline = start;
        let mut previous: Option<Instant> = None;
        let mut cycle = 0u64;
        while limit == 0 || cycle < limit {
            if self.should_stop() {
                break;
            }
            let began = Instant::now();
            if let Some(prev) = previous {
                self.timing.record_interval(began - prev);
            }
            previous = Some(began);

            if self.run_cycle(umem, cycle)? == Flow::Stop {
                break;
            }
            self.timing.record_cycle();
            cycle += 1;
            if cycle == limit {
                break;
            }

            deadline += period;
            let now = Instant::now();
            if now > deadline {
                let late = now - deadline;
                self.timing.record_overrun();
                warn!(cycle, late_us = late.as_micros() as u64, "cycle overran its period");
                // Drop the backlog instead of bursting to catch up
                if late > period {
                    deadline = now;
                }
            } else if self.sleep_until(deadline) == Flow::Stop {
                break;
            }
        }

        info!(
            cycles = cycle,
            cancelled = self.token.is_cancelled(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "transmit loop finished"
        );
        Ok(cycle)
    }

    fn run_cycle(&mut self, umem: &mut Umem, cycle: u64) -> Result<Flow> {
        let parity = (cycle % 2) as usize;
        for lane in 0..self.lanes.len() {
            if self.await_room(lane, cycle)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
            if self.refresh(umem, lane, parity, cycle)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
            if self.transmit(lane, parity)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        debug!(cycle, parity, outstanding = self.total_outstanding(), "cycle submitted");
        Ok(Flow::Continue)
    }

    /// Wait until the parity about to be rewritten is back from the kernel
    /// and a full batch fits under the TX ring capacity.
    fn await_room(&mut self, index: usize, cycle: u64) -> Result<Flow> {
        let per_batch = self.per_batch;
        let capacity = self.lanes[index].capacity;
        let limit = if cycle >= 2 {
            per_batch.min(capacity - per_batch)
        } else {
            capacity - per_batch
        };

        self.reap();
        let outstanding = self.lanes[index].outstanding;
        if outstanding <= limit {
            return Ok(Flow::Continue);
        }
        if cycle >= 2 && outstanding > per_batch {
            self.lanes[index].counters.record_late_completion();
            warn!(
                cycle,
                queue = self.lanes[index].queue.queue_id(),
                outstanding,
                "frames still in flight at reuse, waiting for completions"
            );
        }

        loop {
            self.kick(index)?;
            self.reap();
            if self.lanes[index].outstanding <= limit {
                return Ok(Flow::Continue);
            }
            if self.should_stop() {
                return Ok(Flow::Stop);
            }
            thread::sleep(RETRY_BACKOFF);
        }
    }

    /// Rewrite the stamp region of every packet of `parity`
    fn refresh(&mut self, umem: &mut Umem, index: usize, parity: usize, cycle: u64) -> Result<Flow> {
        let fpp = self.template.layout().frames_per_packet;
        for j in 0..self.config.batch_size as usize {
            if self.should_stop() {
                return Ok(Flow::Stop);
            }
            let first = self.lanes[index].table.frames(parity)[j];
            let stamp = if self.config.timestamp {
                let (sec, usec) = clock::sec_usec(clock::now(self.config.timestamp_clock));
                let seq = self.sequence;
                self.sequence = seq.wrapping_add(1);
                Stamp::Trailer { seq, sec, usec }
            } else {
                Stamp::Marker {
                    cycle: cycle as u32,
                    frame: first,
                }
            };
            let Some(packet) = umem.frames_mut(first, fpp) else {
                return Err(TransportError::Ring(format!("frame {first} lies outside the pool")).into());
            };
            self.template.refresh(packet, stamp);
        }
        Ok(Flow::Continue)
    }

    /// Reserve, fill and publish one batch, then kick the driver if asked.
    fn transmit(&mut self, index: usize, parity: usize) -> Result<Flow> {
        let count = self.per_batch as u32;
        let idx = loop {
            if let Some(idx) = self.lanes[index].queue.tx_ring().reserve(count) {
                break idx;
            }
            self.lanes[index].counters.record_tx_ring_full();
            self.kick(index)?;
            self.reap();
            if self.should_stop() {
                return Ok(Flow::Stop);
            }
            thread::sleep(RETRY_BACKOFF);
        };

        // No stop checks from here: a reserved batch is always submitted whole
        let layout = *self.template.layout();
        let lane = &mut self.lanes[index];
        let ring = lane.queue.tx_ring();
        let mut slot = idx;
        for &first in lane.table.frames(parity) {
            for desc in layout.descriptors(first) {
                ring.write(slot, desc);
                slot = slot.wrapping_add(1);
            }
        }
        ring.submit(count);

        lane.outstanding += self.per_batch;
        lane.counters
            .record_tx(u64::from(self.config.batch_size), self.per_batch);
        lane.counters.set_outstanding(lane.outstanding);

        self.kick(index)?;
        Ok(Flow::Continue)
    }

    /// Send a wakeup if the driver asked for one or the policy says always.
    fn kick(&mut self, index: usize) -> Result<()> {
        let always = self.config.kicks_every_cycle();
        let lane = &mut self.lanes[index];
        if !always && !lane.queue.tx_ring().needs_wakeup() {
            return Ok(());
        }
        lane.counters.record_wakeup(lane.queue.is_copy_mode());
        if let Err(err) = lane.queue.wake() {
            error!(queue = lane.queue.queue_id(), error = %err, "wakeup send failed");
            return Err(err.into());
        }
        Ok(())
    }

    /// Consume the completion ring and credit each entry to its socket
    fn reap(&mut self) -> u32 {
        let Self {
            completion,
            lanes,
            geometry,
            ..
        } = self;
        let capacity = completion.capacity();
        let Some((start, n)) = completion.peek(capacity) else {
            return 0;
        };
        for i in 0..n {
            let addr = completion.read(start.wrapping_add(i));
            match geometry.socket_of(addr).and_then(|s| lanes.get_mut(s)) {
                Some(lane) => {
                    lane.outstanding = lane.outstanding.saturating_sub(1);
                    lane.reaped += 1;
                }
                None => warn!(addr, "completion for a frame no socket owns"),
            }
        }
        completion.release(n);

        for lane in lanes.iter_mut().filter(|lane| lane.reaped > 0) {
            lane.counters.record_completions(lane.reaped);
            lane.counters.set_outstanding(lane.outstanding);
            lane.reaped = 0;
        }
        n
    }

    /// Collect outstanding completions, waiting `interval` between up to
    /// `retries` further attempts. Returns whether everything came back.
    pub fn drain(&mut self, retries: u32, interval: Duration) -> bool {
        for attempt in 0..=retries {
            for index in 0..self.lanes.len() {
                if let Err(err) = self.kick(index) {
                    warn!(error = %err, "wakeup failed while draining");
                }
            }
            self.reap();
            if self.total_outstanding() == 0 {
                debug!(attempt, "completions drained");
                return true;
            }
            if attempt < retries {
                thread::sleep(interval);
            }
        }
        warn!(
            outstanding = self.total_outstanding(),
            retries,
            "completion drain timed out, tearing down anyway"
        );
        false
    }

    fn should_stop(&self) -> bool {
        self.token.is_cancelled() || self.stop_at.is_some_and(|at| Instant::now() >= at)
    }

    fn sleep_until(&self, deadline: Instant) -> Flow {
        loop {
            if self.should_stop() {
                return Flow::Stop;
            }
            let now = Instant::now();
            if now >= deadline {
                return Flow::Continue;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
