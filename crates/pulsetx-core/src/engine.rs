//! Top-level owner of the frame pool, the sockets and the scheduler.

use crate::cancel::CancellationToken;
use crate::config::GeneratorConfig;
use crate::error::{ConfigError, Result};
use crate::scheduler::CycleScheduler;
use crate::stats::StatsCollector;
use pulsetx_transport::{
    ConsumerRing, IrqCounter, Loopback, LoopbackHandle, LoopbackOptions, LoopbackQueue, TxQueue,
    Umem, UmemConfig, UmemRegion, XskSocket,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of [`Engine::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles completed
    pub cycles: u64,
    /// Packets submitted across all sockets
    pub packets: u64,
    /// Descriptors submitted across all sockets
    pub descriptors: u64,
    /// Wall-clock time of the transmit loop and drain
    pub elapsed: Duration,
    /// Whether every descriptor came back before teardown
    pub drained: bool,
    /// Whether the run ended on cancellation
    pub cancelled: bool,
}

/// A configured generator, ready to run.
///
/// Field order matters: the scheduler (and with it every socket) drops before
/// the frame pool is unmapped.
pub struct Engine<Q: TxQueue> {
    scheduler: CycleScheduler<Q>,
    umem: Umem,
    config: Arc<GeneratorConfig>,
    token: CancellationToken,
}

impl Engine<XskSocket> {
    /// Open `config.sockets` AF_XDP sockets on `config.interface` and stamp
    /// the frame pool.
    pub fn open(config: GeneratorConfig, token: CancellationToken) -> Result<Self> {
        config.validate()?;
        if config.interface.is_empty() {
            return Err(ConfigError::MissingInterface.into());
        }

        let umem = config.umem_config().create()?;
        let socket_config = config.socket_config();
        let (owner, completion) = XskSocket::new_owner(&config.interface, &umem, &socket_config)?;

        let mut sockets = Vec::with_capacity(config.sockets as usize);
        for _ in 1..config.sockets {
            sockets.push(XskSocket::new_shared(&owner, &socket_config)?);
        }
        sockets.insert(0, owner);
        if sockets.iter().any(TxQueue::is_copy_mode) {
            warn!(interface = %config.interface, "running in copy mode");
        }

        Self::assemble(Arc::new(config), umem, sockets, completion, token)
    }
}

impl Engine<LoopbackQueue> {
    /// Build the generator over the in-process loopback driver.
    ///
    /// Needs no privileges or interface. With `capture` set the driver keeps a
    /// copy of every transmitted descriptor and its bytes.
    pub fn loopback(
        config: GeneratorConfig,
        token: CancellationToken,
        capture: bool,
    ) -> Result<(Self, LoopbackHandle)> {
        config.validate()?;
        let umem = UmemConfig {
            lock_pages: false,
            ..config.umem_config()
        }
        .create()?;
        let loopback = Loopback::new(
            &umem,
            LoopbackOptions {
                queues: config.sockets,
                tx_ring_size: config.tx_ring_size,
                need_wakeup: config.need_wakeup,
                aligned: !config.unaligned_chunks,
                capture,
            },
        )?;
        let Loopback {
            handle,
            queues,
            completion,
        } = loopback;

        let engine = Self::assemble(Arc::new(config), umem, queues, completion, token)?;
        Ok((engine, handle))
    }
}

impl<Q: TxQueue> Engine<Q> {
    fn assemble(
        config: Arc<GeneratorConfig>,
        mut umem: Umem,
        queues: Vec<Q>,
        completion: ConsumerRing<u64>,
        token: CancellationToken,
    ) -> Result<Self> {
        let scheduler =
            CycleScheduler::new(Arc::clone(&config), queues, completion, token.clone())?;
        let slots = scheduler.template().stamp_all(&mut umem);
        let layout = scheduler.template().layout();
        info!(
            slots,
            packet_len = layout.len,
            frames_per_packet = layout.frames_per_packet,
            pool_bytes = umem.size(),
            "frame pool stamped"
        );
        Ok(Self {
            scheduler,
            umem,
            config,
            token,
        })
    }

    /// The configuration the engine was built from
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// The scheduler, for inspection
    pub fn scheduler(&self) -> &CycleScheduler<Q> {
        &self.scheduler
    }

    /// Read-only view of the frame pool, usable from other threads
    pub fn umem_region(&self) -> UmemRegion {
        self.umem.region()
    }

    /// A collector over this engine's counters, to be sampled from any thread
    pub fn stats_collector(&self) -> StatsCollector {
        let irq = self.config.irq_name.as_deref().map(IrqCounter::new);
        StatsCollector::new(self.scheduler.probes(), self.scheduler.timing(), irq)
    }

    /// Run to completion, then drain outstanding descriptors.
    ///
    /// The drain runs even when the loop fails; its result is logged and the
    /// loop's error is returned.
    pub fn run(&mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let result = self.scheduler.run(&mut self.umem);
        let drained = self
            .scheduler
            .drain(self.config.drain_retries, self.config.drain_interval());
        let cycles = result?;

        let (packets, descriptors) = self
            .scheduler
            .probes()
            .iter()
            .map(|probe| probe.counters.snapshot())
            .fold((0, 0), |(p, d), snap| (p + snap.tx_npkts, d + snap.tx_frags));

        let summary = RunSummary {
            cycles,
            packets,
            descriptors,
            elapsed: started.elapsed(),
            drained,
            cancelled: self.token.is_cancelled(),
        };
        info!(
            cycles,
            packets,
            drained,
            cancelled = summary.cancelled,
            "run complete"
        );
        Ok(summary)
    }
}
