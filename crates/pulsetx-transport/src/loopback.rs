//! In-process stand-in for the kernel side of AF_XDP transmit.
//!
//! The driver consumes TX rings and produces into a shared completion ring
//! using the same heap-backed rings and cursor protocol as a real socket, so
//! the transmit path can be exercised without privileges or a NIC. It runs
//! when a queue is woken (or when [`LoopbackHandle::service`] is called) and
//! can be stalled to emulate a link that stops completing.

use crate::error::{TransportError, is_transient_send_error};
use crate::queue::{DriverStats, DriverStatsSource, TxQueue};
use crate::ring::{self, ConsumerRing, ProducerRing, XdpDesc};
use crate::umem::{Umem, UmemRegion};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Loopback driver options
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Number of queues (one per socket)
    pub queues: u32,

    /// TX ring entries per queue
    pub tx_ring_size: u32,

    /// Raise the need-wakeup flag whenever the driver goes idle
    pub need_wakeup: bool,

    /// Descriptors must start on a frame boundary
    pub aligned: bool,

    /// Keep a copy of every transmitted descriptor and its bytes
    pub capture: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            queues: 1,
            tx_ring_size: 2048,
            need_wakeup: true,
            aligned: true,
            capture: false,
        }
    }
}

/// One descriptor as seen on the wire side of the loopback driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    /// Index of the queue that sent it
    pub queue: u32,
    /// The descriptor as submitted
    pub desc: XdpDesc,
    /// Frame bytes at service time
    pub data: Vec<u8>,
}

struct KernelQueue {
    tx: ConsumerRing<XdpDesc>,
    stats: DriverStats,
    transmitted: u64,
}

/// The emulated driver. Shared between queues behind a [`LoopbackHandle`].
pub struct LoopbackDriver {
    queues: Vec<KernelQueue>,
    completion: ProducerRing<u64>,
    region: UmemRegion,
    frame_size: u64,
    options: LoopbackOptions,
    stalled: bool,
    wake_error: Option<i32>,
    wakeups: u64,
    captured: Vec<TxRecord>,
}

impl LoopbackDriver {
    /// Drain every TX ring into the completion ring. Returns descriptors consumed.
    fn service(&mut self) -> u32 {
        if self.stalled {
            // Stay asleep so the producer keeps kicking until resumed
            if self.options.need_wakeup {
                for queue in &self.queues {
                    queue.tx.set_need_wakeup(true);
                }
            }
            return 0;
        }

        let mut consumed = 0;
        for (index, queue) in self.queues.iter_mut().enumerate() {
            let room = self.completion.free(queue.tx.capacity());
            if room == 0 {
                continue;
            }
            let Some((start, n)) = queue.tx.peek(room) else {
                queue.stats.tx_ring_empty += 1;
                if self.options.need_wakeup {
                    queue.tx.set_need_wakeup(true);
                }
                continue;
            };

            let mut done = Vec::with_capacity(n as usize);
            for i in 0..n {
                let desc = queue.tx.read(start.wrapping_add(i));
                let valid = desc.len > 0
                    && (!self.options.aligned || desc.addr % self.frame_size == 0)
                    && desc.addr.saturating_add(u64::from(desc.len)) <= self.region.size() as u64;
                if !valid {
                    queue.stats.tx_invalid += 1;
                    continue;
                }
                if self.options.capture {
                    if let Some(data) = self.region.copy_out(desc.addr, desc.len) {
                        self.captured.push(TxRecord {
                            queue: index as u32,
                            desc,
                            data,
                        });
                    }
                }
                done.push(desc.addr);
            }
            queue.tx.release(n);
            queue.transmitted += done.len() as u64;
            consumed += n;

            // `room` was sized from the completion ring's free space, so this fits
            let count = done.len() as u32;
            if let Some(idx) = self.completion.reserve(count) {
                for (i, addr) in done.into_iter().enumerate() {
                    self.completion.write(idx.wrapping_add(i as u32), addr);
                }
                self.completion.submit(count);
            }

            if self.options.need_wakeup {
                queue.tx.set_need_wakeup(true);
            }
        }
        consumed
    }
}

/// Shared handle on a [`LoopbackDriver`]
#[derive(Clone)]
pub struct LoopbackHandle(Arc<Mutex<LoopbackDriver>>);

impl LoopbackHandle {
    fn lock(&self) -> MutexGuard<'_, LoopbackDriver> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the driver once, as a wakeup would
    pub fn service(&self) -> u32 {
        self.lock().service()
    }

    /// Stop consuming TX descriptors and producing completions
    pub fn stall(&self) {
        debug!("loopback driver stalled");
        self.lock().stalled = true;
    }

    /// Resume after [`stall`](Self::stall)
    pub fn resume(&self) {
        debug!("loopback driver resumed");
        self.lock().stalled = false;
    }

    /// Whether the driver is currently stalled
    pub fn is_stalled(&self) -> bool {
        self.lock().stalled
    }

    /// Make the next wakeup send fail with `errno`
    pub fn inject_wake_error(&self, errno: i32) {
        self.lock().wake_error = Some(errno);
    }

    /// Number of wakeups received across all queues
    pub fn wakeups(&self) -> u64 {
        self.lock().wakeups
    }

    /// Descriptors transmitted (consumed and completed) by `queue`
    pub fn transmitted(&self, queue: u32) -> u64 {
        self.lock()
            .queues
            .get(queue as usize)
            .map_or(0, |q| q.transmitted)
    }

    /// Take the captured records collected so far
    pub fn take_captured(&self) -> Vec<TxRecord> {
        std::mem::take(&mut self.lock().captured)
    }

    /// Driver counters for `queue`
    pub fn driver_stats(&self, queue: u32) -> Option<DriverStats> {
        self.lock().queues.get(queue as usize).map(|q| q.stats)
    }
}

/// Everything [`Loopback::new`] builds
pub struct Loopback {
    /// Driver handle for control and inspection
    pub handle: LoopbackHandle,
    /// Process-side TX queues, one per socket
    pub queues: Vec<LoopbackQueue>,
    /// Process-side completion ring shared by all queues
    pub completion: ConsumerRing<u64>,
}

impl Loopback {
    /// Build a loopback driver over `umem` with `options.queues` TX queues.
    pub fn new(umem: &Umem, options: LoopbackOptions) -> Result<Self, TransportError> {
        if options.queues == 0 {
            return Err(TransportError::InvalidConfig(
                "loopback needs at least one queue".into(),
            ));
        }
        let (completion_prod, completion) = ring::pair::<u64>(umem.config().comp_ring_size)?;

        let mut kernel_queues = Vec::with_capacity(options.queues as usize);
        let mut tx_producers = Vec::with_capacity(options.queues as usize);
        for _ in 0..options.queues {
            let (prod, cons) = ring::pair::<XdpDesc>(options.tx_ring_size)?;
            if options.need_wakeup {
                cons.set_need_wakeup(true);
            }
            kernel_queues.push(KernelQueue {
                tx: cons,
                stats: DriverStats::default(),
                transmitted: 0,
            });
            tx_producers.push(prod);
        }

        let handle = LoopbackHandle(Arc::new(Mutex::new(LoopbackDriver {
            queues: kernel_queues,
            completion: completion_prod,
            region: umem.region(),
            frame_size: u64::from(umem.frame_size()),
            options,
            stalled: false,
            wake_error: None,
            wakeups: 0,
            captured: Vec::new(),
        })));

        let queues = tx_producers
            .into_iter()
            .enumerate()
            .map(|(i, tx)| LoopbackQueue {
                queue_id: i as u32,
                tx,
                driver: handle.clone(),
            })
            .collect();

        Ok(Self {
            handle,
            queues,
            completion,
        })
    }
}

/// Process side of one loopback TX queue
pub struct LoopbackQueue {
    queue_id: u32,
    tx: ProducerRing<XdpDesc>,
    driver: LoopbackHandle,
}

impl TxQueue for LoopbackQueue {
    fn queue_id(&self) -> u32 {
        self.queue_id
    }

    fn tx_ring(&mut self) -> &mut ProducerRing<XdpDesc> {
        &mut self.tx
    }

    fn wake(&mut self) -> Result<(), TransportError> {
        let mut driver = self.driver.lock();
        driver.wakeups += 1;
        if let Some(errno) = driver.wake_error.take() {
            let err = io::Error::from_raw_os_error(errno);
            if !is_transient_send_error(&err) {
                return Err(TransportError::Wakeup {
                    queue_id: self.queue_id,
                    source: err,
                });
            }
        }
        if let Some(queue) = driver.queues.get(self.queue_id as usize) {
            queue.tx.set_need_wakeup(false);
        }
        driver.service();
        Ok(())
    }

    fn is_copy_mode(&self) -> bool {
        false
    }

    fn stats_source(&self) -> Option<Arc<dyn DriverStatsSource>> {
        Some(Arc::new(LoopbackStatsProbe {
            handle: self.driver.clone(),
            queue: self.queue_id,
        }))
    }
}

struct LoopbackStatsProbe {
    handle: LoopbackHandle,
    queue: u32,
}

impl DriverStatsSource for LoopbackStatsProbe {
    fn driver_stats(&self) -> Option<DriverStats> {
        self.handle.driver_stats(self.queue)
    }
}
