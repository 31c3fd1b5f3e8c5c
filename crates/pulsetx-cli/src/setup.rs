//! Process setup: locked-memory limit and scheduling policy.

use clap::ValueEnum;
use std::io;
use tracing::{debug, info};

/// Scheduling policy for the transmit thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SchedPolicy {
    /// `SCHED_OTHER`, the default time-sharing policy
    #[default]
    Other,
    /// `SCHED_FIFO` real-time policy
    Fifo,
}

/// Lift `RLIMIT_MEMLOCK` so the frame pool can be pinned.
///
/// # Errors
///
/// Returns the OS error if the limit cannot be raised (typically missing
/// `CAP_IPC_LOCK`).
pub fn raise_memlock_limit() -> io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    // SAFETY: rlim is a valid rlimit for the duration of the call.
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) } != 0 {
        return Err(io::Error::last_os_error());
    }
    debug!("RLIMIT_MEMLOCK raised to unlimited");
    Ok(())
}

/// Clamp `priority` into the range the kernel accepts for `policy`
pub fn clamp_priority(policy: SchedPolicy, priority: i32) -> i32 {
    match policy {
        SchedPolicy::Other => 0,
        SchedPolicy::Fifo => priority.clamp(1, 99),
    }
}

/// Apply `policy` with `priority` to the calling thread.
///
/// # Errors
///
/// Returns the OS error if the policy cannot be set (`SCHED_FIFO` needs
/// `CAP_SYS_NICE`).
pub fn apply_sched_policy(policy: SchedPolicy, priority: i32) -> io::Result<()> {
    let native = match policy {
        SchedPolicy::Other => libc::SCHED_OTHER,
        SchedPolicy::Fifo => libc::SCHED_FIFO,
    };
    let param = libc::sched_param {
        sched_priority: clamp_priority(policy, priority),
    };
    // SAFETY: pid 0 targets the calling thread; param outlives the call.
    if unsafe { libc::sched_setscheduler(0, native, &param) } != 0 {
        return Err(io::Error::last_os_error());
    }
    info!(?policy, priority = param.sched_priority, "scheduling policy applied");
    Ok(())
}
