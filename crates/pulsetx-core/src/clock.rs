//! Clock reads for trailer timestamps.

use crate::config::TimestampClock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn clock_id(clock: TimestampClock) -> libc::clockid_t {
    match clock {
        TimestampClock::Realtime => libc::CLOCK_REALTIME,
        TimestampClock::Tai => libc::CLOCK_TAI,
        TimestampClock::Boottime => libc::CLOCK_BOOTTIME,
        TimestampClock::Monotonic => libc::CLOCK_MONOTONIC,
    }
}

/// Current time on `clock`.
///
/// Falls back to the system wall clock if the clock cannot be read.
pub fn now(clock: TimestampClock) -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec.
    let ret = unsafe { libc::clock_gettime(clock_id(clock), &mut ts) };
    if ret != 0 {
        return SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Split a timestamp into the pktgen trailer's (tv_sec, tv_usec) pair
pub fn sec_usec(t: Duration) -> (u32, u32) {
    (t.as_secs() as u32, t.subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clocks_readable() {
        for clock in [
            TimestampClock::Realtime,
            TimestampClock::Tai,
            TimestampClock::Boottime,
            TimestampClock::Monotonic,
        ] {
            assert!(now(clock) > Duration::ZERO);
        }
    }

    #[test]
    fn test_monotonic_advances() {
        let a = now(TimestampClock::Monotonic);
        std::thread::sleep(Duration::from_millis(2));
        assert!(now(TimestampClock::Monotonic) > a);
    }

    #[test]
    fn test_sec_usec() {
        assert_eq!(sec_usec(Duration::new(12, 345_678_901)), (12, 345_678));
    }
}
