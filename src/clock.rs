// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The clock-source boundary: reading the local clock and committing corrections.
//!
//! The engine never touches the OS clock directly; it goes through [`ClockSource`],
//! which keeps the decision logic testable against a fake clock. [`SystemClock`] is
//! the production implementation: reads come from the system wall clock, and
//! corrections step `CLOCK_REALTIME` forward or back by the requested delta.
//!
//! # Privileges
//!
//! Stepping the system clock requires elevated privileges (root on Unix); without
//! them the step call reports [`ClockError::PermissionDenied`].

#![allow(unsafe_code)]

use log::warn;
use std::fmt;

use crate::local_time::Timestamp;

/// A readable local clock that can also apply a correction.
pub trait ClockSource: Send + Sync {
    /// The current local time.
    fn now(&self) -> Timestamp;

    /// Atomically advance (or retard) the system clock by `delta_seconds`.
    ///
    /// Returns whether the OS accepted the change. The call is treated as
    /// non-retryable: a rejection fails the run.
    fn apply_correction(&self, delta_seconds: f64) -> bool;
}

/// Error type for clock adjustment operations.
#[derive(Debug)]
pub enum ClockError {
    /// The operation requires elevated privileges (root/admin).
    PermissionDenied,
    /// Platform-specific error with an OS error code.
    OsError(i32),
    /// Clock adjustment is not supported on this platform.
    Unsupported,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::PermissionDenied => write!(f, "permission denied (requires root/admin)"),
            ClockError::OsError(code) => write!(f, "OS error: {}", code),
            ClockError::Unsupported => write!(f, "clock adjustment not supported on this platform"),
        }
    }
}

impl std::error::Error for ClockError {}

/// The production clock: system wall clock reads, `CLOCK_REALTIME` stepping.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn apply_correction(&self, delta_seconds: f64) -> bool {
        match platform::step_by(delta_seconds) {
            Ok(()) => true,
            Err(e) => {
                warn!("clock step by {:+.6}s rejected: {}", delta_seconds, e);
                false
            }
        }
    }
}

/// Convert an OS errno to a [`ClockError`].
#[cfg(unix)]
fn os_error_from_errno() -> ClockError {
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
    if errno == libc::EPERM {
        ClockError::PermissionDenied
    } else {
        ClockError::OsError(errno)
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;

    /// Step `CLOCK_REALTIME` by the given signed number of seconds.
    pub(super) fn step_by(delta_seconds: f64) -> Result<(), ClockError> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: timespec is plain-old-data and the pointer is valid for the call.
        let ret = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
        if ret != 0 {
            return Err(os_error_from_errno());
        }

        let delta_whole = delta_seconds.floor();
        let mut tv_sec = now.tv_sec + delta_whole as libc::time_t;
        let mut tv_nsec = now.tv_nsec + ((delta_seconds - delta_whole) * 1e9) as libc::c_long;
        if tv_nsec >= 1_000_000_000 {
            tv_sec += 1;
            tv_nsec -= 1_000_000_000;
        }
        let stepped = libc::timespec { tv_sec, tv_nsec };

        // SAFETY: as above; requires CAP_SYS_TIME, failure is reported via errno.
        let ret = unsafe { libc::clock_settime(libc::CLOCK_REALTIME, &stepped) };
        if ret != 0 {
            return Err(os_error_from_errno());
        }
        Ok(())
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    use super::*;

    /// Step the wall clock by the given signed number of seconds via `adjtime(2)`.
    pub(super) fn step_by(delta_seconds: f64) -> Result<(), ClockError> {
        let delta_whole = delta_seconds.floor();
        let delta = libc::timeval {
            tv_sec: delta_whole as libc::time_t,
            tv_usec: ((delta_seconds - delta_whole) * 1e6) as libc::suseconds_t,
        };
        // SAFETY: timeval is plain-old-data; a null olddelta is allowed.
        let ret = unsafe { libc::adjtime(&delta, std::ptr::null_mut()) };
        if ret != 0 {
            return Err(os_error_from_errno());
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use super::*;

    pub(super) fn step_by(_delta_seconds: f64) -> Result<(), ClockError> {
        Err(ClockError::Unsupported)
    }
}
