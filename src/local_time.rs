// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Device-epoch timestamps and conversion to and from the NTP timestamp format.
//!
//! The engine represents local time as a floating-point count of seconds since the
//! device epoch, 2000-01-01 00:00:00 UTC. The NTP prime epoch is 1900-01-01, a fixed
//! number of seconds earlier; conversions add or subtract that constant and otherwise
//! stay in `f64` so the full 32-bit seconds range never overflows an intermediate.

use chrono::{DateTime, Utc};
use std::time;

use crate::protocol::TimestampFormat;

/// Seconds from the NTP prime epoch (1900-01-01) to the device epoch (2000-01-01):
/// 100 years of 365 days, plus the 24 leap days in that span (1904 through 1996;
/// 1900 was not a leap year).
pub const EPOCH_DELTA: i64 = 86_400 * (100 * 365 + 24);

/// Seconds from the Unix epoch (1970-01-01) to the device epoch (2000-01-01):
/// 30 years of 365 days plus the 7 leap days in between.
const UNIX_TO_DEVICE_EPOCH: i64 = 86_400 * (30 * 365 + 7);

/// An instant on the local clock: seconds since the device epoch, fractional part
/// included. Copy value, owned by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Timestamp(pub f64);

impl Timestamp {
    /// Read the current time from the system wall clock.
    pub fn now() -> Self {
        match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
            Ok(since_unix) => Timestamp(since_unix.as_secs_f64() - UNIX_TO_DEVICE_EPOCH as f64),
            // A wall clock set before 1970 still yields a usable (negative) reading.
            Err(err) => Timestamp(-err.duration().as_secs_f64() - UNIX_TO_DEVICE_EPOCH as f64),
        }
    }

    /// Seconds since the Unix epoch, for interop with `chrono` and the OS clock.
    pub fn unix_seconds(self) -> f64 {
        self.0 + UNIX_TO_DEVICE_EPOCH as f64
    }
}

/// Convert a local timestamp to the NTP timestamp format.
pub fn to_ntp(t: Timestamp) -> TimestampFormat {
    TimestampFormat::from_seconds(t.0 + EPOCH_DELTA as f64)
}

/// Convert an NTP timestamp to a local timestamp.
///
/// The inverse of [`to_ntp`] within a single NTP era; cross-era ambiguity is resolved
/// by the offset computation, not here.
pub fn to_local(ts: TimestampFormat) -> Timestamp {
    Timestamp(ts.to_seconds() - EPOCH_DELTA as f64)
}

/// Render the local clock as a human-readable UTC date and time.
pub fn local_clock_to_string(t: Timestamp) -> String {
    let unix = t.unix_seconds();
    let secs = unix.floor() as i64;
    let nanos = ((unix - unix.floor()) * 1e9) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => format!("{:.3}s since device epoch", t.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_delta_is_derived_not_guessed() {
        // 36,524 days between 1900-01-01 and 2000-01-01.
        assert_eq!(EPOCH_DELTA, 3_155_673_600);
        assert_eq!(EPOCH_DELTA % 86_400, 0);
    }

    #[test]
    fn ntp_conversion_roundtrip_within_epsilon() {
        // A spread of values across the representable range, device-epoch seconds.
        for &secs in &[0.0, 1.5, 777_807_000.25, 1_000_000_000.125] {
            let t = Timestamp(secs);
            let back = to_local(to_ntp(t));
            assert!(
                (back.0 - t.0).abs() < 1e-6,
                "roundtrip drifted: {} -> {}",
                t.0,
                back.0
            );
        }
    }

    #[test]
    fn device_epoch_maps_to_ntp_delta() {
        let ts = to_ntp(Timestamp(0.0));
        assert_eq!(ts.seconds as i64, EPOCH_DELTA);
        assert_eq!(ts.fraction, 0);
    }

    #[test]
    fn now_is_after_device_epoch() {
        // Sanity: the host clock reads later than 2000-01-01.
        assert!(Timestamp::now().0 > 0.0);
    }

    #[test]
    fn clock_string_formats_utc() {
        // 2024-01-01 00:00:00 UTC is unix 1_704_067_200.
        let t = Timestamp(1_704_067_200.0 - UNIX_TO_DEVICE_EPOCH as f64);
        assert_eq!(local_clock_to_string(t), "2024-01-01 00:00:00.000");
    }
}
