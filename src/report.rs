// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The reporting boundary: human-readable progress and error messages.
//!
//! The engine emits one report per per-address outcome and one for the final
//! decision; it keeps no history and does no formatting beyond composing the
//! message text. Sinks decide where messages go — [`LogSink`] routes them to the
//! `log` facade, a host application may mirror them to an on-screen banner.

use log::{error, info};
use std::fmt;

/// Severity of a report message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportLevel {
    /// Progress and outcome information.
    Info,
    /// A failure worth surfacing to the user.
    Error,
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportLevel::Info => write!(f, "info"),
            ReportLevel::Error => write!(f, "error"),
        }
    }
}

/// Receives human-readable progress and error messages from the engine.
pub trait ReportSink: Send + Sync {
    /// Deliver one message at the given severity.
    fn report(&self, level: ReportLevel, message: &str);
}

/// The default sink: forwards everything to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, level: ReportLevel, message: &str) {
        match level {
            ReportLevel::Info => info!("{}", message),
            ReportLevel::Error => error!("{}", message),
        }
    }
}

/// Render a signed duration in seconds at a human scale.
///
/// Picks the unit so the magnitude reads naturally: milliseconds below two seconds,
/// then seconds, minutes, hours, and days, each band starting at twice the unit.
pub fn seconds_to_human(s: f64) -> String {
    let magnitude = s.abs();
    if magnitude < 2.0 {
        format!("{:.1} ms", 1000.0 * s)
    } else if magnitude < 2.0 * 60.0 {
        format!("{:.1} s", s)
    } else if magnitude < 2.0 * 60.0 * 60.0 {
        format!("{:.1} min", s / 60.0)
    } else if magnitude < 2.0 * 24.0 * 60.0 * 60.0 {
        format!("{:.1} hrs", s / (60.0 * 60.0))
    } else {
        format!("{:.1} days", s / (24.0 * 60.0 * 60.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_durations_pick_the_right_unit() {
        assert_eq!(seconds_to_human(0.0123), "12.3 ms");
        assert_eq!(seconds_to_human(-0.5), "-500.0 ms");
        assert_eq!(seconds_to_human(3.0), "3.0 s");
        assert_eq!(seconds_to_human(150.0), "2.5 min");
        assert_eq!(seconds_to_human(-7200.0), "-2.0 hrs");
        assert_eq!(seconds_to_human(200_000.0), "2.3 days");
    }

    #[test]
    fn band_edges_are_twice_the_unit() {
        // 1.999s still renders as ms, 2.0s flips to seconds.
        assert_eq!(seconds_to_human(1.999), "1999.0 ms");
        assert_eq!(seconds_to_human(2.0), "2.0 s");
    }
}
