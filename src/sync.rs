// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The synchronization run: resolution and query fan-out, correction aggregation,
//! and the tolerance-gated clock-adjustment decision.
//!
//! A run flows through two phases — resolve every configured name, then query every
//! unique address — each dispatched through the same bounded-parallelism helper.
//! Per-unit failures are reported and shrink the usable set; they never cancel
//! sibling units and never escape the orchestrator. The surviving corrections are
//! averaged (unweighted), gated against the configured tolerance, and committed
//! through the clock collaborator when warranted.
//!
//! At most one run is in flight at a time: entry goes through [`SingleFlight`], a
//! compare-and-swap guard whose RAII half releases on every exit path, including
//! cancellation.

use futures::stream::{self, StreamExt};
use log::debug;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

use crate::clock::{ClockSource, SystemClock};
use crate::config::SyncConfig;
use crate::error::{QueryError, SyncError};
use crate::local_time::local_clock_to_string;
use crate::query::{query_server, QuerySample};
use crate::report::{seconds_to_human, LogSink, ReportLevel, ReportSink};
use crate::resolve::{merge_addresses, resolve_name};

/// Guards against overlapping synchronization runs.
///
/// Acquisition is a compare-and-swap on a shared flag; it reports the outcome
/// instead of blocking. The returned [`FlightGuard`] clears the flag when dropped,
/// which covers success, failure, and cancellation alike.
#[derive(Clone, Debug, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    /// A fresh, idle guard.
    pub fn new() -> Self {
        SingleFlight::default()
    }

    /// The process-wide guard shared by every [`Synchronizer`] built through the
    /// default constructors.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<SingleFlight> = OnceLock::new();
        GLOBAL.get_or_init(SingleFlight::new).clone()
    }

    /// Try to mark a run as in flight. `None` means another run holds the flag.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| FlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Whether a run currently holds the flag.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag on drop.
#[must_use = "dropping the guard immediately ends the run's exclusivity"]
#[derive(Debug)]
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Run every item through `work`, keeping at most `limit` units in flight.
///
/// A limit of zero is the degenerate mode: each unit runs inline, sequentially, on
/// the calling task. Completion order is unspecified otherwise; all units are
/// awaited exhaustively either way, and one unit's outcome never affects another's.
async fn run_bounded<T, U, F, Fut>(items: Vec<T>, limit: usize, work: F) -> Vec<U>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = U>,
{
    if limit == 0 {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(work(item).await);
        }
        out
    } else {
        stream::iter(items)
            .map(work)
            .buffer_unordered(limit)
            .collect()
            .await
    }
}

/// What happened with one queried address.
#[derive(Debug)]
pub struct AddressOutcome {
    /// The address queried.
    pub addr: SocketAddr,
    /// The sample it produced, or why it could not.
    pub result: Result<QuerySample, QueryError>,
}

/// The aggregate recommendation for one run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    /// Whether the correction is large enough to warrant touching the clock.
    pub apply: bool,
    /// The recommended correction in seconds: the unweighted mean of every usable
    /// per-address correction.
    pub correction: f64,
}

/// Reduce per-address outcomes to a single recommendation.
///
/// The mean is deliberately unweighted; latency is reported but carries no weight.
/// Tolerance is non-strict: a correction of exactly `tolerance_ms` is tolerated.
pub fn decide(outcomes: &[AddressOutcome], tolerance_ms: u64) -> Result<Decision, SyncError> {
    let corrections: Vec<f64> = outcomes
        .iter()
        .filter_map(|outcome| outcome.result.as_ref().ok())
        .map(|sample| sample.correction)
        .collect();
    if corrections.is_empty() {
        return Err(SyncError::NoUsableServer);
    }
    let mean = corrections.iter().sum::<f64>() / corrections.len() as f64;
    Ok(Decision {
        apply: mean.abs() * 1000.0 > tolerance_ms as f64,
        correction: mean,
    })
}

/// The result of a completed (non-skipped) run.
#[derive(Debug)]
pub struct SyncSummary {
    /// The recommended correction in seconds.
    pub correction: f64,
    /// Whether the correction was committed to the system clock.
    pub applied: bool,
    /// Every queried address with its individual outcome.
    pub outcomes: Vec<AddressOutcome>,
}

/// The synchronization engine, configured once and runnable from any context — a
/// UI callback, a startup hook, a timer.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), timesync::SyncError> {
/// use timesync::{SyncConfig, Synchronizer};
///
/// let config = SyncConfig {
///     servers: "0.pool.ntp.org 1.pool.ntp.org".to_string(),
///     tolerance_ms: 100,
///     ..SyncConfig::default()
/// };
/// let summary = Synchronizer::new(config).run().await?;
/// println!("correction: {:+.6}s, applied: {}", summary.correction, summary.applied);
/// # Ok(())
/// # }
/// ```
pub struct Synchronizer<C = SystemClock, S = LogSink> {
    config: SyncConfig,
    clock: C,
    sink: S,
    guard: SingleFlight,
}

impl Synchronizer {
    /// An engine over the real system clock, reporting through the `log` facade.
    pub fn new(config: SyncConfig) -> Self {
        Synchronizer::with_collaborators(config, SystemClock, LogSink)
    }
}

impl<C, S> Synchronizer<C, S>
where
    C: ClockSource,
    S: ReportSink,
{
    /// An engine over caller-supplied clock and reporting collaborators.
    ///
    /// Shares the process-wide [`SingleFlight::global`] guard; use
    /// [`with_guard`](Self::with_guard) to scope exclusivity differently.
    pub fn with_collaborators(config: SyncConfig, clock: C, sink: S) -> Self {
        Synchronizer {
            config,
            clock,
            sink,
            guard: SingleFlight::global(),
        }
    }

    /// Replace the single-flight guard (e.g. to isolate runs in tests).
    pub fn with_guard(mut self, guard: SingleFlight) -> Self {
        self.guard = guard;
        self
    }

    /// The configuration this engine runs with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Perform one synchronization run.
    ///
    /// Skips immediately with [`SyncError::AlreadyInProgress`] if another run holds
    /// the guard. Otherwise resolves, queries, aggregates, and — when the mean
    /// correction exceeds the tolerance and syncing is enabled — commits the
    /// correction to the clock. The guard is released on every exit path.
    pub async fn run(&self) -> Result<SyncSummary, SyncError> {
        let _guard = match self.guard.try_acquire() {
            Some(guard) => guard,
            None => {
                self.sink
                    .report(ReportLevel::Info, &SyncError::AlreadyInProgress.to_string());
                return Err(SyncError::AlreadyInProgress);
            }
        };
        debug!(
            "starting synchronization, local clock reads {}",
            local_clock_to_string(self.clock.now())
        );
        self.run_locked().await
    }

    /// Like [`run`](Self::run), but abandons the run when `cancel` flips to `true`.
    ///
    /// Pending queries are dropped, not awaited; the guard is still released. A
    /// closed channel never cancels — the run is then allowed to finish.
    pub async fn run_with_cancel(
        &self,
        cancel: watch::Receiver<bool>,
    ) -> Result<SyncSummary, SyncError> {
        tokio::select! {
            result = self.run() => result,
            _ = cancel_requested(cancel) => {
                self.sink
                    .report(ReportLevel::Error, &SyncError::Cancelled.to_string());
                Err(SyncError::Cancelled)
            }
        }
    }

    async fn run_locked(&self) -> Result<SyncSummary, SyncError> {
        let names = self.config.server_tokens();
        if names.is_empty() {
            self.sink
                .report(ReportLevel::Error, "no NTP servers configured");
            return Err(SyncError::NoUsableServer);
        }
        let limit = self.config.worker_limit;

        // Resolution phase: every name settles before the first query is sent.
        let per_name = run_bounded(names, limit, |name| async move {
            let result = resolve_name(&name).await;
            (name, result)
        })
        .await;

        let mut resolved = Vec::new();
        for (name, result) in per_name {
            match result {
                Ok(addrs) => resolved.push(addrs),
                Err(e) => self.sink.report(
                    ReportLevel::Error,
                    &format!("unable to resolve '{}': {}", name, e),
                ),
            }
        }
        let addresses = merge_addresses(resolved);
        if addresses.is_empty() {
            self.sink
                .report(ReportLevel::Error, &SyncError::NoUsableServer.to_string());
            return Err(SyncError::NoUsableServer);
        }
        debug!("querying {} unique address(es)", addresses.len());

        // Query phase: independent exchanges; a timeout or rejection stays local
        // to its own address.
        let reply_timeout = self.config.query_timeout;
        let outcomes = run_bounded(addresses, limit, |addr| async move {
            let result = query_server(addr, reply_timeout, &self.clock).await;
            AddressOutcome { addr, result }
        })
        .await;

        for outcome in &outcomes {
            match &outcome.result {
                Ok(sample) => self.sink.report(
                    ReportLevel::Info,
                    &format!(
                        "{}: correction {}, latency {}",
                        outcome.addr,
                        seconds_to_human(sample.correction),
                        seconds_to_human(sample.latency)
                    ),
                ),
                Err(e) => self
                    .sink
                    .report(ReportLevel::Error, &format!("{}: {}", outcome.addr, e)),
            }
        }

        let decision = match decide(&outcomes, self.config.tolerance_ms) {
            Ok(decision) => decision,
            Err(e) => {
                self.sink.report(ReportLevel::Error, &e.to_string());
                return Err(e);
            }
        };

        if !decision.apply {
            self.notify(&format!(
                "tolerating clock drift of {}",
                seconds_to_human(decision.correction)
            ));
            return Ok(SyncSummary {
                correction: decision.correction,
                applied: false,
                outcomes,
            });
        }

        if !self.config.sync_enabled {
            self.notify(&format!(
                "syncing disabled; clock is off by {}",
                seconds_to_human(decision.correction)
            ));
            return Ok(SyncSummary {
                correction: decision.correction,
                applied: false,
                outcomes,
            });
        }

        if !self.clock.apply_correction(decision.correction) {
            self.sink.report(
                ReportLevel::Error,
                &SyncError::ClockChangeRejected.to_string(),
            );
            return Err(SyncError::ClockChangeRejected);
        }
        self.notify(&format!(
            "clock adjusted by {}",
            seconds_to_human(decision.correction)
        ));
        Ok(SyncSummary {
            correction: decision.correction,
            applied: true,
            outcomes,
        })
    }

    /// An informational banner: always logged, surfaced through the sink only when
    /// notifications are enabled. Errors never pass through here.
    fn notify(&self, message: &str) {
        debug!("{}", message);
        if self.config.notify_enabled {
            self.sink.report(ReportLevel::Info, message);
        }
    }
}

/// Resolves when cancellation is requested; never resolves if the channel closes
/// without a request.
async fn cancel_requested(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn outcome(last_octet: u8, result: Result<QuerySample, QueryError>) -> AddressOutcome {
        AddressOutcome {
            addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::new(192, 0, 2, last_octet),
                123,
            )),
            result,
        }
    }

    fn sample(correction: f64) -> Result<QuerySample, QueryError> {
        Ok(QuerySample {
            correction,
            latency: 0.01,
        })
    }

    #[test]
    fn decide_averages_successful_corrections_only() {
        let outcomes = vec![
            outcome(1, sample(0.010)),
            outcome(2, sample(0.014)),
            outcome(3, Err(QueryError::Timeout)),
        ];
        let decision = decide(&outcomes, 5).unwrap();
        assert!(decision.apply);
        assert!((decision.correction - 0.012).abs() < 1e-12);
    }

    #[test]
    fn decide_with_no_usable_corrections_is_a_hard_failure() {
        let outcomes = vec![outcome(1, Err(QueryError::Timeout))];
        assert_eq!(decide(&outcomes, 5), Err(SyncError::NoUsableServer));
        assert_eq!(decide(&[], 5), Err(SyncError::NoUsableServer));
    }

    #[test]
    fn tolerance_boundary_is_non_strict() {
        // Exactly at the tolerance: tolerate.
        let outcomes = vec![outcome(1, sample(0.005))];
        let decision = decide(&outcomes, 5).unwrap();
        assert!(!decision.apply);

        // Just above: apply. Negative corrections gate on magnitude.
        let outcomes = vec![outcome(1, sample(-0.0051))];
        let decision = decide(&outcomes, 5).unwrap();
        assert!(decision.apply);
        assert!(decision.correction < 0.0);
    }

    #[test]
    fn single_flight_admits_exactly_one_holder() {
        let flight = SingleFlight::new();
        let guard = flight.try_acquire().expect("first acquire");
        assert!(flight.is_busy());
        assert!(flight.try_acquire().is_none());
        drop(guard);
        assert!(!flight.is_busy());
        let _guard = flight.try_acquire().expect("acquire after release");
    }

    #[test]
    fn single_flight_clones_share_the_flag() {
        let flight = SingleFlight::new();
        let alias = flight.clone();
        let _guard = flight.try_acquire().unwrap();
        assert!(alias.try_acquire().is_none());
    }

    #[tokio::test]
    async fn run_bounded_inline_mode_preserves_order() {
        let out = run_bounded(vec![1, 2, 3], 0, |n| async move { n * 10 }).await;
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn run_bounded_completes_every_unit() {
        let out = run_bounded((0..20).collect(), 3, |n: i32| async move { n }).await;
        let total: i32 = out.iter().sum();
        assert_eq!(out.len(), 20);
        assert_eq!(total, (0..20).sum());
    }
}
