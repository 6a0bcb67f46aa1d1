// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Error types for the synchronization engine.
//!
//! The taxonomy mirrors the blast radius of each failure: [`ProtocolError`] and
//! [`QueryError`] are fatal to a single server query, [`ResolveError`] to a single
//! configured name, and [`SyncError`] to the whole run. Per-query and per-name errors
//! are caught at their own unit of work and reported; they never propagate past the
//! orchestrator, they only shrink the set of usable corrections.

use std::fmt;
use std::io;

/// Validation failures against a received NTP packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// Response datagram shorter than the 48-byte packet.
    ResponseTooShort {
        /// Number of bytes received.
        received: usize,
    },
    /// Response carries a version other than 3 or 4.
    BadVersion {
        /// The version field from the reply.
        version: u8,
    },
    /// Response has wrong mode (expected Server).
    UnexpectedMode,
    /// Server reports its clock as unsynchronized (leap indicator unknown).
    UnsynchronizedServer,
    /// Origin timestamp does not echo our transmit timestamp.
    OriginTimestampMismatch,
    /// Server receive or transmit timestamp is zero.
    ZeroServerTimestamp,
}

/// Errors from a single NTP exchange with one address. Fatal to that query only.
#[derive(Debug)]
pub enum QueryError {
    /// Creating or connecting the UDP socket failed.
    Socket(io::Error),
    /// Sending the request failed (non-transient).
    Send(io::Error),
    /// No reply arrived within the bounded wait.
    Timeout,
    /// Receiving the reply failed (non-transient).
    Recv(io::Error),
    /// The reply failed protocol validation.
    Protocol(ProtocolError),
    /// A transient resource shortage persisted through all retries.
    ResourceExhausted {
        /// The operation that kept failing ("send" or "wait").
        during: &'static str,
    },
}

/// Failure to resolve one configured server name. Fatal to that name only.
#[derive(Debug)]
pub enum ResolveError {
    /// The resolver call itself failed.
    Lookup(io::Error),
    /// The name resolved, but to no usable (IPv4) addresses.
    NoAddresses,
}

/// Run-level failures. Each terminates the run without touching the clock
/// (except [`SyncError::ClockChangeRejected`], where the OS refused the change).
#[derive(Debug, Eq, PartialEq)]
pub enum SyncError {
    /// Another synchronization run is already in flight; this one was skipped.
    AlreadyInProgress,
    /// No queried address produced a usable correction.
    NoUsableServer,
    /// The OS rejected the clock-set call.
    ClockChangeRejected,
    /// The run was cancelled before completing.
    Cancelled,
}

// ── Display implementations ─────────────────────────────────────────

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::ResponseTooShort { received } => {
                write!(f, "NTP response too short ({received} bytes)")
            }
            ProtocolError::BadVersion { version } => {
                write!(f, "unexpected NTP version {version} (expected 3 or 4)")
            }
            ProtocolError::UnexpectedMode => {
                write!(f, "unexpected response mode (expected server)")
            }
            ProtocolError::UnsynchronizedServer => {
                write!(f, "server reports unsynchronized clock")
            }
            ProtocolError::OriginTimestampMismatch => {
                write!(
                    f,
                    "origin timestamp mismatch: response does not match our request"
                )
            }
            ProtocolError::ZeroServerTimestamp => {
                write!(f, "server receive or transmit timestamp is zero")
            }
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Socket(e) => write!(f, "unable to open socket: {e}"),
            QueryError::Send(e) => write!(f, "unable to send NTP request: {e}"),
            QueryError::Timeout => write!(f, "timed out waiting for NTP response"),
            QueryError::Recv(e) => write!(f, "unable to read NTP response: {e}"),
            QueryError::Protocol(e) => write!(f, "{e}"),
            QueryError::ResourceExhausted { during } => {
                write!(f, "out of resources during {during}, retries exhausted")
            }
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Lookup(e) => write!(f, "name resolution failed: {e}"),
            ResolveError::NoAddresses => write!(f, "name resolved to no IPv4 addresses"),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::AlreadyInProgress => {
                write!(f, "synchronization already in progress, skipped")
            }
            SyncError::NoUsableServer => write!(f, "no NTP server could be used"),
            SyncError::ClockChangeRejected => write!(f, "the system clock could not be changed"),
            SyncError::Cancelled => write!(f, "synchronization cancelled"),
        }
    }
}

// ── Error trait implementations ─────────────────────────────────────

impl std::error::Error for ProtocolError {}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Socket(e) | QueryError::Send(e) | QueryError::Recv(e) => Some(e),
            QueryError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::Lookup(e) => Some(e),
            ResolveError::NoAddresses => None,
        }
    }
}

impl std::error::Error for SyncError {}

// ── From conversions ────────────────────────────────────────────────

impl From<ProtocolError> for QueryError {
    fn from(err: ProtocolError) -> QueryError {
        QueryError::Protocol(err)
    }
}

impl From<QueryError> for io::Error {
    fn from(err: QueryError) -> io::Error {
        let kind = match &err {
            QueryError::Socket(e) | QueryError::Send(e) | QueryError::Recv(e) => e.kind(),
            QueryError::Timeout => io::ErrorKind::TimedOut,
            QueryError::Protocol(_) => io::ErrorKind::InvalidData,
            QueryError::ResourceExhausted { .. } => io::ErrorKind::OutOfMemory,
        };
        io::Error::new(kind, err)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let e = ProtocolError::ResponseTooShort { received: 10 };
        assert_eq!(e.to_string(), "NTP response too short (10 bytes)");
        let e = ProtocolError::BadVersion { version: 2 };
        assert_eq!(e.to_string(), "unexpected NTP version 2 (expected 3 or 4)");
    }

    #[test]
    fn query_error_display_and_source() {
        let e = QueryError::Timeout;
        assert_eq!(e.to_string(), "timed out waiting for NTP response");
        let e = QueryError::Protocol(ProtocolError::OriginTimestampMismatch);
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn query_error_to_io_error_kind() {
        let io_err: io::Error = QueryError::Timeout.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);

        let io_err: io::Error =
            QueryError::Protocol(ProtocolError::UnexpectedMode).into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);

        let inner = io_err
            .get_ref()
            .unwrap()
            .downcast_ref::<QueryError>()
            .unwrap();
        assert!(matches!(
            inner,
            QueryError::Protocol(ProtocolError::UnexpectedMode)
        ));
    }

    #[test]
    fn sync_error_display() {
        assert_eq!(
            SyncError::AlreadyInProgress.to_string(),
            "synchronization already in progress, skipped"
        );
        assert_eq!(
            SyncError::NoUsableServer.to_string(),
            "no NTP server could be used"
        );
    }
}
