// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! One NTP exchange with one server address.
//!
//! [`query_server`] performs the classic four-timestamp exchange: stamp T1 into the
//! request's transmit field, send, wait (bounded) for the reply, record T4 the moment
//! data arrives, then validate and reduce the reply to a correction/latency pair.
//! The socket lives inside the query future, so every exit path closes it.
//!
//! Transient resource exhaustion — the kernel running dry while many queries are in
//! flight — is retried a few times with a short backoff before it fails the query.
//! The orchestrator bounds concurrency precisely to keep that path rare.

use log::debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use crate::clock::ClockSource;
use crate::error::{ProtocolError, QueryError};
use crate::local_time::to_ntp;
use crate::protocol::{
    ConstPackedSizeBytes, LeapIndicator, Mode, Packet, ReadBytes, TimestampFormat, WriteBytes,
};

/// Extra attempts after a send fails with resource exhaustion.
const SEND_RETRIES: u32 = 3;
/// Backoff between send retries.
const SEND_BACKOFF: Duration = Duration::from_millis(100);
/// Extra attempts after the reply wait fails with resource exhaustion.
const WAIT_RETRIES: u32 = 3;
/// Backoff between wait retries.
const WAIT_BACKOFF: Duration = Duration::from_millis(10);

/// One NTP era: 2^32 seconds.
const ERA_SECONDS: f64 = 4_294_967_296.0;
/// Half an era; a correction beyond this implies the clocks sit in different eras.
const HALF_ERA_SECONDS: f64 = 2_147_483_648.0;

/// The outcome of one successful exchange.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuerySample {
    /// Seconds the local clock should be advanced to match this server.
    pub correction: f64,
    /// Half the measured round-trip delay, in seconds. Reported, never weighted.
    pub latency: f64,
}

/// Whether an I/O error is the transient out-of-resources condition worth retrying.
fn is_resource_exhaustion(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOMEM)
        || matches!(err.kind(), std::io::ErrorKind::OutOfMemory)
}

/// Perform one NTP exchange with `addr` and reduce it to a [`QuerySample`].
///
/// Single attempt: failures other than transient resource exhaustion are returned to
/// the caller immediately. The wait for the reply is bounded by `reply_timeout`, and
/// a timeout is reported as its own error kind, distinct from send/receive failures.
pub async fn query_server<C>(
    addr: SocketAddr,
    reply_timeout: Duration,
    clock: &C,
) -> Result<QuerySample, QueryError>
where
    C: ClockSource + ?Sized,
{
    let sock = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(QueryError::Socket)?;
    sock.connect(addr).await.map_err(QueryError::Socket)?;

    // T1 is stamped into the request just before it leaves; the server must echo it
    // back in the reply's origin field.
    let t1 = to_ntp(clock.now());
    let request = Packet::client_request(t1);
    let mut send_buf = [0u8; Packet::PACKED_SIZE_BYTES];
    (&mut send_buf[..])
        .write_bytes(request)
        .map_err(QueryError::Send)?;

    send_with_retry(&sock, &send_buf).await?;
    debug!("sent request to {}", addr);

    let mut recv_buf = [0u8; 1024];
    let recv_len = recv_with_retry(&sock, &mut recv_buf, reply_timeout).await?;

    // T4 must be taken the moment data is in hand; parsing time is not free.
    let t4 = to_ntp(clock.now());
    debug!("recv: {} bytes from {}", recv_len, addr);

    if recv_len < Packet::PACKED_SIZE_BYTES {
        return Err(ProtocolError::ResponseTooShort { received: recv_len }.into());
    }
    let response: Packet = (&recv_buf[..Packet::PACKED_SIZE_BYTES])
        .read_bytes()
        .map_err(QueryError::Recv)?;

    validate_response(&response, t1)?;

    Ok(compute_sample(
        t1,
        response.receive_timestamp,
        response.transmit_timestamp,
        t4,
    ))
}

/// Send the request, retrying a transient out-of-resources failure.
async fn send_with_retry(sock: &UdpSocket, buf: &[u8]) -> Result<(), QueryError> {
    let mut attempt = 0;
    loop {
        match sock.send(buf).await {
            Ok(_) => return Ok(()),
            Err(e) if is_resource_exhaustion(&e) => {
                if attempt == SEND_RETRIES {
                    return Err(QueryError::ResourceExhausted { during: "send" });
                }
                attempt += 1;
                debug!("send hit resource exhaustion, retry {}", attempt);
                sleep(SEND_BACKOFF).await;
            }
            Err(e) => return Err(QueryError::Send(e)),
        }
    }
}

/// Wait (bounded) for the reply, retrying a transient out-of-resources failure of
/// the wait itself.
async fn recv_with_retry(
    sock: &UdpSocket,
    buf: &mut [u8],
    reply_timeout: Duration,
) -> Result<usize, QueryError> {
    let mut attempt = 0;
    loop {
        match timeout(reply_timeout, sock.recv(buf)).await {
            Err(_elapsed) => return Err(QueryError::Timeout),
            Ok(Ok(len)) => return Ok(len),
            Ok(Err(e)) if is_resource_exhaustion(&e) => {
                if attempt == WAIT_RETRIES {
                    return Err(QueryError::ResourceExhausted { during: "wait" });
                }
                attempt += 1;
                debug!("reply wait hit resource exhaustion, retry {}", attempt);
                sleep(WAIT_BACKOFF).await;
            }
            Ok(Err(e)) => return Err(QueryError::Recv(e)),
        }
    }
}

/// Validate a server reply against the request's transmit timestamp.
fn validate_response(response: &Packet, t1: TimestampFormat) -> Result<(), ProtocolError> {
    if !response.version.is_acceptable() {
        return Err(ProtocolError::BadVersion {
            version: response.version.0,
        });
    }
    if response.mode != Mode::Server {
        return Err(ProtocolError::UnexpectedMode);
    }
    if response.leap_indicator == LeapIndicator::Unknown {
        return Err(ProtocolError::UnsynchronizedServer);
    }
    // The reply must echo our T1 exactly; anything else is stale or spoofed.
    if response.origin_timestamp != t1 {
        return Err(ProtocolError::OriginTimestampMismatch);
    }
    if response.receive_timestamp.is_zero() || response.transmit_timestamp.is_zero() {
        return Err(ProtocolError::ZeroServerTimestamp);
    }
    Ok(())
}

/// Reduce the four timestamps of an exchange to a correction/latency pair.
///
/// All arithmetic runs in `f64`. When a later timestamp reads numerically smaller
/// than the earlier one it is compared against, the 32-bit seconds counter wrapped
/// between the two readings; the later value is lifted by one era before
/// subtracting. A correction larger than half an era means the two clocks sit in
/// different eras outright, and is folded back into a plausible single-era value.
fn compute_sample(
    t1: TimestampFormat,
    t2: TimestampFormat,
    t3: TimestampFormat,
    t4: TimestampFormat,
) -> QuerySample {
    let t1 = t1.to_seconds();
    let t2 = t2.to_seconds();
    let mut t3 = t3.to_seconds();
    let mut t4 = t4.to_seconds();

    if t4 < t1 {
        t4 += ERA_SECONDS;
    }
    if t3 < t2 {
        t3 += ERA_SECONDS;
    }

    let roundtrip = (t4 - t1) - (t3 - t2);
    let latency = roundtrip / 2.0;
    let mut correction = t3 + latency - t4;

    if correction > HALF_ERA_SECONDS {
        correction -= ERA_SECONDS;
    } else if correction < -HALF_ERA_SECONDS {
        correction += ERA_SECONDS;
    }

    QuerySample {
        correction,
        latency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ReferenceId, ShortFormat, Stratum, Version};

    fn ts(seconds: u32, fraction: u32) -> TimestampFormat {
        TimestampFormat { seconds, fraction }
    }

    fn server_reply(origin: TimestampFormat) -> Packet {
        Packet {
            leap_indicator: LeapIndicator::NoWarning,
            version: Version::V4,
            mode: Mode::Server,
            stratum: Stratum(2),
            poll: 6,
            precision: -20,
            root_delay: ShortFormat::default(),
            root_dispersion: ShortFormat::default(),
            reference_id: ReferenceId(*b"GPS\0"),
            reference_timestamp: ts(3_913_056_000, 0),
            origin_timestamp: origin,
            receive_timestamp: ts(3_913_056_001, 0),
            transmit_timestamp: ts(3_913_056_001, 1000),
        }
    }

    #[test]
    fn valid_reply_passes_validation() {
        let t1 = ts(3_913_056_000, 42);
        assert!(validate_response(&server_reply(t1), t1).is_ok());
    }

    #[test]
    fn origin_mismatch_is_rejected() {
        let t1 = ts(3_913_056_000, 42);
        let reply = server_reply(ts(999, 0));
        assert_eq!(
            validate_response(&reply, t1),
            Err(ProtocolError::OriginTimestampMismatch)
        );
    }

    #[test]
    fn wrong_mode_and_version_are_rejected() {
        let t1 = ts(1, 0);
        let mut reply = server_reply(t1);
        reply.mode = Mode::Client;
        assert_eq!(
            validate_response(&reply, t1),
            Err(ProtocolError::UnexpectedMode)
        );

        let mut reply = server_reply(t1);
        reply.version = Version(2);
        assert_eq!(
            validate_response(&reply, t1),
            Err(ProtocolError::BadVersion { version: 2 })
        );

        let mut reply = server_reply(t1);
        reply.version = Version::V3;
        assert!(validate_response(&reply, t1).is_ok());
    }

    #[test]
    fn unsynchronized_leap_is_rejected() {
        let t1 = ts(1, 0);
        let mut reply = server_reply(t1);
        reply.leap_indicator = LeapIndicator::Unknown;
        assert_eq!(
            validate_response(&reply, t1),
            Err(ProtocolError::UnsynchronizedServer)
        );
    }

    #[test]
    fn zero_server_timestamps_are_rejected() {
        let t1 = ts(1, 0);
        let mut reply = server_reply(t1);
        reply.receive_timestamp = TimestampFormat::default();
        assert_eq!(
            validate_response(&reply, t1),
            Err(ProtocolError::ZeroServerTimestamp)
        );
    }

    #[test]
    fn sample_matches_plain_arithmetic_away_from_wraparound() {
        // T1=1000.0, T2=1000.625, T3=1000.75, T4=1001.0.
        let half = 0x8000_0000u32; // .5
        let sample = compute_sample(
            ts(1000, 0),
            ts(1000, half + (half >> 2)), // 1000.625
            ts(1000, half + (half >> 1)), // 1000.75
            ts(1001, 0),
        );
        // roundtrip = (1001 - 1000) - (1000.75 - 1000.625) = 0.875
        assert!((sample.latency - 0.4375).abs() < 1e-9);
        // correction = 1000.75 + 0.4375 - 1001 = 0.1875
        assert!((sample.correction - 0.1875).abs() < 1e-9);
    }

    #[test]
    fn wraparound_straddling_t4_matches_wide_integer_reference() {
        // The exchange takes 4 seconds of real time across the 2^32 boundary:
        // T1 = 2^32 - 2 (era 0), T4 = 2 (era 1). The server clock agrees with ours
        // and answers in the middle of the window.
        let t1 = ts(u32::MAX - 1, 0);
        let t2 = ts(u32::MAX, 0);
        let t3 = ts(0, 0);
        let t4 = ts(2, 0);
        let sample = compute_sample(t1, t2, t3, t4);

        // Wide-integer reference with era-corrected values.
        let wide = |s: i64| s as f64;
        let (w1, w2, w3, w4) = (
            wide(u32::MAX as i64 - 1),
            wide(u32::MAX as i64),
            wide(u32::MAX as i64 + 1),
            wide(u32::MAX as i64 + 3),
        );
        let roundtrip = (w4 - w1) - (w3 - w2);
        let latency = roundtrip / 2.0;
        let correction = w3 + latency - w4;

        assert!((sample.latency - latency).abs() < 1e-6);
        assert!((sample.correction - correction).abs() < 1e-6);
    }

    #[test]
    fn wraparound_straddling_server_window_matches_reference() {
        // Server-side T3 wraps relative to T2.
        let sample = compute_sample(
            ts(u32::MAX - 3, 0),
            ts(u32::MAX, 0),
            ts(1, 0), // really 2^32 + 1
            ts(u32::MAX - 1, 0),
        );
        let w1 = (u32::MAX as i64 - 3) as f64;
        let w2 = u32::MAX as i64 as f64;
        let w3 = (u32::MAX as i64 + 2) as f64;
        let w4 = (u32::MAX as i64 - 1) as f64;
        let roundtrip = (w4 - w1) - (w3 - w2);
        let latency = roundtrip / 2.0;
        let correction = w3 + latency - w4;

        assert!((sample.latency - latency).abs() < 1e-6);
        assert!((sample.correction - correction).abs() < 1e-6);
    }

    #[test]
    fn cross_era_correction_is_folded() {
        // Local clock in era 1 (just wrapped), server still reporting era 0 values:
        // the naive correction lands a whole era away; folding brings it near zero.
        let sample = compute_sample(
            ts(10, 0),            // T1, era 1
            ts(u32::MAX - 8, 0),  // T2, era 0 numerically
            ts(u32::MAX - 8, 0),  // T3
            ts(12, 0),            // T4, era 1
        );
        assert!(sample.correction.abs() < HALF_ERA_SECONDS);
        // The server is ~20s behind the local clock after folding.
        assert!((sample.correction + 20.0).abs() < 2.0);
    }
}
