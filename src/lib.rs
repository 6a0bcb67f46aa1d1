/*!
# Example

Shows how to run one synchronization pass against a pool of NTP servers,
applying the mean correction to the system clock when it drifts past the
configured tolerance.

```rust,no_run
use timesync::{SyncConfig, Synchronizer};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), timesync::SyncError> {
    let config = SyncConfig {
        servers: "0.pool.ntp.org 1.pool.ntp.org 2.pool.ntp.org".to_string(),
        tolerance_ms: 100,
        ..SyncConfig::default()
    };

    let summary = Synchronizer::new(config).run().await?;
    println!(
        "mean correction {:+.6}s across {} address(es), applied: {}",
        summary.correction,
        summary.outcomes.len(),
        summary.applied,
    );
    Ok(())
}
```
*/

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// A read-only configuration snapshot for one synchronization run.
pub mod config;

/// Error types for the synchronization engine.
pub mod error;

/// Device-epoch timestamps and conversion to and from the NTP timestamp format.
pub mod local_time;

/// Types and constants for the NTP wire format (RFC 5905).
pub mod protocol;

/// One NTP exchange with one server address.
pub mod query;

/// The reporting boundary: human-readable progress and error messages.
pub mod report;

/// Resolution of configured server names into concrete IPv4 socket addresses.
pub mod resolve;

/// The synchronization run: fan-out, aggregation, decision, single-flight.
pub mod sync;

/// The clock-source boundary: reading the local clock and committing corrections.
pub mod clock;

pub use clock::{ClockSource, SystemClock};
pub use config::SyncConfig;
pub use error::{ProtocolError, QueryError, ResolveError, SyncError};
pub use query::{query_server, QuerySample};
pub use report::{LogSink, ReportLevel, ReportSink};
pub use sync::{decide, AddressOutcome, Decision, SingleFlight, SyncSummary, Synchronizer};
