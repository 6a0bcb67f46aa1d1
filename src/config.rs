// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! A read-only configuration snapshot for one synchronization run.
//!
//! The engine does not own configuration storage; the host hands it a
//! [`SyncConfig`] and the engine only reads from it. The server list is a single
//! string because that is how it is stored and edited; [`SyncConfig::server_tokens`]
//! splits it into individual names.

use std::time::Duration;

/// Characters accepted as separators between server names.
const TOKEN_SEPARATORS: &[char] = &[' ', '\t', '\n', ',', ';'];

/// Configuration for a synchronization run.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Server names, one string, separated by whitespace, commas, or semicolons.
    /// A name may carry an explicit `:port`; the NTP port 123 is assumed otherwise.
    pub servers: String,
    /// Corrections whose magnitude is at or below this many milliseconds are
    /// tolerated without touching the clock.
    pub tolerance_ms: u64,
    /// Whether a warranted correction is actually committed to the system clock.
    pub sync_enabled: bool,
    /// Whether informational outcome banners are emitted (errors always are).
    pub notify_enabled: bool,
    /// Maximum units of work in flight at once during resolution and querying.
    /// Zero means run every unit inline, sequentially, on the calling task.
    pub worker_limit: usize,
    /// How long to wait for each server's reply.
    pub query_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            servers: "pool.ntp.org".to_string(),
            tolerance_ms: 250,
            sync_enabled: true,
            notify_enabled: true,
            worker_limit: 4,
            query_timeout: Duration::from_secs(4),
        }
    }
}

impl SyncConfig {
    /// Split the configured server string into individual names.
    ///
    /// Any run of separator characters delimits; empty tokens vanish, so
    /// `"a, b;;c"` yields three names.
    pub fn server_tokens(&self) -> Vec<String> {
        self.servers
            .split(TOKEN_SEPARATORS)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_on_mixed_separators() {
        let config = SyncConfig {
            servers: " 0.pool.ntp.org,1.pool.ntp.org;\ttime.example.net \n".to_string(),
            ..SyncConfig::default()
        };
        assert_eq!(
            config.server_tokens(),
            vec!["0.pool.ntp.org", "1.pool.ntp.org", "time.example.net"]
        );
    }

    #[test]
    fn empty_and_separator_only_strings_yield_no_tokens() {
        let mut config = SyncConfig {
            servers: String::new(),
            ..SyncConfig::default()
        };
        assert!(config.server_tokens().is_empty());
        config.servers = " ,;\t".to_string();
        assert!(config.server_tokens().is_empty());
    }

    #[test]
    fn defaults_are_sensible() {
        let config = SyncConfig::default();
        assert_eq!(config.server_tokens(), vec!["pool.ntp.org"]);
        assert_eq!(config.tolerance_ms, 250);
        assert_eq!(config.query_timeout, Duration::from_secs(4));
    }
}
