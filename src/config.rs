// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Runtime configuration for the client-side networking core.
//!
//! A serde-deserializable struct loaded from YAML, then validated and
//! normalized in one pass before use.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Default inbound frame length cap (~110 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: u32 = 115_343_360;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
    /// Number of TCP connections maintained per server.
    #[serde(default = "default_connections_per_server")]
    pub connections_per_server: u32,

    /// Idle-read timeout applied to individual in-flight requests, seconds.
    #[serde(default = "default_read_timeout_secs", with = "serde_secs")]
    pub read_timeout: Duration,

    /// Window in which the auth handshake must complete, seconds.
    #[serde(default = "default_auth_timeout_secs", with = "serde_secs")]
    pub auth_timeout: Duration,

    /// Whether to set `TCP_NODELAY` on every connection.
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// Timer tick period driving the periodic timeout scan, milliseconds.
    #[serde(default = "default_tick_duration_ms")]
    pub tick_duration_ms: u64,

    /// Number of ticks between full completion-table scans.
    #[serde(default = "default_tick_count")]
    pub tick_count: u32,

    /// Maximum accepted inbound frame length, in bytes.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: u32,

    /// Bounded wait applied by `ClientFacade::close()`/`PerServerPool::close()`
    /// while awaiting in-flight drains, seconds.
    #[serde(default = "default_close_wait_secs", with = "serde_secs")]
    pub close_wait: Duration,
}

fn default_connections_per_server() -> u32 {
    1
}
fn default_read_timeout_secs() -> Duration {
    Duration::from_secs(10)
}
fn default_auth_timeout_secs() -> Duration {
    Duration::from_secs(10)
}
fn default_tcp_nodelay() -> bool {
    true
}
fn default_tick_duration_ms() -> u64 {
    1_000
}
fn default_tick_count() -> u32 {
    10
}
fn default_max_frame_length() -> u32 {
    DEFAULT_MAX_FRAME_LENGTH
}
fn default_close_wait_secs() -> Duration {
    Duration::from_secs(5)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connections_per_server: default_connections_per_server(),
            read_timeout: default_read_timeout_secs(),
            auth_timeout: default_auth_timeout_secs(),
            tcp_nodelay: default_tcp_nodelay(),
            tick_duration_ms: default_tick_duration_ms(),
            tick_count: default_tick_count(),
            max_frame_length: default_max_frame_length(),
            close_wait: default_close_wait_secs(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: ClientConfig =
            serde_yaml::from_str(&s).context("failed to parse client config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants that the wire protocol and state machine rely
    /// on; called automatically by `load_from_file`, exposed here so
    /// programmatically-built configs can be checked the same way.
    pub fn validate(&mut self) -> Result<()> {
        ensure!(
            self.connections_per_server >= 1,
            "connections_per_server must be >= 1"
        );
        ensure!(!self.read_timeout.is_zero(), "read_timeout must be > 0");
        ensure!(!self.auth_timeout.is_zero(), "auth_timeout must be > 0");
        ensure!(self.tick_duration_ms > 0, "tick_duration_ms must be > 0");
        ensure!(self.tick_count > 0, "tick_count must be > 0");
        ensure!(
            self.max_frame_length as usize >= crate::wire::HEADER_LEN,
            "max_frame_length must be able to hold at least one header"
        );
        Ok(())
    }

    /// Full period between timeout scans: `tick_duration_ms * tick_count`.
    pub fn scan_period(&self) -> Duration {
        Duration::from_millis(self.tick_duration_ms) * self.tick_count
    }
}

/// Serde helper representing a `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
