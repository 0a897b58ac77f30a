// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod metadata;
mod stream_session;

pub use metadata::{build_meta_payload, redact_credentials};
pub use stream_session::{SessionBackends, StreamSession};

use std::fmt;

/// Lifecycle phase of one stream session.
///
/// ```text
/// Idle -> Connecting -> Streaming -> Closing -> Backoff -> Connecting ...
///             |                                   ^
///             +-----------------------------------+
/// any phase -> Stopped (on shutdown)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Streaming,
    Closing,
    Backoff,
    Stopped,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Closing => "closing",
            SessionPhase::Backoff => "backoff",
            SessionPhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on every phase change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    /// Consecutive failed attempts since the last successful connection.
    pub attempt: u32,
    /// Metadata delivered on the current connection.
    pub meta_sent: bool,
    /// Connections that reached `Streaming`.
    pub connections: u64,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            attempt: 0,
            meta_sent: false,
            connections: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    /// Attempt counter after the transition.
    pub attempt: u32,
}

/// Returned by a session once it reaches `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub name: String,
    pub connections: u64,
    pub failures: u64,
}
