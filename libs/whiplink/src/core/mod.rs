// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod backoff;
pub mod config;
pub mod error;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod whip;

pub use backoff::BackoffPolicy;
pub use config::{AppConfig, IceServerConfig, IceUrls, SessionTimeouts, StreamConfig};
pub use error::*;
pub use session::{
    build_meta_payload, redact_credentials, SessionBackends, SessionPhase, SessionReport,
    SessionStatus, SessionTransition, StreamSession,
};
pub use supervisor::{SessionHandle, Supervisor, SupervisorReport};
pub use transport::{
    MediaFeed, MediaKind, MediaSample, MediaSource, PeerEngine, PeerEvent, PeerSetup,
    PeerTransport, RtspSource, SourceEvent, TrackSpec, WebRtcEngine, WebRtcPeer,
};
pub use whip::{Signaling, WhipClient, WhipEndpoint, WhipNegotiation, WhipResource};
