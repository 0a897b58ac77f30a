// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! RTSP to WHIP ingestion supervisor.
//!
//! Each configured stream runs as an independent session that pulls media
//! from an RTSP source, publishes it to a WHIP endpoint over WebRTC and
//! reconnects with exponential backoff when anything in that chain fails.

#![allow(clippy::type_complexity)] // Complex types are clear in context

pub mod core;

pub use core::{
    AppConfig, BackoffPolicy, IceServerConfig, IceUrls, MediaFeed, MediaKind, MediaSample,
    MediaSource, PeerEngine, PeerEvent, PeerSetup, PeerTransport, Result, RtspSource,
    SessionBackends, SessionHandle, SessionPhase, SessionReport, SessionStatus, SessionTimeouts,
    SessionTransition, Signaling, SourceEvent, StreamConfig, StreamError, StreamSession,
    Supervisor, SupervisorReport, TrackSpec, WebRtcEngine, WebRtcPeer, WhipClient, WhipEndpoint,
    WhipNegotiation, WhipResource,
};
