// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Media Transport
//
// Seams between a stream session and the engines it drives: the RTSP side
// produces a `MediaFeed`, the WebRTC side consumes it and reports what
// happens to the connection as `PeerEvent`s.

mod rtsp_source;
mod webrtc_peer;

pub use rtsp_source::{annex_b_from_avc, avcc_parameter_sets, RtspOptions, RtspSource};
pub use webrtc_peer::{WebRtcEngine, WebRtcPeer};

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::core::config::IceServerConfig;
use crate::core::Result;

/// Label of the side channel carrying the stream metadata.
pub const META_CHANNEL_LABEL: &str = "meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Codec description of one track offered to the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSpec {
    pub kind: MediaKind,
    /// e.g. `video/H264`, `audio/opus`
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

/// One encoded frame. `track` indexes into `MediaFeed::tracks`.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub track: usize,
    pub data: Bytes,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub enum SourceEvent {
    Sample(MediaSample),
    /// The source reached end of stream.
    Ended,
    Failed(String),
}

/// Live media opened from a source.
///
/// The reader task behind `events` runs until the feed is dropped.
pub struct MediaFeed {
    pub tracks: Vec<TrackSpec>,
    pub events: mpsc::Receiver<SourceEvent>,
    pub guard: DropGuard,
}

impl MediaFeed {
    pub fn new(
        tracks: Vec<TrackSpec>,
        events: mpsc::Receiver<SourceEvent>,
        guard: DropGuard,
    ) -> Self {
        Self {
            tracks,
            events,
            guard,
        }
    }
}

/// Opens media tracks from a source URL.
pub trait MediaSource: Send + Sync + 'static {
    /// Fails with `StreamError::MediaSource` when the source cannot be
    /// opened or exposes no usable track.
    fn open(
        &self,
        url: &str,
        options: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<MediaFeed>> + Send;
}

/// Parameters for building one peer.
#[derive(Debug, Clone, Default)]
pub struct PeerSetup {
    pub stream_name: String,
    pub ice_servers: Vec<IceServerConfig>,
}

/// Connection-level happenings reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected,
    /// Transient loss of connectivity; the engine may still recover.
    Disconnected,
    Failed(String),
    Closed,
    MetaChannelOpen,
    SourceEnded,
    SourceFailed(String),
}

/// Builds peers that publish a `MediaFeed`.
pub trait PeerEngine: Send + Sync + 'static {
    type Peer: PeerTransport;

    /// The peer takes ownership of `feed` and forwards its samples until it
    /// is closed. Source termination surfaces as `PeerEvent::SourceEnded` or
    /// `PeerEvent::SourceFailed`.
    fn create_peer(
        &self,
        setup: &PeerSetup,
        feed: MediaFeed,
    ) -> impl Future<Output = Result<Self::Peer>> + Send;
}

/// One WebRTC peer connection, sending only.
pub trait PeerTransport: Send + 'static {
    /// Complete (non-trickle) SDP offer.
    fn create_offer(&mut self) -> impl Future<Output = Result<String>> + Send;

    fn apply_answer(&mut self, answer_sdp: &str) -> impl Future<Output = Result<()>> + Send;

    /// Next event, or `None` once the peer can report nothing more.
    fn next_event(&mut self) -> impl Future<Output = Option<PeerEvent>> + Send;

    fn send_meta(&mut self, payload: &str) -> impl Future<Output = Result<()>> + Send;

    /// Releases the connection, its tracks and the feed.
    fn close(self) -> impl Future<Output = ()> + Send;
}
