// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// WebRTC Peer (webrtc-rs)
//
// Send-only peer connection with one sample track per source track and a
// "meta" data channel created before the offer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::{
    MediaFeed, MediaKind, PeerEngine, PeerEvent, PeerSetup, PeerTransport, SourceEvent,
    TrackSpec, META_CHANNEL_LABEL,
};
use crate::core::config::IceServerConfig;
use crate::core::{Result, StreamError};

/// Builds `WebRtcPeer`s. Every peer gets its own `MediaEngine`: negotiated
/// codec state lives there and must not leak between connections.
#[derive(Debug, Default, Clone)]
pub struct WebRtcEngine;

impl WebRtcEngine {
    pub fn new() -> Self {
        Self
    }
}

fn ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: server.urls.to_vec(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            }
        })
        .collect()
}

impl PeerEngine for WebRtcEngine {
    type Peer = WebRtcPeer;

    async fn create_peer(&self, setup: &PeerSetup, feed: MediaFeed) -> Result<WebRtcPeer> {
        let stream = setup.stream_name.clone();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| StreamError::Transport(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            StreamError::Transport(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers(&setup.ice_servers),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
            StreamError::Transport(format!("Failed to create PeerConnection: {}", e))
        })?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state_tx = events_tx.clone();
        let state_stream = stream.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            let tx = state_tx.clone();
            let stream = state_stream.clone();
            Box::pin(async move {
                tracing::debug!(stream = %stream, "[WebRtcPeer] Peer connection state: {}", state);
                let event = match state {
                    RTCPeerConnectionState::Connected => Some(PeerEvent::Connected),
                    RTCPeerConnectionState::Disconnected => Some(PeerEvent::Disconnected),
                    RTCPeerConnectionState::Failed => {
                        Some(PeerEvent::Failed("peer connection failed".into()))
                    }
                    RTCPeerConnectionState::Closed => Some(PeerEvent::Closed),
                    _ => None,
                };
                if let Some(event) = event {
                    let _ = tx.send(event);
                }
            })
        }));

        let senders = add_senders(&peer_connection, &feed.tracks, &stream).await;
        let (tracks, data_channel) = close_on_error(&peer_connection, senders).await?;

        let open_tx = events_tx.clone();
        data_channel.on_open(Box::new(move || {
            Box::pin(async move {
                let _ = open_tx.send(PeerEvent::MetaChannelOpen);
            })
        }));

        let stop = CancellationToken::new();
        let pump = tokio::spawn(forward_samples(
            feed,
            tracks,
            events_tx,
            stop.clone(),
            stream.clone(),
        ));

        tracing::debug!(stream = %stream, "[WebRtcPeer] Peer connection created");

        Ok(WebRtcPeer {
            stream,
            peer_connection,
            data_channel,
            events: events_rx,
            stop,
            pump,
        })
    }
}

/// Adds one send-only sample track per source track plus the meta data
/// channel.
async fn add_senders(
    peer_connection: &RTCPeerConnection,
    source_tracks: &[TrackSpec],
    stream: &str,
) -> Result<(Vec<Arc<TrackLocalStaticSample>>, Arc<RTCDataChannel>)> {
    let mut tracks = Vec::with_capacity(source_tracks.len());
    for source_track in source_tracks {
        let track_id = match source_track.kind {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: source_track.mime_type.clone(),
                clock_rate: source_track.clock_rate,
                channels: source_track.channels,
                sdp_fmtp_line: source_track.sdp_fmtp_line.clone(),
                rtcp_feedback: vec![],
            },
            track_id.to_owned(),
            format!("whiplink-{}", stream),
        ));

        let rtp_sender = peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                StreamError::Transport(format!("Failed to add {} track: {}", track_id, e))
            })?;

        // Interceptors only see RTCP if someone reads it. Ends when the
        // peer connection closes.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        tracks.push(track);
    }

    // WHIP publishing is unidirectional
    for transceiver in peer_connection.get_transceivers().await {
        if transceiver.sender().await.track().await.is_some() {
            transceiver
                .set_direction(RTCRtpTransceiverDirection::Sendonly)
                .await;
        }
    }

    let data_channel = peer_connection
        .create_data_channel(META_CHANNEL_LABEL, None)
        .await
        .map_err(|e| {
            StreamError::Transport(format!("Failed to create meta data channel: {}", e))
        })?;

    Ok((tracks, data_channel))
}

/// A half-built peer connection keeps its ICE/DTLS tasks alive until
/// `close()`, dropping it is not enough.
async fn close_on_error<T>(peer_connection: &RTCPeerConnection, result: Result<T>) -> Result<T> {
    if result.is_err() {
        if let Err(e) = peer_connection.close().await {
            tracing::warn!("[WebRtcPeer] Error closing half-built peer connection: {}", e);
        }
    }
    result
}

/// Writes source samples to their tracks until the source stops or the
/// peer is closed. Dropping the feed here stops the source reader.
async fn forward_samples(
    feed: MediaFeed,
    tracks: Vec<Arc<TrackLocalStaticSample>>,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
    stop: CancellationToken,
    stream: String,
) {
    let MediaFeed {
        mut events, guard, ..
    } = feed;
    let _guard = guard;

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(SourceEvent::Sample(sample)) => {
                let Some(track) = tracks.get(sample.track) else {
                    continue;
                };
                let sample = Sample {
                    data: sample.data,
                    duration: sample.duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::trace!(stream = %stream, "[WebRtcPeer] write_sample failed: {}", e);
                }
            }
            Some(SourceEvent::Failed(reason)) => {
                let _ = peer_events.send(PeerEvent::SourceFailed(reason));
                break;
            }
            Some(SourceEvent::Ended) | None => {
                let _ = peer_events.send(PeerEvent::SourceEnded);
                break;
            }
        }
    }
}

pub struct WebRtcPeer {
    stream: String,
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    stop: CancellationToken,
    pump: JoinHandle<()>,
}

impl PeerTransport for WebRtcPeer {
    async fn create_offer(&mut self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| StreamError::Transport(format!("Failed to create offer: {}", e)))?;

        // Subscribe before gathering starts so completion is not missed
        let mut done_rx = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| {
                StreamError::Transport(format!("Failed to set local description: {}", e))
            })?;

        let _ = done_rx.recv().await;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| StreamError::Transport("No local description".into()))?;

        tracing::debug!(
            stream = %self.stream,
            candidates = local_desc.sdp.matches("a=candidate:").count(),
            "[WebRtcPeer] SDP offer ready"
        );

        Ok(local_desc.sdp)
    }

    async fn apply_answer(&mut self, answer_sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_owned())
            .map_err(|e| StreamError::Signaling(format!("Failed to parse SDP answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| StreamError::Signaling(format!("Failed to set remote description: {}", e)))
    }

    async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events.recv().await
    }

    async fn send_meta(&mut self, payload: &str) -> Result<()> {
        self.data_channel
            .send_text(payload.to_owned())
            .await
            .map(|_| ())
            .map_err(|e| StreamError::Transport(format!("Failed to send metadata: {}", e)))
    }

    async fn close(self) {
        self.stop.cancel();
        if let Err(e) = self.pump.await {
            tracing::warn!(stream = %self.stream, "[WebRtcPeer] Sample pump ended abnormally: {}", e);
        }

        if let Err(e) = self.peer_connection.close().await {
            tracing::warn!(stream = %self.stream, "[WebRtcPeer] Error closing peer connection: {}", e);
        }

        tracing::debug!(stream = %self.stream, "[WebRtcPeer] Peer connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::IceUrls;

    #[test]
    fn test_ice_servers_mapping() {
        let servers = vec![
            IceServerConfig {
                urls: IceUrls::One("stun:stun.l.google.com:19302".into()),
                username: None,
                credential: None,
            },
            IceServerConfig {
                urls: IceUrls::Many(vec![
                    "turn:turn.example.com:3478?transport=udp".into(),
                    "turn:turn.example.com:3478?transport=tcp".into(),
                ]),
                username: Some("user".into()),
                credential: Some("secret".into()),
            },
        ];

        let mapped = ice_servers(&servers);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(mapped[0].username.is_empty());
        assert_eq!(mapped[1].urls.len(), 2);
        assert_eq!(mapped[1].username, "user");
        assert_eq!(mapped[1].credential, "secret");
    }

    async fn bare_peer_connection() -> RTCPeerConnection {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media_engine).build();
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_build_closes_peer_connection() {
        let peer_connection = bare_peer_connection().await;

        let result: Result<()> = close_on_error(
            &peer_connection,
            Err(StreamError::Transport("add_track failed".into())),
        )
        .await;

        assert!(matches!(result, Err(StreamError::Transport(_))));
        assert_eq!(
            peer_connection.connection_state(),
            RTCPeerConnectionState::Closed
        );
    }

    #[tokio::test]
    async fn test_successful_build_leaves_peer_connection_open() {
        let peer_connection = bare_peer_connection().await;

        let (tracks, data_channel) = close_on_error(
            &peer_connection,
            add_senders(
                &peer_connection,
                &[TrackSpec {
                    kind: MediaKind::Video,
                    mime_type: "video/H264".into(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                }],
                "cam1",
            )
            .await,
        )
        .await
        .unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(data_channel.label(), META_CHANNEL_LABEL);
        assert_eq!(
            peer_connection.connection_state(),
            RTCPeerConnectionState::New
        );
        peer_connection.close().await.unwrap();
    }
}
