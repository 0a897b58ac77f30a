// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Stream Session
//
// Connect, stream, tear down, back off, repeat, until cancelled. Every wait
// races the cancellation token, and every connection is fully released
// before the session backs off or stops.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{build_meta_payload, SessionPhase, SessionReport, SessionStatus, SessionTransition};
use crate::core::backoff::BackoffPolicy;
use crate::core::config::{AppConfig, SessionTimeouts, StreamConfig};
use crate::core::transport::{MediaSource, PeerEngine, PeerEvent, PeerSetup, PeerTransport};
use crate::core::whip::{Signaling, WhipEndpoint, WhipResource};
use crate::core::StreamError;

/// Engines shared by every session of a supervisor.
pub struct SessionBackends<M, E, S> {
    pub source: Arc<M>,
    pub engine: Arc<E>,
    pub signaling: Arc<S>,
}

impl<M, E, S> SessionBackends<M, E, S> {
    pub fn new(source: M, engine: E, signaling: S) -> Self {
        Self {
            source: Arc::new(source),
            engine: Arc::new(engine),
            signaling: Arc::new(signaling),
        }
    }
}

impl<M, E, S> Clone for SessionBackends<M, E, S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            engine: Arc::clone(&self.engine),
            signaling: Arc::clone(&self.signaling),
        }
    }
}

/// Why a connection ended.
enum Exit {
    Cancelled,
    Failed(StreamError),
}

impl From<StreamError> for Exit {
    fn from(error: StreamError) -> Self {
        Exit::Failed(error)
    }
}

/// Resources held by one connection attempt.
struct Connection<P> {
    peer: Option<P>,
    resource: Option<WhipResource>,
}

impl<P> Connection<P> {
    fn new() -> Self {
        Self {
            peer: None,
            resource: None,
        }
    }
}

/// Supervises one RTSP to WHIP pipeline.
pub struct StreamSession<M, E, S>
where
    M: MediaSource,
    E: PeerEngine,
    S: Signaling,
{
    stream: StreamConfig,
    endpoint: WhipEndpoint,
    peer_setup: PeerSetup,
    media_options: BTreeMap<String, String>,
    backoff: BackoffPolicy,
    timeouts: SessionTimeouts,
    backends: SessionBackends<M, E, S>,

    status: watch::Sender<SessionStatus>,
    transitions: Option<mpsc::UnboundedSender<SessionTransition>>,

    phase: SessionPhase,
    attempt: u32,
    meta_sent: bool,
    connections: u64,
    failures: u64,
}

impl<M, E, S> StreamSession<M, E, S>
where
    M: MediaSource,
    E: PeerEngine,
    S: Signaling,
{
    pub fn new(
        stream: StreamConfig,
        config: &AppConfig,
        backends: SessionBackends<M, E, S>,
    ) -> Self {
        let endpoint =
            WhipEndpoint::new(stream.whip_url.clone()).with_auth_token(stream.whip_token.clone());
        let peer_setup = PeerSetup {
            stream_name: stream.name.clone(),
            ice_servers: config.ice_servers.clone(),
        };
        let media_options = config.media_options_for(&stream);
        let (status, _) = watch::channel(SessionStatus::default());

        Self {
            stream,
            endpoint,
            peer_setup,
            media_options,
            backoff: config.backoff_policy(),
            timeouts: config.timeouts(),
            backends,
            status,
            transitions: None,
            phase: SessionPhase::Idle,
            attempt: 0,
            meta_sent: false,
            connections: 0,
            failures: 0,
        }
    }

    /// Reports every phase change, in order, on `tx`.
    pub fn with_transition_log(mut self, tx: mpsc::UnboundedSender<SessionTransition>) -> Self {
        self.transitions = Some(tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.stream.name
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Runs until `cancel` fires, then releases everything and returns.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionReport {
        tracing::info!(
            stream = %self.stream.name,
            whip_url = %self.endpoint.url,
            "[StreamSession] Starting"
        );

        while !cancel.is_cancelled() {
            self.meta_sent = false;
            self.enter(SessionPhase::Connecting);

            let mut conn = Connection::new();
            let exit = match self.connect(&mut conn, &cancel).await {
                Ok(channel_ready) => self.stream(&mut conn, &cancel, channel_ready).await,
                Err(exit) => exit,
            };

            if self.phase == SessionPhase::Streaming {
                self.enter(SessionPhase::Closing);
            }
            self.release(conn).await;

            let error = match exit {
                Exit::Cancelled => break,
                Exit::Failed(error) => error,
            };

            let wait = self.backoff.next(self.attempt);
            self.attempt = self.attempt.saturating_add(1);
            self.failures += 1;

            tracing::warn!(
                stream = %self.stream.name,
                attempt = self.attempt,
                backoff_ms = wait.as_millis() as u64,
                kind = error.kind(),
                "[StreamSession] Connection failed: {}",
                error
            );

            let message = error.to_string();
            self.status
                .send_modify(|status| status.last_error = Some(message));
            self.enter(SessionPhase::Backoff);

            if cancel
                .run_until_cancelled(tokio::time::sleep(wait))
                .await
                .is_none()
            {
                break;
            }
        }

        self.enter(SessionPhase::Stopped);
        tracing::info!(
            stream = %self.stream.name,
            connections = self.connections,
            failures = self.failures,
            "[StreamSession] Stopped"
        );

        SessionReport {
            name: self.stream.name.clone(),
            connections: self.connections,
            failures: self.failures,
        }
    }

    /// Opens media, builds the peer, runs the WHIP exchange and waits for
    /// the transport to connect. Returns whether the meta channel opened on
    /// the way.
    async fn connect(
        &self,
        conn: &mut Connection<E::Peer>,
        cancel: &CancellationToken,
    ) -> Result<bool, Exit> {
        let feed = cancel
            .run_until_cancelled(
                self.backends
                    .source
                    .open(&self.stream.rtsp, &self.media_options),
            )
            .await
            .ok_or(Exit::Cancelled)??;

        tracing::debug!(
            stream = %self.stream.name,
            tracks = feed.tracks.len(),
            "[StreamSession] Media source opened"
        );

        let peer = cancel
            .run_until_cancelled(self.backends.engine.create_peer(&self.peer_setup, feed))
            .await
            .ok_or(Exit::Cancelled)??;
        let peer = conn.peer.insert(peer);

        let offer = cancel
            .run_until_cancelled(peer.create_offer())
            .await
            .ok_or(Exit::Cancelled)??;

        let signaling_timeout = self.timeouts.signaling;
        let negotiation = cancel
            .run_until_cancelled(tokio::time::timeout(
                signaling_timeout,
                self.backends.signaling.negotiate(&offer, &self.endpoint),
            ))
            .await
            .ok_or(Exit::Cancelled)?
            .map_err(|_| {
                StreamError::Signaling(format!(
                    "WHIP exchange timed out after {}ms",
                    signaling_timeout.as_millis()
                ))
            })??;

        conn.resource = negotiation.resource;
        if let Some(resource) = &conn.resource {
            tracing::debug!(stream = %self.stream.name, resource = %resource, "[StreamSession] WHIP session created");
        }

        cancel
            .run_until_cancelled(peer.apply_answer(&negotiation.answer_sdp))
            .await
            .ok_or(Exit::Cancelled)??;

        let connect_timeout = self.timeouts.connect;
        let deadline = tokio::time::Instant::now() + connect_timeout;
        let mut channel_ready = false;

        loop {
            let event = cancel
                .run_until_cancelled(tokio::time::timeout_at(deadline, peer.next_event()))
                .await
                .ok_or(Exit::Cancelled)?
                .map_err(|_| {
                    StreamError::Transport(format!(
                        "not connected after {}ms",
                        connect_timeout.as_millis()
                    ))
                })?;

            match event {
                Some(PeerEvent::Connected) => return Ok(channel_ready),
                Some(PeerEvent::MetaChannelOpen) => channel_ready = true,
                Some(PeerEvent::Disconnected) => {
                    tracing::debug!(stream = %self.stream.name, "[StreamSession] Disconnected while connecting");
                }
                other => return Err(Exit::Failed(peer_failure(other))),
            }
        }
    }

    /// Streaming phase: forwards until the peer or the source gives up.
    async fn stream(
        &mut self,
        conn: &mut Connection<E::Peer>,
        cancel: &CancellationToken,
        channel_ready: bool,
    ) -> Exit {
        let Some(peer) = conn.peer.as_mut() else {
            return Exit::Failed(StreamError::Transport("no peer connection".into()));
        };

        self.attempt = 0;
        self.connections += 1;
        self.enter(SessionPhase::Streaming);
        tracing::info!(stream = %self.stream.name, "[StreamSession] Streaming");

        if channel_ready {
            self.send_meta(peer, cancel).await;
        }

        loop {
            let Some(event) = cancel.run_until_cancelled(peer.next_event()).await else {
                return Exit::Cancelled;
            };

            match event {
                Some(PeerEvent::MetaChannelOpen) => {
                    if !self.meta_sent {
                        self.send_meta(peer, cancel).await;
                    }
                }
                Some(PeerEvent::Connected) => {}
                Some(PeerEvent::Disconnected) => {
                    tracing::warn!(stream = %self.stream.name, "[StreamSession] Peer disconnected, waiting for recovery");
                }
                other => return Exit::Failed(peer_failure(other)),
            }
        }
    }

    /// One delivery attempt per connection. Failures are logged, not retried.
    async fn send_meta(&mut self, peer: &mut E::Peer, cancel: &CancellationToken) {
        let payload = build_meta_payload(&self.stream, SystemTime::now());
        let meta_timeout = self.timeouts.meta_send;

        match cancel
            .run_until_cancelled(tokio::time::timeout(meta_timeout, peer.send_meta(&payload)))
            .await
        {
            None => {}
            Some(Ok(Ok(()))) => {
                self.meta_sent = true;
                self.status.send_modify(|status| status.meta_sent = true);
                tracing::info!(stream = %self.stream.name, "[StreamSession] Metadata sent");
            }
            Some(Ok(Err(e))) => {
                tracing::warn!(stream = %self.stream.name, "[StreamSession] Metadata not sent: {}", e);
            }
            Some(Err(_)) => {
                tracing::warn!(
                    stream = %self.stream.name,
                    "[StreamSession] Metadata send timed out after {}ms",
                    meta_timeout.as_millis()
                );
            }
        }
    }

    /// Closes the peer (and with it the media source), then deletes the WHIP
    /// resource. Each step is bounded by the terminate timeout.
    async fn release(&self, conn: Connection<E::Peer>) {
        let terminate_timeout = self.timeouts.terminate;

        if let Some(peer) = conn.peer {
            if tokio::time::timeout(terminate_timeout, peer.close())
                .await
                .is_err()
            {
                tracing::warn!(stream = %self.stream.name, "[StreamSession] Peer close timed out");
            }
        }

        if let Some(resource) = conn.resource {
            if tokio::time::timeout(
                terminate_timeout,
                self.backends.signaling.terminate(&resource),
            )
            .await
            .is_err()
            {
                tracing::warn!(
                    stream = %self.stream.name,
                    resource = %resource,
                    "[StreamSession] WHIP DELETE timed out"
                );
            }
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        let from = self.phase;
        self.phase = phase;

        tracing::debug!(
            stream = %self.stream.name,
            from = %from,
            to = %phase,
            attempt = self.attempt,
            "[StreamSession] Phase change"
        );

        let (attempt, meta_sent, connections) = (self.attempt, self.meta_sent, self.connections);
        self.status.send_modify(|status| {
            status.phase = phase;
            status.attempt = attempt;
            status.meta_sent = meta_sent;
            status.connections = connections;
        });

        if let Some(tx) = &self.transitions {
            let _ = tx.send(SessionTransition {
                from,
                to: phase,
                attempt,
            });
        }
    }
}

fn peer_failure(event: Option<PeerEvent>) -> StreamError {
    match event {
        Some(PeerEvent::Failed(reason)) => StreamError::Transport(reason),
        Some(PeerEvent::SourceEnded) => StreamError::MediaSource("source ended".into()),
        Some(PeerEvent::SourceFailed(reason)) => StreamError::MediaSource(reason),
        Some(PeerEvent::Closed) | None => {
            StreamError::Transport("peer connection closed".into())
        }
        Some(other) => StreamError::Transport(format!("unexpected peer event {:?}", other)),
    }
}
