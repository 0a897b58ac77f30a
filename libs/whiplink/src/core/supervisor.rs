// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Supervisor
//
// One task per configured stream. Sessions share nothing mutable: a failing
// or panicking session never touches its siblings, and shutdown fans out
// through child cancellation tokens.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config::AppConfig;
use crate::core::session::{
    SessionBackends, SessionPhase, SessionReport, SessionStatus, StreamSession,
};
use crate::core::transport::{MediaSource, PeerEngine};
use crate::core::whip::Signaling;

/// A running session: its task and its published status.
pub struct SessionHandle {
    name: String,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Stops this session only.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Sessions that stopped normally, in name order.
    pub sessions: Vec<SessionReport>,
    /// Sessions whose task panicked or was aborted.
    pub crashed: Vec<String>,
}

pub struct Supervisor {
    sessions: BTreeMap<String, SessionHandle>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Spawns one session per stream in `config`. Each session runs on a
    /// child of `cancel`.
    pub fn spawn<M, E, S>(
        config: Arc<AppConfig>,
        backends: SessionBackends<M, E, S>,
        cancel: &CancellationToken,
    ) -> Self
    where
        M: MediaSource,
        E: PeerEngine,
        S: Signaling,
    {
        let cancel = cancel.child_token();
        let mut sessions = BTreeMap::new();

        for stream in &config.streams {
            let session = StreamSession::new(stream.clone(), &config, backends.clone());
            let status = session.subscribe();
            let session_cancel = cancel.child_token();
            let task = tokio::spawn(session.run(session_cancel.clone()));

            sessions.insert(
                stream.name.clone(),
                SessionHandle {
                    name: stream.name.clone(),
                    status,
                    cancel: session_cancel,
                    task,
                },
            );
        }

        tracing::info!(
            streams = sessions.len(),
            "[Supervisor] Started {} stream session(s)",
            sessions.len()
        );

        Self { sessions, cancel }
    }

    pub fn session(&self, name: &str) -> Option<&SessionHandle> {
        self.sessions.get(name)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    /// Names of sessions currently in `phase`.
    pub fn in_phase(&self, phase: SessionPhase) -> Vec<String> {
        self.sessions
            .values()
            .filter(|handle| handle.status().phase == phase)
            .map(|handle| handle.name.clone())
            .collect()
    }

    /// Requests every session to stop.
    pub fn shutdown(&self) {
        tracing::info!("[Supervisor] Shutdown requested");
        self.cancel.cancel();
    }

    /// Waits for every session task to finish. Does not cancel anything by
    /// itself.
    pub async fn wait(self) -> SupervisorReport {
        let mut report = SupervisorReport::default();

        for (name, handle) in self.sessions {
            match handle.task.await {
                Ok(session_report) => report.sessions.push(session_report),
                Err(e) => {
                    tracing::error!(stream = %name, "[Supervisor] Session task crashed: {}", e);
                    report.crashed.push(name);
                }
            }
        }

        tracing::info!(
            stopped = report.sessions.len(),
            crashed = report.crashed.len(),
            "[Supervisor] All sessions stopped"
        );

        report
    }

    /// Spawns every session and runs until `cancel` fires and all of them
    /// have stopped.
    pub async fn run<M, E, S>(
        config: Arc<AppConfig>,
        backends: SessionBackends<M, E, S>,
        cancel: CancellationToken,
    ) -> SupervisorReport
    where
        M: MediaSource,
        E: PeerEngine,
        S: Signaling,
    {
        Self::spawn(config, backends, &cancel).wait().await
    }
}
