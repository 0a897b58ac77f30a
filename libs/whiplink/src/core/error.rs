// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Media source error: {0}")]
    MediaSource(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Short label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Config(_) => "config",
            StreamError::MediaSource(_) => "media_source",
            StreamError::Signaling(_) => "signaling",
            StreamError::Transport(_) => "transport",
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
