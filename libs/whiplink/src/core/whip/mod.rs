// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// WHIP Signaling
//
// RFC 9725 offer/answer exchange over HTTP and session resource teardown.

mod whip_client;

pub use whip_client::{parse_sdp_answer, resolve_location, WhipClient};

use std::fmt;
use std::future::Future;

use url::Url;

use crate::core::Result;

/// Where to POST the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhipEndpoint {
    pub url: String,
    /// Optional Bearer token, sent on POST and DELETE.
    pub auth_token: Option<String>,
}

impl WhipEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }
}

/// Per-session resource created by a successful POST. Deleting it tells the
/// server the session is over; if it is never deleted the server expires it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhipResource {
    url: Url,
    auth_token: Option<String>,
}

impl WhipResource {
    pub fn new(url: Url, auth_token: Option<String>) -> Self {
        Self { url, auth_token }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}

impl fmt::Display for WhipResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Result of a successful offer/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhipNegotiation {
    pub answer_sdp: String,
    /// `None` when the server answered without a `Location` header.
    pub resource: Option<WhipResource>,
}

/// Signaling seam used by stream sessions.
pub trait Signaling: Send + Sync + 'static {
    /// POSTs `offer_sdp` and returns the answer plus the session resource.
    /// Fails with `StreamError::Signaling`.
    fn negotiate(
        &self,
        offer_sdp: &str,
        endpoint: &WhipEndpoint,
    ) -> impl Future<Output = Result<WhipNegotiation>> + Send;

    /// Best-effort DELETE of the session resource. Never fails; errors are
    /// logged.
    fn terminate(&self, resource: &WhipResource) -> impl Future<Output = ()> + Send;
}
