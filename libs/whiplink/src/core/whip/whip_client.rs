// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// WHIP (WebRTC-HTTP Ingestion Protocol) Client
//
// HTTP side of a WHIP session: POST the offer, read the answer, remember the
// Location resource, DELETE it on teardown.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{header, HeaderMap, Request, StatusCode};
use url::Url;

use super::{Signaling, WhipEndpoint, WhipNegotiation, WhipResource};
use crate::core::{Result, StreamError};

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 3;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

type HttpClient = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    BoxBody,
>;

// ============================================================================
// WHIP CLIENT
// ============================================================================

/// WHIP signaling client.
///
/// One client is shared by every stream session: the hyper client pools
/// connections internally and the struct holds no per-session state.
#[derive(Clone)]
pub struct WhipClient {
    /// HTTP client with HTTPS support
    http_client: HttpClient,

    /// Bound on the whole POST exchange, redirects and response body
    /// included.
    timeout: Duration,

    /// Bound on the DELETE request.
    terminate_timeout: Duration,
}

impl WhipClient {
    /// Creates a new WHIP client.
    pub fn new(timeout: Duration, terminate_timeout: Duration) -> Result<Self> {
        // Install rustls crypto provider if needed
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            // Losing the race against another installer is fine.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        // Build HTTPS connector using rustls with native CA roots
        let builder = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(
                    "[WhipClient] No system CA roots ({}), https endpoints will fail verification",
                    e
                );
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(
                    rustls::ClientConfig::builder()
                        .with_root_certificates(rustls::RootCertStore::empty())
                        .with_no_client_auth(),
                )
            }
        };

        let https = builder
            .https_or_http() // Allow http:// for local endpoints
            .enable_http1()
            .enable_http2()
            .build();

        let http_client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .pool_idle_timeout(Duration::from_secs(30))
                .build(https);

        tracing::debug!(
            timeout_ms = timeout.as_millis() as u64,
            "[WhipClient] HTTP client created"
        );

        Ok(Self {
            http_client,
            timeout,
            terminate_timeout,
        })
    }

    /// POSTs the offer, following redirects. Returns the URL that finally
    /// answered along with the response parts. The signaling timeout covers
    /// every hop together.
    async fn post_offer(
        &self,
        offer_sdp: &str,
        endpoint: &WhipEndpoint,
    ) -> Result<(Url, StatusCode, HeaderMap, Bytes)> {
        let mut url = Url::parse(&endpoint.url).map_err(|e| {
            StreamError::Signaling(format!("Invalid WHIP URL '{}': {}", endpoint.url, e))
        })?;

        for _ in 0..=MAX_REDIRECTS {
            let body = Full::new(Bytes::from(offer_sdp.to_owned()));
            let boxed_body = body.map_err(|never| match never {}).boxed();

            let mut req_builder = Request::builder()
                .method("POST")
                .uri(url.as_str())
                .header(header::CONTENT_TYPE, "application/sdp");

            if let Some(token) = &endpoint.auth_token {
                req_builder = req_builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }

            let req = req_builder.body(boxed_body).map_err(|e| {
                StreamError::Signaling(format!("Failed to build WHIP POST request: {}", e))
            })?;

            tracing::debug!(url = %url, "[WhipClient] POST offer ({} bytes)", offer_sdp.len());

            let (status, headers, body_bytes) = self.send(req).await?;

            if matches!(
                status,
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
            ) {
                let location = location_header(&headers).ok_or_else(|| {
                    StreamError::Signaling(format!("WHIP {} without Location header", status))
                })?;
                let next = url.join(location).map_err(|e| {
                    StreamError::Signaling(format!("Invalid redirect Location '{}': {}", location, e))
                })?;
                tracing::info!(from = %url, to = %next, "[WhipClient] Redirecting");
                url = next;
                continue;
            }

            return Ok((url, status, headers, body_bytes));
        }

        Err(StreamError::Signaling(format!(
            "WHIP POST exceeded {} redirects",
            MAX_REDIRECTS
        )))
    }

    /// Sends one request and collects the full response.
    async fn send(&self, req: Request<BoxBody>) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let response = self
            .http_client
            .request(req)
            .await
            .map_err(|e| StreamError::Signaling(format!("WHIP POST request failed: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = BodyExt::collect(response.into_body())
            .await
            .map_err(|e| {
                StreamError::Signaling(format!("Failed to read WHIP response body: {}", e))
            })?
            .to_bytes();

        Ok((status, headers, body_bytes))
    }

    /// Sends DELETE request to terminate WHIP session.
    async fn send_delete(&self, resource: &WhipResource) -> Result<StatusCode> {
        let body = Empty::<Bytes>::new();
        let boxed_body = body.map_err(|never| match never {}).boxed();

        let mut req_builder = Request::builder()
            .method("DELETE")
            .uri(resource.url().as_str());

        if let Some(token) = resource.auth_token() {
            req_builder = req_builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let req = req_builder.body(boxed_body).map_err(|e| {
            StreamError::Signaling(format!("Failed to build DELETE request: {}", e))
        })?;

        let response = tokio::time::timeout(self.terminate_timeout, self.http_client.request(req))
            .await
            .map_err(|_| StreamError::Signaling("WHIP DELETE timed out".into()))?
            .map_err(|e| StreamError::Signaling(format!("WHIP DELETE failed: {}", e)))?;

        Ok(response.status())
    }
}

impl Signaling for WhipClient {
    async fn negotiate(
        &self,
        offer_sdp: &str,
        endpoint: &WhipEndpoint,
    ) -> Result<WhipNegotiation> {
        let (url, status, headers, body_bytes) =
            tokio::time::timeout(self.timeout, self.post_offer(offer_sdp, endpoint))
                .await
                .map_err(|_| {
                    StreamError::Signaling(format!(
                        "WHIP POST timed out after {}ms",
                        self.timeout.as_millis()
                    ))
                })??;

        if !status.is_success() {
            let error_body = String::from_utf8_lossy(&body_bytes);
            return Err(StreamError::Signaling(format!(
                "WHIP POST failed ({}): {}",
                status,
                error_body.trim()
            )));
        }

        let answer_sdp = parse_sdp_answer(&body_bytes)?;

        let resource = match location_header(&headers) {
            Some(location) => {
                let resolved = resolve_location(&url, location)?;
                tracing::debug!(
                    "WHIP Location header: '{}' → session URL: '{}'",
                    location,
                    resolved
                );
                Some(WhipResource::new(resolved, endpoint.auth_token.clone()))
            }
            None => {
                tracing::warn!(
                    url = %url,
                    "[WhipClient] WHIP {} without Location header, session cannot be deleted",
                    status
                );
                None
            }
        };

        Ok(WhipNegotiation {
            answer_sdp,
            resource,
        })
    }

    async fn terminate(&self, resource: &WhipResource) {
        tracing::debug!(url = %resource, "[WhipClient] DELETE session");

        match self.send_delete(resource).await {
            Ok(status) if status.is_success() => {
                tracing::info!(url = %resource, "[WhipClient] WHIP session deleted");
            }
            Ok(status) => {
                tracing::warn!(
                    url = %resource,
                    "[WhipClient] DELETE returned {}, session may still exist server-side",
                    status
                );
            }
            Err(e) => {
                tracing::warn!(
                    url = %resource,
                    error = %e,
                    "[WhipClient] DELETE failed, server will expire the session"
                );
            }
        }
    }
}

fn location_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolves a `Location` value (absolute, host-relative or path-relative)
/// against the URL the offer was posted to.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url> {
    base.join(location).map_err(|e| {
        StreamError::Signaling(format!("Invalid WHIP Location '{}': {}", location, e))
    })
}

/// Validates a response body as an SDP answer.
pub fn parse_sdp_answer(body: &[u8]) -> Result<String> {
    let sdp = std::str::from_utf8(body)
        .map_err(|e| StreamError::Signaling(format!("Invalid UTF-8 in SDP answer: {}", e)))?;

    if !sdp.trim_start().starts_with("v=") {
        return Err(StreamError::Signaling(format!(
            "WHIP response is not an SDP answer ({} bytes)",
            body.len()
        )));
    }

    let mut cursor = std::io::Cursor::new(sdp.as_bytes());
    webrtc::sdp::SessionDescription::unmarshal(&mut cursor)
        .map_err(|e| StreamError::Signaling(format!("Malformed SDP answer: {}", e)))?;

    Ok(sdp.to_owned())
}

// ============================================================================
// TESTS
// ============================================================================
