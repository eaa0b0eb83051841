// streams segments back to the player with the current session reattached
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{Stream, StreamExt};
use tracing::{debug, error, warn};
use url::Url;

use crate::cache::{CredentialGrant, MemoryCache, grant_key};
use crate::server::{
    error::{AppResult, Error},
    services::credential_services::CredentialManager,
    utils::pointer_utils::{ManifestPointer, directory_of, is_absolute_http, parse_http_url},
};

const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=30";

/// An upstream response that already passed the status check. Only headers have been read,
/// the body is streamed through once this turns into a response.
pub struct RelayedSegment {
    pub status: StatusCode,
    pub headers: HeaderMap,
    upstream: reqwest::Response,
    idle_timeout: Duration,
}

impl RelayedSegment {
    fn from_upstream(upstream: reqwest::Response, idle_timeout: Duration) -> Self {
        let status = upstream.status();
        let upstream_headers = upstream.headers();
        let mut headers = HeaderMap::new();

        let content_type = upstream_headers
            .get(header::CONTENT_TYPE)
            .filter(|v| {
                v.to_str()
                    .map(|ct| ct.starts_with("video/") || ct.starts_with("audio/"))
                    .unwrap_or(false)
            })
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_SEGMENT_CONTENT_TYPE));

        headers.insert(header::CONTENT_TYPE, content_type);
        if status.is_success() {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(SEGMENT_CACHE_CONTROL),
            );
        }

        let accept_ranges = upstream_headers
            .get(header::ACCEPT_RANGES)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("bytes"));
        headers.insert(header::ACCEPT_RANGES, accept_ranges);

        // range responses have to keep exactly what the origin said
        for name in [header::CONTENT_RANGE, header::CONTENT_LENGTH] {
            if let Some(value) = upstream_headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }

        Self {
            status,
            headers,
            upstream,
            idle_timeout,
        }
    }
}

impl IntoResponse for RelayedSegment {
    fn into_response(self) -> Response {
        let body = Body::from_stream(idle_bounded(self.upstream.bytes_stream(), self.idle_timeout));
        (self.status, self.headers, body).into_response()
    }
}

/// Ends the stream with an error once the origin goes quiet for longer than `idle`, so a
/// stalled origin can't hold the player connection open.
fn idle_bounded<S>(stream: S, idle: Duration) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    futures::stream::unfold(Some(Box::pin(stream)), move |state| async move {
        let mut stream = state?;

        match tokio::time::timeout(idle, stream.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(stream))),
            Ok(Some(Err(e))) => {
                error!("Segment body failed mid-stream: {}", e);
                Some((Err(io::Error::other(e)), None))
            }
            Ok(None) => None,
            Err(_) => {
                warn!("Segment origin stalled for {:?}, closing", idle);
                Some((
                    Err(io::Error::new(io::ErrorKind::TimedOut, "segment origin stalled")),
                    None,
                ))
            }
        }
    })
}

pub struct RelayService {
    http: reqwest::Client,
    credentials: Arc<CredentialManager>,
    grants: Arc<MemoryCache<CredentialGrant>>,
    origin: Url,
    timeout: Duration,
}

impl RelayService {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<CredentialManager>,
        grants: Arc<MemoryCache<CredentialGrant>>,
        origin: Url,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            credentials,
            grants,
            origin,
            timeout,
        }
    }

    /// `ts=` takes either a pointer or a plain absolute url
    pub fn resolve_target(&self, raw: &str) -> AppResult<Url> {
        if is_absolute_http(raw) {
            return parse_http_url(raw);
        }

        let pointer = ManifestPointer::decode(raw)?;
        if pointer.is_playlist() {
            return Err(Error::InvalidPointer(
                "expected a segment pointer, got a playlist".to_string(),
            ));
        }

        pointer.resolve(&self.origin)
    }

    /// Resolves, fetches and hands back the upstream response without reading its body.
    /// A bad pointer fails before any upstream call is made.
    pub async fn relay(&self, raw: &str, range: Option<&HeaderValue>) -> AppResult<RelayedSegment> {
        let target = self.resolve_target(raw)?;

        // always the current session, never whatever the playlist was fetched with
        let session = self.credentials.get_valid_session().await?;

        let mut request = self
            .http
            .get(target.clone())
            .headers(session.upstream_headers());

        if let Some(grant) = self.grants.get(&grant_key(&directory_of(&target))) {
            request = request.headers(grant.upstream_headers());
        }

        if let Some(range) = range {
            debug!("Forwarding range {:?} for {}", range, target);
            request = request.header(header::RANGE, range.clone());
        }

        // bounds the wait for headers, the body gets the same bound per chunk
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| {
                error!("Segment fetch timed out: {}", target);
                Error::UpstreamUnavailable("segment fetch timed out".to_string())
            })?
            .map_err(|e| {
                error!("Segment request failed: {}", e);
                Error::from_upstream(e)
            })?;

        let status = response.status();

        // a 416 carries the Content-Range the player needs to recover, so it goes through as is
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!("Origin can't satisfy range for {}", target);
            return Ok(RelayedSegment::from_upstream(response, self.timeout));
        }

        if !status.is_success() {
            error!("Segment upstream returned {} for {}", status, target);
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                self.credentials.invalidate(&session);
            }
            return Err(Error::UpstreamRejected(status));
        }

        debug!("Relaying segment {} with status {}", target, status);
        Ok(RelayedSegment::from_upstream(response, self.timeout))
    }
}
