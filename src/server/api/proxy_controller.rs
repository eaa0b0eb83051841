// everything the player talks to goes through the one route, the query decides what happens
use axum::{
    Json, Router,
    extract::Query,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::Channel;
use crate::server::{
    error::{AppResult, Error},
    extractors::ProxyContext,
    services::{ProxyServices, catalog_services::render_channel_m3u},
    utils::{
        compression_utils::ContentEncoding,
        pointer_utils::{ManifestPointer, is_absolute_http, parse_http_url},
    },
};

const M3U8_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

static CHANNEL_ID_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("channel id filter is a valid regex"));

#[derive(Deserialize)]
struct ProxyQuery {
    action: Option<String>,
    format: Option<String>,
    id: Option<String>,
    m3u8: Option<String>,
    ts: Option<String>,
}

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        Router::new().route("/", get(Self::proxy_get).options(Self::proxy_options))
    }

    async fn proxy_get(
        ProxyContext(proxy_base, services): ProxyContext,
        Query(params): Query<ProxyQuery>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        if let Some(action) = params.action.as_deref() {
            return match action {
                "list" => Ok(Self::channel_list(&services, &proxy_base, params.format.as_deref()).await),
                other => Err(Error::BadRequest(format!("Unknown action: {}", other))),
            };
        }

        if let Some(ts) = params.ts.as_deref() {
            return Self::relay_segment(&services, ts, &headers).await;
        }

        if let Some(m3u8) = params.m3u8.as_deref() {
            return Self::proxy_playlist(&services, &proxy_base, m3u8, &headers).await;
        }

        if let Some(id) = params.id.as_deref() {
            return Self::resolve_channel(&services, &proxy_base, id).await;
        }

        Err(Error::BadRequest(
            "Missing id, m3u8, ts or action parameter".to_string(),
        ))
    }

    /// preflight for any route, cors headers get added by the router
    pub async fn proxy_options() -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }

    async fn channel_list(services: &ProxyServices, proxy_base: &str, format: Option<&str>) -> Response {
        let channels = services.catalog.channels().await;
        debug!("Serving {} channels (format={:?})", channels.len(), format);

        if format == Some("json") {
            let channels: Vec<&Channel> = channels.iter().map(|c| c.as_ref()).collect();
            return Json(channels).into_response();
        }

        (
            [(header::CONTENT_TYPE, M3U8_CONTENT_TYPE)],
            render_channel_m3u(&channels, proxy_base),
        )
            .into_response()
    }

    async fn resolve_channel(services: &ProxyServices, proxy_base: &str, raw_id: &str) -> AppResult<Response> {
        let id = CHANNEL_ID_FILTER.replace_all(raw_id, "");
        if id.is_empty() {
            return Err(Error::BadRequest("Missing id".to_string()));
        }

        let info = services.catalog.play_info(&id).await.map_err(|e| {
            warn!("Channel {} could not be resolved: {}", id, e);
            Error::NotFound("Channel Info Error".to_string())
        })?;

        let playlist_url = parse_http_url(&info.m3u8_url).map_err(|e| {
            error!("Catalog gave channel {} a bad playlist url: {}", id, e);
            Error::NotFound("Channel Info Error".to_string())
        })?;

        services.playlists.store_grant(&playlist_url, info.grant());
        info!("Resolved channel {} to {}", id, playlist_url);

        let location = format!(
            "{}?m3u8={}",
            proxy_base,
            urlencoding::encode(playlist_url.as_str())
        );

        Self::found(&location)
    }

    async fn proxy_playlist(
        services: &ProxyServices,
        proxy_base: &str,
        m3u8: &str,
        headers: &HeaderMap,
    ) -> AppResult<Response> {
        let playlist_url = Self::decode_playlist_param(m3u8)?;
        debug!("Proxying playlist: {}", playlist_url);

        match services.playlists.proxy_playlist(&playlist_url, proxy_base).await {
            Ok(rewritten) => Self::build_m3u8_response(&rewritten.body, headers),
            Err(Error::NotAPlaylist) => {
                warn!(
                    "Upstream for {} isn't a playlist, sending the fallback",
                    playlist_url
                );
                Self::found(&services.config.fallback_url)
            }
            Err(e) => Err(e),
        }
    }

    async fn relay_segment(services: &ProxyServices, ts: &str, headers: &HeaderMap) -> AppResult<Response> {
        let segment = services.relay.relay(ts, headers.get(header::RANGE)).await?;
        Ok(segment.into_response())
    }

    /// `m3u8=` is either a plain (already percent-decoded) url or a playlist pointer
    fn decode_playlist_param(value: &str) -> AppResult<Url> {
        if is_absolute_http(value) {
            return parse_http_url(value);
        }

        match ManifestPointer::decode(value)? {
            ManifestPointer::Playlist { url } => parse_http_url(&url),
            ManifestPointer::Segment { .. } => Err(Error::InvalidPointer(
                "expected a playlist pointer, got a segment".to_string(),
            )),
        }
    }

    fn found(location: &str) -> AppResult<Response> {
        let location = HeaderValue::from_str(location).map_err(|_| {
            Error::InternalServerErrorWithContext(format!("bad redirect location: {}", location))
        })?;

        Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
    }

    /// rewritten playlist, compressed if the player asked for it
    fn build_m3u8_response(body: &str, headers: &HeaderMap) -> AppResult<Response> {
        let encoding = ContentEncoding::from_accept_encoding(
            headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(M3U8_CONTENT_TYPE),
        );
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let response_body = encoding.compress(body.as_bytes()).map_err(|e| {
            error!("Failed to compress response with {:?}: {}", encoding, e);
            Error::InternalServerErrorWithContext("Failed to compress response".to_string())
        })?;

        if let Some(enc_header) = encoding.as_header_value() {
            debug!(
                "Compressed M3U8 with {:?} from {} to {} bytes",
                encoding,
                body.len(),
                response_body.len()
            );
            response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(enc_header));
        }

        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(response_body.len()));

        Ok((StatusCode::OK, response_headers, response_body).into_response())
    }
}
