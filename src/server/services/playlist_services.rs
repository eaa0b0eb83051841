// fetches origin playlists with the session attached and hands them to the rewriter
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header;
use tracing::{debug, error, warn};
use url::Url;

use crate::cache::{CredentialGrant, MemoryCache, grant_key};
use crate::server::{
    error::{AppResult, Error},
    services::credential_services::CredentialManager,
    utils::{
        compression_utils::ContentEncoding,
        manifest_utils::{RewriteContext, RewrittenPlaylist, rewrite_playlist},
        pointer_utils::{ManifestPointer, directory_of},
        signature_utils::{SignatureUtil, unix_now},
    },
};

/// we decode these ourselves, see compression_utils
const UPSTREAM_ACCEPT_ENCODING: &str = "gzip, zstd";

pub struct PlaylistService {
    http: reqwest::Client,
    credentials: Arc<CredentialManager>,
    grants: Arc<MemoryCache<CredentialGrant>>,
    signer: Arc<SignatureUtil>,
    identity: String,
    origin: Url,
    timeout: Duration,
}

impl PlaylistService {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<CredentialManager>,
        grants: Arc<MemoryCache<CredentialGrant>>,
        signer: Arc<SignatureUtil>,
        identity: String,
        origin: Url,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            credentials,
            grants,
            signer,
            identity,
            origin,
            timeout,
        }
    }

    pub fn store_grant(&self, playlist_url: &Url, grant: CredentialGrant) {
        self.grants.put(grant_key(playlist_url.as_str()), grant);
    }

    pub fn grant_for(&self, playlist_url: &Url) -> Option<Arc<CredentialGrant>> {
        self.grants.get(&grant_key(playlist_url.as_str()))
    }

    /// Fetches `playlist_url` and rewrites it for `proxy_base`. Needs a grant stored for the
    /// url first, otherwise it's a 404 before anything goes upstream.
    pub async fn proxy_playlist(
        &self,
        playlist_url: &Url,
        proxy_base: &str,
    ) -> AppResult<RewrittenPlaylist> {
        let grant = self
            .grant_for(playlist_url)
            .ok_or_else(|| Error::NotFound("Token not found".to_string()))?;

        let text = self.fetch_playlist(playlist_url, &grant).await?;

        let rewritten = rewrite_playlist(
            &text,
            &RewriteContext {
                playlist_url,
                origin: &self.origin,
                proxy_base,
            },
        )?;

        self.propagate_grant(&rewritten.pointers, &grant);

        Ok(rewritten)
    }

    /// raw playlist text, signed and carrying the current session
    pub async fn fetch_playlist(
        &self,
        playlist_url: &Url,
        grant: &CredentialGrant,
    ) -> AppResult<String> {
        let session = self.credentials.get_valid_session().await?;

        let mut signed_url = playlist_url.clone();
        signed_url.query_pairs_mut().extend_pairs(self.signer.playlist_query(
            playlist_url.path(),
            &self.identity,
            unix_now(),
        ));

        debug!("Fetching playlist: {}", playlist_url);

        let response = self
            .http
            .get(signed_url)
            .timeout(self.timeout)
            .headers(session.upstream_headers())
            .headers(grant.upstream_headers())
            .header(header::ACCEPT_ENCODING, UPSTREAM_ACCEPT_ENCODING)
            .send()
            .await
            .map_err(|e| {
                error!("Playlist request failed: {}", e);
                Error::from_upstream(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Playlist upstream returned {} for {}", status, playlist_url);
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                self.credentials.invalidate(&session);
            }
            return Err(Error::UpstreamRejected(status));
        }

        let encoding = ContentEncoding::from_content_encoding(
            response
                .headers()
                .get(header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        let bytes = response.bytes().await.map_err(|e| {
            error!("Failed to read playlist body: {}", e);
            Error::from_upstream(e)
        })?;

        let decoded = encoding.decompress(&bytes).map_err(|e| {
            error!("Failed to decompress playlist with {:?}: {}", encoding, e);
            Error::UpstreamUnavailable("Failed to decompress playlist".to_string())
        })?;

        // binary garbage is as much "not a playlist" as an html error page
        String::from_utf8(decoded).map_err(|_| {
            warn!("Playlist body from {} isn't utf-8", playlist_url);
            Error::NotAPlaylist
        })
    }

    /// nested playlists and segment directories inherit the grant of the playlist they came from
    fn propagate_grant(&self, pointers: &[ManifestPointer], grant: &CredentialGrant) {
        let mut scopes = HashSet::new();

        for pointer in pointers {
            let Ok(target) = pointer.resolve(&self.origin) else {
                continue;
            };

            let scope = if pointer.is_playlist() {
                target.to_string()
            } else {
                directory_of(&target)
            };

            if scopes.insert(scope.clone()) {
                self.grants.put(grant_key(&scope), grant.clone());
            }
        }

        debug!("Stored grant for {} scopes", scopes.len());
    }
}
