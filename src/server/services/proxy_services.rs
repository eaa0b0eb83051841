use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use url::Url;

use crate::{
    cache::{CredentialGrant, MemoryCache},
    config::AppConfig,
    server::{
        services::{
            catalog_services::{CatalogService, DynCatalogService},
            credential_services::{ClientIdentity, CredentialManager, DynAuthClient, HttpAuthClient},
            playlist_services::PlaylistService,
            relay_services::RelayService,
        },
        utils::signature_utils::SignatureUtil,
    },
};

/// everything a handler can reach, cloned into every request through the extension layer
#[derive(Clone)]
pub struct ProxyServices {
    pub credentials: Arc<CredentialManager>,
    pub catalog: DynCatalogService,
    pub playlists: Arc<PlaylistService>,
    pub relay: Arc<RelayService>,
    pub config: Arc<AppConfig>,
}

impl ProxyServices {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        info!("starting proxy services...");

        let auth = Arc::new(
            HttpAuthClient::new(
                config.auth_url.clone(),
                &config.auth_user_agent,
                config.playlist_timeout(),
            )
            .context("failed to build the auth client")?,
        ) as DynAuthClient;

        let http = Self::origin_client(&config)?;

        let catalog = Arc::new(CatalogService::new(
            http.clone(),
            config.catalog_url.clone(),
            config.catalog_api_key.clone(),
            config.cache_ttl(),
            config.playlist_timeout(),
        )) as DynCatalogService;

        Self::with_clients(config, http, auth, catalog)
    }

    /// same wiring as `new` with the upstream-facing clients swapped in, tests use this
    pub fn with_clients(
        config: Arc<AppConfig>,
        http: reqwest::Client,
        auth: DynAuthClient,
        catalog: DynCatalogService,
    ) -> anyhow::Result<Self> {
        let origin = Url::parse(&config.origin_url).context("ORIGIN_URL is not a valid url")?;

        let signature_util = Arc::new(SignatureUtil::new(
            config.signing_secret.clone(),
            config.signature_window_seconds,
        ));

        let credentials = Arc::new(CredentialManager::new(
            auth,
            signature_util.clone(),
            ClientIdentity {
                app_id: config.app_id.clone(),
                device_id: config.client_identity.clone(),
                hardware: config.hardware.clone(),
                version: config.client_version.clone(),
            },
            config.session_window(),
        ));

        info!("credential manager ok, starting playlist and relay services...");

        let grants: Arc<MemoryCache<CredentialGrant>> =
            Arc::new(MemoryCache::new(config.cache_ttl()));

        let playlists = Arc::new(PlaylistService::new(
            http.clone(),
            credentials.clone(),
            grants.clone(),
            signature_util,
            config.client_identity.clone(),
            origin.clone(),
            config.playlist_timeout(),
        ));

        let relay = Arc::new(RelayService::new(
            http,
            credentials.clone(),
            grants,
            origin,
            config.segment_timeout(),
        ));

        Ok(Self {
            credentials,
            catalog,
            playlists,
            relay,
            config,
        })
    }

    pub fn origin_client(config: &AppConfig) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build the origin http client")
    }
}
