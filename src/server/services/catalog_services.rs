// channel list and channel -> playlist lookups against the catalog api
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::cache::{
    CHANNELS_LIST_KEY, CatalogChannels, CatalogResponse, Channel, MemoryCache, PlayInfo,
    play_info_key,
};
use crate::server::error::{AppResult, Error};

pub type DynCatalogService = Arc<dyn CatalogServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait CatalogServiceTrait {
    /// the whole channel list, empty when the catalog can't be reached
    async fn channels(&self) -> Vec<Arc<Channel>>;

    /// playlist url and grant for one channel
    async fn play_info(&self, channel_id: &str) -> AppResult<Arc<PlayInfo>>;
}

pub struct CatalogService {
    http: reqwest::Client,
    catalog_url: String,
    api_key: String,
    timeout: Duration,
    channels: MemoryCache<Vec<Arc<Channel>>>,
    play_info: MemoryCache<PlayInfo>,
}

impl CatalogService {
    pub fn new(
        http: reqwest::Client,
        catalog_url: String,
        api_key: String,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            catalog_url,
            api_key,
            timeout,
            channels: MemoryCache::new(ttl),
            play_info: MemoryCache::new(ttl),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> AppResult<T> {
        let response = self
            .http
            .get(&self.catalog_url)
            .query(params)
            .query(&[("api_key", self.api_key.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Error::from_upstream)?;

        if !response.status().is_success() {
            return Err(Error::UpstreamRejected(response.status()));
        }

        let parsed: CatalogResponse<T> = response.json().await.map_err(|e| {
            Error::UpstreamUnavailable(format!("failed to parse catalog response: {}", e))
        })?;

        match parsed.data {
            Some(data) if parsed.success => Ok(data),
            _ => Err(Error::NotFound("catalog returned success=false".to_string())),
        }
    }
}

#[async_trait]
impl CatalogServiceTrait for CatalogService {
    async fn channels(&self) -> Vec<Arc<Channel>> {
        if let Some(cached) = self.channels.get(CHANNELS_LIST_KEY) {
            debug!("channel list cache hit ({} channels)", cached.len());
            return cached.as_ref().clone();
        }

        match self
            .fetch::<CatalogChannels>(&[("action", "get_channels")])
            .await
        {
            Ok(data) => {
                info!("fetched {} channels from catalog", data.channels.len());
                let channels: Vec<Arc<Channel>> = data.channels.into_iter().map(Arc::new).collect();
                self.channels.put(CHANNELS_LIST_KEY, channels.clone());
                channels
            }
            Err(e) => {
                // the list is for people browsing, an empty one beats an error page
                error!("failed to fetch channel list: {}", e);
                Vec::new()
            }
        }
    }

    async fn play_info(&self, channel_id: &str) -> AppResult<Arc<PlayInfo>> {
        let key = play_info_key(channel_id);
        if let Some(cached) = self.play_info.get(&key) {
            debug!("play info cache hit for channel {}", channel_id);
            return Ok(cached);
        }

        let info: PlayInfo = self
            .fetch(&[("action", "get_play_info"), ("id", channel_id)])
            .await
            .map_err(|e| {
                error!("failed to resolve channel {}: {}", channel_id, e);
                e
            })?;

        if info.m3u8_url.is_empty() {
            return Err(Error::NotFound(format!(
                "channel {} has no playlist",
                channel_id
            )));
        }

        Ok(self.play_info.put(key, info))
    }
}

/// `#EXTM3U` listing where every channel points back at `<proxy_base>?id=<id>`
pub fn render_channel_m3u(channels: &[Arc<Channel>], proxy_base: &str) -> String {
    let mut m3u = String::from("#EXTM3U\n");

    for channel in channels {
        let logo = channel
            .logo
            .as_deref()
            .filter(|logo| !logo.is_empty())
            .map(|logo| format!(" tvg-logo=\"{}\"", logo))
            .unwrap_or_default();
        let group = channel
            .group
            .as_deref()
            .filter(|group| !group.is_empty())
            .map(|group| format!(" group-title=\"{}\"", group))
            .unwrap_or_default();

        m3u.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"{}\"{}{},{}\n",
            channel.id, logo, group, channel.title
        ));
        m3u.push_str(&format!(
            "{}?id={}\n",
            proxy_base,
            urlencoding::encode(&channel.id)
        ));
    }

    m3u
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_channels_with_optional_attributes() {
        let channels = vec![
            Arc::new(Channel {
                id: "cctv1".to_string(),
                title: "CCTV 1".to_string(),
                logo: Some("https://logo/1.png".to_string()),
                group: Some("News".to_string()),
            }),
            Arc::new(Channel {
                id: "local".to_string(),
                title: "Local".to_string(),
                logo: None,
                group: None,
            }),
        ];

        let m3u = render_channel_m3u(&channels, "/");

        assert_eq!(
            m3u,
            "#EXTM3U\n\
             #EXTINF:-1 tvg-id=\"cctv1\" tvg-logo=\"https://logo/1.png\" group-title=\"News\",CCTV 1\n\
             /?id=cctv1\n\
             #EXTINF:-1 tvg-id=\"local\",Local\n\
             /?id=local\n"
        );
    }
}
