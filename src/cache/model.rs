use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// these mirror the catalog api (`?action=get_channels` / `?action=get_play_info`), the
/// envelopes are only used for parsing and the inner types are what ends up cached

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayInfo {
    pub m3u8_url: String,
    #[serde(default)]
    pub fftoken: String,
    #[serde(default)]
    pub playtoken: String,
}

impl PlayInfo {
    pub fn grant(&self) -> CredentialGrant {
        CredentialGrant {
            fftoken: self.fftoken.clone(),
            playtoken: self.playtoken.clone(),
        }
    }
}

/// the minimal pair the origin wants next to the session headers for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialGrant {
    pub fftoken: String,
    pub playtoken: String,
}

impl CredentialGrant {
    /// `fftoken` / `playtoken`, empty values are left off
    pub fn upstream_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [("fftoken", &self.fftoken), ("playtoken", &self.playtoken)] {
            if value.is_empty() {
                continue;
            }
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        headers
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogChannels {
    #[serde(default)]
    pub channels: Vec<Channel>,
}
