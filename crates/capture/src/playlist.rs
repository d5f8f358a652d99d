use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::config::PollConfig;
use crate::error::CaptureError;
use crate::token::PlaybackToken;

const USHER_BASE_URL: &str = "https://usher.ttvnw.net/api/channel/hls";

/// Builds the usher manifest URL for a channel. Capability flags are fixed:
/// all rendition types allowed, no quality cap.
pub fn manifest_url(login: &str, token: &PlaybackToken) -> String {
    let base = format!("{USHER_BASE_URL}/{login}.m3u8");
    let url = Url::parse_with_params(
        &base,
        &[
            ("player", "twitchweb"),
            ("token", token.value.as_str()),
            ("sig", token.signature.as_str()),
            ("allow_source", "true"),
            ("allow_audio_only", "true"),
            ("allow_spectre", "true"),
            ("type", "any"),
            ("p", "0"),
        ],
    )
    .expect("usher base URL is valid");
    url.to_string()
}

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// Fetches the top-level manifest and returns its variant URLs in
    /// source order. The first entry is the selected rendition.
    async fn fetch_variants(&self, manifest_url: &str) -> Result<Vec<String>, CaptureError>;

    /// Fetches the raw live media playlist for a variant.
    async fn fetch_playlist(&self, variant_url: &str) -> Result<String, CaptureError>;
}

pub struct PlaylistResolver {
    http_client: Client,
    config: Arc<PollConfig>,
}

impl PlaylistResolver {
    pub fn new(http_client: Client, config: Arc<PollConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, CaptureError> {
        let response = self
            .http_client
            .get(url)
            .timeout(self.config.playlist_fetch_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CaptureError::SegmentFetch(format!(
                "playlist fetch failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl PlaylistSource for PlaylistResolver {
    async fn fetch_variants(&self, manifest_url: &str) -> Result<Vec<String>, CaptureError> {
        let manifest = self.fetch_text(manifest_url).await?;
        Ok(manifest
            .lines()
            .filter(|line| line.starts_with("https://"))
            .map(str::to_string)
            .collect())
    }

    async fn fetch_playlist(&self, variant_url: &str) -> Result<String, CaptureError> {
        self.fetch_text(variant_url).await
    }
}
