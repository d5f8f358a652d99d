use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TokenConfig;
use crate::error::CaptureError;

const GQL_API_URL: &str = "https://gql.twitch.tv/gql";
// Public web player client id; requests without it are rejected.
const CLIENT_ID: &str = "kimne78kx3ncx6brgo4mv6wki5h1ko";
const PLAYBACK_ACCESS_TOKEN_HASH: &str =
    "0828119ded1c13477966434e15800ff57ddacf13ba1911c129dc2200705b0712";

/// Signed playback credential for one channel. Immutable once issued;
/// superseded, never mutated, on each new "went live" event.
#[derive(Debug, Clone)]
pub struct PlaybackToken {
    /// Opaque token document, passed through verbatim in the manifest URL.
    pub value: String,
    pub signature: String,
    pub channel_id: String,
}

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn acquire(&self, login: &str) -> Result<PlaybackToken, CaptureError>;
}

pub struct TokenProvider {
    http_client: Client,
    config: Arc<TokenConfig>,
    headers: HeaderMap,
}

#[derive(Debug, Deserialize)]
struct GqlTokenResponse {
    data: GqlTokenData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlTokenData {
    stream_playback_access_token: Option<AccessTokenFields>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenFields {
    value: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct TokenValue {
    channel_id: serde_json::Value,
}

impl TokenProvider {
    pub fn new(http_client: Client, config: Arc<TokenConfig>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("Client-Id", HeaderValue::from_static(CLIENT_ID));
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
        headers.insert(
            "device-id",
            Self::device_id().parse().expect("digits are a valid header"),
        );
        Self {
            http_client,
            config,
            headers,
        }
    }

    // random device id of 16 digits
    fn device_id() -> String {
        format!(
            "{}",
            rand::rng().random_range(1000000000000000i64..9999999999999999i64)
        )
    }

    fn build_persisted_query_request(
        operation_name: &str,
        sha256_hash: &str,
        variables: serde_json::Value,
    ) -> String {
        serde_json::json!({
            "operationName": operation_name,
            "extensions": {
                "persistedQuery": {
                    "version": 1,
                    "sha256Hash": sha256_hash,
                }
            },
            "variables": variables,
        })
        .to_string()
    }

    async fn request_token(&self, login: &str) -> Result<PlaybackToken, CaptureError> {
        let body = Self::build_persisted_query_request(
            "PlaybackAccessToken",
            PLAYBACK_ACCESS_TOKEN_HASH,
            serde_json::json!({
                "isLive": true,
                "login": login,
                "isVod": false,
                "vodID": "",
                "playerType": "frontpage",
            }),
        );

        let response = self
            .http_client
            .post(GQL_API_URL)
            .headers(self.headers.clone())
            .timeout(self.config.request_timeout)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CaptureError::Auth(format!(
                "token request failed: HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        debug!("token response body: {body}");
        let parsed: GqlTokenResponse = serde_json::from_str(&body)
            .map_err(|e| CaptureError::Auth(format!("malformed token response: {e}")))?;
        let fields = parsed
            .data
            .stream_playback_access_token
            .ok_or_else(|| CaptureError::Auth("no streamPlaybackAccessToken".to_string()))?;

        // The token value is itself a JSON document carrying the channel id.
        let inner: TokenValue = serde_json::from_str(&fields.value)
            .map_err(|e| CaptureError::Auth(format!("malformed token value: {e}")))?;
        let channel_id = match inner.channel_id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(CaptureError::Auth(format!(
                    "unexpected channel_id in token value: {other}"
                )));
            }
        };

        Ok(PlaybackToken {
            value: fields.value,
            signature: fields.signature,
            channel_id,
        })
    }
}

#[async_trait]
impl AccessTokenProvider for TokenProvider {
    /// Issues the playback-token request with bounded retry and
    /// exponential backoff.
    async fn acquire(&self, login: &str) -> Result<PlaybackToken, CaptureError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.request_token(login).await {
                Ok(token) => {
                    debug!(login, channel_id = %token.channel_id, "acquired playback token");
                    return Ok(token);
                }
                Err(e) if attempts > self.config.max_retries => {
                    return Err(CaptureError::Auth(format!(
                        "token request failed after {} retries: {e}",
                        self.config.max_retries
                    )));
                }
                Err(e) => {
                    warn!(login, attempt = attempts, error = %e, "token request failed, retrying");
                }
            }
            let delay = self.config.retry_delay_base * 2_u32.pow(attempts.saturating_sub(1));
            tokio::time::sleep(delay).await;
        }
    }
}
