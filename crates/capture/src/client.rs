use reqwest::Client;
use std::time::Duration;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Shared HTTP client for token, playlist and segment requests.
pub fn default_client() -> Client {
    Client::builder()
        .user_agent(DEFAULT_UA)
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create HTTP client")
}
