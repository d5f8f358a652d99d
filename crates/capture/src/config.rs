use std::path::PathBuf;
use std::time::Duration;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    pub token_config: TokenConfig,
    pub poll_config: PollConfig,
    pub fetcher_config: FetcherConfig,
    pub pubsub_config: PubSubConfig,
    pub output_config: OutputConfig,
}

// --- Token Configuration ---
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay_base: Duration, // Base for exponential backoff
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            max_retries: 3,
            retry_delay_base: Duration::from_millis(500),
        }
    }
}

// --- Poll Configuration ---
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub poll_interval: Duration,
    pub playlist_fetch_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            playlist_fetch_timeout: Duration::from_secs(15),
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub segment_download_timeout: Duration,
    pub max_segment_retries: u32,
    pub segment_retry_delay_base: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            segment_download_timeout: Duration::from_secs(10),
            max_segment_retries: 3,
            segment_retry_delay_base: Duration::from_millis(500),
        }
    }
}

// --- PubSub Configuration ---
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub endpoint: String,
    pub keepalive_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://pubsub-edge.twitch.tv".to_string(),
            keepalive_interval: Duration::from_secs(3 * 60),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

// --- Output Configuration ---
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Root directory under which per-session directories are created.
    pub root_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./sequences"),
        }
    }
}
