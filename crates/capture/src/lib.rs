//! Single-channel Twitch live-capture engine.
//!
//! Captures the live stream of one channel by polling its HLS media
//! playlist and persisting each transport-stream segment exactly once,
//! while the broadcast lifecycle (online/offline) is tracked over the
//! PubSub push channel.

pub mod capture;
pub mod client;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod playlist;
pub mod pubsub;
pub mod session;
pub mod token;
pub mod tracker;

pub use capture::{CaptureController, CaptureStatus};
pub use client::default_client;
pub use config::CaptureConfig;
pub use downloader::{HttpSegmentSource, SegmentDownloader};
pub use error::CaptureError;
pub use events::{ProgressObserver, TracingObserver};
pub use playlist::PlaylistResolver;
pub use pubsub::{PlaybackEvent, PubSubClient};
pub use session::Session;
pub use token::{PlaybackToken, TokenProvider};
