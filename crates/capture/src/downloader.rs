//! Segment downloader: fetches segment payloads with retry logic and
//! persists them exactly once per sequence number.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, trace};

use crate::config::FetcherConfig;
use crate::error::CaptureError;
use crate::events::ProgressObserver;
use crate::session::Session;
use crate::tracker::NumberedSegment;

#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, CaptureError>;
}

pub struct HttpSegmentSource {
    http_client: Client,
    config: Arc<FetcherConfig>,
}

impl HttpSegmentSource {
    pub fn new(http_client: Client, config: Arc<FetcherConfig>) -> Self {
        Self {
            http_client,
            config,
        }
    }
}

#[async_trait]
impl SegmentSource for HttpSegmentSource {
    /// Fetches a segment with retry logic. Retries on network errors and
    /// server errors (5xx); client errors (4xx) fail immediately.
    async fn fetch(&self, url: &str) -> Result<Bytes, CaptureError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .http_client
                .get(url)
                .timeout(self.config.segment_download_timeout)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.bytes().await.map_err(CaptureError::from);
                    } else if response.status().is_client_error() {
                        return Err(CaptureError::SegmentFetch(format!(
                            "client error {} for segment {url}",
                            response.status()
                        )));
                    }
                    if attempts > self.config.max_segment_retries {
                        return Err(CaptureError::SegmentFetch(format!(
                            "max retries ({}) exceeded for segment {url}, last status: {}",
                            self.config.max_segment_retries,
                            response.status()
                        )));
                    }
                }
                Err(e) => {
                    if !e.is_connect() && !e.is_timeout() && !e.is_request() {
                        return Err(CaptureError::from(e));
                    }
                    if attempts > self.config.max_segment_retries {
                        return Err(CaptureError::SegmentFetch(format!(
                            "max retries ({}) exceeded for segment {url}: {e}",
                            self.config.max_segment_retries
                        )));
                    }
                }
            }

            let delay =
                self.config.segment_retry_delay_base * 2_u32.pow(attempts.saturating_sub(1));
            tokio::time::sleep(delay).await;
        }
    }
}

pub struct SegmentDownloader {
    source: Arc<dyn SegmentSource>,
    observer: Arc<dyn ProgressObserver>,
}

impl SegmentDownloader {
    pub fn new(source: Arc<dyn SegmentSource>, observer: Arc<dyn ProgressObserver>) -> Self {
        Self { source, observer }
    }

    /// Downloads one segment into the session directory. The payload lands
    /// in a `.part` file and is renamed only after a complete fetch, so a
    /// failed download leaves no `<sequence>.ts` behind. Returns the number
    /// of bytes written, or 0 if the sequence was already captured.
    pub async fn download(
        &self,
        segment: &NumberedSegment,
        session: &Session,
    ) -> Result<u64, CaptureError> {
        let final_path = session.segment_path(segment.sequence);
        if final_path.exists() {
            trace!(sequence = segment.sequence, "segment already captured, skipping");
            return Ok(0);
        }

        self.observer.segment_started(segment.sequence, &segment.url);
        let payload = self.source.fetch(&segment.url).await?;

        let part_path = final_path.with_extension("ts.part");
        tokio::fs::write(&part_path, &payload).await?;
        tokio::fs::rename(&part_path, &final_path).await?;

        let bytes = payload.len() as u64;
        debug!(sequence = segment.sequence, bytes, "segment persisted");
        self.observer.segment_finished(segment.sequence, bytes);
        Ok(bytes)
    }
}
