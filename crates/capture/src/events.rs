use tracing::info;

/// Observer for per-segment download progress. Purely informational:
/// implementations must not influence control flow.
pub trait ProgressObserver: Send + Sync {
    fn segment_started(&self, sequence: u64, url: &str);
    fn segment_finished(&self, sequence: u64, bytes: u64);
    fn status_changed(&self, online: bool, session_id: Option<&str>);
}

/// Default observer that reports progress through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn segment_started(&self, sequence: u64, url: &str) {
        info!(sequence, url, "downloading segment");
    }

    fn segment_finished(&self, sequence: u64, bytes: u64) {
        info!(sequence, bytes, "segment downloaded");
    }

    fn status_changed(&self, online: bool, session_id: Option<&str>) {
        if online {
            info!(session_id, "stream is online");
        } else {
            info!("stream is offline");
        }
    }
}
