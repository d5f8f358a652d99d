//! Capture controller: owns the online/offline status and the current
//! session, reacting to playback events and poll results and driving the
//! other components.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::CaptureConfig;
use crate::downloader::SegmentDownloader;
use crate::error::CaptureError;
use crate::events::ProgressObserver;
use crate::playlist::{self, PlaylistSource};
use crate::pubsub::PlaybackEvent;
use crate::session::Session;
use crate::token::{AccessTokenProvider, PlaybackToken};
use crate::tracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Offline,
    Online,
}

pub struct CaptureController {
    config: Arc<CaptureConfig>,
    tokens: Arc<dyn AccessTokenProvider>,
    playlists: Arc<dyn PlaylistSource>,
    downloader: SegmentDownloader,
    observer: Arc<dyn ProgressObserver>,
    login: String,
    status: CaptureStatus,
    token: Option<PlaybackToken>,
    session: Option<Session>,
    variant_url: Option<String>,
}

impl CaptureController {
    pub fn new(
        config: Arc<CaptureConfig>,
        tokens: Arc<dyn AccessTokenProvider>,
        playlists: Arc<dyn PlaylistSource>,
        downloader: SegmentDownloader,
        observer: Arc<dyn ProgressObserver>,
        login: String,
    ) -> Self {
        Self {
            config,
            tokens,
            playlists,
            downloader,
            observer,
            login,
            status: CaptureStatus::Offline,
            token: None,
            session: None,
            variant_url: None,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::id)
    }

    /// Acquires the initial playback token and returns the channel id the
    /// notification client must subscribe to.
    pub async fn prepare(&mut self) -> Result<String, CaptureError> {
        let token = self.tokens.acquire(&self.login).await?;
        let channel_id = token.channel_id.clone();
        self.token = Some(token);
        Ok(channel_id)
    }

    /// Runs until shutdown: one startup liveness probe, then a fixed-interval
    /// poll loop interleaved with playback events from the push channel.
    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<PlaybackEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), CaptureError> {
        info!(login = %self.login, "checking if stream is online");
        match self.open_session(false).await {
            Ok(true) => {}
            Ok(false) => self.observer.status_changed(false, None),
            Err(e) => error!(error = %e, "startup liveness check failed"),
        }

        let mut poll = tokio::time::interval(self.config.poll_config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("capture controller shutting down");
                    return Ok(());
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("playback event channel closed");
                            return Ok(());
                        }
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        // Malformed playlists indicate an upstream contract
                        // break and must be loud, but they do not kill the
                        // loop.
                        error!(error = %e, "poll failed");
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::StreamUp => {
                info!(login = %self.login, "stream went online");
                // A new "went live" always supersedes the token and opens a
                // fresh, independent session, even if one is already open.
                match self.open_session(true).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("stream-up received but playlist is not available yet");
                        // A prior session may still be polling; only report
                        // offline when the controller actually is.
                        if self.status != CaptureStatus::Online {
                            self.observer.status_changed(false, None);
                        }
                    }
                    Err(e) => error!(error = %e, "failed to open session after stream-up"),
                }
            }
            PlaybackEvent::StreamDown => {
                info!(login = %self.login, "stream went offline");
                self.set_offline();
            }
        }
    }

    /// Resolves a fresh variant URL and session. Returns Ok(false) when the
    /// playlist chain fails, which is the platform's only liveness signal:
    /// absence means offline, not a hard error.
    async fn open_session(&mut self, fresh_token: bool) -> Result<bool, CaptureError> {
        if fresh_token || self.token.is_none() {
            self.token = Some(self.tokens.acquire(&self.login).await?);
        }
        let token = self.token.as_ref().expect("token acquired above");

        let manifest_url = playlist::manifest_url(&self.login, token);
        let variant_url = match self.playlists.fetch_variants(&manifest_url).await {
            Ok(variants) => match variants.into_iter().next() {
                Some(url) => url,
                None => {
                    self.token = None;
                    return Ok(false);
                }
            },
            Err(_) => {
                self.token = None;
                return Ok(false);
            }
        };
        let playlist_text = match self.playlists.fetch_playlist(&variant_url).await {
            Ok(text) => text,
            Err(_) => {
                self.token = None;
                return Ok(false);
            }
        };

        let session = Session::create(&self.config.output_config.root_dir, &playlist_text)?;
        info!(
            session_id = %session.id(),
            directory = %session.directory().display(),
            created_at = %session.created_at(),
            "capture session opened"
        );
        self.observer.status_changed(true, Some(session.id()));
        self.session = Some(session);
        self.variant_url = Some(variant_url);
        self.status = CaptureStatus::Online;
        Ok(true)
    }

    fn set_offline(&mut self) {
        if self.status == CaptureStatus::Online {
            if let Some(session) = &self.session {
                // Session id retained for logging; it receives no new
                // segments from here on.
                info!(session_id = %session.id(), "capture suspended");
            }
        }
        self.status = CaptureStatus::Offline;
        self.observer.status_changed(false, self.session_id());
    }

    /// One poll tick: refresh the playlist and download whatever the session
    /// has not captured yet, oldest first.
    async fn poll_once(&mut self) -> Result<(), CaptureError> {
        if self.status != CaptureStatus::Online {
            return Ok(());
        }
        let Some(variant_url) = self.variant_url.clone() else {
            return Ok(());
        };

        let playlist_text = match self.playlists.fetch_playlist(&variant_url).await {
            Ok(text) => text,
            Err(e) => {
                // Playlist gone mid-session: the stream ended.
                info!(error = %e, "playlist fetch failed while online");
                self.set_offline();
                return Ok(());
            }
        };

        // A stream-down may have been applied between scheduling this poll
        // and acting on its result; never start downloads while offline.
        if self.status != CaptureStatus::Online {
            return Ok(());
        }
        let Some(session) = self.session.clone() else {
            return Ok(());
        };

        let numbered = tracker::number_segments(&playlist_text)?;
        for segment in tracker::filter_new(numbered, &session) {
            if let Err(e) = self.downloader.download(&segment, &session).await {
                // Logged and skipped; the next poll retries it via dedup.
                warn!(sequence = segment.sequence, error = %e, "segment download failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureConfig, OutputConfig};
    use crate::downloader::{SegmentDownloader, SegmentSource};
    use crate::events::TracingObserver;
    use crate::token::PlaybackToken;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeTokens {
        issued: AtomicUsize,
    }

    #[async_trait]
    impl AccessTokenProvider for FakeTokens {
        async fn acquire(&self, _login: &str) -> Result<PlaybackToken, CaptureError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(PlaybackToken {
                value: format!(r#"{{"channel_id":123,"n":{n}}}"#),
                signature: "sig".to_string(),
                channel_id: "123".to_string(),
            })
        }
    }

    struct FakePlaylists {
        playlist: Mutex<String>,
        fail: AtomicBool,
    }

    impl FakePlaylists {
        fn new(playlist: &str) -> Self {
            Self {
                playlist: Mutex::new(playlist.to_string()),
                fail: AtomicBool::new(false),
            }
        }

        fn set_playlist(&self, playlist: &str) {
            *self.playlist.lock().unwrap() = playlist.to_string();
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PlaylistSource for FakePlaylists {
        async fn fetch_variants(&self, _manifest_url: &str) -> Result<Vec<String>, CaptureError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CaptureError::SegmentFetch("manifest gone".to_string()));
            }
            Ok(vec!["https://video-edge.example/chunked.m3u8".to_string()])
        }

        async fn fetch_playlist(&self, _variant_url: &str) -> Result<String, CaptureError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CaptureError::SegmentFetch("playlist gone".to_string()));
            }
            Ok(self.playlist.lock().unwrap().clone())
        }
    }

    struct CountingSource {
        fetches: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SegmentSource for CountingSource {
        async fn fetch(&self, url: &str) -> Result<Bytes, CaptureError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CaptureError::SegmentFetch(format!("unreachable: {url}")));
            }
            Ok(Bytes::from_static(b"tsdata"))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        statuses: Mutex<Vec<bool>>,
    }

    impl ProgressObserver for RecordingObserver {
        fn segment_started(&self, _sequence: u64, _url: &str) {}
        fn segment_finished(&self, _sequence: u64, _bytes: u64) {}
        fn status_changed(&self, online: bool, _session_id: Option<&str>) {
            self.statuses.lock().unwrap().push(online);
        }
    }

    fn playlist_snapshot(start: u64, count: u64) -> String {
        let mut text = format!("#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:{start}\n");
        for seq in start..start + count {
            text.push_str(&format!("https://video-edge.example/seg-{seq}.ts\n"));
        }
        text
    }

    struct Harness {
        controller: CaptureController,
        playlists: Arc<FakePlaylists>,
        fetches: Arc<AtomicUsize>,
        source_fail: Arc<AtomicBool>,
        observer: Arc<RecordingObserver>,
        _root: tempfile::TempDir,
    }

    fn harness(initial_playlist: &str) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let config = Arc::new(CaptureConfig {
            output_config: OutputConfig {
                root_dir: root.path().to_path_buf(),
            },
            ..Default::default()
        });
        let playlists = Arc::new(FakePlaylists::new(initial_playlist));
        let fetches = Arc::new(AtomicUsize::new(0));
        let source_fail = Arc::new(AtomicBool::new(false));
        let observer = Arc::new(RecordingObserver::default());
        let downloader = SegmentDownloader::new(
            Arc::new(CountingSource {
                fetches: fetches.clone(),
                fail: source_fail.clone(),
            }),
            Arc::new(TracingObserver),
        );
        let controller = CaptureController::new(
            config,
            Arc::new(FakeTokens {
                issued: AtomicUsize::new(0),
            }),
            playlists.clone(),
            downloader,
            observer.clone(),
            "somechannel".to_string(),
        );
        Harness {
            controller,
            playlists,
            fetches,
            source_fail,
            observer,
            _root: root,
        }
    }

    #[tokio::test]
    async fn startup_probe_opens_session_and_goes_online() {
        let mut h = harness(&playlist_snapshot(100, 3));
        assert_eq!(h.controller.status(), CaptureStatus::Offline);

        assert!(h.controller.open_session(false).await.unwrap());
        assert_eq!(h.controller.status(), CaptureStatus::Online);
        let session = h.controller.session.clone().unwrap();
        assert!(session.directory().is_dir());

        h.controller.poll_once().await.unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 3);
        for seq in 100..103 {
            assert!(session.segment_path(seq).exists());
        }
    }

    #[tokio::test]
    async fn playlist_failure_at_startup_means_offline() {
        let mut h = harness(&playlist_snapshot(0, 1));
        h.playlists.set_fail(true);
        assert!(!h.controller.open_session(false).await.unwrap());
        assert_eq!(h.controller.status(), CaptureStatus::Offline);
    }

    #[tokio::test]
    async fn overlapping_polls_download_each_sequence_once() {
        let mut h = harness(&playlist_snapshot(100, 3));
        h.controller.open_session(false).await.unwrap();

        h.controller.poll_once().await.unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 3);

        // Second snapshot shares 101 and 102 with the first.
        h.playlists.set_playlist(&playlist_snapshot(101, 3));
        h.controller.poll_once().await.unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stream_down_suspends_downloads() {
        let mut h = harness(&playlist_snapshot(100, 3));
        h.controller.open_session(false).await.unwrap();
        let session = h.controller.session.clone().unwrap();

        h.controller.handle_event(PlaybackEvent::StreamDown).await;
        assert_eq!(h.controller.status(), CaptureStatus::Offline);
        // Session id is retained for logging after going offline.
        assert_eq!(h.controller.session_id(), Some(session.id()));

        h.controller.poll_once().await.unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 0);
        assert!(!session.segment_path(100).exists());
    }

    #[tokio::test]
    async fn download_failure_is_skipped_and_retried_next_poll() {
        let mut h = harness(&playlist_snapshot(100, 2));
        h.controller.open_session(false).await.unwrap();
        let session = h.controller.session.clone().unwrap();

        h.source_fail.store(true, Ordering::SeqCst);
        h.controller.poll_once().await.unwrap();
        assert_eq!(h.controller.status(), CaptureStatus::Online);
        assert_eq!(h.fetches.load(Ordering::SeqCst), 2);
        assert!(!session.segment_path(100).exists());

        // Dedup sees no file, so the next tick retries both sequences.
        h.source_fail.store(false, Ordering::SeqCst);
        h.controller.poll_once().await.unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 4);
        assert!(session.segment_path(100).exists());
        assert!(session.segment_path(101).exists());
    }

    #[tokio::test]
    async fn failed_stream_up_while_online_does_not_report_offline() {
        let mut h = harness(&playlist_snapshot(100, 1));
        h.controller.open_session(false).await.unwrap();
        let first = h.controller.session_id().unwrap().to_string();

        h.playlists.set_fail(true);
        h.controller.handle_event(PlaybackEvent::StreamUp).await;
        assert_eq!(h.controller.status(), CaptureStatus::Online);
        assert_eq!(h.controller.session_id(), Some(first.as_str()));
        // The previous session keeps polling; no offline report went out.
        assert_eq!(h.observer.statuses.lock().unwrap().as_slice(), &[true]);

        h.playlists.set_fail(false);
        h.controller.poll_once().await.unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn playlist_failure_while_online_transitions_to_offline() {
        let mut h = harness(&playlist_snapshot(100, 3));
        h.controller.open_session(false).await.unwrap();
        h.controller.poll_once().await.unwrap();

        h.playlists.set_fail(true);
        h.controller.poll_once().await.unwrap();
        assert_eq!(h.controller.status(), CaptureStatus::Offline);

        // Still suspended on the next tick; nothing further is fetched.
        h.playlists.set_fail(false);
        h.controller.poll_once().await.unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn each_stream_up_opens_a_distinct_session() {
        let mut h = harness(&playlist_snapshot(100, 1));
        h.controller.open_session(false).await.unwrap();
        let first = h.controller.session_id().unwrap().to_string();

        // Going live twice without an intervening offline still opens a
        // second, independent session.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        h.controller.handle_event(PlaybackEvent::StreamUp).await;
        let second = h.controller.session_id().unwrap().to_string();
        assert_ne!(first, second);
        assert_eq!(h.controller.status(), CaptureStatus::Online);
    }

    #[tokio::test]
    async fn malformed_playlist_fails_loudly() {
        let mut h = harness("#EXTM3U\nhttps://video-edge.example/seg-0.ts\n");
        h.controller.open_session(false).await.unwrap();
        let err = h.controller.poll_once().await.unwrap_err();
        assert!(matches!(err, CaptureError::MalformedPlaylist(_)));
        // Loud, but not a liveness signal: capture stays online.
        assert_eq!(h.controller.status(), CaptureStatus::Online);
    }

    #[tokio::test]
    async fn prepare_returns_channel_id_for_subscription() {
        let mut h = harness(&playlist_snapshot(0, 1));
        assert_eq!(h.controller.prepare().await.unwrap(), "123");
    }
}
