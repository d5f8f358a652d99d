use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::CaptureError;

static SESSION_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"X-TV-TWITCH-SESSIONID="(\d+)""#).unwrap());

/// One continuous live-capture attempt, from "went live" to "went offline".
/// Owns a directory that is created on session start and never deleted.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    directory: PathBuf,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Opens a new session under `root`. The id is taken from the playlist's
    /// stream-session marker when present, otherwise a timestamped id is
    /// synthesized so every capture attempt stays unique.
    pub fn create(root: &Path, playlist: &str) -> Result<Self, CaptureError> {
        let created_at = Utc::now();
        let id = match Self::id_from_playlist(playlist) {
            Some(id) => id,
            None => {
                let id = created_at.format("%Y%m%d%H%M%S%3f").to_string();
                debug!(id, "no session marker in playlist, synthesized id");
                id
            }
        };
        let directory = root.join(&id);
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            id,
            directory,
            created_at,
        })
    }

    fn id_from_playlist(playlist: &str) -> Option<String> {
        SESSION_ID_REGEX
            .captures(playlist)
            .map(|caps| caps[1].to_string())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn segment_path(&self, sequence: u64) -> PathBuf {
        self.directory.join(format!("{sequence}.ts"))
    }
}
