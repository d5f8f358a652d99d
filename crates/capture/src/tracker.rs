//! Segment tracker: maps playlist entries to global sequence numbers and
//! filters out already-captured segments.
//!
//! The live playlist is a moving window over the channel's global segment
//! sequence; `#EXT-X-MEDIA-SEQUENCE` declares the ordinal of the first
//! listed segment, so position within the snapshot reconstructs each
//! segment's true sequence number.

use crate::error::CaptureError;
use crate::session::Session;

const MEDIA_SEQUENCE_TAG: &str = "#EXT-X-MEDIA-SEQUENCE:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedSegment {
    pub sequence: u64,
    pub url: String,
}

/// Parses the numeric value following the media-sequence directive.
/// Absence is an upstream contract break, not a liveness signal.
pub fn extract_sequence_start(playlist: &str) -> Result<u64, CaptureError> {
    let line = playlist
        .lines()
        .find(|line| line.starts_with(MEDIA_SEQUENCE_TAG))
        .ok_or_else(|| {
            CaptureError::MalformedPlaylist("missing #EXT-X-MEDIA-SEQUENCE directive".to_string())
        })?;
    line[MEDIA_SEQUENCE_TAG.len()..]
        .trim()
        .parse::<u64>()
        .map_err(|e| {
            CaptureError::MalformedPlaylist(format!("invalid media sequence value: {e}"))
        })
}

/// All absolute HTTPS lines of the playlist, oldest segment first.
pub fn extract_segment_urls(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .filter(|line| line.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

/// Assigns sequence numbers starting at the declared media sequence,
/// incrementing by one per URL in playlist order.
pub fn number_segments(playlist: &str) -> Result<Vec<NumberedSegment>, CaptureError> {
    let start = extract_sequence_start(playlist)?;
    Ok(extract_segment_urls(playlist)
        .into_iter()
        .enumerate()
        .map(|(idx, url)| NumberedSegment {
            sequence: start + idx as u64,
            url,
        })
        .collect())
}

/// Drops segments whose file already exists in the session directory.
/// File existence is the sole captured flag, which makes this idempotent
/// across overlapping playlist windows.
pub fn filter_new(segments: Vec<NumberedSegment>, session: &Session) -> Vec<NumberedSegment> {
    segments
        .into_iter()
        .filter(|segment| !session.segment_path(segment.sequence).exists())
        .collect()
}
