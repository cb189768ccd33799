//! Records and request types exchanged with the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DEFAULT_PAGE_LIMIT, PLACEHOLDER_TEXT};
use crate::error::DispatchError;

/// Identity of a transcriber, as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Result<Self, DispatchError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::validation("worker id must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Done => "done",
            FileStatus::Error => "error",
        }
    }
}

impl FromStr for FileStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "done" => Ok(FileStatus::Done),
            "error" => Ok(FileStatus::Error),
            other => Err(DispatchError::validation(format!(
                "unknown audio file status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStatus {
    Ready,
    Done,
    Invalid,
}

impl TranscriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptStatus::Ready => "ready",
            TranscriptStatus::Done => "done",
            TranscriptStatus::Invalid => "invalid",
        }
    }
}

impl FromStr for TranscriptStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(TranscriptStatus::Ready),
            "done" => Ok(TranscriptStatus::Done),
            "invalid" => Ok(TranscriptStatus::Invalid),
            other => Err(DispatchError::validation(format!(
                "unknown transcript status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioFile {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub status: FileStatus,
    pub claimed_by: Option<String>,
    /// Clip count reported by the chunker, unknown until submission succeeds
    pub expected_segments: Option<i64>,
    /// 0 until every clip is persisted
    pub ingested_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AudioFile {
    pub fn is_fully_ingested(&self) -> bool {
        self.ingested_at != 0
    }
}

/// A live segment joined with its transcript status, as handed to workers
#[derive(Debug, Clone, Serialize)]
pub struct SegmentView {
    pub id: i64,
    pub audio_id: i64,
    pub audio_name: String,
    pub clip_index: i64,
    pub file_path: String,
    pub duration: f64,
    pub status: TranscriptStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub id: i64,
    pub segment_id: i64,
    pub audio_id: i64,
    pub audio_name: String,
    pub user_id: Option<String>,
    pub ai_text: Option<String>,
    pub transcribe_text: Option<String>,
    pub report_text: Option<String>,
    pub emotion: Option<String>,
    pub status: TranscriptStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub viewed_at: Option<i64>,
}

/// Offset/limit window over a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Optional narrowing of a worker's segment listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentFilter {
    pub status: Option<TranscriptStatus>,
    pub audio_id: Option<i64>,
}

impl SegmentFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.audio_id.is_none()
    }
}

/// Optional narrowing of the audit transcript listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptFilter {
    pub status: Option<TranscriptStatus>,
    pub audio_id: Option<i64>,
    pub user_id: Option<String>,
}

/// A counted, windowed listing
#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// Rows matching the filter before the window is applied
    pub count: i64,
}

/// Live transcripts of one file, by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ready: i64,
    pub done: i64,
    pub invalid: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.ready + self.done + self.invalid
    }

    pub fn add(&mut self, status: TranscriptStatus, count: i64) {
        match status {
            TranscriptStatus::Ready => self.ready += count,
            TranscriptStatus::Done => self.done += count,
            TranscriptStatus::Invalid => self.invalid += count,
        }
    }
}

/// Columns a worker may change on a transcript. `None` leaves a column as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptEdit {
    pub transcribe_text: Option<String>,
    pub report_text: Option<String>,
    pub emotion: Option<String>,
}

impl TranscriptEdit {
    /// Build an edit from raw request fields, dropping empty and placeholder
    /// values so they never overwrite stored text.
    pub fn from_raw(
        transcribe_text: Option<String>,
        report_text: Option<String>,
        emotion: Option<String>,
    ) -> Self {
        Self {
            transcribe_text: normalize_field(transcribe_text),
            report_text: normalize_field(report_text),
            emotion: normalize_field(emotion),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transcribe_text.is_none() && self.report_text.is_none() && self.emotion.is_none()
    }

    /// Status this edit moves the transcript to
    pub fn resulting_status(&self) -> TranscriptStatus {
        if self.report_text.is_some() {
            TranscriptStatus::Invalid
        } else {
            TranscriptStatus::Done
        }
    }
}

fn normalize_field(value: Option<String>) -> Option<String> {
    value.filter(|v| {
        let trimmed = v.trim();
        !trimmed.is_empty() && trimmed != PLACEHOLDER_TEXT
    })
}

/// Parse a caller-supplied numeric identifier
pub fn parse_id(raw: &str, what: &str) -> Result<i64, DispatchError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| DispatchError::validation(format!("invalid {} id '{}'", what, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_drops_placeholders() {
        let edit = TranscriptEdit::from_raw(
            Some("string".to_string()),
            Some("   ".to_string()),
            Some(String::new()),
        );
        assert!(edit.is_empty());
    }

    #[test]
    fn test_edit_status_follows_report() {
        let clean = TranscriptEdit::from_raw(Some("hello".to_string()), Some(String::new()), None);
        assert_eq!(clean.resulting_status(), TranscriptStatus::Done);

        let reported = TranscriptEdit::from_raw(None, Some("broken audio".to_string()), None);
        assert_eq!(reported.resulting_status(), TranscriptStatus::Invalid);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            TranscriptStatus::Ready,
            TranscriptStatus::Done,
            TranscriptStatus::Invalid,
        ] {
            assert_eq!(status.as_str().parse::<TranscriptStatus>().unwrap(), status);
        }
        assert!("finished".parse::<FileStatus>().is_err());
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert_eq!(parse_id(" 12 ", "segment").unwrap(), 12);
        assert!(parse_id("abc", "segment").unwrap_err().is_validation());
        assert!(parse_id("0", "segment").is_err());
    }

    #[test]
    fn test_worker_id_trimmed() {
        assert_eq!(WorkerId::new(" w1 ").unwrap().as_str(), "w1");
        assert!(WorkerId::new("  ").is_err());
    }
}
