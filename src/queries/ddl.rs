use sea_query::{ColumnDef, ForeignKey, ForeignKeyAction, Index, SqliteQueryBuilder, Table};

use crate::schema::{AudioFiles, AudioSegments, Metadata, Transcripts};

/// CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_metadata_table() -> String {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).text().primary_key())
        .col(ColumnDef::new(Metadata::Value).text().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS audio_files (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     filename TEXT NOT NULL,
///     file_path TEXT NOT NULL,
///     status TEXT NOT NULL DEFAULT 'pending',
///     claimed_by TEXT,
///     expected_segments INTEGER,
///     ingested_at INTEGER NOT NULL DEFAULT 0,
///     created_at INTEGER NOT NULL,
///     updated_at INTEGER NOT NULL,
///     deleted_at INTEGER NOT NULL DEFAULT 0
/// )
pub fn create_audio_files_table() -> String {
    Table::create()
        .table(AudioFiles::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(AudioFiles::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(AudioFiles::Filename).text().not_null())
        .col(ColumnDef::new(AudioFiles::FilePath).text().not_null())
        .col(
            ColumnDef::new(AudioFiles::Status)
                .text()
                .not_null()
                .default("pending"),
        )
        .col(ColumnDef::new(AudioFiles::ClaimedBy).text().null())
        .col(ColumnDef::new(AudioFiles::ExpectedSegments).big_integer().null())
        .col(
            ColumnDef::new(AudioFiles::IngestedAt)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(AudioFiles::CreatedAt).big_integer().not_null())
        .col(ColumnDef::new(AudioFiles::UpdatedAt).big_integer().not_null())
        .col(
            ColumnDef::new(AudioFiles::DeletedAt)
                .big_integer()
                .not_null()
                .default(0),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS audio_segments (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     audio_id INTEGER NOT NULL REFERENCES audio_files(id),
///     clip_index INTEGER NOT NULL,
///     file_path TEXT NOT NULL,
///     duration REAL NOT NULL,
///     created_at INTEGER NOT NULL,
///     deleted_at INTEGER NOT NULL DEFAULT 0
/// )
pub fn create_audio_segments_table() -> String {
    Table::create()
        .table(AudioSegments::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(AudioSegments::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(AudioSegments::AudioId).big_integer().not_null())
        .col(ColumnDef::new(AudioSegments::ClipIndex).big_integer().not_null())
        .col(ColumnDef::new(AudioSegments::FilePath).text().not_null())
        .col(ColumnDef::new(AudioSegments::Duration).double().not_null())
        .col(ColumnDef::new(AudioSegments::CreatedAt).big_integer().not_null())
        .col(
            ColumnDef::new(AudioSegments::DeletedAt)
                .big_integer()
                .not_null()
                .default(0),
        )
        .foreign_key(
            ForeignKey::create()
                .from(AudioSegments::Table, AudioSegments::AudioId)
                .to(AudioFiles::Table, AudioFiles::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS transcripts (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     segment_id INTEGER NOT NULL UNIQUE REFERENCES audio_segments(id),
///     user_id TEXT,
///     ai_text TEXT,
///     transcribe_text TEXT,
///     report_text TEXT,
///     emotion TEXT,
///     status TEXT NOT NULL DEFAULT 'ready',
///     created_at INTEGER NOT NULL,
///     updated_at INTEGER NOT NULL,
///     viewed_at INTEGER,
///     deleted_at INTEGER NOT NULL DEFAULT 0
/// )
pub fn create_transcripts_table() -> String {
    Table::create()
        .table(Transcripts::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Transcripts::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(
            ColumnDef::new(Transcripts::SegmentId)
                .big_integer()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Transcripts::UserId).text().null())
        .col(ColumnDef::new(Transcripts::AiText).text().null())
        .col(ColumnDef::new(Transcripts::TranscribeText).text().null())
        .col(ColumnDef::new(Transcripts::ReportText).text().null())
        .col(ColumnDef::new(Transcripts::Emotion).text().null())
        .col(
            ColumnDef::new(Transcripts::Status)
                .text()
                .not_null()
                .default("ready"),
        )
        .col(ColumnDef::new(Transcripts::CreatedAt).big_integer().not_null())
        .col(ColumnDef::new(Transcripts::UpdatedAt).big_integer().not_null())
        .col(ColumnDef::new(Transcripts::ViewedAt).big_integer().null())
        .col(
            ColumnDef::new(Transcripts::DeletedAt)
                .big_integer()
                .not_null()
                .default(0),
        )
        .foreign_key(
            ForeignKey::create()
                .from(Transcripts::Table, Transcripts::SegmentId)
                .to(AudioSegments::Table, AudioSegments::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_audio_files_claim ON audio_files(status, created_at)
pub fn create_audio_files_claim_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_audio_files_claim")
        .table(AudioFiles::Table)
        .col(AudioFiles::Status)
        .col(AudioFiles::CreatedAt)
        .to_string(SqliteQueryBuilder)
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_audio_segments_clip ON audio_segments(audio_id, clip_index)
pub fn create_audio_segments_clip_index() -> String {
    Index::create()
        .if_not_exists()
        .unique()
        .name("idx_audio_segments_clip")
        .table(AudioSegments::Table)
        .col(AudioSegments::AudioId)
        .col(AudioSegments::ClipIndex)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_transcripts_status ON transcripts(status)
pub fn create_transcripts_status_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_transcripts_status")
        .table(Transcripts::Table)
        .col(Transcripts::Status)
        .to_string(SqliteQueryBuilder)
}

/// At most one processing file per worker.
/// Partial indexes are written by hand; the builder has no WHERE clause for indexes.
pub fn create_one_claim_per_worker_index() -> String {
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_audio_files_one_claim \
     ON audio_files(claimed_by) WHERE status = 'processing'"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcripts_segment_is_unique() {
        let sql = create_transcripts_table();
        assert!(sql.contains("\"segment_id\""));
        assert!(sql.to_uppercase().contains("UNIQUE"));
        assert!(sql.contains("'ready'"));
    }

    #[test]
    fn test_partial_claim_index() {
        let sql = create_one_claim_per_worker_index();
        assert!(sql.contains("WHERE status = 'processing'"));
    }
}
