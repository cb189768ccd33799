//! Segment store: every read and write of audio files, segments and
//! transcripts goes through here.
//!
//! Each method blocks until the statement(s) finish, the request deadline
//! passes, or the request is cancelled. Multi-row mutations run in one sqlx
//! transaction; a transaction dropped before commit rolls back.
//!
//! SQLite transactions start deferred, so every write transaction issues a
//! write first. A read-then-write transaction could fail with a stale
//! snapshot when another writer commits in between.

use log::{debug, info, warn};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;

use crate::constants::now_ms;
use crate::context::RequestContext;
use crate::db::{self, SyncDb};
use crate::error::{DispatchError, Result};
use crate::model::{
    AudioFile, Listing, Page, SegmentFilter, SegmentView, StatusCounts, Transcript,
    TranscriptEdit, TranscriptFilter, TranscriptStatus, WorkerId,
};
use crate::queries::{audio_files, segments, transcripts};

/// What an edit changed besides the edited transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub audio_id: i64,
    /// Status the edited transcript ended with
    pub status: TranscriptStatus,
    /// Transcripts moved to invalid by an entire-file invalidation
    pub invalidated: u64,
    /// The owning file moved to done because nothing is left to transcribe
    pub file_completed: bool,
}

pub struct SegmentStore {
    db: SyncDb,
}

impl SegmentStore {
    pub fn new(db: SyncDb) -> Self {
        Self { db }
    }

    /// Open an existing database, refusing one with another schema version
    pub fn open(path: &Path) -> Result<Self> {
        let db = SyncDb::connect(path)?;
        db::verify_schema_version_sync(&db)?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &SyncDb {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Insert a `pending` audio file. It is not claimable until
    /// `mark_ingested` is called.
    pub fn register_audio_file(
        &self,
        ctx: &RequestContext,
        filename: &str,
        file_path: &str,
    ) -> Result<i64> {
        let sql = audio_files::insert(filename, file_path, now_ms());
        let id = self.db.block_on(ctx, async {
            let id: i64 = sqlx::query_scalar(&sql).fetch_one(self.pool()).await?;
            Ok(id)
        })?;
        debug!("Registered audio file {} ({})", id, filename);
        Ok(id)
    }

    pub fn set_expected_segments(&self, ctx: &RequestContext, audio_id: i64, expected: i64) -> Result<()> {
        let sql = audio_files::set_expected_segments(audio_id, expected, now_ms());
        self.execute_expecting_row(ctx, &sql, || format!("audio file {}", audio_id))
    }

    /// Record that every clip of the file is persisted, making it claimable
    pub fn mark_ingested(&self, ctx: &RequestContext, audio_id: i64) -> Result<()> {
        let sql = audio_files::mark_ingested(audio_id, now_ms());
        self.execute_expecting_row(ctx, &sql, || format!("audio file {}", audio_id))
    }

    /// Clip indexes already stored for a file, tombstoned ones included
    pub fn persisted_clip_indexes(&self, ctx: &RequestContext, audio_id: i64) -> Result<Vec<i64>> {
        let sql = segments::select_clip_indexes(audio_id);
        self.db.block_on(ctx, async {
            let indexes: Vec<i64> = sqlx::query_scalar(&sql).fetch_all(self.pool()).await?;
            Ok(indexes)
        })
    }

    /// Insert a segment and its `ready` transcript in one transaction.
    /// A missing parent file surfaces as a persistence error from the
    /// foreign key.
    pub fn create_segment_with_transcript(
        &self,
        ctx: &RequestContext,
        audio_id: i64,
        clip_index: i64,
        clip_locator: &str,
        duration: f64,
    ) -> Result<i64> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(DispatchError::validation(format!(
                "invalid clip duration {}",
                duration
            )));
        }
        let now = now_ms();
        let segment_sql = segments::insert(audio_id, clip_index, clip_locator, duration, now);

        self.db.block_on(ctx, async {
            let mut tx = self.pool().begin().await?;
            let segment_id: i64 = sqlx::query_scalar(&segment_sql)
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query(&transcripts::insert_ready(segment_id, now))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(segment_id)
        })
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// The worker's `processing` file if it has one, otherwise the oldest
    /// claimable file, now claimed by the worker. `None` when there is no
    /// work left.
    pub fn claim_next_pending_file(&self, ctx: &RequestContext, worker: &WorkerId) -> Result<Option<i64>> {
        let held_sql = audio_files::select_processing_for_worker(worker.as_str());

        self.db.block_on(ctx, async {
            let held: Option<i64> = sqlx::query_scalar(&held_sql)
                .fetch_optional(self.pool())
                .await?;
            if let Some(id) = held {
                debug!("Worker {} already holds audio file {}", worker, id);
                return Ok(Some(id));
            }

            let claim_sql = audio_files::claim_oldest_pending(worker.as_str(), now_ms());
            let claimed: Option<i64> = match sqlx::query_scalar(&claim_sql)
                .fetch_optional(self.pool())
                .await
            {
                Ok(claimed) => claimed,
                // Another request of the same worker claimed first
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => None,
                Err(e) => return Err(e.into()),
            };

            match claimed {
                Some(id) => {
                    info!("Worker {} claimed audio file {}", worker, id);
                    Ok(Some(id))
                }
                None => {
                    // Either no work or a concurrent claim by this worker won
                    let held: Option<i64> = sqlx::query_scalar(&held_sql)
                        .fetch_optional(self.pool())
                        .await?;
                    Ok(held)
                }
            }
        })
    }

    pub fn get_audio_file(&self, ctx: &RequestContext, audio_id: i64) -> Result<AudioFile> {
        let sql = audio_files::select_by_id(audio_id);
        let row = self.db.block_on(ctx, async {
            Ok(sqlx::query(&sql).fetch_optional(self.pool()).await?)
        })?;
        match row {
            Some(row) => audio_file_from_row(&row),
            None => Err(DispatchError::not_found(format!("audio file {}", audio_id))),
        }
    }

    /// Live segments of a file with their transcript status, in creation
    /// order. `count` covers every match, not only the window.
    pub fn list_segments_for_file(
        &self,
        ctx: &RequestContext,
        audio_id: i64,
        filter: &SegmentFilter,
        page: Page,
    ) -> Result<Listing<SegmentView>> {
        let count_sql = segments::count_for_file(audio_id, filter);
        let select_sql = segments::select_for_file(audio_id, filter, page);

        let (count, rows) = self.db.block_on(ctx, async {
            let mut tx = self.pool().begin().await?;
            let count: i64 = sqlx::query_scalar(&count_sql).fetch_one(&mut *tx).await?;
            let rows = sqlx::query(&select_sql).fetch_all(&mut *tx).await?;
            tx.commit().await?;
            Ok((count, rows))
        })?;

        let items = rows
            .iter()
            .map(segment_view_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(Listing { items, count })
    }

    pub fn get_segment(&self, ctx: &RequestContext, segment_id: i64) -> Result<SegmentView> {
        let sql = segments::select_view_by_id(segment_id);
        let row = self.db.block_on(ctx, async {
            Ok(sqlx::query(&sql).fetch_optional(self.pool()).await?)
        })?;
        match row {
            Some(row) => segment_view_from_row(&row),
            None => Err(DispatchError::not_found(format!("segment {}", segment_id))),
        }
    }

    // ------------------------------------------------------------------
    // Transcript lifecycle
    // ------------------------------------------------------------------

    /// Apply a worker's edit to the transcript of `segment_id`.
    ///
    /// With `entire_file_invalid`, every live transcript of the owning file
    /// becomes `invalid` and the file `error`, in the same transaction.
    /// Otherwise the file becomes `done` once no `ready` transcript remains.
    pub fn apply_transcript_edit(
        &self,
        ctx: &RequestContext,
        segment_id: i64,
        edit: &TranscriptEdit,
        worker: &WorkerId,
        entire_file_invalid: bool,
    ) -> Result<EditOutcome> {
        if edit.is_empty() && !entire_file_invalid {
            return Err(DispatchError::NothingToUpdate);
        }
        let now = now_ms();
        let status = edit.resulting_status();
        let edit_sql = transcripts::apply_edit(segment_id, edit, worker.as_str(), status, now);
        let audio_sql = segments::select_audio_id(segment_id);

        let outcome = self.db.block_on(ctx, async {
            let mut tx = self.pool().begin().await?;

            let edited = sqlx::query(&edit_sql).execute(&mut *tx).await?;
            if edited.rows_affected() == 0 {
                return Err(DispatchError::not_found(format!(
                    "transcript for segment {}",
                    segment_id
                )));
            }
            let audio_id: i64 = sqlx::query_scalar(&audio_sql)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DispatchError::not_found(format!("segment {}", segment_id)))?;

            let outcome = if entire_file_invalid {
                let invalidated = invalidate_file(&mut tx, audio_id, now).await?;
                EditOutcome {
                    audio_id,
                    status: TranscriptStatus::Invalid,
                    invalidated,
                    file_completed: false,
                }
            } else {
                let completed = sqlx::query(&audio_files::complete_if_drained(audio_id, now))
                    .execute(&mut *tx)
                    .await?;
                EditOutcome {
                    audio_id,
                    status,
                    invalidated: 0,
                    file_completed: completed.rows_affected() > 0,
                }
            };

            tx.commit().await?;
            Ok(outcome)
        })?;

        debug!(
            "Worker {} set segment {} to {}",
            worker,
            segment_id,
            outcome.status.as_str()
        );
        if outcome.file_completed {
            info!("Audio file {} fully transcribed", outcome.audio_id);
        }
        Ok(outcome)
    }

    /// Every live transcript of the file becomes `invalid` and the file
    /// `error`, in one transaction. Returns the number of transcripts touched.
    pub fn cascade_invalidate(&self, ctx: &RequestContext, audio_id: i64) -> Result<u64> {
        let now = now_ms();
        self.db.block_on(ctx, async {
            let mut tx = self.pool().begin().await?;
            let invalidated = invalidate_file(&mut tx, audio_id, now).await?;
            tx.commit().await?;
            Ok(invalidated)
        })
    }

    /// Stamp `viewed_at` on the transcripts of the given segments
    pub fn mark_viewed(&self, ctx: &RequestContext, segment_ids: &[i64]) -> Result<u64> {
        if segment_ids.is_empty() {
            return Ok(0);
        }
        let sql = transcripts::mark_viewed(segment_ids, now_ms());
        self.db.block_on(ctx, async {
            let result = sqlx::query(&sql).execute(self.pool()).await?;
            Ok(result.rows_affected())
        })
    }

    pub fn get_transcript(&self, ctx: &RequestContext, segment_id: i64) -> Result<Transcript> {
        let sql = transcripts::select_by_segment(segment_id);
        let row = self.db.block_on(ctx, async {
            Ok(sqlx::query(&sql).fetch_optional(self.pool()).await?)
        })?;
        match row {
            Some(row) => transcript_from_row(&row),
            None => Err(DispatchError::not_found(format!(
                "transcript for segment {}",
                segment_id
            ))),
        }
    }

    /// Audit listing across files, most recently updated first
    pub fn list_transcripts(
        &self,
        ctx: &RequestContext,
        filter: &TranscriptFilter,
        page: Page,
    ) -> Result<Listing<Transcript>> {
        let count_sql = transcripts::count_list(filter);
        let select_sql = transcripts::select_list(filter, page);

        let (count, rows) = self.db.block_on(ctx, async {
            let mut tx = self.pool().begin().await?;
            let count: i64 = sqlx::query_scalar(&count_sql).fetch_one(&mut *tx).await?;
            let rows = sqlx::query(&select_sql).fetch_all(&mut *tx).await?;
            tx.commit().await?;
            Ok((count, rows))
        })?;

        let items = rows
            .iter()
            .map(transcript_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(Listing { items, count })
    }

    pub fn status_counts(&self, ctx: &RequestContext, audio_id: i64) -> Result<StatusCounts> {
        let sql = transcripts::status_counts_for_file(audio_id);
        let rows = self.db.block_on(ctx, async {
            Ok(sqlx::query(&sql).fetch_all(self.pool()).await?)
        })?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let status: String = row.try_get(0)?;
            let count: i64 = row.try_get(1)?;
            counts.add(status.parse()?, count);
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Tombstones
    // ------------------------------------------------------------------

    /// Tombstone a segment and its transcript. Returns false when the
    /// segment was already deleted.
    pub fn soft_delete_segment(&self, ctx: &RequestContext, segment_id: i64) -> Result<bool> {
        let now = now_ms();
        let deleted = self.db.block_on(ctx, async {
            let mut tx = self.pool().begin().await?;
            let result = sqlx::query(&segments::soft_delete(segment_id, now))
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                let exists = sqlx::query(&segments::exists(segment_id))
                    .fetch_optional(&mut *tx)
                    .await?
                    .is_some();
                if !exists {
                    return Err(DispatchError::not_found(format!("segment {}", segment_id)));
                }
                return Ok(false);
            }
            sqlx::query(&transcripts::soft_delete_by_segment(segment_id, now))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(true)
        })?;
        if deleted {
            debug!("Segment {} deleted", segment_id);
        }
        Ok(deleted)
    }

    /// Tombstone one transcript by id. Returns false when it was already
    /// deleted.
    pub fn soft_delete_transcript(&self, ctx: &RequestContext, transcript_id: i64) -> Result<bool> {
        let update_sql = transcripts::soft_delete(transcript_id, now_ms());
        let exists_sql = transcripts::exists(transcript_id);
        self.tombstone(ctx, &update_sql, &exists_sql, || {
            format!("transcript {}", transcript_id)
        })
    }

    /// Tombstone the transcript paired with `segment_id`. Returns false
    /// when it was already deleted.
    pub fn soft_delete_transcript_for_segment(&self, ctx: &RequestContext, segment_id: i64) -> Result<bool> {
        let update_sql = transcripts::soft_delete_by_segment(segment_id, now_ms());
        let exists_sql = segments::exists(segment_id);
        self.tombstone(ctx, &update_sql, &exists_sql, || {
            format!("segment {}", segment_id)
        })
    }

    fn tombstone(
        &self,
        ctx: &RequestContext,
        update_sql: &str,
        exists_sql: &str,
        what: impl FnOnce() -> String,
    ) -> Result<bool> {
        let (changed, exists) = self.db.block_on(ctx, async {
            let result = sqlx::query(update_sql).execute(self.pool()).await?;
            if result.rows_affected() > 0 {
                return Ok((true, true));
            }
            let exists = sqlx::query(exists_sql)
                .fetch_optional(self.pool())
                .await?
                .is_some();
            Ok((false, exists))
        })?;
        if !exists {
            return Err(DispatchError::not_found(what()));
        }
        Ok(changed)
    }

    fn execute_expecting_row(
        &self,
        ctx: &RequestContext,
        sql: &str,
        what: impl FnOnce() -> String,
    ) -> Result<()> {
        let affected = self.db.block_on(ctx, async {
            let result = sqlx::query(sql).execute(self.pool()).await?;
            Ok(result.rows_affected())
        })?;
        if affected == 0 {
            return Err(DispatchError::not_found(what()));
        }
        Ok(())
    }
}

/// File goes to `error` first so the transaction holds the write lock
/// before touching transcripts.
async fn invalidate_file(tx: &mut Transaction<'_, Sqlite>, audio_id: i64, now: i64) -> Result<u64> {
    let marked = sqlx::query(&audio_files::mark_error(audio_id, now))
        .execute(&mut **tx)
        .await?;
    if marked.rows_affected() == 0 {
        return Err(DispatchError::not_found(format!("audio file {}", audio_id)));
    }
    let invalidated = sqlx::query(&transcripts::invalidate_for_file(audio_id, now))
        .execute(&mut **tx)
        .await?;
    warn!(
        "Audio file {} invalidated: {} transcripts marked invalid",
        audio_id,
        invalidated.rows_affected()
    );
    Ok(invalidated.rows_affected())
}

fn audio_file_from_row(row: &SqliteRow) -> Result<AudioFile> {
    let status: String = row.try_get(3)?;
    Ok(AudioFile {
        id: row.try_get(0)?,
        filename: row.try_get(1)?,
        file_path: row.try_get(2)?,
        status: status.parse()?,
        claimed_by: row.try_get(4)?,
        expected_segments: row.try_get(5)?,
        ingested_at: row.try_get(6)?,
        created_at: row.try_get(7)?,
        updated_at: row.try_get(8)?,
    })
}

fn segment_view_from_row(row: &SqliteRow) -> Result<SegmentView> {
    let status: String = row.try_get(6)?;
    Ok(SegmentView {
        id: row.try_get(0)?,
        audio_id: row.try_get(1)?,
        audio_name: row.try_get(2)?,
        clip_index: row.try_get(3)?,
        file_path: row.try_get(4)?,
        duration: row.try_get(5)?,
        status: status.parse()?,
        created_at: row.try_get(7)?,
    })
}

fn transcript_from_row(row: &SqliteRow) -> Result<Transcript> {
    let status: String = row.try_get(9)?;
    Ok(Transcript {
        id: row.try_get(0)?,
        segment_id: row.try_get(1)?,
        audio_id: row.try_get(2)?,
        audio_name: row.try_get(3)?,
        user_id: row.try_get(4)?,
        ai_text: row.try_get(5)?,
        transcribe_text: row.try_get(6)?,
        report_text: row.try_get(7)?,
        emotion: row.try_get(8)?,
        status: status.parse()?,
        created_at: row.try_get(10)?,
        updated_at: row.try_get(11)?,
        viewed_at: row.try_get(12)?,
    })
}
