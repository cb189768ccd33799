//! Transcript lifecycle: worker edits, file-wide invalidation, deletion.

use crate::context::RequestContext;
use crate::error::{DispatchError, Result};
use crate::model::{Transcript, TranscriptEdit, WorkerId};
use crate::store::{EditOutcome, SegmentStore};

/// A worker's update request as received. Empty strings and the
/// placeholder value count as not supplied.
#[derive(Debug, Clone, Default)]
pub struct TranscriptUpdate {
    pub transcribe_text: Option<String>,
    pub report_text: Option<String>,
    pub emotion: Option<String>,
    /// Mark every transcript of the owning file invalid and the file `error`
    pub entire_file_invalid: bool,
}

pub struct TranscriptLifecycle<'a> {
    store: &'a SegmentStore,
}

impl<'a> TranscriptLifecycle<'a> {
    pub fn new(store: &'a SegmentStore) -> Self {
        Self { store }
    }

    /// Apply a worker's update to the transcript of `segment_id`.
    ///
    /// Non-empty report text makes the transcript `invalid`, otherwise it
    /// becomes `done`. Terminal transcripts may be edited again; the last
    /// write wins.
    pub fn update(
        &self,
        ctx: &RequestContext,
        segment_id: i64,
        worker: &WorkerId,
        update: TranscriptUpdate,
    ) -> Result<EditOutcome> {
        let edit = TranscriptEdit::from_raw(update.transcribe_text, update.report_text, update.emotion);
        if edit.is_empty() && !update.entire_file_invalid {
            return Err(DispatchError::NothingToUpdate);
        }
        self.store
            .apply_transcript_edit(ctx, segment_id, &edit, worker, update.entire_file_invalid)
    }

    /// Tombstone the transcript of `segment_id`, hiding the segment from
    /// listings. Deleting twice is a no-op that returns false.
    pub fn delete(&self, ctx: &RequestContext, segment_id: i64) -> Result<bool> {
        self.store.soft_delete_transcript_for_segment(ctx, segment_id)
    }

    /// A worker opened the clip: stamp `viewed_at` and return the transcript
    pub fn start(&self, ctx: &RequestContext, segment_id: i64) -> Result<Transcript> {
        if self.store.mark_viewed(ctx, &[segment_id])? == 0 {
            return Err(DispatchError::not_found(format!(
                "transcript for segment {}",
                segment_id
            )));
        }
        self.store.get_transcript(ctx, segment_id)
    }
}
