//! Work assignment: hands each worker one audio file at a time.

use log::debug;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::Result;
use crate::model::{AudioFile, Listing, Page, SegmentFilter, SegmentView, WorkerId};
use crate::store::SegmentStore;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Assignment {
    /// Nothing pending and the worker holds no file
    NoWorkAvailable,
    Claimed {
        file: AudioFile,
        segments: Listing<SegmentView>,
        /// False when the caller's filter matched nothing and the listing
        /// fell back to every live segment of the file
        filtered: bool,
    },
}

pub struct WorkAssignmentEngine<'a> {
    store: &'a SegmentStore,
}

impl<'a> WorkAssignmentEngine<'a> {
    pub fn new(store: &'a SegmentStore) -> Self {
        Self { store }
    }

    /// Return the worker's current file, claiming the oldest pending one if
    /// it holds none, together with a window of its segments.
    pub fn request_work(
        &self,
        ctx: &RequestContext,
        worker: &WorkerId,
        filter: &SegmentFilter,
        page: Page,
    ) -> Result<Assignment> {
        let audio_id = match self.store.claim_next_pending_file(ctx, worker)? {
            Some(id) => id,
            None => {
                debug!("No work available for worker {}", worker);
                return Ok(Assignment::NoWorkAvailable);
            }
        };

        let file = self.store.get_audio_file(ctx, audio_id)?;
        let mut segments = self
            .store
            .list_segments_for_file(ctx, audio_id, filter, page)?;
        let mut filtered = !filter.is_empty();

        if filtered && segments.count == 0 {
            debug!(
                "Filter matched nothing in audio file {}, listing all segments",
                audio_id
            );
            segments = self.store.list_segments_for_file(
                ctx,
                audio_id,
                &SegmentFilter::default(),
                page,
            )?;
            filtered = false;
        }

        Ok(Assignment::Claimed {
            file,
            segments,
            filtered,
        })
    }
}
