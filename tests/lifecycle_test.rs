use std::time::Duration;

use transcribe_dispatch::db;
use transcribe_dispatch::lifecycle::{TranscriptLifecycle, TranscriptUpdate};
use transcribe_dispatch::model::{
    FileStatus, Page, SegmentFilter, TranscriptFilter, TranscriptStatus, WorkerId,
};
use transcribe_dispatch::store::SegmentStore;
use transcribe_dispatch::{DispatchError, RequestContext};

/// Helper function to create a store over a fresh database
/// Returns (store, _guard) - keep _guard alive to prevent temp file deletion
fn create_test_store() -> (SegmentStore, tempfile::TempDir) {
    let (db, guard) = db::create_test_database().unwrap();
    (SegmentStore::new(db), guard)
}

/// Helper to register a file with `clips` segments and claim it for `worker`
fn claimed_file(store: &SegmentStore, worker: &WorkerId, clips: usize) -> (i64, Vec<i64>) {
    let ctx = RequestContext::background();
    let audio_id = store
        .register_audio_file(&ctx, "talk.wav", "http://blobs/talk.wav")
        .unwrap();
    let segment_ids = (0..clips)
        .map(|i| {
            store
                .create_segment_with_transcript(&ctx, audio_id, i as i64, "http://blobs/clip.wav", 1.0)
                .unwrap()
        })
        .collect();
    store.mark_ingested(&ctx, audio_id).unwrap();
    assert_eq!(
        store.claim_next_pending_file(&ctx, worker).unwrap(),
        Some(audio_id)
    );
    (audio_id, segment_ids)
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn count_transcript_rows(store: &SegmentStore) -> i64 {
    store
        .db()
        .block_on(&RequestContext::background(), async {
            Ok(sqlx::query_scalar("SELECT COUNT(*) FROM transcripts")
                .fetch_one(store.db().pool())
                .await?)
        })
        .unwrap()
}

#[test]
fn test_edit_then_report_preserves_text() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (_, segments) = claimed_file(&store, &w, 2);
    let lifecycle = TranscriptLifecycle::new(&store);

    let outcome = lifecycle
        .update(
            &ctx,
            segments[0],
            &w,
            TranscriptUpdate {
                transcribe_text: text("hello"),
                report_text: text(""),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(outcome.status, TranscriptStatus::Done);

    let transcript = store.get_transcript(&ctx, segments[0]).unwrap();
    assert_eq!(transcript.status, TranscriptStatus::Done);
    assert_eq!(transcript.user_id.as_deref(), Some("w1"));
    assert_eq!(transcript.transcribe_text.as_deref(), Some("hello"));
    assert_eq!(transcript.report_text, None);

    lifecycle
        .update(
            &ctx,
            segments[0],
            &w,
            TranscriptUpdate {
                report_text: text("broken audio"),
                ..Default::default()
            },
        )
        .unwrap();

    let transcript = store.get_transcript(&ctx, segments[0]).unwrap();
    assert_eq!(transcript.status, TranscriptStatus::Invalid);
    assert_eq!(transcript.transcribe_text.as_deref(), Some("hello"));
    assert_eq!(transcript.report_text.as_deref(), Some("broken audio"));
}

#[test]
fn test_empty_update_changes_nothing() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (_, segments) = claimed_file(&store, &w, 1);
    let lifecycle = TranscriptLifecycle::new(&store);
    let before = store.get_transcript(&ctx, segments[0]).unwrap();

    let err = lifecycle
        .update(
            &ctx,
            segments[0],
            &w,
            TranscriptUpdate {
                transcribe_text: text("string"),
                report_text: text(""),
                emotion: text("   "),
                entire_file_invalid: false,
            },
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::NothingToUpdate));
    assert!(!matches!(err, DispatchError::Persistence(_)));
    assert_eq!(err.to_string(), "nothing to update");

    let after = store.get_transcript(&ctx, segments[0]).unwrap();
    assert_eq!(after.status, TranscriptStatus::Ready);
    assert_eq!(after.user_id, None);
    assert_eq!(after.updated_at, before.updated_at);
}

#[test]
fn test_cascade_invalidates_whole_file() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w, 4);
    let lifecycle = TranscriptLifecycle::new(&store);

    // One sibling already done; the cascade overrides it
    lifecycle
        .update(
            &ctx,
            segments[3],
            &w,
            TranscriptUpdate {
                transcribe_text: text("fine"),
                ..Default::default()
            },
        )
        .unwrap();

    let outcome = lifecycle
        .update(
            &ctx,
            segments[0],
            &w,
            TranscriptUpdate {
                transcribe_text: text("noise only"),
                entire_file_invalid: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(outcome.invalidated, 4);
    assert_eq!(outcome.status, TranscriptStatus::Invalid);

    for segment_id in &segments {
        let transcript = store.get_transcript(&ctx, *segment_id).unwrap();
        assert_eq!(transcript.status, TranscriptStatus::Invalid);
    }
    let file = store.get_audio_file(&ctx, audio_id).unwrap();
    assert_eq!(file.status, FileStatus::Error);

    // The worker no longer holds a processing file
    assert_eq!(store.claim_next_pending_file(&ctx, &w).unwrap(), None);
}

#[test]
fn test_cascade_flag_alone_is_an_update() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w, 2);
    let lifecycle = TranscriptLifecycle::new(&store);

    lifecycle
        .update(
            &ctx,
            segments[1],
            &w,
            TranscriptUpdate {
                entire_file_invalid: true,
                ..Default::default()
            },
        )
        .unwrap();

    let counts = store.status_counts(&ctx, audio_id).unwrap();
    assert_eq!(counts.invalid, 2);
    let transcript = store.get_transcript(&ctx, segments[1]).unwrap();
    assert_eq!(transcript.user_id.as_deref(), Some("w1"));
}

#[test]
fn test_cascade_skips_deleted_transcripts() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w, 3);

    store
        .soft_delete_transcript_for_segment(&ctx, segments[2])
        .unwrap();
    let invalidated = store.cascade_invalidate(&ctx, audio_id).unwrap();
    assert_eq!(invalidated, 2);
    assert_eq!(
        store.get_audio_file(&ctx, audio_id).unwrap().status,
        FileStatus::Error
    );
}

#[test]
fn test_status_counts_match_live_segments() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w, 5);
    let lifecycle = TranscriptLifecycle::new(&store);

    lifecycle
        .update(&ctx, segments[0], &w, TranscriptUpdate { transcribe_text: text("a"), ..Default::default() })
        .unwrap();
    lifecycle
        .update(&ctx, segments[1], &w, TranscriptUpdate { report_text: text("clipped"), ..Default::default() })
        .unwrap();
    store.soft_delete_segment(&ctx, segments[4]).unwrap();

    let counts = store.status_counts(&ctx, audio_id).unwrap();
    let listing = store
        .list_segments_for_file(&ctx, audio_id, &SegmentFilter::default(), Page::default())
        .unwrap();
    assert_eq!(counts.ready, 2);
    assert_eq!(counts.done, 1);
    assert_eq!(counts.invalid, 1);
    assert_eq!(counts.total(), listing.count);
}

#[test]
fn test_file_done_when_nothing_ready() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w, 2);
    let lifecycle = TranscriptLifecycle::new(&store);

    let first = lifecycle
        .update(&ctx, segments[0], &w, TranscriptUpdate { transcribe_text: text("one"), ..Default::default() })
        .unwrap();
    assert!(!first.file_completed);

    let last = lifecycle
        .update(&ctx, segments[1], &w, TranscriptUpdate { report_text: text("silence"), ..Default::default() })
        .unwrap();
    assert!(last.file_completed);

    let file = store.get_audio_file(&ctx, audio_id).unwrap();
    assert_eq!(file.status, FileStatus::Done);
    assert_eq!(store.claim_next_pending_file(&ctx, &w).unwrap(), None);
}

#[test]
fn test_delete_is_idempotent() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w, 2);
    let lifecycle = TranscriptLifecycle::new(&store);

    assert!(lifecycle.delete(&ctx, segments[0]).unwrap());
    assert!(!lifecycle.delete(&ctx, segments[0]).unwrap());

    let listing = store
        .list_segments_for_file(&ctx, audio_id, &SegmentFilter::default(), Page::default())
        .unwrap();
    assert_eq!(listing.count, 1);
    assert!(listing.items.iter().all(|s| s.id != segments[0]));
    assert!(store.get_transcript(&ctx, segments[0]).unwrap_err().is_not_found());

    assert!(lifecycle.delete(&ctx, 9999).unwrap_err().is_not_found());
}

#[test]
fn test_deleting_last_ready_leaves_file_processing() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w, 2);
    let lifecycle = TranscriptLifecycle::new(&store);

    let next_id = store
        .register_audio_file(&ctx, "next.wav", "http://blobs/next.wav")
        .unwrap();
    store
        .create_segment_with_transcript(&ctx, next_id, 0, "http://blobs/clip.wav", 1.0)
        .unwrap();
    store.mark_ingested(&ctx, next_id).unwrap();

    lifecycle
        .update(&ctx, segments[0], &w, TranscriptUpdate { transcribe_text: text("hi"), ..Default::default() })
        .unwrap();
    lifecycle.delete(&ctx, segments[1]).unwrap();

    // Delete leaves the file alone; completion is only checked on edits
    let file = store.get_audio_file(&ctx, audio_id).unwrap();
    assert_eq!(file.status, FileStatus::Processing);
    let counts = store.status_counts(&ctx, audio_id).unwrap();
    assert_eq!(counts.ready, 0);
    assert_eq!(counts.done, 1);
    assert_eq!(store.claim_next_pending_file(&ctx, &w).unwrap(), Some(audio_id));
    assert_eq!(
        store.get_audio_file(&ctx, next_id).unwrap().status,
        FileStatus::Pending
    );
}

#[test]
fn test_edit_of_deleted_transcript_is_not_found() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (_, segments) = claimed_file(&store, &w, 1);
    let lifecycle = TranscriptLifecycle::new(&store);

    lifecycle.delete(&ctx, segments[0]).unwrap();
    let err = lifecycle
        .update(&ctx, segments[0], &w, TranscriptUpdate { transcribe_text: text("late"), ..Default::default() })
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_missing_parent_is_persistence_error() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();

    let err = store
        .create_segment_with_transcript(&ctx, 4242, 0, "http://blobs/x.wav", 1.0)
        .unwrap_err();
    assert!(matches!(err, DispatchError::Persistence(_)));
    assert_eq!(count_transcript_rows(&store), 0);
}

#[test]
fn test_expired_deadline_rolls_back_edit() {
    let (store, _guard) = create_test_store();
    let w = WorkerId::new("w1").unwrap();
    let (_, segments) = claimed_file(&store, &w, 1);
    let lifecycle = TranscriptLifecycle::new(&store);

    let expired = RequestContext::with_timeout(Duration::ZERO);
    let err = lifecycle
        .update(&expired, segments[0], &w, TranscriptUpdate { transcribe_text: text("hi"), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, DispatchError::DeadlineExceeded));

    let cancelled = RequestContext::background();
    cancelled.cancel();
    let err = lifecycle
        .update(&cancelled, segments[0], &w, TranscriptUpdate { transcribe_text: text("hi"), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled));

    let transcript = store
        .get_transcript(&RequestContext::background(), segments[0])
        .unwrap();
    assert_eq!(transcript.status, TranscriptStatus::Ready);
    assert_eq!(transcript.transcribe_text, None);
}

#[test]
fn test_start_stamps_viewed_at() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w = WorkerId::new("w1").unwrap();
    let (_, segments) = claimed_file(&store, &w, 1);
    let lifecycle = TranscriptLifecycle::new(&store);

    let transcript = lifecycle.start(&ctx, segments[0]).unwrap();
    assert!(transcript.viewed_at.is_some());
    assert!(lifecycle.start(&ctx, 777).unwrap_err().is_not_found());
}

#[test]
fn test_transcript_audit_listing() {
    let (store, _guard) = create_test_store();
    let ctx = RequestContext::background();
    let w1 = WorkerId::new("w1").unwrap();
    let (audio_id, segments) = claimed_file(&store, &w1, 3);
    let lifecycle = TranscriptLifecycle::new(&store);

    lifecycle
        .update(&ctx, segments[0], &w1, TranscriptUpdate { transcribe_text: text("a"), ..Default::default() })
        .unwrap();
    lifecycle
        .update(&ctx, segments[2], &w1, TranscriptUpdate { transcribe_text: text("c"), ..Default::default() })
        .unwrap();

    let by_worker = store
        .list_transcripts(
            &ctx,
            &TranscriptFilter {
                user_id: Some("w1".to_string()),
                ..Default::default()
            },
            Page::default(),
        )
        .unwrap();
    assert_eq!(by_worker.count, 2);
    assert!(by_worker.items.iter().all(|t| t.audio_id == audio_id));

    let ready = store
        .list_transcripts(
            &ctx,
            &TranscriptFilter {
                status: Some(TranscriptStatus::Ready),
                ..Default::default()
            },
            Page::default(),
        )
        .unwrap();
    assert_eq!(ready.count, 1);
    assert_eq!(ready.items[0].segment_id, segments[1]);
}
