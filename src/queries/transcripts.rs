use sea_query::{Alias, Expr, Func, Order, Query, SelectStatement, SqliteQueryBuilder};

use crate::model::{Page, TranscriptEdit, TranscriptFilter, TranscriptStatus};
use crate::schema::{AudioFiles, AudioSegments, Transcripts};

/// INSERT INTO transcripts (segment_id, status, created_at, updated_at)
/// VALUES (?, 'ready', ?, ?) RETURNING id
pub fn insert_ready(segment_id: i64, now_ms: i64) -> String {
    Query::insert()
        .into_table(Transcripts::Table)
        .columns([
            Transcripts::SegmentId,
            Transcripts::Status,
            Transcripts::CreatedAt,
            Transcripts::UpdatedAt,
        ])
        .values_panic([
            segment_id.into(),
            TranscriptStatus::Ready.as_str().into(),
            now_ms.into(),
            now_ms.into(),
        ])
        .returning_col(Transcripts::Id)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE transcripts SET [transcribe_text = ?,] [report_text = ?,] [emotion = ?,]
///        user_id = ?, status = ?, updated_at = ?
/// WHERE segment_id = ? AND deleted_at = 0
///
/// Columns the edit leaves as `None` are not touched.
pub fn apply_edit(
    segment_id: i64,
    edit: &TranscriptEdit,
    user_id: &str,
    status: TranscriptStatus,
    now_ms: i64,
) -> String {
    let mut stmt = Query::update();
    stmt.table(Transcripts::Table);
    if let Some(text) = &edit.transcribe_text {
        stmt.value(Transcripts::TranscribeText, text.as_str());
    }
    if let Some(report) = &edit.report_text {
        stmt.value(Transcripts::ReportText, report.as_str());
    }
    if let Some(emotion) = &edit.emotion {
        stmt.value(Transcripts::Emotion, emotion.as_str());
    }
    stmt.value(Transcripts::UserId, user_id)
        .value(Transcripts::Status, status.as_str())
        .value(Transcripts::UpdatedAt, now_ms)
        .and_where(Expr::col(Transcripts::SegmentId).eq(segment_id))
        .and_where(Expr::col(Transcripts::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

fn segments_of_file(audio_id: i64) -> SelectStatement {
    Query::select()
        .column(AudioSegments::Id)
        .from(AudioSegments::Table)
        .and_where(Expr::col(AudioSegments::AudioId).eq(audio_id))
        .to_owned()
}

/// UPDATE transcripts SET status = 'invalid', updated_at = ?
/// WHERE deleted_at = 0 AND segment_id IN (SELECT id FROM audio_segments WHERE audio_id = ?)
pub fn invalidate_for_file(audio_id: i64, now_ms: i64) -> String {
    Query::update()
        .table(Transcripts::Table)
        .value(Transcripts::Status, TranscriptStatus::Invalid.as_str())
        .value(Transcripts::UpdatedAt, now_ms)
        .and_where(Expr::col(Transcripts::DeletedAt).eq(0))
        .and_where(Expr::col(Transcripts::SegmentId).in_subquery(segments_of_file(audio_id)))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE transcripts SET viewed_at = ? WHERE segment_id IN (...) AND deleted_at = 0
pub fn mark_viewed(segment_ids: &[i64], now_ms: i64) -> String {
    Query::update()
        .table(Transcripts::Table)
        .value(Transcripts::ViewedAt, now_ms)
        .and_where(Expr::col(Transcripts::SegmentId).is_in(segment_ids.iter().copied()))
        .and_where(Expr::col(Transcripts::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE transcripts SET deleted_at = ? WHERE segment_id = ? AND deleted_at = 0
pub fn soft_delete_by_segment(segment_id: i64, now_ms: i64) -> String {
    Query::update()
        .table(Transcripts::Table)
        .value(Transcripts::DeletedAt, now_ms)
        .and_where(Expr::col(Transcripts::SegmentId).eq(segment_id))
        .and_where(Expr::col(Transcripts::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE transcripts SET deleted_at = ? WHERE id = ? AND deleted_at = 0
pub fn soft_delete(id: i64, now_ms: i64) -> String {
    Query::update()
        .table(Transcripts::Table)
        .value(Transcripts::DeletedAt, now_ms)
        .and_where(Expr::col(Transcripts::Id).eq(id))
        .and_where(Expr::col(Transcripts::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// SELECT 1 FROM transcripts WHERE id = ?
pub fn exists(id: i64) -> String {
    Query::select()
        .expr(Expr::val(1))
        .from(Transcripts::Table)
        .and_where(Expr::col(Transcripts::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// Live transcripts joined with their live segment and live file
fn live_transcripts() -> SelectStatement {
    Query::select()
        .from(Transcripts::Table)
        .inner_join(
            AudioSegments::Table,
            Expr::col((Transcripts::Table, Transcripts::SegmentId))
                .equals((AudioSegments::Table, AudioSegments::Id)),
        )
        .inner_join(
            AudioFiles::Table,
            Expr::col((AudioSegments::Table, AudioSegments::AudioId))
                .equals((AudioFiles::Table, AudioFiles::Id)),
        )
        .and_where(Expr::col((Transcripts::Table, Transcripts::DeletedAt)).eq(0))
        .and_where(Expr::col((AudioSegments::Table, AudioSegments::DeletedAt)).eq(0))
        .and_where(Expr::col((AudioFiles::Table, AudioFiles::DeletedAt)).eq(0))
        .to_owned()
}

fn with_transcript_columns(stmt: &mut SelectStatement) -> &mut SelectStatement {
    stmt.column((Transcripts::Table, Transcripts::Id))
        .column((Transcripts::Table, Transcripts::SegmentId))
        .column((AudioSegments::Table, AudioSegments::AudioId))
        .expr_as(
            Expr::col((AudioFiles::Table, AudioFiles::Filename)),
            Alias::new("audio_name"),
        )
        .column((Transcripts::Table, Transcripts::UserId))
        .column((Transcripts::Table, Transcripts::AiText))
        .column((Transcripts::Table, Transcripts::TranscribeText))
        .column((Transcripts::Table, Transcripts::ReportText))
        .column((Transcripts::Table, Transcripts::Emotion))
        .column((Transcripts::Table, Transcripts::Status))
        .column((Transcripts::Table, Transcripts::CreatedAt))
        .column((Transcripts::Table, Transcripts::UpdatedAt))
        .column((Transcripts::Table, Transcripts::ViewedAt))
}

fn filtered(filter: &TranscriptFilter) -> SelectStatement {
    let mut stmt = live_transcripts();
    if let Some(status) = filter.status {
        stmt.and_where(Expr::col((Transcripts::Table, Transcripts::Status)).eq(status.as_str()));
    }
    if let Some(audio_id) = filter.audio_id {
        stmt.and_where(Expr::col((AudioSegments::Table, AudioSegments::AudioId)).eq(audio_id));
    }
    if let Some(user_id) = &filter.user_id {
        stmt.and_where(Expr::col((Transcripts::Table, Transcripts::UserId)).eq(user_id.as_str()));
    }
    stmt
}

/// SELECT t.*, s.audio_id, a.filename AS audio_name FROM transcripts t
/// JOIN audio_segments s ... JOIN audio_files a ...
/// WHERE t.segment_id = ? AND <all live>
pub fn select_by_segment(segment_id: i64) -> String {
    let mut stmt = live_transcripts();
    with_transcript_columns(&mut stmt)
        .and_where(Expr::col((Transcripts::Table, Transcripts::SegmentId)).eq(segment_id))
        .to_string(SqliteQueryBuilder)
}

/// Same columns as `select_by_segment`, newest first, windowed
pub fn select_list(filter: &TranscriptFilter, page: Page) -> String {
    let mut stmt = filtered(filter);
    with_transcript_columns(&mut stmt)
        .order_by((Transcripts::Table, Transcripts::UpdatedAt), Order::Desc)
        .order_by((Transcripts::Table, Transcripts::Id), Order::Desc)
        .limit(page.limit)
        .offset(page.offset)
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(t.id) FROM ... WHERE <filter> AND <all live>
pub fn count_list(filter: &TranscriptFilter) -> String {
    filtered(filter)
        .expr(Func::count(Expr::col((Transcripts::Table, Transcripts::Id))))
        .to_string(SqliteQueryBuilder)
}

/// SELECT t.status, COUNT(t.id) FROM ... WHERE s.audio_id = ? AND <all live> GROUP BY t.status
pub fn status_counts_for_file(audio_id: i64) -> String {
    live_transcripts()
        .column((Transcripts::Table, Transcripts::Status))
        .expr(Func::count(Expr::col((Transcripts::Table, Transcripts::Id))))
        .and_where(Expr::col((AudioSegments::Table, AudioSegments::AudioId)).eq(audio_id))
        .group_by_col((Transcripts::Table, Transcripts::Status))
        .to_string(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_only_touches_supplied_columns() {
        let edit = TranscriptEdit {
            transcribe_text: Some("hello".to_string()),
            report_text: None,
            emotion: None,
        };
        let sql = apply_edit(5, &edit, "w1", TranscriptStatus::Done, 10);
        assert!(sql.contains("\"transcribe_text\" = 'hello'"));
        assert!(!sql.contains("report_text"));
        assert!(!sql.contains("emotion"));
        assert!(sql.contains("\"status\" = 'done'"));
        assert!(sql.contains("\"user_id\" = 'w1'"));
    }

    #[test]
    fn test_invalidate_scoped_to_file() {
        let sql = invalidate_for_file(9, 10);
        assert!(sql.contains("'invalid'"));
        assert!(sql.contains("\"audio_id\" = 9"));
    }

    #[test]
    fn test_list_orders_newest_first() {
        let filter = TranscriptFilter {
            user_id: Some("w1".to_string()),
            ..Default::default()
        };
        let sql = select_list(&filter, Page { offset: 5, limit: 10 });
        assert!(sql.contains("DESC"));
        assert!(sql.contains("'w1'"));
        assert!(sql.contains("LIMIT 10"));
    }
}
