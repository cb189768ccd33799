use sea_query::{Alias, Expr, Func, Order, Query, SelectStatement, SqliteQueryBuilder};

use crate::model::{Page, SegmentFilter};
use crate::schema::{AudioFiles, AudioSegments, Transcripts};

/// INSERT INTO audio_segments (audio_id, clip_index, file_path, duration, created_at)
/// VALUES (?, ?, ?, ?, ?) RETURNING id
pub fn insert(
    audio_id: i64,
    clip_index: i64,
    file_path: &str,
    duration: f64,
    now_ms: i64,
) -> String {
    Query::insert()
        .into_table(AudioSegments::Table)
        .columns([
            AudioSegments::AudioId,
            AudioSegments::ClipIndex,
            AudioSegments::FilePath,
            AudioSegments::Duration,
            AudioSegments::CreatedAt,
        ])
        .values_panic([
            audio_id.into(),
            clip_index.into(),
            file_path.into(),
            duration.into(),
            now_ms.into(),
        ])
        .returning_col(AudioSegments::Id)
        .to_string(SqliteQueryBuilder)
}

/// Live segments joined with their live transcript and live parent file
fn live_segments() -> SelectStatement {
    Query::select()
        .from(AudioSegments::Table)
        .inner_join(
            AudioFiles::Table,
            Expr::col((AudioSegments::Table, AudioSegments::AudioId))
                .equals((AudioFiles::Table, AudioFiles::Id)),
        )
        .inner_join(
            Transcripts::Table,
            Expr::col((Transcripts::Table, Transcripts::SegmentId))
                .equals((AudioSegments::Table, AudioSegments::Id)),
        )
        .and_where(Expr::col((AudioFiles::Table, AudioFiles::DeletedAt)).eq(0))
        .and_where(Expr::col((AudioSegments::Table, AudioSegments::DeletedAt)).eq(0))
        .and_where(Expr::col((Transcripts::Table, Transcripts::DeletedAt)).eq(0))
        .to_owned()
}

fn with_view_columns(stmt: &mut SelectStatement) -> &mut SelectStatement {
    stmt.column((AudioSegments::Table, AudioSegments::Id))
        .column((AudioSegments::Table, AudioSegments::AudioId))
        .expr_as(
            Expr::col((AudioFiles::Table, AudioFiles::Filename)),
            Alias::new("audio_name"),
        )
        .column((AudioSegments::Table, AudioSegments::ClipIndex))
        .column((AudioSegments::Table, AudioSegments::FilePath))
        .column((AudioSegments::Table, AudioSegments::Duration))
        .column((Transcripts::Table, Transcripts::Status))
        .column((AudioSegments::Table, AudioSegments::CreatedAt))
}

fn for_file(audio_id: i64, filter: &SegmentFilter) -> SelectStatement {
    let mut stmt = live_segments();
    stmt.and_where(Expr::col((AudioSegments::Table, AudioSegments::AudioId)).eq(audio_id));
    if let Some(status) = filter.status {
        stmt.and_where(Expr::col((Transcripts::Table, Transcripts::Status)).eq(status.as_str()));
    }
    if let Some(requested) = filter.audio_id {
        stmt.and_where(Expr::col((AudioSegments::Table, AudioSegments::AudioId)).eq(requested));
    }
    stmt
}

/// SELECT s.id, s.audio_id, a.filename AS audio_name, s.clip_index, s.file_path,
///        s.duration, t.status, s.created_at
/// FROM audio_segments s JOIN audio_files a ... JOIN transcripts t ...
/// WHERE s.id = ? AND <all live>
pub fn select_view_by_id(id: i64) -> String {
    let mut stmt = live_segments();
    with_view_columns(&mut stmt)
        .and_where(Expr::col((AudioSegments::Table, AudioSegments::Id)).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// Same columns as `select_view_by_id`, for one file, in creation order, windowed
pub fn select_for_file(audio_id: i64, filter: &SegmentFilter, page: Page) -> String {
    let mut stmt = for_file(audio_id, filter);
    with_view_columns(&mut stmt)
        .order_by((AudioSegments::Table, AudioSegments::Id), Order::Asc)
        .limit(page.limit)
        .offset(page.offset)
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(s.id) FROM ... WHERE s.audio_id = ? AND <filter> AND <all live>
pub fn count_for_file(audio_id: i64, filter: &SegmentFilter) -> String {
    for_file(audio_id, filter)
        .expr(Func::count(Expr::col((AudioSegments::Table, AudioSegments::Id))))
        .to_string(SqliteQueryBuilder)
}

/// SELECT audio_id FROM audio_segments WHERE id = ? AND deleted_at = 0
pub fn select_audio_id(id: i64) -> String {
    Query::select()
        .column(AudioSegments::AudioId)
        .from(AudioSegments::Table)
        .and_where(Expr::col(AudioSegments::Id).eq(id))
        .and_where(Expr::col(AudioSegments::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// SELECT clip_index FROM audio_segments WHERE audio_id = ? ORDER BY clip_index
/// Tombstoned clips count as persisted so a resume never re-creates them
pub fn select_clip_indexes(audio_id: i64) -> String {
    Query::select()
        .column(AudioSegments::ClipIndex)
        .from(AudioSegments::Table)
        .and_where(Expr::col(AudioSegments::AudioId).eq(audio_id))
        .order_by(AudioSegments::ClipIndex, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE audio_segments SET deleted_at = ? WHERE id = ? AND deleted_at = 0
pub fn soft_delete(id: i64, now_ms: i64) -> String {
    Query::update()
        .table(AudioSegments::Table)
        .value(AudioSegments::DeletedAt, now_ms)
        .and_where(Expr::col(AudioSegments::Id).eq(id))
        .and_where(Expr::col(AudioSegments::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// SELECT 1 FROM audio_segments WHERE id = ?
pub fn exists(id: i64) -> String {
    Query::select()
        .expr(Expr::val(1))
        .from(AudioSegments::Table)
        .and_where(Expr::col(AudioSegments::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TranscriptStatus;

    #[test]
    fn test_filter_adds_conditions() {
        let filter = SegmentFilter {
            status: Some(TranscriptStatus::Ready),
            audio_id: Some(3),
        };
        let sql = select_for_file(3, &filter, Page::default());
        assert!(sql.contains("'ready'"));
        assert!(sql.contains("LIMIT 100"));
        assert!(sql.contains("OFFSET 0"));
    }

    #[test]
    fn test_unfiltered_has_no_status_condition() {
        let sql = count_for_file(3, &SegmentFilter::default());
        assert!(!sql.contains("'ready'"));
        assert!(sql.contains("COUNT"));
    }
}
