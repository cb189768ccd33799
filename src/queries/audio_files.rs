use sea_query::{Expr, Order, Query, SelectStatement, SqliteQueryBuilder};

use crate::schema::{AudioFiles, AudioSegments, Transcripts};

const ALL_COLUMNS: [AudioFiles; 9] = [
    AudioFiles::Id,
    AudioFiles::Filename,
    AudioFiles::FilePath,
    AudioFiles::Status,
    AudioFiles::ClaimedBy,
    AudioFiles::ExpectedSegments,
    AudioFiles::IngestedAt,
    AudioFiles::CreatedAt,
    AudioFiles::UpdatedAt,
];

/// INSERT INTO audio_files (filename, file_path, status, created_at, updated_at)
/// VALUES (?, ?, 'pending', ?, ?) RETURNING id
pub fn insert(filename: &str, file_path: &str, now_ms: i64) -> String {
    Query::insert()
        .into_table(AudioFiles::Table)
        .columns([
            AudioFiles::Filename,
            AudioFiles::FilePath,
            AudioFiles::Status,
            AudioFiles::CreatedAt,
            AudioFiles::UpdatedAt,
        ])
        .values_panic([
            filename.into(),
            file_path.into(),
            "pending".into(),
            now_ms.into(),
            now_ms.into(),
        ])
        .returning_col(AudioFiles::Id)
        .to_string(SqliteQueryBuilder)
}

/// SELECT <all> FROM audio_files WHERE id = ? AND deleted_at = 0
pub fn select_by_id(id: i64) -> String {
    Query::select()
        .columns(ALL_COLUMNS)
        .from(AudioFiles::Table)
        .and_where(Expr::col(AudioFiles::Id).eq(id))
        .and_where(Expr::col(AudioFiles::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

fn processing_for_worker(worker_id: &str) -> SelectStatement {
    Query::select()
        .column(AudioFiles::Id)
        .from(AudioFiles::Table)
        .and_where(Expr::col(AudioFiles::Status).eq("processing"))
        .and_where(Expr::col(AudioFiles::ClaimedBy).eq(worker_id))
        .and_where(Expr::col(AudioFiles::DeletedAt).eq(0))
        .to_owned()
}

/// SELECT id FROM audio_files
/// WHERE status = 'processing' AND claimed_by = ? AND deleted_at = 0
/// ORDER BY created_at, id LIMIT 1
pub fn select_processing_for_worker(worker_id: &str) -> String {
    processing_for_worker(worker_id)
        .order_by(AudioFiles::CreatedAt, Order::Asc)
        .order_by(AudioFiles::Id, Order::Asc)
        .limit(1)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE audio_files SET status = 'processing', claimed_by = ?, updated_at = ?
/// WHERE id IN (SELECT id FROM audio_files
///              WHERE status = 'pending' AND claimed_by IS NULL AND deleted_at = 0
///                AND ingested_at <> 0
///              ORDER BY created_at, id LIMIT 1)
///   AND status = 'pending' AND claimed_by IS NULL
///   AND NOT EXISTS (<worker already processing>)
/// RETURNING id
///
/// One statement, so picking the candidate and flipping it happen under the
/// same write lock. A caller that loses the race sees the next-oldest file.
pub fn claim_oldest_pending(worker_id: &str, now_ms: i64) -> String {
    let candidate = Query::select()
        .column(AudioFiles::Id)
        .from(AudioFiles::Table)
        .and_where(Expr::col(AudioFiles::Status).eq("pending"))
        .and_where(Expr::col(AudioFiles::ClaimedBy).is_null())
        .and_where(Expr::col(AudioFiles::DeletedAt).eq(0))
        .and_where(Expr::col(AudioFiles::IngestedAt).ne(0))
        .order_by(AudioFiles::CreatedAt, Order::Asc)
        .order_by(AudioFiles::Id, Order::Asc)
        .limit(1)
        .to_owned();

    Query::update()
        .table(AudioFiles::Table)
        .value(AudioFiles::Status, "processing")
        .value(AudioFiles::ClaimedBy, worker_id)
        .value(AudioFiles::UpdatedAt, now_ms)
        .and_where(Expr::col(AudioFiles::Id).in_subquery(candidate))
        .and_where(Expr::col(AudioFiles::Status).eq("pending"))
        .and_where(Expr::col(AudioFiles::ClaimedBy).is_null())
        .and_where(Expr::exists(processing_for_worker(worker_id)).not())
        .returning_col(AudioFiles::Id)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE audio_files SET expected_segments = ?, updated_at = ? WHERE id = ? AND deleted_at = 0
pub fn set_expected_segments(id: i64, expected: i64, now_ms: i64) -> String {
    Query::update()
        .table(AudioFiles::Table)
        .value(AudioFiles::ExpectedSegments, expected)
        .value(AudioFiles::UpdatedAt, now_ms)
        .and_where(Expr::col(AudioFiles::Id).eq(id))
        .and_where(Expr::col(AudioFiles::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE audio_files SET ingested_at = ?, updated_at = ? WHERE id = ? AND deleted_at = 0
pub fn mark_ingested(id: i64, now_ms: i64) -> String {
    Query::update()
        .table(AudioFiles::Table)
        .value(AudioFiles::IngestedAt, now_ms)
        .value(AudioFiles::UpdatedAt, now_ms)
        .and_where(Expr::col(AudioFiles::Id).eq(id))
        .and_where(Expr::col(AudioFiles::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE audio_files SET status = 'error', updated_at = ? WHERE id = ? AND deleted_at = 0
pub fn mark_error(id: i64, now_ms: i64) -> String {
    Query::update()
        .table(AudioFiles::Table)
        .value(AudioFiles::Status, "error")
        .value(AudioFiles::UpdatedAt, now_ms)
        .and_where(Expr::col(AudioFiles::Id).eq(id))
        .and_where(Expr::col(AudioFiles::DeletedAt).eq(0))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE audio_files SET status = 'done', updated_at = ?
/// WHERE id = ? AND status = 'processing' AND deleted_at = 0
///   AND NOT EXISTS (SELECT 1 FROM transcripts t JOIN audio_segments s ON t.segment_id = s.id
///                   WHERE s.audio_id = ? AND t.status = 'ready'
///                     AND t.deleted_at = 0 AND s.deleted_at = 0)
pub fn complete_if_drained(id: i64, now_ms: i64) -> String {
    let remaining = Query::select()
        .expr(Expr::val(1))
        .from(Transcripts::Table)
        .inner_join(
            AudioSegments::Table,
            Expr::col((Transcripts::Table, Transcripts::SegmentId))
                .equals((AudioSegments::Table, AudioSegments::Id)),
        )
        .and_where(Expr::col((AudioSegments::Table, AudioSegments::AudioId)).eq(id))
        .and_where(Expr::col((Transcripts::Table, Transcripts::Status)).eq("ready"))
        .and_where(Expr::col((Transcripts::Table, Transcripts::DeletedAt)).eq(0))
        .and_where(Expr::col((AudioSegments::Table, AudioSegments::DeletedAt)).eq(0))
        .to_owned();

    Query::update()
        .table(AudioFiles::Table)
        .value(AudioFiles::Status, "done")
        .value(AudioFiles::UpdatedAt, now_ms)
        .and_where(Expr::col(AudioFiles::Id).eq(id))
        .and_where(Expr::col(AudioFiles::Status).eq("processing"))
        .and_where(Expr::col(AudioFiles::DeletedAt).eq(0))
        .and_where(Expr::exists(remaining).not())
        .to_string(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_single_statement() {
        let sql = claim_oldest_pending("worker-1", 1000);
        assert!(sql.starts_with("UPDATE"));
        assert!(sql.contains("RETURNING"));
        assert!(sql.contains("NOT"));
        assert!(sql.contains("EXISTS"));
        assert!(sql.contains("LIMIT 1"));
        assert!(sql.contains("'worker-1'"));
    }

    #[test]
    fn test_select_by_id_excludes_deleted() {
        let sql = select_by_id(7);
        assert!(sql.contains("\"deleted_at\" = 0"));
    }
}
