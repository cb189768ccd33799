//! SQLite database handle for the store
//!
//! The pool is async (sqlx) but every caller of the store is blocking, so the
//! pool is wrapped together with its own tokio runtime.

use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Runtime;

use crate::constants::{generate_db_unique_id, EXPECTED_DB_VERSION};
use crate::context::RequestContext;
use crate::error::{DispatchError, Result};
use crate::queries::{ddl, metadata};

/// How long a writer waits on the SQLite lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_CONNECTIONS: u32 = 4;

/// Synchronous database wrapper that owns a runtime for blocking operations.
///
/// The runtime is multi-threaded so one `SyncDb` can be shared across
/// threads, each blocking on its own request.
pub struct SyncDb {
    pool: SqlitePool,
    runtime: Runtime,
}

impl SyncDb {
    /// Open (creating if missing) the SQLite file at `path`
    pub fn connect(path: &Path) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("dispatch-db")
            .enable_all()
            .build()?;
        let pool = runtime.block_on(open_sqlite_pool(path))?;
        Ok(Self { pool, runtime })
    }

    /// Drive `fut` to completion on the embedded runtime, bounded by the
    /// context's deadline and cancellation.
    pub fn block_on<F, T>(&self, ctx: &RequestContext, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.runtime.block_on(ctx.run(fut))
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Open a connection pool with WAL journaling, foreign keys and a busy timeout
pub async fn open_sqlite_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    debug!("SQLite database: {}", path.display());
    Ok(pool)
}

/// Create tables and indexes, then record version and unique id.
/// Safe to run against an already initialised database.
pub async fn init_database_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        ddl::create_metadata_table(),
        ddl::create_audio_files_table(),
        ddl::create_audio_segments_table(),
        ddl::create_transcripts_table(),
        ddl::create_audio_files_claim_index(),
        ddl::create_audio_segments_clip_index(),
        ddl::create_transcripts_status_index(),
        ddl::create_one_claim_per_worker_index(),
    ];
    for sql in &statements {
        sqlx::query(sql).execute(pool).await?;
    }

    insert_metadata_if_absent(pool, "version", EXPECTED_DB_VERSION).await?;
    insert_metadata_if_absent(pool, "unique_id", &generate_db_unique_id()).await?;

    verify_schema_version(pool).await?;
    info!("Database schema ready (version {})", EXPECTED_DB_VERSION);
    Ok(())
}

/// Reject databases written by an incompatible schema version
pub async fn verify_schema_version(pool: &SqlitePool) -> Result<()> {
    match query_metadata(pool, "version").await? {
        Some(version) if version == EXPECTED_DB_VERSION => Ok(()),
        Some(version) => Err(DispatchError::SchemaVersion {
            found: version,
            expected: EXPECTED_DB_VERSION.to_string(),
        }),
        None => Err(DispatchError::SchemaVersion {
            found: String::new(),
            expected: EXPECTED_DB_VERSION.to_string(),
        }),
    }
}

/// Query a single metadata value by key
pub async fn query_metadata<'e, E>(executor: E, key: &str) -> Result<Option<String>>
where
    E: Executor<'e, Database = sqlx::Sqlite>,
{
    let sql = metadata::select_by_key(key);
    let row = sqlx::query(&sql).fetch_optional(executor).await?;
    Ok(row.map(|row| row.get::<String, _>(0)))
}

/// Insert a metadata key-value pair unless the key already exists
pub async fn insert_metadata_if_absent<'e, E>(executor: E, key: &str, value: &str) -> Result<()>
where
    E: Executor<'e, Database = sqlx::Sqlite>,
{
    let sql = metadata::insert_if_absent(key, value);
    sqlx::query(&sql).execute(executor).await?;
    Ok(())
}

/// Sync wrapper: Initialize database schema
pub fn init_database_schema_sync(db: &SyncDb) -> Result<()> {
    db.block_on(&RequestContext::background(), init_database_schema(db.pool()))
}

/// Sync wrapper: Verify the schema version of an existing database
pub fn verify_schema_version_sync(db: &SyncDb) -> Result<()> {
    db.block_on(&RequestContext::background(), verify_schema_version(db.pool()))
}

/// Sync wrapper: Query metadata
pub fn query_metadata_sync(db: &SyncDb, key: &str) -> Result<Option<String>> {
    db.block_on(&RequestContext::background(), query_metadata(db.pool(), key))
}

/// Create an initialised database in a temporary directory for tests.
/// Keep the returned guard alive for as long as the database is used.
pub fn create_test_database() -> Result<(SyncDb, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let db = SyncDb::connect(&dir.path().join("test.sqlite"))?;
    init_database_schema_sync(&db)?;
    Ok((db, dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init_is_repeatable() {
        let (db, _guard) = create_test_database().unwrap();
        let first = query_metadata_sync(&db, "unique_id").unwrap().unwrap();

        init_database_schema_sync(&db).unwrap();
        let second = query_metadata_sync(&db, "unique_id").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            query_metadata_sync(&db, "version").unwrap().as_deref(),
            Some(EXPECTED_DB_VERSION)
        );
    }

    #[test]
    fn test_rejects_other_version() {
        let (db, _guard) = create_test_database().unwrap();
        db.block_on(&RequestContext::background(), async {
            sqlx::query("UPDATE metadata SET value = '0' WHERE key = 'version'")
                .execute(db.pool())
                .await?;
            Ok(())
        })
        .unwrap();

        let err = verify_schema_version_sync(&db).unwrap_err();
        assert!(matches!(err, DispatchError::SchemaVersion { .. }));
    }

    #[test]
    fn test_expired_context_does_not_run() {
        let (db, _guard) = create_test_database().unwrap();
        let ctx = RequestContext::with_timeout(Duration::ZERO);
        let res = db.block_on(&ctx, async { Ok(1) });
        assert!(matches!(res, Err(DispatchError::DeadlineExceeded)));
    }
}
