use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

use transcribe_dispatch::assignment::WorkAssignmentEngine;
use transcribe_dispatch::blob::{BlobStore, LocalBlobStore};
use transcribe_dispatch::chunker::HttpChunker;
use transcribe_dispatch::config::{Config, StorageBackend};
use transcribe_dispatch::credentials;
use transcribe_dispatch::db::{self, SyncDb};
use transcribe_dispatch::ingest::ChunkingCoordinator;
use transcribe_dispatch::lifecycle::{TranscriptLifecycle, TranscriptUpdate};
use transcribe_dispatch::model::{parse_id, Page, SegmentFilter, TranscriptFilter, TranscriptStatus, WorkerId};
use transcribe_dispatch::sftp::{SftpBlobStore, SftpConfig};
use transcribe_dispatch::store::SegmentStore;
use transcribe_dispatch::{DispatchError, RequestContext};

type DynError = Box<dyn std::error::Error>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Distribute audio transcription work to human transcribers")]
struct Args {
    /// Path to config file (TOML format)
    #[arg(short, long, global = true, default_value = "transcribe_dispatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,
    /// Upload and chunk audio files (directories are searched recursively)
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Finish an ingestion that stopped part way
    Resume {
        #[arg(long)]
        file_id: String,
        path: PathBuf,
    },
    /// Claim or continue a file and list its segments
    Work {
        #[arg(long)]
        worker: String,
        /// Only segments whose transcript has this status (ready, done, invalid)
        #[arg(long)]
        status: Option<TranscriptStatus>,
        #[arg(long)]
        audio_id: Option<String>,
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(long, default_value = "100")]
        limit: u64,
    },
    /// Open a segment's transcript and record that it was viewed
    View {
        #[arg(long)]
        segment: String,
    },
    /// Submit a transcription or report for a segment
    Update {
        #[arg(long)]
        worker: String,
        #[arg(long)]
        segment: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        report: Option<String>,
        #[arg(long)]
        emotion: Option<String>,
        /// Mark every segment of the audio file invalid
        #[arg(long)]
        entire_file_invalid: bool,
    },
    /// Delete the transcript of a segment
    Delete {
        #[arg(long)]
        segment: String,
    },
    /// Delete a segment together with its transcript
    DeleteSegment {
        #[arg(long)]
        segment: String,
    },
    /// Show an audio file with transcript counts
    File {
        #[arg(long)]
        id: String,
    },
    /// List transcripts across files, most recently updated first
    Transcripts {
        #[arg(long)]
        status: Option<TranscriptStatus>,
        #[arg(long)]
        audio_id: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(long, default_value = "100")]
        limit: u64,
    },
}

fn main() -> Result<(), DynError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    match args.command {
        Command::Init => init(&config),
        Command::Ingest { paths } => ingest(&config, paths),
        Command::Resume { file_id, path } => resume(&config, &file_id, path),
        Command::Work {
            worker,
            status,
            audio_id,
            offset,
            limit,
        } => {
            let filter = SegmentFilter {
                status,
                audio_id: audio_id.as_deref().map(|id| parse_id(id, "audio")).transpose()?,
            };
            work(&config, &worker, filter, Page { offset, limit })
        }
        Command::View { segment } => {
            let store = SegmentStore::open(&config.database_path)?;
            let lifecycle = TranscriptLifecycle::new(&store);
            let transcript = lifecycle.start(&request_context(&config), parse_id(&segment, "segment")?)?;
            print_json(&transcript)
        }
        Command::Update {
            worker,
            segment,
            text,
            report,
            emotion,
            entire_file_invalid,
        } => {
            let store = SegmentStore::open(&config.database_path)?;
            let lifecycle = TranscriptLifecycle::new(&store);
            let update = TranscriptUpdate {
                transcribe_text: text,
                report_text: report,
                emotion,
                entire_file_invalid,
            };
            let outcome = lifecycle.update(
                &request_context(&config),
                parse_id(&segment, "segment")?,
                &WorkerId::new(worker)?,
                update,
            )?;
            print_json(&json!({
                "audio_id": outcome.audio_id,
                "status": outcome.status,
                "invalidated": outcome.invalidated,
                "file_completed": outcome.file_completed,
            }))
        }
        Command::Delete { segment } => {
            let store = SegmentStore::open(&config.database_path)?;
            let lifecycle = TranscriptLifecycle::new(&store);
            let deleted = lifecycle.delete(&request_context(&config), parse_id(&segment, "segment")?)?;
            print_json(&json!({ "deleted": deleted }))
        }
        Command::DeleteSegment { segment } => {
            let store = SegmentStore::open(&config.database_path)?;
            let deleted =
                store.soft_delete_segment(&request_context(&config), parse_id(&segment, "segment")?)?;
            print_json(&json!({ "deleted": deleted }))
        }
        Command::File { id } => {
            let store = SegmentStore::open(&config.database_path)?;
            let ctx = request_context(&config);
            let audio_id = parse_id(&id, "audio")?;
            let file = store.get_audio_file(&ctx, audio_id)?;
            let counts = store.status_counts(&ctx, audio_id)?;
            print_json(&json!({ "file": file, "transcripts": counts }))
        }
        Command::Transcripts {
            status,
            audio_id,
            user_id,
            offset,
            limit,
        } => {
            let store = SegmentStore::open(&config.database_path)?;
            let filter = TranscriptFilter {
                status,
                audio_id: audio_id.as_deref().map(|id| parse_id(id, "audio")).transpose()?,
                user_id,
            };
            let listing = store.list_transcripts(&request_context(&config), &filter, Page { offset, limit })?;
            print_json(&listing)
        }
    }
}

fn request_context(config: &Config) -> RequestContext {
    RequestContext::with_timeout(config.request_timeout())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DynError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init(config: &Config) -> Result<(), DynError> {
    let db = SyncDb::connect(&config.database_path)?;
    db::init_database_schema_sync(&db)?;
    info!("Initialised {}", config.database_path.display());
    Ok(())
}

fn open_blob_store(config: &Config) -> Result<Box<dyn BlobStore>, DispatchError> {
    let base_url = config.storage.base_url.clone();
    match config.storage.backend {
        StorageBackend::Local => {
            let dir = config.storage.local_dir.clone().ok_or_else(|| DispatchError::Config {
                message: "storage.local_dir is required for the local backend".to_string(),
            })?;
            Ok(Box::new(LocalBlobStore::new(dir, base_url)))
        }
        StorageBackend::Sftp => {
            let section = config.sftp.as_ref().ok_or_else(|| DispatchError::Config {
                message: "[sftp] section is missing in config".to_string(),
            })?;
            let credentials = credentials::load_credentials()?;
            let sftp_config = SftpConfig::from_storage_config(section, &credentials)?;
            let store = SftpBlobStore::connect(&sftp_config, &section.remote_dir, base_url)?;
            Ok(Box::new(store))
        }
    }
}

fn coordinator<'a>(
    config: &Config,
    store: &'a SegmentStore,
) -> Result<ChunkingCoordinator<'a, HttpChunker, Box<dyn BlobStore>>, DispatchError> {
    let chunker = HttpChunker::new(
        &config.chunker.url,
        Duration::from_secs(config.chunker.timeout_secs),
    )?;
    Ok(ChunkingCoordinator::new(store, chunker, open_blob_store(config)?)
        .with_clip_bounds(config.chunker.min_clip_seconds, config.chunker.max_clip_seconds))
}

fn ingest(config: &Config, paths: Vec<PathBuf>) -> Result<(), DynError> {
    let store = SegmentStore::open(&config.database_path)?;
    let coordinator = coordinator(config, &store)?;
    let outcomes = coordinator.ingest_batch(&RequestContext::background(), &paths)?;

    let report: Vec<_> = outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(report) => json!({ "path": outcome.path, "ingested": report }),
            Err(e) => json!({
                "path": outcome.path,
                "audio_id": outcome.audio_id,
                "error": e.to_string(),
            }),
        })
        .collect();
    print_json(&report)?;

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        return Err(format!("{} of {} files failed to ingest", failed, outcomes.len()).into());
    }
    Ok(())
}

fn resume(config: &Config, file_id: &str, path: PathBuf) -> Result<(), DynError> {
    let store = SegmentStore::open(&config.database_path)?;
    let coordinator = coordinator(config, &store)?;
    let report = coordinator.resume_ingestion(
        &RequestContext::background(),
        parse_id(file_id, "audio")?,
        &path,
    )?;
    print_json(&report)
}

fn work(config: &Config, worker: &str, filter: SegmentFilter, page: Page) -> Result<(), DynError> {
    let store = SegmentStore::open(&config.database_path)?;
    let engine = WorkAssignmentEngine::new(&store);
    let assignment = engine.request_work(&request_context(config), &WorkerId::new(worker)?, &filter, page)?;
    print_json(&assignment)
}
