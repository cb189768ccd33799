//! Chunking coordinator: turns uploaded audio into persisted
//! (segment, transcript) pairs.
//!
//! A file is registered before chunking starts and only becomes claimable
//! after its last clip is stored. When a clip fails, ingestion of that file
//! stops; clips already stored stay, and `resume_ingestion` picks up from the
//! first missing clip index.

use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::chunker::{ChunkJob, Chunker};
use crate::constants::{AUDIO_EXTENSIONS, DEFAULT_MAX_CLIP_SECONDS, DEFAULT_MIN_CLIP_SECONDS};
use crate::context::RequestContext;
use crate::error::{DispatchError, Result};
use crate::store::SegmentStore;

/// Summary of one file's ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub audio_id: i64,
    pub filename: String,
    pub clips_total: usize,
    pub clips_created: usize,
    /// Clips already stored by an earlier attempt
    pub clips_skipped: usize,
}

/// Outcome for one file of a batch
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    /// Set once the file is registered, also when a later step failed
    pub audio_id: Option<i64>,
    pub result: Result<IngestReport>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Whether the path has one of the accepted audio extensions
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand files and directories into the audio files below them, sorted
pub fn collect_audio_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for input in inputs {
        if input.is_dir() {
            walk_dir(input, &mut found)?;
        } else if is_audio_file(input) {
            found.push(input.clone());
        } else {
            warn!("Skipping non-audio file {}", input.display());
        }
    }
    Ok(found)
}

fn walk_dir(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk_dir(&path, found)?;
        } else if is_audio_file(&path) {
            found.push(path);
        }
    }
    Ok(())
}

pub struct ChunkingCoordinator<'a, C, B> {
    store: &'a SegmentStore,
    chunker: C,
    blobs: B,
    min_clip_seconds: u32,
    max_clip_seconds: u32,
}

impl<'a, C: Chunker, B: BlobStore> ChunkingCoordinator<'a, C, B> {
    pub fn new(store: &'a SegmentStore, chunker: C, blobs: B) -> Self {
        Self {
            store,
            chunker,
            blobs,
            min_clip_seconds: DEFAULT_MIN_CLIP_SECONDS,
            max_clip_seconds: DEFAULT_MAX_CLIP_SECONDS,
        }
    }

    pub fn with_clip_bounds(mut self, min_clip_seconds: u32, max_clip_seconds: u32) -> Self {
        self.min_clip_seconds = min_clip_seconds;
        self.max_clip_seconds = max_clip_seconds;
        self
    }

    /// Ingest every audio file found under `inputs`. A failing file is
    /// reported in its outcome and the batch moves on.
    pub fn ingest_batch(&self, ctx: &RequestContext, inputs: &[PathBuf]) -> Result<Vec<FileOutcome>> {
        let files = collect_audio_files(inputs)?;
        info!("Ingesting {} audio files", files.len());

        let mut outcomes = Vec::with_capacity(files.len());
        for path in files {
            if let Err(e) = ctx.check() {
                outcomes.push(FileOutcome {
                    path,
                    audio_id: None,
                    result: Err(e),
                });
                continue;
            }
            let mut audio_id = None;
            let result = self.ingest_path(ctx, &path, &mut audio_id);
            if let Err(e) = &result {
                warn!("Ingestion of {} failed: {}", path.display(), e);
            }
            outcomes.push(FileOutcome {
                path,
                audio_id,
                result,
            });
        }

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(
            "Batch finished: {} ingested, {} failed",
            outcomes.len() - failed,
            failed
        );
        Ok(outcomes)
    }

    /// Upload, register and chunk one audio file
    pub fn ingest_file(&self, ctx: &RequestContext, path: &Path) -> Result<IngestReport> {
        let mut audio_id = None;
        self.ingest_path(ctx, path, &mut audio_id)
    }

    fn ingest_path(
        &self,
        ctx: &RequestContext,
        path: &Path,
        audio_id_out: &mut Option<i64>,
    ) -> Result<IngestReport> {
        let filename = file_name_of(path)?;
        let audio = fs::read(path)?;
        self.ingest_bytes(ctx, &filename, &audio, audio_id_out)
    }

    /// Ingest audio already in memory
    fn ingest_bytes(
        &self,
        ctx: &RequestContext,
        filename: &str,
        audio: &[u8],
        audio_id_out: &mut Option<i64>,
    ) -> Result<IngestReport> {
        ctx.check()?;
        let original_name = format!("audio/{}/{}", Uuid::new_v4(), filename);
        let locator = self.blobs.put(&original_name, audio)?;

        let audio_id = match self.store.register_audio_file(ctx, filename, &locator) {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Registering {} failed, uploaded original {} is orphaned: {}",
                    filename, locator, e
                );
                return Err(e);
            }
        };
        *audio_id_out = Some(audio_id);

        let job = self.submit(audio, filename)?;
        self.store
            .set_expected_segments(ctx, audio_id, job.clips.len() as i64)?;

        let created = self.persist_clips(ctx, audio_id, &job, &HashSet::new())?;
        self.store.mark_ingested(ctx, audio_id)?;
        info!(
            "Audio file {} ({}) ingested with {} segments",
            audio_id, filename, created
        );

        Ok(IngestReport {
            audio_id,
            filename: filename.to_string(),
            clips_total: job.clips.len(),
            clips_created: created,
            clips_skipped: 0,
        })
    }

    /// Finish a file whose earlier ingestion stopped part way. Clip indexes
    /// already stored are skipped. A fully ingested file is left untouched.
    pub fn resume_ingestion(&self, ctx: &RequestContext, audio_id: i64, path: &Path) -> Result<IngestReport> {
        let file = self.store.get_audio_file(ctx, audio_id)?;
        if file.is_fully_ingested() {
            let total = file.expected_segments.unwrap_or(0).max(0) as usize;
            return Ok(IngestReport {
                audio_id,
                filename: file.filename,
                clips_total: total,
                clips_created: 0,
                clips_skipped: total,
            });
        }

        let audio = fs::read(path)?;
        let job = self.submit(&audio, &file.filename)?;
        if let Some(expected) = file.expected_segments {
            if expected != job.clips.len() as i64 {
                return Err(DispatchError::external(
                    "chunker",
                    format!(
                        "clip count changed from {} to {} for audio file {}",
                        expected,
                        job.clips.len(),
                        audio_id
                    ),
                ));
            }
        } else {
            self.store
                .set_expected_segments(ctx, audio_id, job.clips.len() as i64)?;
        }

        let persisted: HashSet<i64> = self
            .store
            .persisted_clip_indexes(ctx, audio_id)?
            .into_iter()
            .collect();
        let created = self.persist_clips(ctx, audio_id, &job, &persisted)?;
        self.store.mark_ingested(ctx, audio_id)?;
        info!(
            "Audio file {} resumed: {} segments created, {} already present",
            audio_id,
            created,
            job.clips.len() - created
        );

        Ok(IngestReport {
            audio_id,
            filename: file.filename,
            clips_total: job.clips.len(),
            clips_created: created,
            clips_skipped: job.clips.len() - created,
        })
    }

    fn submit(&self, audio: &[u8], filename: &str) -> Result<ChunkJob> {
        let job = self
            .chunker
            .submit(audio, filename, self.min_clip_seconds, self.max_clip_seconds)?;
        // A file without clips would be claimable but never completable
        if job.clips.is_empty() {
            return Err(DispatchError::external(
                "chunker",
                format!("no clips produced for {}", filename),
            ));
        }
        Ok(job)
    }

    /// Store every clip of `job` whose index is not in `skip`, in order,
    /// stopping at the first failure
    fn persist_clips(
        &self,
        ctx: &RequestContext,
        audio_id: i64,
        job: &ChunkJob,
        skip: &HashSet<i64>,
    ) -> Result<usize> {
        let mut created = 0;
        for (index, clip) in job.clips.iter().enumerate() {
            let clip_index = index as i64;
            if skip.contains(&clip_index) {
                continue;
            }
            ctx.check()?;

            let stored = self
                .chunker
                .fetch_clip(&job.job_id, &clip.clip_id)
                .and_then(|bytes| {
                    let name = format!("segments/{}/{:05}-{}", audio_id, clip_index, clip.clip_id);
                    self.blobs.put(&name, &bytes)
                })
                .and_then(|locator| {
                    self.store.create_segment_with_transcript(
                        ctx,
                        audio_id,
                        clip_index,
                        &locator,
                        clip.duration(),
                    )
                });
            if let Err(e) = stored {
                warn!(
                    "Audio file {}: clip {} of {} failed: {}",
                    audio_id,
                    clip_index,
                    job.clips.len(),
                    e
                );
                return Err(e);
            }
            created += 1;
        }
        Ok(created)
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .ok_or_else(|| DispatchError::validation(format!("invalid file name '{}'", path.display())))
}
