//! Client for the external VAD chunking service.

use log::debug;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{DispatchError, Result};

const SERVICE: &str = "chunker";

/// One speech-bounded clip reported by the chunker, times in seconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClipDescriptor {
    pub start: f64,
    pub end: f64,
    #[serde(rename = "chunk_id")]
    pub clip_id: String,
}

impl ClipDescriptor {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Result of submitting one audio file, clips in playback order
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkJob {
    pub job_id: String,
    #[serde(rename = "chunks")]
    pub clips: Vec<ClipDescriptor>,
}

pub trait Chunker {
    fn submit(
        &self,
        audio: &[u8],
        filename: &str,
        min_clip_seconds: u32,
        max_clip_seconds: u32,
    ) -> Result<ChunkJob>;

    fn fetch_clip(&self, job_id: &str, clip_id: &str) -> Result<Vec<u8>>;
}

/// Chunker reached over HTTP: `POST {base}/vad-chunk` and
/// `GET {base}/download/{job_id}/{clip_id}`
pub struct HttpChunker {
    client: Client,
    base_url: String,
}

impl HttpChunker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::external(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn clip_url(&self, job_id: &str, clip_id: &str) -> String {
        format!(
            "{}/download/{}/{}",
            self.base_url,
            urlencoding::encode(job_id),
            urlencoding::encode(clip_id)
        )
    }
}

impl Chunker for HttpChunker {
    fn submit(
        &self,
        audio: &[u8],
        filename: &str,
        min_clip_seconds: u32,
        max_clip_seconds: u32,
    ) -> Result<ChunkJob> {
        let part = Part::bytes(audio.to_vec()).file_name(filename.to_string());
        let form = Form::new()
            .part("audio_file", part)
            .text("min_duration", min_clip_seconds.to_string())
            .text("max_duration", max_clip_seconds.to_string());

        let url = format!("{}/vad-chunk", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .map_err(|e| DispatchError::external(SERVICE, format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::external(
                SERVICE,
                format!("vad-chunk returned {}", status),
            ));
        }

        let job: ChunkJob = response
            .json()
            .map_err(|e| DispatchError::external(SERVICE, format!("Failed to parse JSON: {}", e)))?;
        debug!("Chunker job {} produced {} clips", job.job_id, job.clips.len());
        Ok(job)
    }

    fn fetch_clip(&self, job_id: &str, clip_id: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.clip_url(job_id, clip_id))
            .send()
            .map_err(|e| DispatchError::external(SERVICE, format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::external(
                SERVICE,
                format!("download of clip {} returned {}", clip_id, status),
            ));
        }

        let body = response
            .bytes()
            .map_err(|e| DispatchError::external(SERVICE, format!("Failed to read clip: {}", e)))?;
        Ok(body.to_vec())
    }
}
