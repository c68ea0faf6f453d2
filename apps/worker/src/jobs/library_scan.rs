//! Library scanning job
//!
//! Walks the music library directory and tallies the audio files it finds.
//! The walk runs on the blocking pool and checks the job's cancel flag
//! between entries, so a requested cancel stops it promptly.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use resonance_job_engine::{Job, JobClass, JobContext, Priority};
use walkdir::WalkDir;

use crate::error::{WorkerError, WorkerResult};

/// Supported audio file extensions
/// Includes common lossy and lossless formats
pub const AUDIO_EXTENSIONS: &[&str] = &[
    // Lossy formats
    "mp3", "ogg", "opus", "aac", "m4a", "wma", "mpc", "ape", // Lossless formats
    "flac", "wav", "aiff", "aif", "alac", "dsf", "dff", "wv", // Container formats
    "m4b", "m4p", "m4r", "mp4", "3gp", "webm",
];

/// Check if a file path has a supported audio extension
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Totals gathered by one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub audio_files: usize,
    pub other_files: usize,
    /// Entries below the root that could not be read
    pub unreadable: usize,
    /// Combined size of the audio files, in bytes
    pub audio_bytes: u64,
}

/// Scan the music library in the background
#[derive(Debug, Clone)]
pub struct LibraryScanJob {
    path: PathBuf,
}

impl LibraryScanJob {
    pub const CLASS: JobClass = JobClass::new("library_scan");

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Job for LibraryScanJob {
    fn class(&self) -> JobClass {
        Self::CLASS
    }

    // Scans are long and never urgent
    fn priority(&self) -> Priority {
        Priority::Low
    }

    fn run(self: Box<Self>, ctx: JobContext) -> BoxFuture<'static, anyhow::Result<()>> {
        async move {
            let token = ctx.cancellation_token();
            let path = self.path;

            let scan = tokio::task::spawn_blocking(move || {
                scan_library(&path, || token.is_cancelled())
            });
            let result = match scan.await {
                Ok(result) => result,
                Err(join_err) => Err(WorkerError::from(join_err)),
            };

            match result {
                Ok(summary) => {
                    tracing::info!(
                        audio_files = summary.audio_files,
                        other_files = summary.other_files,
                        unreadable = summary.unreadable,
                        audio_bytes = summary.audio_bytes,
                        "Library scan completed"
                    );
                    Ok(())
                }
                Err(WorkerError::Cancelled(reason)) => {
                    tracing::info!(%reason, "Library scan stopped");
                    Ok(())
                }
                Err(err) => {
                    err.log();
                    Err(err.into())
                }
            }
        }
        .boxed()
    }
}

/// Walk `root` and count what it contains
///
/// `is_cancelled` is polled before each entry; once it returns `true` the
/// walk stops with [`WorkerError::Cancelled`].
pub fn scan_library(root: &Path, is_cancelled: impl Fn() -> bool) -> WorkerResult<ScanSummary> {
    if !root.is_dir() {
        return Err(WorkerError::LibraryNotFound(root.display().to_string()));
    }

    tracing::info!("Starting library scan: {:?}", root);

    let mut summary = ScanSummary::default();

    for entry in WalkDir::new(root).follow_links(true) {
        if is_cancelled() {
            return Err(WorkerError::Cancelled(format!(
                "library scan of {:?} after {} audio files",
                root, summary.audio_files
            )));
        }

        let entry = match entry {
            Ok(entry) => entry,
            // The root itself must be readable
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                summary.unreadable += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if is_audio_file(entry.path()) {
            summary.audio_files += 1;
            match entry.metadata() {
                Ok(meta) => summary.audio_bytes += meta.len(),
                Err(e) => tracing::warn!("Failed to stat {:?}: {}", entry.path(), e),
            }
        } else {
            summary.other_files += 1;
        }
    }

    Ok(summary)
}
