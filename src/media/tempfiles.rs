use super::types::MediaKind;
use anyhow::{Context, Result};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Hands out unique download paths inside one directory and tracks how many
/// are still live.
#[derive(Debug, Clone)]
pub struct TempFiles {
    dir: PathBuf,
    outstanding: Arc<AtomicUsize>,
}

impl TempFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create download directory {}", dir.display()))?;

        Ok(Self {
            dir,
            outstanding: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of allocated files that have not been released yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn allocate(&self, video_id: &str, kind: MediaKind) -> TempFile {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "{}-{}-{}.{}",
            sanitize(video_id),
            nanos,
            seq,
            kind.extension()
        );
        let path = self.dir.join(file_name);

        let live = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Allocated {} ({} outstanding)", path.display(), live);

        TempFile {
            path,
            released: false,
            outstanding: Arc::clone(&self.outstanding),
        }
    }
}

/// Owned download path. Must be released exactly once; `release` consumes
/// the guard and dropping an unreleased guard deletes the file as a fallback.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    released: bool,
    outstanding: Arc<AtomicUsize>,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort deletion. Errors are logged, never returned.
    pub async fn release(mut self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already gone", self.path.display())
            }
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
        self.mark_released();
    }

    fn mark_released(&mut self) {
        self.released = true;
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!("{} dropped without release, removing", self.path.display());
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
        self.mark_released();
    }
}

fn sanitize(video_id: &str) -> String {
    video_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
