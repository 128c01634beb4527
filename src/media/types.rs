use std::{fmt, path::PathBuf, str::FromStr};

/// One entry of a search response, as offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub video_id: String,
    pub title: String,
    pub duration_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Container extension of the finished file.
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution ceiling for video downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    P360,
    P720,
}

impl Quality {
    pub fn height(self) -> u32 {
        match self {
            Quality::P360 => 360,
            Quality::P720 => 720,
        }
    }
}

impl FromStr for Quality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('p') {
            "360" => Ok(Quality::P360),
            "720" => Ok(Quality::P720),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub video_id: String,
    pub kind: MediaKind,
    /// Only meaningful for video; audio always takes the best stream.
    pub quality: Option<Quality>,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("provider_error")]
    ProviderError,
    #[error("timeout")]
    Timeout,
    #[error("no_candidates_found")]
    NoCandidatesFound,
    #[error("invalid_selection")]
    InvalidSelection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success { file_path: PathBuf },
    Failure { reason: FailureReason, detail: String },
}

impl DownloadOutcome {
    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        DownloadOutcome::Failure {
            reason,
            detail: detail.into(),
        }
    }
}
