mod downloader;
mod search;
mod tempfiles;
mod types;
mod ytdlp;

pub use downloader::Downloader;
pub use search::{SearchProvider, YtDlpSearch};
pub use tempfiles::TempFiles;
pub use types::{
    DownloadOutcome, DownloadRequest, FailureReason, MediaKind, Quality, SearchResult,
};
pub use ytdlp::YtDlpDownloader;
