use super::types::{DownloadOutcome, DownloadRequest};
use async_trait::async_trait;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Human-readable name of the downloader
    fn name(&self) -> &'static str;

    /// Fetch the requested media into `request.destination`.
    ///
    /// On `Success` exactly one file exists at the destination; on `Failure`
    /// nothing written by this call is left behind.
    async fn fetch(&self, request: &DownloadRequest) -> DownloadOutcome;

    /// Test if this downloader is available on the system
    async fn test_availability(&self) -> bool;
}
