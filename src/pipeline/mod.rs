mod callback;
mod messenger;

use callback::CallbackAction;
pub use messenger::{Button, Keyboard, Messenger};

use crate::{
    media::{
        DownloadOutcome, DownloadRequest, Downloader, FailureReason, MediaKind, Quality,
        SearchProvider, TempFiles,
    },
    session::{
        ChatId, DownloadTicket, InvalidSelection, MessageId, SelectionTracker, MAX_CANDIDATES,
    },
    utils::format_megabytes,
};
use std::{path::Path, sync::Arc, time::Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const GREETING: &str = "👋 Hi! Send me the name of a song or video and I'll search YouTube for it.\n\
    Pick a result, choose audio or video quality, and I'll send you the file.";
pub const SEARCHING: &str = "🔎 Searching...";
pub const NO_RESULTS: &str = "❌ No results found.";
pub const SELECT_VIDEO: &str = "🎵 Select a video to download:";
pub const DOWNLOAD_STARTED: &str = "⏳ Download started...";
pub const INVALID_SELECTION: &str =
    "⚠️ This selection is no longer valid. Please send a new search.";
pub const DOWNLOAD_FAILED: &str = "❌ Download failed. Please try another video or format.";
pub const SEND_FAILED: &str = "❌ Couldn't send the file. Please try again.";
pub const GENERIC_ERROR: &str =
    "Sorry, an error occurred while processing your request. Please try again.";

/// Search, selection and delivery for one chat at a time.
///
/// Every failure ends here: it is logged and turned into a short chat
/// message, and the chat goes back to idle.
pub struct Pipeline {
    messenger: Arc<dyn Messenger>,
    search: Arc<dyn SearchProvider>,
    downloader: Arc<dyn Downloader>,
    temp_files: TempFiles,
    tracker: SelectionTracker,
    max_upload_bytes: u64,
}

impl Pipeline {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        search: Arc<dyn SearchProvider>,
        downloader: Arc<dyn Downloader>,
        temp_files: TempFiles,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            messenger,
            search,
            downloader,
            temp_files,
            tracker: SelectionTracker::new(),
            max_upload_bytes,
        }
    }

    pub async fn handle_start(&self, chat_id: ChatId) {
        self.notify(chat_id, GREETING).await;
    }

    /// Runs a search and shows up to five candidates. Any earlier pending
    /// selection for the chat is dropped first.
    pub async fn handle_query(&self, chat_id: ChatId, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }

        info!("Chat {} searching for {:?}", chat_id, query);
        self.tracker.clear(chat_id);

        let searching = match self.messenger.send_text(chat_id, SEARCHING).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to send search notice to chat {}: {:#}", chat_id, e);
                return;
            }
        };

        let results = match self.search.search(query).await {
            Ok(results) => results,
            Err(e) => {
                error!("Search for {:?} failed: {:#}", query, e);
                self.replace_text(chat_id, searching, GENERIC_ERROR).await;
                return;
            }
        };

        if results.is_empty() {
            info!(
                "Chat {}: {} for {:?}",
                chat_id,
                FailureReason::NoCandidatesFound,
                query
            );
            self.replace_text(chat_id, searching, NO_RESULTS).await;
            return;
        }

        let candidates: Vec<_> = results.into_iter().take(MAX_CANDIDATES).collect();
        let keyboard = Keyboard::candidates(&candidates);
        debug!("Chat {} offered {} candidates", chat_id, candidates.len());
        self.tracker.record_candidates(chat_id, candidates, searching);

        if let Err(e) = self
            .messenger
            .edit_text(chat_id, searching, SELECT_VIDEO, Some(keyboard))
            .await
        {
            error!("Failed to show results in chat {}: {:#}", chat_id, e);
            self.tracker.clear(chat_id);
            self.notify(chat_id, GENERIC_ERROR).await;
        }
    }

    /// Handles an inline button press on `message_id`.
    ///
    /// A format choice that passes validation continues on a spawned task so
    /// the long download does not hold up the caller; the handle is returned.
    pub async fn handle_callback(
        self: &Arc<Self>,
        chat_id: ChatId,
        message_id: MessageId,
        data: &str,
    ) -> Option<JoinHandle<()>> {
        let action = match CallbackAction::parse(data) {
            Ok(action) => action,
            Err(e) => {
                self.reject(chat_id, e).await;
                return None;
            }
        };

        match action {
            CallbackAction::SelectVideo { video_id } => {
                self.select_video(chat_id, message_id, &video_id).await;
                None
            }
            CallbackAction::ChooseFormat {
                kind,
                quality,
                video_id,
            } => {
                let ticket = match self.tracker.begin_download(chat_id, message_id, &video_id) {
                    Ok(ticket) => ticket,
                    Err(e) => {
                        self.reject(chat_id, e).await;
                        return None;
                    }
                };

                let pipeline = Arc::clone(self);
                Some(tokio::spawn(async move {
                    pipeline
                        .deliver(chat_id, ticket, video_id, kind, quality)
                        .await
                }))
            }
        }
    }

    async fn select_video(&self, chat_id: ChatId, prompt: MessageId, video_id: &str) {
        let candidate = match self.tracker.resolve_video(chat_id, prompt, video_id) {
            Ok(choice) if !choice.changed => {
                debug!("Chat {} re-chose {}, formats already shown", chat_id, video_id);
                return;
            }
            Ok(choice) => choice.candidate,
            Err(e) => return self.reject(chat_id, e).await,
        };

        info!("Chat {} chose {} ({})", chat_id, video_id, candidate.title);
        let text = format!(
            "Choose format for {} ({}):",
            candidate.title, candidate.duration_label
        );
        if let Err(e) = self
            .messenger
            .edit_text(chat_id, prompt, &text, Some(Keyboard::formats(video_id)))
            .await
        {
            error!("Failed to show formats in chat {}: {:#}", chat_id, e);
            self.notify(chat_id, GENERIC_ERROR).await;
        }
    }

    async fn deliver(
        &self,
        chat_id: ChatId,
        ticket: DownloadTicket,
        video_id: String,
        kind: MediaKind,
        quality: Option<Quality>,
    ) {
        self.replace_text(chat_id, ticket.prompt, DOWNLOAD_STARTED)
            .await;

        let file = self.temp_files.allocate(&video_id, kind);
        let request = DownloadRequest {
            video_id,
            kind,
            quality,
            destination: file.path().to_path_buf(),
        };

        let started = Instant::now();
        match self.downloader.fetch(&request).await {
            DownloadOutcome::Success { file_path } => {
                debug!(
                    "{} fetched {} in {:.1}s",
                    self.downloader.name(),
                    request.video_id,
                    started.elapsed().as_secs_f32()
                );
                self.send(chat_id, &ticket, &file_path, kind).await;
            }
            DownloadOutcome::Failure { reason, detail } => {
                match reason {
                    FailureReason::Timeout => warn!(
                        "Chat {}: download of {} timed out after {:.0}s: {}",
                        chat_id,
                        request.video_id,
                        started.elapsed().as_secs_f32(),
                        detail
                    ),
                    _ => error!(
                        "Chat {}: download of {} failed ({}): {}",
                        chat_id, request.video_id, reason, detail
                    ),
                }
                self.notify(chat_id, failure_message(reason)).await;
            }
        }

        file.release().await;
        if self.tracker.finish(chat_id, &ticket) {
            debug!("Chat {} back to idle", chat_id);
        }
        debug!("{} temporary files outstanding", self.temp_files.outstanding());
    }

    async fn send(&self, chat_id: ChatId, ticket: &DownloadTicket, path: &Path, kind: MediaKind) {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!("send_failure: cannot stat {}: {}", path.display(), e);
                self.notify(chat_id, SEND_FAILED).await;
                return;
            }
        };

        if size > self.max_upload_bytes {
            warn!(
                "send_failure: {} is {} which exceeds the {} upload limit",
                path.display(),
                format_megabytes(size),
                format_megabytes(self.max_upload_bytes)
            );
            let text = format!(
                "❌ {} - File too large ({}). The limit is {}.",
                ticket.title,
                format_megabytes(size),
                format_megabytes(self.max_upload_bytes)
            );
            self.notify(chat_id, &text).await;
            return;
        }

        match self
            .messenger
            .send_file(chat_id, path, kind, &ticket.title)
            .await
        {
            Ok(()) => {
                info!(
                    "Sent {} ({}, {}) to chat {}",
                    ticket.title,
                    kind,
                    format_megabytes(size),
                    chat_id
                );
                self.replace_text(chat_id, ticket.prompt, &format!("✅ {}", ticket.title))
                    .await;
            }
            Err(e) => {
                error!("send_failure: chat {}: {:#}", chat_id, e);
                self.notify(chat_id, SEND_FAILED).await;
            }
        }
    }

    async fn reject(&self, chat_id: ChatId, reason: InvalidSelection) {
        warn!(
            "Chat {} ({:?}): {}: {}",
            chat_id,
            self.tracker.phase(chat_id),
            FailureReason::InvalidSelection,
            reason
        );
        self.notify(chat_id, INVALID_SELECTION).await;
    }

    async fn notify(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            error!("Failed to send message to chat {}: {:#}", chat_id, e);
        }
    }

    /// Edits a status message in place, falling back to a new message.
    async fn replace_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) {
        if let Err(e) = self
            .messenger
            .edit_text(chat_id, message_id, text, None)
            .await
        {
            warn!(
                "Failed to edit message {} in chat {}: {:#}",
                message_id, chat_id, e
            );
            self.notify(chat_id, text).await;
        }
    }
}

fn failure_message(reason: FailureReason) -> &'static str {
    match reason {
        FailureReason::ProviderError | FailureReason::Timeout => DOWNLOAD_FAILED,
        FailureReason::NoCandidatesFound => NO_RESULTS,
        FailureReason::InvalidSelection => INVALID_SELECTION,
    }
}
