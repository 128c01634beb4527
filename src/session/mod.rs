use crate::media::SearchResult;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub type ChatId = i64;
pub type MessageId = i32;

pub const MAX_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingVideoChoice,
    AwaitingFormatChoice,
    Downloading,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSelection {
    #[error("no pending selection for this chat")]
    NoPendingSelection,
    #[error("video {0} is not among the offered candidates")]
    UnknownVideo(String),
    #[error("no video has been chosen yet")]
    NoVideoChosen,
    #[error("format requested for {requested} but {chosen} is chosen")]
    VideoMismatch { chosen: String, requested: String },
    #[error("a download is already running")]
    DownloadInProgress,
    #[error("button belongs to message {got}, current prompt is {current}")]
    StalePrompt { current: MessageId, got: MessageId },
    #[error("malformed callback data {0:?}")]
    MalformedCallback(String),
}

#[derive(Debug, Clone)]
pub struct PendingSelection {
    pub chat_id: ChatId,
    pub candidates: Vec<SearchResult>,
    pub chosen: Option<String>,
    pub prompt: MessageId,
    downloading: bool,
    generation: u64,
}

impl PendingSelection {
    pub fn phase(&self) -> Phase {
        match (&self.chosen, self.downloading) {
            (_, true) => Phase::Downloading,
            (Some(_), false) => Phase::AwaitingFormatChoice,
            (None, false) => Phase::AwaitingVideoChoice,
        }
    }

    /// Buttons on an older prompt message must not act on this selection.
    fn check_prompt(&self, prompt: MessageId) -> Result<(), InvalidSelection> {
        if self.prompt == prompt {
            Ok(())
        } else {
            Err(InvalidSelection::StalePrompt {
                current: self.prompt,
                got: prompt,
            })
        }
    }

    fn candidate(&self, video_id: &str) -> Option<&SearchResult> {
        self.candidates.iter().find(|c| c.video_id == video_id)
    }
}

/// Handed out when a download starts; needed to finish it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTicket {
    pub generation: u64,
    pub prompt: MessageId,
    pub title: String,
}

/// A candidate picked on the current prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub candidate: SearchResult,
    /// `false` when this video was already the chosen one.
    pub changed: bool,
}

/// Per-chat selection state.
///
/// Each chat moves through `Idle -> AwaitingVideoChoice ->
/// AwaitingFormatChoice -> Downloading -> Idle`. Callbacks that do not fit
/// the current step are rejected and leave the state untouched, so a fresh
/// search always recovers the conversation.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    chats: DashMap<ChatId, PendingSelection>,
    generations: AtomicU64,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the first `MAX_CANDIDATES` results, replacing whatever the chat
    /// had pending.
    pub fn record_candidates(
        &self,
        chat_id: ChatId,
        mut results: Vec<SearchResult>,
        prompt: MessageId,
    ) -> u64 {
        results.truncate(MAX_CANDIDATES);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = self.chats.insert(
            chat_id,
            PendingSelection {
                chat_id,
                candidates: results,
                chosen: None,
                prompt,
                downloading: false,
                generation,
            },
        );
        if let Some(previous) = previous {
            debug!(
                "Chat {} selection superseded (was {:?})",
                previous.chat_id,
                previous.phase()
            );
        }

        generation
    }

    pub fn resolve_video(
        &self,
        chat_id: ChatId,
        prompt: MessageId,
        video_id: &str,
    ) -> Result<Choice, InvalidSelection> {
        let mut pending = self
            .chats
            .get_mut(&chat_id)
            .ok_or(InvalidSelection::NoPendingSelection)?;

        pending.check_prompt(prompt)?;
        if pending.downloading {
            return Err(InvalidSelection::DownloadInProgress);
        }
        let candidate = pending
            .candidate(video_id)
            .cloned()
            .ok_or_else(|| InvalidSelection::UnknownVideo(video_id.to_string()))?;

        let changed = pending.chosen.as_deref() != Some(video_id);
        pending.chosen = Some(candidate.video_id.clone());
        Ok(Choice { candidate, changed })
    }

    /// Moves `AwaitingFormatChoice` to `Downloading` for the chosen video.
    pub fn begin_download(
        &self,
        chat_id: ChatId,
        prompt: MessageId,
        video_id: &str,
    ) -> Result<DownloadTicket, InvalidSelection> {
        let mut pending = self
            .chats
            .get_mut(&chat_id)
            .ok_or(InvalidSelection::NoPendingSelection)?;

        pending.check_prompt(prompt)?;
        if pending.downloading {
            return Err(InvalidSelection::DownloadInProgress);
        }
        let chosen = pending
            .chosen
            .clone()
            .ok_or(InvalidSelection::NoVideoChosen)?;
        if chosen != video_id {
            return Err(InvalidSelection::VideoMismatch {
                chosen,
                requested: video_id.to_string(),
            });
        }

        let title = pending
            .candidate(&chosen)
            .map(|c| c.title.clone())
            .unwrap_or_default();
        pending.downloading = true;

        Ok(DownloadTicket {
            generation: pending.generation,
            prompt: pending.prompt,
            title,
        })
    }

    /// Clears the chat if it still holds the selection the ticket came from.
    /// A newer search in the meantime is left alone.
    pub fn finish(&self, chat_id: ChatId, ticket: &DownloadTicket) -> bool {
        self.chats
            .remove_if(&chat_id, |_, pending| {
                pending.generation == ticket.generation
            })
            .is_some()
    }

    pub fn clear(&self, chat_id: ChatId) {
        self.chats.remove(&chat_id);
    }

    pub fn phase(&self, chat_id: ChatId) -> Phase {
        self.chats
            .get(&chat_id)
            .map(|pending| pending.phase())
            .unwrap_or(Phase::Idle)
    }

    #[cfg(test)]
    pub fn get(&self, chat_id: ChatId) -> Option<PendingSelection> {
        self.chats.get(&chat_id).map(|pending| pending.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(n: usize) -> Vec<SearchResult> {
        (1..=n)
            .map(|i| SearchResult {
                video_id: format!("vid{i}"),
                title: format!("Song {i}"),
                duration_label: "3:00".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_record_caps_candidates() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(8), 10);

        let pending = tracker.get(1).unwrap();
        assert_eq!(pending.candidates.len(), MAX_CANDIDATES);
        assert_eq!(pending.prompt, 10);
        assert_eq!(tracker.phase(1), Phase::AwaitingVideoChoice);
    }

    #[test]
    fn test_new_search_replaces_pending() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(3), 10);
        tracker.resolve_video(1, 10, "vid2").unwrap();

        tracker.record_candidates(
            1,
            vec![SearchResult {
                video_id: "other".to_string(),
                title: "Other".to_string(),
                duration_label: "1:00".to_string(),
            }],
            11,
        );

        let pending = tracker.get(1).unwrap();
        assert_eq!(pending.chosen, None);
        assert_eq!(pending.prompt, 11);
        assert_eq!(
            tracker.resolve_video(1, 11, "vid2"),
            Err(InvalidSelection::UnknownVideo("vid2".to_string()))
        );
    }

    #[test]
    fn test_resolve_video() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(5), 10);

        let chosen = tracker.resolve_video(1, 10, "vid3").unwrap();

        assert_eq!(chosen.candidate.title, "Song 3");
        assert!(chosen.changed);
        assert_eq!(tracker.phase(1), Phase::AwaitingFormatChoice);
        assert_eq!(tracker.get(1).unwrap().chosen.as_deref(), Some("vid3"));
    }

    #[test]
    fn test_resolve_video_rejects_unknown_and_idle() {
        let tracker = SelectionTracker::new();
        assert_eq!(
            tracker.resolve_video(1, 10, "vid1"),
            Err(InvalidSelection::NoPendingSelection)
        );

        tracker.record_candidates(1, results(2), 10);
        assert_eq!(
            tracker.resolve_video(1, 10, "vid9"),
            Err(InvalidSelection::UnknownVideo("vid9".to_string()))
        );
        assert_eq!(tracker.phase(1), Phase::AwaitingVideoChoice);
    }

    #[test]
    fn test_old_prompt_buttons_are_rejected() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(3), 10);
        tracker.record_candidates(1, results(3), 12);

        assert_eq!(
            tracker.resolve_video(1, 10, "vid1"),
            Err(InvalidSelection::StalePrompt {
                current: 12,
                got: 10
            })
        );
        assert_eq!(tracker.phase(1), Phase::AwaitingVideoChoice);
    }

    #[test]
    fn test_video_can_be_rechosen_before_format() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(3), 10);
        tracker.resolve_video(1, 10, "vid1").unwrap();
        assert!(tracker.resolve_video(1, 10, "vid2").unwrap().changed);
        assert!(!tracker.resolve_video(1, 10, "vid2").unwrap().changed);

        assert_eq!(tracker.get(1).unwrap().chosen.as_deref(), Some("vid2"));
    }

    #[test]
    fn test_chats_are_independent() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(2), 10);
        tracker.record_candidates(2, results(2), 20);

        tracker.resolve_video(1, 10, "vid1").unwrap();
        tracker.clear(2);

        assert_eq!(tracker.phase(1), Phase::AwaitingFormatChoice);
        assert_eq!(tracker.phase(2), Phase::Idle);
    }

    #[test]
    fn test_begin_download_requires_chosen_video() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(3), 10);

        assert_eq!(
            tracker.begin_download(1, 10, "vid1"),
            Err(InvalidSelection::NoVideoChosen)
        );

        tracker.resolve_video(1, 10, "vid1").unwrap();
        assert_eq!(
            tracker.begin_download(1, 10, "vid2"),
            Err(InvalidSelection::VideoMismatch {
                chosen: "vid1".to_string(),
                requested: "vid2".to_string(),
            })
        );
        assert_eq!(tracker.phase(1), Phase::AwaitingFormatChoice);
    }

    #[test]
    fn test_double_format_tap_is_rejected() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(3), 10);
        tracker.resolve_video(1, 10, "vid1").unwrap();

        let ticket = tracker.begin_download(1, 10, "vid1").unwrap();
        assert_eq!(ticket.prompt, 10);
        assert_eq!(ticket.title, "Song 1");
        assert_eq!(tracker.phase(1), Phase::Downloading);

        assert_eq!(
            tracker.begin_download(1, 10, "vid1"),
            Err(InvalidSelection::DownloadInProgress)
        );
        assert_eq!(
            tracker.resolve_video(1, 10, "vid2"),
            Err(InvalidSelection::DownloadInProgress)
        );
        assert_eq!(tracker.phase(1), Phase::Downloading);
    }

    #[test]
    fn test_finish_clears_only_matching_generation() {
        let tracker = SelectionTracker::new();
        tracker.record_candidates(1, results(3), 10);
        tracker.resolve_video(1, 10, "vid1").unwrap();
        let ticket = tracker.begin_download(1, 10, "vid1").unwrap();

        tracker.record_candidates(1, results(2), 11);
        assert!(!tracker.finish(1, &ticket));
        assert_eq!(tracker.phase(1), Phase::AwaitingVideoChoice);

        tracker.resolve_video(1, 11, "vid2").unwrap();
        let ticket = tracker.begin_download(1, 11, "vid2").unwrap();
        assert!(tracker.finish(1, &ticket));
        assert_eq!(tracker.phase(1), Phase::Idle);
    }
}
