use super::callback::CallbackAction;
use crate::{
    media::{MediaKind, Quality, SearchResult},
    session::{ChatId, MessageId},
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

/// Inline keyboard, one inner vec per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    fn single_column(buttons: impl IntoIterator<Item = (String, CallbackAction)>) -> Self {
        Self {
            rows: buttons
                .into_iter()
                .map(|(label, action)| {
                    vec![Button {
                        label,
                        data: action.encode(),
                    }]
                })
                .collect(),
        }
    }

    pub fn candidates(results: &[SearchResult]) -> Self {
        Self::single_column(results.iter().map(|r| {
            (
                format!("{} ({})", r.title, r.duration_label),
                CallbackAction::SelectVideo {
                    video_id: r.video_id.clone(),
                },
            )
        }))
    }

    pub fn formats(video_id: &str) -> Self {
        let format = |kind: MediaKind, quality: Option<Quality>| CallbackAction::ChooseFormat {
            kind,
            quality,
            video_id: video_id.to_string(),
        };

        Self::single_column([
            (
                "🎵 Audio (MP3)".to_string(),
                format(MediaKind::Audio, None),
            ),
            (
                "🎬 Video (360p)".to_string(),
                format(MediaKind::Video, Some(Quality::P360)),
            ),
            (
                "🎬 Video (720p)".to_string(),
                format(MediaKind::Video, Some(Quality::P720)),
            ),
        ])
    }
}

/// Outbound side of the chat transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageId>;

    /// Editing a message to exactly what it already shows is not an error.
    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()>;

    /// Audio goes out as an audio track, video as a streamable video.
    async fn send_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        kind: MediaKind,
        caption: &str,
    ) -> Result<()>;
}
