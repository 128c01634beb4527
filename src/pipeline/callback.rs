use crate::{
    media::{MediaKind, Quality},
    session::InvalidSelection,
};

/// Inline button payloads.
///
/// `select_{id}` picks a video, `audio_{id}` and `video_{height}_{id}` pick
/// a format. Video ids may themselves contain `_`, so the id is always the
/// remainder after the fixed leading fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    SelectVideo {
        video_id: String,
    },
    ChooseFormat {
        kind: MediaKind,
        quality: Option<Quality>,
        video_id: String,
    },
}

impl CallbackAction {
    pub fn parse(data: &str) -> Result<Self, InvalidSelection> {
        let malformed = || InvalidSelection::MalformedCallback(data.to_string());

        let (tag, rest) = data.split_once('_').ok_or_else(malformed)?;
        let action = match tag {
            "select" => CallbackAction::SelectVideo {
                video_id: rest.to_string(),
            },
            "audio" => CallbackAction::ChooseFormat {
                kind: MediaKind::Audio,
                quality: None,
                video_id: rest.to_string(),
            },
            "video" => {
                let (quality, video_id) = rest.split_once('_').ok_or_else(malformed)?;
                CallbackAction::ChooseFormat {
                    kind: MediaKind::Video,
                    quality: Some(quality.parse().map_err(|_| malformed())?),
                    video_id: video_id.to_string(),
                }
            }
            _ => return Err(malformed()),
        };

        if action.video_id().is_empty() {
            return Err(malformed());
        }
        Ok(action)
    }

    pub fn encode(&self) -> String {
        match self {
            CallbackAction::SelectVideo { video_id } => format!("select_{video_id}"),
            CallbackAction::ChooseFormat {
                kind: MediaKind::Audio,
                video_id,
                ..
            } => format!("audio_{video_id}"),
            CallbackAction::ChooseFormat {
                kind: MediaKind::Video,
                quality,
                video_id,
            } => {
                let height = quality.unwrap_or(Quality::P360).height();
                format!("video_{height}_{video_id}")
            }
        }
    }

    pub fn video_id(&self) -> &str {
        match self {
            CallbackAction::SelectVideo { video_id }
            | CallbackAction::ChooseFormat { video_id, .. } => video_id,
        }
    }
}
