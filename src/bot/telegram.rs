use crate::{
    media::MediaKind,
    pipeline::{Button, Keyboard, Messenger, Pipeline},
    session::{ChatId as ChatKey, MessageId as MessageKey},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{path::Path, sync::Arc};
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId},
    utils::command::BotCommands,
    ApiError, RequestError,
};
use tracing::{debug, error, info};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "Show the greeting and how to search.")]
    Start,
    #[command(description = "Same as /start.")]
    Help,
}

/// `Messenger` backed by the Telegram Bot API.
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn inline_keyboard(keyboard: Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.into_iter().map(|row| {
        row.into_iter()
            .map(|Button { label, data }| InlineKeyboardButton::callback(label, data))
            .collect::<Vec<_>>()
    }))
}

/// Telegram refuses an edit that changes nothing; the message already shows
/// what was asked for, so that counts as done.
fn edit_result<T>(result: Result<T, RequestError>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(RequestError::Api(ApiError::MessageNotModified)) => {
            debug!("Message already up to date, edit skipped");
            Ok(())
        }
        Err(e) => Err(e).context("editMessageText failed"),
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: ChatKey, text: &str) -> Result<MessageKey> {
        let message = self
            .bot
            .send_message(ChatId(chat_id), text)
            .await
            .context("sendMessage failed")?;
        Ok(message.id.0)
    }

    async fn edit_text(
        &self,
        chat_id: ChatKey,
        message_id: MessageKey,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(inline_keyboard(keyboard));
        }
        edit_result(request.await)
    }

    async fn send_file(
        &self,
        chat_id: ChatKey,
        path: &Path,
        kind: MediaKind,
        caption: &str,
    ) -> Result<()> {
        let file = InputFile::file(path.to_path_buf());
        match kind {
            MediaKind::Audio => {
                self.bot
                    .send_audio(ChatId(chat_id), file)
                    .title(caption)
                    .await
                    .context("sendAudio failed")?;
            }
            MediaKind::Video => {
                self.bot
                    .send_video(ChatId(chat_id), file)
                    .caption(caption)
                    .supports_streaming(true)
                    .await
                    .context("sendVideo failed")?;
            }
        }
        Ok(())
    }
}

async fn handle_command(
    msg: Message,
    cmd: Command,
    pipeline: Arc<Pipeline>,
) -> ResponseResult<()> {
    match cmd {
        Command::Start | Command::Help => pipeline.handle_start(msg.chat.id.0).await,
    }
    Ok(())
}

async fn handle_message(msg: Message, pipeline: Arc<Pipeline>) -> ResponseResult<()> {
    match msg.text() {
        Some(text) if !text.starts_with('/') => {
            pipeline.handle_query(msg.chat.id.0, text).await;
        }
        Some(text) => debug!("Ignoring unknown command {:?}", text),
        None => {}
    }
    Ok(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    pipeline: Arc<Pipeline>,
) -> ResponseResult<()> {
    // Stops the client-side spinner whatever happens next
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        error!("Failed to answer callback query: {}", e);
    }

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        debug!("Callback query without data or message");
        return Ok(());
    };

    // The download itself runs detached inside the pipeline
    let _ = pipeline
        .handle_callback(message.chat().id.0, message.id().0, data)
        .await;
    Ok(())
}

pub async fn run(bot: Bot, pipeline: Arc<Pipeline>) -> Result<()> {
    info!("Telegram bot starting...");

    bot.set_my_commands(Command::bot_commands())
        .await
        .context("Failed to register bot commands")?;
    info!("Registered /start and /help commands");

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback_query));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pipeline])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram bot stopped");
    Ok(())
}
