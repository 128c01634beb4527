pub mod telegram;

use crate::{
    config::Config,
    media::{Downloader, TempFiles, YtDlpDownloader, YtDlpSearch},
    pipeline::Pipeline,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::Bot;
use tracing::{info, warn};

pub async fn run(config: Config) -> Result<()> {
    let token = config
        .telegram_token()
        .context("No Telegram token: set telegram_token in the config file or TELOXIDE_TOKEN")?;
    let bot = Bot::new(token);

    let download = &config.download;
    let temp_files = TempFiles::new(download.dir())?;
    info!("Downloads go to {}", temp_files.dir().display());

    let downloader = YtDlpDownloader::new(
        download.ytdlp_path.clone(),
        download.ytdlp_args.clone(),
        download.timeout(),
    );
    if !downloader.test_availability().await {
        warn!("yt-dlp is not available, downloads will fail until it is installed");
    }

    let search = YtDlpSearch::new(
        download.ytdlp_path.clone(),
        download.ytdlp_args.clone(),
        config.search.max_results(),
        config.search.timeout(),
    );

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(telegram::TelegramMessenger::new(bot.clone())),
        Arc::new(search),
        Arc::new(downloader),
        temp_files,
        download.max_upload_bytes(),
    ));

    telegram::run(bot, pipeline).await
}
