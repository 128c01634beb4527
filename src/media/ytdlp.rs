use super::{
    downloader::Downloader,
    types::{DownloadOutcome, DownloadRequest, FailureReason, MediaKind, Quality},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    ffi::OsString,
    path::Path,
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
};
use tracing::{debug, info, warn};
use url::Url;

const WATCH_URL: &str = "https://www.youtube.com/watch";

pub fn watch_url(video_id: &str) -> Result<Url> {
    Url::parse_with_params(WATCH_URL, &[("v", video_id)])
        .with_context(|| format!("Invalid video id: {video_id}"))
}

/// Format selector for a video ceiling. When nothing at or below the ceiling
/// exists, yt-dlp falls through to the smallest stream available.
fn video_format(quality: Option<Quality>) -> String {
    match quality {
        Some(q) => {
            let h = q.height();
            format!("bv*[height<={h}]+ba/b[height<={h}]/wv*+ba/w")
        }
        None => "bv*+ba/b".to_string(),
    }
}

pub struct YtDlpDownloader {
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl YtDlpDownloader {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args,
            timeout,
        }
    }

    fn build_args(&self, request: &DownloadRequest) -> Result<Vec<OsString>> {
        let url = watch_url(&request.video_id)?;
        // yt-dlp substitutes the real extension; post-processing then leaves
        // exactly `<stem>.mp3` or `<stem>.mp4`.
        let template = request.destination.with_extension("%(ext)s");

        let mut args: Vec<OsString> = self.extra_args.iter().map(OsString::from).collect();
        args.extend(
            ["--no-playlist", "--no-warnings", "--no-progress"]
                .into_iter()
                .map(OsString::from),
        );

        match request.kind {
            MediaKind::Audio => {
                for arg in [
                    "--format",
                    "bestaudio/best",
                    "--extract-audio",
                    "--audio-format",
                    "mp3",
                    "--audio-quality",
                    "0",
                ] {
                    args.push(arg.into());
                }
            }
            MediaKind::Video => {
                args.push("--format".into());
                args.push(video_format(request.quality).into());
                for arg in [
                    "--format-sort",
                    "ext:mp4:m4a",
                    "--merge-output-format",
                    "mp4",
                    "--remux-video",
                    "mp4",
                ] {
                    args.push(arg.into());
                }
            }
        }

        args.push("-o".into());
        args.push(template.into_os_string());
        args.push("--".into());
        args.push(url.as_str().into());

        Ok(args)
    }

    async fn run(&self, request: &DownloadRequest) -> DownloadOutcome {
        let args = match self.build_args(request) {
            Ok(args) => args,
            Err(e) => return DownloadOutcome::failure(FailureReason::ProviderError, e.to_string()),
        };

        debug!("Running {} {:?}", self.program, args);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // yt-dlp runs ffmpeg as a child; its own group lets a timeout take both down
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return DownloadOutcome::failure(
                    FailureReason::ProviderError,
                    format!("Failed to spawn {}: {}", self.program, e),
                )
            }
        };

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buffer).await;
            }
            buffer
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stderr_task.abort();
                return DownloadOutcome::failure(
                    FailureReason::ProviderError,
                    format!("Failed to wait for {}: {}", self.program, e),
                );
            }
            Err(_) => {
                self.kill_tree(&mut child).await;
                stderr_task.abort();
                return DownloadOutcome::failure(
                    FailureReason::Timeout,
                    format!("No result after {}s", self.timeout.as_secs_f32()),
                );
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return DownloadOutcome::failure(
                FailureReason::ProviderError,
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    status,
                    stderr_tail(&stderr)
                ),
            );
        }

        match tokio::fs::metadata(&request.destination).await {
            Ok(meta) if meta.is_file() => DownloadOutcome::Success {
                file_path: request.destination.clone(),
            },
            _ => DownloadOutcome::failure(
                FailureReason::ProviderError,
                format!(
                    "{} finished without producing {}",
                    self.program,
                    request.destination.display()
                ),
            ),
        }
    }

    /// Kills the whole process group, then reaps the leader. Nothing spawned
    /// by yt-dlp may still be writing once this returns.
    async fn kill_tree(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // The group id equals the leader's pid, see `process_group(0)`
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                warn!(
                    "Failed to kill process group of {}: {}",
                    self.program,
                    std::io::Error::last_os_error()
                );
            }
        }

        if let Err(e) = child.kill().await {
            warn!("Failed to kill {}: {}", self.program, e);
        }
    }
}

/// Removes the destination and every sibling yt-dlp derives from it
/// (`.part`, `.ytdl`, per-format intermediates).
async fn remove_partial_output(destination: &Path) {
    let (Some(dir), Some(stem)) = (
        destination.parent(),
        destination.file_stem().and_then(|s| s.to_str()),
    ) else {
        return;
    };
    let prefix = format!("{stem}.");

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to scan {} for partial output: {}", dir.display(), e);
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to scan {} for partial output: {}", dir.display(), e);
                break;
            }
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == stem || name.starts_with(&prefix) {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => debug!("Removed partial output {}", name),
                Err(e) => warn!("Failed to remove partial output {}: {}", name, e),
            }
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, request: &DownloadRequest) -> DownloadOutcome {
        info!(
            "Downloading {} ({}, {:?}) with yt-dlp",
            request.video_id, request.kind, request.quality
        );
        let started = Instant::now();

        let outcome = self.run(request).await;

        match &outcome {
            DownloadOutcome::Success { file_path } => {
                info!(
                    "Downloaded {} to {} in {:.1}s",
                    request.video_id,
                    file_path.display(),
                    started.elapsed().as_secs_f32()
                );
            }
            DownloadOutcome::Failure { .. } => remove_partial_output(&request.destination).await,
        }

        outcome
    }

    async fn test_availability(&self) -> bool {
        let yt_dlp_available = match Command::new(&self.program)
            .args(&self.extra_args)
            .arg("--version")
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!("✅ yt-dlp is available, version: {}", version.trim());
                true
            }
            Ok(_) => {
                warn!("❌ yt-dlp command failed");
                false
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        };

        // Needed for audio extraction and for merging video with audio
        match Command::new("ffmpeg").arg("-version").output().await {
            Ok(output) if output.status.success() => {
                let version_line = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or("unknown")
                    .to_string();
                info!("✅ ffmpeg is available: {}", version_line);
            }
            Ok(_) => warn!("❌ ffmpeg command failed"),
            Err(e) => warn!(
                "❌ ffmpeg not found: {} (required for mp3 extraction and video merging)",
                e
            ),
        }

        yt_dlp_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn request(dir: &Path, kind: MediaKind, quality: Option<Quality>) -> DownloadRequest {
        DownloadRequest {
            video_id: "dQw4w9WgXcQ".to_string(),
            kind,
            quality,
            destination: dir.join(format!("dQw4w9WgXcQ-1-1.{}", kind.extension())),
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_watch_url() {
        let url = watch_url("a-b_c").unwrap();
        assert_eq!(url.as_str(), "https://www.youtube.com/watch?v=a-b_c");
    }

    #[test]
    fn test_audio_args() {
        let downloader = YtDlpDownloader::new(
            "yt-dlp",
            vec!["--cookies".into(), "c.txt".into()],
            Duration::from_secs(5),
        );
        let req = request(Path::new("/tmp/dl"), MediaKind::Audio, None);
        let args = strings(&downloader.build_args(&req).unwrap());

        assert_eq!(&args[..2], ["--cookies", "c.txt"]);
        assert!(args.contains(&"--extract-audio".to_string()));
        assert!(args.windows(2).any(|w| w == ["--audio-format", "mp3"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["-o", "/tmp/dl/dQw4w9WgXcQ-1-1.%(ext)s"]));
        assert_eq!(
            &args[args.len() - 2..],
            ["--", "https://www.youtube.com/watch?v=dQw4w9WgXcQ"]
        );
    }

    #[test]
    fn test_video_args_cap_resolution() {
        let downloader = YtDlpDownloader::new("yt-dlp", vec![], Duration::from_secs(5));
        let req = request(Path::new("/tmp/dl"), MediaKind::Video, Some(Quality::P360));
        let args = strings(&downloader.build_args(&req).unwrap());

        assert!(args
            .windows(2)
            .any(|w| w == ["--format", "bv*[height<=360]+ba/b[height<=360]/wv*+ba/w"]));
        assert!(args.windows(2).any(|w| w == ["--merge-output-format", "mp4"]));
        assert!(!args.contains(&"--extract-audio".to_string()));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        const PARSE_OUTPUT: &str = r#"
while [ "$#" -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
stem="${out%.*}"
"#;

        fn fake_ytdlp(dir: &Path, body: &str, timeout: Duration) -> YtDlpDownloader {
            let script = dir.join("fake-yt-dlp.sh");
            std::fs::write(&script, format!("{PARSE_OUTPUT}{body}\n")).unwrap();
            YtDlpDownloader::new("sh", vec![script.to_string_lossy().into_owned()], timeout)
        }

        fn downloads(dir: &Path) -> Vec<PathBuf> {
            std::fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().path())
                .filter(|p| !p.to_string_lossy().ends_with(".sh"))
                .collect()
        }

        #[tokio::test]
        async fn test_fetch_success() {
            let dir = TempDir::new().unwrap();
            let downloader =
                fake_ytdlp(dir.path(), r#"echo audio > "$stem.mp3""#, Duration::from_secs(10));
            let req = request(dir.path(), MediaKind::Audio, None);

            let outcome = downloader.fetch(&req).await;

            assert_eq!(
                outcome,
                DownloadOutcome::Success {
                    file_path: req.destination.clone()
                }
            );
            assert_eq!(downloads(dir.path()), vec![req.destination.clone()]);
        }

        #[tokio::test]
        async fn test_fetch_failure_removes_partial_output() {
            let dir = TempDir::new().unwrap();
            let downloader = fake_ytdlp(
                dir.path(),
                r#"echo x > "$stem.mp4.part"
echo y > "$stem.f137.mp4"
echo "ERROR: [youtube] Video unavailable" >&2
exit 1"#,
                Duration::from_secs(10),
            );
            let unrelated = dir.path().join("dQw4w9WgXcQ-1-10.mp4");
            std::fs::write(&unrelated, b"keep").unwrap();
            let req = request(dir.path(), MediaKind::Video, Some(Quality::P720));

            let outcome = downloader.fetch(&req).await;

            match outcome {
                DownloadOutcome::Failure { reason, detail } => {
                    assert_eq!(reason, FailureReason::ProviderError);
                    assert!(detail.contains("Video unavailable"), "{detail}");
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert_eq!(downloads(dir.path()), vec![unrelated]);
        }

        #[tokio::test]
        async fn test_fetch_timeout_kills_and_cleans_up() {
            let dir = TempDir::new().unwrap();
            let downloader = fake_ytdlp(
                dir.path(),
                r#"echo x > "$stem.mp3.part"
exec sleep 30"#,
                Duration::from_millis(300),
            );
            let req = request(dir.path(), MediaKind::Audio, None);
            let started = Instant::now();

            let outcome = downloader.fetch(&req).await;

            assert!(matches!(
                outcome,
                DownloadOutcome::Failure {
                    reason: FailureReason::Timeout,
                    ..
                }
            ));
            assert!(started.elapsed() < Duration::from_secs(10));
            assert!(downloads(dir.path()).is_empty());
        }

        #[tokio::test]
        async fn test_fetch_timeout_kills_helper_processes() {
            let dir = TempDir::new().unwrap();
            // Stands in for ffmpeg: a grandchild finishing the output after the deadline
            let downloader = fake_ytdlp(
                dir.path(),
                r#"( sleep 1; echo late > "$stem.mp3" ) &
exec sleep 30"#,
                Duration::from_millis(300),
            );
            let req = request(dir.path(), MediaKind::Audio, None);

            let outcome = downloader.fetch(&req).await;
            assert!(matches!(
                outcome,
                DownloadOutcome::Failure {
                    reason: FailureReason::Timeout,
                    ..
                }
            ));

            tokio::time::sleep(Duration::from_secs(2)).await;
            assert!(!req.destination.exists());
            assert!(downloads(dir.path()).is_empty());
        }

        #[tokio::test]
        async fn test_fetch_success_without_output_is_provider_error() {
            let dir = TempDir::new().unwrap();
            let downloader = fake_ytdlp(dir.path(), "exit 0", Duration::from_secs(10));
            let req = request(dir.path(), MediaKind::Audio, None);

            let outcome = downloader.fetch(&req).await;

            assert!(matches!(
                outcome,
                DownloadOutcome::Failure {
                    reason: FailureReason::ProviderError,
                    ..
                }
            ));
        }

        #[tokio::test]
        async fn test_fetch_missing_program() {
            let dir = TempDir::new().unwrap();
            let downloader = YtDlpDownloader::new(
                "/nonexistent/yt-dlp",
                vec![],
                Duration::from_secs(1),
            );
            let req = request(dir.path(), MediaKind::Audio, None);

            let outcome = downloader.fetch(&req).await;

            assert!(matches!(
                outcome,
                DownloadOutcome::Failure {
                    reason: FailureReason::ProviderError,
                    ..
                }
            ));
        }
    }
}
