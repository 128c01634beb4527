use super::types::SearchResult;
use crate::utils::format_duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Ordered results for `query`, best match first.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// Searches YouTube through yt-dlp's `ytsearchN:` pseudo-URL.
pub struct YtDlpSearch {
    program: String,
    extra_args: Vec<String>,
    max_results: usize,
    timeout: Duration,
}

impl YtDlpSearch {
    pub fn new(
        program: impl Into<String>,
        extra_args: Vec<String>,
        max_results: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            extra_args,
            max_results,
            timeout,
        }
    }
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        debug!("Searching with yt-dlp for: {}", query);

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.extra_args)
                .arg("--flat-playlist")
                .arg("--dump-json")
                .arg("--no-warnings")
                .arg("--")
                .arg(format!("ytsearch{}:{}", self.max_results, query))
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("Search timed out")?
        .context("Failed to run search")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("Search failed: {}", error.trim()));
        }

        let results = parse_search_output(&String::from_utf8_lossy(&output.stdout));
        debug!("Search for {:?} returned {} results", query, results.len());
        Ok(results)
    }
}

/// One JSON object per line; entries without an id are skipped.
pub fn parse_search_output(stdout: &str) -> Vec<SearchResult> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(json) => parse_entry(&json),
            Err(e) => {
                warn!("Skipping unparseable search entry: {}", e);
                None
            }
        })
        .collect()
}

fn parse_entry(json: &Value) -> Option<SearchResult> {
    let video_id = json["id"].as_str().filter(|id| !id.is_empty())?;

    Some(SearchResult {
        video_id: video_id.to_string(),
        title: json["title"]
            .as_str()
            .unwrap_or("Unknown Title")
            .to_string(),
        duration_label: json["duration"]
            .as_f64()
            .map(|d| format_duration(d as u64))
            .unwrap_or_else(|| "--:--".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_output() {
        let stdout = r#"{"id": "abc123", "title": "Test Song", "duration": 215.0}
{"id": "def456", "title": "Test Song (Live)", "duration": 3725}

{"id": "live1", "title": "24/7 Radio", "duration": null}
"#;
        let results = parse_search_output(stdout);

        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0],
            SearchResult {
                video_id: "abc123".to_string(),
                title: "Test Song".to_string(),
                duration_label: "3:35".to_string(),
            }
        );
        assert_eq!(results[1].duration_label, "1:02:05");
        assert_eq!(results[2].duration_label, "--:--");
    }

    #[test]
    fn test_parse_search_output_skips_bad_lines() {
        let stdout = "not json\n{\"title\": \"no id\"}\n{\"id\": \"ok\"}\n";
        let results = parse_search_output(stdout);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].video_id, "ok");
        assert_eq!(results[0].title, "Unknown Title");
    }

    #[test]
    fn test_parse_search_output_empty() {
        assert!(parse_search_output("").is_empty());
    }
}
