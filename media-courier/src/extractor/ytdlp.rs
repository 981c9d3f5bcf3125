//! `yt-dlp` backed extractor.
//!
//! Every call spawns the executable as an async child process. Downloads are
//! run with a custom progress template so progress lines can be parsed without
//! depending on the human-readable output format, and with an `after_move`
//! print so the final path is reported after post-processing.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::tokio_command;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::{Download, DownloadRequest, ExtractError, Extractor, Listing, ListingEntry, MediaInfo};
use crate::domain::Route;
use crate::pipeline::progress::{ProgressSink, ProgressUpdate};

const PROGRESS_PREFIX: &str = "MCPROG ";
const DONE_PREFIX: &str = "MCDONE ";

/// How often a silent download re-checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Stderr lines kept for error reporting.
const STDERR_TAIL: usize = 20;

const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "webp", "png"];

/// Extractor that shells out to `yt-dlp`.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: String,
    ffmpeg_location: Option<String>,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg_location: None,
        }
    }

    /// Point post-processing at a specific ffmpeg binary.
    pub fn with_ffmpeg_location(mut self, location: impl Into<String>) -> Self {
        self.ffmpeg_location = Some(location.into());
        self
    }

    fn base_args(route: &Route) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--no-colors".to_string(),
            "--no-check-certificates".to_string(),
        ];
        if let Some(proxy) = route.proxy_url() {
            args.push("--proxy".to_string());
            args.push(proxy.to_string());
        }
        args
    }

    fn download_args(&self, request: &DownloadRequest, route: &Route) -> Vec<String> {
        let template = request
            .output_dir
            .join(format!("{}.%(ext)s", request.job_id))
            .to_string_lossy()
            .to_string();

        let mut args = Self::base_args(route);
        args.extend(
            [
                "--newline",
                "--progress",
                "--no-playlist",
                "--force-overwrites",
                "--socket-timeout",
                "30",
                "--retries",
                "3",
                "--write-thumbnail",
                "--convert-thumbnails",
                "jpg",
                "--progress-template",
            ]
            .map(String::from),
        );
        args.push(format!(
            "download:{PROGRESS_PREFIX}%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s"
        ));
        args.push("--print".to_string());
        args.push(format!("after_move:{DONE_PREFIX}%(filepath)s|%(id)s|%(title)s"));
        args.push("-o".to_string());
        args.push(template);

        if let Some(location) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(location.clone());
        }

        if request.quality.is_audio_only() {
            args.extend(
                [
                    "-f",
                    "bestaudio/best",
                    "-x",
                    "--audio-format",
                    "m4a",
                    "--audio-quality",
                    "192K",
                ]
                .map(String::from),
            );
        } else {
            let h = request.quality.height_ceiling();
            args.push("-f".to_string());
            args.push(format!(
                "bestvideo[height<={h}]+bestaudio/best[height<={h}]"
            ));
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }

        args.push(request.url.clone());
        args
    }

    /// Run yt-dlp to completion and return its stdout.
    async fn run_to_string(&self, args: &[String]) -> Result<String, ExtractError> {
        debug!(binary = %self.binary, ?args, "Running yt-dlp");
        let output = tokio_command(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractError::failed(format!("Failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<String> = stderr.lines().map(str::to_string).collect();
            return Err(ExtractError::Failed(error_text(
                &lines,
                output.status.code(),
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json(&self, args: &[String]) -> Result<serde_json::Value, ExtractError> {
        let stdout = self.run_to_string(args).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| ExtractError::failed(format!("yt-dlp returned invalid JSON: {e}")))
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn probe(&self, url: &str, route: &Route) -> Result<MediaInfo, ExtractError> {
        let mut args = Self::base_args(route);
        args.extend(
            ["-J", "--no-playlist", "--socket-timeout", "10", "--retries", "2"].map(String::from),
        );
        args.push(url.to_string());

        let json = self.run_json(&args).await?;
        Ok(parse_media_info(&json))
    }

    async fn list_entries(
        &self,
        url: &str,
        limit: Option<usize>,
        route: &Route,
    ) -> Result<Listing, ExtractError> {
        let mut args = Self::base_args(route);
        args.extend(
            ["-J", "--flat-playlist", "--socket-timeout", "10", "--retries", "2"].map(String::from),
        );
        if let Some(limit) = limit {
            args.push("--playlist-items".to_string());
            args.push(format!("1-{limit}"));
        }
        args.push(url.to_string());

        let json = self.run_json(&args).await?;
        Ok(parse_listing(&json, limit))
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        route: &Route,
        progress: ProgressSink,
    ) -> Result<Download, ExtractError> {
        let args = self.download_args(request, route);
        info!(job_id = %request.job_id, route = %route, "Starting yt-dlp download");

        let mut child = tokio_command(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::failed(format!("Failed to run yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::failed("yt-dlp stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::failed("yt-dlp stderr unavailable"))?;

        let stderr_task = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "media_courier::extractor::ytdlp::stderr", "{}", line);
                if tail.len() == STDERR_TAIL {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut done: Option<(PathBuf, String, String)> = None;
        let mut ticker = tokio::time::interval(CANCEL_POLL_INTERVAL);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            warn!(job_id = %request.job_id, error = %e, "Failed to read yt-dlp output");
                            break;
                        }
                    };

                    if request.is_cancelled() {
                        let _ = child.kill().await;
                        return Err(ExtractError::Cancelled);
                    }

                    if let Some(update) = parse_progress_line(&line) {
                        progress.report(update);
                    } else if let Some(parsed) = parse_done_line(&line) {
                        done = Some(parsed);
                    }
                }
                _ = ticker.tick() => {
                    if request.is_cancelled() {
                        let _ = child.kill().await;
                        return Err(ExtractError::Cancelled);
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExtractError::failed(format!("yt-dlp wait failed: {e}")))?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if request.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        if !status.success() {
            return Err(ExtractError::Failed(error_text(&stderr_tail, status.code())));
        }

        let (path, source_id, title) =
            done.ok_or_else(|| ExtractError::failed("yt-dlp did not report an output file"))?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ExtractError::failed(format!(
                "yt-dlp output file missing: {}",
                path.display()
            )));
        }

        let thumbnail = find_thumbnail(&path).await;
        info!(job_id = %request.job_id, path = %path.display(), "Download finished");

        Ok(Download {
            path,
            title,
            source_id,
            thumbnail,
        })
    }

    async fn stream_url(&self, url: &str, route: &Route) -> Result<String, ExtractError> {
        let mut args = Self::base_args(route);
        args.extend(["-g", "-f", "best", "--no-playlist", "--socket-timeout", "15"].map(String::from));
        args.push(url.to_string());

        let stdout = self.run_to_string(&args).await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ExtractError::failed("no stream URL resolved"))
    }
}

/// Build an error message from yt-dlp's stderr.
fn error_text(stderr_lines: &[String], code: Option<i32>) -> String {
    let errors: Vec<&str> = stderr_lines
        .iter()
        .filter_map(|l| l.strip_prefix("ERROR:"))
        .map(str::trim)
        .collect();

    if !errors.is_empty() {
        return errors.join("; ");
    }

    match stderr_lines.iter().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => last.trim().to_string(),
        None => format!("yt-dlp exited with status {}", code.unwrap_or(-1)),
    }
}

fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX.trim_end())?.trim();
    let mut parts = rest.split('|').map(str::trim);

    let percent = parts
        .next()
        .and_then(|p| p.trim_end_matches('%').trim().parse::<f64>().ok());
    let speed = parts.next().filter(|s| !s.is_empty() && *s != "NA").map(str::to_string);
    let eta = parts.next().filter(|s| !s.is_empty() && *s != "NA").map(str::to_string);

    Some(ProgressUpdate {
        percent,
        speed,
        eta,
    })
}

fn parse_done_line(line: &str) -> Option<(PathBuf, String, String)> {
    let rest = line.trim().strip_prefix(DONE_PREFIX.trim_end())?.trim();
    let mut parts = rest.splitn(3, '|');
    let path = parts.next().filter(|p| !p.is_empty())?;
    let id = parts.next().unwrap_or_default();
    let title = parts.next().unwrap_or("video");
    Some((PathBuf::from(path), id.to_string(), title.to_string()))
}

async fn find_thumbnail(media: &Path) -> Option<PathBuf> {
    for ext in THUMBNAIL_EXTENSIONS {
        let candidate = media.with_extension(ext);
        if candidate != media && tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

fn json_u64(value: &serde_json::Value, key: &str) -> Option<u64> {
    value
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .filter(|v| *v > 0)
}

fn json_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extract probe metadata; size falls back to the largest known format size.
fn parse_media_info(json: &serde_json::Value) -> MediaInfo {
    let estimated_size = json_u64(json, "filesize")
        .or_else(|| json_u64(json, "filesize_approx"))
        .or_else(|| {
            json.get("formats")
                .and_then(|f| f.as_array())
                .and_then(|formats| {
                    formats
                        .iter()
                        .filter_map(|f| {
                            json_u64(f, "filesize").or_else(|| json_u64(f, "filesize_approx"))
                        })
                        .max()
                })
        });

    MediaInfo {
        id: json_str(json, "id").unwrap_or_default(),
        title: json_str(json, "title").unwrap_or_else(|| "Unknown".to_string()),
        uploader: json_str(json, "uploader"),
        duration_secs: json.get("duration").and_then(|d| d.as_f64()),
        estimated_size,
        is_live: json
            .get("is_live")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        webpage_url: json_str(json, "webpage_url"),
    }
}

fn parse_listing(json: &serde_json::Value, limit: Option<usize>) -> Listing {
    let entries = json
        .get("entries")
        .and_then(|e| e.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter(|e| !e.is_null())
                .filter_map(|e| {
                    let id = json_str(e, "id").unwrap_or_default();
                    let url = json_str(e, "url").or_else(|| {
                        (!id.is_empty()).then(|| format!("https://www.youtube.com/watch?v={id}"))
                    })?;
                    Some(ListingEntry {
                        title: json_str(e, "title").unwrap_or_else(|| "Unknown".to_string()),
                        id,
                        url,
                    })
                })
                .take(limit.unwrap_or(usize::MAX))
                .collect()
        })
        .unwrap_or_default();

    Listing {
        id: json_str(json, "id").unwrap_or_default(),
        title: json_str(json, "title").unwrap_or_else(|| "Playlist".to_string()),
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, Quality};
    use serde_json::json;

    fn request(quality: Quality) -> DownloadRequest {
        DownloadRequest {
            url: "https://youtu.be/abc".to_string(),
            quality,
            job_id: JobId::from("1_2_3_4"),
            output_dir: PathBuf::from("/tmp/dl"),
            cancel: None,
        }
    }

    #[test]
    fn test_download_args_video() {
        let extractor = YtDlpExtractor::new("yt-dlp");
        let args = extractor.download_args(
            &request(Quality::MaxHeight(720)),
            &Route::Proxy("http://p:1".into()),
        );
        let joined = args.join(" ");
        assert!(joined.contains("--proxy http://p:1"));
        assert!(joined.contains("bestvideo[height<=720]+bestaudio/best[height<=720]"));
        assert!(joined.contains("--merge-output-format mp4"));
        assert!(joined.contains("/tmp/dl/1_2_3_4.%(ext)s"));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/abc"));
    }

    #[test]
    fn test_download_args_audio_direct() {
        let extractor = YtDlpExtractor::new("yt-dlp");
        let args = extractor.download_args(&request(Quality::AudioOnly), &Route::Direct);
        let joined = args.join(" ");
        assert!(!joined.contains("--proxy"));
        assert!(joined.contains("-f bestaudio/best -x --audio-format m4a --audio-quality 192K"));
    }

    #[test]
    fn test_parse_progress_line() {
        let update = parse_progress_line("MCPROG  45.3%|2.10MiB/s|00:31").unwrap();
        assert_eq!(update.percent, Some(45.3));
        assert_eq!(update.speed.as_deref(), Some("2.10MiB/s"));
        assert_eq!(update.eta.as_deref(), Some("00:31"));

        let unknown = parse_progress_line("MCPROG NA|NA|NA").unwrap();
        assert_eq!(unknown.percent, None);
        assert_eq!(unknown.eta, None);

        assert!(parse_progress_line("[download] Destination: x.mp4").is_none());
    }

    #[test]
    fn test_parse_done_line_keeps_pipes_in_title() {
        let (path, id, title) =
            parse_done_line("MCDONE /tmp/dl/1_2_3_4.mp4|abc|Title | with pipe").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/dl/1_2_3_4.mp4"));
        assert_eq!(id, "abc");
        assert_eq!(title, "Title | with pipe");
    }

    #[test]
    fn test_error_text_prefers_error_lines() {
        let lines = vec![
            "[youtube] abc: Downloading webpage".to_string(),
            "ERROR: [youtube] abc: Video unavailable".to_string(),
        ];
        assert_eq!(error_text(&lines, Some(1)), "[youtube] abc: Video unavailable");
        assert_eq!(error_text(&[], Some(2)), "yt-dlp exited with status 2");
    }

    #[test]
    fn test_parse_media_info_size_fallbacks() {
        let info = parse_media_info(&json!({
            "id": "abc",
            "title": "T",
            "is_live": true,
            "formats": [{"filesize": 10}, {"filesize_approx": 30}, {"filesize": null}]
        }));
        assert_eq!(info.estimated_size, Some(30));
        assert!(info.is_live);

        let direct = parse_media_info(&json!({"filesize_approx": 99.0}));
        assert_eq!(direct.estimated_size, Some(99));
        assert_eq!(direct.title, "Unknown");
    }

    #[test]
    fn test_parse_listing() {
        let listing = parse_listing(
            &json!({
                "id": "PL1",
                "title": "Mix",
                "entries": [
                    {"id": "a", "title": "A", "url": "https://youtu.be/a"},
                    null,
                    {"id": "b"},
                    {"title": "no id"}
                ]
            }),
            None,
        );
        assert_eq!(listing.title, "Mix");
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.entries[1].url, "https://www.youtube.com/watch?v=b");
        assert_eq!(listing.entries[1].title, "Unknown");

        let limited = parse_listing(&json!({"entries": [{"id": "a"}, {"id": "b"}]}), Some(1));
        assert_eq!(limited.entries.len(), 1);
        assert_eq!(limited.title, "Playlist");
    }
}
