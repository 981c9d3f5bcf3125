//! In-process fakes of the extractor, transcoder and transfer capabilities.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use media_courier::domain::{ChatId, MessageId, ProxyList, Route};
use media_courier::extractor::{
    Download, DownloadRequest, ExtractError, Extractor, Listing, MediaInfo,
};
use media_courier::pipeline::{PipelineContext, PipelineSettings, ProgressSink, ProgressUpdate};
use media_courier::transcoder::{CaptureProcess, CaptureSpec, TranscodeError, Transcoder};
use media_courier::transfer::{
    FloodRetryPolicy, InlineKeyboard, MessageOptions, Transfer, TransferError, Upload,
};

pub const MB: u64 = 1_000_000;

/// Create a sparse file of `size` bytes.
pub fn sparse_file(path: &Path, size: u64) {
    let file = std::fs::File::create(path).expect("create file");
    file.set_len(size).expect("set file length");
}

pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        chat_id: ChatId,
        text: String,
        markup: Option<InlineKeyboard>,
    },
    Edit {
        message: MessageId,
        text: String,
    },
    Delete {
        message: MessageId,
    },
    Video {
        path: PathBuf,
        caption: String,
        size: u64,
        markup: Option<InlineKeyboard>,
    },
    Audio {
        path: PathBuf,
        caption: String,
    },
}

pub struct FakeTransfer {
    ceiling: u64,
    next_id: AtomicI64,
    pub calls: Mutex<Vec<Call>>,
    /// Failures returned by upcoming `send_video` calls, in order.
    pub video_failures: Mutex<VecDeque<TransferError>>,
}

impl FakeTransfer {
    pub fn new(ceiling: u64) -> Arc<Self> {
        Arc::new(Self {
            ceiling,
            next_id: AtomicI64::new(100),
            calls: Mutex::new(Vec::new()),
            video_failures: Mutex::new(VecDeque::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Every text sent or edited in, in order.
    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } | Call::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn videos(&self) -> Vec<(PathBuf, String, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Video {
                    path, caption, size, ..
                } => Some((path, caption, size)),
                _ => None,
            })
            .collect()
    }

    pub fn edits_and_sends(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Send { .. } | Call::Edit { .. }))
            .count()
    }

    fn next_message(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl Transfer for FakeTransfer {
    fn size_ceiling(&self) -> u64 {
        self.ceiling
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &MessageOptions,
    ) -> Result<MessageId, TransferError> {
        self.calls.lock().push(Call::Send {
            chat_id,
            text: text.to_string(),
            markup: options.markup.clone(),
        });
        Ok(self.next_message())
    }

    async fn edit_text(
        &self,
        _chat_id: ChatId,
        message: MessageId,
        text: &str,
        _markup: Option<&InlineKeyboard>,
    ) -> Result<(), TransferError> {
        self.calls.lock().push(Call::Edit {
            message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        _chat_id: ChatId,
        message: MessageId,
    ) -> Result<(), TransferError> {
        self.calls.lock().push(Call::Delete { message });
        Ok(())
    }

    async fn send_video(&self, upload: &Upload) -> Result<MessageId, TransferError> {
        let size = std::fs::metadata(&upload.path).map(|m| m.len()).unwrap_or(0);
        self.calls.lock().push(Call::Video {
            path: upload.path.clone(),
            caption: upload.caption.clone(),
            size,
            markup: upload.markup.clone(),
        });
        if let Some(failure) = self.video_failures.lock().pop_front() {
            return Err(failure);
        }
        Ok(self.next_message())
    }

    async fn send_audio(&self, upload: &Upload) -> Result<MessageId, TransferError> {
        self.calls.lock().push(Call::Audio {
            path: upload.path.clone(),
            caption: upload.caption.clone(),
        });
        Ok(self.next_message())
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum DownloadScript {
    /// Write a media file of the given size plus a thumbnail.
    Produce { size: u64, title: String },
    /// Leave a partial file behind and fail.
    PartialThenFail(String),
    /// Leave a partial file behind, then honor the job's cancellation.
    PartialThenCancelled,
    Fail(String),
}

/// Callback run inside an extractor call, e.g. to cancel the job mid-flight.
pub type Hook = Box<dyn Fn() + Send + Sync>;

pub struct FakeExtractor {
    pub probe: Mutex<Result<MediaInfo, ExtractError>>,
    pub downloads: Mutex<VecDeque<DownloadScript>>,
    pub listing: Mutex<Listing>,
    pub stream_url: Mutex<Result<String, ExtractError>>,
    pub download_calls: AtomicUsize,
    pub routes_seen: Mutex<Vec<Route>>,
    /// Runs at the start of every `probe`.
    pub on_probe: Mutex<Option<Hook>>,
    /// Runs once a download has started.
    pub on_download: Mutex<Option<Hook>>,
}

impl FakeExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            probe: Mutex::new(Ok(MediaInfo {
                id: "vid".into(),
                title: "Clip".into(),
                estimated_size: Some(MB),
                ..Default::default()
            })),
            downloads: Mutex::new(VecDeque::new()),
            listing: Mutex::new(Listing::default()),
            stream_url: Mutex::new(Ok("https://cdn.example.com/live.m3u8".into())),
            download_calls: AtomicUsize::new(0),
            routes_seen: Mutex::new(Vec::new()),
            on_probe: Mutex::new(None),
            on_download: Mutex::new(None),
        })
    }

    pub fn on_probe(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_probe.lock() = Some(Box::new(hook));
    }

    pub fn on_download(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_download.lock() = Some(Box::new(hook));
    }

    pub fn script(&self, step: DownloadScript) {
        self.downloads.lock().push_back(step);
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn probe(&self, _url: &str, _route: &Route) -> Result<MediaInfo, ExtractError> {
        if let Some(hook) = self.on_probe.lock().as_ref() {
            hook();
        }
        self.probe.lock().clone()
    }

    async fn list_entries(
        &self,
        _url: &str,
        limit: Option<usize>,
        _route: &Route,
    ) -> Result<Listing, ExtractError> {
        let mut listing = self.listing.lock().clone();
        if let Some(limit) = limit {
            listing.entries.truncate(limit);
        }
        Ok(listing)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        route: &Route,
        progress: ProgressSink,
    ) -> Result<Download, ExtractError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.routes_seen.lock().push(route.clone());
        if request.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        if let Some(hook) = self.on_download.lock().as_ref() {
            hook();
        }

        let step = self
            .downloads
            .lock()
            .pop_front()
            .unwrap_or_else(|| DownloadScript::Fail("no download scripted".into()));

        progress.report(ProgressUpdate {
            percent: Some(50.0),
            speed: Some("1.0MiB/s".into()),
            eta: Some("00:05".into()),
        });

        match step {
            DownloadScript::Produce { size, title } => {
                let path = request.output_dir.join(format!("{}.mp4", request.job_id));
                let thumb = request.output_dir.join(format!("{}.jpg", request.job_id));
                sparse_file(&path, size);
                sparse_file(&thumb, 10);
                Ok(Download {
                    path,
                    title,
                    source_id: "vid".into(),
                    thumbnail: Some(thumb),
                })
            }
            DownloadScript::PartialThenFail(message) => {
                let partial = request
                    .output_dir
                    .join(format!("{}.mp4.part", request.job_id));
                sparse_file(&partial, 1024);
                Err(ExtractError::Failed(message))
            }
            DownloadScript::PartialThenCancelled => {
                let partial = request
                    .output_dir
                    .join(format!("{}.mp4.part", request.job_id));
                sparse_file(&partial, 1024);
                if request.is_cancelled() {
                    Err(ExtractError::Cancelled)
                } else {
                    Err(ExtractError::Failed("download was not cancelled".into()))
                }
            }
            DownloadScript::Fail(message) => Err(ExtractError::Failed(message)),
        }
    }

    async fn stream_url(&self, _url: &str, _route: &Route) -> Result<String, ExtractError> {
        self.stream_url.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Transcoder
// ---------------------------------------------------------------------------

pub struct FakeTranscoder {
    pub available: bool,
    pub duration: Result<f64, TranscodeError>,
    pub fail_segment: bool,
    /// Segments a capture writes before it exits on its own.
    pub capture_segments: usize,
    pub segment_calls: AtomicUsize,
    /// Set once any capture has been terminated.
    pub terminated: Arc<AtomicBool>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self {
            available: true,
            duration: Ok(600.0),
            fail_segment: false,
            capture_segments: 4,
            segment_calls: AtomicUsize::new(0),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn probe_duration(&self, _path: &Path) -> Result<f64, TranscodeError> {
        self.duration.clone()
    }

    /// Slices by duration; each part gets an equal share of the input bytes.
    async fn segment(
        &self,
        input: &Path,
        segment_seconds: u64,
        output_pattern: &Path,
    ) -> Result<(), TranscodeError> {
        self.segment_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_segment {
            return Err(TranscodeError::Exit {
                program: "ffmpeg".into(),
                code: Some(1),
                stderr: "boom".into(),
            });
        }
        let duration = self.duration.clone()?;
        let parts = (duration / segment_seconds as f64).ceil() as u64;
        let size = std::fs::metadata(input)
            .map_err(|e| TranscodeError::Io(e.to_string()))?
            .len();
        let pattern = output_pattern.to_string_lossy().into_owned();
        for i in 0..parts {
            let path = pattern.replace("%03d", &format!("{i:03}"));
            sparse_file(Path::new(&path), size.div_ceil(parts));
        }
        Ok(())
    }

    async fn start_capture(
        &self,
        spec: &CaptureSpec,
    ) -> Result<Box<dyn CaptureProcess>, TranscodeError> {
        Ok(Box::new(FakeCapture {
            dir: spec.output_dir.clone(),
            prefix: spec.segment_prefix(),
            remaining: self.capture_segments,
            written: 0,
            terminated: Arc::clone(&self.terminated),
        }))
    }
}

/// Writes one new segment per poll, then exits.
pub struct FakeCapture {
    dir: PathBuf,
    prefix: String,
    remaining: usize,
    written: usize,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl CaptureProcess for FakeCapture {
    fn try_exit(&mut self) -> Result<Option<Option<i32>>, TranscodeError> {
        if self.terminated.load(Ordering::SeqCst) || self.remaining == 0 {
            return Ok(Some(Some(0)));
        }
        let path = self.dir.join(format!("{}{:05}.ts", self.prefix, self.written));
        sparse_file(&path, 2048);
        self.written += 1;
        self.remaining -= 1;
        Ok(None)
    }

    async fn terminate(&mut self) -> Result<(), TranscodeError> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn settings(dir: &Path) -> PipelineSettings {
    PipelineSettings {
        download_dir: dir.to_path_buf(),
        retry: FloodRetryPolicy {
            max_attempts: 3,
            flood_backoff_ms: 1,
            transient_backoff_ms: 1,
        },
        report_interval: Duration::ZERO,
        live_poll_interval: Duration::from_millis(5),
        ..PipelineSettings::default()
    }
}

pub fn context(
    extractor: Arc<FakeExtractor>,
    transcoder: FakeTranscoder,
    transfer: Arc<FakeTransfer>,
    settings: PipelineSettings,
) -> Arc<PipelineContext> {
    Arc::new(PipelineContext::new(
        extractor,
        Arc::new(transcoder),
        transfer,
        ProxyList::direct(),
        settings,
        CancellationToken::new(),
    ))
}
