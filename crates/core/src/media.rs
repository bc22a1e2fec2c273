use crate::error::PipelineError;
use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleStream {
    pub index: u32,
    /// Position among subtitle streams only (`0:s:<ordinal>`).
    pub ordinal: u32,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
}

impl SubtitleStream {
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("#{}", self.ordinal)];
        if let Some(lang) = &self.language {
            parts.push(lang.clone());
        }
        if let Some(title) = &self.title {
            parts.push(format!("\"{}\"", title));
        }
        if let Some(codec) = &self.codec {
            parts.push(format!("({})", codec));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub video_stream_present: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
    pub subtitle_streams: Vec<SubtitleStream>,
}

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub hwaccels: Vec<String>,
    pub encoders: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub output: PathBuf,
    pub args: Vec<OsString>,
}

#[async_trait::async_trait]
pub trait MediaTools: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, PipelineError>;
    /// Writes a still that fits in `max_dimension`; `None` when none could be made.
    async fn thumbnail(&self, path: &Path, max_dimension: u32) -> Option<PathBuf>;
    async fn capabilities(&self) -> Capabilities;
    async fn extract_subtitle(&self, source: &Path, ordinal: u32)
        -> Result<PathBuf, PipelineError>;
    async fn encode(&self, request: &EncodeRequest) -> Result<(), PipelineError>;
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub index: u32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeFormat {
    pub duration: Option<String>,
}

impl ProbeData {
    fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }
}

type DurationStrategy = fn(&ProbeData) -> Option<f64>;

/// Tried in order; the first that yields a value wins.
const DURATION_STRATEGIES: &[DurationStrategy] =
    &[stream_duration, tag_duration, container_duration];

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value >= 0.0).then_some(value)
}

fn stream_duration(data: &ProbeData) -> Option<f64> {
    let raw = data.video_stream()?.duration.as_deref()?;
    positive(raw.trim().parse().ok()?)
}

fn tag_duration(data: &ProbeData) -> Option<f64> {
    let stream = data.video_stream()?;
    stream
        .tags
        .iter()
        .filter(|(k, _)| k.to_ascii_uppercase().starts_with("DURATION"))
        .find_map(|(_, v)| parse_timestamp(v))
}

fn container_duration(data: &ProbeData) -> Option<f64> {
    let raw = data.format.as_ref()?.duration.as_deref()?;
    positive(raw.trim().parse().ok()?)
}

pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let secs = match parts.as_slice() {
        [h, m, s] => {
            h.parse::<f64>().ok()? * 3600.0 + m.parse::<f64>().ok()? * 60.0 + s.parse::<f64>().ok()?
        }
        [m, s] => m.parse::<f64>().ok()? * 60.0 + s.parse::<f64>().ok()?,
        [s] => s.parse::<f64>().ok()?,
        _ => return None,
    };
    positive(secs)
}

/// Last resort: the `Duration:` line ffmpeg prints for any input.
pub fn duration_from_log(stderr: &str) -> Option<f64> {
    stderr.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Duration:")?;
        let stamp = rest.split(',').next()?.trim();
        parse_timestamp(stamp)
    })
}

pub fn media_info(data: &ProbeData) -> MediaInfo {
    let video = data.video_stream();
    let subtitle_streams = data
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .enumerate()
        .map(|(ordinal, s)| SubtitleStream {
            index: s.index,
            ordinal: ordinal as u32,
            codec: s.codec_name.clone(),
            language: s.tags.get("language").cloned(),
            title: s.tags.get("title").cloned(),
        })
        .collect();
    MediaInfo {
        video_stream_present: video.is_some(),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        duration_secs: DURATION_STRATEGIES.iter().find_map(|f| f(data)),
        subtitle_streams,
    }
}

pub fn parse_hwaccels(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(str::to_string)
        .collect()
}

pub fn parse_encoders(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|l| l.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let scale = f64::min(max as f64 / width as f64, max as f64 / height as f64);
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    (w, h)
}

pub fn remove_scratch(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("could not remove {}: {}", path.display(), e),
    }
}

/// A temporary file that is removed on drop unless `keep` is called.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.armed {
            remove_scratch(&self.path);
        }
    }
}

pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    scratch: PathBuf,
    thumbnail_name: String,
    seq: AtomicU64,
}

impl FfmpegTools {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, thumbnail_name: &str) -> Self {
        let scratch = std::env::temp_dir().join(format!("folder-uploader-{}", std::process::id()));
        Self {
            ffmpeg,
            ffprobe,
            scratch,
            thumbnail_name: thumbnail_name.to_string(),
            seq: AtomicU64::new(0),
        }
    }

    async fn run<I, S>(&self, program: &Path, args: I) -> std::io::Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("running {:?}", cmd.as_std());
        cmd.output().await
    }

    fn scratch_dir(&self) -> std::io::Result<&Path> {
        std::fs::create_dir_all(&self.scratch)?;
        Ok(&self.scratch)
    }

    async fn log_duration(&self, path: &Path) -> Option<f64> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into()];
        args.push(path.into());
        let output = self.run(&self.ffmpeg, &args).await.ok()?;
        duration_from_log(&String::from_utf8_lossy(&output.stderr))
    }
}

impl Drop for FfmpegTools {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.scratch) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("could not remove {}: {}", self.scratch.display(), e);
            }
        }
    }
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = text.lines().rev().take(3).collect();
    if tail.is_empty() {
        format!("exit status {}", output.status)
    } else {
        tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
    }
}

#[async_trait::async_trait]
impl MediaTools for FfmpegTools {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, PipelineError> {
        let mut args: Vec<OsString> = [
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(path.into());
        let output = self
            .run(&self.ffprobe, &args)
            .await
            .map_err(|e| PipelineError::probe(path, e))?;
        if !output.status.success() {
            return Err(PipelineError::probe(path, stderr_tail(&output)));
        }
        let data: ProbeData =
            serde_json::from_slice(&output.stdout).map_err(|e| PipelineError::probe(path, e))?;
        let mut info = media_info(&data);
        if info.video_stream_present && info.duration_secs.is_none() {
            info.duration_secs = self.log_duration(path).await;
        }
        Ok(info)
    }

    async fn thumbnail(&self, path: &Path, max_dimension: u32) -> Option<PathBuf> {
        let info = self.probe(path).await.ok()?;
        let (Some(width), Some(height)) = (info.width, info.height) else {
            debug!("no video dimensions for {}, skipping thumbnail", path.display());
            return None;
        };
        if width == 0 || height == 0 {
            return None;
        }
        let (w, h) = fit_within(width, height, max_dimension);
        let out = self.scratch_dir().ok()?.join(&self.thumbnail_name);
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-ss".into(),
            "1".into(),
            "-i".into(),
        ];
        args.push(path.into());
        args.extend(
            ["-vf".to_string(), format!("scale={w}:{h}"), "-frames:v".into(), "1".into()]
                .into_iter()
                .map(OsString::from),
        );
        args.push(out.clone().into());
        match self.run(&self.ffmpeg, &args).await {
            Ok(output) if output.status.success() && out.exists() => Some(out),
            Ok(output) => {
                warn!("thumbnail for {} failed: {}", path.display(), stderr_tail(&output));
                None
            }
            Err(e) => {
                warn!("thumbnail for {} failed: {}", path.display(), e);
                None
            }
        }
    }

    async fn capabilities(&self) -> Capabilities {
        let hwaccels = match self.run(&self.ffmpeg, ["-hide_banner", "-hwaccels"]).await {
            Ok(o) if o.status.success() => parse_hwaccels(&String::from_utf8_lossy(&o.stdout)),
            _ => Vec::new(),
        };
        let encoders = match self.run(&self.ffmpeg, ["-hide_banner", "-encoders"]).await {
            Ok(o) if o.status.success() => parse_encoders(&String::from_utf8_lossy(&o.stdout)),
            _ => Vec::new(),
        };
        Capabilities { hwaccels, encoders }
    }

    async fn extract_subtitle(
        &self,
        source: &Path,
        ordinal: u32,
    ) -> Result<PathBuf, PipelineError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let sidecar = self
            .scratch_dir()
            .map_err(|e| PipelineError::conversion(source, e))?
            .join(format!("subtitle-{seq}.srt"));
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-y".into(), "-i".into()];
        args.push(source.into());
        args.push("-map".into());
        args.push(format!("0:s:{ordinal}").into());
        args.push(sidecar.clone().into());
        let output = self
            .run(&self.ffmpeg, &args)
            .await
            .map_err(|e| PipelineError::conversion(source, e))?;
        if output.status.success() && sidecar.exists() {
            Ok(sidecar)
        } else {
            remove_scratch(&sidecar);
            Err(PipelineError::conversion(source, stderr_tail(&output)))
        }
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<(), PipelineError> {
        let output = self
            .run(&self.ffmpeg, &request.args)
            .await
            .map_err(|e| PipelineError::conversion(&request.output, e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PipelineError::conversion(&request.output, stderr_tail(&output)))
        }
    }
}
