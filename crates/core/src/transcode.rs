use crate::config::TranscodeConfig;
use crate::decisions::DecisionProvider;
use crate::deletion::BatchDeletion;
use crate::error::PipelineError;
use crate::media::{Capabilities, EncodeRequest, MediaInfo, MediaTools, ScratchFile};
use crate::scanner::{FileEntry, STREAMING_EXTENSION};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

pub const BACKUP_DIR: &str = "backups";

/// Subtitle codecs that are images and cannot become `mov_text`.
const BITMAP_SUBTITLES: &[&str] = &[
    "hdmv_pgs_subtitle",
    "dvd_subtitle",
    "dvb_subtitle",
    "xsub",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    Original,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierParams {
    pub max_height: Option<u32>,
    pub rate_factor: u32,
    pub audio_bitrate: &'static str,
}

impl QualityTier {
    pub fn params(self) -> TierParams {
        match self {
            QualityTier::Low => TierParams {
                max_height: Some(480),
                rate_factor: 28,
                audio_bitrate: "96k",
            },
            QualityTier::Medium => TierParams {
                max_height: Some(720),
                rate_factor: 26,
                audio_bitrate: "128k",
            },
            QualityTier::Original => TierParams {
                max_height: None,
                rate_factor: 20,
                audio_bitrate: "192k",
            },
        }
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(QualityTier::Low),
            "medium" => Ok(QualityTier::Medium),
            "original" => Ok(QualityTier::Original),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::Original => "original",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Overwrite,
    #[default]
    Backup,
    Skip,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "backup" => Ok(ConflictPolicy::Backup),
            "skip" => Ok(ConflictPolicy::Skip),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Backup => "backup",
            ConflictPolicy::Skip => "skip",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderProfile {
    Software,
    Nvenc,
    Qsv,
    VideoToolbox,
}

impl EncoderProfile {
    pub fn codec(self) -> &'static str {
        match self {
            EncoderProfile::Software => "libx264",
            EncoderProfile::Nvenc => "h264_nvenc",
            EncoderProfile::Qsv => "h264_qsv",
            EncoderProfile::VideoToolbox => "h264_videotoolbox",
        }
    }

    pub fn is_hardware(self) -> bool {
        self != EncoderProfile::Software
    }

    pub fn pixel_format(self) -> &'static str {
        match self {
            EncoderProfile::Qsv => "nv12",
            _ => "yuv420p",
        }
    }

    pub fn video_args(self, rate_factor: u32) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.codec().to_string()];
        let rest: Vec<String> = match self {
            EncoderProfile::Software => vec![
                "-preset".into(),
                "slow".into(),
                "-crf".into(),
                rate_factor.to_string(),
            ],
            EncoderProfile::Nvenc => vec![
                "-preset".into(),
                "p4".into(),
                "-rc".into(),
                "vbr".into(),
                "-cq".into(),
                rate_factor.to_string(),
                "-b:v".into(),
                "0".into(),
            ],
            EncoderProfile::Qsv => vec![
                "-preset".into(),
                "medium".into(),
                "-global_quality".into(),
                rate_factor.to_string(),
            ],
            EncoderProfile::VideoToolbox => {
                let q = 100u32.saturating_sub(rate_factor * 2).clamp(1, 100);
                vec!["-q:v".into(), q.to_string()]
            }
        };
        args.extend(rest);
        args
    }
}

/// Hardware only when ffmpeg reports an acceleration method and a matching encoder.
pub fn select_encoder(caps: &Capabilities, allow_hardware: bool) -> EncoderProfile {
    if !allow_hardware || caps.hwaccels.is_empty() {
        return EncoderProfile::Software;
    }
    [
        EncoderProfile::Nvenc,
        EncoderProfile::Qsv,
        EncoderProfile::VideoToolbox,
    ]
    .into_iter()
    .find(|p| caps.encoders.iter().any(|e| e == p.codec()))
    .unwrap_or(EncoderProfile::Software)
}

#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub source: PathBuf,
    pub target: PathBuf,
    pub quality: QualityTier,
    pub subtitle: Option<u32>,
    pub encoder: EncoderProfile,
    pub conflict: ConflictPolicy,
}

impl TranscodeJob {
    pub fn new(
        source: &Path,
        quality: QualityTier,
        encoder: EncoderProfile,
        conflict: ConflictPolicy,
    ) -> Self {
        Self {
            source: source.to_path_buf(),
            target: target_path(source),
            quality,
            subtitle: None,
            encoder,
            conflict,
        }
    }

    /// Hidden sibling the encoder writes to. Only a finished encode is
    /// renamed onto `target`.
    pub fn staging_path(&self) -> PathBuf {
        let stem = self
            .target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.target
            .with_file_name(format!(".{stem}.partial.{STREAMING_EXTENSION}"))
    }
}

pub fn target_path(source: &Path) -> PathBuf {
    source.with_extension(STREAMING_EXTENSION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted,
    KeptExisting,
}

pub fn backup_existing(target: &Path) -> std::io::Result<PathBuf> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let dir = parent.join(BACKUP_DIR);
    fs::create_dir_all(&dir)?;
    let name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "backup".into());
    let dest = dir.join(name);
    if dest.exists() {
        fs::remove_file(&dest)?;
    }
    fs::rename(target, &dest)?;
    Ok(dest)
}

fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

pub fn build_encode_args(job: &TranscodeJob, info: &MediaInfo, sidecar: Option<&Path>) -> Vec<OsString> {
    let params = job.quality.params();
    let mut args: Vec<OsString> = ["-hide_banner", "-nostats", "-loglevel", "error", "-y", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(job.source.clone().into());

    let text_subtitles: Vec<u32> = info
        .subtitle_streams
        .iter()
        .filter(|s| {
            let bitmap = s
                .codec
                .as_deref()
                .map(|c| BITMAP_SUBTITLES.contains(&c))
                .unwrap_or(false);
            if bitmap {
                warn!(
                    "dropping image subtitle stream {} from {}",
                    s.describe(),
                    job.source.display()
                );
            }
            !bitmap
        })
        .map(|s| s.index)
        .collect();

    let mut rest: Vec<String> = Vec::new();
    if !info.subtitle_streams.is_empty() {
        rest.extend(["-map", "0:V", "-map", "0:a?"].map(String::from));
        for index in &text_subtitles {
            rest.push("-map".into());
            rest.push(format!("0:{index}"));
        }
    }
    rest.extend(job.encoder.video_args(params.rate_factor));

    let mut filters = Vec::new();
    if let Some(sidecar) = sidecar {
        filters.push(format!("subtitles='{}'", escape_filter_path(sidecar)));
    }
    if let Some(height) = params.max_height {
        filters.push(format!("scale=-2:'min({height},ih)'"));
    }
    if !filters.is_empty() {
        rest.push("-vf".into());
        rest.push(filters.join(","));
    }

    rest.extend(
        [
            "-pix_fmt",
            job.encoder.pixel_format(),
            "-c:a",
            "aac",
            "-b:a",
            params.audio_bitrate,
        ]
        .map(String::from),
    );
    if !text_subtitles.is_empty() {
        rest.extend(["-c:s", "mov_text"].map(String::from));
    }
    rest.extend(["-movflags", "+faststart"].map(String::from));

    args.extend(rest.into_iter().map(OsString::from));
    args.push(job.staging_path().into());
    args
}

/// Runs one job end to end. The caller decides what happens to the source.
pub async fn execute(
    job: &mut TranscodeJob,
    tools: &dyn MediaTools,
    decisions: &dyn DecisionProvider,
) -> Result<ConversionOutcome, PipelineError> {
    if job.conflict == ConflictPolicy::Skip && job.target.exists() {
        info!("{} exists, skipping conversion", job.target.display());
        return Ok(ConversionOutcome::KeptExisting);
    }

    let info = tools
        .probe(&job.source)
        .await
        .map_err(|e| PipelineError::conversion(&job.source, e))?;
    if !info.video_stream_present {
        return Err(PipelineError::conversion(&job.source, "no video stream"));
    }

    if !info.subtitle_streams.is_empty() {
        job.subtitle = decisions.subtitle_track(&job.source, &info.subtitle_streams);
    }
    let sidecar = match job.subtitle {
        Some(ordinal) => match tools.extract_subtitle(&job.source, ordinal).await {
            Ok(path) => Some(ScratchFile::new(path)),
            Err(e) => {
                warn!("continuing without burned subtitles: {e}");
                job.subtitle = None;
                None
            }
        },
        None => None,
    };

    // The existing target stays in place until the new file is complete.
    let staging = ScratchFile::new(job.staging_path());
    let request = EncodeRequest {
        output: staging.path().to_path_buf(),
        args: build_encode_args(job, &info, sidecar.as_ref().map(ScratchFile::path)),
    };
    let result = tools.encode(&request).await;
    drop(sidecar);
    result?;

    if job.target.exists() {
        if job.conflict == ConflictPolicy::Backup {
            let moved = backup_existing(&job.target)
                .map_err(|e| PipelineError::conversion(&job.source, e))?;
            info!("moved existing {} to {}", job.target.display(), moved.display());
        } else {
            info!("overwriting existing {}", job.target.display());
        }
    }
    fs::rename(staging.path(), &job.target).map_err(|e| PipelineError::conversion(&job.source, e))?;
    staging.keep();
    Ok(ConversionOutcome::Converted)
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub converted: Vec<PathBuf>,
    pub kept_existing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub removed_sources: Vec<PathBuf>,
}

pub async fn run_batch(
    candidates: &[FileEntry],
    tools: &dyn MediaTools,
    decisions: &dyn DecisionProvider,
    cfg: &TranscodeConfig,
) -> BatchReport {
    let mut report = BatchReport::default();
    if candidates.is_empty() {
        return report;
    }

    let quality = decisions.quality_tier();
    let encoder = select_encoder(&tools.capabilities().await, cfg.hardware);
    info!(
        %quality,
        encoder = encoder.codec(),
        hardware = encoder.is_hardware(),
        "converting {} file(s)",
        candidates.len()
    );

    let mut deletion = BatchDeletion::new();
    for (i, entry) in candidates.iter().enumerate() {
        let target = target_path(&entry.path);
        let conflict = if target.exists() {
            decisions.conflict_policy(&target, cfg.conflict)
        } else {
            cfg.conflict
        };
        let remove_source = deletion.decide(&entry.path, decisions);
        let mut job = TranscodeJob::new(&entry.path, quality, encoder, conflict);

        info!(
            "[{}/{}] converting {}",
            i + 1,
            candidates.len(),
            entry.path.display()
        );
        match execute(&mut job, tools, decisions).await {
            Ok(ConversionOutcome::Converted) => {
                info!("converted {}", job.target.display());
                report.converted.push(job.target.clone());
                if remove_source {
                    match fs::remove_file(&job.source) {
                        Ok(()) => report.removed_sources.push(job.source.clone()),
                        Err(e) => warn!("could not remove {}: {}", job.source.display(), e),
                    }
                }
            }
            Ok(ConversionOutcome::KeptExisting) => report.kept_existing.push(job.target.clone()),
            Err(e) => {
                error!("{e}");
                report.failed.push((job.source.clone(), e.to_string()));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SubtitleStream;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn hardware_needs_both_accel_and_encoder() {
        let caps = Capabilities {
            hwaccels: vec!["cuda".into()],
            encoders: vec!["libx264".into(), "h264_nvenc".into()],
        };
        assert_eq!(select_encoder(&caps, true), EncoderProfile::Nvenc);
        assert_eq!(select_encoder(&caps, false), EncoderProfile::Software);

        let no_accel = Capabilities {
            hwaccels: vec![],
            encoders: vec!["h264_nvenc".into()],
        };
        assert_eq!(select_encoder(&no_accel, true), EncoderProfile::Software);

        let accel_only = Capabilities {
            hwaccels: vec!["vaapi".into()],
            encoders: vec!["libx264".into()],
        };
        assert_eq!(select_encoder(&accel_only, true), EncoderProfile::Software);
    }

    #[test]
    fn low_tier_caps_height_and_forces_8bit() {
        let job = TranscodeJob::new(
            Path::new("/v/clip.mkv"),
            QualityTier::Low,
            EncoderProfile::Software,
            ConflictPolicy::Backup,
        );
        assert_eq!(job.target, PathBuf::from("/v/clip.mp4"));
        let info = MediaInfo {
            video_stream_present: true,
            ..MediaInfo::default()
        };
        let args = strings(&build_encode_args(&job, &info, None));
        assert!(has_pair(&args, "-vf", "scale=-2:'min(480,ih)'"));
        assert!(has_pair(&args, "-crf", "28"));
        assert!(has_pair(&args, "-b:a", "96k"));
        assert!(has_pair(&args, "-pix_fmt", "yuv420p"));
        assert!(!args.contains(&"-map".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/v/.clip.partial.mp4"));
    }

    #[test]
    fn original_tier_keeps_resolution() {
        let job = TranscodeJob::new(
            Path::new("clip.avi"),
            QualityTier::Original,
            EncoderProfile::Nvenc,
            ConflictPolicy::Backup,
        );
        let args = strings(&build_encode_args(&job, &MediaInfo::default(), None));
        assert!(!args.contains(&"-vf".to_string()));
        assert!(has_pair(&args, "-cq", "20"));
        assert!(has_pair(&args, "-b:a", "192k"));
        assert!(has_pair(&args, "-c:v", "h264_nvenc"));
    }

    #[test]
    fn subtitles_are_carried_and_burned() {
        let mut job = TranscodeJob::new(
            Path::new("show.mkv"),
            QualityTier::Medium,
            EncoderProfile::Software,
            ConflictPolicy::Backup,
        );
        job.subtitle = Some(0);
        let info = MediaInfo {
            video_stream_present: true,
            subtitle_streams: vec![
                SubtitleStream {
                    index: 2,
                    ordinal: 0,
                    codec: Some("subrip".into()),
                    language: None,
                    title: None,
                },
                SubtitleStream {
                    index: 3,
                    ordinal: 1,
                    codec: Some("hdmv_pgs_subtitle".into()),
                    language: None,
                    title: None,
                },
            ],
            ..MediaInfo::default()
        };
        let args = strings(&build_encode_args(&job, &info, Some(Path::new("/tmp/s-0.srt"))));
        assert!(has_pair(&args, "-map", "0:V"));
        assert!(has_pair(&args, "-map", "0:2"));
        assert!(!has_pair(&args, "-map", "0:3"));
        assert!(has_pair(&args, "-c:s", "mov_text"));
        assert!(has_pair(
            &args,
            "-vf",
            "subtitles='/tmp/s-0.srt',scale=-2:'min(720,ih)'"
        ));
    }

    #[test]
    fn backup_moves_existing_target_aside() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("clip.mp4");
        fs::write(&target, b"old bytes").unwrap();
        let moved = backup_existing(&target).unwrap();
        assert_eq!(moved, temp.path().join(BACKUP_DIR).join("clip.mp4"));
        assert!(!target.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"old bytes");
    }

    #[test]
    fn names_parse() {
        assert_eq!("LOW".parse::<QualityTier>(), Ok(QualityTier::Low));
        assert_eq!("skip".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Skip));
        assert!("bogus".parse::<ConflictPolicy>().is_err());
        assert_eq!(QualityTier::Original.to_string(), "original");
        assert_eq!(ConflictPolicy::Overwrite.to_string(), "overwrite");
    }
}
