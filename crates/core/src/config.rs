use crate::transcode::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Telegram,
    Noop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    #[serde(default)]
    pub chat_id: Option<i64>,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            session_file: default_session_file(),
            chat_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Reserved file name used for generated thumbnails; never uploaded.
    #[serde(default = "default_thumbnail_name")]
    pub thumbnail_name: String,
    #[serde(default = "default_thumbnail_max")]
    pub thumbnail_max_dimension: u32,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub skip_hidden: bool,
    #[serde(default)]
    pub ledger: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            thumbnail_name: default_thumbnail_name(),
            thumbnail_max_dimension: default_thumbnail_max(),
            exclude: Vec::new(),
            skip_hidden: false,
            ledger: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default)]
    pub conflict: ConflictPolicy,
    #[serde(default = "default_true")]
    pub hardware: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            conflict: ConflictPolicy::default(),
            hardware: true,
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_session_file() -> PathBuf {
    PathBuf::from("session.json")
}

fn default_thumbnail_name() -> String {
    "thumb.jpg".to_string()
}

fn default_thumbnail_max() -> u32 {
    320
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_true() -> bool {
    true
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("UPLOADER")
            .prefix_separator("_")
            .separator("__"),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("uploader.toml");
        std::fs::write(
            &path,
            r#"
backend = "noop"

[telegram]
chat_id = -1001234567891

[upload]
exclude = ["**/*.part"]

[transcode]
conflict = "skip"
hardware = false
"#,
        )
        .unwrap();

        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.backend, BackendKind::Noop);
        assert_eq!(cfg.telegram.chat_id, Some(-1001234567891));
        assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
        assert_eq!(cfg.upload.thumbnail_name, "thumb.jpg");
        assert_eq!(cfg.upload.exclude, vec!["**/*.part".to_string()]);
        assert_eq!(cfg.transcode.conflict, ConflictPolicy::Skip);
        assert!(!cfg.transcode.hardware);
    }
}
