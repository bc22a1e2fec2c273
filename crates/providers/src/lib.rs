//! Remote chat services and the transfer primitive that feeds them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod noop;
pub mod telegram;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not authorized")]
    NotAuthorized,
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Progress sink: cumulative bytes sent, total bytes expected.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: i64,
    pub kind: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emphasis {
    Plain,
    Bold,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileAttribute {
    Video {
        width: u32,
        height: u32,
        duration_secs: u64,
        supports_streaming: bool,
    },
    Filename(String),
}

/// `Stream` bodies report progress while the message itself is sent.
pub enum UploadPayload {
    Remote(String),
    Stream(reqwest::Body),
}

pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    pub payload: UploadPayload,
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let payload = match &self.payload {
            UploadPayload::Remote(id) => format!("remote:{id}"),
            UploadPayload::Stream(_) => "stream".to_string(),
        };
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("payload", &payload)
            .finish()
    }
}

#[derive(Debug)]
pub struct OutgoingMedia {
    pub file: UploadedFile,
    pub mime_type: String,
    pub attributes: Vec<FileAttribute>,
    pub thumbnail: Option<PathBuf>,
    pub caption: String,
    pub supports_streaming: bool,
}

impl OutgoingMedia {
    pub fn video_attribute(&self) -> Option<(u32, u32, u64)> {
        self.attributes.iter().find_map(|a| match a {
            FileAttribute::Video {
                width,
                height,
                duration_secs,
                ..
            } => Some((*width, *height, *duration_secs)),
            _ => None,
        })
    }

    pub fn file_name(&self) -> &str {
        self.attributes
            .iter()
            .find_map(|a| match a {
                FileAttribute::Filename(name) => Some(name.as_str()),
                _ => None,
            })
            .unwrap_or(&self.file.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: i64,
}

#[async_trait::async_trait]
pub trait RemoteDirectory: Send + Sync {
    async fn is_authorized(&self) -> Result<bool, ProviderError>;
    fn credential_prompt(&self) -> &str;
    async fn authenticate(&self, credential: &str) -> Result<bool, ProviderError>;
    async fn resolve_target(&self, id: i64) -> Result<TargetInfo, ProviderError>;
    async fn list_targets(&self) -> Result<Vec<TargetInfo>, ProviderError>;
    async fn send_file(
        &self,
        target: &TargetInfo,
        media: OutgoingMedia,
    ) -> Result<SentMessage, ProviderError>;
    async fn send_text(
        &self,
        target: &TargetInfo,
        text: &str,
        emphasis: Emphasis,
    ) -> Result<(), ProviderError>;
    async fn disconnect(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait TransferEngine: Send + Sync {
    async fn upload(&self, path: &Path, progress: ProgressFn)
        -> Result<UploadedFile, ProviderError>;
}
