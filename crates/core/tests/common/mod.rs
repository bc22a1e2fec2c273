#![allow(dead_code)]

use async_trait::async_trait;
use providers::{
    Emphasis, OutgoingMedia, ProgressFn, ProviderError, RemoteDirectory, SentMessage, TargetInfo,
    TransferEngine, UploadPayload, UploadedFile,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use uploader_core::error::PipelineError;
use uploader_core::media::{Capabilities, EncodeRequest, MediaInfo, MediaTools, SubtitleStream};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text(String, Emphasis),
    File {
        name: String,
        caption: String,
        streaming: bool,
        video: Option<(u32, u32, u64)>,
    },
}

impl Event {
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Event::File { name, .. } => Some(name),
            Event::Text(..) => None,
        }
    }
}

/// Remote that records everything it is asked to send.
#[derive(Default)]
pub struct RecordingRemote {
    pub events: Mutex<Vec<Event>>,
    /// File names whose delivery fails.
    pub failing: Mutex<HashSet<String>>,
    pub authorized: Mutex<bool>,
    pub accepted_credential: Option<String>,
    pub next_id: AtomicI64,
}

impl RecordingRemote {
    pub fn authorized() -> Self {
        let remote = Self::default();
        *remote.authorized.lock().unwrap() = true;
        remote
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.file_name().map(str::to_string))
            .collect()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl RemoteDirectory for RecordingRemote {
    async fn is_authorized(&self) -> Result<bool, ProviderError> {
        Ok(*self.authorized.lock().unwrap())
    }

    fn credential_prompt(&self) -> &str {
        "token"
    }

    async fn authenticate(&self, credential: &str) -> Result<bool, ProviderError> {
        let ok = self.accepted_credential.as_deref() == Some(credential);
        *self.authorized.lock().unwrap() = ok;
        Ok(ok)
    }

    async fn resolve_target(&self, id: i64) -> Result<TargetInfo, ProviderError> {
        if id == 404 {
            return Err(ProviderError::TargetNotFound(id.to_string()));
        }
        Ok(TargetInfo {
            id,
            kind: "channel".into(),
            title: "Archive".into(),
        })
    }

    async fn list_targets(&self) -> Result<Vec<TargetInfo>, ProviderError> {
        Ok(vec![])
    }

    async fn send_file(
        &self,
        _target: &TargetInfo,
        media: OutgoingMedia,
    ) -> Result<SentMessage, ProviderError> {
        let name = media.file_name().to_string();
        if self.failing.lock().unwrap().contains(&name) {
            return Err(ProviderError::RequestFailed(format!("{name} refused")));
        }
        self.events.lock().unwrap().push(Event::File {
            name,
            caption: media.caption.clone(),
            streaming: media.supports_streaming,
            video: media.video_attribute(),
        });
        Ok(SentMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn send_text(
        &self,
        _target: &TargetInfo,
        text: &str,
        emphasis: Emphasis,
    ) -> Result<(), ProviderError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Text(text.to_string(), emphasis));
        Ok(())
    }
}

/// Transfer that never reads the file, so sparse fixtures stay cheap.
#[derive(Default)]
pub struct InstantTransfer;

#[async_trait]
impl TransferEngine for InstantTransfer {
    async fn upload(&self, path: &Path, progress: ProgressFn) -> Result<UploadedFile, ProviderError> {
        let size = std::fs::metadata(path)?.len();
        progress(size, size);
        Ok(UploadedFile {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            size,
            payload: UploadPayload::Remote(path.display().to_string()),
        })
    }
}

/// Transfer whose every upload fails.
#[derive(Default)]
pub struct FailingTransfer;

#[async_trait]
impl TransferEngine for FailingTransfer {
    async fn upload(&self, path: &Path, _progress: ProgressFn) -> Result<UploadedFile, ProviderError> {
        Err(ProviderError::RequestFailed(format!("{} timed out", path.display())))
    }
}

/// Media tools that never spawn a process.
#[derive(Default)]
pub struct FakeMedia {
    pub probed: Mutex<Vec<PathBuf>>,
    pub encoded: Mutex<Vec<PathBuf>>,
    pub encode_args: Mutex<Vec<Vec<String>>>,
    pub probe_fails: bool,
    /// Reports the file as having no video stream.
    pub no_video: bool,
    /// Encode writes partial output and then never finishes.
    pub hang_encode: bool,
    pub subtitles: Vec<SubtitleStream>,
    /// Source file names whose encode fails.
    pub failing_sources: HashSet<String>,
    pub scratch: Option<PathBuf>,
}

impl FakeMedia {
    pub fn probed_names(&self) -> Vec<String> {
        self.probed
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

fn source_of(request: &EncodeRequest) -> PathBuf {
    let pos = request.args.iter().position(|a| a == "-i").unwrap();
    PathBuf::from(&request.args[pos + 1])
}

#[async_trait]
impl MediaTools for FakeMedia {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, PipelineError> {
        self.probed.lock().unwrap().push(path.to_path_buf());
        if self.probe_fails {
            return Err(PipelineError::probe(path, "ffprobe missing"));
        }
        Ok(MediaInfo {
            video_stream_present: !self.no_video,
            width: Some(1920),
            height: Some(1080),
            duration_secs: Some(12.4),
            subtitle_streams: self.subtitles.clone(),
        })
    }

    async fn thumbnail(&self, path: &Path, _max_dimension: u32) -> Option<PathBuf> {
        let dir = self.scratch.as_ref()?;
        let name = path.file_stem()?.to_string_lossy().into_owned();
        let thumb = dir.join(format!("{name}.jpg"));
        std::fs::write(&thumb, b"jpeg").ok()?;
        Some(thumb)
    }

    async fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn extract_subtitle(&self, source: &Path, _ordinal: u32) -> Result<PathBuf, PipelineError> {
        let dir = self
            .scratch
            .clone()
            .ok_or_else(|| PipelineError::conversion(source, "no scratch dir"))?;
        let sidecar = dir.join("subtitle.srt");
        std::fs::write(&sidecar, "1\n00:00:01,000 --> 00:00:02,000\nhi\n")
            .map_err(|e| PipelineError::conversion(source, e))?;
        Ok(sidecar)
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<(), PipelineError> {
        let source = source_of(request);
        self.encode_args.lock().unwrap().push(
            request
                .args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
        );
        let name = source.file_name().unwrap().to_string_lossy().into_owned();
        if self.hang_encode {
            std::fs::write(&request.output, b"partial").unwrap();
            std::future::pending::<()>().await;
        }
        if self.failing_sources.contains(&name) {
            std::fs::write(&request.output, b"partial").unwrap();
            return Err(PipelineError::conversion(&source, "encoder exited with 1"));
        }
        std::fs::write(&request.output, b"converted").unwrap();
        self.encoded.lock().unwrap().push(source);
        Ok(())
    }
}

pub fn touch(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Creates a sparse file of `len` bytes.
pub fn sparse(path: &Path, len: u64) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = std::fs::File::create(path).unwrap();
    file.set_len(len).unwrap();
}

pub fn target() -> TargetInfo {
    TargetInfo {
        id: -100123,
        kind: "channel".into(),
        title: "Archive".into(),
    }
}
