use crate::admission::{self, AdmissionVerdict};
use crate::error::PipelineError;
use crate::ledger::Ledger;
use crate::media::{MediaTools, ScratchFile};
use crate::ordering::natural_cmp;
use crate::scanner::{self, FileEntry, MediaCategory, TreeFilter, VisitedDirs};
use providers::{
    Emphasis, FileAttribute, OutgoingMedia, ProgressFn, RemoteDirectory, TargetInfo,
    TransferEngine,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const FALLBACK_DIMENSIONS: (u32, u32) = (1280, 720);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub processed: u64,
    pub uploaded: u64,
    pub skipped_duplicate: u64,
    pub skipped_rejected: u64,
    pub failed: u64,
}

/// Dedup memory for one orchestrator. Entries are only ever added.
#[derive(Debug, Default)]
pub struct UploadSession {
    uploaded: HashSet<PathBuf>,
    ledger: Option<Ledger>,
}

impl UploadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_ledger(ledger: Ledger) -> anyhow::Result<Self> {
        let uploaded = ledger.load().await?;
        if !uploaded.is_empty() {
            info!(
                "{} file(s) already delivered according to {}",
                uploaded.len(),
                ledger.path().display()
            );
        }
        Ok(Self {
            uploaded,
            ledger: Some(ledger),
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.uploaded.contains(path)
    }

    pub fn len(&self) -> usize {
        self.uploaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }

    async fn mark_uploaded(&mut self, path: PathBuf) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(&path).await {
                warn!("could not record {} in ledger: {:#}", path.display(), e);
            }
        }
        self.uploaded.insert(path);
    }
}

enum FileOutcome {
    Uploaded,
    Rejected,
}

pub struct Orchestrator {
    remote: Arc<dyn RemoteDirectory>,
    transfer: Arc<dyn TransferEngine>,
    media: Arc<dyn MediaTools>,
    target: TargetInfo,
    filter: TreeFilter,
    thumbnail_max: u32,
    session: UploadSession,
    summary: UploadSummary,
}

impl Orchestrator {
    pub fn new(
        remote: Arc<dyn RemoteDirectory>,
        transfer: Arc<dyn TransferEngine>,
        media: Arc<dyn MediaTools>,
        target: TargetInfo,
        filter: TreeFilter,
        thumbnail_max: u32,
    ) -> Self {
        Self {
            remote,
            transfer,
            media,
            target,
            filter,
            thumbnail_max,
            session: UploadSession::new(),
            summary: UploadSummary::default(),
        }
    }

    pub fn with_session(mut self, session: UploadSession) -> Self {
        self.session = session;
        self
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub async fn run(&mut self, root: &Path) -> anyhow::Result<UploadSummary> {
        let root = tokio::fs::canonicalize(root).await?;
        self.summary = UploadSummary::default();

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        self.notify(&name, Emphasis::Bold).await;

        let total = scanner::count_files(&root, &self.filter);
        info!("{} file(s) to deliver from {}", total, root.display());
        let end = self.process_directory(&root, "", total, 0).await;
        debug!(end, "traversal finished");

        info!(
            processed = self.summary.processed,
            uploaded = self.summary.uploaded,
            duplicates = self.summary.skipped_duplicate,
            rejected = self.summary.skipped_rejected,
            failed = self.summary.failed,
            "upload finished"
        );
        Ok(self.summary)
    }

    /// Returns the counter after the last file. Directories reached twice
    /// through symlinks are walked once.
    pub async fn process_directory(
        &mut self,
        path: &Path,
        label: &str,
        total: u64,
        start: u64,
    ) -> u64 {
        let mut counter = start;
        let mut frontier = vec![(path.to_path_buf(), label.to_string())];
        let mut visited = VisitedDirs::default();

        while let Some((dir, label)) = frontier.pop() {
            if !visited.first_visit(&dir) {
                debug!("{} already walked, not following again", dir.display());
                continue;
            }
            if !label.is_empty() {
                self.notify(&label, Emphasis::Plain).await;
            }

            let (files, subdirs) = match self.list(&dir).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("cannot read {}: {}", dir.display(), e);
                    continue;
                }
            };

            for file in files {
                counter += 1;
                self.summary.processed += 1;
                let name = display_name(&file);
                if self.session.contains(&file) {
                    info!("[{}/{}] {} already delivered", counter, total, name);
                    self.summary.skipped_duplicate += 1;
                    continue;
                }
                info!("[{}/{}] {}", counter, total, name);
                match self.upload_file(&file).await {
                    Ok(FileOutcome::Uploaded) => {
                        self.summary.uploaded += 1;
                        self.session.mark_uploaded(file).await;
                    }
                    Ok(FileOutcome::Rejected) => self.summary.skipped_rejected += 1,
                    Err(e) => {
                        error!("{e}");
                        self.summary.failed += 1;
                    }
                }
            }

            // Reversed so the first subdirectory is popped next.
            for sub in subdirs.into_iter().rev() {
                let child = if label.is_empty() {
                    display_name(&sub)
                } else {
                    format!("{}/{}", label, display_name(&sub))
                };
                frontier.push((sub, child));
            }
        }
        counter
    }

    async fn list(&self, dir: &Path) -> std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if meta.is_dir() {
                if self.filter.allows(&path) {
                    subdirs.push(path);
                }
            } else if meta.is_file() && self.filter.allows_file(&path) {
                files.push(path);
            }
        }
        let by_name = |a: &PathBuf, b: &PathBuf| natural_cmp(&display_name(a), &display_name(b));
        files.sort_by(by_name);
        subdirs.sort_by(by_name);
        Ok((files, subdirs))
    }

    async fn notify(&self, text: &str, emphasis: Emphasis) {
        if let Err(e) = self.remote.send_text(&self.target, text, emphasis).await {
            warn!("could not send header {:?}: {}", text, e);
        }
    }

    async fn upload_file(&self, path: &Path) -> Result<FileOutcome, PipelineError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| PipelineError::upload(path, e))?
            .len();
        let entry = FileEntry::inspect(path, size);

        match admission::classify(entry.size) {
            AdmissionVerdict::Rejected(reason) => {
                warn!("skipping {}: {}", path.display(), reason);
                return Ok(FileOutcome::Rejected);
            }
            AdmissionVerdict::EligibleWithWarning(reason) => {
                warn!("{}: {}", path.display(), reason);
            }
            AdmissionVerdict::Eligible => {}
        }

        let file_name = display_name(path);
        let is_video = entry.category == MediaCategory::Video;
        let mut attributes = Vec::with_capacity(2);
        let mut thumbnail = None;
        if is_video {
            attributes.push(self.video_attribute(path).await);
            thumbnail = self
                .media
                .thumbnail(path, self.thumbnail_max)
                .await
                .map(ScratchFile::new);
        }
        attributes.push(FileAttribute::Filename(file_name.clone()));

        let file = self
            .transfer
            .upload(path, progress_logger(file_name.clone()))
            .await
            .map_err(|e| PipelineError::upload(path, e))?;

        let caption = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(file_name);
        let media = OutgoingMedia {
            file,
            mime_type: scanner::mime_type(path),
            attributes,
            thumbnail: thumbnail.as_ref().map(|t| t.path().to_path_buf()),
            caption,
            supports_streaming: is_video,
        };
        let sent = self
            .remote
            .send_file(&self.target, media)
            .await
            .map_err(|e| PipelineError::upload(path, e))?;
        debug!(message = sent.id, "delivered {}", path.display());
        Ok(FileOutcome::Uploaded)
    }

    async fn video_attribute(&self, path: &Path) -> FileAttribute {
        let (mut width, mut height) = FALLBACK_DIMENSIONS;
        let mut duration_secs = 0;
        match self.media.probe(path).await {
            Ok(info) => {
                if let (Some(w), Some(h)) = (info.width, info.height) {
                    width = w;
                    height = h;
                }
                duration_secs = info.duration_secs.map(|d| d.round() as u64).unwrap_or(0);
            }
            Err(e) => warn!("{e}; using default video attributes"),
        }
        FileAttribute::Video {
            width,
            height,
            duration_secs,
            supports_streaming: true,
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn progress_logger(name: String) -> ProgressFn {
    let reported = AtomicU64::new(0);
    Arc::new(move |sent, total| {
        if total == 0 {
            return;
        }
        let quarter = (sent.min(total) * 4 / total).min(4);
        if quarter > reported.load(Ordering::Relaxed) {
            reported.store(quarter, Ordering::Relaxed);
            info!("{}: {}% ({})", name, quarter * 25, admission::human_size(sent));
        }
    })
}
