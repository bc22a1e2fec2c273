use crate::deletion::DeletionChoice;
use crate::media::SubtitleStream;
use crate::scanner::{FileEntry, PreflightReport};
use crate::transcode::{ConflictPolicy, QualityTier};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Every method blocks until answered; the pipeline does not move meanwhile.
pub trait DecisionProvider: Send + Sync {
    fn credential(&self, prompt: &str) -> Option<String>;
    fn confirm_conversion(&self, candidates: &[FileEntry]) -> bool;
    fn quality_tier(&self) -> QualityTier;
    fn subtitle_track(&self, source: &Path, streams: &[SubtitleStream]) -> Option<u32>;
    fn conflict_policy(&self, target: &Path, default: ConflictPolicy) -> ConflictPolicy;
    fn deletion_choice(&self, source: &Path) -> DeletionChoice;
    fn confirm_upload(&self, report: &PreflightReport) -> bool;
}

#[derive(Debug)]
pub struct AutoDecisions {
    pub convert: bool,
    pub quality: QualityTier,
    pub subtitle: Option<u32>,
    /// `None` defers to the configured policy.
    pub conflict: Option<ConflictPolicy>,
    pub deletion: DeletionChoice,
    pub upload: bool,
    pub credential: Option<String>,
    pub deletion_prompts: AtomicUsize,
}

impl Default for AutoDecisions {
    fn default() -> Self {
        Self {
            convert: false,
            quality: QualityTier::Medium,
            subtitle: None,
            conflict: None,
            deletion: DeletionChoice::KeepAll,
            upload: true,
            credential: None,
            deletion_prompts: AtomicUsize::new(0),
        }
    }
}

impl DecisionProvider for AutoDecisions {
    fn credential(&self, _prompt: &str) -> Option<String> {
        self.credential.clone()
    }

    fn confirm_conversion(&self, _candidates: &[FileEntry]) -> bool {
        self.convert
    }

    fn quality_tier(&self) -> QualityTier {
        self.quality
    }

    fn subtitle_track(&self, _source: &Path, streams: &[SubtitleStream]) -> Option<u32> {
        self.subtitle
            .filter(|wanted| streams.iter().any(|s| s.ordinal == *wanted))
    }

    fn conflict_policy(&self, _target: &Path, default: ConflictPolicy) -> ConflictPolicy {
        self.conflict.unwrap_or(default)
    }

    fn deletion_choice(&self, _source: &Path) -> DeletionChoice {
        self.deletion_prompts.fetch_add(1, Ordering::SeqCst);
        self.deletion
    }

    fn confirm_upload(&self, _report: &PreflightReport) -> bool {
        self.upload
    }
}
