use crate::admission::human_size;
use crate::config::{AppConfig, BackendKind};
use crate::decisions::DecisionProvider;
use crate::error::PipelineError;
use crate::ledger::Ledger;
use crate::media::MediaTools;
use crate::orchestrator::{Orchestrator, UploadSession, UploadSummary};
use crate::scanner::{self, PreflightReport, TreeFilter};
use crate::transcode;
use providers::noop::NoopProvider;
use providers::telegram::{TelegramBot, TelegramConfig};
use providers::{RemoteDirectory, TargetInfo, TransferEngine};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Backend {
    pub remote: Arc<dyn RemoteDirectory>,
    pub transfer: Arc<dyn TransferEngine>,
}

pub fn build_backend(cfg: &AppConfig) -> Backend {
    match cfg.backend {
        BackendKind::Telegram => {
            let bot = Arc::new(TelegramBot::new(TelegramConfig {
                api_base: cfg.telegram.api_base.clone(),
                token: cfg.telegram.token.clone(),
                session_file: cfg.telegram.session_file.clone(),
            }));
            Backend {
                remote: bot.clone(),
                transfer: bot,
            }
        }
        BackendKind::Noop => {
            let noop = Arc::new(NoopProvider::default());
            Backend {
                remote: noop.clone(),
                transfer: noop,
            }
        }
    }
}

pub struct SessionDriver {
    remote: Arc<dyn RemoteDirectory>,
    transfer: Arc<dyn TransferEngine>,
    media: Arc<dyn MediaTools>,
    decisions: Arc<dyn DecisionProvider>,
    config: AppConfig,
}

impl SessionDriver {
    pub fn new(
        backend: Backend,
        media: Arc<dyn MediaTools>,
        decisions: Arc<dyn DecisionProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            remote: backend.remote,
            transfer: backend.transfer,
            media,
            decisions,
            config,
        }
    }

    pub async fn ensure_authorized(&self) -> Result<(), PipelineError> {
        let authorized = self
            .remote
            .is_authorized()
            .await
            .map_err(|e| PipelineError::Authentication(e.to_string()))?;
        if authorized {
            return Ok(());
        }
        let credential = self
            .decisions
            .credential(self.remote.credential_prompt())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::Authentication("no credential given".into()))?;
        let accepted = self
            .remote
            .authenticate(credential.trim())
            .await
            .map_err(|e| PipelineError::Authentication(e.to_string()))?;
        if !accepted {
            return Err(PipelineError::Authentication("credential rejected".into()));
        }
        info!("signed in");
        Ok(())
    }

    pub async fn resolve_target(&self, id: i64) -> Result<TargetInfo, PipelineError> {
        self.remote
            .resolve_target(id)
            .await
            .map_err(|e| PipelineError::TargetResolution {
                id,
                reason: e.to_string(),
            })
    }

    pub async fn list_targets(&self) -> anyhow::Result<Vec<TargetInfo>> {
        self.ensure_authorized().await?;
        Ok(self.remote.list_targets().await?)
    }

    fn filter(&self) -> anyhow::Result<TreeFilter> {
        let upload = &self.config.upload;
        TreeFilter::new(&upload.exclude, upload.skip_hidden, &upload.thumbnail_name)
    }

    /// Full pipeline. `Ok(None)` means the operator declined the upload.
    pub async fn run(&self, root: &Path, target_id: i64) -> anyhow::Result<Option<UploadSummary>> {
        self.ensure_authorized().await?;
        let target = self.resolve_target(target_id).await?;
        info!(chat = target.id, kind = %target.kind, "sending to {}", target.title);

        let filter = self.filter()?;
        let mut report = scanner::preflight(root, &filter);
        info!(
            "found {} file(s), {} total",
            report.entries.len(),
            human_size(report.total_bytes())
        );

        if report.needs_attention() {
            present(&report);
            if !report.needs_conversion.is_empty()
                && self.decisions.confirm_conversion(&report.needs_conversion)
            {
                let batch = transcode::run_batch(
                    &report.needs_conversion,
                    self.media.as_ref(),
                    self.decisions.as_ref(),
                    &self.config.transcode,
                )
                .await;
                info!(
                    converted = batch.converted.len(),
                    kept = batch.kept_existing.len(),
                    failed = batch.failed.len(),
                    removed = batch.removed_sources.len(),
                    "conversion finished"
                );
                report = scanner::preflight(root, &filter);
            }
        }

        for (entry, reason) in &report.warnings {
            warn!("{}: {}", entry.path.display(), reason);
        }
        for (entry, reason) in &report.rejected {
            warn!("will skip {}: {}", entry.path.display(), reason);
        }

        if !self.decisions.confirm_upload(&report) {
            info!("upload cancelled");
            return Ok(None);
        }

        let session = match &self.config.upload.ledger {
            Some(path) => UploadSession::with_ledger(Ledger::new(path)).await?,
            None => UploadSession::new(),
        };
        let mut orchestrator = Orchestrator::new(
            self.remote.clone(),
            self.transfer.clone(),
            self.media.clone(),
            target,
            filter,
            self.config.upload.thumbnail_max_dimension,
        )
        .with_session(session);
        Ok(Some(orchestrator.run(root).await?))
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.remote.disconnect().await {
            warn!("disconnect failed: {e}");
        }
    }
}

fn present(report: &PreflightReport) {
    if !report.needs_conversion.is_empty() {
        warn!("{} video(s) are not streamable:", report.needs_conversion.len());
        for entry in &report.needs_conversion {
            warn!("  {} ({})", entry.path.display(), human_size(entry.size));
        }
    }
    if !report.rejected.is_empty() {
        warn!("{} file(s) are over the size limit:", report.rejected.len());
        for (entry, reason) in &report.rejected {
            warn!("  {}: {}", entry.path.display(), reason);
        }
    }
}
