use crate::{
    Emphasis, OutgoingMedia, ProgressFn, ProviderError, RemoteDirectory, SentMessage, TargetInfo,
    TransferEngine, UploadPayload, UploadedFile,
};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::AsyncReadExt;
use tracing::info;

/// Dry-run backend: reads every byte it is given and logs what it would
/// have sent, without touching the network.
#[derive(Debug, Default)]
pub struct NoopProvider {
    next_message: AtomicI64,
}

const CHUNK: usize = 512 * 1024;

#[async_trait::async_trait]
impl TransferEngine for NoopProvider {
    async fn upload(
        &self,
        path: &Path,
        progress: ProgressFn,
    ) -> Result<UploadedFile, ProviderError> {
        let mut file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let mut buf = vec![0u8; CHUNK];
        let mut sent = 0u64;
        progress(0, total);
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sent += n as u64;
            progress(sent, total);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(UploadedFile {
            name,
            size: sent,
            payload: UploadPayload::Remote(format!("noop:{}", path.display())),
        })
    }
}

#[async_trait::async_trait]
impl RemoteDirectory for NoopProvider {
    async fn is_authorized(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }

    fn credential_prompt(&self) -> &str {
        "Dry run, press enter"
    }

    async fn authenticate(&self, _credential: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn resolve_target(&self, id: i64) -> Result<TargetInfo, ProviderError> {
        Ok(TargetInfo {
            id,
            kind: "dry-run".into(),
            title: format!("dry-run:{id}"),
        })
    }

    async fn list_targets(&self) -> Result<Vec<TargetInfo>, ProviderError> {
        Ok(Vec::new())
    }

    async fn send_file(
        &self,
        target: &TargetInfo,
        media: OutgoingMedia,
    ) -> Result<SentMessage, ProviderError> {
        let id = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            chat = target.id,
            file = media.file_name(),
            size = media.file.size,
            streaming = media.supports_streaming,
            "dry run: would send file"
        );
        Ok(SentMessage { id })
    }

    async fn send_text(
        &self,
        target: &TargetInfo,
        text: &str,
        emphasis: Emphasis,
    ) -> Result<(), ProviderError> {
        info!(chat = target.id, ?emphasis, "dry run: would send text {:?}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn upload_reports_monotonic_progress() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("blob.bin");
        std::fs::write(&path, vec![7u8; CHUNK * 2 + 10]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |sent, total| {
            sink.lock().unwrap().push((sent, total));
        });

        let uploaded = NoopProvider::default().upload(&path, progress).await.unwrap();
        assert_eq!(uploaded.name, "blob.bin");
        assert_eq!(uploaded.size, (CHUNK * 2 + 10) as u64);

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last().unwrap().0, uploaded.size);
        assert!(seen.iter().all(|(_, total)| *total == uploaded.size));
    }
}
