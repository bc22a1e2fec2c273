use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRecord {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty ledger. Unreadable lines are skipped.
    pub async fn load(&self) -> anyhow::Result<HashSet<PathBuf>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading ledger {}", self.path.display()))
            }
        };
        let mut seen = HashSet::new();
        for (n, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRecord>(line) {
                Ok(record) => {
                    seen.insert(record.path);
                }
                Err(e) => warn!("ledger line {} ignored: {}", n + 1, e),
            }
        }
        Ok(seen)
    }

    pub async fn record(&self, uploaded: &Path) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&LedgerRecord {
            path: uploaded.to_path_buf(),
        })?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening ledger {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_survive_reload() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(temp.path().join("state/uploaded.jsonl"));
        assert!(ledger.load().await.unwrap().is_empty());

        ledger.record(Path::new("/media/a.mp4")).await.unwrap();
        ledger.record(Path::new("/media/b.mp4")).await.unwrap();

        let seen = ledger.load().await.unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(Path::new("/media/a.mp4")));
    }

    #[tokio::test]
    async fn garbage_lines_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("uploaded.jsonl");
        std::fs::write(&file, "{\"path\":\"/x.mp4\"}\nnot json\n\n").unwrap();
        let seen = Ledger::new(&file).load().await.unwrap();
        assert_eq!(seen.len(), 1);
    }
}
