// =============================================================================
// Embedded-KV State Store — dependency-free JSON-Lines append-only file
// backend, for deployments that don't want to stand up a database.
// =============================================================================
//
// Trades are appended one JSON object per line to `<path>/trades.jsonl`.
// Checkpoints are written atomically (tmp file + rename) to
// `<path>/checkpoint.json`, the same pattern `EngineConfig::save` uses.
// `prune` rewrites the trade log filtering out rows older than the
// retention window, again via tmp + rename.
// =============================================================================

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::types::{PortfolioCheckpoint, TradeRecord};

use super::StateStore;

pub struct KvStateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl KvStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| EngineError::persistence(format!("failed to create state dir: {e}")))?;
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    fn trades_path(&self) -> PathBuf {
        self.dir.join("trades.jsonl")
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join("checkpoint.json")
    }

    fn read_trades(&self) -> EngineResult<Vec<TradeRecord>> {
        let path = self.trades_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::persistence(format!("failed to read trade log: {e}")))?;
        let mut out = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(line) {
                Ok(trade) => out.push(trade),
                Err(e) => {
                    return Err(EngineError::persistence(format!(
                        "corrupt trade log at line {}: {e}",
                        i + 1
                    )))
                }
            }
        }
        Ok(out)
    }

    fn write_atomic(path: &Path, content: &str) -> EngineResult<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| EngineError::persistence(format!("failed to write tmp file: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| EngineError::persistence(format!("failed to rename tmp file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for KvStateStore {
    async fn save_trade(&self, trade: &TradeRecord) -> EngineResult<()> {
        let _guard = self.write_lock.lock();
        let line = serde_json::to_string(trade)
            .map_err(|e| EngineError::persistence(format!("failed to serialise trade: {e}")))?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.trades_path())
            .map_err(|e| EngineError::persistence(format!("failed to open trade log: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| EngineError::persistence(format!("failed to append trade: {e}")))?;
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &PortfolioCheckpoint) -> EngineResult<()> {
        let _guard = self.write_lock.lock();
        let content = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| EngineError::persistence(format!("failed to serialise checkpoint: {e}")))?;
        Self::write_atomic(&self.checkpoint_path(), &content)?;
        info!(path = %self.checkpoint_path().display(), "checkpoint saved (atomic)");
        Ok(())
    }

    async fn latest_checkpoint(&self) -> EngineResult<Option<PortfolioCheckpoint>> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::persistence(format!("failed to read checkpoint: {e}")))?;
        let checkpoint = serde_json::from_str(&content)
            .map_err(|e| EngineError::persistence(format!("corrupt checkpoint: {e}")))?;
        Ok(Some(checkpoint))
    }

    async fn trades_since(&self, since_ts: i64) -> EngineResult<Vec<TradeRecord>> {
        let mut trades = self.read_trades()?;
        trades.retain(|t| t.ts > since_ts);
        Ok(trades)
    }

    async fn prune(&self, retention_days: i64, now: i64) -> EngineResult<()> {
        let _guard = self.write_lock.lock();
        let cutoff = now - retention_days * 86_400;
        let mut trades = self.read_trades()?;
        trades.retain(|t| t.ts >= cutoff);
        let content = trades
            .iter()
            .map(|t| serde_json::to_string(t).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        Self::write_atomic(&self.trades_path(), &content)?;
        Ok(())
    }
}
