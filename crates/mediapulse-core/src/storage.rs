//! Offline storage for event batches
//!
//! One directory per logical endpoint name. Each file holds a sequence of
//! length-prefixed records (u32 big-endian length + JSON-serialized event
//! batch). Total directory size is bounded; the oldest files are evicted
//! first. File access is serialized per endpoint directory; a single app
//! process is assumed.

use crate::error::{Error, Result};
use crate::event::VideoEvent;
use bytes::{Buf, BufMut, BytesMut};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the unclean-session marker file
const SESSION_FLAG_FILE: &str = "session.flag";

/// Extension for batch record files
const BATCH_EXTENSION: &str = "batch";

/// A persisted batch surfaced for replay; removed from disk only once a
/// later successful harvest acknowledges it.
#[derive(Debug)]
pub struct StoredBatch {
    /// File name backing this batch
    pub id: String,
    pub events: Vec<VideoEvent>,
}

/// Disk-backed event storage for one endpoint
pub struct OfflineStorage {
    dir: PathBuf,
    max_total_bytes: u64,
    io: Mutex<()>,
}

impl OfflineStorage {
    /// Open (creating if needed) the directory for `endpoint` under `root`
    pub async fn new(root: &Path, endpoint: &str, max_storage_mb: u64) -> Result<Self> {
        let dir = root.join(endpoint);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            max_total_bytes: max_storage_mb * 1024 * 1024,
            io: Mutex::new(()),
        })
    }

    /// Directory backing this endpoint
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Persist a batch of events as a new record file
    pub async fn persist_batch(&self, events: &[VideoEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_vec(events)?;
        let mut framed = BytesMut::with_capacity(payload.len() + 4);
        framed.put_u32(payload.len() as u32);
        framed.put_slice(&payload);

        let _guard = self.io.lock().await;
        let name = format!(
            "{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4(),
            BATCH_EXTENSION
        );
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &framed).await?;
        debug!(file = %name, events = events.len(), "Persisted event batch");

        self.enforce_size_limit().await;
        Ok(())
    }

    /// Read up to `max_batches` persisted batches, oldest first, without
    /// removing them. Corrupt files are skipped and deleted.
    pub async fn read_unprocessed(&self, max_batches: usize) -> Result<Vec<StoredBatch>> {
        let _guard = self.io.lock().await;
        let mut out = Vec::new();
        for name in self.sorted_batch_files().await? {
            if out.len() >= max_batches {
                break;
            }
            let path = self.dir.join(&name);
            match self.read_batch_file(&path).await {
                Ok(events) => out.push(StoredBatch { id: name, events }),
                Err(e) => {
                    warn!(file = %name, error = %e, "Dropping corrupt offline record");
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
        Ok(out)
    }

    /// Remove acknowledged batch files
    pub async fn remove_processed(&self, ids: &[String]) -> Result<()> {
        let _guard = self.io.lock().await;
        for id in ids {
            let path = self.dir.join(id);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(file = %id, error = %e, "Failed to remove processed record");
            }
        }
        Ok(())
    }

    /// Number of stored batch files
    pub async fn batch_count(&self) -> usize {
        let _guard = self.io.lock().await;
        self.sorted_batch_files().await.map(|f| f.len()).unwrap_or(0)
    }

    /// Total bytes on disk for this endpoint
    pub async fn total_size(&self) -> u64 {
        let _guard = self.io.lock().await;
        self.dir_size().await
    }

    /// Remove every record file for this endpoint
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.io.lock().await;
        for name in self.sorted_batch_files().await? {
            let _ = tokio::fs::remove_file(self.dir.join(name)).await;
        }
        Ok(())
    }

    /// Write the unclean-session marker
    pub async fn set_session_flag(&self) -> Result<()> {
        let _guard = self.io.lock().await;
        tokio::fs::write(self.dir.join(SESSION_FLAG_FILE), b"1").await?;
        Ok(())
    }

    /// Remove the unclean-session marker
    pub async fn clear_session_flag(&self) {
        let _guard = self.io.lock().await;
        let _ = tokio::fs::remove_file(self.dir.join(SESSION_FLAG_FILE)).await;
    }

    /// Whether the previous session left its marker behind
    pub async fn session_flag_exists(&self) -> bool {
        let _guard = self.io.lock().await;
        tokio::fs::try_exists(self.dir.join(SESSION_FLAG_FILE))
            .await
            .unwrap_or(false)
    }

    async fn read_batch_file(&self, path: &Path) -> Result<Vec<VideoEvent>> {
        let data = tokio::fs::read(path).await?;
        let mut buf = &data[..];
        let mut events = Vec::new();
        while buf.remaining() >= 4 {
            let len = buf.get_u32() as usize;
            if len > buf.remaining() {
                return Err(Error::CorruptRecord(format!(
                    "record length {} exceeds remaining {} bytes",
                    len,
                    buf.remaining()
                )));
            }
            let payload = &buf[..len];
            let batch: Vec<VideoEvent> = serde_json::from_slice(payload)
                .map_err(|e| Error::CorruptRecord(e.to_string()))?;
            events.extend(batch);
            buf.advance(len);
        }
        Ok(events)
    }

    /// Batch files, oldest first (names are timestamp-prefixed)
    async fn sorted_batch_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(BATCH_EXTENSION) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn dir_size(&self) -> u64 {
        let mut total = 0u64;
        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Ok(meta) = entry.metadata().await {
                    total += meta.len();
                }
            }
        }
        total
    }

    /// Evict oldest files until the directory fits the configured bound
    async fn enforce_size_limit(&self) {
        let mut size = self.dir_size().await;
        if size <= self.max_total_bytes {
            return;
        }
        let files = match self.sorted_batch_files().await {
            Ok(f) => f,
            Err(_) => return,
        };
        for name in files {
            if size <= self.max_total_bytes {
                break;
            }
            let path = self.dir.join(&name);
            let file_len = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            if tokio::fs::remove_file(&path).await.is_ok() {
                warn!(file = %name, "Evicted oldest offline record (storage bound)");
                size = size.saturating_sub(file_len);
            }
        }
    }
}
