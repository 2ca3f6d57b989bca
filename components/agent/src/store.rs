//! Crash-safe key→record mapping, one file per record (§4.1).

use std::path::{Path, PathBuf};

use courtstream_log::tracing;
use tokio::io::AsyncWriteExt as _;
use tokio_stream::{wrappers::ReadDirStream, StreamExt as _};

use crate::record::{StreamId, StreamRecord, StreamState};

/// Durable store of [`StreamRecord`]s under a configured directory.
///
/// The store itself performs no locking; the Supervisor Core serializes
/// `save` calls for the same id (§4.1 Guarantees).
#[derive(Clone, Debug)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    /// Points a new [`RecordStore`] at `root`, without touching the
    /// filesystem yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &StreamId) -> PathBuf {
        self.root.join(format!("{}.json", id.as_str()))
    }

    /// Atomically writes `record`, creating the store directory if absent.
    ///
    /// Writes to a temp file in the same directory, flushes it, then
    /// renames it into place — the rename is atomic on the same
    /// filesystem, so a crash mid-write never leaves a partially-written
    /// record visible under its real name.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from directory creation, the write, or the
    /// rename.
    pub async fn save(&self, record: &StreamRecord) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let final_path = self.path_for(&record.id);
        let tmp_path =
            self.root.join(format!("{}.json.tmp", record.id.as_str()));

        let bytes = serde_json::to_vec_pretty(record)?;
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Returns the record for `id`, or `None` if absent.
    ///
    /// A file that fails to parse is treated as corrupt: it is deleted and
    /// `None` is returned, self-healing the store (§4.1 Failures).
    pub async fn find_by_id(
        &self,
        id: &StreamId,
    ) -> anyhow::Result<Option<StreamRecord>> {
        let path = self.path_for(id);
        Self::read_record(&path).await
    }

    /// Enumerates the store directory, decoding each file. Corrupted
    /// entries are removed and skipped rather than surfaced as errors.
    pub async fn find_all(&self) -> anyhow::Result<Vec<StreamRecord>> {
        let entries = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e.into()),
        };

        let mut stream = ReadDirStream::new(entries);
        let mut records = Vec::new();
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read_record(&path).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Filter of [`Self::find_all`] by `state == RUNNING`.
    pub async fn find_running(&self) -> anyhow::Result<Vec<StreamRecord>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|r| r.state == StreamState::Running)
            .collect())
    }

    /// Removes the record for `id`. Absence is success.
    pub async fn delete(&self, id: &StreamId) -> anyhow::Result<()> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every record in the store.
    pub async fn clear(&self) -> anyhow::Result<()> {
        for record in self.find_all().await? {
            self.delete(&record.id).await?;
        }
        Ok(())
    }

    async fn read_record(
        path: &Path,
    ) -> anyhow::Result<Option<StreamRecord>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<StreamRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "dropping corrupt stream record",
                );
                let _ = tokio::fs::remove_file(path).await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::record::{CourtId, StreamKey};

    fn scratch_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("courtstream-agent-test-{}", uuid_like()));
        dir
    }

    fn uuid_like() -> String {
        use rand::Rng as _;
        let mut rng = rand::thread_rng();
        (0..16)
            .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
            .collect()
    }

    fn sample_record() -> StreamRecord {
        StreamRecord::new(
            "rtsp://cam/1".into(),
            StreamKey("K".into()),
            CourtId("C1".into()),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_then_find_by_id_round_trips() {
        let store = RecordStore::new(scratch_dir());
        let record = sample_record();

        store.save(&record).await.unwrap();
        let found = store.find_by_id(&record.id).await.unwrap().unwrap();

        assert!(found.eq_modulo_updated_at(&record));
    }

    #[tokio::test]
    async fn find_by_id_missing_returns_none() {
        let store = RecordStore::new(scratch_dir());
        let id: StreamId = "does-not-exist".parse().unwrap();
        assert!(store.find_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_self_heals() {
        let root = scratch_dir();
        tokio::fs::create_dir_all(&root).await.unwrap();
        let bad_path = root.join("broken.json");
        tokio::fs::write(&bad_path, b"not json").await.unwrap();

        let store = RecordStore::new(root);
        let id: StreamId = "broken".parse().unwrap();

        assert!(store.find_by_id(&id).await.unwrap().is_none());
        assert!(!bad_path.exists());
    }

    #[tokio::test]
    async fn find_running_filters_by_state() {
        let store = RecordStore::new(scratch_dir());
        let mut running = sample_record();
        running
            .transition_to(StreamState::Running, Utc::now())
            .unwrap();
        running.process_id = Some(4242);
        let pending = sample_record();

        store.save(&running).await.unwrap();
        store.save(&pending).await.unwrap();

        let found = store.find_running().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, running.id);
    }

    #[tokio::test]
    async fn delete_is_success_on_absence() {
        let store = RecordStore::new(scratch_dir());
        let id: StreamId = "never-existed".parse().unwrap();
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_all_records() {
        let store = RecordStore::new(scratch_dir());
        store.save(&sample_record()).await.unwrap();
        store.save(&sample_record()).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.find_all().await.unwrap().is_empty());
    }
}
