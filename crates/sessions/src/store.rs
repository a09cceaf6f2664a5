//! File-backed session record store.
//!
//! One JSON file per user under `<state_path>/records/`. Writes go to a
//! temp file first and are renamed into place, so a crash mid-write leaves
//! the previous record intact rather than a corrupt one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use courier_domain::{Error, Result, SessionRecord, UserId};
use courier_transport::RecordStore;

pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Open (or create) the record directory under `state_path`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("records");
        std::fs::create_dir_all(&dir)?;
        tracing::info!(path = %dir.display(), "record store ready");
        Ok(Self { dir })
    }

    fn record_path(&self, user: &UserId) -> PathBuf {
        // UserId's charset is path-safe by construction.
        self.dir.join(format!("{user}.json"))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn load(&self, user: &UserId) -> Result<Option<SessionRecord>> {
        let path = self.record_path(user);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Store(format!(
                    "reading record for {user}: {e}"
                )))
            }
        };
        let record = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("parsing record for {user}: {e}")))?;
        Ok(Some(record))
    }

    async fn save(&self, user: &UserId, record: SessionRecord) -> Result<()> {
        let path = self.record_path(user);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| Error::Store(format!("serializing record for {user}: {e}")))?;
        std::fs::write(&tmp, json)
            .map_err(|e| Error::Store(format!("writing record for {user}: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Store(format!("replacing record for {user}: {e}")))?;
        tracing::debug!(user = %user, path = %path.display(), "record saved");
        Ok(())
    }

    async fn delete(&self, user: &UserId) -> Result<()> {
        match std::fs::remove_file(self.record_path(user)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!(
                "deleting record for {user}: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileRecordStore {
        FileRecordStore::new(dir.path()).unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn record(n: u64) -> SessionRecord {
        SessionRecord::new(serde_json::json!({ "keys": n }))
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let u = user("u1");

        store.save(&u, record(1)).await.unwrap();
        let loaded = store.load(&u).await.unwrap().unwrap();
        assert_eq!(loaded.payload, serde_json::json!({ "keys": 1 }));
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load(&user("nobody")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_saves_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let u = user("u1");

        let r = record(7);
        store.save(&u, r.clone()).await.unwrap();
        let first = store.load(&u).await.unwrap().unwrap();
        store.save(&u, r).await.unwrap();
        let second = store.load(&u).await.unwrap().unwrap();

        assert_eq!(first.payload, second.payload);
        assert_eq!(first.saved_at, second.saved_at);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let u = user("u1");

        store.save(&u, record(1)).await.unwrap();
        store.save(&u, record(2)).await.unwrap();
        let loaded = store.load(&u).await.unwrap().unwrap();
        assert_eq!(loaded.payload, serde_json::json!({ "keys": 2 }));
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&user("u1"), record(1)).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("records"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.save(&user("alice"), record(1)).await.unwrap();
        store.save(&user("bob"), record(2)).await.unwrap();
        store.delete(&user("alice")).await.unwrap();

        assert!(store.load(&user("alice")).await.unwrap().is_none());
        assert!(store.load(&user("bob")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        store(&dir).delete(&user("nobody")).await.unwrap();
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = store(&dir);
            store.save(&user("u1"), record(9)).await.unwrap();
        }
        let reopened = store(&dir);
        let loaded = reopened.load(&user("u1")).await.unwrap().unwrap();
        assert_eq!(loaded.payload, serde_json::json!({ "keys": 9 }));
    }
}
