use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

pub const KEY_TIMER_STATE: &str = "timerState";
pub const KEY_TASKS: &str = "tasks";
pub const KEY_POMODORO_RECORDS: &str = "pomodoroRecords";
pub const KEY_HISTORY: &str = "history";
pub const KEY_LAST_RESET_DATE: &str = "lastResetDate";
pub const KEY_SETTINGS: &str = "settings";

const STORE_FILE: &str = "store.json";
const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Unavailable(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "io error: {err}"),
            StorageError::Json(err) => write!(f, "json error: {err}"),
            StorageError::Unavailable(reason) => write!(f, "store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Json(value)
    }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Set { key: String, value: Value },
    Remove { key: String },
}

impl StoreOp {
    pub fn set<T: Serialize>(key: &str, value: &T) -> Result<Self, StorageError> {
        Ok(StoreOp::Set {
            key: key.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn remove(key: &str) -> Self {
        StoreOp::Remove {
            key: key.to_string(),
        }
    }
}

/// Notification published after a committed batch changed a key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub new_value: Option<Value>,
}

/// Process-independent key-value store shared by the coordinator and every surface.
///
/// `commit` applies all operations or none of them. Subscribers of `watch` see one
/// `StoreChange` per key whose value actually changed.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StorageError>;

    fn watch(&self) -> broadcast::Receiver<StoreChange>;
}

pub async fn load<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Reads a key, treating both absence and failure as "use the fallback".
pub async fn load_or_default<T, F>(store: &dyn KvStore, key: &str, fallback: F) -> T
where
    T: DeserializeOwned + Send,
    F: FnOnce() -> T + Send,
{
    match load(store, key).await {
        Ok(Some(value)) => value,
        Ok(None) => fallback(),
        Err(error) => {
            log::warn!("store read failed key={key} err={error}; falling back to defaults");
            fallback()
        }
    }
}

fn apply_ops(entries: &mut BTreeMap<String, Value>, ops: Vec<StoreOp>) -> Vec<StoreChange> {
    let mut changes = Vec::new();
    for op in ops {
        match op {
            StoreOp::Set { key, value } => {
                if entries.get(&key) == Some(&value) {
                    continue;
                }
                entries.insert(key.clone(), value.clone());
                changes.push(StoreChange {
                    key,
                    new_value: Some(value),
                });
            }
            StoreOp::Remove { key } => {
                if entries.remove(&key).is_some() {
                    changes.push(StoreChange {
                        key,
                        new_value: None,
                    });
                }
            }
        }
    }
    changes
}

fn publish(feed: &broadcast::Sender<StoreChange>, changes: Vec<StoreChange>) {
    for change in changes {
        // No subscribers is normal when no surface is open.
        let _ = feed.send(change);
    }
}

/// Ephemeral store, also the fake used by tests.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.lock().expect("state poisoned").clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.entries.lock().expect("state poisoned");
        Ok(guard.get(key).cloned())
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        let changes = {
            let mut guard = self.entries.lock().expect("state poisoned");
            apply_ops(&mut guard, ops)
        };
        publish(&self.changes, changes);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// All keys in one JSON document under `root`, rewritten atomically on every commit.
pub struct FileStore {
    root: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    pub fn open(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root)?;
        let path = root.join(STORE_FILE);
        let entries = if path.exists() {
            load_json(&path)?
        } else {
            BTreeMap::new()
        };
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        log::info!(
            "file store opened path={} keys={}",
            path.display(),
            entries.len()
        );
        Ok(Self {
            root,
            entries: Mutex::new(entries),
            changes,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.entries.lock().expect("state poisoned");
        Ok(guard.get(key).cloned())
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StorageError> {
        let changes = {
            let mut guard = self.entries.lock().expect("state poisoned");
            let mut next = guard.clone();
            let changes = apply_ops(&mut next, ops);
            if changes.is_empty() {
                return Ok(());
            }
            // Memory only moves forward once the file is durable.
            write_atomic(&self.path(), &next)?;
            *guard = next;
            changes
        };
        publish(&self.changes, changes);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let mut file = File::open(path)?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(serde_json::from_str(&buf)?)
}

fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), StorageError> {
    let temp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(data)?;
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Settings;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_commits_batches_and_publishes_changes() {
        let store = MemoryStore::new();
        let mut feed = store.watch();

        store
            .commit(vec![
                StoreOp::Set {
                    key: "a".into(),
                    value: json!(1),
                },
                StoreOp::Set {
                    key: "b".into(),
                    value: json!("two"),
                },
            ])
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(feed.recv().await.unwrap().key, "a");
        assert_eq!(feed.recv().await.unwrap().key, "b");

        store.commit(vec![StoreOp::remove("a")]).await.unwrap();
        let change = feed.recv().await.unwrap();
        assert_eq!(change.key, "a");
        assert_eq!(change.new_value, None);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unchanged_values_and_missing_removals_are_silent() {
        let store = MemoryStore::new();
        store
            .commit(vec![StoreOp::set("k", &5).unwrap()])
            .await
            .unwrap();
        let mut feed = store.watch();

        store
            .commit(vec![StoreOp::set("k", &5).unwrap(), StoreOp::remove("nope")])
            .await
            .unwrap();
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn typed_load_and_fallbacks() {
        let store = MemoryStore::new();
        let missing: Option<Settings> = load(&store, KEY_SETTINGS).await.unwrap();
        assert!(missing.is_none());

        store
            .commit(vec![StoreOp::Set {
                key: KEY_SETTINGS.into(),
                value: json!({ "pomodoroDuration": 40 }),
            }])
            .await
            .unwrap();
        let settings: Settings = load_or_default(&store, KEY_SETTINGS, Settings::default).await;
        assert_eq!(settings.pomodoro_duration, 40);

        // A value of the wrong shape reads as an error and falls back.
        store
            .commit(vec![StoreOp::set(KEY_SETTINGS, &"garbage").unwrap()])
            .await
            .unwrap();
        assert!(load::<Settings>(&store, KEY_SETTINGS).await.is_err());
        let settings: Settings = load_or_default(&store, KEY_SETTINGS, Settings::default).await;
        assert_eq!(settings, Settings::default());

        // Explicit null is the same as absent.
        store
            .commit(vec![StoreOp::set(KEY_SETTINGS, &Value::Null).unwrap()])
            .await
            .unwrap();
        assert!(load::<Settings>(&store, KEY_SETTINGS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path().to_path_buf()).unwrap();
            store
                .commit(vec![
                    StoreOp::set(KEY_LAST_RESET_DATE, &"2025-06-01").unwrap(),
                    StoreOp::set(KEY_TASKS, &Vec::<String>::new()).unwrap(),
                ])
                .await
                .unwrap();
            assert!(store.path().is_file());
            assert!(!store.path().with_extension("tmp").exists());
        }

        let reopened = FileStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            reopened.get(KEY_LAST_RESET_DATE).await.unwrap(),
            Some(json!("2025-06-01"))
        );
        assert_eq!(reopened.get(KEY_TASKS).await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn file_store_keeps_memory_unchanged_when_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).unwrap();
        // A directory where the temp file should go makes File::create fail.
        fs::create_dir_all(store.path().with_extension("tmp")).unwrap();

        let mut feed = store.watch();
        let result = store
            .commit(vec![StoreOp::set("k", &1).unwrap()])
            .await;
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn file_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STORE_FILE), b"{not json").unwrap();
        let result = FileStore::open(dir.path().to_path_buf());
        assert!(matches!(result, Err(StorageError::Json(_))));
    }

    #[test]
    fn storage_error_display() {
        let err = StorageError::Unavailable("closed".into());
        assert_eq!(err.to_string(), "store unavailable: closed");
        let io: StorageError = std::io::Error::other("disk").into();
        assert!(io.to_string().starts_with("io error:"));
    }
}
