use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::Persistence;
use crate::{Error, MessageReader, MessageWriter, Result, DEFAULT_MESSAGE};

/// File name of the message document inside the data directory.
pub const MESSAGE_FILE: &str = "message.json";

/// The persisted unit: `{ "message": string }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDocument {
    pub message: String,
}

impl Default for MessageDocument {
    fn default() -> Self {
        Self {
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

/// Joins command-line words into one message with single spaces.
///
/// Returns `None` when the result is empty or whitespace only.
pub fn message_from_words<S: AsRef<str>>(words: &[S]) -> Option<String> {
    let message = words
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(" ");
    if message.trim().is_empty() {
        None
    } else {
        Some(message)
    }
}

/// Owns the single message value of one data directory.
///
/// Reads share a lock; a write holds the lock exclusively for the whole
/// persist-then-update sequence, so two writers never interleave and a reader
/// only ever sees a value that is already on disk. Cloning is cheap and all
/// clones share the same state.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<Inner>,
}

struct Inner {
    persistence: Persistence,
    data: RwLock<MessageDocument>,
}

impl MessageStore {
    /// Creates a store rooted at `data_dir`, creating the directory if needed.
    ///
    /// Nothing is read until [`MessageStore::load`] is called; until then the
    /// store holds [`DEFAULT_MESSAGE`].
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                persistence: Persistence::new(data_dir)?,
                data: RwLock::new(MessageDocument::default()),
            }),
        })
    }

    /// Path of the backing document.
    pub fn path(&self) -> PathBuf {
        self.inner.persistence.path_of(MESSAGE_FILE)
    }

    /// Opens the store.
    ///
    /// A missing document is created with the default message. A document
    /// that exists but does not parse is reported as [`Error::Parse`] and left
    /// untouched.
    pub fn load(&self) -> Result<()> {
        let mut data = self.write_data();

        match self.inner.persistence.load::<MessageDocument>(MESSAGE_FILE)? {
            Some(doc) => *data = doc,
            None => {
                let doc = MessageDocument::default();
                self.inner.persistence.save(MESSAGE_FILE, &doc)?;
                log::info!("Created {} with the default message", self.path().display());
                *data = doc;
            }
        }
        Ok(())
    }

    /// Returns the current in-memory message.
    pub fn get(&self) -> String {
        self.read_data().message.clone()
    }

    /// Persists `message` and then makes it the current value.
    ///
    /// If the write fails the in-memory value is left as it was.
    pub fn set(&self, message: &str) -> Result<()> {
        let mut data = self.write_data();

        let doc = MessageDocument {
            message: message.to_string(),
        };
        self.inner.persistence.save(MESSAGE_FILE, &doc)?;
        *data = doc;
        Ok(())
    }

    // The document is only replaced after a successful write, so a poisoned
    // lock still guards a consistent value.
    fn read_data(&self) -> RwLockReadGuard<'_, MessageDocument> {
        self.inner.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, MessageDocument> {
        self.inner.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageReader for MessageStore {
    // Blocks the worker only while a writer holds the lock; the document is tiny.
    async fn get_message(&self) -> String {
        self.get()
    }
}

#[async_trait]
impl MessageWriter for MessageStore {
    async fn set_message(&self, message: &str) -> Result<()> {
        let store = self.clone();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || store.set(&message))
            .await
            .map_err(|e| Error::Io {
                path: self.path(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn read_doc(path: &Path) -> MessageDocument {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_words_join_with_single_spaces() {
        assert_eq!(
            message_from_words(&["Hello", "from", "the", "CLI"]).unwrap(),
            "Hello from the CLI"
        );
        assert_eq!(message_from_words(&[" padded "]).unwrap(), " padded ");
    }

    #[test]
    fn test_blank_words_are_rejected() {
        assert_eq!(message_from_words::<&str>(&[]), None);
        assert_eq!(message_from_words(&[""]), None);
        assert_eq!(message_from_words(&["  ", "\t"]), None);
    }

    #[test]
    fn test_joined_words_are_stored() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path()).unwrap();
        store.load().unwrap();

        let words: Vec<String> = vec!["set".into(), "from".into(), "words".into()];
        store.set(&message_from_words(&words).unwrap()).unwrap();

        assert_eq!(read_doc(&store.path()).message, "set from words");
        let reopened = MessageStore::new(dir.path()).unwrap();
        reopened.load().unwrap();
        assert_eq!(reopened.get(), "set from words");
    }

    #[test]
    fn test_load_creates_default_document() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path()).unwrap();
        assert!(!store.path().exists());

        store.load().unwrap();

        assert_eq!(store.get(), DEFAULT_MESSAGE);
        assert_eq!(read_doc(&store.path()).message, DEFAULT_MESSAGE);
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path()).unwrap();
        store.load().unwrap();
        let first = fs::read(store.path()).unwrap();

        store.load().unwrap();
        MessageStore::new(dir.path()).unwrap().load().unwrap();

        assert_eq!(fs::read(store.path()).unwrap(), first);
    }

    #[test]
    fn test_set_survives_reopen() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path()).unwrap();
        store.load().unwrap();

        for msg in ["Hi", "  padded  ", "héllo wörld ✓", "line one\nline two"] {
            store.set(msg).unwrap();
            assert_eq!(store.get(), msg);

            let reopened = MessageStore::new(dir.path()).unwrap();
            reopened.load().unwrap();
            assert_eq!(reopened.get(), msg);
        }
    }

    #[test]
    fn test_corrupt_document_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MESSAGE_FILE);
        fs::write(&path, b"{ definitely not json").unwrap();

        let store = MessageStore::new(dir.path()).unwrap();
        let res = store.load();

        assert!(matches!(res, Err(Error::Parse { .. })));
        assert_eq!(fs::read(&path).unwrap(), b"{ definitely not json");
    }

    #[test]
    fn test_document_without_message_field_is_parse_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MESSAGE_FILE), b"{}").unwrap();

        let store = MessageStore::new(dir.path()).unwrap();
        assert!(matches!(store.load(), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_failed_write_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path()).unwrap();
        store.load().unwrap();
        store.set("before").unwrap();

        // A non-empty directory in place of the document makes the rename fail.
        fs::remove_file(store.path()).unwrap();
        fs::create_dir(store.path()).unwrap();
        fs::write(store.path().join("blocker"), b"x").unwrap();

        let res = store.set("after");

        assert!(matches!(res, Err(Error::Io { .. })));
        assert_eq!(store.get(), "before");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_serialize() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path()).unwrap();
        store.load().unwrap();

        let values: Vec<String> = (0..32).map(|i| format!("message number {i}")).collect();
        let writes = values.iter().map(|v| {
            let store = store.clone();
            let v = v.clone();
            async move { store.set_message(&v).await }
        });
        for res in futures::future::join_all(writes).await {
            res.unwrap();
        }

        let last = store.get_message().await;
        assert!(values.contains(&last));
        assert_eq!(read_doc(&store.path()).message, last);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_see_whole_values() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path()).unwrap();
        store.load().unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    store.set_message(&"x".repeat(i + 1)).await.unwrap();
                }
            })
        };
        let readers = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let seen = store.get_message().await;
                    assert!(seen == DEFAULT_MESSAGE || seen.chars().all(|c| c == 'x'));
                    tokio::task::yield_now().await;
                }
            })
        });

        for reader in futures::future::join_all(readers).await {
            reader.unwrap();
        }
        writer.await.unwrap();
        assert_eq!(store.get(), "x".repeat(20));
    }
}
