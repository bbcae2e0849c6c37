use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{Error, Result};

#[allow(unused_imports)]
use crate::engine::MessageStore;

/// Handles disk I/O for the [`MessageStore`].
///
/// Documents are pretty-printed JSON files inside one data directory. Writes
/// use an atomic "write-then-rename" strategy so a reader never sees a
/// truncated document.
#[derive(Debug, Clone)]
pub struct Persistence {
    data_dir: PathBuf,
}

impl Persistence {
    /// Initializes a new `Persistence` handler in the specified directory.
    ///
    /// If the directory does not exist, it will be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| Error::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self { data_dir: dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Full path of the document called `name` inside the data directory.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Writes `value` to the document called `name`, replacing it atomically.
    pub fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        write_json_atomic(&self.path_of(name), value)
    }

    /// Reads the document called `name`. Returns `Ok(None)` when it does not exist.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        read_json(&self.path_of(name))
    }
}

/// Serializes `value` as pretty JSON and atomically replaces `path` with it.
///
/// The bytes go to a temporary file in the same directory, are synced, and
/// the temporary file is then renamed over the target.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let io_err = |source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| io_err(e.into()))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(io_err)?;
    }

    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Reads and deserializes the JSON document at `path`.
///
/// A missing file is `Ok(None)`; a present but malformed file is [`Error::Parse`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
}
