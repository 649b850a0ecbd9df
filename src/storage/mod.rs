//! Persisted client state
//!
//! All durable state (conversation history, theme preference) is kept as
//! string blobs under well-known keys, mirroring the local-storage model of
//! the UI this engine serves. [`StateStore`] is the narrow seam between the
//! engine and the storage medium: production code uses a file-per-key store
//! under the platform data directory, tests and embedders substitute an
//! in-memory map.
//!
//! Store failures are infrastructure-level. Callers recover by falling back
//! to in-memory state and logging; they never surface storage errors through
//! the conversation API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

/// Well-known key holding the serialized conversation history mapping.
pub const HISTORY_KEY: &str = "conversation-history";

/// Well-known key holding the persisted theme preference.
pub const THEME_KEY: &str = "theme";

/// Narrow persistence seam for client state.
pub trait StateStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, overwriting any previous value.
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// File-backed state store: one file per key inside a state directory.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create state directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Open a store in the platform data directory for this application.
    pub fn open_default() -> Result<Self> {
        let root = if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "colloquy") {
            proj_dirs.data_dir().to_path_buf()
        } else {
            // Fallback for platforms without a resolvable home
            PathBuf::from(".colloquy")
        };
        Self::new(root)
    }

    /// Directory holding the state files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let value = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        Ok(Some(value))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        std::fs::write(&path, value)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;
        Ok(())
    }
}

/// In-memory state store for tests and ephemeral embedding.
#[derive(Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
