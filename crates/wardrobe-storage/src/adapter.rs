use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use wardrobe_core::error::WardrobeError;

/// Key-value persistence offered by the host. Implementations may be backed
/// by synchronous or asynchronous I/O; callers always await.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn load(&self) -> Result<Option<serde_json::Value>, WardrobeError>;
    async fn save(&self, doc: &serde_json::Value) -> Result<(), WardrobeError>;

    /// Keeps a copy of a stored document that could not be read in full
    /// before it is replaced. Adapters without backups refuse, which keeps
    /// the damaged document in place.
    async fn backup(&self, _doc: &serde_json::Value) -> Result<(), WardrobeError> {
        Err(WardrobeError::Storage("backups are not supported".into()))
    }
}

/// Stores the document as pretty JSON in a single file.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStorage { path: path.into() }
    }

    /// `<data_dir>/outfits.json`
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("outfits.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<data_dir>/outfits.json.bak`
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("json.bak")
    }
}

#[async_trait]
impl StorageAdapter for JsonFileStorage {
    async fn load(&self) -> Result<Option<serde_json::Value>, WardrobeError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save(&self, doc: &serde_json::Value) -> Result<(), WardrobeError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn backup(&self, doc: &serde_json::Value) -> Result<(), WardrobeError> {
        let json = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(self.backup_path(), json).await?;
        Ok(())
    }
}

/// Process-local storage, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStorage {
    doc: Mutex<Option<serde_json::Value>>,
    backup: Mutex<Option<serde_json::Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: serde_json::Value) -> Self {
        MemoryStorage {
            doc: Mutex::new(Some(doc)),
            backup: Mutex::new(None),
        }
    }

    fn lock_doc(&self) -> MutexGuard<'_, Option<serde_json::Value>> {
        match self.doc.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn document(&self) -> Option<serde_json::Value> {
        self.lock_doc().clone()
    }

    pub fn backup_document(&self) -> Option<serde_json::Value> {
        match self.backup.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn load(&self) -> Result<Option<serde_json::Value>, WardrobeError> {
        Ok(self.lock_doc().clone())
    }

    async fn save(&self, doc: &serde_json::Value) -> Result<(), WardrobeError> {
        *self.lock_doc() = Some(doc.clone());
        Ok(())
    }

    async fn backup(&self, doc: &serde_json::Value) -> Result<(), WardrobeError> {
        let mut backup = match self.backup.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *backup = Some(doc.clone());
        Ok(())
    }
}
