use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::adapter::StorageAdapter;
use crate::document::{DocumentPatch, PersistedDocument};
use crate::migration::{migrate, needs_migration};

/// What the adapter handed back on load.
enum Loaded {
    Missing,
    Unavailable,
    Document {
        doc: PersistedDocument,
        damaged: Option<Value>,
    },
    Unreadable(Value),
}

/// Loads and saves the outfit document through a host storage adapter.
///
/// Persistence is best effort: unreadable documents load as "no data" and
/// failed saves are logged, never raised. A stored document that could not
/// be read in full is never replaced before the adapter has backed it up.
pub struct DataManager {
    adapter: Arc<dyn StorageAdapter>,
    snapshot: Mutex<PersistedDocument>,
}

impl DataManager {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        DataManager {
            adapter,
            snapshot: Mutex::new(PersistedDocument::new_current()),
        }
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, PersistedDocument> {
        match self.snapshot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn load_raw(&self) -> Loaded {
        let raw = match self.adapter.load().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Loaded::Missing,
            Err(e) => {
                warn!("Failed to load outfit data, starting empty: {e}");
                return Loaded::Unavailable;
            }
        };
        match PersistedDocument::from_value_lenient(raw.clone()) {
            Some((doc, repaired)) => {
                *self.lock_snapshot() = doc.clone();
                let damaged = repaired.then_some(raw);
                Loaded::Document { doc, damaged }
            }
            None => {
                warn!("Stored outfit data is not a document, starting empty");
                Loaded::Unreadable(raw)
            }
        }
    }

    /// Stored document with malformed entries dropped; `None` when nothing
    /// usable is stored.
    pub async fn load(&self) -> Option<PersistedDocument> {
        match self.load_raw().await {
            Loaded::Document { doc, .. } => Some(doc),
            Loaded::Missing | Loaded::Unavailable | Loaded::Unreadable(_) => None,
        }
    }

    /// Merges `patch` into the snapshot and writes the whole document.
    /// Returns `false` if the adapter failed.
    pub async fn save(&self, patch: DocumentPatch) -> bool {
        let merged = {
            let mut snapshot = self.lock_snapshot();
            patch.apply_to(&mut snapshot);
            snapshot.clone()
        };
        let value = match serde_json::to_value(&merged) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize outfit data: {e}");
                return false;
            }
        };
        match self.adapter.save(&value).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save outfit data: {e}");
                false
            }
        }
    }

    async fn backup(&self, raw: &Value) -> bool {
        match self.adapter.backup(raw).await {
            Ok(()) => {
                info!("Backed up damaged outfit data before repairing it");
                true
            }
            Err(e) => {
                warn!("Could not back up damaged outfit data, leaving it untouched: {e}");
                false
            }
        }
    }

    /// Loads the document (or creates an empty current one) and migrates
    /// older schemas in place. Writes back only when the stored document is
    /// missing or was read in full, or once a damaged one has been backed up.
    pub async fn initialize(&self) -> PersistedDocument {
        let (mut doc, mut dirty, writable) = match self.load_raw().await {
            Loaded::Missing => {
                info!("No outfit data found, creating an empty document");
                (PersistedDocument::new_current(), true, true)
            }
            Loaded::Unavailable => (PersistedDocument::new_current(), false, false),
            Loaded::Document { doc, damaged: None } => (doc, false, true),
            Loaded::Document {
                doc,
                damaged: Some(raw),
            } => {
                let backed_up = self.backup(&raw).await;
                (doc, backed_up, backed_up)
            }
            Loaded::Unreadable(raw) => {
                self.backup(&raw).await;
                (PersistedDocument::new_current(), false, false)
            }
        };

        if needs_migration(&doc) {
            migrate(&mut doc);
            dirty = true;
        }

        *self.lock_snapshot() = doc.clone();
        if dirty && writable {
            self.save(DocumentPatch::default()).await;
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryStorage;
    use crate::document::Settings;
    use crate::migration::CURRENT_VERSION;
    use async_trait::async_trait;
    use wardrobe_core::error::WardrobeError;

    struct BrokenStorage;

    struct NoBackupStorage(MemoryStorage);

    #[async_trait]
    impl StorageAdapter for NoBackupStorage {
        async fn load(&self) -> Result<Option<serde_json::Value>, WardrobeError> {
            self.0.load().await
        }

        async fn save(&self, doc: &serde_json::Value) -> Result<(), WardrobeError> {
            self.0.save(doc).await
        }
    }

    #[async_trait]
    impl StorageAdapter for BrokenStorage {
        async fn load(&self) -> Result<Option<serde_json::Value>, WardrobeError> {
            Err(WardrobeError::Storage("disk unplugged".into()))
        }

        async fn save(&self, _doc: &serde_json::Value) -> Result<(), WardrobeError> {
            Err(WardrobeError::Storage("disk unplugged".into()))
        }
    }

    #[tokio::test]
    async fn test_initialize_empty_materializes_current_document() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = DataManager::new(storage.clone());
        let doc = manager.initialize().await;
        assert_eq!(doc.version, CURRENT_VERSION);
        assert!(doc.bot_instances.is_empty());
        let stored = storage.document().unwrap();
        assert_eq!(stored["version"], CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_initialize_migrates_legacy_default_preset() {
        let storage = Arc::new(MemoryStorage::with_document(serde_json::json!({
            "presets": { "bot": { "c1_i1": { "default": { "headwear": "Cap" } } } },
            "version": "1.0.0"
        })));
        let manager = DataManager::new(storage.clone());
        let doc = manager.initialize().await;
        assert_eq!(doc.settings.default_bot_presets["c1_i1"], "default");
        assert_eq!(doc.version, CURRENT_VERSION);
        let stored = storage.document().unwrap();
        assert_eq!(stored["settings"]["defaultBotPresets"]["c1_i1"], "default");
        assert_eq!(stored["presets"]["bot"]["c1_i1"]["default"]["headwear"], "Cap");
    }

    #[tokio::test]
    async fn test_malformed_section_is_dropped_and_backed_up() {
        let raw = serde_json::json!({
            "botInstances": "not a map",
            "userInstances": { "i1": { "topwear": "Hoodie" } }
        });
        let storage = Arc::new(MemoryStorage::with_document(raw.clone()));
        let manager = DataManager::new(storage.clone());
        let loaded = manager.load().await.unwrap();
        assert!(loaded.bot_instances.is_empty());

        let doc = manager.initialize().await;
        assert_eq!(doc.version, CURRENT_VERSION);
        assert_eq!(doc.user_instances["i1"].outfit.get("topwear"), Some("Hoodie"));
        assert_eq!(storage.backup_document(), Some(raw));
        let stored = storage.document().unwrap();
        assert_eq!(stored["userInstances"]["i1"]["topwear"], "Hoodie");
    }

    #[tokio::test]
    async fn test_bad_setting_does_not_wipe_instances() {
        let storage = Arc::new(MemoryStorage::with_document(serde_json::json!({
            "botInstances": { "c1": { "i1": { "bot": { "headwear": "Cap" } } } },
            "settings": { "debugMode": "true" },
            "version": CURRENT_VERSION
        })));
        let manager = DataManager::new(storage.clone());
        let doc = manager.initialize().await;
        assert_eq!(doc.bot_instances["c1"]["i1"].bot.get("headwear"), Some("Cap"));
        assert!(!doc.settings.debug_mode);
        let stored = storage.document().unwrap();
        assert_eq!(stored["botInstances"]["c1"]["i1"]["bot"]["headwear"], "Cap");
    }

    #[tokio::test]
    async fn test_damaged_document_without_backup_is_left_alone() {
        let raw = serde_json::json!({
            "botInstances": { "c1": { "i1": { "bot": { "headwear": "Cap" } } } },
            "version": 7
        });
        let storage = Arc::new(NoBackupStorage(MemoryStorage::with_document(raw.clone())));
        let manager = DataManager::new(storage.clone());
        let doc = manager.initialize().await;
        assert_eq!(doc.version, CURRENT_VERSION);
        assert_eq!(doc.bot_instances["c1"]["i1"].bot.get("headwear"), Some("Cap"));
        assert_eq!(storage.0.document(), Some(raw));
    }

    #[tokio::test]
    async fn test_unreadable_document_is_never_overwritten_on_start() {
        let raw = serde_json::json!(["not", "a", "document"]);
        let storage = Arc::new(MemoryStorage::with_document(raw.clone()));
        let manager = DataManager::new(storage.clone());
        assert!(manager.load().await.is_none());
        let doc = manager.initialize().await;
        assert_eq!(doc, PersistedDocument::new_current());
        assert_eq!(storage.document(), Some(raw.clone()));
        assert_eq!(storage.backup_document(), Some(raw));
    }

    #[tokio::test]
    async fn test_save_merges_patch_into_snapshot() {
        let storage = Arc::new(MemoryStorage::with_document(serde_json::json!({
            "userInstances": { "i1": { "topwear": "Hoodie" } },
            "version": CURRENT_VERSION
        })));
        let manager = DataManager::new(storage.clone());
        manager.initialize().await;

        let mut settings = Settings::default();
        settings.debug_mode = true;
        assert!(manager.save(DocumentPatch::settings_only(settings)).await);

        let stored = storage.document().unwrap();
        assert_eq!(stored["settings"]["debugMode"], true);
        assert_eq!(stored["userInstances"]["i1"]["topwear"], "Hoodie");
    }

    #[tokio::test]
    async fn test_adapter_failures_are_swallowed() {
        let manager = DataManager::new(Arc::new(BrokenStorage));
        let doc = manager.initialize().await;
        assert_eq!(doc.version, CURRENT_VERSION);
        assert!(!manager.save(DocumentPatch::default()).await);
    }
}
