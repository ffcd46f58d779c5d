use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wardrobe_core::InstanceId;
use wardrobe_storage::adapter::StorageAdapter;
use wardrobe_storage::data_manager::DataManager;
use wardrobe_storage::document::DocumentPatch;

use crate::config::Config;
use crate::defaults::DefaultOutfits;
use crate::events::{EventBus, OutfitOwner};
use crate::host::HostContext;
use crate::identity::InstanceTracker;
use crate::macros::MacroResolver;
use crate::manager::{BotOutfitManager, UserOutfitManager};
use crate::store::{ListenerId, OutfitStore};

struct Autosave {
    listener_id: ListenerId,
    worker: JoinHandle<()>,
}

/// The outfit tracker as one unit: state, managers, macros and persistence.
pub struct OutfitTracker {
    config: Config,
    store: OutfitStore,
    host: Arc<dyn HostContext>,
    data: Arc<DataManager>,
    bot: Arc<BotOutfitManager>,
    user: Arc<UserOutfitManager>,
    defaults: DefaultOutfits,
    resolver: MacroResolver,
    instances: InstanceTracker,
    autosave: Option<Autosave>,
}

impl OutfitTracker {
    /// Loads (and migrates) persisted data, wires every component to one
    /// store and, when enabled, starts the autosave worker.
    pub async fn start(
        config: Config,
        adapter: Arc<dyn StorageAdapter>,
        host: Arc<dyn HostContext>,
    ) -> Self {
        let data = Arc::new(DataManager::new(adapter));
        let doc = data.initialize().await;

        let store = OutfitStore::new(
            config.bot_slots.clone(),
            config.user_slots.clone(),
            EventBus::new(),
        );
        store.load_document(doc);

        let bot = Arc::new(BotOutfitManager::new(store.clone(), host.clone()));
        let user = Arc::new(UserOutfitManager::new(store.clone()));
        let defaults = DefaultOutfits::new(host.clone(), bot.clone(), user.clone());
        let resolver = MacroResolver::new(store.clone(), host.clone(), config.macro_cache_ttl());
        let instances = InstanceTracker::new(store.clone(), host.clone());

        let autosave = if config.autosave {
            Some(spawn_autosave(store.clone(), data.clone()))
        } else {
            None
        };

        info!(
            "Outfit tracker started ({} bot slots, {} user slots, autosave {})",
            config.bot_slots.len(),
            config.user_slots.len(),
            if config.autosave { "on" } else { "off" }
        );

        OutfitTracker {
            config,
            store,
            host,
            data,
            bot,
            user,
            defaults,
            resolver,
            instances,
            autosave,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &OutfitStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        self.store.events()
    }

    pub fn host(&self) -> &Arc<dyn HostContext> {
        &self.host
    }

    pub fn bot(&self) -> &BotOutfitManager {
        &self.bot
    }

    pub fn user(&self) -> &UserOutfitManager {
        &self.user
    }

    pub fn defaults(&self) -> &DefaultOutfits {
        &self.defaults
    }

    pub fn resolver(&self) -> &MacroResolver {
        &self.resolver
    }

    pub fn instances(&self) -> &InstanceTracker {
        &self.instances
    }

    /// Re-derives the instance id; call before substituting macros for the message.
    pub async fn on_message_received(&self) -> Option<InstanceId> {
        self.instances.refresh().await
    }

    /// A new or reset conversation: refresh the id, then apply default outfits.
    pub async fn on_chat_reset(&self) -> Option<InstanceId> {
        let instance_id = self.instances.refresh().await?;
        if self.config.cleanup_on_load {
            self.cleanup_instances();
        }
        for owner in [OutfitOwner::Bot, OutfitOwner::User] {
            match self.defaults.apply_default(owner).await {
                Ok(true) => debug!("Applied default {} outfit", owner.as_str()),
                Ok(false) => {}
                Err(e) => warn!("Failed to apply default {} outfit: {e}", owner.as_str()),
            }
        }
        Some(instance_id)
    }

    /// Drops bot instances of the current character other than the active one.
    pub fn cleanup_instances(&self) -> usize {
        let (Some(character_id), Some(instance_id)) = (
            self.store.current_character_id(),
            self.store.current_instance_id(),
        ) else {
            return 0;
        };
        let removed = self
            .store
            .cleanup_unused_instances(&character_id, &[instance_id]);
        if removed > 0 {
            info!("Removed {removed} unused outfit instances for {character_id}");
        }
        removed
    }

    pub fn substitute(&self, text: &str) -> String {
        self.resolver.substitute_all(text)
    }

    /// Writes the durable state immediately, bypassing the autosave queue.
    pub async fn save_now(&self) -> bool {
        self.data
            .save(DocumentPatch::full(self.store.to_document()))
            .await
    }

    /// Stops autosave after flushing any pending write.
    pub async fn shutdown(mut self) {
        if let Some(autosave) = self.autosave.take() {
            self.store.unsubscribe(autosave.listener_id);
            if let Err(e) = autosave.worker.await {
                warn!("Autosave worker ended abnormally: {e}");
            }
        }
    }
}

impl Drop for OutfitTracker {
    fn drop(&mut self) {
        if let Some(autosave) = self.autosave.take() {
            self.store.unsubscribe(autosave.listener_id);
        }
    }
}

/// Store mutations only signal the worker; a full queue means a save is
/// already pending and will pick up the newer state.
fn spawn_autosave(store: OutfitStore, data: Arc<DataManager>) -> Autosave {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let listener_id = store.subscribe(move |_| match tx.try_send(()) {
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
        Err(mpsc::error::TrySendError::Closed(())) => {
            Err(anyhow::anyhow!("autosave worker is not running"))
        }
    });
    let worker_store = store.clone();
    let worker = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            let doc = worker_store.to_document();
            if !data.save(DocumentPatch::full(doc)).await {
                warn!("Autosave failed, will retry on the next change");
            }
        }
        debug!("Autosave worker stopped");
    });
    Autosave {
        listener_id,
        worker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ChatMessage, InMemoryHost};
    use crate::identity::instance_id_for;
    use crate::manager::OutfitManager;
    use wardrobe_storage::adapter::MemoryStorage;
    use wardrobe_storage::migration::CURRENT_VERSION;

    fn host_with_greeting() -> Arc<InMemoryHost> {
        let host = Arc::new(InMemoryHost::new());
        host.add_character("c1", "Alice");
        host.select_character(Some("c1"));
        host.set_messages(vec![ChatMessage::character("Alice", "Good morning!")]);
        host
    }

    #[tokio::test]
    async fn test_start_creates_current_document() {
        let storage = Arc::new(MemoryStorage::new());
        let tracker =
            OutfitTracker::start(Config::default(), storage.clone(), host_with_greeting()).await;
        let doc = storage.document().unwrap();
        assert_eq!(doc["version"], CURRENT_VERSION);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_keeps_outfits_next_to_a_bad_setting() {
        let raw = serde_json::json!({
            "botInstances": { "c1": { "i1": { "bot": { "headwear": "Cap" } } } },
            "settings": { "debugMode": "true" },
            "version": CURRENT_VERSION
        });
        let storage = Arc::new(MemoryStorage::with_document(raw.clone()));
        let tracker =
            OutfitTracker::start(Config::default(), storage.clone(), host_with_greeting()).await;
        assert_eq!(tracker.store().bot_outfit("c1", "i1").get("headwear"), Some("Cap"));
        tracker.shutdown().await;

        let doc = storage.document().unwrap();
        assert_eq!(doc["botInstances"]["c1"]["i1"]["bot"]["headwear"], "Cap");
        assert_eq!(storage.backup_document(), Some(raw));
    }

    #[tokio::test]
    async fn test_autosave_persists_mutations() {
        let storage = Arc::new(MemoryStorage::new());
        let tracker =
            OutfitTracker::start(Config::default(), storage.clone(), host_with_greeting()).await;
        let instance_id = tracker.on_message_received().await.unwrap();
        assert_eq!(instance_id, instance_id_for("Good morning!"));
        tracker.bot().set_slot("headwear", "Cap").unwrap();
        tracker.shutdown().await;

        let doc = storage.document().unwrap();
        assert_eq!(doc["botInstances"]["c1"][&instance_id]["bot"]["headwear"], "Cap");
        assert_eq!(doc["botInstances"]["c1"][&instance_id]["bot"]["footwear"], "None");
    }

    #[tokio::test]
    async fn test_without_autosave_only_save_now_writes() {
        let storage = Arc::new(MemoryStorage::new());
        let config = Config {
            autosave: false,
            ..Config::default()
        };
        let tracker = OutfitTracker::start(config, storage.clone(), host_with_greeting()).await;
        let instance_id = tracker.on_message_received().await.unwrap();
        tracker.user().set_slot("topwear", "Hoodie").unwrap();
        assert!(storage.document().unwrap()["userInstances"]
            .get(&instance_id)
            .is_none());

        assert!(tracker.save_now().await);
        assert_eq!(
            storage.document().unwrap()["userInstances"][&instance_id]["topwear"],
            "Hoodie"
        );
    }

    #[tokio::test]
    async fn test_chat_reset_applies_defaults_and_substitutes() {
        let storage = Arc::new(MemoryStorage::new());
        let tracker =
            OutfitTracker::start(Config::default(), storage.clone(), host_with_greeting()).await;
        tracker.on_message_received().await.unwrap();
        tracker.bot().set_slot("headwear", "Tiara").unwrap();
        tracker.bot().save_preset("formal").unwrap();
        tracker
            .defaults()
            .set_default_preset(OutfitOwner::Bot, "formal")
            .await
            .unwrap();
        tracker.bot().set_slot("headwear", "none").unwrap();
        assert_eq!(
            tracker.substitute("Hat: {{char_headwear}}"),
            "Hat: {{char_headwear}}"
        );

        tracker.on_chat_reset().await.unwrap();
        assert_eq!(tracker.substitute("Hat: {{char_headwear}}"), "Hat: Tiara");
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleanup_instances_keeps_current() {
        let storage = Arc::new(MemoryStorage::new());
        let tracker =
            OutfitTracker::start(Config::default(), storage.clone(), host_with_greeting()).await;
        let current = tracker.on_message_received().await.unwrap();
        tracker.bot().set_slot("headwear", "Cap").unwrap();
        tracker
            .store()
            .set_bot_outfit("c1", "stale", &[("headwear", "Old")].into_iter().collect())
            .unwrap();
        assert_eq!(tracker.cleanup_instances(), 1);
        assert_eq!(tracker.store().bot_instance_ids("c1"), vec![current]);
        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_restores_state() {
        let storage = Arc::new(MemoryStorage::new());
        let host = host_with_greeting();
        let tracker = OutfitTracker::start(Config::default(), storage.clone(), host.clone()).await;
        tracker.on_message_received().await.unwrap();
        tracker.bot().set_slot("footwear", "Boots").unwrap();
        tracker.shutdown().await;

        let tracker = OutfitTracker::start(Config::default(), storage.clone(), host).await;
        tracker.on_message_received().await.unwrap();
        assert_eq!(
            tracker.bot().current_outfit().unwrap().get("footwear"),
            Some("Boots")
        );
        tracker.shutdown().await;
    }
}
