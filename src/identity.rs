//! Conversation-branch identity.
//!
//! A branch has no handle of its own that survives a reload, so its id is
//! derived from the text of its first character message. Outfit values and
//! slot macros are stripped first. A value that was only learned after the id
//! was derived changes the id, so state stored under the earlier id of the
//! same message is adopted on refresh.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use wardrobe_core::text::normalize_for_identity;
use wardrobe_core::InstanceId;

use crate::host::{first_character_message, HostContext};
use crate::store::OutfitStore;

const INSTANCE_ID_LEN: usize = 16;
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// SHA-256 of the lower-cased, trimmed text, first 16 hex characters.
pub fn instance_id_for(normalized: &str) -> InstanceId {
    let canonical = normalized.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..INSTANCE_ID_LEN].to_string()
}

/// Id scheme used by older data when no digest primitive was available:
/// 32-bit FNV-1a over UTF-16 code units, padded to 16 characters.
pub fn legacy_instance_id(normalized: &str) -> InstanceId {
    let canonical = normalized.trim().to_lowercase();
    let mut hash = FNV_OFFSET_BASIS;
    for unit in canonical.encode_utf16() {
        hash ^= u32::from(unit);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:08x}{:0<width$}", "", width = INSTANCE_ID_LEN - 8)
}

/// Last id derived in this process, with the text it came from.
#[derive(Debug, Clone)]
struct Derivation {
    character_id: Option<String>,
    raw: String,
    instance_id: InstanceId,
}

/// Keeps the store's current instance id in step with the active conversation.
pub struct InstanceTracker {
    store: OutfitStore,
    host: Arc<dyn HostContext>,
    slots: Vec<String>,
    last: Mutex<Option<Derivation>>,
}

impl InstanceTracker {
    pub fn new(store: OutfitStore, host: Arc<dyn HostContext>) -> Self {
        let mut slots = store.bot_slots().to_vec();
        for slot in store.user_slots() {
            if !slots.contains(slot) {
                slots.push(slot.clone());
            }
        }
        InstanceTracker {
            store,
            host,
            slots,
            last: Mutex::new(None),
        }
    }

    fn lock_last(&self) -> MutexGuard<'_, Option<Derivation>> {
        match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Canonical text for `raw`, stripped of everything the given character has worn.
    pub fn normalize(&self, raw: &str, character_id: Option<&str>) -> String {
        let known_values = self.store.known_values_for_character(character_id);
        normalize_for_identity(raw, &self.slots, &known_values)
    }

    /// Recomputes the instance id and stores it as current. Callers await this
    /// before resolving macros for the same event.
    pub async fn refresh(&self) -> Option<InstanceId> {
        let character_id = self.host.current_character_id();
        self.store.set_current_character_id(character_id.as_deref());

        let messages = match self.host.conversation().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to read conversation for instance id: {e}");
                Vec::new()
            }
        };
        let Some(first) = first_character_message(&messages) else {
            debug!("No character message yet, clearing current outfit instance");
            self.store.set_current_instance_id(None);
            return None;
        };

        let normalized = self.normalize(&first.text, character_id.as_deref());
        let instance_id = instance_id_for(&normalized);

        if let Some(character_id) = character_id.as_deref() {
            let candidates = self.earlier_ids(character_id, &first.text, &normalized);
            self.adopt_earlier_instance(character_id, &candidates, &instance_id);
        }

        *self.lock_last() = Some(Derivation {
            character_id: character_id.clone(),
            raw: first.text.clone(),
            instance_id: instance_id.clone(),
        });
        self.store.set_current_instance_id(Some(&instance_id));
        Some(instance_id)
    }

    /// Ids the same first message may have been stored under before: the id
    /// this process last derived for it, the id derived before any of its
    /// words were known outfit values, and the legacy ids of both.
    fn earlier_ids(&self, character_id: &str, raw: &str, normalized: &str) -> Vec<InstanceId> {
        let mut ids = Vec::new();
        if let Some(last) = self.lock_last().as_ref() {
            if last.character_id.as_deref() == Some(character_id) && last.raw == raw {
                ids.push(last.instance_id.clone());
            }
        }
        let unstripped = normalize_for_identity(raw, &self.slots, &[] as &[&str]);
        ids.push(instance_id_for(&unstripped));
        ids.push(legacy_instance_id(normalized));
        ids.push(legacy_instance_id(&unstripped));
        let mut seen = BTreeSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        ids
    }

    fn adopt_earlier_instance(
        &self,
        character_id: &str,
        candidates: &[InstanceId],
        instance_id: &str,
    ) {
        for earlier in candidates {
            if earlier == instance_id || !self.store.has_instance_data(character_id, earlier) {
                continue;
            }
            if self.store.adopt_instance(character_id, earlier, instance_id) {
                info!(
                    "Adopted outfit instance {earlier} as {instance_id} for character {character_id}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::host::{ChatMessage, InMemoryHost};
    use wardrobe_core::slots::{default_bot_slots, default_user_slots, Outfit};

    fn setup() -> (OutfitStore, Arc<InMemoryHost>, InstanceTracker) {
        let store = OutfitStore::new(default_bot_slots(), default_user_slots(), EventBus::new());
        let host = Arc::new(InMemoryHost::new());
        host.add_character("c1", "Alice");
        host.select_character(Some("c1"));
        let tracker = InstanceTracker::new(store.clone(), host.clone());
        (store, host, tracker)
    }

    #[test]
    fn test_instance_id_shape_and_determinism() {
        let a = instance_id_for("Hello there");
        let b = instance_id_for("  hello THERE ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, instance_id_for("Hello there!"));
    }

    #[test]
    fn test_instance_id_known_vector() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(instance_id_for("ABC"), "ba7816bf8f01cfea");
    }

    #[test]
    fn test_legacy_instance_id_known_vectors() {
        // FNV-1a 32 of "" is the offset basis, of "a" is 0xe40c292c.
        assert_eq!(legacy_instance_id(""), "811c9dc500000000");
        assert_eq!(legacy_instance_id("A"), "e40c292c00000000");
    }

    #[test]
    fn test_outfit_change_invariance() {
        let (store, _host, tracker) = setup();
        store
            .set_bot_outfit("c1", "seed", &[("headwear", "Red Cap")].into_iter().collect())
            .unwrap();
        store
            .save_bot_preset("c1", "seed", "formal", &[("headwear", "Top Hat")].into_iter().collect())
            .unwrap();

        let a = tracker.normalize("Alice waves, wearing a Red Cap.", Some("c1"));
        let b = tracker.normalize("Alice waves, wearing a top hat.", Some("c1"));
        let c = tracker.normalize("Alice waves, wearing a None.", Some("c1"));
        let d = tracker.normalize("Alice waves, wearing a {{char_headwear}}.", Some("c1"));
        assert_eq!(instance_id_for(&a), instance_id_for(&b));
        assert_eq!(instance_id_for(&a), instance_id_for(&c));
        assert_ne!(instance_id_for(&a), instance_id_for(&d));
        assert_eq!(
            instance_id_for(&tracker.normalize("Alice waves.", Some("c1"))),
            instance_id_for(&tracker.normalize("Alice waves.", Some("c1")))
        );
    }

    #[tokio::test]
    async fn test_refresh_uses_first_character_message() {
        let (store, host, tracker) = setup();
        host.set_messages(vec![
            ChatMessage::system("Chat started"),
            ChatMessage::user("Me", "Hi"),
            ChatMessage::character("Alice", "Good morning!"),
            ChatMessage::character("Alice", "Anything else?"),
        ]);
        let id = tracker.refresh().await.unwrap();
        assert_eq!(id, instance_id_for("Good morning!"));
        assert_eq!(store.current_instance_id(), Some(id.clone()));
        assert_eq!(store.current_character_id(), Some("c1".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_without_character_message_clears() {
        let (store, host, tracker) = setup();
        store.set_current_instance_id(Some("stale"));
        host.set_messages(vec![ChatMessage::user("Me", "Hello?")]);
        assert_eq!(tracker.refresh().await, None);
        assert_eq!(store.current_instance_id(), None);
    }

    #[tokio::test]
    async fn test_refresh_adopts_legacy_instance() {
        let (store, host, tracker) = setup();
        host.set_messages(vec![ChatMessage::character("Alice", "Good morning!")]);
        let legacy = legacy_instance_id("Good morning!");
        let outfit: Outfit = [("topwear", "Sweater")].into_iter().collect();
        store.set_bot_outfit("c1", &legacy, &outfit).unwrap();

        let id = tracker.refresh().await.unwrap();
        assert_ne!(id, legacy);
        assert!(store.bot_record("c1", &legacy).is_none());
        assert_eq!(store.bot_outfit("c1", &id).get("topwear"), Some("Sweater"));
    }

    #[tokio::test]
    async fn test_wearing_an_item_named_in_the_greeting_keeps_the_outfit() {
        let (store, host, tracker) = setup();
        host.set_messages(vec![ChatMessage::character(
            "Alice",
            "Alice tips her Cap and smiles.",
        )]);
        let first = tracker.refresh().await.unwrap();
        let outfit: Outfit = [("headwear", "Cap")].into_iter().collect();
        store.set_bot_outfit("c1", &first, &outfit).unwrap();
        store.set_user_outfit(Some(&first), &[("topwear", "Hoodie")].into_iter().collect());

        let second = tracker.refresh().await.unwrap();
        assert_eq!(store.current_instance_id(), Some(second.clone()));
        assert_eq!(store.bot_outfit("c1", &second).get("headwear"), Some("Cap"));
        assert_eq!(store.user_outfit(Some(&second)).get("topwear"), Some("Hoodie"));
        assert_eq!(tracker.refresh().await, Some(second));
    }

    #[tokio::test]
    async fn test_fresh_tracker_adopts_record_stored_before_value_was_known() {
        let (store, host, _tracker) = setup();
        let greeting = "Alice tips her Cap and smiles.";
        host.set_messages(vec![ChatMessage::character("Alice", greeting)]);
        let before = instance_id_for(greeting);
        let outfit: Outfit = [("headwear", "Cap")].into_iter().collect();
        store.set_bot_outfit("c1", &before, &outfit).unwrap();

        let tracker = InstanceTracker::new(store.clone(), host.clone());
        let id = tracker.refresh().await.unwrap();
        assert_ne!(id, before);
        assert!(store.bot_record("c1", &before).is_none());
        assert_eq!(store.bot_outfit("c1", &id).get("headwear"), Some("Cap"));
    }

    #[tokio::test]
    async fn test_refresh_adopts_legacy_user_state() {
        let (store, host, tracker) = setup();
        host.set_messages(vec![ChatMessage::character("Alice", "Good morning!")]);
        let legacy = legacy_instance_id("Good morning!");
        let hoodie: Outfit = [("topwear", "Hoodie")].into_iter().collect();
        store.set_user_outfit(Some(&legacy), &hoodie);

        let id = tracker.refresh().await.unwrap();
        assert!(store.user_record(Some(&legacy)).is_none());
        assert_eq!(store.user_outfit(Some(&id)).get("topwear"), Some("Hoodie"));
    }
}
