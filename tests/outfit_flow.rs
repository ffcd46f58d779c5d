//! End-to-end outfit tracking against a JSON file on disk.

use serde_json::json;
use std::sync::Arc;

use wardrobe::adapter::{JsonFileStorage, StorageAdapter};
use wardrobe::config::Config;
use wardrobe::events::OutfitOwner;
use wardrobe::host::{ChatMessage, InMemoryHost};
use wardrobe::identity::{instance_id_for, legacy_instance_id};
use wardrobe::manager::OutfitManager;
use wardrobe::migration::CURRENT_VERSION;
use wardrobe::runtime::OutfitTracker;

fn unique_data_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("wardrobe-flow-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_for(dir: &std::path::Path) -> Config {
    Config {
        data_dir: dir.to_string_lossy().to_string(),
        ..Config::default()
    }
}

const SCARF_GREETING: &str = "*Alice adjusts her Red Scarf.* Hello!";

fn host(greeting: &str) -> Arc<InMemoryHost> {
    let host = Arc::new(InMemoryHost::new());
    host.add_character("c1", "Alice");
    host.select_character(Some("c1"));
    host.set_messages(vec![
        ChatMessage::system("A new chat begins"),
        ChatMessage::character("Alice", greeting),
    ]);
    host
}

#[tokio::test]
async fn test_outfit_lifecycle_on_disk() {
    let dir = unique_data_dir();
    let storage: Arc<dyn StorageAdapter> = Arc::new(JsonFileStorage::in_data_dir(&dir));
    let tracker =
        OutfitTracker::start(config_for(&dir), storage.clone(), host("Hello, traveler!")).await;

    let instance_id = tracker.on_message_received().await.unwrap();
    tracker.bot().set_slot("neck-accessory", "Red Scarf").unwrap();
    tracker.bot().set_slot("footwear", "Boots").unwrap();

    let outfit = tracker.bot().current_outfit().unwrap();
    assert_eq!(outfit.len(), tracker.config().bot_slots.len());
    assert_eq!(outfit.get("footwear"), Some("Boots"));

    // Changing clothes keeps the conversation id.
    assert_eq!(tracker.on_message_received().await.unwrap(), instance_id);

    tracker.bot().save_preset("winter").unwrap();
    assert_eq!(tracker.bot().list_presets().unwrap(), vec!["winter"]);
    assert!(tracker.bot().save_preset("DEFAULT").is_err());

    assert_eq!(
        tracker.substitute("{{char_footwear}} / {{Alice_neck-accessory}} / {{user_footwear}}"),
        "Boots / Red Scarf / {{user_footwear}}"
    );

    tracker.store().wipe_all_outfit_data();
    assert!(!tracker
        .bot()
        .current_outfit()
        .unwrap()
        .has_any_equipped());
    assert!(tracker.bot().list_presets().unwrap().is_empty());
    tracker.shutdown().await;

    let saved = storage.load().await.unwrap().unwrap();
    assert_eq!(saved["version"], CURRENT_VERSION);
    assert_eq!(saved["botInstances"], json!({}));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_legacy_document_is_migrated_and_adopted() {
    let dir = unique_data_dir();
    let normalized = "*Alice adjusts her .* Hello!";
    let legacy_id = legacy_instance_id(normalized);
    let legacy_key = format!("c1_{legacy_id}");

    let legacy_doc = json!({
        "botInstances": {
            "c1": { legacy_id.clone(): { "bot": { "neck-accessory": "Red Scarf" }, "user": {} } }
        },
        "userInstances": { legacy_id.clone(): { "topwear": "Hoodie" } },
        "presets": {
            "bot": { legacy_key.clone(): { "default": { "neck-accessory": "Red Scarf" } } },
            "user": {
                "default": { "default": { "topwear": "Hoodie" } },
                legacy_id.clone(): { "comfy": { "topwear": "Hoodie" } }
            }
        },
        "settings": { "autoOpenBot": true, "someHostFlag": 7 },
        "version": "1.4.2"
    });
    let storage = Arc::new(JsonFileStorage::in_data_dir(&dir));
    storage.save(&legacy_doc).await.unwrap();

    let tracker =
        OutfitTracker::start(config_for(&dir), storage.clone(), host(SCARF_GREETING)).await;
    let settings = tracker.store().settings();
    assert_eq!(
        settings.default_bot_presets.get(&legacy_key).map(String::as_str),
        Some("default")
    );
    assert_eq!(
        settings.default_user_presets.get("default").map(String::as_str),
        Some("default")
    );

    let instance_id = tracker.on_message_received().await.unwrap();
    assert_eq!(
        instance_id,
        instance_id_for(&tracker.instances().normalize(SCARF_GREETING, Some("c1")))
    );
    assert!(tracker.store().bot_record("c1", &legacy_id).is_none());
    assert_eq!(
        tracker.bot().current_outfit().unwrap().get("neck-accessory"),
        Some("Red Scarf")
    );
    assert_eq!(
        tracker.store().bot_default_preset_name("c1", &instance_id).as_deref(),
        Some("default")
    );
    assert!(tracker.store().user_record(Some(&legacy_id)).is_none());
    assert_eq!(
        tracker.user().current_outfit().unwrap().get("topwear"),
        Some("Hoodie")
    );
    assert_eq!(tracker.user().list_presets().unwrap(), vec!["comfy"]);
    tracker.shutdown().await;

    let saved = storage.load().await.unwrap().unwrap();
    assert_eq!(saved["version"], CURRENT_VERSION);
    assert_eq!(saved["settings"]["someHostFlag"], 7);
    assert_eq!(saved["userInstances"][instance_id.as_str()]["topwear"], "Hoodie");
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_item_named_in_greeting_survives_being_worn() {
    let dir = unique_data_dir();
    let storage: Arc<dyn StorageAdapter> = Arc::new(JsonFileStorage::in_data_dir(&dir));
    let greeting = "Alice tips her Cap and smiles.";
    let tracker = OutfitTracker::start(config_for(&dir), storage.clone(), host(greeting)).await;

    tracker.on_message_received().await.unwrap();
    tracker.bot().set_slot("headwear", "Cap").unwrap();
    let instance_id = tracker.on_message_received().await.unwrap();
    assert_eq!(
        tracker.bot().current_outfit().unwrap().get("headwear"),
        Some("Cap")
    );
    assert_eq!(tracker.substitute("{{char_headwear}}"), "Cap");
    tracker.shutdown().await;

    // A later session derives the same id and finds the outfit.
    let tracker = OutfitTracker::start(config_for(&dir), storage, host(greeting)).await;
    assert_eq!(tracker.on_message_received().await.unwrap(), instance_id);
    assert_eq!(
        tracker.bot().current_outfit().unwrap().get("headwear"),
        Some("Cap")
    );
    tracker.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_reset_applies_embedded_default_outfit() {
    let dir = unique_data_dir();
    let storage = Arc::new(JsonFileStorage::in_data_dir(&dir));
    let tracker = OutfitTracker::start(config_for(&dir), storage, host(SCARF_GREETING)).await;
    tracker.on_message_received().await.unwrap();

    let outfit = [("headwear", "Sun Hat"), ("footwear", "Sandals")]
        .into_iter()
        .collect();
    tracker.defaults().set_default_outfit(&outfit).await.unwrap();
    tracker.user().set_slot("topwear", "Raincoat").unwrap();
    tracker.user().save_preset("rainy").unwrap();
    tracker
        .defaults()
        .set_default_preset(OutfitOwner::User, "rainy")
        .await
        .unwrap();
    tracker.user().set_slot("topwear", "none").unwrap();

    tracker.on_chat_reset().await.unwrap();
    assert_eq!(
        tracker.substitute("{{char_headwear}}, {{char_footwear}}, {{user_topwear}}"),
        "Sun Hat, Sandals, Raincoat"
    );
    let prompt = tracker.resolver().prompt_injection_text();
    assert!(prompt.contains("**Alice's Current Outfit**"));
    assert!(prompt.contains("- Topwear: Raincoat"));
    tracker.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}
