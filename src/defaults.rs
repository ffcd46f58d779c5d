//! Default outfits applied when a conversation starts over.
//!
//! Bot defaults live in two places. The character's own extension blob holds
//! `outfit_tracker.default_outfits[instanceId]` and travels with the character
//! card; the settings map `defaultBotPresets` is the older tier. The embedded
//! entry wins when both exist. User defaults only have the settings tier.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use wardrobe_core::error::WardrobeError;
use wardrobe_core::slots::Outfit;
use wardrobe_core::InstanceId;
use wardrobe_storage::migration::LEGACY_DEFAULT_PRESET_NAME;

use crate::events::{OutfitEvent, OutfitOwner};
use crate::host::HostContext;
use crate::manager::{BotOutfitManager, OutfitManager, UserOutfitManager};

const EXTENSION_KEY: &str = "outfit_tracker";
const DEFAULT_OUTFITS_KEY: &str = "default_outfits";

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultPointer {
    Preset(String),
    Outfit(Outfit),
}

/// Reads the embedded entry for `instance_id`; blank or malformed entries count as absent.
pub fn embedded_pointer(extensions: &Value, instance_id: &str) -> Option<DefaultPointer> {
    let entry = extensions
        .get(EXTENSION_KEY)?
        .get(DEFAULT_OUTFITS_KEY)?
        .get(instance_id)?;
    if let Some(name) = entry.get("preset").and_then(Value::as_str) {
        let name = name.trim();
        if !name.is_empty() {
            return Some(DefaultPointer::Preset(name.to_string()));
        }
    }
    if let Some(raw) = entry.get("outfit").filter(|v| v.is_object()) {
        return match serde_json::from_value::<Outfit>(raw.clone()) {
            Ok(outfit) if outfit.has_any_equipped() => Some(DefaultPointer::Outfit(outfit)),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring malformed embedded default outfit for {instance_id}: {e}");
                None
            }
        };
    }
    None
}

/// Returns `extensions` with the entry for `instance_id` replaced, or removed when `entry` is `None`.
pub fn with_embedded_entry(extensions: Value, instance_id: &str, entry: Option<Value>) -> Value {
    let mut root = match extensions {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let tracker = root
        .entry(EXTENSION_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if !tracker.is_object() {
        *tracker = Value::Object(Map::new());
    }
    if let Value::Object(tracker) = tracker {
        let defaults = tracker
            .entry(DEFAULT_OUTFITS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !defaults.is_object() {
            *defaults = Value::Object(Map::new());
        }
        if let Value::Object(defaults) = defaults {
            match entry {
                Some(entry) => {
                    defaults.insert(instance_id.to_string(), entry);
                }
                None => {
                    defaults.remove(instance_id);
                }
            }
        }
    }
    Value::Object(root)
}

pub struct DefaultOutfits {
    host: Arc<dyn HostContext>,
    bot: Arc<BotOutfitManager>,
    user: Arc<UserOutfitManager>,
}

impl DefaultOutfits {
    pub fn new(
        host: Arc<dyn HostContext>,
        bot: Arc<BotOutfitManager>,
        user: Arc<UserOutfitManager>,
    ) -> Self {
        DefaultOutfits { host, bot, user }
    }

    fn manager(&self, owner: OutfitOwner) -> &dyn OutfitManager {
        match owner {
            OutfitOwner::Bot => self.bot.as_ref(),
            OutfitOwner::User => self.user.as_ref(),
        }
    }

    fn embedded_for_current(&self) -> Result<Option<DefaultPointer>, WardrobeError> {
        let (character_id, instance_id) = self.bot.target()?;
        Ok(self
            .host
            .character(&character_id)
            .and_then(|c| embedded_pointer(&c.extensions, &instance_id)))
    }

    /// Writes the embedded entry for the current bot target. A host that
    /// cannot store it is logged and otherwise ignored.
    async fn write_embedded(&self, entry: Option<Value>) -> Result<bool, WardrobeError> {
        let (character_id, instance_id) = self.bot.target()?;
        let Some(character) = self.host.character(&character_id) else {
            warn!("Character {character_id} unknown to host, skipping embedded default");
            return Ok(false);
        };
        let extensions = with_embedded_entry(character.extensions, &instance_id, entry);
        match self
            .host
            .write_character_extensions(&character_id, extensions)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Failed to write embedded default for {character_id}: {e}");
                Ok(false)
            }
        }
    }

    pub fn default_pointer(
        &self,
        owner: OutfitOwner,
    ) -> Result<Option<DefaultPointer>, WardrobeError> {
        if owner == OutfitOwner::Bot {
            if let Some(pointer) = self.embedded_for_current()? {
                return Ok(Some(pointer));
            }
        }
        Ok(self
            .manager(owner)
            .legacy_default()?
            .map(DefaultPointer::Preset))
    }

    pub async fn set_default_preset(
        &self,
        owner: OutfitOwner,
        name: &str,
    ) -> Result<String, WardrobeError> {
        let manager = self.manager(owner);
        let name = name.trim();
        if manager.find_preset(name)?.is_none() {
            return Err(WardrobeError::PresetNotFound(name.to_string()));
        }
        if owner == OutfitOwner::Bot {
            self.write_embedded(Some(serde_json::json!({ "preset": name })))
                .await?;
        }
        manager.set_legacy_default(Some(name))?;
        manager.store().events().publish(OutfitEvent::DefaultOutfitSet {
            owner,
            key: manager.preset_key()?,
            preset: Some(name.to_string()),
        });
        info!("Default {} outfit set to preset '{name}'", owner.as_str());
        Ok(format!("Default outfit set to '{name}'."))
    }

    /// Stores a literal outfit as the bot default. Only the embedded tier can hold one.
    pub async fn set_default_outfit(&self, outfit: &Outfit) -> Result<String, WardrobeError> {
        let entry = serde_json::json!({ "outfit": outfit });
        if !self.write_embedded(Some(entry)).await? {
            return Err(WardrobeError::Host(
                "character record could not store the default outfit".into(),
            ));
        }
        self.bot.store().events().publish(OutfitEvent::DefaultOutfitSet {
            owner: OutfitOwner::Bot,
            key: self.bot.preset_key()?,
            preset: None,
        });
        Ok(format!(
            "Default outfit for {} saved.",
            self.bot.wearer_name()
        ))
    }

    pub async fn clear_default(&self, owner: OutfitOwner) -> Result<String, WardrobeError> {
        let manager = self.manager(owner);
        if owner == OutfitOwner::Bot && self.embedded_for_current()?.is_some() {
            self.write_embedded(None).await?;
        }
        manager.set_legacy_default(None)?;
        manager
            .store()
            .events()
            .publish(OutfitEvent::DefaultOutfitCleared {
                owner,
                key: manager.preset_key()?,
            });
        Ok("Default outfit cleared.".to_string())
    }

    /// Applies the current default; `false` when none is set or its preset is gone.
    pub async fn apply_default(&self, owner: OutfitOwner) -> Result<bool, WardrobeError> {
        let manager = self.manager(owner);
        let Some(pointer) = self.default_pointer(owner)? else {
            debug!("No default {} outfit to apply", owner.as_str());
            return Ok(false);
        };
        let (name, outfit) = match pointer {
            DefaultPointer::Preset(name) => match manager.find_preset(&name)? {
                Some(outfit) => (name, outfit),
                None => {
                    warn!(
                        "Default {} preset '{name}' no longer exists",
                        owner.as_str()
                    );
                    return Ok(false);
                }
            },
            DefaultPointer::Outfit(outfit) => (LEGACY_DEFAULT_PRESET_NAME.to_string(), outfit),
        };
        manager.write_outfit(&outfit)?;
        manager.store().events().publish(OutfitEvent::PresetLoaded {
            owner,
            key: manager.preset_key()?,
            name,
        });
        Ok(true)
    }

    /// Instance ids of the current character that carry an embedded default.
    pub fn embedded_instances(&self) -> Vec<InstanceId> {
        let Some(character_id) = self.bot.store().current_character_id() else {
            return Vec::new();
        };
        self.host
            .character(&character_id)
            .and_then(|c| {
                c.extensions
                    .get(EXTENSION_KEY)
                    .and_then(|t| t.get(DEFAULT_OUTFITS_KEY))
                    .and_then(Value::as_object)
                    .map(|m| m.keys().cloned().collect())
            })
            .unwrap_or_default()
    }
}
