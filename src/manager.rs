use std::sync::Arc;

use tracing::info;

use wardrobe_core::error::WardrobeError;
use wardrobe_core::slots::{normalize_slot_value, Outfit};
use wardrobe_core::{CharacterId, InstanceId};
use wardrobe_storage::document::{bot_preset_key, user_preset_key, PresetGroup};

use crate::events::{OutfitEvent, OutfitOwner};
use crate::host::HostContext;
use crate::store::{validate_preset_name, ManagerKind, OutfitStore, PresetWrite};

/// Slot writes and preset handling for one wearer of the current conversation.
///
/// Implementors supply storage access for their wearer; the provided methods
/// carry the shared validation and the user-facing messages.
pub trait OutfitManager: Send + Sync {
    fn owner(&self) -> OutfitOwner;

    fn store(&self) -> &OutfitStore;

    fn slots(&self) -> &[String];

    /// Display name used in messages.
    fn wearer_name(&self) -> String;

    /// Key of this wearer's preset group for the current conversation.
    fn preset_key(&self) -> Result<String, WardrobeError>;

    fn read_outfit(&self) -> Result<Outfit, WardrobeError>;

    fn write_outfit(&self, outfit: &Outfit) -> Result<(), WardrobeError>;

    fn store_preset(&self, name: &str, outfit: &Outfit) -> Result<PresetWrite, WardrobeError>;

    fn find_preset(&self, name: &str) -> Result<Option<Outfit>, WardrobeError>;

    fn remove_preset(&self, name: &str) -> Result<bool, WardrobeError>;

    fn presets(&self) -> Result<PresetGroup, WardrobeError>;

    fn legacy_default(&self) -> Result<Option<String>, WardrobeError>;

    fn set_legacy_default(&self, name: Option<&str>) -> Result<(), WardrobeError>;

    fn prompt_injection_enabled(&self) -> Result<bool, WardrobeError>;

    fn write_prompt_injection(&self, enabled: bool) -> Result<(), WardrobeError>;

    fn current_outfit(&self) -> Result<Outfit, WardrobeError> {
        self.read_outfit()
    }

    fn set_slot(&self, slot: &str, value: &str) -> Result<String, WardrobeError> {
        let slot = slot.trim();
        if !self.slots().iter().any(|s| s == slot) {
            return Err(WardrobeError::UnknownSlot(slot.to_string()));
        }
        let mut outfit = self.read_outfit()?;
        let new_value = normalize_slot_value(value);
        let old_value = outfit.set(slot, new_value.as_deref());
        let name = self.wearer_name();
        let message = match (old_value.as_deref(), new_value.as_deref()) {
            (None, None) => return Ok(format!("{name} has nothing on {slot}.")),
            (Some(old), Some(new)) if old == new => {
                return Ok(format!("{name} is already wearing {new}."));
            }
            (None, Some(new)) => format!("{name} put on {new}."),
            (Some(old), None) => format!("{name} removed {old}."),
            (Some(old), Some(new)) => format!("{name} changed from {old} to {new}."),
        };
        self.write_outfit(&outfit)?;
        Ok(message)
    }

    /// Replaces every slot at once; slots missing from `outfit` are unequipped.
    fn change_outfit(&self, outfit: &Outfit) -> Result<String, WardrobeError> {
        if let Some((slot, _)) = outfit
            .iter()
            .find(|(slot, _)| !self.slots().iter().any(|s| s == slot))
        {
            return Err(WardrobeError::UnknownSlot(slot.to_string()));
        }
        self.write_outfit(outfit)?;
        Ok(format!("{} changed outfit.", self.wearer_name()))
    }

    fn save_preset(&self, name: &str) -> Result<String, WardrobeError> {
        let name = validate_preset_name(name)?;
        if self.find_preset(&name)?.is_some() {
            return Err(WardrobeError::invalid(format!(
                "preset '{name}' already exists, overwrite it instead"
            )));
        }
        let outfit = self.read_outfit()?;
        self.store_preset(&name, &outfit)?;
        info!("Saved {} preset '{name}'", self.owner().as_str());
        Ok(format!("Saved preset '{name}'."))
    }

    fn overwrite_preset(&self, name: &str) -> Result<String, WardrobeError> {
        let name = validate_preset_name(name)?;
        if self.find_preset(&name)?.is_none() {
            return Err(WardrobeError::PresetNotFound(name));
        }
        let outfit = self.read_outfit()?;
        self.store_preset(&name, &outfit)?;
        Ok(format!("Overwrote preset '{name}'."))
    }

    fn load_preset(&self, name: &str) -> Result<String, WardrobeError> {
        let name = name.trim();
        let preset = self
            .find_preset(name)?
            .ok_or_else(|| WardrobeError::PresetNotFound(name.to_string()))?;
        self.write_outfit(&preset)?;
        self.store().events().publish(OutfitEvent::PresetLoaded {
            owner: self.owner(),
            key: self.preset_key()?,
            name: name.to_string(),
        });
        Ok(format!("{} changed into the '{name}' outfit.", self.wearer_name()))
    }

    /// Deletes a preset and any legacy default pointer naming it.
    fn delete_preset(&self, name: &str) -> Result<String, WardrobeError> {
        let name = name.trim();
        if !self.remove_preset(name)? {
            return Err(WardrobeError::PresetNotFound(name.to_string()));
        }
        if self.legacy_default()?.as_deref() == Some(name) {
            self.set_legacy_default(None)?;
        }
        Ok(format!("Deleted preset '{name}'."))
    }

    fn list_presets(&self) -> Result<Vec<String>, WardrobeError> {
        Ok(self.presets()?.into_keys().collect())
    }

    fn set_prompt_injection(&self, enabled: bool) -> Result<String, WardrobeError> {
        self.write_prompt_injection(enabled)?;
        let state = if enabled { "enabled" } else { "disabled" };
        Ok(format!(
            "Outfit prompt injection {state} for {}.",
            self.wearer_name()
        ))
    }
}

pub struct BotOutfitManager {
    store: OutfitStore,
    host: Arc<dyn HostContext>,
}

impl BotOutfitManager {
    pub fn new(store: OutfitStore, host: Arc<dyn HostContext>) -> Self {
        store.attach_manager(ManagerKind::Bot);
        BotOutfitManager { store, host }
    }

    /// Current character and instance; both are required for bot writes.
    pub fn target(&self) -> Result<(CharacterId, InstanceId), WardrobeError> {
        let character_id = self
            .store
            .current_character_id()
            .ok_or_else(|| WardrobeError::NotReady("no character selected".into()))?;
        let instance_id = self
            .store
            .current_instance_id()
            .ok_or_else(|| WardrobeError::NotReady("no conversation instance".into()))?;
        Ok((character_id, instance_id))
    }
}

impl OutfitManager for BotOutfitManager {
    fn owner(&self) -> OutfitOwner {
        OutfitOwner::Bot
    }

    fn store(&self) -> &OutfitStore {
        &self.store
    }

    fn slots(&self) -> &[String] {
        self.store.bot_slots()
    }

    fn wearer_name(&self) -> String {
        self.store
            .current_character_id()
            .map(|id| self.host.character(&id).map(|c| c.name).unwrap_or(id))
            .unwrap_or_else(|| "Character".to_string())
    }

    fn preset_key(&self) -> Result<String, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        bot_preset_key(&character_id, &instance_id)
    }

    fn read_outfit(&self) -> Result<Outfit, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        Ok(self.store.bot_outfit(&character_id, &instance_id))
    }

    fn write_outfit(&self, outfit: &Outfit) -> Result<(), WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        self.store.set_bot_outfit(&character_id, &instance_id, outfit)
    }

    fn store_preset(&self, name: &str, outfit: &Outfit) -> Result<PresetWrite, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        self.store
            .save_bot_preset(&character_id, &instance_id, name, outfit)
    }

    fn find_preset(&self, name: &str) -> Result<Option<Outfit>, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        Ok(self.store.bot_preset(&character_id, &instance_id, name))
    }

    fn remove_preset(&self, name: &str) -> Result<bool, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        self.store
            .delete_bot_preset(&character_id, &instance_id, name)
    }

    fn presets(&self) -> Result<PresetGroup, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        Ok(self.store.bot_presets(&character_id, &instance_id))
    }

    fn legacy_default(&self) -> Result<Option<String>, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        Ok(self
            .store
            .bot_default_preset_name(&character_id, &instance_id))
    }

    fn set_legacy_default(&self, name: Option<&str>) -> Result<(), WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        self.store
            .set_bot_default_preset_name(&character_id, &instance_id, name)
    }

    fn prompt_injection_enabled(&self) -> Result<bool, WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        Ok(self
            .store
            .bot_prompt_injection_enabled(&character_id, &instance_id))
    }

    fn write_prompt_injection(&self, enabled: bool) -> Result<(), WardrobeError> {
        let (character_id, instance_id) = self.target()?;
        self.store
            .set_bot_prompt_injection(&character_id, &instance_id, enabled)
    }
}

/// The user persona's outfit. Without a known instance it falls back to the
/// shared `default` record.
pub struct UserOutfitManager {
    store: OutfitStore,
}

impl UserOutfitManager {
    pub fn new(store: OutfitStore) -> Self {
        store.attach_manager(ManagerKind::User);
        UserOutfitManager { store }
    }

    fn instance(&self) -> Option<InstanceId> {
        self.store.current_instance_id()
    }
}

impl OutfitManager for UserOutfitManager {
    fn owner(&self) -> OutfitOwner {
        OutfitOwner::User
    }

    fn store(&self) -> &OutfitStore {
        &self.store
    }

    fn slots(&self) -> &[String] {
        self.store.user_slots()
    }

    fn wearer_name(&self) -> String {
        "You".to_string()
    }

    fn preset_key(&self) -> Result<String, WardrobeError> {
        Ok(user_preset_key(self.instance().as_deref()))
    }

    fn read_outfit(&self) -> Result<Outfit, WardrobeError> {
        Ok(self.store.user_outfit(self.instance().as_deref()))
    }

    fn write_outfit(&self, outfit: &Outfit) -> Result<(), WardrobeError> {
        self.store.set_user_outfit(self.instance().as_deref(), outfit);
        Ok(())
    }

    fn store_preset(&self, name: &str, outfit: &Outfit) -> Result<PresetWrite, WardrobeError> {
        self.store
            .save_user_preset(self.instance().as_deref(), name, outfit)
    }

    fn find_preset(&self, name: &str) -> Result<Option<Outfit>, WardrobeError> {
        Ok(self.store.user_preset(self.instance().as_deref(), name))
    }

    fn remove_preset(&self, name: &str) -> Result<bool, WardrobeError> {
        Ok(self
            .store
            .delete_user_preset(self.instance().as_deref(), name))
    }

    fn presets(&self) -> Result<PresetGroup, WardrobeError> {
        Ok(self.store.user_presets(self.instance().as_deref()))
    }

    fn legacy_default(&self) -> Result<Option<String>, WardrobeError> {
        Ok(self
            .store
            .user_default_preset_name(self.instance().as_deref()))
    }

    fn set_legacy_default(&self, name: Option<&str>) -> Result<(), WardrobeError> {
        self.store
            .set_user_default_preset_name(self.instance().as_deref(), name);
        Ok(())
    }

    fn prompt_injection_enabled(&self) -> Result<bool, WardrobeError> {
        Ok(self
            .store
            .user_prompt_injection_enabled(self.instance().as_deref()))
    }

    fn write_prompt_injection(&self, enabled: bool) -> Result<(), WardrobeError> {
        self.store
            .set_user_prompt_injection(self.instance().as_deref(), enabled);
        Ok(())
    }
}
