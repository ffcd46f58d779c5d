use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use wardrobe_core::error::WardrobeError;
use wardrobe_core::slots::Outfit;
use wardrobe_core::{CharacterId, InstanceId};
use wardrobe_storage::document::{
    bot_preset_key, split_bot_preset_key, user_preset_key, BotInstanceRecord, PersistedDocument,
    PresetBook, PresetGroup, Settings, UserInstanceRecord,
};
use wardrobe_storage::migration::{CURRENT_VERSION, LEGACY_DEFAULT_PRESET_NAME};

use crate::events::{EventBus, OutfitEvent, OutfitOwner};

pub type ListenerId = u64;
pub type StoreListener = Arc<dyn Fn(&OutfitState) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    Bot,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetWrite {
    Created,
    Overwritten,
}

/// Everything the tracker holds in memory. Values handed out are deep copies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutfitState {
    pub bot_instances: BTreeMap<CharacterId, BTreeMap<InstanceId, BotInstanceRecord>>,
    pub user_instances: BTreeMap<InstanceId, UserInstanceRecord>,
    pub presets: PresetBook,
    pub settings: Settings,
    pub current_character_id: Option<CharacterId>,
    pub current_instance_id: Option<InstanceId>,
    pub bot_manager_attached: bool,
    pub user_manager_attached: bool,
}

struct StoreInner {
    state: Mutex<OutfitState>,
    listeners: Mutex<Vec<(ListenerId, StoreListener)>>,
    next_listener_id: AtomicU64,
    events: EventBus,
    bot_slots: Vec<String>,
    user_slots: Vec<String>,
}

/// Shared handle to the outfit state. Cloning is cheap and every clone sees
/// the same state.
#[derive(Clone)]
pub struct OutfitStore {
    inner: Arc<StoreInner>,
}

/// Rejects blank names and the reserved name `default`.
pub fn validate_preset_name(name: &str) -> Result<String, WardrobeError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WardrobeError::invalid("preset name is required"));
    }
    if name.eq_ignore_ascii_case(LEGACY_DEFAULT_PRESET_NAME) {
        return Err(WardrobeError::ReservedPresetName(name.to_string()));
    }
    Ok(name.to_string())
}

fn require_id(value: &str, what: &str) -> Result<(), WardrobeError> {
    if value.trim().is_empty() {
        return Err(WardrobeError::invalid(format!("{what} is required")));
    }
    Ok(())
}

impl OutfitStore {
    pub fn new(bot_slots: Vec<String>, user_slots: Vec<String>, events: EventBus) -> Self {
        OutfitStore {
            inner: Arc::new(StoreInner {
                state: Mutex::new(OutfitState::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                events,
                bot_slots,
                user_slots,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OutfitState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, StoreListener)>> {
        match self.inner.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn bot_slots(&self) -> &[String] {
        &self.inner.bot_slots
    }

    pub fn user_slots(&self) -> &[String] {
        &self.inner.user_slots
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    fn emit(&self, event: OutfitEvent) {
        self.inner.events.publish(event);
    }

    // ---- listeners ----

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&OutfitState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Runs every listener against a fresh copy of the state. No lock is held
    /// while listeners run, so they may mutate the store themselves.
    fn notify(&self) {
        let listeners: Vec<(ListenerId, StoreListener)> = self.lock_listeners().clone();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Outfit store listener {id} failed: {e}"),
                Err(_) => warn!("Outfit store listener {id} panicked"),
            }
        }
    }

    pub fn snapshot(&self) -> OutfitState {
        self.lock_state().clone()
    }

    // ---- manager attachment ----

    pub fn attach_manager(&self, kind: ManagerKind) {
        let mut state = self.lock_state();
        match kind {
            ManagerKind::Bot => state.bot_manager_attached = true,
            ManagerKind::User => state.user_manager_attached = true,
        }
    }

    pub fn managers_attached(&self) -> bool {
        let state = self.lock_state();
        state.bot_manager_attached && state.user_manager_attached
    }

    // ---- current character / instance ----

    pub fn current_character_id(&self) -> Option<CharacterId> {
        self.lock_state().current_character_id.clone()
    }

    pub fn set_current_character_id(&self, id: Option<&str>) -> bool {
        let changed = {
            let mut state = self.lock_state();
            let next = id.map(str::to_string);
            if state.current_character_id == next {
                false
            } else {
                state.current_character_id = next;
                true
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    pub fn current_instance_id(&self) -> Option<InstanceId> {
        self.lock_state().current_instance_id.clone()
    }

    /// Re-setting the current id is a no-op and does not notify.
    pub fn set_current_instance_id(&self, id: Option<&str>) -> bool {
        let changed = {
            let mut state = self.lock_state();
            let next = id.map(str::to_string);
            if state.current_instance_id == next {
                false
            } else {
                debug!(
                    "Current outfit instance {:?} -> {:?}",
                    state.current_instance_id, next
                );
                state.current_instance_id = next;
                true
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    // ---- bot instances ----

    pub fn bot_record(&self, character_id: &str, instance_id: &str) -> Option<BotInstanceRecord> {
        self.lock_state()
            .bot_instances
            .get(character_id)
            .and_then(|m| m.get(instance_id))
            .cloned()
    }

    /// Bot outfit with an entry for every bot slot; empty when no record exists.
    pub fn bot_outfit(&self, character_id: &str, instance_id: &str) -> Outfit {
        self.bot_record(character_id, instance_id)
            .map(|r| r.bot.reconciled(&self.inner.bot_slots))
            .unwrap_or_default()
    }

    pub fn bot_instance_ids(&self, character_id: &str) -> Vec<InstanceId> {
        self.lock_state()
            .bot_instances
            .get(character_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_bot_outfit(
        &self,
        character_id: &str,
        instance_id: &str,
        outfit: &Outfit,
    ) -> Result<(), WardrobeError> {
        require_id(character_id, "characterId")?;
        require_id(instance_id, "instanceId")?;
        let reconciled = outfit.reconciled(&self.inner.bot_slots);
        let created = {
            let mut state = self.lock_state();
            let instances = state
                .bot_instances
                .entry(character_id.to_string())
                .or_default();
            let created = !instances.contains_key(instance_id);
            let record = instances.entry(instance_id.to_string()).or_default();
            record.bot = reconciled.clone();
            created
        };

        if created {
            self.emit(OutfitEvent::InstanceCreated {
                owner: OutfitOwner::Bot,
                character_id: Some(character_id.to_string()),
                instance_id: instance_id.to_string(),
            });
        }
        self.emit(OutfitEvent::OutfitChanged {
            owner: OutfitOwner::Bot,
            character_id: Some(character_id.to_string()),
            instance_id: instance_id.to_string(),
            outfit: reconciled,
        });
        self.notify();
        Ok(())
    }

    pub fn delete_bot_instance(&self, character_id: &str, instance_id: &str) -> bool {
        let removed = {
            let mut state = self.lock_state();
            let Some(instances) = state.bot_instances.get_mut(character_id) else {
                return false;
            };
            let removed = instances.remove(instance_id).is_some();
            if instances.is_empty() {
                state.bot_instances.remove(character_id);
            }
            removed
        };
        if removed {
            self.emit(OutfitEvent::InstanceDeleted {
                owner: OutfitOwner::Bot,
                character_id: Some(character_id.to_string()),
                instance_id: instance_id.to_string(),
            });
            self.notify();
        }
        removed
    }

    /// Drops every bot instance of `character_id` not listed in `valid_ids`.
    pub fn cleanup_unused_instances(&self, character_id: &str, valid_ids: &[InstanceId]) -> usize {
        let valid: BTreeSet<&str> = valid_ids.iter().map(String::as_str).collect();
        let removed: Vec<InstanceId> = {
            let mut state = self.lock_state();
            let Some(instances) = state.bot_instances.get_mut(character_id) else {
                return 0;
            };
            let stale: Vec<InstanceId> = instances
                .keys()
                .filter(|id| !valid.contains(id.as_str()))
                .cloned()
                .collect();
            for id in &stale {
                instances.remove(id);
            }
            if instances.is_empty() {
                state.bot_instances.remove(character_id);
            }
            stale
        };
        if removed.is_empty() {
            return 0;
        }
        for instance_id in &removed {
            self.emit(OutfitEvent::InstanceDeleted {
                owner: OutfitOwner::Bot,
                character_id: Some(character_id.to_string()),
                instance_id: instance_id.clone(),
            });
        }
        debug!(
            "Removed {} unused outfit instances for character {character_id}",
            removed.len()
        );
        self.notify();
        removed.len()
    }

    /// Re-keys everything stored under instance `from` to `to`: the bot record
    /// of `character_id` with its preset group and default pointer, and the
    /// user record with its preset group and default pointer. Parts that
    /// already exist under `to` are left alone.
    pub fn adopt_instance(&self, character_id: &str, from: &str, to: &str) -> bool {
        if from == to || from.trim().is_empty() || to.trim().is_empty() {
            return false;
        }
        let adopted = {
            let mut state = self.lock_state();
            let state = &mut *state;
            let mut moved = false;

            if let Some(instances) = state.bot_instances.get_mut(character_id) {
                if !instances.contains_key(to) {
                    if let Some(record) = instances.remove(from) {
                        instances.insert(to.to_string(), record);
                        moved = true;
                    }
                }
            }
            let from_key = format!("{character_id}_{from}");
            let to_key = format!("{character_id}_{to}");
            moved |= move_entry(&mut state.presets.bot, &from_key, &to_key);
            moved |= move_entry(&mut state.settings.default_bot_presets, &from_key, &to_key);

            moved |= move_entry(&mut state.user_instances, from, to);
            moved |= move_entry(&mut state.presets.user, from, to);
            moved |= move_entry(&mut state.settings.default_user_presets, from, to);
            moved
        };
        if adopted {
            self.emit(OutfitEvent::InstanceAdopted {
                character_id: character_id.to_string(),
                previous_instance_id: from.to_string(),
                instance_id: to.to_string(),
            });
            self.notify();
        }
        adopted
    }

    /// Whether anything is stored under `instance_id` for this character or the user.
    pub fn has_instance_data(&self, character_id: &str, instance_id: &str) -> bool {
        let state = self.lock_state();
        let bot_key = format!("{character_id}_{instance_id}");
        state
            .bot_instances
            .get(character_id)
            .is_some_and(|m| m.contains_key(instance_id))
            || state.presets.bot.contains_key(&bot_key)
            || state.user_instances.contains_key(instance_id)
            || state.presets.user.contains_key(instance_id)
    }

    // ---- user instances ----

    pub fn user_record(&self, instance_id: Option<&str>) -> Option<UserInstanceRecord> {
        let key = user_preset_key(instance_id);
        self.lock_state().user_instances.get(&key).cloned()
    }

    pub fn user_outfit(&self, instance_id: Option<&str>) -> Outfit {
        self.user_record(instance_id)
            .map(|r| r.outfit.reconciled(&self.inner.user_slots))
            .unwrap_or_default()
    }

    pub fn set_user_outfit(&self, instance_id: Option<&str>, outfit: &Outfit) {
        let key = user_preset_key(instance_id);
        let reconciled = outfit.reconciled(&self.inner.user_slots);
        let created = {
            let mut state = self.lock_state();
            let created = !state.user_instances.contains_key(&key);
            let record = state.user_instances.entry(key.clone()).or_default();
            record.outfit = reconciled.clone();
            created
        };
        if created {
            self.emit(OutfitEvent::InstanceCreated {
                owner: OutfitOwner::User,
                character_id: None,
                instance_id: key.clone(),
            });
        }
        self.emit(OutfitEvent::OutfitChanged {
            owner: OutfitOwner::User,
            character_id: None,
            instance_id: key,
            outfit: reconciled,
        });
        self.notify();
    }

    pub fn delete_user_instance(&self, instance_id: Option<&str>) -> bool {
        let key = user_preset_key(instance_id);
        let removed = self.lock_state().user_instances.remove(&key).is_some();
        if removed {
            self.emit(OutfitEvent::InstanceDeleted {
                owner: OutfitOwner::User,
                character_id: None,
                instance_id: key,
            });
            self.notify();
        }
        removed
    }

    // ---- prompt injection ----

    pub fn bot_prompt_injection_enabled(&self, character_id: &str, instance_id: &str) -> bool {
        let state = self.lock_state();
        state
            .bot_instances
            .get(character_id)
            .and_then(|m| m.get(instance_id))
            .and_then(|r| r.prompt_injection_enabled)
            .unwrap_or(state.settings.prompt_injection_enabled)
    }

    pub fn set_bot_prompt_injection(
        &self,
        character_id: &str,
        instance_id: &str,
        enabled: bool,
    ) -> Result<(), WardrobeError> {
        require_id(character_id, "characterId")?;
        require_id(instance_id, "instanceId")?;
        let created = {
            let mut state = self.lock_state();
            let instances = state
                .bot_instances
                .entry(character_id.to_string())
                .or_default();
            let created = !instances.contains_key(instance_id);
            let record = instances.entry(instance_id.to_string()).or_default();
            if created {
                record.bot = Outfit::new().reconciled(&self.inner.bot_slots);
            }
            record.prompt_injection_enabled = Some(enabled);
            created
        };
        if created {
            self.emit(OutfitEvent::InstanceCreated {
                owner: OutfitOwner::Bot,
                character_id: Some(character_id.to_string()),
                instance_id: instance_id.to_string(),
            });
        }
        self.notify();
        Ok(())
    }

    pub fn user_prompt_injection_enabled(&self, instance_id: Option<&str>) -> bool {
        let key = user_preset_key(instance_id);
        let state = self.lock_state();
        state
            .user_instances
            .get(&key)
            .and_then(|r| r.prompt_injection_enabled)
            .unwrap_or(state.settings.prompt_injection_enabled)
    }

    pub fn set_user_prompt_injection(&self, instance_id: Option<&str>, enabled: bool) {
        let key = user_preset_key(instance_id);
        let created = {
            let mut state = self.lock_state();
            let created = !state.user_instances.contains_key(&key);
            let record = state.user_instances.entry(key.clone()).or_default();
            if created {
                record.outfit = Outfit::new().reconciled(&self.inner.user_slots);
            }
            record.prompt_injection_enabled = Some(enabled);
            created
        };
        if created {
            self.emit(OutfitEvent::InstanceCreated {
                owner: OutfitOwner::User,
                character_id: None,
                instance_id: key,
            });
        }
        self.notify();
    }

    // ---- bot presets ----

    pub fn save_bot_preset(
        &self,
        character_id: &str,
        instance_id: &str,
        name: &str,
        outfit: &Outfit,
    ) -> Result<PresetWrite, WardrobeError> {
        let key = bot_preset_key(character_id, instance_id)?;
        let name = validate_preset_name(name)?;
        let write = {
            let mut state = self.lock_state();
            let group = state.presets.bot.entry(key.clone()).or_default();
            match group.insert(name.clone(), outfit.clone()) {
                Some(_) => PresetWrite::Overwritten,
                None => PresetWrite::Created,
            }
        };
        self.emit(preset_write_event(OutfitOwner::Bot, key, name, write));
        self.notify();
        Ok(write)
    }

    pub fn bot_preset(&self, character_id: &str, instance_id: &str, name: &str) -> Option<Outfit> {
        let key = bot_preset_key(character_id, instance_id).ok()?;
        self.lock_state()
            .presets
            .bot
            .get(&key)
            .and_then(|g| g.get(name.trim()))
            .cloned()
    }

    /// All presets of one bot instance; invalid ids read as empty.
    pub fn bot_presets(&self, character_id: &str, instance_id: &str) -> PresetGroup {
        match bot_preset_key(character_id, instance_id) {
            Ok(key) => self
                .lock_state()
                .presets
                .bot
                .get(&key)
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                warn!("Cannot list bot presets: {e}");
                PresetGroup::new()
            }
        }
    }

    pub fn delete_bot_preset(
        &self,
        character_id: &str,
        instance_id: &str,
        name: &str,
    ) -> Result<bool, WardrobeError> {
        let key = bot_preset_key(character_id, instance_id)?;
        let name = name.trim().to_string();
        let removed = {
            let mut state = self.lock_state();
            let Some(group) = state.presets.bot.get_mut(&key) else {
                return Ok(false);
            };
            let removed = group.remove(&name).is_some();
            if group.is_empty() {
                state.presets.bot.remove(&key);
            }
            removed
        };
        if removed {
            self.emit(OutfitEvent::PresetDeleted {
                owner: OutfitOwner::Bot,
                key,
                name,
            });
            self.notify();
        }
        Ok(removed)
    }

    /// Removes the preset groups of one instance, or of every instance of the
    /// character when `instance_id` is `None`. Returns the number of presets removed.
    pub fn delete_all_bot_presets_for_character(
        &self,
        character_id: &str,
        instance_id: Option<&str>,
    ) -> Result<usize, WardrobeError> {
        require_id(character_id, "characterId")?;
        let removed = {
            let mut state = self.lock_state();
            let keys: Vec<String> = match instance_id {
                Some(instance_id) => vec![bot_preset_key(character_id, instance_id)?],
                None => state
                    .presets
                    .bot
                    .keys()
                    .filter(|k| {
                        split_bot_preset_key(k).map(|(c, _)| c == character_id) == Some(true)
                    })
                    .cloned()
                    .collect(),
            };
            keys.iter()
                .filter_map(|k| state.presets.bot.remove(k))
                .map(|g| g.len())
                .sum::<usize>()
        };
        if removed > 0 {
            self.notify();
        }
        Ok(removed)
    }

    // ---- user presets ----

    pub fn save_user_preset(
        &self,
        instance_id: Option<&str>,
        name: &str,
        outfit: &Outfit,
    ) -> Result<PresetWrite, WardrobeError> {
        let key = user_preset_key(instance_id);
        let name = validate_preset_name(name)?;
        let write = {
            let mut state = self.lock_state();
            let group = state.presets.user.entry(key.clone()).or_default();
            match group.insert(name.clone(), outfit.clone()) {
                Some(_) => PresetWrite::Overwritten,
                None => PresetWrite::Created,
            }
        };
        self.emit(preset_write_event(OutfitOwner::User, key, name, write));
        self.notify();
        Ok(write)
    }

    pub fn user_preset(&self, instance_id: Option<&str>, name: &str) -> Option<Outfit> {
        let key = user_preset_key(instance_id);
        self.lock_state()
            .presets
            .user
            .get(&key)
            .and_then(|g| g.get(name.trim()))
            .cloned()
    }

    pub fn user_presets(&self, instance_id: Option<&str>) -> PresetGroup {
        let key = user_preset_key(instance_id);
        self.lock_state()
            .presets
            .user
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delete_user_preset(&self, instance_id: Option<&str>, name: &str) -> bool {
        let key = user_preset_key(instance_id);
        let name = name.trim().to_string();
        let removed = {
            let mut state = self.lock_state();
            let Some(group) = state.presets.user.get_mut(&key) else {
                return false;
            };
            let removed = group.remove(&name).is_some();
            if group.is_empty() {
                state.presets.user.remove(&key);
            }
            removed
        };
        if removed {
            self.emit(OutfitEvent::PresetDeleted {
                owner: OutfitOwner::User,
                key,
                name,
            });
            self.notify();
        }
        removed
    }

    // ---- default pointers (settings tier) ----

    pub fn bot_default_preset_name(&self, character_id: &str, instance_id: &str) -> Option<String> {
        let key = bot_preset_key(character_id, instance_id).ok()?;
        self.lock_state()
            .settings
            .default_bot_presets
            .get(&key)
            .cloned()
    }

    pub fn set_bot_default_preset_name(
        &self,
        character_id: &str,
        instance_id: &str,
        name: Option<&str>,
    ) -> Result<(), WardrobeError> {
        let key = bot_preset_key(character_id, instance_id)?;
        {
            let mut state = self.lock_state();
            match name {
                Some(name) => state
                    .settings
                    .default_bot_presets
                    .insert(key, name.to_string()),
                None => state.settings.default_bot_presets.remove(&key),
            };
        }
        self.notify();
        Ok(())
    }

    pub fn user_default_preset_name(&self, instance_id: Option<&str>) -> Option<String> {
        let key = user_preset_key(instance_id);
        self.lock_state()
            .settings
            .default_user_presets
            .get(&key)
            .cloned()
    }

    pub fn set_user_default_preset_name(&self, instance_id: Option<&str>, name: Option<&str>) {
        let key = user_preset_key(instance_id);
        {
            let mut state = self.lock_state();
            match name {
                Some(name) => state
                    .settings
                    .default_user_presets
                    .insert(key, name.to_string()),
                None => state.settings.default_user_presets.remove(&key),
            };
        }
        self.notify();
    }

    // ---- settings ----

    pub fn settings(&self) -> Settings {
        self.lock_state().settings.clone()
    }

    pub fn update_settings<F: FnOnce(&mut Settings)>(&self, f: F) {
        {
            let mut state = self.lock_state();
            f(&mut state.settings);
        }
        self.emit(OutfitEvent::SettingsChanged);
        self.notify();
    }

    // ---- bulk ----

    /// Clears bot instances, user instances and presets in one step.
    pub fn wipe_all_outfit_data(&self) {
        {
            let mut state = self.lock_state();
            state.bot_instances.clear();
            state.user_instances.clear();
            state.presets = PresetBook::default();
        }
        self.emit(OutfitEvent::DataWiped);
        self.notify();
    }

    /// Every outfit value ever stored for the character, for id normalization.
    pub fn known_values_for_character(&self, character_id: Option<&str>) -> Vec<String> {
        let state = self.lock_state();
        let mut values: BTreeSet<String> = BTreeSet::new();
        let mut take = |outfit: &Outfit| {
            for (_, v) in outfit.equipped() {
                values.insert(v.to_string());
            }
        };

        if let Some(character_id) = character_id {
            if let Some(instances) = state.bot_instances.get(character_id) {
                for record in instances.values() {
                    take(&record.bot);
                    take(&record.user);
                }
            }
            for (key, group) in &state.presets.bot {
                if split_bot_preset_key(key).map(|(c, _)| c == character_id) == Some(true) {
                    group.values().for_each(&mut take);
                }
            }
        }
        for record in state.user_instances.values() {
            take(&record.outfit);
        }
        for group in state.presets.user.values() {
            group.values().for_each(&mut take);
        }
        values.into_iter().collect()
    }

    // ---- persistence boundary ----

    /// Durable subset of the state, with every record reconciled to the slot lists.
    pub fn to_document(&self) -> PersistedDocument {
        let state = self.lock_state();
        let bot_instances = state
            .bot_instances
            .iter()
            .map(|(char_id, instances)| {
                let instances = instances
                    .iter()
                    .map(|(inst_id, record)| {
                        let mut record = record.clone();
                        record.bot = record.bot.reconciled(&self.inner.bot_slots);
                        (inst_id.clone(), record)
                    })
                    .collect();
                (char_id.clone(), instances)
            })
            .collect();
        let user_instances = state
            .user_instances
            .iter()
            .map(|(inst_id, record)| {
                let mut record = record.clone();
                record.outfit = record.outfit.reconciled(&self.inner.user_slots);
                (inst_id.clone(), record)
            })
            .collect();
        PersistedDocument {
            bot_instances,
            user_instances,
            presets: state.presets.clone(),
            settings: state.settings.clone(),
            version: CURRENT_VERSION.to_string(),
        }
    }

    pub fn load_document(&self, doc: PersistedDocument) {
        {
            let mut state = self.lock_state();
            state.bot_instances = doc.bot_instances;
            state.user_instances = doc.user_instances;
            state.presets = doc.presets;
            state.settings = doc.settings;
        }
        self.notify();
    }
}

fn preset_write_event(
    owner: OutfitOwner,
    key: String,
    name: String,
    write: PresetWrite,
) -> OutfitEvent {
    match write {
        PresetWrite::Created => OutfitEvent::PresetSaved { owner, key, name },
        PresetWrite::Overwritten => OutfitEvent::PresetOverwritten { owner, key, name },
    }
}

/// Moves `map[from]` to `map[to]` unless `to` is already taken.
fn move_entry<V>(map: &mut BTreeMap<String, V>, from: &str, to: &str) -> bool {
    if map.contains_key(to) {
        return false;
    }
    match map.remove(from) {
        Some(value) => {
            map.insert(to.to_string(), value);
            true
        }
        None => false,
    }
}
