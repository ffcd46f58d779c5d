//! `{{char_slot}}`, `{{user_slot}}` and `{{Name_slot}}` macro resolution.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use tracing::debug;

use wardrobe_core::slots::{split_macro_name, Outfit, NONE_SENTINEL};
use wardrobe_core::CharacterId;

use crate::host::HostContext;
use crate::store::{ListenerId, OutfitStore};

pub const DEFAULT_MACRO_CACHE_TTL: Duration = Duration::from_secs(300);

fn macro_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("macro regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroKind {
    /// The current character.
    Char,
    /// The user persona.
    User,
    /// A character addressed by display name.
    Named(String),
}

impl MacroKind {
    pub fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "char" => MacroKind::Char,
            "user" => MacroKind::User,
            name => MacroKind::Named(name.to_string()),
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            MacroKind::Char => "char",
            MacroKind::User => "user",
            MacroKind::Named(_) => "named",
        }
    }

    fn explicit_name(&self) -> Option<&str> {
        match self {
            MacroKind::Named(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

pub fn cache_key(
    kind: &MacroKind,
    slot: &str,
    character_id: Option<&str>,
    instance_id: &str,
) -> String {
    format!(
        "{}_{}_{}_{}_{}",
        kind.tag(),
        slot,
        kind.explicit_name().unwrap_or("null"),
        character_id.unwrap_or("none"),
        instance_id
    )
}

/// Resolved macro values with a time-to-live. Entries past the TTL are
/// dropped on read.
#[derive(Debug)]
pub struct MacroCache {
    entries: HashMap<String, (String, Instant)>,
    ttl: Duration,
}

impl MacroCache {
    pub fn new(ttl: Duration) -> Self {
        MacroCache {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&mut self, key: &str, now: Instant) -> Option<String> {
        let (value, stored_at) = self.entries.get(key)?;
        if now.saturating_duration_since(*stored_at) < self.ttl {
            return Some(value.clone());
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&mut self, key: String, value: String, now: Instant) {
        self.entries.insert(key, (value, now));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops every entry that belongs to the given character and instance.
    pub fn invalidate_instance(&mut self, character_id: &str, instance_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !(key.contains(character_id) && key.contains(instance_id)));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn lock_cache(cache: &Mutex<MacroCache>) -> MutexGuard<'_, MacroCache> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn slot_label(slot: &str) -> String {
    slot.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn outfit_block(title: &str, outfit: &Outfit, slots: &[String]) -> Option<String> {
    let lines: Vec<String> = slots
        .iter()
        .filter_map(|slot| {
            outfit
                .get(slot)
                .map(|value| format!("- {}: {value}", slot_label(slot)))
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!("**{title}**\n{}", lines.join("\n")))
}

pub struct MacroResolver {
    store: OutfitStore,
    host: Arc<dyn HostContext>,
    cache: Arc<Mutex<MacroCache>>,
    listener_id: ListenerId,
    macro_slots: Vec<String>,
}

impl MacroResolver {
    /// Creates the resolver and registers the store listener that clears the
    /// cache on every mutation.
    pub fn new(store: OutfitStore, host: Arc<dyn HostContext>, ttl: Duration) -> Self {
        let cache = Arc::new(Mutex::new(MacroCache::new(ttl)));
        let listener_cache = cache.clone();
        let listener_id = store.subscribe(move |_| {
            lock_cache(&listener_cache).clear();
            Ok(())
        });
        let mut macro_slots = store.bot_slots().to_vec();
        for slot in store.user_slots() {
            if !macro_slots.contains(slot) {
                macro_slots.push(slot.clone());
            }
        }
        MacroResolver {
            store,
            host,
            cache,
            listener_id,
            macro_slots,
        }
    }

    /// Managers attached, a conversation instance known, and at least one character loaded.
    pub fn is_ready(&self) -> bool {
        self.store.managers_attached()
            && self.store.current_instance_id().is_some()
            && self.host.character_count() > 0
    }

    fn target_character(&self, kind: &MacroKind) -> Option<CharacterId> {
        match kind {
            MacroKind::Char | MacroKind::User => self.store.current_character_id(),
            MacroKind::Named(name) => self.host.find_character_by_name(name),
        }
    }

    pub fn resolve_slot_value(&self, kind: &MacroKind, slot: &str) -> Option<String> {
        if !self.is_ready() {
            return None;
        }
        let instance_id = self.store.current_instance_id()?;
        let character_id = self.target_character(kind);
        let key = cache_key(kind, slot, character_id.as_deref(), &instance_id);

        let now = Instant::now();
        if let Some(value) = lock_cache(&self.cache).get(&key, now) {
            return Some(value);
        }

        let value = match kind {
            MacroKind::User => {
                if !self.store.user_slots().iter().any(|s| s == slot) {
                    return None;
                }
                self.store
                    .user_outfit(Some(&instance_id))
                    .get(slot)
                    .map(str::to_string)
            }
            MacroKind::Char | MacroKind::Named(_) => {
                if !self.store.bot_slots().iter().any(|s| s == slot) {
                    return None;
                }
                let character_id = character_id?;
                self.store
                    .bot_outfit(&character_id, &instance_id)
                    .get(slot)
                    .map(str::to_string)
            }
        }?;

        lock_cache(&self.cache).insert(key, value.clone(), now);
        Some(value)
    }

    /// Text form used inside prompts: the value, or the `None` sentinel.
    pub fn resolve_slot(&self, kind: &MacroKind, slot: &str) -> String {
        self.resolve_slot_value(kind, slot)
            .unwrap_or_else(|| NONE_SENTINEL.to_string())
    }

    /// Replaces every outfit macro that has a value; anything else is left as written.
    pub fn substitute_all(&self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        macro_re()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let body = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                split_macro_name(body, &self.macro_slots)
                    .and_then(|(prefix, slot)| {
                        self.resolve_slot_value(&MacroKind::from_prefix(prefix), slot)
                    })
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Outfit summary for prompt injection; empty when nothing applies.
    pub fn prompt_injection_text(&self) -> String {
        if !self.is_ready() {
            return String::new();
        }
        let Some(instance_id) = self.store.current_instance_id() else {
            return String::new();
        };
        let mut blocks = Vec::new();

        if let Some(character_id) = self.store.current_character_id() {
            if self
                .store
                .bot_prompt_injection_enabled(&character_id, &instance_id)
            {
                let name = self
                    .host
                    .character(&character_id)
                    .map(|c| c.name)
                    .unwrap_or_else(|| character_id.clone());
                let outfit = self.store.bot_outfit(&character_id, &instance_id);
                blocks.extend(outfit_block(
                    &format!("{name}'s Current Outfit"),
                    &outfit,
                    self.store.bot_slots(),
                ));
            }
        }

        if self.store.user_prompt_injection_enabled(Some(&instance_id)) {
            let outfit = self.store.user_outfit(Some(&instance_id));
            blocks.extend(outfit_block(
                "{{user}}'s Current Outfit",
                &outfit,
                self.store.user_slots(),
            ));
        }
        blocks.join("\n\n")
    }

    pub fn clear_cache(&self) {
        lock_cache(&self.cache).clear();
    }

    pub fn invalidate_instance(&self, character_id: &str, instance_id: &str) {
        let removed = lock_cache(&self.cache).invalidate_instance(character_id, instance_id);
        debug!("Invalidated {removed} macro cache entries for {character_id}/{instance_id}");
    }

    pub fn cached_entries(&self) -> usize {
        lock_cache(&self.cache).len()
    }
}

impl Drop for MacroResolver {
    fn drop(&mut self) {
        self.store.unsubscribe(self.listener_id);
    }
}
