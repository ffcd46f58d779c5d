use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use wardrobe_core::error::WardrobeError;
use wardrobe_core::slots::Outfit;
use wardrobe_core::{CharacterId, InstanceId};

use crate::migration::CURRENT_VERSION;

/// Instance key used for user state when no conversation branch is known.
pub const DEFAULT_INSTANCE_KEY: &str = "default";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotInstanceRecord {
    #[serde(default)]
    pub bot: Outfit,
    #[serde(default)]
    pub user: Outfit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_injection_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInstanceRecord {
    #[serde(flatten)]
    pub outfit: Outfit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_injection_enabled: Option<bool>,
}

pub type PresetGroup = BTreeMap<String, Outfit>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetBook {
    /// `characterId_instanceId` -> preset name -> outfit.
    #[serde(default)]
    pub bot: BTreeMap<String, PresetGroup>,
    /// instanceId -> preset name -> outfit.
    #[serde(default)]
    pub user: BTreeMap<String, PresetGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub auto_open_bot: bool,
    #[serde(default = "default_true")]
    pub auto_open_user: bool,
    #[serde(default = "default_true")]
    pub enable_sys_messages: bool,
    #[serde(default)]
    pub auto_outfit_system: bool,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_true")]
    pub prompt_injection_enabled: bool,
    /// `characterId_instanceId` -> preset name applied after a reset.
    #[serde(default)]
    pub default_bot_presets: BTreeMap<String, String>,
    /// instanceId -> preset name applied after a reset.
    #[serde(default)]
    pub default_user_presets: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            auto_open_bot: true,
            auto_open_user: true,
            enable_sys_messages: true,
            auto_outfit_system: false,
            debug_mode: false,
            prompt_injection_enabled: true,
            default_bot_presets: BTreeMap::new(),
            default_user_presets: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// The on-disk document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    #[serde(default)]
    pub bot_instances: BTreeMap<CharacterId, BTreeMap<InstanceId, BotInstanceRecord>>,
    #[serde(default)]
    pub user_instances: BTreeMap<InstanceId, UserInstanceRecord>,
    #[serde(default)]
    pub presets: PresetBook,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub version: String,
}

impl PersistedDocument {
    /// Empty document stamped with the current schema version.
    pub fn new_current() -> Self {
        PersistedDocument {
            version: CURRENT_VERSION.to_string(),
            ..Default::default()
        }
    }

    /// Parses a stored document, dropping only the entries that do not fit the
    /// schema. Returns `None` when `raw` is not a JSON object; the flag is set
    /// when anything was dropped.
    pub fn from_value_lenient(raw: Value) -> Option<(Self, bool)> {
        if let Ok(doc) = serde_json::from_value::<PersistedDocument>(raw.clone()) {
            return Some((doc, false));
        }
        let Value::Object(mut fields) = raw else {
            return None;
        };
        let mut repaired = false;
        let mut doc = PersistedDocument::default();

        if let Some(characters) = take_object(&mut fields, "botInstances", &mut repaired) {
            for (character_id, instances) in characters {
                let Value::Object(instances) = instances else {
                    warn!("Dropping malformed outfit instances of character {character_id}");
                    repaired = true;
                    continue;
                };
                let parsed: BTreeMap<InstanceId, BotInstanceRecord> =
                    lenient_map(instances, "botInstances", &mut repaired);
                if !parsed.is_empty() {
                    doc.bot_instances.insert(character_id, parsed);
                }
            }
        }
        if let Some(instances) = take_object(&mut fields, "userInstances", &mut repaired) {
            doc.user_instances = lenient_map(instances, "userInstances", &mut repaired);
        }
        if let Some(mut presets) = take_object(&mut fields, "presets", &mut repaired) {
            if let Some(groups) = take_object(&mut presets, "bot", &mut repaired) {
                doc.presets.bot = lenient_map(groups, "presets.bot", &mut repaired);
            }
            if let Some(groups) = take_object(&mut presets, "user", &mut repaired) {
                doc.presets.user = lenient_map(groups, "presets.user", &mut repaired);
            }
        }
        if let Some(settings) = take_object(&mut fields, "settings", &mut repaired) {
            doc.settings = lenient_settings(settings, &mut repaired);
        }
        match fields.remove("version") {
            Some(Value::String(version)) => doc.version = version,
            Some(Value::Null) | None => {}
            Some(other) => {
                warn!("Ignoring malformed outfit data version {other}");
                repaired = true;
            }
        }
        Some((doc, repaired))
    }
}

fn take_object(
    fields: &mut Map<String, Value>,
    key: &str,
    repaired: &mut bool,
) -> Option<Map<String, Value>> {
    match fields.remove(key)? {
        Value::Object(map) => Some(map),
        Value::Null => None,
        _ => {
            warn!("Dropping malformed outfit data section {key}");
            *repaired = true;
            None
        }
    }
}

fn lenient_map<T: DeserializeOwned>(
    entries: Map<String, Value>,
    section: &str,
    repaired: &mut bool,
) -> BTreeMap<String, T> {
    let mut out = BTreeMap::new();
    for (key, value) in entries {
        match serde_json::from_value(value) {
            Ok(parsed) => {
                out.insert(key, parsed);
            }
            Err(e) => {
                warn!("Dropping malformed outfit data entry {section}.{key}: {e}");
                *repaired = true;
            }
        }
    }
    out
}

/// Keeps every setting that parses; a bad value falls back to its default.
fn lenient_settings(fields: Map<String, Value>, repaired: &mut bool) -> Settings {
    let mut accepted = Map::new();
    for (key, value) in fields {
        accepted.insert(key.clone(), value);
        if serde_json::from_value::<Settings>(Value::Object(accepted.clone())).is_err() {
            warn!("Ignoring malformed outfit setting {key}");
            accepted.remove(&key);
            *repaired = true;
        }
    }
    serde_json::from_value(Value::Object(accepted)).unwrap_or_default()
}

/// Partial update merged into the last loaded document before saving.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub bot_instances: Option<BTreeMap<CharacterId, BTreeMap<InstanceId, BotInstanceRecord>>>,
    pub user_instances: Option<BTreeMap<InstanceId, UserInstanceRecord>>,
    pub presets: Option<PresetBook>,
    pub settings: Option<Settings>,
    pub version: Option<String>,
}

impl DocumentPatch {
    pub fn full(doc: PersistedDocument) -> Self {
        DocumentPatch {
            bot_instances: Some(doc.bot_instances),
            user_instances: Some(doc.user_instances),
            presets: Some(doc.presets),
            settings: Some(doc.settings),
            version: Some(doc.version),
        }
    }

    pub fn settings_only(settings: Settings) -> Self {
        DocumentPatch {
            settings: Some(settings),
            ..Default::default()
        }
    }

    pub fn apply_to(self, doc: &mut PersistedDocument) {
        if let Some(v) = self.bot_instances {
            doc.bot_instances = v;
        }
        if let Some(v) = self.user_instances {
            doc.user_instances = v;
        }
        if let Some(v) = self.presets {
            doc.presets = v;
        }
        if let Some(v) = self.settings {
            doc.settings = v;
        }
        if let Some(v) = self.version {
            doc.version = v;
        }
    }
}

/// Key of a bot preset group or bot default pointer.
pub fn bot_preset_key(character_id: &str, instance_id: &str) -> Result<String, WardrobeError> {
    if character_id.trim().is_empty() {
        return Err(WardrobeError::invalid("characterId is required for bot preset key"));
    }
    if instance_id.trim().is_empty() {
        return Err(WardrobeError::invalid("instanceId is required for bot preset key"));
    }
    Ok(format!("{character_id}_{instance_id}"))
}

/// Inverse of [`bot_preset_key`]. Instance ids never contain `_`, character ids may.
pub fn split_bot_preset_key(key: &str) -> Option<(&str, &str)> {
    let (character_id, instance_id) = key.rsplit_once('_')?;
    if character_id.is_empty() || instance_id.is_empty() {
        return None;
    }
    Some((character_id, instance_id))
}

/// Instance key for user presets and defaults; blank falls back to `"default"`.
pub fn user_preset_key(instance_id: Option<&str>) -> String {
    match instance_id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => DEFAULT_INSTANCE_KEY.to_string(),
    }
}
