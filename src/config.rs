use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use wardrobe_core::error::WardrobeError;
use wardrobe_core::slots::{default_bot_slots, default_user_slots, is_valid_slot_name};

fn default_data_dir() -> String {
    "./wardrobe.data".into()
}
fn default_macro_cache_ttl_secs() -> u64 {
    300
}
fn default_autosave() -> bool {
    true
}
fn default_cleanup_on_load() -> bool {
    false
}
fn default_log_to_file() -> bool {
    false
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_bot_slots")]
    pub bot_slots: Vec<String>,
    #[serde(default = "default_user_slots")]
    pub user_slots: Vec<String>,
    #[serde(default = "default_macro_cache_ttl_secs")]
    pub macro_cache_ttl_secs: u64,
    /// Persist the document after every store mutation.
    #[serde(default = "default_autosave")]
    pub autosave: bool,
    /// Drop bot instances of the current character that are not the active one on load.
    #[serde(default = "default_cleanup_on_load")]
    pub cleanup_on_load: bool,
    #[serde(default = "default_log_to_file")]
    pub log_to_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            bot_slots: default_bot_slots(),
            user_slots: default_user_slots(),
            macro_cache_ttl_secs: default_macro_cache_ttl_secs(),
            autosave: default_autosave(),
            cleanup_on_load: default_cleanup_on_load(),
            log_to_file: default_log_to_file(),
        }
    }
}

fn normalize_slots(slots: &mut Vec<String>, field: &str) -> Result<(), WardrobeError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(slots.len());
    for slot in slots.drain(..) {
        let slot = slot.trim().to_string();
        if !is_valid_slot_name(&slot) {
            return Err(WardrobeError::Config(format!(
                "{field} entry '{slot}' must match [a-z0-9_-]+"
            )));
        }
        if seen.insert(slot.clone()) {
            out.push(slot);
        }
    }
    if out.is_empty() {
        return Err(WardrobeError::Config(format!("{field} must not be empty")));
    }
    *slots = out;
    Ok(())
}

impl Config {
    pub fn data_root_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn macro_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.macro_cache_ttl_secs)
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, WardrobeError> {
        if let Ok(custom) = std::env::var("WARDROBE_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(WardrobeError::Config(format!(
                "WARDROBE_CONFIG points to non-existent file: {custom}"
            )));
        }
        for candidate in ["./wardrobe.config.yaml", "./wardrobe.config.yml"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    /// Loads the YAML config, falling back to defaults when no file exists.
    pub fn load() -> Result<Self, WardrobeError> {
        match Self::resolve_config_path()? {
            Some(path) => Self::load_from(&path),
            None => {
                let mut config = Config::default();
                config.post_deserialize()?;
                Ok(config)
            }
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, WardrobeError> {
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WardrobeError::Config(format!("Failed to read {path_str}: {e}")))?;
        Self::from_yaml(&content)
            .map_err(|e| WardrobeError::Config(format!("Failed to parse {path_str}: {e}")))
    }

    pub fn from_yaml(content: &str) -> Result<Self, WardrobeError> {
        let mut config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| WardrobeError::Config(e.to_string()))?
        };
        config.post_deserialize()?;
        Ok(config)
    }

    pub(crate) fn post_deserialize(&mut self) -> Result<(), WardrobeError> {
        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
        if self.macro_cache_ttl_secs == 0 {
            self.macro_cache_ttl_secs = default_macro_cache_ttl_secs();
        }
        normalize_slots(&mut self.bot_slots, "bot_slots")?;
        normalize_slots(&mut self.user_slots, "user_slots")?;
        Ok(())
    }

    pub fn save_yaml(&self, path: &str) -> Result<(), WardrobeError> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| WardrobeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
