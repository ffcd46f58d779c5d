use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Text form of an empty slot at the persistence and macro boundaries.
pub const NONE_SENTINEL: &str = "None";

pub const DEFAULT_BOT_SLOTS: &[&str] = &[
    "headwear",
    "topwear",
    "topunderwear",
    "bottomwear",
    "bottomunderwear",
    "footwear",
    "footunderwear",
    "head-accessory",
    "ears-accessory",
    "eyes-accessory",
    "mouth-accessory",
    "neck-accessory",
    "body-accessory",
    "arms-accessory",
    "hands-accessory",
    "waist-accessory",
    "bottom-accessory",
    "legs-accessory",
    "foot-accessory",
];

pub const DEFAULT_USER_SLOTS: &[&str] = DEFAULT_BOT_SLOTS;

pub fn default_bot_slots() -> Vec<String> {
    DEFAULT_BOT_SLOTS.iter().map(|s| s.to_string()).collect()
}

pub fn default_user_slots() -> Vec<String> {
    DEFAULT_USER_SLOTS.iter().map(|s| s.to_string()).collect()
}

pub fn is_valid_slot_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Maps a raw slot value to the internal representation: blank and the
/// sentinel (any case) mean "nothing equipped".
pub fn normalize_slot_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NONE_SENTINEL) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Splits a macro body such as `char_head-accessory` into `("char", "head-accessory")`.
///
/// The longest known slot that terminates the body wins, so `left_hand` style
/// slot names are not cut at their first underscore.
pub fn split_macro_name<'a, S: AsRef<str>>(body: &'a str, slots: &[S]) -> Option<(&'a str, &'a str)> {
    let mut best: Option<(&'a str, &'a str)> = None;
    for slot in slots {
        let slot = slot.as_ref();
        if slot.is_empty() || body.len() <= slot.len() + 1 {
            continue;
        }
        let split_at = body.len() - slot.len();
        if !body.is_char_boundary(split_at) || &body[split_at..] != slot {
            continue;
        }
        if !body[..split_at].ends_with('_') {
            continue;
        }
        let prefix = &body[..split_at - 1];
        if prefix.is_empty() {
            continue;
        }
        let longer = best.map(|(_, s)| slot.len() > s.len()).unwrap_or(true);
        if longer {
            best = Some((prefix, &body[split_at..]));
        }
    }
    best
}

/// Slot values for one bot or user outfit. `None` is "nothing equipped".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, serde_json::Value>",
    into = "BTreeMap<String, String>"
)]
pub struct Outfit {
    slots: BTreeMap<String, Option<String>>,
}

impl Outfit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: &str) -> Option<&str> {
        self.slots.get(slot).and_then(|v| v.as_deref())
    }

    pub fn contains_slot(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Stores `value` after sentinel normalization; returns the previous value.
    pub fn set(&mut self, slot: &str, value: Option<&str>) -> Option<String> {
        let value = value.and_then(normalize_slot_value);
        self.slots.insert(slot.to_string(), value).flatten()
    }

    pub fn remove_slot(&mut self, slot: &str) -> Option<String> {
        self.slots.remove(slot).flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Slots that currently hold a value.
    pub fn equipped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.slots
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }

    pub fn has_any_equipped(&self) -> bool {
        self.equipped().next().is_some()
    }

    /// Copy with an explicit entry for every slot in `slots`; extra slots are kept.
    pub fn reconciled<S: AsRef<str>>(&self, slots: &[S]) -> Outfit {
        let mut out = self.clone();
        for slot in slots {
            out.slots.entry(slot.as_ref().to_string()).or_insert(None);
        }
        out
    }

    /// Text form of a slot, substituting the sentinel for empty slots.
    pub fn display_value(&self, slot: &str) -> &str {
        self.get(slot).unwrap_or(NONE_SENTINEL)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Outfit {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut outfit = Outfit::new();
        for (k, v) in iter {
            outfit.set(k.as_ref(), Some(v.as_ref()));
        }
        outfit
    }
}

impl From<BTreeMap<String, serde_json::Value>> for Outfit {
    fn from(raw: BTreeMap<String, serde_json::Value>) -> Self {
        let mut outfit = Outfit::new();
        for (slot, value) in raw {
            match value {
                serde_json::Value::String(s) => {
                    outfit.set(&slot, Some(&s));
                }
                serde_json::Value::Null => {
                    outfit.set(&slot, None);
                }
                _ => {}
            }
        }
        outfit
    }
}

impl From<Outfit> for BTreeMap<String, String> {
    fn from(outfit: Outfit) -> Self {
        outfit
            .slots
            .into_iter()
            .map(|(k, v)| (k, v.unwrap_or_else(|| NONE_SENTINEL.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_macro_name_prefers_longest_slot() {
        let slots = ["accessory", "head-accessory", "headwear"];
        assert_eq!(
            split_macro_name("char_head-accessory", &slots),
            Some(("char", "head-accessory"))
        );
        assert_eq!(split_macro_name("user_headwear", &slots), Some(("user", "headwear")));
        assert_eq!(
            split_macro_name("Mary_Ann_headwear", &slots),
            Some(("Mary_Ann", "headwear"))
        );
        assert_eq!(split_macro_name("headwear", &slots), None);
        assert_eq!(split_macro_name("_headwear", &slots), None);
        assert_eq!(split_macro_name("char_shirt", &slots), None);
    }

    #[test]
    fn test_slot_name_validation() {
        assert!(is_valid_slot_name("head-accessory"));
        assert!(is_valid_slot_name("left_hand2"));
        assert!(!is_valid_slot_name("Headwear"));
        assert!(!is_valid_slot_name("head wear"));
        assert!(!is_valid_slot_name(""));
    }

    #[test]
    fn test_sentinel_maps_to_none() {
        let mut outfit = Outfit::new();
        outfit.set("headwear", Some("None"));
        outfit.set("topwear", Some("  "));
        outfit.set("footwear", Some(" Boots "));
        assert_eq!(outfit.get("headwear"), None);
        assert_eq!(outfit.get("topwear"), None);
        assert_eq!(outfit.get("footwear"), Some("Boots"));
        assert_eq!(outfit.display_value("headwear"), "None");
        assert_eq!(outfit.equipped().count(), 1);
    }

    #[test]
    fn test_reconciled_fills_missing_slots() {
        let outfit: Outfit = [("headwear", "Cap")].into_iter().collect();
        let full = outfit.reconciled(DEFAULT_BOT_SLOTS);
        assert_eq!(full.len(), DEFAULT_BOT_SLOTS.len());
        assert_eq!(full.get("headwear"), Some("Cap"));
        assert!(full.contains_slot("footwear"));
        assert_eq!(full.get("footwear"), None);
    }

    #[test]
    fn test_serde_boundary_uses_sentinel() {
        let outfit: Outfit = [("headwear", "Cap"), ("topwear", "None")].into_iter().collect();
        let json = serde_json::to_value(&outfit).unwrap();
        assert_eq!(json["headwear"], "Cap");
        assert_eq!(json["topwear"], "None");

        let parsed: Outfit =
            serde_json::from_str(r#"{"headwear":"Cap","topwear":"None","count":3}"#).unwrap();
        assert_eq!(parsed.get("headwear"), Some("Cap"));
        assert!(parsed.contains_slot("topwear"));
        assert_eq!(parsed.get("topwear"), None);
        assert!(!parsed.contains_slot("count"));
    }
}
