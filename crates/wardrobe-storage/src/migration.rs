use tracing::info;

use crate::document::PersistedDocument;

pub const CURRENT_VERSION: &str = "2.0.0";

/// Name legacy documents used for a preset that doubled as the reset default.
pub const LEGACY_DEFAULT_PRESET_NAME: &str = "default";

/// Parses a dotted version; anything missing or unparsable counts as zero.
pub fn parse_version(version: &str) -> (u32, u32, u32) {
    let mut parts = version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|p| p.trim().parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

pub fn needs_migration(doc: &PersistedDocument) -> bool {
    parse_version(&doc.version) < parse_version(CURRENT_VERSION)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: String,
    pub bot_defaults_added: usize,
    pub user_defaults_added: usize,
}

/// Brings `doc` up to [`CURRENT_VERSION`]. The version stamp is bumped even
/// when no data needed to change.
pub fn migrate(doc: &mut PersistedDocument) -> MigrationReport {
    let mut report = MigrationReport {
        from_version: doc.version.clone(),
        ..Default::default()
    };
    let version = parse_version(&doc.version);

    if version < (2, 0, 0) {
        // Presets literally named "default" used to mark the reset outfit.
        for (key, group) in &doc.presets.bot {
            if !group.contains_key(LEGACY_DEFAULT_PRESET_NAME) {
                continue;
            }
            if !doc.settings.default_bot_presets.contains_key(key) {
                doc.settings
                    .default_bot_presets
                    .insert(key.clone(), LEGACY_DEFAULT_PRESET_NAME.to_string());
                report.bot_defaults_added += 1;
            }
        }
        for (instance_id, group) in &doc.presets.user {
            if !group.contains_key(LEGACY_DEFAULT_PRESET_NAME) {
                continue;
            }
            if !doc.settings.default_user_presets.contains_key(instance_id) {
                doc.settings
                    .default_user_presets
                    .insert(instance_id.clone(), LEGACY_DEFAULT_PRESET_NAME.to_string());
                report.user_defaults_added += 1;
            }
        }
    }

    doc.version = CURRENT_VERSION.to_string();
    info!(
        "Migrated outfit data from version '{}' to {} ({} bot defaults, {} user defaults)",
        report.from_version, CURRENT_VERSION, report.bot_defaults_added, report.user_defaults_added
    );
    report
}
