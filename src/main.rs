use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use wardrobe::adapter::{JsonFileStorage, StorageAdapter};
use wardrobe::config::Config;
use wardrobe::data_manager::DataManager;
use wardrobe::document::DocumentPatch;
use wardrobe::events::EventBus;
use wardrobe::host::{HostContext, HostSnapshot, InMemoryHost};
use wardrobe::identity::{instance_id_for, legacy_instance_id, InstanceTracker};
use wardrobe::logging;
use wardrobe::macros::MacroResolver;
use wardrobe::manager::{BotOutfitManager, UserOutfitManager};
use wardrobe::migration::{migrate, needs_migration};
use wardrobe::store::OutfitStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    name = "wardrobe",
    version = VERSION,
    about = "Per-conversation outfit tracking for chat characters"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Print the instance id derived from a first character message
    InstanceId(InstanceIdCommand),
    /// Expand outfit macros in text against the stored outfits
    Substitute(SubstituteCommand),
    /// Load the stored outfit data and upgrade it to the current version
    Migrate,
    /// Print the stored outfit document
    Show,
    /// Delete every outfit, instance and preset (settings are kept)
    Wipe {
        /// Confirm the wipe
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show version
    Version,
}

#[derive(Debug, Args)]
struct InstanceIdCommand {
    /// First message written by the character
    text: String,
    /// Character whose stored outfit values are stripped before hashing
    #[arg(long)]
    character: Option<String>,
    /// Also print the legacy id for the same text
    #[arg(long)]
    legacy: bool,
}

#[derive(Debug, Args)]
struct SubstituteCommand {
    /// Text containing {{char_slot}}, {{user_slot}} or {{Name_slot}} macros
    text: String,
    /// Current character id
    #[arg(long)]
    character: String,
    /// Current conversation instance id
    #[arg(long)]
    instance: String,
    /// JSON host snapshot with characters (needed for {{Name_slot}} macros)
    #[arg(long)]
    host: Option<PathBuf>,
    /// Append the prompt injection block
    #[arg(long)]
    prompt: bool,
}

fn print_version() {
    println!("wardrobe {VERSION}");
}

fn storage_for(config: &Config) -> Arc<dyn StorageAdapter> {
    Arc::new(JsonFileStorage::in_data_dir(&config.data_root_dir()))
}

/// Loads the stored document into a fresh store without writing anything back.
async fn load_store(config: &Config) -> OutfitStore {
    let data = DataManager::new(storage_for(config));
    let store = OutfitStore::new(
        config.bot_slots.clone(),
        config.user_slots.clone(),
        EventBus::new(),
    );
    if let Some(mut doc) = data.load().await {
        if needs_migration(&doc) {
            migrate(&mut doc);
        }
        store.load_document(doc);
    }
    store
}

fn load_host_snapshot(path: &Path) -> anyhow::Result<HostSnapshot> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read host snapshot {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

async fn handle_instance_id(config: &Config, cmd: InstanceIdCommand) -> anyhow::Result<()> {
    let store = load_store(config).await;
    let host = Arc::new(InMemoryHost::new());
    if let Some(character) = cmd.character.as_deref() {
        host.add_character(character, character);
        host.select_character(Some(character));
    }
    let tracker = InstanceTracker::new(store, host);

    let normalized = tracker.normalize(&cmd.text, cmd.character.as_deref());
    println!("{}", instance_id_for(&normalized));
    if cmd.legacy {
        println!("legacy: {}", legacy_instance_id(&normalized));
    }
    Ok(())
}

async fn handle_substitute(config: &Config, cmd: SubstituteCommand) -> anyhow::Result<()> {
    let store = load_store(config).await;
    let host = match cmd.host.as_deref() {
        Some(path) => InMemoryHost::from_snapshot(load_host_snapshot(path)?),
        None => InMemoryHost::new(),
    };
    if host.character(&cmd.character).is_none() {
        host.add_character(&cmd.character, &cmd.character);
    }
    host.select_character(Some(&cmd.character));
    let host = Arc::new(host);

    let _bot = BotOutfitManager::new(store.clone(), host.clone());
    let _user = UserOutfitManager::new(store.clone());
    let resolver = MacroResolver::new(store.clone(), host, config.macro_cache_ttl());
    store.set_current_character_id(Some(&cmd.character));
    store.set_current_instance_id(Some(&cmd.instance));

    println!("{}", resolver.substitute_all(&cmd.text));
    if cmd.prompt {
        let block = resolver.prompt_injection_text();
        if !block.is_empty() {
            println!();
            println!("{block}");
        }
    }
    Ok(())
}

async fn handle_migrate(config: &Config) -> anyhow::Result<()> {
    let storage = JsonFileStorage::in_data_dir(&config.data_root_dir());
    let path = storage.path().to_path_buf();
    let data = DataManager::new(Arc::new(storage));
    let doc = data.initialize().await;
    println!(
        "Outfit data at {} is at version {}",
        path.display(),
        doc.version
    );
    Ok(())
}

async fn handle_show(config: &Config) -> anyhow::Result<()> {
    let data = DataManager::new(storage_for(config));
    match data.load().await {
        Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
        None => println!("No outfit data stored yet."),
    }
    Ok(())
}

async fn handle_wipe(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("refusing to wipe outfit data without --yes");
    }
    let data = DataManager::new(storage_for(config));
    let store = OutfitStore::new(
        config.bot_slots.clone(),
        config.user_slots.clone(),
        EventBus::new(),
    );
    store.load_document(data.initialize().await);
    store.wipe_all_outfit_data();
    if !data.save(DocumentPatch::full(store.to_document())).await {
        anyhow::bail!("failed to write wiped outfit data");
    }
    info!("Outfit data wiped");
    println!("All outfit data wiped.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Some(MainCommand::Version) => {
            print_version();
            return Ok(());
        }
        Some(command) => command,
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            return Ok(());
        }
    };

    let config = Config::load()?;
    if config.log_to_file {
        logging::init_logging(&config.data_root_dir())?;
    } else {
        logging::init_console_logging();
    }

    match command {
        MainCommand::InstanceId(cmd) => handle_instance_id(&config, cmd).await,
        MainCommand::Substitute(cmd) => handle_substitute(&config, cmd).await,
        MainCommand::Migrate => handle_migrate(&config).await,
        MainCommand::Show => handle_show(&config).await,
        MainCommand::Wipe { yes } => handle_wipe(&config, yes).await,
        MainCommand::Version => {
            print_version();
            Ok(())
        }
    }
}
