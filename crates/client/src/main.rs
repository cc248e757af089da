//! Save engine command-line client.
//!
//! Composition root: loads `.env`, installs logging, builds the
//! [`SaveDataStore`], runs one command and disposes the store.
//!
//! ```bash
//! savegame show
//! savegame --slot 1 coins add 50
//! SAVE_VERBOSE=1 savegame verify
//! ```

mod commands;
mod dirs;
mod logging;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use save_engine::{FilePreferences, SaveConfig, SaveDataStore, SlotManager};

use commands::{Coins, Hardcore, Language, Score, Show, Upgrade, Verify, Volume};

/// Inspect and edit player save slots
#[derive(Parser)]
#[command(name = "savegame")]
#[command(about = "Inspect and edit player save slots", long_about = None)]
#[command(version)]
struct Cli {
    /// Slot to open (defaults to SAVE_SLOT or 0)
    #[arg(short, long, global = true, value_name = "N")]
    slot: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Print the slot's record
    Show(Show),

    /// Set, add or spend coins
    #[command(subcommand)]
    Coins(Coins),

    /// Submit a score; keeps the best one
    Score(Score),

    /// Set an upgrade level
    Upgrade(Upgrade),

    /// Set music and effects volume
    Volume(Volume),

    /// Set the language code
    Language(Language),

    /// Toggle hardcore mode
    Hardcore(Hardcore),

    /// Check the slot file's integrity without modifying it
    Verify(Verify),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = logging::setup_logging()?;

    let cli = Cli::parse();
    let config = slot_config(SaveConfig::from_env(), cli.slot)?;
    tracing::debug!("Configuration: {:?}", config);

    // Verification must not go through the load pipeline, which would reset
    // a corrupted file.
    let run: Box<dyn FnOnce(&SaveDataStore) -> Result<()>> = match cli.command {
        Command::Verify(cmd) => return cmd.execute(&config, config.initial_slot),
        Command::Show(cmd) => Box::new(move |store| cmd.execute(store)),
        Command::Coins(cmd) => Box::new(move |store| cmd.execute(store)),
        Command::Score(cmd) => Box::new(move |store| cmd.execute(store)),
        Command::Upgrade(cmd) => Box::new(move |store| cmd.execute(store)),
        Command::Volume(cmd) => Box::new(move |store| cmd.execute(store)),
        Command::Language(cmd) => Box::new(move |store| cmd.execute(store)),
        Command::Hardcore(cmd) => Box::new(move |store| cmd.execute(store)),
    };

    let legacy = FilePreferences::open(dirs::legacy_preferences_path(&config.base_dir));
    let store = SaveDataStore::builder(config)
        .legacy_preferences(Arc::new(legacy))
        .localization(Arc::new(logging::LogLocalization))
        .build()
        .await?;

    let result = run(&store);

    let outcome = store.dispose().await;
    commands::report_flush(&outcome);
    result
}

/// Open the store directly on the requested slot so no other slot is
/// loaded, migrated or reset along the way.
fn slot_config(config: SaveConfig, slot: Option<u8>) -> Result<SaveConfig> {
    let Some(slot) = slot else {
        return Ok(config);
    };
    SlotManager::new(&config.base_dir, config.max_slots).check_slot(slot)?;
    Ok(config.with_initial_slot(slot))
}
