//! Integrity check of a slot file
//!
//! Reads the file directly instead of building a store, so a tampered file
//! is reported rather than reset.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use save_engine::{SaveCodec, SaveConfig, SlotManager};

use super::show::print_record;

/// Check the slot file's integrity without modifying it
#[derive(Parser, Debug)]
pub struct Verify {
    /// Verify this file instead of the slot's file
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,
}

impl Verify {
    pub fn execute(self, config: &SaveConfig, slot: u8) -> Result<()> {
        let path = match self.file {
            Some(path) => path,
            None => slot_file(config, slot)?,
        };

        if !path.exists() {
            bail!("Save file not found: {}", path.display());
        }

        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read save file: {}", path.display()))?;

        let codec = SaveCodec::new(config.encryption());
        println!(
            "{} {} ({} bytes, {})",
            style("Verifying").cyan().bold(),
            path.display(),
            bytes.len(),
            if codec.is_encrypted() {
                "encrypted"
            } else {
                "plaintext"
            }
        );

        match codec.decode(&bytes) {
            Ok(decoded) => {
                println!("{} Checksum valid", style("✓").green().bold());
                if decoded.needs_rewrite {
                    println!(
                        "{} Stored as plaintext; it will be encrypted on next load",
                        style("!").yellow().bold()
                    );
                }
                print_record(&decoded.record);
                Ok(())
            }
            Err(e) => bail!("Integrity check failed: {}", e),
        }
    }
}

/// The slot's file, or the base-directory fallback used when the slot
/// directory could not be created.
fn slot_file(config: &SaveConfig, slot: u8) -> Result<PathBuf> {
    let slots = SlotManager::new(&config.base_dir, config.max_slots);
    slots.check_slot(slot)?;

    let path = slots.slot_dir(slot).join(&config.file_name);
    if path.exists() {
        return Ok(path);
    }
    let fallback = config.base_dir.join(&config.file_name);
    if fallback.exists() {
        return Ok(fallback);
    }
    Ok(path)
}
