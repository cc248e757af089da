//! Print the active slot's record

use anyhow::Result;
use clap::Parser;
use console::style;
use save_engine::{SaveDataStore, SaveRecord};

/// Print the active slot's record
#[derive(Parser, Debug)]
pub struct Show {}

impl Show {
    pub fn execute(self, store: &SaveDataStore) -> Result<()> {
        let record = store.snapshot();
        let path = store.active_path();
        println!(
            "{} {}",
            style(format!("Slot {}", store.active_slot())).cyan().bold(),
            style(path.display()).dim()
        );
        print_record(&record);
        Ok(())
    }
}

pub(super) fn print_record(record: &SaveRecord) {
    println!("  {:<16}{}", "Version", record.version);
    println!("  {:<16}{}", "Coins", style(record.coins).yellow());
    println!("  {:<16}{}", "High score", style(record.high_score).green());
    println!("  {:<16}{:.2}", "Music volume", record.music_volume);
    println!("  {:<16}{:.2}", "Effects volume", record.effects_volume);
    println!("  {:<16}{}", "Language", record.language);
    println!("  {:<16}{}", "Hardcore", record.hardcore_mode);

    if record.upgrades.is_empty() {
        println!("  {:<16}{}", "Upgrades", style("none").dim());
    } else {
        println!("  Upgrades");
        for (kind, level) in &record.upgrades {
            println!("    {:<14}{}", kind.to_string(), level);
        }
    }
}
