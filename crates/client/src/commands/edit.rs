//! Commands that change the active slot's record

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use save_engine::{SaveDataStore, UpgradeKind};

fn done(message: String) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Set, add or spend coins
#[derive(Subcommand, Debug)]
pub enum Coins {
    /// Replace the coin balance
    Set { amount: u64 },
    /// Add to the coin balance
    Add { amount: u64 },
    /// Spend coins if the balance allows it
    Spend { amount: u64 },
}

impl Coins {
    pub fn execute(self, store: &SaveDataStore) -> Result<()> {
        match self {
            Coins::Set { amount } => {
                store.set_coins(amount);
                done(format!("Coins set to {}", amount));
            }
            Coins::Add { amount } => {
                let total = store.add_coins(amount);
                done(format!("Coins: {}", total));
            }
            Coins::Spend { amount } => {
                if !store.spend_coins(amount) {
                    bail!("Not enough coins: have {}, need {}", store.coins(), amount);
                }
                done(format!("Spent {}, {} left", amount, store.coins()));
            }
        }
        Ok(())
    }
}

/// Submit a score; keeps the best one
#[derive(Parser, Debug)]
pub struct Score {
    score: u64,

    /// Overwrite the high score even if lower
    #[arg(long)]
    force: bool,
}

impl Score {
    pub fn execute(self, store: &SaveDataStore) -> Result<()> {
        if self.force {
            store.set_high_score(self.score);
            done(format!("High score set to {}", self.score));
        } else if store.submit_score(self.score) {
            done(format!("New high score: {}", self.score));
        } else {
            println!(
                "{} {} does not beat {}",
                style("·").dim(),
                self.score,
                store.high_score()
            );
        }
        Ok(())
    }
}

/// Set an upgrade level
#[derive(Parser, Debug)]
pub struct Upgrade {
    /// Upgrade track (Magnet, Shield, DoubleCoins, ExtraLife, SpeedBoost)
    kind: UpgradeKind,

    /// New level; 0 removes the upgrade
    level: u32,
}

impl Upgrade {
    pub fn execute(self, store: &SaveDataStore) -> Result<()> {
        store.set_upgrade_level(self.kind, self.level);
        done(format!("{} set to level {}", self.kind, self.level));
        Ok(())
    }
}

/// Set music and effects volume
#[derive(Parser, Debug)]
pub struct Volume {
    /// Music volume in [0, 1]
    #[arg(long)]
    music: Option<f32>,

    /// Effects volume in [0, 1]
    #[arg(long)]
    effects: Option<f32>,
}

impl Volume {
    pub fn execute(self, store: &SaveDataStore) -> Result<()> {
        if self.music.is_none() && self.effects.is_none() {
            bail!("Pass --music and/or --effects");
        }
        if let Some(volume) = self.music {
            store.set_music_volume(volume);
        }
        if let Some(volume) = self.effects {
            store.set_effects_volume(volume);
        }
        done(format!(
            "Volume: music {:.2}, effects {:.2}",
            store.music_volume(),
            store.effects_volume()
        ));
        Ok(())
    }
}

/// Set the language code
#[derive(Parser, Debug)]
pub struct Language {
    /// ISO language code, e.g. "en" or "fr"
    code: String,
}

impl Language {
    pub fn execute(self, store: &SaveDataStore) -> Result<()> {
        if self.code.trim().is_empty() {
            bail!("Language code must not be empty");
        }
        store.set_language(&self.code);
        done(format!("Language set to {}", store.language()));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

/// Toggle hardcore mode
#[derive(Parser, Debug)]
pub struct Hardcore {
    #[arg(value_enum)]
    state: Toggle,
}

impl Hardcore {
    pub fn execute(self, store: &SaveDataStore) -> Result<()> {
        let enabled = matches!(self.state, Toggle::On);
        store.set_hardcore_mode(enabled);
        done(format!("Hardcore mode {}", if enabled { "on" } else { "off" }));
        Ok(())
    }
}
