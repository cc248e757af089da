//! Client commands

mod edit;
mod show;
mod verify;

pub use edit::{Coins, Hardcore, Language, Score, Upgrade, Volume};
pub use show::Show;
pub use verify::Verify;

use console::style;
use save_engine::FlushOutcome;

/// Tell the user whether their change reached the disk.
pub fn report_flush(outcome: &FlushOutcome) {
    match outcome {
        FlushOutcome::Flushed => {}
        FlushOutcome::TimedOut => eprintln!(
            "{} Save is still being written in the background",
            style("!").yellow().bold()
        ),
        FlushOutcome::Failed(e) => eprintln!(
            "{} Save could not be written: {}",
            style("✗").red().bold(),
            e
        ),
    }
}
