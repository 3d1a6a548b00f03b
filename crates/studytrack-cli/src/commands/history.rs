use clap::Subcommand;
use studytrack_core::Database;

use super::print_json;

#[derive(Subcommand)]
pub enum HistoryAction {
    /// Acknowledged and lost seconds across all sessions
    Totals,
}

pub fn run(action: Option<HistoryAction>, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        None => print_json(&db.recent_sessions(limit)?)?,
        Some(HistoryAction::Totals) => print_json(&db.totals()?)?,
    }
    Ok(())
}
