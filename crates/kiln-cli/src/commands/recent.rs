//! Recent command - list or clear recently hosted units.

use colored::Colorize;

use crate::history::RecentHistory;
use crate::theme::Theme;

/// Print recently opened unit roots, most recent first.
pub(crate) fn list_recent(history: &RecentHistory) -> anyhow::Result<()> {
    let entries = history.entries()?;

    if entries.is_empty() {
        println!("{}", Theme::info("No recent units"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Recent Units"));
    println!("{:>3} {:>16} {}", "#".dimmed(), "OPENED".dimmed(), "PATH".dimmed());
    println!("{}", Theme::separator());

    for (idx, entry) in entries.iter().enumerate() {
        let path = entry.path.display().to_string();
        let path = if entry.path.is_dir() {
            path
        } else {
            format!("{} {}", path.dimmed(), "(missing)".yellow())
        };
        println!(
            "{:>3} {:>16} {}",
            idx.saturating_add(1),
            Theme::timestamp(&entry.last_opened),
            path
        );
    }

    println!();
    Ok(())
}

/// Forget every recent unit.
pub(crate) fn clear_recent(history: &RecentHistory) -> anyhow::Result<()> {
    history.clear()?;
    println!(
        "{}",
        Theme::success(&format!("Cleared {}", history.path().display()))
    );
    Ok(())
}
