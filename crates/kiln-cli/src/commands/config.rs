//! Config command - inspect the resolved configuration.

use std::path::Path;

use kiln_config::loader::{CONFIG_DIR, CONFIG_FILE, kiln_home};
use kiln_config::{Config, ShowFormat};

use crate::theme::Theme;

/// Print the merged configuration for `workspace`.
pub(crate) fn show_config(workspace: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let Some(format) = ShowFormat::parse(format) else {
        anyhow::bail!("unknown format '{format}'; expected toml or json");
    };
    let resolved = Config::load(workspace)?;
    println!("{}", resolved.render(format)?);
    Ok(())
}

/// Print which config files are consulted and whether they exist.
pub(crate) fn show_paths(workspace: Option<&Path>) -> anyhow::Result<()> {
    println!("\n{}", Theme::header("Config Files"));
    let mut candidates = vec![("user", kiln_home()?.join(CONFIG_FILE))];
    if let Some(root) = workspace {
        candidates.push(("workspace", root.join(CONFIG_DIR).join(CONFIG_FILE)));
    }
    for (layer, path) in candidates {
        let line = format!("{layer:<10} {}", path.display());
        if path.is_file() {
            println!("{}", Theme::success(&line));
        } else {
            println!("{}", Theme::dimmed(&format!("  {line} (not found)")));
        }
    }
    println!();
    Ok(())
}
