//! CLI theme and styling.

use colored::Colorize;

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✔".green(), text)
    }

    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✖".red(), text.red())
    }

    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "⚠".yellow(), text.yellow())
    }

    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a pipeline checkpoint, e.g. `[ 40%] Checking syntax...`.
    pub(crate) fn progress(percent: u8, message: &str) -> String {
        format!("{} {}", format!("[{percent:>3}%]").dimmed(), message)
    }

    /// Format a multi-line diagnostic; continuation lines are indented.
    pub(crate) fn diagnostic(text: &str) -> String {
        let mut lines = text.lines();
        let first = lines.next().unwrap_or_default();
        let mut out = Self::error(first);
        for line in lines {
            out.push('\n');
            out.push_str(&format!("    {}", line.dimmed()));
        }
        out
    }

    pub(crate) fn separator() -> String {
        "━".repeat(50).dimmed().to_string()
    }

    pub(crate) fn timestamp(dt: &chrono::DateTime<chrono::Utc>) -> String {
        dt.format("%Y-%m-%d %H:%M").to_string().dimmed().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_indents_source_line() {
        colored::control::set_override(false);
        let text = Theme::diagnostic("[SYNTAX] w.wat:3:5 → unexpected token\n→   (func $f");
        assert_eq!(text, "✖ [SYNTAX] w.wat:3:5 → unexpected token\n    →   (func $f");
    }

    #[test]
    fn test_progress_pads_percent() {
        colored::control::set_override(false);
        assert_eq!(Theme::progress(45, "Static analysis..."), "[ 45%] Static analysis...");
    }
}
