use colored::Colorize;
use std::io::IsTerminal;

use super::level::LogLevel;

/// Whether colored output should be produced: either stdout is a terminal
/// or the environment opts in explicitly.
pub fn color_enabled() -> bool {
    if std::env::var_os("GOODOO_COLORS").is_some() {
        return true;
    }
    std::io::stdout().is_terminal()
}

/// Wrap a level name in its SGR color.
pub fn colorize_level(level: LogLevel) -> String {
    let name = level.to_string();
    match level {
        LogLevel::Debug => name.blue().to_string(),
        LogLevel::Info => name.green().to_string(),
        LogLevel::Warning => name.yellow().to_string(),
        LogLevel::Error => name.red().to_string(),
        LogLevel::Critical => name.white().on_red().to_string(),
    }
}

/// Color a numeric token by threshold: red above `high`, yellow above `low`,
/// plain otherwise.
pub fn colorize_threshold(value: f64, formatted: &str, low: f64, high: f64) -> String {
    if value > high {
        formatted.red().to_string()
    } else if value > low {
        formatted.yellow().to_string()
    } else {
        formatted.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colorize_threshold_bands() {
        colored::control::set_override(true);

        let plain = colorize_threshold(0.05, "0.050", 0.1, 3.0);
        let warm = colorize_threshold(0.5, "0.500", 0.1, 3.0);
        let hot = colorize_threshold(4.0, "4.000", 0.1, 3.0);

        assert_eq!(plain, "0.050");
        assert!(warm.contains("0.500") && warm != "0.500");
        assert!(hot.contains("4.000") && hot != "4.000");
        assert_ne!(warm, hot);

        colored::control::unset_override();
    }

    #[test]
    fn test_colorize_level_distinct() {
        colored::control::set_override(true);

        let info = colorize_level(LogLevel::Info);
        let error = colorize_level(LogLevel::Error);
        assert!(info.contains("INFO"));
        assert!(error.contains("ERROR"));
        assert_ne!(info, error);

        colored::control::unset_override();
    }
}
