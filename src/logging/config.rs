use super::level::{parse_level, LogLevel, LoggerLevels};
use crate::config::Settings;

/// Logging configuration distilled from the environment settings.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub level: String,
    pub file: String,
    pub db: String,
    pub db_level: String,
    pub syslog: bool,
    pub handlers: Vec<String>,
}

impl LogConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            level: settings.log_level.clone(),
            file: settings.log_file.clone(),
            db: settings.log_db.clone(),
            db_level: settings.log_db_level.clone(),
            syslog: settings.syslog_enabled(),
            handlers: settings.log_handler_entries(),
        }
    }

    /// Full configuration list: defaults, then the LOG_LEVEL pseudo-config
    /// expansion, then explicit LOG_HANDLER entries. Later entries win.
    pub fn configurations(&self) -> Vec<String> {
        let mut entries: Vec<String> = DEFAULT_CONFIGURATION.iter().map(|s| s.to_string()).collect();
        entries.extend(pseudo_configuration(&self.level).iter().map(|s| s.to_string()));
        entries.extend(self.handlers.iter().cloned());
        entries
    }

    pub fn logger_levels(&self) -> LoggerLevels {
        let mut levels = LoggerLevels::new();
        for entry in self.configurations() {
            if let Some((name, level)) = parse_handler_entry(&entry) {
                levels.set(&name, level);
            }
        }
        levels
    }

    pub fn db_min_level(&self) -> LogLevel {
        if self.db_level.is_empty() {
            LogLevel::Warning
        } else {
            parse_level(&self.db_level)
        }
    }
}

/// Baseline per-logger configuration applied before any override.
const DEFAULT_CONFIGURATION: &[&str] = &[
    "goodoo.http.rpc.request:INFO",
    "goodoo.http.rpc.response:INFO",
    ":INFO",
];

/// Expansion of shorthand LOG_LEVEL values into per-logger overrides.
fn pseudo_configuration(level: &str) -> &'static [&'static str] {
    match level {
        "debug_rpc_answer" => &["goodoo:DEBUG", "goodoo.sql_db:INFO", "goodoo.http.rpc:DEBUG"],
        "debug_rpc" => &["goodoo:DEBUG", "goodoo.sql_db:INFO", "goodoo.http.rpc.request:DEBUG"],
        "debug" => &["goodoo:DEBUG", "goodoo.sql_db:INFO"],
        "debug_sql" => &["goodoo.sql_db:DEBUG"],
        "warn" | "warning" => &["goodoo:WARNING"],
        "error" => &["goodoo:ERROR"],
        "critical" => &["goodoo:CRITICAL"],
        _ => &[],
    }
}

/// Whether `level` is one of the LOG_LEVEL shorthands rather than a plain
/// level name.
pub fn is_pseudo_level(level: &str) -> bool {
    matches!(
        level,
        "debug_rpc_answer" | "debug_rpc" | "debug" | "debug_sql" | "info" | "warn" | "error" | "critical"
    )
}

/// Parse one `logger:LEVEL` override. The logger part may be empty (root).
/// Malformed entries yield `None`.
pub fn parse_handler_entry(entry: &str) -> Option<(String, LogLevel)> {
    let trimmed = entry.trim();
    let (name, level) = trimmed.split_once(':')?;
    if level.trim().is_empty() {
        return None;
    }
    Some((name.trim().to_string(), parse_level(level)))
}
