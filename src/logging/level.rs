use std::collections::HashMap;
use std::fmt;

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Parse a level name, case-insensitively. Unknown names and `notset`
/// resolve to INFO.
pub fn parse_level(name: &str) -> LogLevel {
    match name.trim().to_lowercase().as_str() {
        "debug" => LogLevel::Debug,
        "info" | "notset" | "" => LogLevel::Info,
        "warn" | "warning" => LogLevel::Warning,
        "error" => LogLevel::Error,
        "critical" | "crit" => LogLevel::Critical,
        _ => LogLevel::Info,
    }
}

/// Whether `name` is one of the recognised level spellings.
pub fn is_valid_level_name(name: &str) -> bool {
    matches!(
        name.trim().to_lowercase().as_str(),
        "notset" | "debug" | "info" | "warn" | "warning" | "error" | "critical" | "crit"
    )
}

/// Configured minimum levels per dotted logger prefix.
///
/// The empty name is the root. Lookup walks from the exact name through
/// progressively shorter dotted prefixes, then the root; unresolved names
/// default to INFO.
#[derive(Debug, Clone, Default)]
pub struct LoggerLevels {
    levels: HashMap<String, LogLevel>,
}

impl LoggerLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, level: LogLevel) {
        self.levels.insert(name.to_string(), level);
    }

    pub fn get(&self, name: &str) -> Option<LogLevel> {
        self.levels.get(name).copied()
    }

    /// Resolve the effective level for a dotted logger name.
    pub fn resolve(&self, name: &str) -> LogLevel {
        if let Some(level) = self.levels.get(name) {
            return *level;
        }

        let parts: Vec<&str> = name.split('.').collect();
        for end in (1..parts.len()).rev() {
            let prefix = parts[..end].join(".");
            if let Some(level) = self.levels.get(&prefix) {
                return *level;
            }
        }

        if let Some(level) = self.levels.get("") {
            return *level;
        }

        LogLevel::Info
    }

    /// Whether a message at `level` from `name` should be emitted.
    pub fn should_log(&self, name: &str, level: LogLevel) -> bool {
        level >= self.resolve(name)
    }
}
