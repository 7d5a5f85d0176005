use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::colors::{colorize_level, colorize_threshold};
use super::level::LogLevel;
use super::perf::PerfCounter;

/// Ambient request information attached to emitted records.
///
/// Carried by the request context; holds the database tag, the request's
/// performance counter and free-form metadata (request id, user id, ...).
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub db_name: Option<String>,
    pub perf: Option<Arc<PerfCounter>>,
    pub metadata: Map<String, Value>,
}

impl LogContext {
    pub fn with_db(db_name: impl Into<String>) -> Self {
        Self {
            db_name: Some(db_name.into()),
            ..Self::default()
        }
    }
}

/// One log emission. Immutable after creation; consumed by every sink.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub logger: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub function: String,
    pub pid: u32,
    pub db_name: Option<String>,
    pub perf_info: Option<String>,
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    pub fn new(
        level: LogLevel,
        logger: &str,
        message: String,
        file: &str,
        line: u32,
        ctx: Option<&LogContext>,
    ) -> Self {
        let (db_name, perf_info, metadata) = match ctx {
            Some(ctx) => {
                let perf_info = ctx.perf.as_ref().map(|perf| {
                    if super::colors::color_enabled() {
                        perf.footprint_colored()
                    } else {
                        perf.footprint()
                    }
                });
                (ctx.db_name.clone(), perf_info, ctx.metadata.clone())
            }
            None => (None, None, Map::new()),
        };

        Self {
            timestamp: Local::now(),
            level,
            logger: logger.to_string(),
            message,
            file: file.to_string(),
            line,
            function: logger.to_string(),
            pid: std::process::id(),
            db_name,
            perf_info,
            metadata,
        }
    }
}

/// Format a record with the fixed field order:
/// `YYYY-MM-DD HH:MM:SS,mmm PID LEVEL DB LOGGER: MESSAGE PERF`.
///
/// A missing database renders as `?`; a missing perf footprint as `- - -`.
pub fn format_record(record: &LogRecord) -> String {
    format!(
        "{} {} {} {} {}: {} {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
        record.pid,
        record.level,
        record.db_name.as_deref().unwrap_or("?"),
        record.logger,
        record.message,
        record.perf_info.as_deref().unwrap_or("- - -"),
    )
}

/// Colored variant of [`format_record`]; only the level token is wrapped.
pub fn format_record_colored(record: &LogRecord) -> String {
    format!(
        "{} {} {} {} {}: {} {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
        record.pid,
        colorize_level(record.level),
        record.db_name.as_deref().unwrap_or("?"),
        record.logger,
        record.message,
        record.perf_info.as_deref().unwrap_or("- - -"),
    )
}

/// Color the three perf tokens by their alert thresholds.
pub fn colorize_footprint(count: u64, query_seconds: f64, other_seconds: f64) -> String {
    format!(
        "{} {} {}",
        colorize_threshold(count as f64, &count.to_string(), 100.0, 1000.0),
        colorize_threshold(query_seconds, &format!("{:.3}", query_seconds), 0.1, 3.0),
        colorize_threshold(other_seconds, &format!("{:.3}", other_seconds), 1.0, 5.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(db: Option<&str>, perf: Option<&str>) -> LogRecord {
        LogRecord {
            timestamp: Local::now(),
            level: LogLevel::Info,
            logger: "goodoo.http".to_string(),
            message: "GET /session - 200".to_string(),
            file: "src/handlers/session.rs".to_string(),
            line: 42,
            function: "goodoo.http".to_string(),
            pid: 4242,
            db_name: db.map(str::to_string),
            perf_info: perf.map(str::to_string),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_format_with_db_and_perf() {
        let line = format_record(&record(Some("prod"), Some("3 0.120 0.440")));
        assert!(line.contains(" 4242 INFO prod goodoo.http: GET /session - 200 3 0.120 0.440"));
    }

    #[test]
    fn test_missing_db_renders_question_mark() {
        let line = format_record(&record(None, Some("1 0.001 0.002")));
        assert!(line.contains(" INFO ? goodoo.http: "));
    }

    #[test]
    fn test_missing_perf_renders_dashes() {
        let line = format_record(&record(Some("prod"), None));
        assert!(line.ends_with("- - -"));
    }

    #[test]
    fn test_timestamp_millisecond_format() {
        let line = format_record(&record(None, None));
        // "2024-01-02 03:04:05,678 ..." - comma-separated milliseconds
        let stamp = &line[..23];
        assert_eq!(stamp.as_bytes()[19], b',');
        assert!(stamp[20..23].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_record_picks_context_fields() {
        let mut ctx = LogContext::with_db("tenant1");
        ctx.metadata
            .insert("request_id".to_string(), Value::String("r-1".to_string()));

        let record = LogRecord::new(LogLevel::Warning, "goodoo.api", "boom".to_string(), "f.rs", 7, Some(&ctx));
        assert_eq!(record.db_name.as_deref(), Some("tenant1"));
        assert_eq!(record.metadata["request_id"], "r-1");
        assert!(record.perf_info.is_none());
    }
}
