//! Hierarchical, context-aware logging with per-request performance
//! accounting.
//!
//! Dotted-name loggers resolve their minimum level by prefix inheritance;
//! records flow through pluggable sinks (stream, file, syslog-style,
//! database). A request-scoped [`PerfCounter`] contributes the
//! `count query_seconds other_seconds` footprint to every line emitted
//! while the request is active.

pub mod colors;
pub mod config;
pub mod db_sink;
pub mod level;
pub mod logger;
pub mod perf;
pub mod record;
pub mod sink;

pub use config::{is_pseudo_level, LogConfig};
pub use db_sink::DatabaseSink;
pub use level::{is_valid_level_name, parse_level, LogLevel, LoggerLevels};
pub use logger::{Logger, LoggerRegistry};
pub use perf::{track_query, PerfCounter};
pub use record::{LogContext, LogRecord};
pub use sink::{FileSink, Sink, StreamSink, SyslogSink};

use crate::config::Settings;
use crate::db::ConnectionConfig;
use std::sync::Arc;

/// Build the logger registry from settings and attach the configured sinks.
///
/// Sink selection mirrors the environment surface: SYSLOG takes precedence,
/// then LOG_FILE (falling back to stderr if the file can't be opened), then
/// plain stderr. LOG_DB additionally attaches the database sink; a failure
/// there logs one warning and the server continues without it.
pub async fn init_logging(settings: &Settings) -> LoggerRegistry {
    let log_config = LogConfig::from_settings(settings);
    let registry = LoggerRegistry::new(log_config.logger_levels());

    if log_config.syslog {
        registry.add_sink(Arc::new(SyslogSink::new()));
    } else if !log_config.file.is_empty() {
        match FileSink::open(&log_config.file) {
            Ok(sink) => registry.add_sink(Arc::new(sink)),
            Err(err) => {
                eprintln!("ERROR: couldn't create the logfile, logging to stderr: {}", err);
                registry.add_sink(Arc::new(StreamSink::new(std::io::stderr())));
            }
        }
    } else {
        registry.add_sink(Arc::new(StreamSink::new(std::io::stderr())));
    }

    if !log_config.db.is_empty() {
        let mut sink_config = ConnectionConfig::from_env_defaults(settings);
        sink_config.database = log_config.db.clone();

        match DatabaseSink::connect(&sink_config, log_config.db_min_level()).await {
            Ok(sink) => registry.add_sink(Arc::new(sink)),
            Err(err) => {
                registry
                    .logger("goodoo.logging")
                    .warning(format!("log database sink disabled: {}", err));
            }
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn base_settings() -> Settings {
        Settings {
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_file: String::new(),
            log_db: String::new(),
            log_db_level: "warning".to_string(),
            syslog: String::new(),
            log_handler: String::new(),
            session_dir: "./sessions".to_string(),
            session_cookie: "goodoo_session".to_string(),
            default_db: String::new(),
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_user: "postgres".to_string(),
            db_password: String::new(),
            db_name: String::new(),
            db_sslmode: "prefer".to_string(),
            db_maxconn: 64,
            pgappname: "goodoo-{pid}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_init_attaches_stream_sink() {
        let registry = init_logging(&base_settings()).await;
        assert_eq!(registry.sink_count(), 1);
    }

    #[tokio::test]
    async fn test_init_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = base_settings();
        settings.log_file = dir.path().join("goodoo.log").display().to_string();

        let registry = init_logging(&settings).await;
        assert_eq!(registry.sink_count(), 1);

        registry.logger("goodoo").info("to file");
        registry.close();

        let contents = std::fs::read_to_string(dir.path().join("goodoo.log")).unwrap();
        assert!(contents.contains("to file"));
    }

    #[tokio::test]
    async fn test_log_handler_env_shape_end_to_end() {
        let mut settings = base_settings();
        settings.log_handler = "myapp.sql:DEBUG,myapp:WARNING,:INFO".to_string();

        let registry = init_logging(&settings).await;
        assert_eq!(registry.effective_level("myapp.sql.driver"), LogLevel::Debug);
        assert_eq!(registry.effective_level("myapp.http"), LogLevel::Warning);
        assert_eq!(registry.effective_level("other"), LogLevel::Info);
    }
}
