use serde::{Deserialize, Serialize};

/// Server settings, resolved from the process environment.
///
/// The struct is flat so every recognised environment variable maps directly
/// to a field: `LOG_LEVEL` -> `log_level`, `DB_HOST` -> `db_host`, and so on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    pub log_level: String,
    pub log_file: String,
    pub log_db: String,
    pub log_db_level: String,
    pub syslog: String,
    /// Comma-separated `logger:LEVEL` overrides
    pub log_handler: String,

    pub session_dir: String,
    pub session_cookie: String,

    pub default_db: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_sslmode: String,
    pub db_maxconn: u32,
    /// Application tag; `{pid}` placeholder substituted, truncated to 63 chars
    pub pgappname: String,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let config = config::Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("log_level", "info")?
        .set_default("log_file", "")?
        .set_default("log_db", "")?
        .set_default("log_db_level", "warning")?
        .set_default("syslog", "")?
        .set_default("log_handler", "")?
        .set_default("session_dir", "./sessions")?
        .set_default("session_cookie", "goodoo_session")?
        .set_default("default_db", "")?
        .set_default("db_host", "localhost")?
        .set_default("db_port", 5432)?
        .set_default("db_user", "postgres")?
        .set_default("db_password", "")?
        .set_default("db_name", "")?
        .set_default("db_sslmode", "prefer")?
        .set_default("db_maxconn", 64)?
        .set_default("pgappname", "goodoo-{pid}")?
        .add_source(config::Environment::default())
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &Settings) -> anyhow::Result<()> {
    if settings.port == 0 {
        anyhow::bail!("PORT must be a positive TCP port");
    }

    if settings.db_maxconn == 0 {
        anyhow::bail!("DB_MAXCONN must be positive");
    }

    if !settings.log_level.is_empty()
        && !crate::logging::is_valid_level_name(&settings.log_level)
        && !crate::logging::is_pseudo_level(&settings.log_level)
    {
        anyhow::bail!("LOG_LEVEL '{}' is not a recognised level", settings.log_level);
    }

    Ok(())
}

impl Settings {
    /// Truthy-string interpretation used for flag-style variables
    pub fn syslog_enabled(&self) -> bool {
        matches!(self.syslog.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    }

    /// LOG_HANDLER entries, split and trimmed; empty entries dropped
    pub fn log_handler_entries(&self) -> Vec<String> {
        self.log_handler
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_settings() -> Settings {
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

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut settings = test_settings();
        settings.port = 0;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut settings = test_settings();
        settings.log_level = "loud".to_string();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_pseudo_levels_accepted() {
        let mut settings = test_settings();
        settings.log_level = "debug_sql".to_string();
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_syslog_enabled_parsing() {
        let mut settings = test_settings();
        for value in ["1", "true", "YES", "on"] {
            settings.syslog = value.to_string();
            assert!(settings.syslog_enabled(), "{value} should enable syslog");
        }
        settings.syslog = "0".to_string();
        assert!(!settings.syslog_enabled());
    }

    #[test]
    fn test_log_handler_entries_trimmed() {
        let mut settings = test_settings();
        settings.log_handler = "myapp.sql:DEBUG, myapp:WARNING ,,:INFO".to_string();
        assert_eq!(
            settings.log_handler_entries(),
            vec!["myapp.sql:DEBUG", "myapp:WARNING", ":INFO"]
        );
    }
}
