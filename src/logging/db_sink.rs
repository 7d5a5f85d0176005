//! Database sink: one `ir_logging` row per record.
//!
//! Emission is non-blocking: records are handed to a background task over an
//! unbounded channel and inserted with a 1-second statement timeout. When the
//! optional `metadata` column is absent (detected once at construction) the
//! sink degrades to the fixed-schema insert.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;

use super::level::LogLevel;
use super::record::LogRecord;
use super::sink::Sink;
use crate::db::ConnectionConfig;

/// Row shape sent to the writer task.
#[derive(Debug)]
struct LogRow {
    dbname: String,
    name: String,
    level: String,
    message: String,
    path: String,
    line: i32,
    func: String,
    metadata: Option<serde_json::Value>,
}

pub struct DatabaseSink {
    tx: mpsc::UnboundedSender<LogRow>,
    min_level: LogLevel,
    default_dbname: String,
}

impl DatabaseSink {
    /// Connect and spawn the writer task.
    ///
    /// Accepts a full connection configuration (DSN-capable) rather than
    /// composing one from the database name.
    pub async fn connect(config: &ConnectionConfig, min_level: LogLevel) -> Result<Self> {
        let options = config.to_pg_options()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .context("couldn't connect the log database sink")?;

        let supports_metadata = detect_metadata_column(&pool).await;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(pool, rx, supports_metadata));

        Ok(Self {
            tx,
            min_level,
            default_dbname: config.database.clone(),
        })
    }
}

impl Sink for DatabaseSink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.min_level {
            return Ok(());
        }

        let metadata = if record.metadata.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(record.metadata.clone()))
        };

        let row = LogRow {
            dbname: record
                .db_name
                .clone()
                .unwrap_or_else(|| self.default_dbname.clone()),
            name: record.logger.clone(),
            level: record.level.to_string(),
            message: record.message.clone(),
            path: record.file.clone(),
            line: record.line as i32,
            func: record.function.clone(),
            metadata,
        };

        // Channel-closed means the writer task died; surface it once to the
        // caller, which reports sink errors to stderr.
        self.tx
            .send(row)
            .map_err(|_| anyhow::anyhow!("log database writer task is gone"))
    }
}

async fn detect_metadata_column(pool: &PgPool) -> bool {
    let row: Result<Option<(i32,)>, sqlx::Error> = sqlx::query_as(
        "SELECT 1 FROM information_schema.columns \
         WHERE table_name = 'ir_logging' AND column_name = 'metadata'",
    )
    .fetch_optional(pool)
    .await;

    matches!(row, Ok(Some(_)))
}

async fn writer_task(pool: PgPool, mut rx: mpsc::UnboundedReceiver<LogRow>, supports_metadata: bool) {
    while let Some(row) = rx.recv().await {
        if let Err(err) = insert_row(&pool, &row, supports_metadata).await {
            eprintln!("Logging error: ir_logging insert failed: {}", err);
        }
    }
}

async fn insert_row(pool: &PgPool, row: &LogRow, supports_metadata: bool) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Keep a stuck insert from wedging the writer task.
    sqlx::query("SET LOCAL statement_timeout = 1000")
        .execute(&mut *tx)
        .await?;

    if supports_metadata {
        sqlx::query(
            "INSERT INTO ir_logging \
             (create_date, type, dbname, name, level, message, path, line, func, metadata) \
             VALUES (NOW() AT TIME ZONE 'UTC', 'server', $1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&row.dbname)
        .bind(&row.name)
        .bind(&row.level)
        .bind(&row.message)
        .bind(&row.path)
        .bind(row.line)
        .bind(&row.func)
        .bind(&row.metadata)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO ir_logging \
             (create_date, type, dbname, name, level, message, path, line, func) \
             VALUES (NOW() AT TIME ZONE 'UTC', 'server', $1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&row.dbname)
        .bind(&row.name)
        .bind(&row.level)
        .bind(&row.message)
        .bind(&row.path)
        .bind(row.line)
        .bind(&row.func)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
