//! Install history storage.
//!
//! History is append-only: events are inserted and never updated or
//! deleted. [`SqliteInstallLog`] keeps it in a local database;
//! [`BusInstallLog`] forwards it to a store service.

use async_trait::async_trait;
use serde_json::Value;
use skill_core::events::InstallEvent;
use skill_core::protocol::StoreMessage;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::bus::{Bus, BusError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store service error: {0}")]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Append-only sink for install history.
#[async_trait]
pub trait InstallLog: Send + Sync {
    async fn record(&self, event: &InstallEvent) -> Result<()>;
}

/// SQLite-backed install history.
#[derive(Debug)]
pub struct SqliteInstallLog {
    pool: Pool<Sqlite>,
}

impl SqliteInstallLog {
    /// Open (or create) the database at `db_path`.
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Run embedded migrations.
    pub async fn migrate_embedded(&self) -> Result<()> {
        let migrations = [include_str!("../../../migrations/0001_init.sql")];

        for migration_sql in migrations {
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");

            for statement in cleaned.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    sqlx::query(trimmed).execute(&self.pool).await?;
                }
            }
        }
        Ok(())
    }

    /// All events in insertion order.
    pub async fn list_events(&self) -> Result<Vec<InstallEvent>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload_json FROM install_events ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(StorageError::from))
            .collect()
    }
}

#[async_trait]
impl InstallLog for SqliteInstallLog {
    async fn record(&self, event: &InstallEvent) -> Result<()> {
        let subject = match event {
            InstallEvent::SkillInstalled(record) => record.package.as_str(),
            InstallEvent::SkillUninstalled(payload) => payload.name.as_str(),
        };
        let payload_json = serde_json::to_string(event)?;

        sqlx::query(
            r#"
            INSERT INTO install_events (id, event_type, subject, payload_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(event.id().as_ref())
        .bind(event.event_type().as_str())
        .bind(subject)
        .bind(payload_json)
        .bind(event.timestamp().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Forwards install history to the store service as `record` requests.
pub struct BusInstallLog {
    bus: Arc<dyn Bus>,
    service_key: String,
}

impl std::fmt::Debug for BusInstallLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInstallLog")
            .field("service_key", &self.service_key)
            .finish_non_exhaustive()
    }
}

impl BusInstallLog {
    pub fn new(bus: Arc<dyn Bus>, service_key: impl Into<String>) -> Self {
        Self {
            bus,
            service_key: service_key.into(),
        }
    }
}

#[async_trait]
impl InstallLog for BusInstallLog {
    async fn record(&self, event: &InstallEvent) -> Result<()> {
        let message: Value = serde_json::to_value(StoreMessage::Record {
            event: event.clone(),
        })?;
        self.bus.request(&self.service_key, message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBus;
    use skill_core::events::SkillUninstalledPayload;
    use skill_core::InstalledRecord;
    use tempfile::TempDir;

    async fn create_test_log() -> (SqliteInstallLog, TempDir) {
        let dir = TempDir::new().unwrap();
        let log = SqliteInstallLog::new(&dir.path().join("history.db"))
            .await
            .unwrap();
        log.migrate_embedded().await.unwrap();
        (log, dir)
    }

    #[tokio::test]
    async fn records_are_appended_in_order() {
        let (log, _dir) = create_test_log().await;
        let first = InstallEvent::SkillInstalled(InstalledRecord::new(
            "acme/greeter",
            "/skills/acme-greeter",
        ));
        let second = InstallEvent::SkillUninstalled(SkillUninstalledPayload::new("acme-greeter"));

        log.record(&first).await.unwrap();
        log.record(&second).await.unwrap();

        let events = log.list_events().await.unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[tokio::test]
    async fn same_package_can_be_recorded_twice() {
        let (log, _dir) = create_test_log().await;
        for _ in 0..2 {
            let event = InstallEvent::SkillInstalled(InstalledRecord::new(
                "acme/greeter",
                "/skills/acme-greeter",
            ));
            log.record(&event).await.unwrap();
        }
        assert_eq!(log.list_events().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected() {
        let (log, _dir) = create_test_log().await;
        let event = InstallEvent::SkillInstalled(InstalledRecord::new("a", "/skills/a"));
        log.record(&event).await.unwrap();
        assert!(matches!(
            log.record(&event).await,
            Err(StorageError::Database(_))
        ));
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (log, _dir) = create_test_log().await;
        log.migrate_embedded().await.unwrap();
    }

    #[tokio::test]
    async fn bus_log_sends_record_to_store() {
        let bus = Arc::new(RecordingBus::default());
        let log = BusInstallLog::new(Arc::clone(&bus) as _, "store-svc");
        let event = InstallEvent::SkillInstalled(InstalledRecord::new("a/b", "/skills/a-b"));

        log.record(&event).await.unwrap();

        let sent = bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "store-svc");
        assert_eq!(sent[0].1["type"], "record");
        assert_eq!(sent[0].1["event"]["data"]["package"], "a/b");
    }

    #[tokio::test]
    async fn bus_log_surfaces_failures() {
        let bus = Arc::new(RecordingBus::default());
        bus.fail_service("store-svc");
        let log = BusInstallLog::new(bus, "store-svc");
        let event = InstallEvent::SkillInstalled(InstalledRecord::new("a/b", "/skills/a-b"));
        assert!(matches!(
            log.record(&event).await,
            Err(StorageError::Bus(_))
        ));
    }
}
