//! libSQL storage layer for RepoTutor (local, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the response cache
//! and the run history. [`ResponseCache`] is the fingerprint-keyed view used by
//! the generation gateway.

mod cache;
mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use repotutor_shared::{RepoTutorError, Result};

pub use cache::{CACHE_DB_NAME, ResponseCache};

/// A row from the `runs` table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunRecord {
    pub id: String,
    pub name: String,
    pub source: String,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: libsql::Error) -> RepoTutorError {
    RepoTutorError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RepoTutorError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode (used by `cache stats`).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RepoTutorError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RepoTutorError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Response cache operations
    // -----------------------------------------------------------------------

    /// Look up a cached response by fingerprint.
    pub async fn get_response(&self, fingerprint: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT response FROM response_cache WHERE fingerprint = ?1",
                params![fingerprint],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Store a response (upserts, last write wins).
    pub async fn put_response(&self, fingerprint: &str, model_id: &str, response: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO response_cache (fingerprint, model_id, response, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                   model_id = excluded.model_id,
                   response = excluded.response,
                   created_at = excluded.created_at",
                params![fingerprint, model_id, response, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Delete every cached response. Returns the number of rows removed.
    pub async fn clear_responses(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM response_cache", params![])
            .await
            .map_err(storage_err)
    }

    /// Count cached responses.
    pub async fn count_responses(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM response_cache", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline run.
    pub async fn insert_run(&self, id: &str, name: &str, source: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, name, source, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, source, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run finished with its stats.
    pub async fn finish_run(&self, id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, source, started_at, finished_at FROM runs
                 ORDER BY id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RunRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                name: row.get::<String>(1).map_err(storage_err)?,
                source: row.get::<String>(2).map_err(storage_err)?,
                started_at: row.get::<String>(3).map_err(storage_err)?,
                finished_at: row.get::<Option<String>>(4).map_err(storage_err)?,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("rt_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("rt_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn response_upsert_is_last_write_wins() {
        let storage = test_storage().await;
        assert!(storage.get_response("fp1").await.unwrap().is_none());

        storage.put_response("fp1", "m", "first").await.unwrap();
        storage.put_response("fp1", "m", "second").await.unwrap();

        assert_eq!(
            storage.get_response("fp1").await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(storage.count_responses().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let storage = test_storage().await;
        storage.put_response("a", "m", "1").await.unwrap();
        storage.put_response("b", "m", "2").await.unwrap();

        assert_eq!(storage.clear_responses().await.unwrap(), 2);
        assert_eq!(storage.count_responses().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;
        let id = Uuid::now_v7().to_string();
        storage.insert_run(&id, "demo", "/tmp/demo").await.unwrap();

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_none());

        storage.finish_run(&id, r#"{"chapters":3}"#).await.unwrap();
        let runs = storage.list_runs(10).await.unwrap();
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("rt_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.put_response("fp", "m", "r").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.get_response("fp").await.unwrap().as_deref(), Some("r"));
        let result = ro.put_response("fp2", "m", "r").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
