//! SQLite state backend implementation

use crate::{Snapshot, StateBackend};
use async_trait::async_trait;
use atlas_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, trace};

const KIND_SERVICE: &str = "service";
const KIND_EDGE: &str = "edge";
const KIND_ROUTE: &str = "route";

fn storage_err(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

/// SQLite state backend
///
/// Each service, edge and route is one JSON row keyed by `(kind, id)`.
/// A save replaces all rows inside a single transaction.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Connect (creating the database file if needed) and initialise the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let backend = Self { pool };
        backend.init_schema().await?;

        debug!(url, "SQLite backend connected");
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atlas_state (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl StateBackend for SqliteBackend {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let rows = sqlx::query("SELECT kind, body FROM atlas_state ORDER BY kind, id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut snapshot = Snapshot::default();
        for row in rows {
            let kind: String = row.try_get("kind").map_err(storage_err)?;
            let body: String = row.try_get("body").map_err(storage_err)?;
            match kind.as_str() {
                KIND_SERVICE => snapshot.services.push(serde_json::from_str(&body)?),
                KIND_EDGE => snapshot.edges.push(serde_json::from_str(&body)?),
                KIND_ROUTE => snapshot.routes.push(serde_json::from_str(&body)?),
                other => debug!(kind = other, "Skipping unknown row kind"),
            }
        }
        snapshot.edges.sort_by_key(|e| e.id);
        snapshot.routes.sort_by_key(|r| r.id);
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        trace!(
            services = snapshot.services.len(),
            edges = snapshot.edges.len(),
            routes = snapshot.routes.len(),
            "SQLite SAVE"
        );

        let mut rows = Vec::new();
        for service in &snapshot.services {
            rows.push((KIND_SERVICE, service.id.clone(), serde_json::to_string(service)?));
        }
        for edge in &snapshot.edges {
            rows.push((KIND_EDGE, edge.id.to_string(), serde_json::to_string(edge)?));
        }
        for route in &snapshot.routes {
            rows.push((KIND_ROUTE, route.id.to_string(), serde_json::to_string(route)?));
        }

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query("DELETE FROM atlas_state")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        for (kind, id, body) in rows {
            sqlx::query("INSERT INTO atlas_state (kind, id, body) VALUES (?, ?, ?)")
                .bind(kind)
                .bind(id)
                .bind(body)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
