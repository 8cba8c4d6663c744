//! `sqlx`-backed [`VerdictStore`]. Schema creation and inserts both go
//! through runtime `query`/`query()` calls rather than the `query!` macro
//! family, since those require a live database at build time.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::{VerdictRecord, VerdictStore};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS verdicts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    discovery_name  TEXT NOT NULL,
    name            TEXT NOT NULL,
    namespace       TEXT NOT NULL,
    host            TEXT NOT NULL,
    path_json       TEXT,
    service_name    TEXT NOT NULL,
    has_active_pods INTEGER NOT NULL,
    pod_count       INTEGER NOT NULL,
    detector_name   TEXT NOT NULL,
    is_illegal      INTEGER NOT NULL,
    description     TEXT NOT NULL,
    keywords_json   TEXT,
    region          TEXT NOT NULL,
    url             TEXT NOT NULL,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

pub struct SqliteVerdictStore {
    pool: SqlitePool,
}

impl SqliteVerdictStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(database_url).await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl VerdictStore for SqliteVerdictStore {
    async fn insert(&self, record: VerdictRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO verdicts \
             (discovery_name, name, namespace, host, path_json, service_name, has_active_pods, pod_count, \
              detector_name, is_illegal, description, keywords_json, region, url) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.discovery_name)
        .bind(record.name)
        .bind(record.namespace)
        .bind(record.host)
        .bind(record.path_json)
        .bind(record.service_name)
        .bind(record.has_active_pods)
        .bind(record.pod_count as i64)
        .bind(record.detector_name)
        .bind(record.is_illegal)
        .bind(record.description)
        .bind(record.keywords_json)
        .bind(record.region)
        .bind(record.url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
