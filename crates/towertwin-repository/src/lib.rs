//! Postgres persistence for digital-twin Site rows.
//!
//! One row per site, recording the stored source file path, the remote
//! translation and tileset references, and the lifecycle status/stage/error
//! triple that drives the dashboard display and the retry action.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    NotStarted,
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::NotStarted => "not_started",
            SiteStatus::Pending => "pending",
            SiteStatus::Uploading => "uploading",
            SiteStatus::Processing => "processing",
            SiteStatus::Completed => "completed",
            SiteStatus::Failed => "failed",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(Self::NotStarted),
            "pending" => Some(Self::Pending),
            "uploading" => Some(Self::Uploading),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl From<SiteStatus> for String {
    fn from(value: SiteStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Fields known before the row exists; the repository assigns id and
/// timestamps at insert time.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub owner_id: Uuid,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_path: String,
    pub translation_urn: Option<String>,
    pub tileset_asset_id: Option<String>,
    pub status: SiteStatus,
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_path: String,
    pub translation_urn: Option<String>,
    pub tileset_asset_id: Option<String>,
    pub status: SiteStatus,
    pub stage: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("invalid status value '{0}'")]
    InvalidStatus(String),

    #[error("site not found: {0}")]
    NotFound(Uuid),
}

#[async_trait]
pub trait SiteRepository: Send + Sync {
    async fn insert(&self, site: &NewSite) -> Result<SiteRecord, RepositoryError>;
    async fn fetch(&self, id: Uuid) -> Result<SiteRecord, RepositoryError>;
    async fn list(&self) -> Result<Vec<SiteRecord>, RepositoryError>;
    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<SiteRecord>, RepositoryError>;

    /// Updates the status/stage/error triple in place; `stage` and `error`
    /// of `None` clear the stored values.
    async fn update_progress(
        &self,
        id: Uuid,
        status: SiteStatus,
        stage: Option<&str>,
        error_detail: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Records the remote identifiers produced by a successful retry.
    async fn update_references(
        &self,
        id: Uuid,
        translation_urn: Option<&str>,
        tileset_asset_id: Option<&str>,
    ) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct PostgresSiteRepository {
    pool: PgPool,
}

impl PostgresSiteRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const SITE_COLUMNS: &str = "id, owner_id, name, location, latitude, longitude, source_path, \
     translation_urn, tileset_asset_id, status, stage, error_detail, created_at, updated_at";

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<SiteRecord, RepositoryError> {
    let status_str: String = row.try_get("status")?;
    let status = SiteStatus::from_str(&status_str)
        .ok_or_else(|| RepositoryError::InvalidStatus(status_str.clone()))?;

    Ok(SiteRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        location: row.try_get("location")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        source_path: row.try_get("source_path")?,
        translation_urn: row.try_get("translation_urn")?,
        tileset_asset_id: row.try_get("tileset_asset_id")?,
        status,
        stage: row.try_get("stage")?,
        error_detail: row.try_get("error_detail")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl SiteRepository for PostgresSiteRepository {
    async fn insert(&self, site: &NewSite) -> Result<SiteRecord, RepositoryError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sites (
                id,
                owner_id,
                name,
                location,
                latitude,
                longitude,
                source_path,
                translation_urn,
                tileset_asset_id,
                status,
                stage,
                error_detail,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NULL, $12, $12)
            "#,
        )
        .bind(id)
        .bind(site.owner_id)
        .bind(&site.name)
        .bind(&site.location)
        .bind(site.latitude)
        .bind(site.longitude)
        .bind(&site.source_path)
        .bind(&site.translation_urn)
        .bind(&site.tileset_asset_id)
        .bind(site.status.as_str())
        .bind(&site.stage)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(SiteRecord {
            id,
            owner_id: site.owner_id,
            name: site.name.clone(),
            location: site.location.clone(),
            latitude: site.latitude,
            longitude: site.longitude,
            source_path: site.source_path.clone(),
            translation_urn: site.translation_urn.clone(),
            tileset_asset_id: site.tileset_asset_id.clone(),
            status: site.status,
            stage: site.stage.clone(),
            error_detail: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn fetch(&self, id: Uuid) -> Result<SiteRecord, RepositoryError> {
        let query = format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn list(&self) -> Result<Vec<SiteRecord>, RepositoryError> {
        let query = format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY created_at DESC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<SiteRecord>, RepositoryError> {
        let query = format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE owner_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn update_progress(
        &self,
        id: Uuid,
        status: SiteStatus,
        stage: Option<&str>,
        error_detail: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE sites
            SET status = $1,
                stage = $2,
                error_detail = $3,
                updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(status.as_str())
        .bind(stage)
        .bind(error_detail)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn update_references(
        &self,
        id: Uuid,
        translation_urn: Option<&str>,
        tileset_asset_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE sites
            SET translation_urn = COALESCE($1, translation_urn),
                tileset_asset_id = COALESCE($2, tileset_asset_id),
                updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(translation_urn)
        .bind(tileset_asset_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}
