//! The multi-stage asset ingestion pipeline.
//!
//! One strictly sequential run per upload: validate, store the source,
//! request remote translation, convert IFC to GLB in process, register a
//! tileset asset, upload the GLB with the registrar's scoped credentials,
//! finalize, persist. Any stage failure aborts the remaining stages and
//! surfaces a stage-tagged error; nothing is retried automatically.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use towertwin_bucket::scoped::{ScopedUploadTarget, ScopedUploader};
use towertwin_bucket::SourceStore;
use towertwin_convert::{convert_ifc_to_glb, glb_file_name, ConvertError, GLB_CONTENT_TYPE};
use towertwin_repository::{NewSite, RepositoryError, SiteRecord, SiteRepository, SiteStatus};

use crate::aps::TranslationClient;
use crate::error::{PipelineError, PipelineStage};
use crate::ion::{AssetRegistration, TilesetClient};
use crate::keys::source_object_key;
use crate::session::UserSession;
use crate::validate::validate_upload;

/// Fallback position hint when the user supplies no coordinates.
pub const DEFAULT_LATITUDE: f64 = 25.2854;
pub const DEFAULT_LONGITUDE: f64 = 51.5310;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_latitude: f64,
    pub default_longitude: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_latitude: DEFAULT_LATITUDE,
            default_longitude: DEFAULT_LONGITUDE,
        }
    }
}

/// Parses a user-supplied coordinate field; blank or non-numeric input
/// falls back to the configured default downstream.
pub fn parse_coordinate(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        trimmed.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub site_name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub file_name: String,
    pub contents: Bytes,
}

struct TilesetArtifacts {
    asset_id: String,
}

pub struct UploadPipeline {
    store: Arc<dyn SourceStore>,
    translator: Arc<dyn TranslationClient>,
    tilesets: Arc<dyn TilesetClient>,
    scoped_uploader: Arc<dyn ScopedUploader>,
    repository: Arc<dyn SiteRepository>,
    config: PipelineConfig,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn SourceStore>,
        translator: Arc<dyn TranslationClient>,
        tilesets: Arc<dyn TilesetClient>,
        scoped_uploader: Arc<dyn ScopedUploader>,
        repository: Arc<dyn SiteRepository>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            translator,
            tilesets,
            scoped_uploader,
            repository,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the full pipeline for a fresh upload. The Site row is inserted
    /// only after every remote stage has succeeded, so a row's presence
    /// implies a durably stored source file.
    pub async fn run_upload(
        &self,
        session: &UserSession,
        request: UploadRequest,
    ) -> Result<SiteRecord, PipelineError> {
        validate_upload(&request.file_name, &request.site_name)?;

        let source_path = source_object_key(session.user_id, &request.file_name);
        info!(user = %session.user_id, key = %source_path, "storing source file");
        self.store
            .put_source(&source_path, request.contents.clone())
            .await
            .map_err(PipelineError::StorageUpload)?;

        let urn = self
            .translator
            .request_translation(session, &request.file_name, request.contents.clone())
            .await?;
        info!(%urn, "translation requested");

        let artifacts = self
            .produce_tileset(
                session,
                &request.site_name,
                request.latitude,
                request.longitude,
                &request.file_name,
                request.contents.clone(),
            )
            .await?;

        let site = self
            .repository
            .insert(&NewSite {
                owner_id: session.user_id,
                name: request.site_name.clone(),
                location: request.location.clone(),
                latitude: request.latitude,
                longitude: request.longitude,
                source_path,
                translation_urn: Some(urn),
                tileset_asset_id: Some(artifacts.asset_id),
                status: SiteStatus::Processing,
                stage: Some(PipelineStage::Finalization.as_str().to_string()),
            })
            .await?;
        info!(site_id = %site.id, "site persisted");
        Ok(site)
    }

    /// Re-runs the pipeline for an existing site from its durably stored
    /// source file, updating the same row in place. Artifacts that already
    /// exist are not recreated: the stored source object is reused as-is
    /// and a stored URN short-circuits the translation request. Tileset
    /// assets are never resumed; the registrar is always re-invoked.
    ///
    /// Only the owning session may retry a site; anyone else observes the
    /// row as absent.
    pub async fn run_retry(
        &self,
        session: &UserSession,
        site_id: Uuid,
    ) -> Result<SiteRecord, PipelineError> {
        let site = self.repository.fetch(site_id).await?;
        if site.owner_id != session.user_id {
            return Err(PipelineError::Persistence(RepositoryError::NotFound(
                site_id,
            )));
        }
        if site.source_path.is_empty() {
            return Err(PipelineError::MissingSource(site_id));
        }

        // reset per-attempt state before any remote work
        self.repository
            .update_progress(site_id, SiteStatus::Pending, None, None)
            .await?;

        match self.retry_stages(session, &site).await {
            Ok(()) => {
                self.repository
                    .update_progress(
                        site_id,
                        SiteStatus::Processing,
                        Some(PipelineStage::Finalization.as_str()),
                        None,
                    )
                    .await?;
                info!(%site_id, "retry succeeded");
                self.repository.fetch(site_id).await.map_err(PipelineError::from)
            }
            Err(err) => {
                // the stage error outranks bookkeeping failures, but neither
                // goes unreported
                if let Err(update_err) = self
                    .repository
                    .update_progress(
                        site_id,
                        SiteStatus::Failed,
                        Some(err.stage().as_str()),
                        Some(&err.to_string()),
                    )
                    .await
                {
                    warn!(%site_id, error = %update_err, "failed to record retry failure");
                }
                Err(err)
            }
        }
    }

    async fn retry_stages(
        &self,
        session: &UserSession,
        site: &SiteRecord,
    ) -> Result<(), PipelineError> {
        let file_name = site
            .source_path
            .rsplit('/')
            .next()
            .unwrap_or(site.source_path.as_str())
            .to_string();
        validate_upload(&file_name, &site.name)?;

        let contents = self
            .store
            .fetch_source(&site.source_path)
            .await
            .map_err(PipelineError::SourceDownload)?;
        self.repository
            .update_progress(
                site.id,
                SiteStatus::Uploading,
                Some(PipelineStage::SourceStorage.as_str()),
                None,
            )
            .await?;

        let urn = match &site.translation_urn {
            Some(existing) => existing.clone(),
            None => {
                self.translator
                    .request_translation(session, &file_name, contents.clone())
                    .await?
            }
        };

        let artifacts = self
            .produce_tileset(
                session,
                &site.name,
                site.latitude,
                site.longitude,
                &file_name,
                contents,
            )
            .await?;

        self.repository
            .update_references(site.id, Some(&urn), Some(&artifacts.asset_id))
            .await?;
        Ok(())
    }

    /// Stages 4 through 7: convert, register, scoped upload, finalize.
    async fn produce_tileset(
        &self,
        session: &UserSession,
        site_name: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
        file_name: &str,
        contents: Bytes,
    ) -> Result<TilesetArtifacts, PipelineError> {
        // conversion is the one CPU-bound stage; keep it off the runtime
        let source = contents.clone();
        let converted = tokio::task::spawn_blocking(move || convert_ifc_to_glb(&source))
            .await
            .map_err(|err| PipelineError::Conversion(ConvertError::Export(err.to_string())))??;
        info!(
            points = converted.point_count,
            bytes = converted.glb.len(),
            "converted IFC to GLB"
        );

        let registration = AssetRegistration {
            name: site_name.to_string(),
            description: format!("Uploaded from TowerTwin - {}", session.user_id),
            latitude: latitude.unwrap_or(self.config.default_latitude),
            longitude: longitude.unwrap_or(self.config.default_longitude),
        };
        let asset = self.tilesets.register_asset(&registration).await?;
        info!(asset_id = %asset.asset_id, "tileset asset registered");

        let glb_key = format!(
            "{}{}",
            asset.upload_location.prefix,
            glb_file_name(file_name)
        );
        let target = ScopedUploadTarget::from(&asset.upload_location);
        self.scoped_uploader
            .put_object_scoped(&target, &glb_key, Bytes::from(converted.glb), GLB_CONTENT_TYPE)
            .await
            .map_err(PipelineError::TemporaryUpload)?;
        info!(key = %glb_key, "converted model uploaded");

        self.tilesets.finalize(&asset).await?;
        Ok(TilesetArtifacts {
            asset_id: asset.asset_id,
        })
    }
}
