use std::sync::Arc;

use anyhow::Result;
use towertwin_bucket::scoped::S3ScopedUploader;
use towertwin_bucket::S3SourceStore;
use towertwin_pipeline::{ApsTranslationClient, IonTilesetClient, UploadPipeline};
use towertwin_repository::PostgresSiteRepository;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub repository: Arc<PostgresSiteRepository>,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let repository = Arc::new(PostgresSiteRepository::connect(&config.database_url, 5).await?);
        repository.run_migrations().await?;

        let store = Arc::new(S3SourceStore::connect(config.storage.clone()).await?);
        let translator = Arc::new(ApsTranslationClient::new(
            config.translation_endpoint.clone(),
        ));
        let tilesets = Arc::new(IonTilesetClient::new(
            config.tileset_api_url.clone(),
            config.tileset_token.clone(),
        ));

        let pipeline = Arc::new(UploadPipeline::new(
            store,
            translator,
            tilesets,
            Arc::new(S3ScopedUploader),
            repository.clone(),
            config.pipeline.clone(),
        ));

        Ok(Self {
            pipeline,
            repository,
        })
    }
}
