use anyhow::{Context, Result};
use towertwin_bucket::StorageConfig;
use towertwin_pipeline::{PipelineConfig, DEFAULT_LATITUDE, DEFAULT_LONGITUDE};

/// Everything the service needs from the environment. Service credentials
/// are injected here and handed to the constructors that need them; they
/// never appear as literals in library code.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub storage: StorageConfig,
    pub translation_endpoint: String,
    pub tileset_api_url: String,
    pub tileset_token: String,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("TOWERTWIN_DATABASE_URL"))
            .context("DATABASE_URL (or TOWERTWIN_DATABASE_URL) must be set")?;

        let storage = StorageConfig {
            bucket: env_or("IFC_BUCKET_NAME", "ifc-files"),
            region: env_or("IFC_BUCKET_REGION", "us-east-1"),
            endpoint: std::env::var("IFC_BUCKET_ENDPOINT").ok(),
            access_key_id: std::env::var("IFC_BUCKET_ACCESS_KEY").ok(),
            secret_access_key: std::env::var("IFC_BUCKET_SECRET_KEY").ok(),
            force_path_style: std::env::var("IFC_BUCKET_FORCE_PATH_STYLE")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        let translation_endpoint = std::env::var("APS_UPLOAD_URL")
            .context("APS_UPLOAD_URL must point at the model translation endpoint")?;
        let tileset_api_url = env_or("CESIUM_ION_API_URL", "https://api.cesium.com/v1/assets");
        let tileset_token = std::env::var("CESIUM_ION_TOKEN")
            .context("CESIUM_ION_TOKEN must be set for the tileset registrar")?;

        let pipeline = PipelineConfig {
            default_latitude: env_f64("TOWERTWIN_DEFAULT_LATITUDE", DEFAULT_LATITUDE),
            default_longitude: env_f64("TOWERTWIN_DEFAULT_LONGITUDE", DEFAULT_LONGITUDE),
        };

        Ok(Self {
            database_url,
            storage,
            translation_endpoint,
            tileset_api_url,
            tileset_token,
            pipeline,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
