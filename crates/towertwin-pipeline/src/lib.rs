//! Asset ingestion pipeline for telecom-tower digital-twin sites.

pub mod aps;
pub mod error;
pub mod ion;
pub mod keys;
pub mod pipeline;
pub mod session;
pub mod validate;

pub use aps::{ApsTranslationClient, TranslationClient};
pub use error::{PipelineError, PipelineStage};
pub use ion::{
    AssetRegistration, IonTilesetClient, OnComplete, RegisteredAsset, TilesetClient,
    UploadLocation, UNKNOWN_ASSET_ID,
};
pub use keys::source_object_key;
pub use pipeline::{
    parse_coordinate, PipelineConfig, UploadPipeline, UploadRequest, DEFAULT_LATITUDE,
    DEFAULT_LONGITUDE,
};
pub use session::UserSession;
pub use validate::{validate_upload, SOURCE_EXTENSION};
