use std::fmt;

use thiserror::Error;
use towertwin_bucket::StorageError;
use towertwin_convert::ConvertError;
use towertwin_repository::RepositoryError;
use uuid::Uuid;

/// Which pipeline stage an error belongs to. The string forms double as
/// the stage markers persisted on Site rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validation,
    SourceStorage,
    Translation,
    Conversion,
    AssetRegistration,
    ScopedUpload,
    Finalization,
    Persistence,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Validation => "validation",
            PipelineStage::SourceStorage => "storage",
            PipelineStage::Translation => "aps",
            PipelineStage::Conversion => "convert",
            PipelineStage::AssetRegistration => "cesium",
            PipelineStage::ScopedUpload => "cesium-upload",
            PipelineStage::Finalization => "finalize",
            PipelineStage::Persistence => "db",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("site {0} has no stored source file to retry from")]
    MissingSource(Uuid),

    #[error("source upload failed: {0}")]
    StorageUpload(#[source] StorageError),

    #[error("source download failed: {0}")]
    SourceDownload(#[source] StorageError),

    #[error("translation request failed: {0}")]
    TranslationRequest(String),

    #[error("geometry conversion failed: {0}")]
    Conversion(#[from] ConvertError),

    #[error("asset registration failed: {0}")]
    AssetRegistration(String),

    #[error("scoped upload failed: {0}")]
    TemporaryUpload(#[source] StorageError),

    #[error("finalization failed: {0}")]
    Finalization(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Validation(_) | PipelineError::MissingSource(_) => {
                PipelineStage::Validation
            }
            PipelineError::StorageUpload(_) | PipelineError::SourceDownload(_) => {
                PipelineStage::SourceStorage
            }
            PipelineError::TranslationRequest(_) => PipelineStage::Translation,
            PipelineError::Conversion(_) => PipelineStage::Conversion,
            PipelineError::AssetRegistration(_) => PipelineStage::AssetRegistration,
            PipelineError::TemporaryUpload(_) => PipelineStage::ScopedUpload,
            PipelineError::Finalization(_) => PipelineStage::Finalization,
            PipelineError::Persistence(_) => PipelineStage::Persistence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_their_stage_marker() {
        let cases = [
            (
                PipelineError::Validation("bad".into()).stage(),
                "validation",
            ),
            (
                PipelineError::StorageUpload(StorageError::Transport("t".into())).stage(),
                "storage",
            ),
            (
                PipelineError::TranslationRequest("t".into()).stage(),
                "aps",
            ),
            (
                PipelineError::Conversion(ConvertError::NoGeometry).stage(),
                "convert",
            ),
            (
                PipelineError::AssetRegistration("t".into()).stage(),
                "cesium",
            ),
            (
                PipelineError::TemporaryUpload(StorageError::Transport("t".into())).stage(),
                "cesium-upload",
            ),
            (PipelineError::Finalization("t".into()).stage(), "finalize"),
        ];
        for (stage, expected) in cases {
            assert_eq!(stage.as_str(), expected);
        }
    }
}
