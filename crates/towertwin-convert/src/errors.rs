use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("source file is not valid UTF-8")]
    NotUtf8,

    #[error("not a STEP exchange file: missing ISO-10303-21 header")]
    MissingHeader,

    #[error("STEP file has no DATA section")]
    MissingDataSection,

    #[error("entity at line {line} is malformed: {message}")]
    MalformedEntity { line: usize, message: String },

    #[error("model contains no 3D geometry to export")]
    NoGeometry,

    #[error("GLB export failed: {0}")]
    Export(String),
}
