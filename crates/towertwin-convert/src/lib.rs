//! In-process IFC to binary-glTF conversion.
//!
//! The upload pipeline needs a web-displayable binary model before it can
//! feed the tileset registrar's scoped bucket. This crate is that pure
//! transform: IFC (STEP physical file) bytes in, GLB bytes out, no I/O.

pub mod errors;
mod glb;
mod step;

pub use errors::ConvertError;
pub use step::StepModel;

/// MIME type of the converted artifact.
pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";

#[derive(Debug)]
pub struct ConvertedModel {
    pub glb: Vec<u8>,
    pub point_count: usize,
    pub project_name: Option<String>,
    pub schema: Option<String>,
}

/// Converts IFC source bytes into a binary glTF container.
///
/// Fails when the source is not a parseable STEP file or carries no
/// exportable 3D geometry; the export step itself only fails on
/// serialization problems.
pub fn convert_ifc_to_glb(source: &[u8]) -> Result<ConvertedModel, ConvertError> {
    let text = std::str::from_utf8(source).map_err(|_| ConvertError::NotUtf8)?;
    let model = step::parse_step(text)?;
    if model.points.is_empty() {
        return Err(ConvertError::NoGeometry);
    }
    let glb = glb::export_points_glb(model.project_name.as_deref(), &model.points)?;
    Ok(ConvertedModel {
        glb,
        point_count: model.points.len(),
        project_name: model.project_name,
        schema: model.schema,
    })
}

/// Derives the converted artifact's filename from the source filename,
/// e.g. `site.ifc` (any case) becomes `site.glb`.
pub fn glb_file_name(source_name: &str) -> String {
    let lower = source_name.to_ascii_lowercase();
    if let Some(stem_len) = lower.strip_suffix(".ifc").map(str::len) {
        format!("{}.glb", &source_name[..stem_len])
    } else {
        format!("{source_name}.glb")
    }
}
