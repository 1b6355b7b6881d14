use crate::error::PipelineError;

/// Required extension of source geometry files.
pub const SOURCE_EXTENSION: &str = ".ifc";

/// Fail-fast input checks; runs before any network access.
pub fn validate_upload(file_name: &str, site_name: &str) -> Result<(), PipelineError> {
    if !file_name.to_ascii_lowercase().ends_with(SOURCE_EXTENSION) {
        return Err(PipelineError::Validation(format!(
            "'{file_name}' is not an {SOURCE_EXTENSION} file"
        )));
    }
    if site_name.trim().is_empty() {
        return Err(PipelineError::Validation(
            "site name must not be empty".to_string(),
        ));
    }
    Ok(())
}
