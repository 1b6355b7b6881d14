//! Tileset asset registrar and finalizer.
//!
//! Registers a 3D-tiles asset with the remote tiling service, which answers
//! with a scoped upload location and an `onComplete` callback descriptor.
//! The long-lived service token is injected at construction, never embedded.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use towertwin_bucket::scoped::ScopedUploadTarget;

use crate::error::PipelineError;

/// Sentinel persisted when the registrar response carries no asset id.
pub const UNKNOWN_ASSET_ID: &str = "Unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct AssetRegistration {
    pub name: String,
    pub description: String,
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLocation {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl From<&UploadLocation> for ScopedUploadTarget {
    fn from(location: &UploadLocation) -> Self {
        Self {
            endpoint: location.endpoint.clone(),
            bucket: location.bucket.clone(),
            access_key_id: location.access_key.clone(),
            secret_access_key: location.secret_access_key.clone(),
            session_token: location.session_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnComplete {
    pub url: String,
    #[serde(default = "empty_fields")]
    pub fields: Value,
}

fn empty_fields() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone)]
pub struct RegisteredAsset {
    pub asset_id: String,
    pub upload_location: UploadLocation,
    pub on_complete: OnComplete,
}

#[async_trait]
pub trait TilesetClient: Send + Sync {
    async fn register_asset(
        &self,
        registration: &AssetRegistration,
    ) -> Result<RegisteredAsset, PipelineError>;

    /// Posts the `onComplete` fields back to the registrar to signal that
    /// every part is uploaded.
    async fn finalize(&self, asset: &RegisteredAsset) -> Result<(), PipelineError>;
}

pub struct IonTilesetClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl IonTilesetClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl TilesetClient for IonTilesetClient {
    async fn register_asset(
        &self,
        registration: &AssetRegistration,
    ) -> Result<RegisteredAsset, PipelineError> {
        let body = json!({
            "name": registration.name,
            "description": registration.description,
            "type": "3DTILES",
            "options": {
                "sourceType": "3D_MODEL",
                "position": [registration.longitude, registration.latitude, 0.0],
                "clampToTerrain": true,
            },
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::AssetRegistration(err.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|err| PipelineError::AssetRegistration(err.to_string()))?;
        parse_asset_response(&payload)
    }

    async fn finalize(&self, asset: &RegisteredAsset) -> Result<(), PipelineError> {
        let response = self
            .http
            .post(&asset.on_complete.url)
            .bearer_auth(&self.token)
            .json(&asset.on_complete.fields)
            .send()
            .await
            .map_err(|err| PipelineError::Finalization(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Finalization(format!(
                "completion callback returned {status}"
            )));
        }
        Ok(())
    }
}

/// Validates and decodes a registrar response. A response without a usable
/// `uploadLocation.endpoint` is a registration failure carrying the most
/// specific message the payload offers.
pub fn parse_asset_response(payload: &Value) -> Result<RegisteredAsset, PipelineError> {
    let endpoint_present = payload
        .pointer("/uploadLocation/endpoint")
        .and_then(Value::as_str)
        .is_some_and(|endpoint| !endpoint.is_empty());
    if !endpoint_present {
        return Err(PipelineError::AssetRegistration(registration_error_message(
            payload,
        )));
    }

    let upload_location: UploadLocation =
        serde_json::from_value(payload["uploadLocation"].clone()).map_err(|err| {
            PipelineError::AssetRegistration(format!("malformed uploadLocation: {err}"))
        })?;

    let on_complete: OnComplete = payload
        .get("onComplete")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| PipelineError::AssetRegistration(format!("malformed onComplete: {err}")))?
        .ok_or_else(|| {
            PipelineError::AssetRegistration("response lacks an onComplete descriptor".to_string())
        })?;

    Ok(RegisteredAsset {
        asset_id: tileset_asset_id(payload),
        upload_location,
        on_complete,
    })
}

/// Prioritized id extraction: `assetMetadata.id`, then top-level `id`,
/// then the `Unknown` sentinel. Numeric ids are stringified.
pub fn tileset_asset_id(payload: &Value) -> String {
    id_string(payload.pointer("/assetMetadata/id"))
        .or_else(|| id_string(payload.get("id")))
        .unwrap_or_else(|| UNKNOWN_ASSET_ID.to_string())
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn registration_error_message(payload: &Value) -> String {
    let specific = payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/errors/0/title").and_then(Value::as_str))
        .or_else(|| payload.pointer("/errors/detail").and_then(Value::as_str));
    specific.map(str::to_string).unwrap_or_else(|| {
        "registrar rejected the asset; verify the service token and permissions".to_string()
    })
}
