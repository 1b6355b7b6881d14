use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use towertwin_bucket::scoped::{ScopedUploadTarget, ScopedUploader};
use towertwin_bucket::{SourceStore, StorageError};
use towertwin_pipeline::ion::parse_asset_response;
use towertwin_pipeline::{
    parse_coordinate, AssetRegistration, PipelineConfig, PipelineError, RegisteredAsset,
    TilesetClient, TranslationClient, UploadPipeline, UploadRequest, UserSession,
    DEFAULT_LATITUDE, DEFAULT_LONGITUDE,
};
use towertwin_repository::{
    NewSite, RepositoryError, SiteRecord, SiteRepository, SiteStatus,
};

const SMALL_IFC: &str = "ISO-10303-21;\n\
HEADER;\n\
FILE_SCHEMA(('IFC4'));\n\
ENDSEC;\n\
DATA;\n\
#1=IFCPROJECT('2O2Fr$t4X7Zf8NOew3FLOH',$,'Tower A',$,$,$,$,$,$);\n\
#10=IFCCARTESIANPOINT((0.,0.,0.));\n\
#11=IFCCARTESIANPOINT((1.,2.,3.));\n\
ENDSEC;\n\
END-ISO-10303-21;\n";

const TEST_URN: &str = "dXJuOmFkc2sub2JqZWN0czpvcy5vYmplY3Q";

fn registrar_response() -> Value {
    json!({
        "assetMetadata": { "id": "123" },
        "uploadLocation": {
            "endpoint": "https://upload.example.com",
            "bucket": "assets",
            "prefix": "sources/42/",
            "accessKey": "AKIA",
            "secretAccessKey": "secret",
            "sessionToken": "token",
        },
        "onComplete": {
            "url": "https://api.example.com/v1/assets/123/uploadComplete",
            "fields": { "token": "abc" },
        },
    })
}

#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<String, Bytes>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    fail_puts: bool,
}

impl MemoryStore {
    fn with_object(key: &str, bytes: &[u8]) -> Self {
        let store = Self::default();
        store
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(bytes));
        store
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn put_source(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts {
            return Err(StorageError::Transport("injected put failure".into()));
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn fetch_source(&self, key: &str) -> Result<Bytes, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[derive(Default)]
struct FakeTranslator {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TranslationClient for FakeTranslator {
    async fn request_translation(
        &self,
        _session: &UserSession,
        _file_name: &str,
        _source: Bytes,
    ) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::TranslationRequest(
                "injected translation failure".into(),
            ));
        }
        Ok(TEST_URN.to_string())
    }
}

struct FakeTilesets {
    response: Value,
    register_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    last_registration: Mutex<Option<AssetRegistration>>,
}

impl FakeTilesets {
    fn new(response: Value) -> Self {
        Self {
            response,
            register_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
            last_registration: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TilesetClient for FakeTilesets {
    async fn register_asset(
        &self,
        registration: &AssetRegistration,
    ) -> Result<RegisteredAsset, PipelineError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_registration.lock().unwrap() = Some(registration.clone());
        parse_asset_response(&self.response)
    }

    async fn finalize(&self, _asset: &RegisteredAsset) -> Result<(), PipelineError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeScopedUploader {
    calls: AtomicUsize,
    fail: bool,
    last_put: Mutex<Option<(ScopedUploadTarget, String, String)>>,
}

#[async_trait]
impl ScopedUploader for FakeScopedUploader {
    async fn put_object_scoped(
        &self,
        target: &ScopedUploadTarget,
        key: &str,
        _bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StorageError::Transport("injected scoped failure".into()));
        }
        *self.last_put.lock().unwrap() =
            Some((target.clone(), key.to_string(), content_type.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryRepository {
    rows: Mutex<HashMap<Uuid, SiteRecord>>,
    inserts: AtomicUsize,
    fail_failure_updates: bool,
}

impl MemoryRepository {
    fn with_row(record: SiteRecord) -> Self {
        let repo = Self::default();
        repo.rows.lock().unwrap().insert(record.id, record);
        repo
    }

    fn row(&self, id: Uuid) -> SiteRecord {
        self.rows.lock().unwrap().get(&id).cloned().expect("row")
    }
}

#[async_trait]
impl SiteRepository for MemoryRepository {
    async fn insert(&self, site: &NewSite) -> Result<SiteRecord, RepositoryError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = SiteRecord {
            id: Uuid::new_v4(),
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
        };
        self.rows.lock().unwrap().insert(record.id, record.clone());
        Ok(record)
    }

    async fn fetch(&self, id: Uuid) -> Result<SiteRecord, RepositoryError> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<SiteRecord>, RepositoryError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<SiteRecord>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update_progress(
        &self,
        id: Uuid,
        status: SiteStatus,
        stage: Option<&str>,
        error_detail: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if self.fail_failure_updates && status == SiteStatus::Failed {
            return Err(RepositoryError::NotFound(id));
        }
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        row.status = status;
        row.stage = stage.map(str::to_string);
        row.error_detail = error_detail.map(str::to_string);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn update_references(
        &self,
        id: Uuid,
        translation_urn: Option<&str>,
        tileset_asset_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        if let Some(urn) = translation_urn {
            row.translation_urn = Some(urn.to_string());
        }
        if let Some(asset_id) = tileset_asset_id {
            row.tileset_asset_id = Some(asset_id.to_string());
        }
        row.updated_at = Utc::now();
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    translator: Arc<FakeTranslator>,
    tilesets: Arc<FakeTilesets>,
    scoped: Arc<FakeScopedUploader>,
    repository: Arc<MemoryRepository>,
    pipeline: UploadPipeline,
}

fn harness(
    store: MemoryStore,
    translator: FakeTranslator,
    tilesets: FakeTilesets,
    scoped: FakeScopedUploader,
    repository: MemoryRepository,
) -> Harness {
    let store = Arc::new(store);
    let translator = Arc::new(translator);
    let tilesets = Arc::new(tilesets);
    let scoped = Arc::new(scoped);
    let repository = Arc::new(repository);
    let pipeline = UploadPipeline::new(
        store.clone(),
        translator.clone(),
        tilesets.clone(),
        scoped.clone(),
        repository.clone(),
        PipelineConfig::default(),
    );
    Harness {
        store,
        translator,
        tilesets,
        scoped,
        repository,
        pipeline,
    }
}

fn default_harness() -> Harness {
    harness(
        MemoryStore::default(),
        FakeTranslator::default(),
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader::default(),
        MemoryRepository::default(),
    )
}

fn session() -> UserSession {
    UserSession::new(Uuid::new_v4(), "session-token")
}

fn upload_request(file_name: &str, contents: &[u8]) -> UploadRequest {
    UploadRequest {
        site_name: "Tower A".to_string(),
        location: Some("Doha".to_string()),
        latitude: Some(25.1),
        longitude: Some(51.2),
        file_name: file_name.to_string(),
        contents: Bytes::copy_from_slice(contents),
    }
}

#[tokio::test]
async fn wrong_extension_fails_validation_with_zero_network_calls() {
    let h = default_harness();
    let err = h
        .pipeline
        .run_upload(&session(), upload_request("model.txt", b"whatever"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.tilesets.register_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.scoped.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.repository.inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_upload_persists_a_processing_site() {
    let h = default_harness();
    let user = session();
    let site = h
        .pipeline
        .run_upload(&user, upload_request("site.ifc", SMALL_IFC.as_bytes()))
        .await
        .expect("upload failed");

    assert_eq!(site.status, SiteStatus::Processing);
    assert_eq!(site.translation_urn.as_deref(), Some(TEST_URN));
    assert_eq!(site.tileset_asset_id.as_deref(), Some("123"));
    assert!(site.source_path.starts_with(&format!("{}/", user.user_id)));
    assert!(site.source_path.ends_with("_site.ifc"));

    // stage order: store, translate, register, scoped put, finalize, insert
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.tilesets.register_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.scoped.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.tilesets.finalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.repository.inserts.load(Ordering::SeqCst), 1);

    let (target, key, content_type) = h.scoped.last_put.lock().unwrap().clone().expect("no put");
    assert_eq!(target.endpoint, "https://upload.example.com");
    assert_eq!(target.bucket, "assets");
    assert_eq!(key, "sources/42/site.glb");
    assert_eq!(content_type, "model/gltf-binary");

    let registration = h
        .tilesets
        .last_registration
        .lock()
        .unwrap()
        .clone()
        .expect("no registration");
    assert_eq!(registration.name, "Tower A");
    assert_eq!(registration.latitude, 25.1);
    assert_eq!(registration.longitude, 51.2);
}

#[tokio::test]
async fn translation_failure_stops_later_stages() {
    let h = harness(
        MemoryStore::default(),
        FakeTranslator {
            fail: true,
            ..Default::default()
        },
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader::default(),
        MemoryRepository::default(),
    );

    let err = h
        .pipeline
        .run_upload(&session(), upload_request("site.ifc", SMALL_IFC.as_bytes()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::TranslationRequest(_)));
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(h.tilesets.register_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.scoped.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.tilesets.finalize_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.repository.inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn conversion_failure_skips_the_registrar() {
    let h = default_harness();
    let err = h
        .pipeline
        .run_upload(&session(), upload_request("site.ifc", b"not a step file"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Conversion(_)));
    assert_eq!(h.tilesets.register_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.repository.inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn registrar_response_without_upload_location_aborts() {
    let h = harness(
        MemoryStore::default(),
        FakeTranslator::default(),
        FakeTilesets::new(json!({ "message": "Invalid token" })),
        FakeScopedUploader::default(),
        MemoryRepository::default(),
    );

    let err = h
        .pipeline
        .run_upload(&session(), upload_request("site.ifc", SMALL_IFC.as_bytes()))
        .await
        .unwrap_err();

    match err {
        PipelineError::AssetRegistration(message) => assert!(message.contains("Invalid token")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.scoped.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.tilesets.finalize_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.repository.inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn default_coordinates_are_applied_when_absent() {
    let h = default_harness();
    let mut request = upload_request("site.ifc", SMALL_IFC.as_bytes());
    request.latitude = parse_coordinate("");
    request.longitude = parse_coordinate("  ");

    h.pipeline
        .run_upload(&session(), request)
        .await
        .expect("upload failed");

    let registration = h
        .tilesets
        .last_registration
        .lock()
        .unwrap()
        .clone()
        .expect("no registration");
    assert_eq!(registration.latitude, DEFAULT_LATITUDE);
    assert_eq!(registration.longitude, DEFAULT_LONGITUDE);
    assert_eq!(parse_coordinate("25.1"), Some(25.1));
    assert_eq!(parse_coordinate("north"), None);
}

fn failed_site(owner: Uuid, source_path: &str, urn: Option<&str>) -> SiteRecord {
    let now = Utc::now();
    SiteRecord {
        id: Uuid::new_v4(),
        owner_id: owner,
        name: "Tower A".to_string(),
        location: Some("Doha".to_string()),
        latitude: Some(25.1),
        longitude: Some(51.2),
        source_path: source_path.to_string(),
        translation_urn: urn.map(str::to_string),
        tileset_asset_id: None,
        status: SiteStatus::Failed,
        stage: Some("cesium".to_string()),
        error_detail: Some("asset registration failed: Invalid token".to_string()),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn retry_reuses_stored_identity_and_updates_the_row_in_place() {
    let user = session();
    let source_path = format!("{}/1767100000000_site.ifc", user.user_id);
    let site = failed_site(user.user_id, &source_path, Some(TEST_URN));
    let site_id = site.id;

    let h = harness(
        MemoryStore::with_object(&source_path, SMALL_IFC.as_bytes()),
        FakeTranslator::default(),
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader::default(),
        MemoryRepository::with_row(site),
    );

    let updated = h
        .pipeline
        .run_retry(&user, site_id)
        .await
        .expect("retry failed");

    // same row mutated, not a second insert
    assert_eq!(updated.id, site_id);
    assert_eq!(h.repository.inserts.load(Ordering::SeqCst), 0);
    assert_eq!(h.repository.rows.lock().unwrap().len(), 1);

    // bytes came from the stored path, not a new upload
    assert_eq!(h.store.gets.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 0);

    // the stored URN short-circuits the translation request
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(updated.translation_urn.as_deref(), Some(TEST_URN));

    assert_eq!(updated.status, SiteStatus::Processing);
    assert_eq!(updated.tileset_asset_id.as_deref(), Some("123"));
    assert_eq!(updated.error_detail, None);

    let registration = h
        .tilesets
        .last_registration
        .lock()
        .unwrap()
        .clone()
        .expect("no registration");
    assert_eq!(registration.name, "Tower A");
    assert_eq!(registration.latitude, 25.1);
}

#[tokio::test]
async fn retry_without_stored_urn_requests_translation_again() {
    let user = session();
    let source_path = format!("{}/1767100000000_site.ifc", user.user_id);
    let site = failed_site(user.user_id, &source_path, None);
    let site_id = site.id;

    let h = harness(
        MemoryStore::with_object(&source_path, SMALL_IFC.as_bytes()),
        FakeTranslator::default(),
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader::default(),
        MemoryRepository::with_row(site),
    );

    let updated = h.pipeline.run_retry(&user, site_id).await.expect("retry");
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(updated.translation_urn.as_deref(), Some(TEST_URN));
}

#[tokio::test]
async fn source_store_failure_stops_translation() {
    let h = harness(
        MemoryStore {
            fail_puts: true,
            ..Default::default()
        },
        FakeTranslator::default(),
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader::default(),
        MemoryRepository::default(),
    );

    let err = h
        .pipeline
        .run_upload(&session(), upload_request("site.ifc", SMALL_IFC.as_bytes()))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::StorageUpload(_)));
    assert_eq!(h.store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.tilesets.register_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.repository.inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_by_a_non_owner_is_rejected_as_not_found() {
    let owner = session();
    let source_path = format!("{}/1767100000000_site.ifc", owner.user_id);
    let site = failed_site(owner.user_id, &source_path, Some(TEST_URN));
    let site_id = site.id;

    let h = harness(
        MemoryStore::with_object(&source_path, SMALL_IFC.as_bytes()),
        FakeTranslator::default(),
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader::default(),
        MemoryRepository::with_row(site),
    );

    let stranger = session();
    let err = h.pipeline.run_retry(&stranger, site_id).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Persistence(RepositoryError::NotFound(_))
    ));

    // the owner's row and artifacts are untouched
    let row = h.repository.row(site_id);
    assert_eq!(row.status, SiteStatus::Failed);
    assert_eq!(h.store.gets.load(Ordering::SeqCst), 0);
    assert_eq!(h.tilesets.register_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_bookkeeping_failure_does_not_mask_the_stage_error() {
    let user = session();
    let source_path = format!("{}/1767100000000_site.ifc", user.user_id);
    let site = failed_site(user.user_id, &source_path, Some(TEST_URN));
    let site_id = site.id;

    let repository = MemoryRepository {
        fail_failure_updates: true,
        ..Default::default()
    };
    repository.rows.lock().unwrap().insert(site_id, site);

    let h = harness(
        MemoryStore::with_object(&source_path, SMALL_IFC.as_bytes()),
        FakeTranslator::default(),
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader {
            fail: true,
            ..Default::default()
        },
        repository,
    );

    let err = h.pipeline.run_retry(&user, site_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::TemporaryUpload(_)));
}

#[tokio::test]
async fn retry_failure_marks_the_row_failed_with_stage_and_detail() {
    let user = session();
    let source_path = format!("{}/1767100000000_site.ifc", user.user_id);
    let site = failed_site(user.user_id, &source_path, Some(TEST_URN));
    let site_id = site.id;

    let h = harness(
        MemoryStore::with_object(&source_path, SMALL_IFC.as_bytes()),
        FakeTranslator::default(),
        FakeTilesets::new(registrar_response()),
        FakeScopedUploader {
            fail: true,
            ..Default::default()
        },
        MemoryRepository::with_row(site),
    );

    let err = h.pipeline.run_retry(&user, site_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::TemporaryUpload(_)));

    let row = h.repository.row(site_id);
    assert_eq!(row.status, SiteStatus::Failed);
    assert_eq!(row.stage.as_deref(), Some("cesium-upload"));
    assert!(row
        .error_detail
        .as_deref()
        .unwrap()
        .contains("injected scoped failure"));
}
