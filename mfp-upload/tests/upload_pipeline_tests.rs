//! End-to-end upload pipeline tests against mock HTTP services
//!
//! One axum server emulates both external services: the tabular records
//! API under /airtable and the image host under /host. The pipeline runs
//! against temp directories and real HTTP round trips.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path as UrlPath, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use mfp_common::airtable::TableClient;
use mfp_upload::services::imagehost::ImageHostClient;
use mfp_upload::{UploadPipeline, UploadSettings};

#[derive(Default)]
struct MockState {
    records: Vec<(String, Map<String, Value>, usize)>, // id, fields, get count
    hosted: Vec<String>,
    destroyed: Vec<String>,
}

type Shared = Arc<Mutex<MockState>>;

/// Polls needed before the mock reports thumbnails.
const POLLS_UNTIL_THUMBNAILS: usize = 2;

fn record_json(id: &str, fields: &Map<String, Value>, polled: usize) -> Value {
    let mut fields = fields.clone();
    if polled >= POLLS_UNTIL_THUMBNAILS {
        if let Some(attachments) = fields.get_mut("PSF_Image").and_then(Value::as_array_mut) {
            if let Some(first) = attachments.first_mut().and_then(Value::as_object_mut) {
                first.insert(
                    "thumbnails".to_string(),
                    json!({ "small": { "url": "https://table/thumb.png" } }),
                );
            }
        }
    }
    json!({ "id": id, "fields": fields })
}

async fn create_record(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let fields = body["fields"].as_object().cloned().unwrap_or_default();
    let mut guard = state.lock().unwrap();
    let id = format!("rec{}", guard.records.len() + 1);
    guard.records.push((id.clone(), fields.clone(), 0));
    Json(record_json(&id, &fields, 0))
}

async fn list_records(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let guard = state.lock().unwrap();
    let records: Vec<Value> = match params.get("filterByFormula") {
        Some(formula) => {
            // Formula shape: {SourceHash} = "<hex>"
            let wanted = formula.split('"').nth(1).unwrap_or_default();
            guard
                .records
                .iter()
                .filter(|(_, fields, _)| {
                    fields.get("SourceHash").and_then(Value::as_str) == Some(wanted)
                })
                .map(|(id, fields, polled)| record_json(id, fields, *polled))
                .collect()
        }
        None => guard
            .records
            .iter()
            .map(|(id, fields, polled)| record_json(id, fields, *polled))
            .collect(),
    };
    Json(json!({ "records": records }))
}

async fn get_record(
    State(state): State<Shared>,
    UrlPath((_base, _table, id)): UrlPath<(String, String, String)>,
) -> Json<Value> {
    let mut guard = state.lock().unwrap();
    let record = guard
        .records
        .iter_mut()
        .find(|(record_id, _, _)| *record_id == id)
        .expect("unknown record id");
    record.2 += 1;
    Json(record_json(&record.0, &record.1, record.2))
}

async fn host_upload(State(state): State<Shared>) -> Json<Value> {
    let mut guard = state.lock().unwrap();
    let public_id = format!("hosted-{}", guard.hosted.len() + 1);
    guard.hosted.push(public_id.clone());
    Json(json!({
        "secure_url": format!("https://host/{}.png", public_id),
        "public_id": public_id,
    }))
}

async fn host_destroy(
    State(state): State<Shared>,
    body: String,
) -> Json<Value> {
    let public_id = body
        .split('&')
        .find_map(|kv| kv.strip_prefix("public_id="))
        .unwrap_or_default()
        .to_string();
    state.lock().unwrap().destroyed.push(public_id);
    Json(json!({ "result": "ok" }))
}

async fn spawn_mock() -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let app = Router::new()
        .route("/airtable/:base/:table", post(create_record).get(list_records))
        .route("/airtable/:base/:table/:id", get(get_record))
        .route("/host/:cloud/image/upload", post(host_upload))
        .route("/host/:cloud/image/destroy", post(host_destroy))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn write_measurement(dir: &Path) {
    let columns: Vec<&str> = mfp_upload::schema::target_fields().collect();
    let mut header: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    header.push("version".to_string());
    header.push("PSF_path".to_string());

    let mut row: Vec<String> = columns.iter().map(|_| "1.5".to_string()).collect();
    row.push("1.2.0".to_string());
    row.push("sub/bead_001.tif".to_string());

    let csv = format!("{}\n{}\n", header.join(","), row.join(","));
    std::fs::write(dir.join("psf_measurement.csv"), csv).unwrap();
    std::fs::write(dir.join("bead_001.tif"), b"not a real tiff").unwrap();
}

fn pipeline(base_url: &str, upload_dir: &Path, uploaded_dir: &Path) -> UploadPipeline {
    let table = TableClient::new(
        &format!("{}/airtable", base_url),
        "test-key",
        "appBASE",
        "psf-measurements",
    );
    let host = ImageHostClient::new(
        &format!("{}/host", base_url),
        "test-cloud",
        "host-key",
        "host-secret",
        None,
    )
    .unwrap();
    let mut settings =
        UploadSettings::new(upload_dir.to_path_buf(), uploaded_dir.to_path_buf());
    settings.poll_interval = Duration::from_millis(10);
    settings.poll_attempts = 10;
    UploadPipeline::new(table, host, settings)
}

#[tokio::test]
async fn one_csv_one_image_creates_one_record_and_archives() {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("upload");
    let uploaded_dir = dir.path().join("uploaded");
    std::fs::create_dir_all(&upload_dir).unwrap();
    write_measurement(&upload_dir);

    let (base_url, state) = spawn_mock().await;
    let stats = pipeline(&base_url, &upload_dir, &uploaded_dir)
        .run()
        .await
        .unwrap();

    assert_eq!(stats.files, 1);
    assert_eq!(stats.rows_created, 1);
    assert_eq!(stats.rows_skipped, 0);

    // Exactly one remote record, carrying the full schema plus the
    // attachment and idempotency key.
    let guard = state.lock().unwrap();
    assert_eq!(guard.records.len(), 1);
    let fields = &guard.records[0].1;
    for name in mfp_upload::schema::target_fields() {
        assert!(fields.contains_key(name), "missing field {}", name);
    }
    assert!(fields["PSF_Image"][0]["url"]
        .as_str()
        .unwrap()
        .starts_with("https://host/"));
    assert!(fields.contains_key("SourceHash"));

    // No hosted copy remains.
    assert_eq!(guard.hosted, guard.destroyed);

    // Local files moved to the archive directory.
    assert!(uploaded_dir.join("psf_measurement.csv").exists());
    assert!(uploaded_dir.join("bead_001.tif").exists());
    assert!(!upload_dir.join("psf_measurement.csv").exists());
    assert!(!upload_dir.join("bead_001.tif").exists());
}

#[tokio::test]
async fn rerun_after_partial_failure_does_not_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("upload");
    let uploaded_dir = dir.path().join("uploaded");
    std::fs::create_dir_all(&upload_dir).unwrap();
    write_measurement(&upload_dir);

    let (base_url, state) = spawn_mock().await;
    pipeline(&base_url, &upload_dir, &uploaded_dir)
        .run()
        .await
        .unwrap();

    // Simulate a re-run after a crash that left the inputs behind.
    write_measurement(&upload_dir);
    let stats = pipeline(&base_url, &upload_dir, &uploaded_dir)
        .run()
        .await
        .unwrap();

    assert_eq!(stats.rows_created, 0);
    assert_eq!(stats.rows_skipped, 1);

    let guard = state.lock().unwrap();
    assert_eq!(guard.records.len(), 1, "record was duplicated");
    assert_eq!(guard.hosted.len(), 1, "image was re-hosted");
}
