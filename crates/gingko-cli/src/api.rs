use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use gingko_core::cluster::ClusterCache;
use gingko_core::config::SimilaritySettings;
use gingko_core::extraction::{Extraction, ExtractionKind};
use gingko_core::storage::models::Record;
use gingko_core::storage::Database;
use gingko_core::{AppConfig, Error, QueryMatch, QueryService};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Upper bound on `limit` accepted from a request.
const MAX_LIMIT: usize = 1000;
const DEFAULT_LIST_LIMIT: usize = 100;

pub struct ApiState {
    db_path: String,
    store_timeout: Duration,
    similarity: SimilaritySettings,
    clusters: Mutex<ClusterCache>,
}

impl ApiState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            db_path: config.db_path.clone(),
            store_timeout: config.store.timeout(),
            similarity: config.similarity.clone(),
            clusters: Mutex::new(ClusterCache::new(config.similarity.threshold)),
        }
    }

    fn open_db(&self) -> Result<Database, Error> {
        Ok(Database::open_with_timeout(&self.db_path, self.store_timeout)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct SimilarityRequest {
    signature: Option<String>,
    content_base64: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SimilarityResponse {
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    /// Path prefix; `<archive>!/` lists an archive's members.
    path: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecordsResponse {
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractionsQuery {
    path: Option<String>,
    #[serde(rename = "type")]
    kind: Option<ExtractionKind>,
}

#[derive(Debug, Serialize)]
pub struct ExtractionsResponse {
    extractions: Vec<Extraction>,
}

enum QueryInput {
    Signature(String),
    Content(Vec<u8>),
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/similarity-query", post(similarity_query))
        .route("/record/{id}", get(get_record))
        .route("/records", get(list_records))
        .route("/extractions", get(list_extractions))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

pub async fn serve(state: Arc<ApiState>, bind: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Gingko query API listening on {}", bind);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;
    info!("Query API stopped");
    Ok(())
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn error_response(err: Error) -> Response {
    match err {
        Error::Input(message) => error_body(StatusCode::BAD_REQUEST, message),
        Error::TransientStore(message) => {
            warn!("Store unavailable: {}", message);
            error_body(StatusCode::SERVICE_UNAVAILABLE, "store unavailable".to_string())
        }
        other => {
            error!("Request failed: {}", other);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

fn parse_request(body: SimilarityRequest, default_limit: usize) -> Result<(QueryInput, usize), Error> {
    let input = match (body.signature, body.content_base64) {
        (Some(signature), None) => QueryInput::Signature(signature),
        (None, Some(encoded)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::Input(format!("invalid content_base64: {}", e)))?;
            QueryInput::Content(bytes)
        }
        _ => {
            return Err(Error::Input(
                "exactly one of 'signature' or 'content_base64' is required".to_string(),
            ))
        }
    };
    let limit = body.limit.unwrap_or(default_limit).min(MAX_LIMIT);
    Ok((input, limit))
}

async fn similarity_query(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<SimilarityRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let (input, limit) = match parse_request(body, state.similarity.top_k) {
        Ok(parsed) => parsed,
        Err(e) => return error_response(e),
    };

    let result = tokio::task::spawn_blocking(move || -> Result<Vec<QueryMatch>, Error> {
        let db = state.open_db()?;
        let service = QueryService::new(&db, &state.clusters, &state.similarity);
        match input {
            QueryInput::Signature(text) => service.query_text(&text, limit),
            QueryInput::Content(bytes) => service.query_bytes(&bytes, limit),
        }
    })
    .await;

    match result {
        Ok(Ok(matches)) => Json(SimilarityResponse { matches }).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(Error::Other(format!("query task failed: {}", e))),
    }
}

async fn get_record(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    let result = tokio::task::spawn_blocking(move || -> Result<Option<Record>, Error> {
        let db = state.open_db()?;
        let service = QueryService::new(&db, &state.clusters, &state.similarity);
        service.get_record(&id)
    })
    .await;

    match result {
        Ok(Ok(Some(record))) => Json(record).into_response(),
        Ok(Ok(None)) => error_body(StatusCode::NOT_FOUND, "record not found".to_string()),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(Error::Other(format!("record task failed: {}", e))),
    }
}

async fn list_records(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<RecordsQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIMIT) as i64;
    let offset = params.offset.unwrap_or(0) as i64;
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<Record>, Error> {
        let db = state.open_db()?;
        db.list_records(params.path.as_deref(), offset, limit)
    })
    .await;

    match result {
        Ok(Ok(records)) => Json(RecordsResponse { records }).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(Error::Other(format!("listing task failed: {}", e))),
    }
}

async fn list_extractions(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ExtractionsQuery>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<Extraction>, Error> {
        let db = state.open_db()?;
        db.list_extractions(params.path.as_deref(), params.kind)
    })
    .await;

    match result {
        Ok(Ok(extractions)) => Json(ExtractionsResponse { extractions }).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(Error::Other(format!("listing task failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gingko_core::index::SignatureIndex;
    use gingko_core::storage::models::Link;
    use gingko_core::{compute_signature, FileSignature};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn sample_bytes(seed: u32) -> Vec<u8> {
        (0..20_000u32)
            .map(|i| (i.wrapping_add(seed).wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect()
    }

    /// A store holding two linked records, "a" and "b", and a zip member "m".
    fn setup() -> (TempDir, Arc<ApiState>, FileSignature) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("api.db");
        let config = AppConfig {
            db_path: db_path.to_string_lossy().into_owned(),
            ..AppConfig::default()
        };

        let db = Database::open(&config.db_path).unwrap();
        let sig = compute_signature(&sample_bytes(1));
        db.index_record(&Record::new("a".to_string(), "/data/a".to_string(), sig.clone()))
            .unwrap();
        db.index_record(&Record::new("b".to_string(), "/data/b".to_string(), FileSignature::empty()))
            .unwrap();
        let link = |id: &str| Link {
            record_id: id.to_string(),
            score: 95,
        };
        db.update_links("a", 0, &[link("b")]).unwrap();
        db.update_links("b", 0, &[link("a")]).unwrap();
        db.index_record(&Record::new(
            "m".to_string(),
            "/drop/x.zip!/inner.txt".to_string(),
            FileSignature::empty(),
        ))
        .unwrap();
        db.track_extraction(&Extraction {
            path: "/drop/x.zip".to_string(),
            kind: ExtractionKind::Zip,
            size_on_disk: 512,
            files: 1,
            tracked_at: "2026-01-01T00:00:00+00:00".to_string(),
        })
        .unwrap();

        (dir, Arc::new(ApiState::new(&config)), sig)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn post_json(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/similarity-query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_query_by_signature() {
        let (_dir, state, sig) = setup();
        let body = serde_json::json!({ "signature": sig.to_string(), "limit": 5 });
        let (status, value) = send(router(state), post_json(body)).await;

        assert_eq!(status, StatusCode::OK);
        let matches = value["matches"].as_array().unwrap();
        assert_eq!(matches[0]["record_id"], "a");
        assert_eq!(matches[0]["score"], 100);
        assert_eq!(matches[0]["path"], "/data/a");
    }

    #[tokio::test]
    async fn test_query_by_content() {
        let (_dir, state, _) = setup();
        let encoded = base64::engine::general_purpose::STANDARD.encode(sample_bytes(1));
        let body = serde_json::json!({ "content_base64": encoded });
        let (status, value) = send(router(state), post_json(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["matches"][0]["record_id"], "a");
    }

    #[tokio::test]
    async fn test_unmatched_query_is_empty() {
        let (_dir, state, _) = setup();
        let body = serde_json::json!({ "signature": "96:ABCDEFGHIJKLMNOP:abcdefgh" });
        let (status, value) = send(router(state), post_json(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(value["matches"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_input_is_bad_request() {
        let (_dir, state, _) = setup();

        let (status, _) = send(
            router(state.clone()),
            post_json(serde_json::json!({ "signature": "7:not valid" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            router(state.clone()),
            post_json(serde_json::json!({ "content_base64": "%%%" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(router(state.clone()), post_json(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri("/similarity-query")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(router(state), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_record_with_cluster() {
        let (_dir, state, _) = setup();
        let request = Request::builder()
            .uri("/record/b")
            .body(Body::empty())
            .unwrap();
        let (status, value) = send(router(state.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["id"], "b");
        assert_eq!(value["cluster_id"], "a");
        assert_eq!(value["similar_to"][0]["record_id"], "a");

        let missing = Request::builder()
            .uri("/record/zzz")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(router(state), missing).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_list_records() {
        let (_dir, state, _) = setup();

        let (status, value) = send(router(state.clone()), get_request("/records")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["records"].as_array().unwrap().len(), 3);

        let (status, value) = send(
            router(state.clone()),
            get_request("/records?path=/drop/x.zip!/&limit=10"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let records = value["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "m");

        let (status, value) = send(router(state), get_request("/records?limit=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["records"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_extractions() {
        let (_dir, state, _) = setup();

        let (status, value) = send(router(state.clone()), get_request("/extractions?type=zip")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["extractions"][0]["path"], "/drop/x.zip");
        assert_eq!(value["extractions"][0]["type"], "zip");
        assert_eq!(value["extractions"][0]["files"], 1);

        let (status, value) = send(router(state.clone()), get_request("/extractions?type=tar")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["extractions"].as_array().unwrap().is_empty());

        let (status, _) = send(router(state), get_request("/extractions?type=rar")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, state, _) = setup();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
