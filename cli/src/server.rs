use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use soulful_core::docstore::{Document, DocumentStore, StoreError, TimeRange};
use soulful_core::models::Collection;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

pub const DEFAULT_WATCH_WINDOW: Duration = Duration::from_secs(25);

#[derive(Clone)]
pub(crate) struct AppState {
    store: Arc<Mutex<DocumentStore>>,
    /// Bumped after every write so long-polling watchers re-check.
    changes: Arc<watch::Sender<u64>>,
    api_key: Option<String>,
    watch_window: Duration,
}

impl AppState {
    pub(crate) fn new(store: DocumentStore, api_key: Option<String>, watch_window: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            store: Arc::new(Mutex::new(store)),
            changes: Arc::new(changes),
            api_key,
            watch_window,
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, DocumentStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn changed(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct OwnerQuery {
    #[serde(rename = "userId")]
    user_id: String,
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(rename = "userId")]
    user_id: String,
    start: Option<String>,
    end: Option<String>,
}

#[derive(Deserialize)]
struct WatchQuery {
    #[serde(rename = "userId")]
    user_id: String,
    after: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct WatchResponse {
    pub version: u64,
    pub documents: Vec<Document>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ErrorResponse {
    pub code: String,
    pub message: String,
}

// --- Error handling ---

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    FailedPrecondition(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not-found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid-argument", msg),
            Self::FailedPrecondition(msg) => {
                (StatusCode::PRECONDITION_FAILED, "failed-precondition", msg)
            }
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        };
        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IndexMissing(_) => Self::FailedPrecondition(err.to_string()),
            StoreError::InvalidArgument(msg) => Self::BadRequest(msg),
            StoreError::Storage(e) => Self::Internal(e.into()),
        }
    }
}

fn parse_collection(name: &str) -> Result<Collection, ApiError> {
    Collection::from_name(name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown collection '{name}'")))
}

fn parse_instant(field: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("Invalid {field} '{value}'. Use RFC 3339")))
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    code: "unauthenticated".to_string(),
                    message: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_document(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let collection = parse_collection(&name)?;
    if let Some(fields) = body.as_object_mut() {
        fields
            .entry("createdAt")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    }

    let id = state.store().insert(collection, &body)?;
    state.changed();
    info!(%collection, %id, "document created");
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn list_documents(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let collection = parse_collection(&name)?;
    let range = match (query.start.as_deref(), query.end.as_deref()) {
        (None, None) => None,
        (Some(start), Some(end)) => Some(TimeRange {
            start: parse_instant("start", start)?,
            end: parse_instant("end", end)?,
        }),
        _ => {
            return Err(ApiError::BadRequest(
                "start and end must be given together".to_string(),
            ));
        }
    };

    let docs = state.store().query(collection, &query.user_id, range)?;
    Ok(Json(docs))
}

async fn delete_document(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<OwnerQuery>,
) -> Result<StatusCode, ApiError> {
    let collection = parse_collection(&name)?;
    let deleted = state.store().delete(collection, &query.user_id, &id)?;
    if !deleted {
        return Err(ApiError::NotFound(format!(
            "No document '{id}' in {collection}"
        )));
    }
    state.changed();
    Ok(StatusCode::NO_CONTENT)
}

/// Long-poll for changes. Answers immediately when the caller has no
/// version or a stale one, otherwise once the owner's collection changes or
/// the watch window elapses.
async fn watch_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WatchQuery>,
) -> Result<Json<WatchResponse>, ApiError> {
    let collection = parse_collection(&name)?;
    let deadline = tokio::time::Instant::now() + state.watch_window;
    let mut changes = state.changes.subscribe();

    loop {
        let current = {
            let store = state.store();
            let version = store.version(collection, &query.user_id)?;
            if query.after.is_none_or(|after| after != version) {
                let documents = store.query(collection, &query.user_id, None)?;
                return Ok(Json(WatchResponse { version, documents }));
            }
            version
        };

        let woke = tokio::time::timeout_at(deadline, changes.changed()).await;
        if !matches!(woke, Ok(Ok(()))) {
            let documents = state.store().query(collection, &query.user_id, None)?;
            return Ok(Json(WatchResponse {
                version: current,
                documents,
            }));
        }
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/docs/{collection}",
            get(list_documents).post(create_document),
        )
        .route("/v1/docs/{collection}/{id}", delete(delete_document))
        .route("/v1/watch/{collection}", get(watch_collection))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub struct ServeOptions {
    pub port: u16,
    pub bind: String,
    pub api_key: Option<String>,
    pub without_index: Vec<Collection>,
    pub watch_window: Duration,
}

pub async fn start_server(store: DocumentStore, options: ServeOptions) -> anyhow::Result<()> {
    for collection in &options.without_index {
        store.drop_index(*collection)?;
        warn!(%collection, "serving without composite index; queries will fail");
    }

    let ServeOptions {
        port,
        bind,
        api_key,
        watch_window,
        ..
    } = options;

    if let Some(ref key) = api_key {
        let shown = match (key.get(..4), key.get(key.len().saturating_sub(4)..)) {
            (Some(head), Some(tail)) if key.len() > 8 => format!("{head}...{tail}"),
            _ => "********".to_string(),
        };
        eprintln!("API key: {shown} (see api_key file in data directory)");
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let app = build_router(AppState::new(store, api_key, watch_window));
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
