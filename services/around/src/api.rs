use crate::auth::{AuthUser, TokenService};
use crate::blob_store::media_content_type;
use crate::config::ApiConfig;
use crate::credentials::CredentialStore;
use crate::error::ApiError;
use crate::geo_query::{GeoQueryService, SearchParams};
use crate::ingest::{IngestError, MediaUpload, PostIngestion, PostSubmission};
use crate::models::{normalize_username, User};
use crate::record_store::RecordStore;
use crate::search_index::SearchIndex;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const TEXT_HEADERS: [(header::HeaderName, &str); 2] = [
    (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
];

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub credentials: CredentialStore,
    pub ingestion: Arc<PostIngestion>,
    pub geo: Arc<GeoQueryService>,
    pub index: Arc<dyn SearchIndex>,
    pub records: Arc<dyn RecordStore>,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

/// Body of `POST /login`
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route(
            "/post",
            post(create_post).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route("/post/:id", delete(delete_post))
        .route("/search", get(search))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "around-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.records.ping().await;
    let index = state.index.index_exists().await;

    match (records, index) {
        (Ok(()), Ok(true)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "record_store": "connected",
                "search_index": "connected"
            })),
        ),
        (records, index) => {
            let index_state = match index {
                Ok(true) => "connected".to_string(),
                Ok(false) => "missing index".to_string(),
                Err(e) => e.to_string(),
            };
            let records_state = match records {
                Ok(()) => "connected".to_string(),
                Err(e) => e.to_string(),
            };
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "record_store": records_state,
                    "search_index": index_state
                })),
            )
        }
    }
}

async fn signup(
    State(state): State<AppState>,
    Json(user): Json<User>,
) -> Result<impl IntoResponse, ApiError> {
    info!(username = %user.username, "Received one signup request");

    match state.credentials.signup(user).await {
        Ok(_) => {
            metrics::counter!("around.signups", "outcome" => "created").increment(1);
            Ok((StatusCode::OK, TEXT_HEADERS, "User added successfully."))
        }
        Err(e) => {
            metrics::counter!("around.signups", "outcome" => "rejected").increment(1);
            Err(e.into())
        }
    }
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(username = %request.username, "Received one login request");

    if !state
        .tokens
        .check_credentials(&request.username, &request.password)
        .await
    {
        metrics::counter!("around.logins", "outcome" => "rejected").increment(1);
        return Err(ApiError::InvalidCredentials);
    }

    let token = state
        .tokens
        .issue(&normalize_username(&request.username))?;

    metrics::counter!("around.logins", "outcome" => "accepted").increment(1);
    Ok((StatusCode::OK, TEXT_HEADERS, token))
}

/// `POST /post`: the token is verified by [`AuthUser`] before the multipart
/// body is read.
async fn create_post(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let submission = read_submission(multipart).await?;
    let post = state.ingestion.ingest(&user.username, submission).await?;

    Ok(json_response(post))
}

async fn delete_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.ingestion.remove(&user.username, &id).await?;

    Ok((StatusCode::OK, TEXT_HEADERS, format!("Post {} deleted.", id)))
}

async fn search(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    info!(username = %user.username, "Received one request for search");

    let posts = state.geo.search(&params).await?;
    Ok(json_response(posts))
}

fn json_response<T: serde::Serialize>(body: T) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(body),
    )
}

/// Collect `message`, `lat`, `lon` and the optional `image` file part
async fn read_submission(mut multipart: Multipart) -> Result<PostSubmission, IngestError> {
    let mut submission = PostSubmission::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "Failed to read multipart field");
        IngestError::Multipart(err.body_text())
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "image" => {
                let content_type = media_content_type(field.content_type());
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| IngestError::Multipart(err.body_text()))?;
                submission.media = Some(MediaUpload { content_type, data });
            }
            "message" | "lat" | "lon" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| IngestError::Multipart(err.body_text()))?;
                match name.as_str() {
                    "message" => submission.message = value,
                    "lat" => submission.lat = Some(value),
                    _ => submission.lon = Some(value),
                }
            }
            _ => {}
        }
    }

    Ok(submission)
}

/// Start the HTTP API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
