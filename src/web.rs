use crate::{
    app::{service::UploadForm, AppError, ItemService},
    auth::extract_bearer_token,
    config::Config,
    items::{Item, ReportState},
    users::User,
};
use anyhow::Context;
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{path::PathBuf, sync::Arc};
use tokio::signal;

const AUTH_TOKEN_HEADER: &str = "auth_token";

#[derive(Clone)]
struct SharedState {
    service: Arc<ItemService>,
}

pub fn router(service: Arc<ItemService>, uploads_dir: PathBuf, upload_limit: usize) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .nest_service("/api/file", tower_http::services::ServeDir::new(uploads_dir))
        .route("/", get(welcome))
        .route("/upload", post(upload))
        .route("/delete-item/:item_id", delete(delete_item))
        .route("/getMatchedItems", post(get_matched_items))
        .route("/deleteMatchedItem", post(delete_matched_item))
        .route("/getNotifications", post(get_notifications))
        .route("/getUserItems", post(get_user_items))
        .route("/getItems", post(get_items))
        .route("/update-fcm-token", post(update_push_token))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down, waiting for in-flight requests");
}

async fn start_app(service: Arc<ItemService>, config: Config, uploads_dir: PathBuf) -> anyhow::Result<()> {
    let app = router(service, uploads_dir, config.upload_limit_bytes());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    log::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(service: Arc<ItemService>, config: Config, uploads_dir: PathBuf) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(service, config, uploads_dir))
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::Validation(_) | AppError::MissingToken => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Downstream { .. } | AppError::MatchPhase { .. } => {
                log::error!("{:?}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &self.0 {
            AppError::MatchPhase { item_id, .. } => json!({
                "error": "item uploaded, please retry querying for matches",
                "item_id": item_id,
            }),
            err => json!({ "error": err.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Malformed JSON bodies are a validation failure, whatever axum's reason.
fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload
        .map(|Json(payload)| payload)
        .map_err(|rejection| HttpError(AppError::Validation(rejection.body_text())))
}

/// The authenticated user behind `auth_token` (or `Authorization: Bearer`).
struct Caller(User);

#[async_trait]
impl FromRequestParts<Arc<SharedState>> for Caller {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<SharedState>) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

        let token = header(AUTH_TOKEN_HEADER)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| header(AUTHORIZATION.as_str()).and_then(extract_bearer_token));

        let user = state.service.authenticate(token).await?;
        Ok(Caller(user))
    }
}

async fn welcome() -> Json<Value> {
    Json(json!({ "message": "Welcome to the lost and found API" }))
}

fn parse_state(raw: &str) -> Result<ReportState, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(ReportState::Lost),
        "false" | "0" => Ok(ReportState::Found),
        other => Err(AppError::Validation(format!("state must be true or false, got {other:?}"))),
    }
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let invalid = |err: axum::extract::multipart::MultipartError| AppError::Validation(err.body_text());

    let (mut name, mut state, mut description, mut timestamp, mut image) = (None, None, None, None, None);

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => name = Some(field.text().await.map_err(invalid)?),
            "state" => state = Some(parse_state(&field.text().await.map_err(invalid)?)?),
            "description" => description = Some(field.text().await.map_err(invalid)?),
            "timestamp" => {
                let raw = field.text().await.map_err(invalid)?;
                let parsed = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| AppError::Validation(format!("timestamp must be an integer, got {raw:?}")))?;
                timestamp = Some(parsed);
            }
            "image" => image = Some(field.bytes().await.map_err(invalid)?.to_vec()),
            other => log::debug!("ignoring upload field {other:?}"),
        }
    }

    let missing = |field: &str| AppError::Validation(format!("{field} is required"));

    Ok(UploadForm {
        name: name.ok_or_else(|| missing("name"))?,
        state: state.ok_or_else(|| missing("state"))?,
        description: description.ok_or_else(|| missing("description"))?,
        timestamp: timestamp.ok_or_else(|| missing("timestamp"))?,
        image: image.ok_or_else(|| missing("image"))?,
    })
}

async fn upload(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
    multipart: Multipart,
) -> Result<Json<Value>, HttpError> {
    let form = read_upload_form(multipart).await?;
    log::debug!(
        "upload from {}: name={:?} state={} image=[{} bytes]",
        caller.mail,
        form.name,
        form.state.label(),
        form.image.len()
    );

    let item = state.service.upload(&caller, form).await?;

    Ok(Json(json!({
        "message": "item uploaded successfully",
        "item_id": item.id,
    })))
}

async fn delete_item(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
    Path(item_id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    state.service.delete_item(&caller, &item_id).await?;
    Ok(Json(json!({ "message": "Item deleted successfully" })))
}

#[derive(Debug, Deserialize)]
struct ItemIdRequest {
    item_id: String,
}

async fn get_matched_items(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
    body: Result<Json<ItemIdRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = payload(body)?;
    let matched_items = state.service.matched_items(&caller, &request.item_id).await?;

    Ok(Json(json!({ "status": "success", "matched_items": matched_items })))
}

#[derive(Debug, Deserialize)]
struct DeleteMatchedItemRequest {
    item_id: String,
    matched_item_id: String,
}

async fn delete_matched_item(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
    body: Result<Json<DeleteMatchedItemRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = payload(body)?;
    state
        .service
        .delete_matched(&caller, &request.item_id, &request.matched_item_id)
        .await?;

    Ok(Json(json!({ "status": "success", "message": "Matched item removed successfully" })))
}

async fn get_notifications(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
) -> Result<Json<Value>, HttpError> {
    let notifications = state.service.notifications(&caller).await?;
    Ok(Json(json!({ "status": "success", "notifications": notifications })))
}

async fn get_user_items(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
) -> Result<Json<Value>, HttpError> {
    let items = state.service.user_items(&caller).await?;
    Ok(Json(json!({ "status": "success", "items": items })))
}

#[derive(Debug, Deserialize)]
struct GetItemsRequest {
    page: i64,
}

async fn get_items(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
    body: Result<Json<GetItemsRequest>, JsonRejection>,
) -> Result<Json<Vec<Item>>, HttpError> {
    let request = payload(body)?;
    Ok(Json(state.service.browse(&caller, request.page).await?))
}

#[derive(Deserialize)]
struct PushTokenRequest {
    token: String,
}

async fn update_push_token(
    State(state): State<Arc<SharedState>>,
    Caller(caller): Caller,
    body: Result<Json<PushTokenRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let request = payload(body)?;
    state.service.update_push_token(&caller, &request.token).await?;
    Ok(Json(json!({ "message": "Push token updated successfully" })))
}
