//! Axum router construction and route handlers.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].  Object endpoints are thin: they pick
//! the resource, build the transfer session from the request headers and
//! hand over to [`crate::transfer::service`].

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::runtime::Handle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::errors::{error_response, TransferError};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::resources::{
    bucket, object, validate_bucket_name, ListingQuery, ListingResource, ObjectKey,
    ObjectResource, RemoteReadResource, StorageType,
};
use crate::transfer::headers::{
    generate_op_id, header_has_token, header_str, APPLICATION_JSON, X_CLIENT_ID, X_OBJECT_HASH,
    X_OBJECT_SIZE, X_OP_ID, X_TYPE,
};
use crate::transfer::{service, Direction, TransferHandler, TransferSession};
use crate::AppState;

/// Build the axum [`Router`] with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/buckets", get(list_buckets))
        .route(
            "/buckets/:bucket",
            get(get_bucket)
                .head(check_bucket)
                .put(create_bucket)
                .delete(delete_bucket),
        )
        .route("/objects/:bucket", get(list_objects))
        .route(
            "/objects/:bucket/*name",
            get(read_object)
                .head(check_object)
                .post(create_object)
                .delete(delete_object),
        )
        .route("/replicator/objects/:bucket/*name", get(remote_read_object))
        .with_state(state)
        .layer(middleware::from_fn(common_headers_middleware))
        // Outer: captures the full request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Objects are streamed; no body size limit.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `Date` and `Server` to every response.
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert(header::DATE, value);
    }
    headers.insert(header::SERVER, HeaderValue::from_static("relaystore"));
    response
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, APPLICATION_JSON)],
        r#"{"status":"ok"}"#,
    )
}

// -- Helpers -----------------------------------------------------------------

/// Operation id of a request that failed before a transfer session existed.
fn request_op_id(headers: &HeaderMap) -> String {
    header_str(headers, X_OP_ID)
        .map(str::to_string)
        .unwrap_or_else(generate_op_id)
}

fn reject(state: &AppState, headers: &HeaderMap, err: &TransferError) -> Response {
    info!(status = err.status_code().as_u16(), error = %err, "request rejected");
    error_response(err, &request_op_id(headers), &state.config.server.module)
}

fn session(headers: &HeaderMap, direction: Direction) -> TransferSession {
    match direction {
        Direction::Upload => {
            let explicit_length = header_str(headers, X_OBJECT_SIZE)
                .and_then(|value| value.parse().ok())
                .unwrap_or(0);
            let declared_hash = header_str(headers, X_OBJECT_HASH).map(str::to_string);
            TransferSession::setup(headers, direction, explicit_length, declared_hash, false)
        }
        Direction::Download => TransferSession::setup(headers, direction, 0, None, false),
    }
}

fn object_resource(state: &AppState) -> ObjectResource {
    ObjectResource::new(
        state.catalog.clone(),
        state.storage.clone(),
        state.config.server.site.clone(),
        state.config.transfer.compute_sha256,
    )
}

/// Run a non-streaming catalog operation on the blocking pool.  Errors
/// come back as the header-only error response.
async fn run_blocking<T, F>(state: &AppState, headers: &HeaderMap, op: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransferError> + Send + 'static,
{
    let err = match tokio::task::spawn_blocking(op).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err)) => err,
        Err(join_error) => {
            TransferError::Internal(anyhow::anyhow!("catalog worker failed: {join_error}"))
        }
    };
    if err.is_business() {
        Err(reject(state, headers, &err))
    } else {
        error!(error = ?err, kind = err.kind(), "catalog operation failed");
        Err(error_response(
            &err,
            &request_op_id(headers),
            &state.config.server.module,
        ))
    }
}

fn json_response(status: StatusCode, headers: &HeaderMap, value: &impl Serialize) -> Response {
    match serde_json::to_string(value) {
        Ok(body) => (
            status,
            [
                ("content-type", APPLICATION_JSON.to_string()),
                (X_OP_ID, request_op_id(headers)),
            ],
            body,
        )
            .into_response(),
        Err(e) => TransferError::Internal(e.into()).into_response(),
    }
}

/// Empty answer to an existence check.
fn type_response(status: StatusCode, headers: &HeaderMap, found: StorageType) -> Response {
    (
        status,
        [
            (X_TYPE, found.as_str().to_string()),
            (X_OP_ID, request_op_id(headers)),
        ],
    )
        .into_response()
}

// -- Buckets -----------------------------------------------------------------

/// `GET /buckets`: JSON array of the `READY` buckets.
async fn list_buckets(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let catalog = state.catalog.clone();
    match run_blocking(&state, &headers, move || bucket::list_buckets(catalog.as_ref())).await {
        Ok(buckets) => json_response(StatusCode::OK, &headers, &buckets),
        Err(response) => response,
    }
}

/// `PUT /buckets/:bucket`
async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let catalog = state.catalog.clone();
    let storage = state.storage.clone();
    let site = state.config.server.site.clone();
    let created = run_blocking(&state, &headers, move || {
        bucket::create_bucket(catalog.as_ref(), storage.as_ref(), &name, &site)
    })
    .await;
    match created {
        Ok(record) => {
            info!(bucket = %record.name, "bucket created");
            json_response(StatusCode::CREATED, &headers, &record)
        }
        Err(response) => response,
    }
}

/// `HEAD /buckets/:bucket`: `x-relaystore-type` is `BUCKET` or `NONE`.
async fn check_bucket(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = validate_bucket_name(&name) {
        return reject(&state, &headers, &e);
    }
    let catalog = state.catalog.clone();
    let exists = run_blocking(&state, &headers, move || {
        Ok(catalog.bucket_exists(&name)?)
    })
    .await;
    match exists {
        Ok(true) => type_response(StatusCode::NO_CONTENT, &headers, StorageType::Bucket),
        Ok(false) => type_response(StatusCode::NOT_FOUND, &headers, StorageType::None),
        Err(response) => response,
    }
}

/// `GET /buckets/:bucket`: JSON bucket record.
async fn get_bucket(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = validate_bucket_name(&name) {
        return reject(&state, &headers, &e);
    }
    let catalog = state.catalog.clone();
    match run_blocking(&state, &headers, move || bucket::get_bucket(catalog.as_ref(), &name)).await
    {
        Ok(record) => json_response(StatusCode::OK, &headers, &record),
        Err(response) => response,
    }
}

/// `DELETE /buckets/:bucket`
async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = validate_bucket_name(&name) {
        return reject(&state, &headers, &e);
    }
    let catalog = state.catalog.clone();
    let storage = state.storage.clone();
    let deleted = run_blocking(&state, &headers, move || {
        bucket::delete_bucket(catalog.as_ref(), storage.as_ref(), &name)
    })
    .await;
    match deleted {
        Ok(record) => {
            info!(bucket = %record.name, "bucket deleted");
            (StatusCode::NO_CONTENT, [(X_OP_ID, request_op_id(&headers))]).into_response()
        }
        Err(response) => response,
    }
}

// -- Objects -----------------------------------------------------------------

/// `POST /objects/:bucket/*name`
async fn create_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let key = match ObjectKey::parse(&bucket, &name) {
        Ok(key) => key,
        Err(e) => return reject(&state, &headers, &e),
    };
    let session = session(&headers, Direction::Upload);
    let resource = object_resource(&state).with_request_headers(&headers);
    let handler = TransferHandler::new(resource, key, session, state.settings.clone(), headers);
    service::upload(handler, body).await
}

/// `GET /objects/:bucket/*name`: the object bytes, or its catalog
/// record as JSON when the client accepts `application/json`.
async fn read_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let key = match ObjectKey::parse(&bucket, &name) {
        Ok(key) => key,
        Err(e) => return reject(&state, &headers, &e),
    };
    if header_has_token(&headers, header::ACCEPT.as_str(), APPLICATION_JSON) {
        let catalog = state.catalog.clone();
        return match run_blocking(&state, &headers, move || {
            object::object_info(catalog.as_ref(), &key)
        })
        .await
        {
            Ok(record) => json_response(StatusCode::OK, &headers, &record),
            Err(response) => response,
        };
    }
    let session = session(&headers, Direction::Download);
    let handler = TransferHandler::new(
        object_resource(&state),
        key,
        session,
        state.settings.clone(),
        headers,
    );
    service::pull(handler).await
}

/// `HEAD /objects/:bucket/*name`: `x-relaystore-type` is `OBJECT`,
/// `DIRECTORY` or `NONE`.
async fn check_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let key = match ObjectKey::parse(&bucket, &name) {
        Ok(key) => key,
        Err(e) => return reject(&state, &headers, &e),
    };
    let catalog = state.catalog.clone();
    let found = run_blocking(&state, &headers, move || {
        object::check_object_or_directory(catalog.as_ref(), &key)
    })
    .await;
    match found {
        Ok(StorageType::None) => type_response(StatusCode::NOT_FOUND, &headers, StorageType::None),
        Ok(found) => type_response(StatusCode::NO_CONTENT, &headers, found),
        Err(response) => response,
    }
}

/// `DELETE /objects/:bucket/*name`
async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let key = match ObjectKey::parse(&bucket, &name) {
        Ok(key) => key,
        Err(e) => return reject(&state, &headers, &e),
    };
    let catalog = state.catalog.clone();
    let storage = state.storage.clone();
    let deleted = run_blocking(&state, &headers, move || {
        object::delete_object(catalog.as_ref(), storage.as_ref(), &key)
    })
    .await;
    match deleted {
        Ok(record) => {
            info!(bucket = %record.bucket, name = %record.name, "object deleted");
            (StatusCode::NO_CONTENT, [(X_OP_ID, request_op_id(&headers))]).into_response()
        }
        Err(response) => response,
    }
}

/// `GET /objects/:bucket`: NDJSON listing filtered by request headers.
async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = validate_bucket_name(&bucket) {
        return reject(&state, &headers, &e);
    }
    let query = ListingQuery::from_headers(bucket, &headers);
    let session = session(&headers, Direction::Download);
    let handler = TransferHandler::new(
        ListingResource::new(state.catalog.clone()),
        query,
        session,
        state.settings.clone(),
        headers,
    );
    service::pull_list(handler).await
}

/// `GET /replicator/objects/:bucket/*name`: read through the peer site.
async fn remote_read_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let key = match ObjectKey::parse(&bucket, &name) {
        Ok(key) => key,
        Err(e) => return reject(&state, &headers, &e),
    };
    let session = session(&headers, Direction::Download);
    let resource = RemoteReadResource::new(
        state.peer.clone(),
        state.config.replicator.peer_url.clone(),
        Handle::current(),
        &session,
    )
    .with_client_id(header_str(&headers, X_CLIENT_ID).map(str::to_string));
    let handler = TransferHandler::new(resource, key, session, state.settings.clone(), headers);
    service::pull(handler).await
}
