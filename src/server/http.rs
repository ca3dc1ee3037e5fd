//! HTTP API
//!
//! Internal endpoints consumed by the client-side upload flow. Built on
//! `hyper` and `tokio`: one task per connection, HTTP/1.1, stops accepting
//! when the shutdown future resolves.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET` | `/health` | liveness |
//! | `POST` | `/api/stream/upload-target` | issue a one-time URL or resumable endpoint |
//! | `POST` | `/api/stream/records` | create a provisional record and start reconciling |
//! | `GET` | `/api/stream/records/{id}` | fetch a record |
//! | `DELETE` | `/api/stream/records/{id}` | remove a record and its remote video |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stream_ingestr::server::http::{ApiServer, AppState};
//!
//! # async fn example(state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error>> {
//! let server = ApiServer::bind("127.0.0.1:0", state).await?;
//! println!("listening on {}", server.local_addr());
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

use crate::auth::{AuthError, AuthRequest, Authenticator};
use crate::authz::{AuthzRequest, Authorizer, ACTION_DELETE, ACTION_UPLOAD};
use crate::deletion::{DeletionError, DeletionGuard};
use crate::ingest::Ingestor;
use crate::metrics;
use crate::router::{ApiRequestParser, ApiRoute, RouterError};
use crate::server::ServerError;
use crate::store::StoreError;
use crate::stream::StreamId;
use crate::upload::{decide, UploadError, UploadIntent, UploadMode, UploadTarget};
use http_body_util::{BodyExt, Limited};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Header selecting the upload mode explicitly
pub const HEADER_UPLOAD_MODE: &str = "x-upload-mode";

/// Header declaring the total file size
pub const HEADER_UPLOAD_LENGTH: &str = "upload-length";

/// Largest accepted JSON request body
const MAX_JSON_BODY: usize = 64 * 1024;

/// Shared handler state
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub deletion: DeletionGuard,
    /// `None` when authentication is disabled
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub authorizer: Arc<dyn Authorizer>,
}

/// API server bound to a listener
pub struct ApiServer {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ApiServer {
    /// Bind to `address`; port 0 lets the OS pick
    pub async fn bind(address: &str, state: Arc<AppState>) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("API server bound to {}", local_addr);

        Ok(Self {
            state,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("API server stopped accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Error rendered as `{"error": "..."}`
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    challenge: Option<&'static str>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            challenge: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn into_response(self) -> Response<String> {
        let body = serde_json::json!({ "error": self.message }).to_string();
        let mut response = json_body(self.status, body);
        if let Some(challenge) = self.challenge {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        let status = match &e {
            UploadError::Configuration(_) => StatusCode::BAD_REQUEST,
            UploadError::Authorization { .. } => StatusCode::FORBIDDEN,
            UploadError::Upstream { .. } | UploadError::Network(_) => StatusCode::BAD_GATEWAY,
            UploadError::Store(StoreError::AlreadyExists(_)) => StatusCode::CONFLICT,
            UploadError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<DeletionError> for ApiError {
    fn from(e: DeletionError) -> Self {
        let status = match &e {
            DeletionError::NotFound(_) => StatusCode::NOT_FOUND,
            DeletionError::Upstream { .. } | DeletionError::Network(_) => StatusCode::BAD_GATEWAY,
            DeletionError::Configuration(_) | DeletionError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        let status = match &e {
            RouterError::NotFound(_) | RouterError::InvalidStreamId(_) => StatusCode::NOT_FOUND,
            RouterError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        };
        Self::new(status, e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let challenge = match &e {
            AuthError::MissingAuth => "Bearer",
            AuthError::TokenExpired => {
                "Bearer error=\"invalid_token\", error_description=\"Token expired\""
            }
            _ => "Bearer error=\"invalid_token\"",
        };
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: e.to_string(),
            challenge: Some(challenge),
        }
    }
}

fn json_body(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<String>, ApiError> {
    let body = serde_json::to_string(value)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(json_body(status, body))
}

/// Body of `POST /api/stream/upload-target`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetRequestBody {
    collection_slug: String,
    filename: String,
    #[serde(default)]
    mime_type: String,
}

/// Response of `POST /api/stream/upload-target`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetResponseBody {
    #[serde(rename = "uploadURL", default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tus_endpoint: Option<String>,
    pub stream_id: String,
}

impl From<UploadTarget> for TargetResponseBody {
    fn from(target: UploadTarget) -> Self {
        match target {
            UploadTarget::Direct {
                upload_url,
                stream_id,
            } => Self {
                upload_url: Some(upload_url),
                tus_endpoint: None,
                stream_id: stream_id.into(),
            },
            UploadTarget::Resumable {
                resource_url,
                stream_id,
            } => Self {
                upload_url: None,
                tus_endpoint: Some(resource_url),
                stream_id: stream_id.into(),
            },
        }
    }
}

/// Body of `POST /api/stream/records`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequestBody {
    collection_slug: String,
    stream_id: String,
}

/// Resolve the upload mode from request headers
///
/// An explicit mode wins. Otherwise a declared length is run through the
/// size threshold, and without one the mode is direct. Resumable needs a
/// declared length.
fn resolve_mode(
    explicit: Option<&str>,
    upload_length: Option<&str>,
    threshold: u64,
) -> Result<(UploadMode, u64), ApiError> {
    let length = upload_length
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| ApiError::bad_request(format!("invalid Upload-Length '{}'", v)))
        })
        .transpose()?;

    let mode = match explicit {
        Some(mode) => mode
            .parse::<UploadMode>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => length.map_or(UploadMode::Direct, |len| decide(len, threshold)),
    };

    if mode == UploadMode::Resumable && length.is_none() {
        return Err(ApiError::bad_request(
            "resumable uploads require an Upload-Length header",
        ));
    }

    Ok((mode, length.unwrap_or(0)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn read_json<T: DeserializeOwned>(body: Incoming) -> Result<T, ApiError> {
    let bytes = Limited::new(body, MAX_JSON_BODY)
        .collect()
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read body: {}", e)))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
}

/// Build AuthRequest from hyper Request headers
fn build_auth_request(req: &Request<Incoming>) -> AuthRequest {
    let mut headers = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }

    AuthRequest {
        headers,
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    }
}

async fn authorize(
    state: &AppState,
    requester: Option<&str>,
    action: &str,
    collection: &str,
) -> Result<(), ApiError> {
    let request = AuthzRequest::new(requester, action, collection);
    match state.authorizer.authorize(&request).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::new(
            StatusCode::FORBIDDEN,
            format!("not authorized to {} in collection '{}'", action, collection),
        )),
        Err(e) => {
            warn!(error = %e, "Access predicate failed, denying");
            Err(ApiError::new(StatusCode::FORBIDDEN, e.to_string()))
        }
    }
}

/// Handle HTTP request
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<String>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("Handling {} {}", method, path);

    let response = match route(req, &state).await {
        Ok(response) => response,
        Err(e) => {
            if e.status.is_server_error() {
                error!(status = e.status.as_u16(), error = %e.message, "{} {} failed", method, path);
            } else {
                warn!(status = e.status.as_u16(), error = %e.message, "{} {} rejected", method, path);
            }
            e.into_response()
        }
    };
    Ok(response)
}

async fn route(req: Request<Incoming>, state: &AppState) -> Result<Response<String>, ApiError> {
    let route = ApiRequestParser::parse(req.method().as_str(), req.uri().path())?;

    let requester = match (&state.authenticator, route.requires_auth()) {
        (Some(authenticator), true) => {
            let result = authenticator.authenticate(&build_auth_request(&req)).await;
            metrics::record_auth_attempt("jwt", result.is_ok());
            Some(result?.subject)
        }
        _ => None,
    };
    let requester = requester.as_deref();

    match route {
        ApiRoute::Health => {
            let mut response = Response::new("ok".to_string());
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            Ok(response)
        }
        ApiRoute::IssueTarget => issue_target(req, state, requester).await,
        ApiRoute::RegisterRecord => register_record(req, state, requester).await,
        ApiRoute::GetRecord { stream_id } => get_record(state, &stream_id).await,
        ApiRoute::DeleteRecord { stream_id } => delete_record(state, requester, &stream_id).await,
    }
}

async fn issue_target(
    req: Request<Incoming>,
    state: &AppState,
    requester: Option<&str>,
) -> Result<Response<String>, ApiError> {
    let (mode, total_bytes) = resolve_mode(
        header_str(req.headers(), HEADER_UPLOAD_MODE),
        header_str(req.headers(), HEADER_UPLOAD_LENGTH),
        state.ingestor.resumable_threshold(),
    )?;
    let body: TargetRequestBody = read_json(req.into_body()).await?;

    let intent = UploadIntent {
        collection_key: body.collection_slug,
        filename: body.filename,
        mime_type: body.mime_type,
        total_bytes,
        mode,
    };

    let target = state
        .ingestor
        .issuer()
        .request_target(&intent, requester)
        .await?;
    json_response(StatusCode::OK, &TargetResponseBody::from(target))
}

async fn register_record(
    req: Request<Incoming>,
    state: &AppState,
    requester: Option<&str>,
) -> Result<Response<String>, ApiError> {
    let body: RegisterRequestBody = read_json(req.into_body()).await?;
    let stream_id = StreamId::parse(&body.stream_id)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    // Unknown collections are a configuration error, not a denial
    if !state.ingestor.issuer().registry().contains(&body.collection_slug) {
        return Err(ApiError::bad_request(format!(
            "collection '{}' is not registered",
            body.collection_slug
        )));
    }
    authorize(state, requester, ACTION_UPLOAD, &body.collection_slug).await?;

    let (record, _ticket) = state
        .ingestor
        .register(&body.collection_slug, stream_id)
        .await?;
    json_response(StatusCode::ACCEPTED, &record)
}

async fn get_record(state: &AppState, stream_id: &StreamId) -> Result<Response<String>, ApiError> {
    match state.ingestor.store().get(stream_id).await? {
        Some(record) => json_response(StatusCode::OK, &record),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("record {} not found", stream_id),
        )),
    }
}

async fn delete_record(
    state: &AppState,
    requester: Option<&str>,
    stream_id: &StreamId,
) -> Result<Response<String>, ApiError> {
    let record = state
        .ingestor
        .store()
        .get(stream_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("record {} not found", stream_id)))?;

    authorize(state, requester, ACTION_DELETE, &record.collection).await?;

    state.deletion.remove_record(stream_id).await?;

    let mut response = Response::new(String::new());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}
