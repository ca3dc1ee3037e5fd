//! API Router
//!
//! Parses incoming requests into [`ApiRoute`]s for the HTTP handler.

use crate::stream::StreamId;
use thiserror::Error;

/// Prefix of every authenticated endpoint
pub const API_PREFIX: &str = "/api/";

/// Router errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Invalid stream id: {0}")]
    InvalidStreamId(String),
}

/// Routable operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRoute {
    /// GET /health
    Health,
    /// POST /api/stream/upload-target
    IssueTarget,
    /// POST /api/stream/records
    RegisterRecord,
    /// GET /api/stream/records/{id}
    GetRecord { stream_id: StreamId },
    /// DELETE /api/stream/records/{id}
    DeleteRecord { stream_id: StreamId },
}

impl ApiRoute {
    /// Whether the route sits behind authentication
    pub fn requires_auth(&self) -> bool {
        !matches!(self, ApiRoute::Health)
    }

    /// Short name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            ApiRoute::Health => "health",
            ApiRoute::IssueTarget => "issue_target",
            ApiRoute::RegisterRecord => "register_record",
            ApiRoute::GetRecord { .. } => "get_record",
            ApiRoute::DeleteRecord { .. } => "delete_record",
        }
    }
}

/// Request parser
pub struct ApiRequestParser;

impl ApiRequestParser {
    /// Parse method and path (query string excluded) into a route
    pub fn parse(method: &str, path: &str) -> Result<ApiRoute, RouterError> {
        let trimmed = path.trim_end_matches('/');
        let segments: Vec<&str> = trimmed
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match segments.as_slice() {
            ["health"] => match method {
                "GET" | "HEAD" => Ok(ApiRoute::Health),
                _ => Err(Self::not_allowed(method, path)),
            },
            ["api", "stream", "upload-target"] => match method {
                "POST" => Ok(ApiRoute::IssueTarget),
                _ => Err(Self::not_allowed(method, path)),
            },
            ["api", "stream", "records"] => match method {
                "POST" => Ok(ApiRoute::RegisterRecord),
                _ => Err(Self::not_allowed(method, path)),
            },
            ["api", "stream", "records", id] => {
                let stream_id = StreamId::parse(id)
                    .map_err(|_| RouterError::InvalidStreamId((*id).to_string()))?;
                match method {
                    "GET" => Ok(ApiRoute::GetRecord { stream_id }),
                    "DELETE" => Ok(ApiRoute::DeleteRecord { stream_id }),
                    _ => Err(Self::not_allowed(method, path)),
                }
            }
            _ => Err(RouterError::NotFound(path.to_string())),
        }
    }

    fn not_allowed(method: &str, path: &str) -> RouterError {
        RouterError::MethodNotAllowed(format!("{} {}", method, path))
    }
}
