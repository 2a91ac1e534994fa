//! The HTTP polling API.
//!
//! Clients open a port, write raw bytes to it, and poll its receive buffer.
//! Every handler goes through the shared [`ApiContext`]: policy first, then
//! the registry.

use axum::{
    extract::{Extension, Path, Query},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::{
    config::LineSettings,
    error::Error,
    line::LineName,
    policy::Capability,
    server::ApiContext,
};

/// An [`Error`] on its way out as an HTTP response.
///
/// Body is always `{"error": "..."}`; the status code follows the variant.
pub(crate) struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::AccessDenied(_) => StatusCode::FORBIDDEN,
            Error::NotOpen(_) => StatusCode::NOT_FOUND,
            Error::AlreadyOpen(_) => StatusCode::CONFLICT,
            Error::Device { .. } | Error::Write { .. } => StatusCode::BAD_GATEWAY,
            Error::BadLineName(_) | Error::BadConfig(_) => StatusCode::BAD_REQUEST,
        };

        #[derive(Serialize)]
        struct Body {
            error: String,
        }

        (
            status,
            Json(Body {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ServerInfo {
    name: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct PortInfo {
    name: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<LineSettings>,
}

#[derive(Serialize)]
struct PortState {
    name: String,
    status: &'static str,
}

#[derive(Serialize)]
struct WriteReply {
    name: String,
    length: usize,
}

#[derive(Serialize)]
struct AvailableReply {
    name: String,
    length: usize,
    capacity: usize,
    overflow: bool,
}

#[derive(Deserialize)]
struct ReadQuery {
    take: Option<usize>,
}

/// All poll routes, relative to the prefix they are nested under.
pub(crate) fn router() -> Router {
    Router::new()
        .route("/", get(info))
        .route("/port", get(list))
        .route("/port/:name", get(status))
        .route("/port/:name/open", post(open))
        .route("/port/:name/close", post(close))
        .route("/port/:name/write", post(write))
        .route("/port/:name/read", get(read).delete(clear))
        .route("/port/:name/available", get(available))
}

async fn info(Extension(ctx): Extension<Arc<ApiContext>>) -> Json<ServerInfo> {
    Json(ServerInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: ctx.started.elapsed().as_secs(),
    })
}

/// All host ports the policy lets this server touch, with open/closed state.
async fn list(
    Extension(ctx): Extension<Arc<ApiContext>>,
) -> Result<Json<Vec<PortInfo>>, ApiError> {
    if !ctx.policy.capability_enabled(Capability::List) {
        return Err(Error::AccessDenied("listing serial ports is not permitted".into()).into());
    }

    let mut ports = Vec::new();
    for name in ctx.registry.host_lines()? {
        if !ctx.policy.allows_line(&name) {
            continue;
        }

        ports.push(match ctx.registry.get(&name).await {
            Some(session) => PortInfo {
                name: name.to_string(),
                status: "open",
                settings: Some(session.settings().clone()),
            },
            None => PortInfo {
                name: name.to_string(),
                status: "closed",
                settings: None,
            },
        });
    }

    Ok(Json(ports))
}

/// One port's state. 404 if the host has no such port and it is not open.
async fn status(
    Path(name): Path<String>,
    Extension(ctx): Extension<Arc<ApiContext>>,
) -> Result<Json<PortInfo>, ApiError> {
    let line = LineName::canonicalize(&name)?;
    ctx.policy.ensure(Capability::List, &line)?;

    if let Some(session) = ctx.registry.get(&line).await {
        return Ok(Json(PortInfo {
            name: line.to_string(),
            status: "open",
            settings: Some(session.settings().clone()),
        }));
    }

    if ctx.registry.host_lines()?.contains(&line) {
        Ok(Json(PortInfo {
            name: line.to_string(),
            status: "closed",
            settings: None,
        }))
    } else {
        Err(Error::NotOpen(line.to_string()).into())
    }
}

/// Open a port. Body may be empty (defaults) or a JSON [`LineSettings`].
async fn open(
    Path(name): Path<String>,
    Extension(ctx): Extension<Arc<ApiContext>>,
    body: Bytes,
) -> Result<Json<PortState>, ApiError> {
    let line = LineName::canonicalize(&name)?;
    if !ctx.policy.allows_line(&line) {
        return Err(Error::AccessDenied(format!("access to `{line}` is not permitted")).into());
    }

    let settings = if body.is_empty() {
        LineSettings::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| Error::BadConfig(e.to_string()))?
    };
    settings.validate()?;

    ctx.registry.open(&line, settings).await?;

    Ok(Json(PortState {
        name: line.to_string(),
        status: "open",
    }))
}

async fn close(
    Path(name): Path<String>,
    Extension(ctx): Extension<Arc<ApiContext>>,
) -> Result<Json<PortState>, ApiError> {
    let line = LineName::canonicalize(&name)?;
    if !ctx.policy.allows_line(&line) {
        return Err(Error::AccessDenied(format!("access to `{line}` is not permitted")).into());
    }

    ctx.registry.close(&line).await?;

    Ok(Json(PortState {
        name: line.to_string(),
        status: "closed",
    }))
}

/// Write the raw request body to the port.
async fn write(
    Path(name): Path<String>,
    Extension(ctx): Extension<Arc<ApiContext>>,
    body: Bytes,
) -> Result<Json<WriteReply>, ApiError> {
    let line = LineName::canonicalize(&name)?;
    ctx.policy.ensure(Capability::Write, &line)?;

    let session = ctx
        .registry
        .get(&line)
        .await
        .ok_or_else(|| Error::NotOpen(line.to_string()))?;

    let length = body.len();
    session.write(body.to_vec()).await?;

    Ok(Json(WriteReply {
        name: line.to_string(),
        length,
    }))
}

/// Drain the receive buffer.
///
/// `?take=N` bounds the returned bytes; the rest of the buffer is discarded
/// either way. The byte count travels in `X-Read-Length` so binary bodies
/// need no framing, and the body is `text/plain` when the client's Accept
/// header asks for text.
async fn read(
    Path(name): Path<String>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
    Extension(ctx): Extension<Arc<ApiContext>>,
) -> Result<impl IntoResponse, ApiError> {
    let line = LineName::canonicalize(&name)?;
    ctx.policy.ensure(Capability::Read, &line)?;

    let session = ctx
        .registry
        .get(&line)
        .await
        .ok_or_else(|| Error::NotOpen(line.to_string()))?;

    let (bytes, overflow) = session.drain_buffer(query.take).await;
    if overflow {
        debug!(line = %line, "Reporting overflow to poller");
    }

    let accepts_text = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("text/plain") || accept.contains("text/html"))
        .unwrap_or(false);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(if accepts_text {
            "text/plain"
        } else {
            "application/octet-stream"
        }),
    );
    response_headers.insert(
        "X-Read-Length",
        HeaderValue::from_str(&bytes.len().to_string()).expect("Digits are a valid header value"),
    );
    response_headers.insert(
        "X-Read-Overflow",
        HeaderValue::from_static(if overflow { "true" } else { "false" }),
    );

    Ok((response_headers, bytes))
}

/// Discard the receive buffer without returning anything.
async fn clear(
    Path(name): Path<String>,
    Extension(ctx): Extension<Arc<ApiContext>>,
) -> Result<StatusCode, ApiError> {
    let line = LineName::canonicalize(&name)?;
    ctx.policy.ensure(Capability::Read, &line)?;

    let session = ctx
        .registry
        .get(&line)
        .await
        .ok_or_else(|| Error::NotOpen(line.to_string()))?;

    session.clear_buffer().await;

    Ok(StatusCode::NO_CONTENT)
}

/// Buffered byte count and overflow flag, without consuming anything.
async fn available(
    Path(name): Path<String>,
    Extension(ctx): Extension<Arc<ApiContext>>,
) -> Result<Json<AvailableReply>, ApiError> {
    let line = LineName::canonicalize(&name)?;
    ctx.policy.ensure(Capability::Read, &line)?;

    let session = ctx
        .registry
        .get(&line)
        .await
        .ok_or_else(|| Error::NotOpen(line.to_string()))?;

    let status = session.peek_available().await;

    Ok(Json(AvailableReply {
        name: line.to_string(),
        length: status.length,
        capacity: status.capacity,
        overflow: status.overflow,
    }))
}
