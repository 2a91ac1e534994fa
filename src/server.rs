use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Extension, Router};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::{policy::AccessPolicy, registry::Registry, rest, websocket};

/// Shared state every HTTP and websocket handler reaches through an
/// [`Extension`] layer.
pub struct ApiContext {
    /// The sessions this server manages.
    pub registry: Arc<Registry>,

    /// The process-wide access policy.
    pub policy: AccessPolicy,

    /// When the server came up, for the uptime report.
    pub started: Instant,
}

/// The whole HTTP surface: poll routes plus the push socket, nested under
/// `prefix`.
///
/// Building the router separately from binding it lets tests drive it
/// in-process through `tower::ServiceExt`.
pub fn app(registry: Arc<Registry>, policy: AccessPolicy, prefix: &str) -> Router {
    let context = Arc::new(ApiContext {
        registry,
        policy,
        started: Instant::now(),
    });

    let api = rest::router().route("/port/:name/data", get(websocket::ws_handler));

    Router::new()
        .nest(prefix, api)
        .layer(Extension(context))
        .layer(TraceLayer::new_for_http())
}

async fn run(
    registry: Arc<Registry>,
    policy: AccessPolicy,
    prefix: &str,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) {
    let app = app(registry, policy, prefix);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        port_reply
            .send(addr.port())
            .expect("The receiver of which port was allocated should not be dropped");
    }

    debug!("Listening on {addr}");

    server.await.expect("Server should not fail");
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    registry: Arc<Registry>,
    policy: AccessPolicy,
    prefix: &str,
    allocated_port: oneshot::Sender<u16>,
) {
    run(registry, policy, prefix, None, Some(allocated_port)).await
}

/// Start the server on the given port.
pub async fn run_on_port(registry: Arc<Registry>, policy: AccessPolicy, prefix: &str, port: u16) {
    run(registry, policy, prefix, Some(port), None).await
}
