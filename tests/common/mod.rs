//! Shared helpers: a mock-backed registry and ways to drive the server,
//! either in-process through the router or over a real socket.

use std::sync::Arc;

use axum::{body::Body, http::Request, Router};
use serial_bridge::{
    config::LineSettings,
    device::{mock::MockDeviceFactory, DeviceFactory},
    line::LineName,
    logging,
    policy::AccessPolicy,
    registry::Registry,
    server,
};
use tokio::sync::oneshot;

pub const PREFIX: &str = "/api/v1";

/// A registry backed by mock devices, plus the factory to pull links from.
pub fn mock_registry() -> (Arc<Registry>, Arc<MockDeviceFactory>) {
    let factory = Arc::new(MockDeviceFactory::new());
    let registry = Arc::new(Registry::new(
        Arc::clone(&factory) as Arc<dyn DeviceFactory>
    ));

    (registry, factory)
}

/// The full HTTP surface over the given registry, for tower-level calls.
pub fn app(registry: Arc<Registry>, policy: AccessPolicy) -> Router {
    logging::init();
    server::app(registry, policy, PREFIX)
}

/// Serve on a real socket; the allocated port comes back.
pub async fn start_server(registry: Arc<Registry>, policy: AccessPolicy) -> u16 {
    logging::init();

    let (port_tx, port_rx) = oneshot::channel();
    tokio::spawn(server::run_any_port(registry, policy, PREFIX, port_tx));

    port_rx
        .await
        .expect("Server should report its allocated port")
}

pub fn line(name: &str) -> LineName {
    LineName::canonicalize(name).expect("Test line names are valid")
}

pub fn settings() -> LineSettings {
    LineSettings::default()
}

/// A request against the API, path relative to the prefix.
pub fn request(method: &str, path: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(format!("{PREFIX}{path}"))
        .body(Body::from(body))
        .expect("Test requests are well formed")
}
