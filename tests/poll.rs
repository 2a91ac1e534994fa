//! The HTTP polling API, driven in-process through the router.

mod common;

use color_eyre::Result;
use common::{app, line, mock_registry, request, PREFIX};
use pretty_assertions::assert_eq;
use serde_json::Value;
use serial_bridge::{device::DeviceNotice, policy::AccessPolicy, session::SessionEvent};
use tower::ServiceExt;

async fn json_body(response: axum::response::Response) -> Result<Value> {
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn info_reports_the_server() -> Result<()> {
    let (registry, _factory) = mock_registry();
    let app = app(registry, AccessPolicy::default());

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("{PREFIX}/"))
                .body(axum::body::Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), 200);
    let info = json_body(response).await?;
    assert_eq!(info["name"], "serial-bridge");
    assert!(info["uptime_seconds"].is_u64());

    Ok(())
}

#[tokio::test]
async fn open_write_read_round_trip() -> Result<()> {
    let (registry, factory) = mock_registry();
    let app = app(registry.clone(), AccessPolicy::default());

    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyA/open", vec![]))
        .await?;
    assert_eq!(response.status(), 200);
    let opened = json_body(response).await?;
    assert_eq!(opened["status"], "open");

    let mut link = factory.link(&line("ttyA")).expect("Line was opened");

    // Write goes through to the device.
    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyA/write", b"hello".to_vec()))
        .await?;
    assert_eq!(response.status(), 200);
    let written = json_body(response).await?;
    assert_eq!(written["length"], 5);
    assert_eq!(link.written.recv().await.unwrap(), b"hello");

    // Arriving bytes land in the buffer; wait for the pump by watching
    // the event bus.
    let session = registry.get(&line("ttyA")).await.unwrap();
    let mut events = session.subscribe();
    link.feed.send(DeviceNotice::Data(b"world".to_vec())).unwrap();
    assert!(matches!(
        events.recv().await?,
        SessionEvent::Received { .. }
    ));

    let response = app
        .clone()
        .oneshot(request("GET", "/port/ttyA/read", vec![]))
        .await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["X-Read-Length"], "5");
    assert_eq!(response.headers()["content-type"], "application/octet-stream");
    let body = hyper::body::to_bytes(response.into_body()).await?;
    assert_eq!(&body[..], b"world");

    // The drain emptied the buffer.
    let response = app
        .clone()
        .oneshot(request("GET", "/port/ttyA/available", vec![]))
        .await?;
    let available = json_body(response).await?;
    assert_eq!(available["length"], 0);
    assert_eq!(available["overflow"], false);

    Ok(())
}

#[tokio::test]
async fn read_take_discards_the_rest() -> Result<()> {
    let (registry, factory) = mock_registry();
    let app = app(registry.clone(), AccessPolicy::default());

    app.clone()
        .oneshot(request("POST", "/port/ttyB/open", vec![]))
        .await?;

    let link = factory.link(&line("ttyB")).unwrap();
    let session = registry.get(&line("ttyB")).await.unwrap();
    let mut events = session.subscribe();
    link.feed.send(DeviceNotice::Data(b"abcdef".to_vec())).unwrap();
    events.recv().await?;

    let response = app
        .clone()
        .oneshot(request("GET", "/port/ttyB/read?take=3", vec![]))
        .await?;
    let body = hyper::body::to_bytes(response.into_body()).await?;
    assert_eq!(&body[..], b"abc");

    // `take` is not a peek: the remainder is gone.
    let response = app
        .clone()
        .oneshot(request("GET", "/port/ttyB/available", vec![]))
        .await?;
    assert_eq!(json_body(response).await?["length"], 0);

    Ok(())
}

#[tokio::test]
async fn read_negotiates_text() -> Result<()> {
    let (registry, factory) = mock_registry();
    let app = app(registry.clone(), AccessPolicy::default());

    app.clone()
        .oneshot(request("POST", "/port/ttyC/open", vec![]))
        .await?;

    let link = factory.link(&line("ttyC")).unwrap();
    let session = registry.get(&line("ttyC")).await.unwrap();
    let mut events = session.subscribe();
    link.feed.send(DeviceNotice::Data(b"hi".to_vec())).unwrap();
    events.recv().await?;

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("{PREFIX}/port/ttyC/read"))
                .header("accept", "text/plain")
                .body(axum::body::Body::empty())?,
        )
        .await?;
    assert_eq!(response.headers()["content-type"], "text/plain");

    Ok(())
}

#[tokio::test]
async fn open_accepts_partial_settings() -> Result<()> {
    let (registry, _factory) = mock_registry();
    let app = app(registry.clone(), AccessPolicy::default());

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/port/ttyD/open",
            br#"{"baud_rate": 115200}"#.to_vec(),
        ))
        .await?;
    assert_eq!(response.status(), 200);

    let session = registry.get(&line("ttyD")).await.unwrap();
    assert_eq!(session.settings().baud_rate, 115_200);
    assert_eq!(session.settings().data_bits, 8);

    // And rejects settings out of range.
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/port/ttyE/open",
            br#"{"stop_bits": 3}"#.to_vec(),
        ))
        .await?;
    assert_eq!(response.status(), 400);

    Ok(())
}

#[tokio::test]
async fn port_lifecycle_status_codes() -> Result<()> {
    let (registry, _factory) = mock_registry();
    let app = app(registry, AccessPolicy::default());

    // Nothing open yet.
    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyF/write", b"x".to_vec()))
        .await?;
    assert_eq!(response.status(), 404);

    app.clone()
        .oneshot(request("POST", "/port/ttyF/open", vec![]))
        .await?;

    // A second open conflicts.
    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyF/open", vec![]))
        .await?;
    assert_eq!(response.status(), 409);
    let body = json_body(response).await?;
    assert!(body["error"].as_str().unwrap().contains("already open"));

    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyF/close", vec![]))
        .await?;
    assert_eq!(response.status(), 200);

    // Close is not idempotent.
    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyF/close", vec![]))
        .await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[tokio::test]
async fn clear_discards_without_returning() -> Result<()> {
    let (registry, factory) = mock_registry();
    let app = app(registry.clone(), AccessPolicy::default());

    app.clone()
        .oneshot(request("POST", "/port/ttyG/open", vec![]))
        .await?;

    let link = factory.link(&line("ttyG")).unwrap();
    let session = registry.get(&line("ttyG")).await.unwrap();
    let mut events = session.subscribe();
    link.feed.send(DeviceNotice::Data(b"junk".to_vec())).unwrap();
    events.recv().await?;

    let response = app
        .clone()
        .oneshot(request("DELETE", "/port/ttyG/read", vec![]))
        .await?;
    assert_eq!(response.status(), 204);

    let response = app
        .clone()
        .oneshot(request("GET", "/port/ttyG/available", vec![]))
        .await?;
    assert_eq!(json_body(response).await?["length"], 0);

    Ok(())
}

#[tokio::test]
async fn listing_shows_open_and_closed_ports() -> Result<()> {
    let (registry, factory) = mock_registry();
    factory.add_host_line(line("ttyH"));
    factory.add_host_line(line("ttyI"));

    let app = app(registry, AccessPolicy::default());

    app.clone()
        .oneshot(request("POST", "/port/ttyH/open", vec![]))
        .await?;

    let response = app.clone().oneshot(request("GET", "/port", vec![])).await?;
    assert_eq!(response.status(), 200);

    let ports = json_body(response).await?;
    let ports = ports.as_array().unwrap();
    assert_eq!(ports.len(), 2);

    let by_name = |name: &str| {
        let canonical = line(name).to_string();
        ports
            .iter()
            .find(|p| p["name"] == canonical.as_str())
            .unwrap()
            .clone()
    };

    assert_eq!(by_name("ttyH")["status"], "open");
    assert_eq!(by_name("ttyH")["settings"]["baud_rate"], 9600);
    assert_eq!(by_name("ttyI")["status"], "closed");

    // Single port status agrees.
    let response = app
        .clone()
        .oneshot(request("GET", "/port/ttyI", vec![]))
        .await?;
    assert_eq!(json_body(response).await?["status"], "closed");

    // A port the host has never heard of is not found.
    let response = app
        .clone()
        .oneshot(request("GET", "/port/ttyZ", vec![]))
        .await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[tokio::test]
async fn policy_denials_are_forbidden() -> Result<()> {
    let (registry, _factory) = mock_registry();

    let policy = AccessPolicy {
        write: false,
        list: false,
        allowed_lines: Some(vec!["ttyJ".into()]),
        ..Default::default()
    };
    let app = app(registry.clone(), policy);

    let response = app.clone().oneshot(request("GET", "/port", vec![])).await?;
    assert_eq!(response.status(), 403);

    // ttyJ is allowed, but writes are off globally.
    app.clone()
        .oneshot(request("POST", "/port/ttyJ/open", vec![]))
        .await?;
    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyJ/write", b"x".to_vec()))
        .await?;
    assert_eq!(response.status(), 403);

    // ttyK is not on the allow-list at all.
    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyK/open", vec![]))
        .await?;
    assert_eq!(response.status(), 403);
    assert!(!registry.is_open(&line("ttyK")).await);

    Ok(())
}

#[tokio::test]
async fn bad_line_names_are_rejected() -> Result<()> {
    let (registry, _factory) = mock_registry();
    let app = app(registry, AccessPolicy::default());

    let response = app
        .clone()
        .oneshot(request("POST", "/port/bad%2Fname/open", vec![]))
        .await?;
    assert_eq!(response.status(), 400);

    Ok(())
}

#[tokio::test]
async fn write_failure_is_a_bad_gateway() -> Result<()> {
    let (registry, factory) = mock_registry();
    let app = app(registry, AccessPolicy::default());

    app.clone()
        .oneshot(request("POST", "/port/ttyL/open", vec![]))
        .await?;

    factory.fail_writes();

    let response = app
        .clone()
        .oneshot(request("POST", "/port/ttyL/write", b"x".to_vec()))
        .await?;
    assert_eq!(response.status(), 502);

    Ok(())
}
