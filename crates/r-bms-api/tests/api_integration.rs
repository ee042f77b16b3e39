//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "HTTP surface against a live status broker."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use r_bms_api::{spawn_api_server, ApiState};
use r_bms_codec::StatusSnapshot;
use r_bms_core::{BrokerHandle, StatusBroker};
use r_bms_metrics::{new_registry, MonitorMetrics};
use serde_json::{json, Value};
use tokio::sync::broadcast;

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn reference_status() -> StatusSnapshot {
    StatusSnapshot {
        soc: 77,
        soh: 99,
        voltage: 54.51,
        current: -1.9,
        temp: 18.6,
        max_voltage: 57.7,
        max_charge_current: 91.8,
        max_discharge_current: 91.8,
        warnings: vec!["CELL_IMBALANCE".into()],
        alarms: vec![],
    }
}

async fn running_broker() -> (BrokerHandle, broadcast::Sender<()>) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (broker, _task) = StatusBroker::spawn(None, shutdown_rx);
    broker.publish(reference_status()).await.unwrap();
    (broker, shutdown_tx)
}

#[tokio::test]
async fn root_and_status_return_the_snapshot() {
    let (broker, _shutdown) = running_broker().await;
    let server = spawn_api_server(Arc::new(ApiState::new(broker, None)), loopback(), None).unwrap();
    let base = format!("http://{}", server.addr());

    for path in ["/", "/api/status"] {
        let response = reqwest::get(format!("{base}{path}")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["soc"], json!(77));
        assert_eq!(body["soh"], json!(99));
        assert_eq!(body["warnings"], json!(["CELL_IMBALANCE"]));
        assert_eq!(body["alarms"], json!([]));
        assert!(body.get("maxDischargeCurrent").is_some());
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn stopped_broker_yields_service_unavailable() {
    let (broker, shutdown) = running_broker().await;
    shutdown.send(()).unwrap();
    while !broker.is_closed() {
        tokio::task::yield_now().await;
    }

    let server = spawn_api_server(Arc::new(ApiState::new(broker, None)), loopback(), None).unwrap();
    let response = reqwest::get(format!("http://{}/", server.addr()))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], json!("status broker is not running"));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn metrics_endpoint_follows_configuration() {
    let (broker, _shutdown) = running_broker().await;

    let disabled =
        spawn_api_server(Arc::new(ApiState::new(broker.clone(), None)), loopback(), None).unwrap();
    let response = reqwest::get(format!("http://{}/metrics", disabled.addr()))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    disabled.shutdown().await.unwrap();

    let registry = new_registry();
    MonitorMetrics::new(registry.clone())
        .unwrap()
        .record_frame("SOC_SOH");
    let enabled = spawn_api_server(
        Arc::new(ApiState::new(broker, Some(registry))),
        loopback(),
        None,
    )
    .unwrap();
    let body = reqwest::get(format!("http://{}/metrics", enabled.addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains(r#"r_bms_frames_received_total{message="SOC_SOH"} 1"#));
    enabled.shutdown().await.unwrap();
}

#[tokio::test]
async fn datafiles_are_served_under_data() {
    let (broker, _shutdown) = running_broker().await;
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("2006/01")).unwrap();
    fs::write(
        root.path().join("2006/01/20060102.csv"),
        "time,soc\n2006/01/02 15:04:05,77\n",
    )
    .unwrap();

    let server = spawn_api_server(
        Arc::new(ApiState::new(broker, None)),
        loopback(),
        Some(root.path().to_path_buf()),
    )
    .unwrap();
    let base = format!("http://{}", server.addr());

    let response = reqwest::get(format!("{base}/data/2006/01/20060102.csv"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        "time,soc\n2006/01/02 15:04:05,77\n"
    );

    let missing = reqwest::get(format!("{base}/data/2006/01/20060103.csv"))
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let (broker, _shutdown) = running_broker().await;
    let state = Arc::new(ApiState::new(broker, None));
    let first = spawn_api_server(state.clone(), loopback(), None).unwrap();
    let err = spawn_api_server(state, first.addr(), None).unwrap_err();
    assert!(err.to_string().contains("failed to bind API listener"));
    first.shutdown().await.unwrap();
}
