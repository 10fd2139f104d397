mod common;

use catalog_service::config::CatalogConfig;
use catalog_service::startup::{bootstrap_with_env, Application};
use common::{free_port, settings, spawn_data_unit, TestApp};
use serde_json::json;
use service_core::config::LocalConfigStore;
use service_core::error::AppError;
use std::collections::HashMap;

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[tokio::test]
async fn cluster_marker_without_configmap_name_fails() {
    let result = bootstrap_with_env(env(&[
        ("KUBERNETES_NAMESPACE", "coolstore"),
        ("APP_CONFIGMAP_KEY", "app-config.yaml"),
    ]))
    .await;

    assert!(matches!(result, Err(AppError::ConfigError(_))));
}

#[tokio::test]
async fn cluster_marker_without_configmap_key_fails() {
    let result = bootstrap_with_env(env(&[
        ("KUBERNETES_NAMESPACE", "coolstore"),
        ("APP_CONFIGMAP_NAME", "app-config"),
    ]))
    .await;

    assert!(matches!(result, Err(AppError::ConfigError(_))));
}

#[tokio::test]
async fn failed_http_unit_stops_started_data_unit() {
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let http_port = taken.local_addr().unwrap().port();
    let bus_port = free_port();

    let config = CatalogConfig::load(&LocalConfigStore::from_json(json!({
        "catalog": { "http": { "port": http_port } },
        "store": "memory",
        "bus": { "port": bus_port }
    })))
    .await
    .unwrap();

    let result = Application::start(config).await;
    assert!(result.is_err());

    // The data unit's bus listener was released again.
    let rebound = tokio::net::TcpListener::bind(("0.0.0.0", bus_port)).await;
    assert!(rebound.is_ok());
    drop(taken);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_start_with_tracing_returns_error() {
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let http_port = taken.local_addr().unwrap().port();

    let config = CatalogConfig::load(&LocalConfigStore::from_json(json!({
        "service-name": "catalog-service",
        "collector-endpoint": "http://127.0.0.1:4317",
        "catalog": { "http": { "port": http_port } },
        "store": "memory"
    })))
    .await
    .unwrap();
    assert!(config.tracing.service_name.is_some());

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        Application::start(config),
    )
    .await
    .expect("startup failure should not hang on span flush");
    assert!(result.is_err());
    drop(taken);
}

#[tokio::test]
async fn api_unit_starts_before_remote_data_unit() {
    let mut settings = settings("remote");
    settings["units"] = json!("api");
    let app = TestApp::spawn_with(settings).await;

    // Nobody serves the bus endpoint yet.
    let response = app.list_products().await;
    assert_eq!(response.status().as_u16(), 502);

    app.stop().await;
}

#[tokio::test]
async fn split_units_talk_over_remote_bus() {
    let bus_port = free_port();

    let data = spawn_data_unit(bus_port).await;
    let api = TestApp::spawn_with(json!({
        "catalog": { "http": { "port": 0 } },
        "units": "api",
        "binding": "remote",
        "bus": { "endpoint": format!("http://127.0.0.1:{}", bus_port) }
    }))
    .await;

    let response = api.post_product(&common::sticker()).await;
    assert_eq!(response.status().as_u16(), 201);
    let response = api.get_product("329199").await;
    assert_eq!(response.status().as_u16(), 200);

    api.stop().await;
    data.stop().await;
}
