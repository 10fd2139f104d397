#![allow(dead_code)]

use catalog_service::config::CatalogConfig;
use catalog_service::startup::Application;
use serde_json::{json, Value};
use service_core::config::LocalConfigStore;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    app: Application,
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("No local address").port()
}

pub fn sticker() -> Value {
    json!({
        "itemId": "329199",
        "name": "Forge Laptop Sticker",
        "desc": "JBoss Community Forge Project Sticker",
        "price": 8.5
    })
}

pub fn settings(binding: &str) -> Value {
    let mut settings = json!({
        "catalog": { "http": { "port": 0 } },
        "store": "memory",
        "binding": binding
    });
    if binding == "remote" {
        let port = free_port();
        settings["bus"] = json!({
            "port": port,
            "endpoint": format!("http://127.0.0.1:{}", port)
        });
    }
    settings
}

/// A process running only the data unit, serving its bus on `bus_port`.
pub async fn spawn_data_unit(bus_port: u16) -> Application {
    let config = CatalogConfig::load(&LocalConfigStore::from_json(json!({
        "store": "memory",
        "units": "data",
        "bus": { "port": bus_port }
    })))
    .await
    .expect("Failed to load configuration");

    let app = Application::start(config)
        .await
        .expect("Failed to start data unit");
    assert_eq!(app.http_port(), None);
    assert_eq!(app.bus_port(), Some(bus_port));
    app
}

impl TestApp {
    /// Both units in one process on the event bus, backed by memory.
    pub async fn spawn() -> Self {
        Self::spawn_with(settings("eventbus")).await
    }

    pub async fn spawn_with_binding(binding: &str) -> Self {
        Self::spawn_with(settings(binding)).await
    }

    pub async fn spawn_with(settings: Value) -> Self {
        let config = CatalogConfig::load(&LocalConfigStore::from_json(settings))
            .await
            .expect("Failed to load configuration");

        let app = Application::start(config)
            .await
            .expect("Failed to start test application");

        let port = app.http_port().expect("HTTP unit not running");
        let address = format!("http://127.0.0.1:{}", port);

        TestApp {
            address,
            port,
            client: reqwest::Client::new(),
            app,
        }
    }

    pub async fn post_product(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/product", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_product(&self, item_id: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/product/{}", self.address, item_id))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn list_products(&self) -> reqwest::Response {
        self.client
            .get(format!("{}/products", self.address))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn stop(self) {
        self.app.stop().await;
    }
}
