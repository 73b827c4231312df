#![allow(dead_code)]

use std::sync::Arc;

use chess_server::config::Config;
use chess_server::profile::ProfileBook;
use chess_server::routes;
use chess_server::store::{MemoryStore, SessionStore};
use reqwest::Client;

/// A server bound to an ephemeral localhost port, backed by a fresh memory store.
pub struct TestServer {
    pub base_url: String,
    pub store: Arc<dyn SessionStore>,
    pub profiles: Arc<ProfileBook>,
}

impl TestServer {
    /// Build a URL for an API endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub async fn spawn_server() -> TestServer {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let profiles = Arc::new(ProfileBook::new());
    let app = routes::router(store.clone(), profiles.clone(), Config::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server error");
    });

    TestServer {
        base_url: format!("http://{addr}"),
        store,
        profiles,
    }
}

/// Build a reqwest client for tests.
pub fn client() -> Client {
    Client::new()
}
