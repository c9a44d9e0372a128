//! Shared helpers for the mock-backend integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::Router;
use flashviz_connectors::ConnectorConfig;

pub const PRIVATE_KEY: &str = include_str!("../fixtures/rsa_pkcs8.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/rsa_public.pem");

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Fast polling so pending-statement paths finish quickly.
pub fn test_config() -> ConnectorConfig {
    ConnectorConfig {
        poll_interval_ms: 10,
        statement_timeout_secs: 5,
        ..ConnectorConfig::default()
    }
}

/// Statements (or request paths) a mock backend has seen, in order.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Service-account key file whose token endpoint is the mock at `base`.
pub fn service_account_file(base: &str, project_id: Option<&str>) -> tempfile::NamedTempFile {
    let mut key = serde_json::json!({
        "type": "service_account",
        "client_email": "reader@demo.iam.gserviceaccount.com",
        "private_key": PRIVATE_KEY,
        "token_uri": format!("{}/token", base),
    });
    if let Some(project) = project_id {
        key["project_id"] = serde_json::Value::String(project.to_string());
    }
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(key.to_string().as_bytes()).unwrap();
    file
}
