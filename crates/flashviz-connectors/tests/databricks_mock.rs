//! Databricks connector against a mock Statement Execution API.

mod common;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use flashviz_connectors::{
    run_guarded, ConnectionState, Connector, ConnectorError, Credential, DatabricksConnector,
    TableRef,
};
use flashviz_core::{TypeTag, Value as Cell};

use common::{serve, test_config, Journal};

const TOKEN: &str = "dapi-test-token";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

fn succeeded(columns: &[(&str, &str)], rows: Value) -> Value {
    let columns: Vec<Value> = columns
        .iter()
        .map(|(name, ty)| json!({ "name": name, "type_name": ty, "type_text": ty }))
        .collect();
    json!({
        "statement_id": "st-0",
        "status": { "state": "SUCCEEDED" },
        "manifest": { "schema": { "columns": columns } },
        "result": { "data_array": rows },
    })
}

async fn submit(
    State(journal): State<Journal>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid token" })));
    }
    let statement = body["statement"].as_str().unwrap_or_default().to_string();
    journal.push(format!(
        "{} [{}/{}]",
        statement,
        body["catalog"].as_str().unwrap_or("-"),
        body["schema"].as_str().unwrap_or("-")
    ));

    let response = match statement.as_str() {
        "SELECT 1" => succeeded(&[("1", "INT")], json!([["1"]])),
        s if s.starts_with("USE ") => succeeded(&[], json!([])),
        "SHOW CATALOGS" => succeeded(&[("catalog", "STRING")], json!([["main"], ["samples"]])),
        "SHOW SCHEMAS" => succeeded(
            &[("databaseName", "STRING")],
            json!([["default"], ["sales"]]),
        ),
        "SHOW TABLES IN `main`.`sales`" => succeeded(
            &[("database", "STRING"), ("tableName", "STRING"), ("isTemporary", "BOOLEAN")],
            json!([["sales", "orders", "false"], ["sales", "refunds", "false"]]),
        ),
        "DESCRIBE TABLE `main`.`sales`.`orders`" => succeeded(
            &[("col_name", "STRING"), ("data_type", "STRING"), ("comment", "STRING")],
            json!([
                ["id", "bigint", null],
                ["amount", "decimal(10,2)", null],
                ["placed_at", "timestamp", null],
                ["", "", ""],
                ["# Partition Information", "", ""],
            ]),
        ),
        "SELECT * FROM `main`.`sales`.`orders` LIMIT 3" => json!({
            "statement_id": "st-orders",
            "status": { "state": "PENDING" },
        }),
        _ => json!({
            "statement_id": "st-err",
            "status": {
                "state": "FAILED",
                "error": { "message": format!("[PARSE_SYNTAX_ERROR] near '{}'", statement) },
            },
        }),
    };
    (StatusCode::OK, Json(response))
}

async fn poll(Path(id): Path<String>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) || id != "st-orders" {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "no such statement" })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "statement_id": "st-orders",
            "status": { "state": "SUCCEEDED" },
            "manifest": { "schema": { "columns": [
                { "name": "id", "type_name": "LONG", "type_text": "BIGINT" },
                { "name": "amount", "type_name": "DECIMAL", "type_text": "DECIMAL(10,2)" },
            ] } },
            "result": {
                "data_array": [["1", "9.50"], ["2", "12.00"]],
                "next_chunk_internal_link": "/api/2.0/sql/statements/st-orders/result/chunks/1",
            },
        })),
    )
}

async fn chunk(Path((id, index)): Path<(String, u32)>) -> Json<Value> {
    assert_eq!(id, "st-orders");
    assert_eq!(index, 1);
    Json(json!({ "chunk_index": 1, "data_array": [["3", null]] }))
}

async fn mock() -> (String, Journal) {
    let journal = Journal::default();
    let app = Router::new()
        .route("/api/2.0/sql/statements/", post(submit))
        .route("/api/2.0/sql/statements/:id", get(poll))
        .route("/api/2.0/sql/statements/:id/result/chunks/:index", get(chunk))
        .with_state(journal.clone());
    (serve(app).await, journal)
}

fn credential(base: &str) -> Credential {
    Credential::new()
        .with("server_hostname", base)
        .with("http_path", "/sql/1.0/warehouses/wh-1")
        .with("access_token", TOKEN)
        .with("catalog", "main")
}

#[tokio::test]
async fn test_connect_checks_and_sets_catalog() {
    let (base, journal) = mock().await;
    let mut connector = DatabricksConnector::new(test_config());
    connector.connect(&credential(&base)).await.unwrap();

    assert_eq!(connector.state(), ConnectionState::Connected);
    assert_eq!(connector.context(), Some((Some("main"), None)));
    assert_eq!(
        journal.entries(),
        vec!["SELECT 1 [-/-]".to_string(), "USE CATALOG `main` [-/-]".to_string()]
    );
}

#[tokio::test]
async fn test_bad_token_is_authentication_error() {
    let (base, _) = mock().await;
    let mut connector = DatabricksConnector::new(test_config());
    let err = connector
        .connect(&credential(&base).with("access_token", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Authentication(_)));
    assert_eq!(connector.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_metadata_listing() {
    let (base, _) = mock().await;
    let mut connector = DatabricksConnector::new(test_config());
    connector.connect(&credential(&base)).await.unwrap();

    assert_eq!(connector.list_catalogs().await.unwrap(), vec!["main", "samples"]);
    let schemas = connector.list_schemas("main").await.unwrap();
    assert_eq!(schemas, vec!["default", "sales"]);
    assert_eq!(
        connector.list_tables("main", Some("sales")).await.unwrap(),
        vec!["orders", "refunds"]
    );

    let schema = connector
        .table_schema(&TableRef::new("main", "orders").with_schema("sales"))
        .await
        .unwrap();
    assert_eq!(schema.len(), 3);
    assert_eq!(schema.get("amount"), Some(TypeTag::Float));
    assert_eq!(schema.get("placed_at"), Some(TypeTag::Timestamp));
}

#[tokio::test]
async fn test_pending_statement_is_polled_and_chunks_followed() {
    let (base, _) = mock().await;
    let mut connector = DatabricksConnector::new(test_config());
    connector.connect(&credential(&base)).await.unwrap();

    let sample = connector
        .sample_rows(&TableRef::new("main", "orders").with_schema("sales"), 3)
        .await
        .unwrap();
    assert_eq!(sample.num_rows(), 3);
    assert_eq!(sample.column_names(), vec!["id", "amount"]);
    let amount = &sample.column("amount").unwrap().values;
    assert_eq!(amount[0], Cell::Float(9.5));
    assert_eq!(amount[2], Cell::Null);
}

#[tokio::test]
async fn test_failed_statement_and_rejection_differ() {
    let (base, journal) = mock().await;
    let mut connector = DatabricksConnector::new(test_config());
    connector.connect(&credential(&base)).await.unwrap();

    let err = run_guarded(&mut connector, "SELECT FROM WHERE").await.unwrap_err();
    assert!(matches!(err, ConnectorError::Query(ref m) if m.contains("PARSE_SYNTAX_ERROR")));
    assert!(!err.is_rejection());

    let before = journal.entries().len();
    let err = run_guarded(&mut connector, "DROP TABLE main.sales.orders").await.unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(journal.entries().len(), before);
}

#[tokio::test]
async fn test_close_twice_then_operations_fail() {
    let (base, _) = mock().await;
    let mut connector = DatabricksConnector::new(test_config());
    connector.connect(&credential(&base)).await.unwrap();
    connector.close().await.unwrap();
    connector.close().await.unwrap();
    assert_eq!(connector.state(), ConnectionState::Closed);
    assert!(matches!(
        connector.list_catalogs().await,
        Err(ConnectorError::NotConnected(_))
    ));
}
