//! Snowflake connector over the SQL API v2 with key-pair authentication.
//!
//! Tables are addressed as `database.schema.table`. The SQL API keeps no
//! server-side session between requests, so the "current" database and
//! schema live in [`SessionContext`] and travel with every statement.
//! `use_database` / `use_schema` run the matching `USE` statement (which
//! validates the name) and then update that context. A connector instance
//! therefore serves one caller at a time.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{RequestBuilder, Response, StatusCode};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use flashviz_core::{ResultTable, SchemaField, TableSchema, TypeTag};

use crate::config::ConnectorConfig;
use crate::credential::Credential;
use crate::error::{ConnectorError, Result};
use crate::factory::Dialect;
use crate::http::{base_url, text_table};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::{Connector, TableRef};

const JWT_LIFETIME: Duration = Duration::from_secs(59 * 60);
const JWT_RENEW_AFTER: Duration = Duration::from_secs(50 * 60);
const DEFAULT_SCHEMA: &str = "PUBLIC";

// ===========================================================================
// Key-pair authentication
// ===========================================================================

/// Decode a PEM private key: encrypted PKCS#8 (needs `passphrase`),
/// plain PKCS#8, or PKCS#1 (`BEGIN RSA PRIVATE KEY`).
pub fn load_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey> {
    // Keys pasted through JSON or env files often carry literal "\n".
    let pem = pem.trim().replace("\\n", "\n");
    let invalid = |e: &dyn std::fmt::Display| {
        ConnectorError::Authentication(format!("invalid private key: {}", e))
    };

    if pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        let passphrase = passphrase.ok_or_else(|| {
            ConnectorError::Authentication(
                "private key is encrypted but no private_key_passphrase was given".to_string(),
            )
        })?;
        RsaPrivateKey::from_pkcs8_encrypted_pem(&pem, passphrase.as_bytes()).map_err(|e| invalid(&e))
    } else if pem.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| invalid(&e))
    } else {
        RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| invalid(&e))
    }
}

/// `SHA256:<base64>` fingerprint of the public key's DER encoding, as
/// registered with `ALTER USER ... SET RSA_PUBLIC_KEY`.
pub fn public_key_fingerprint(key: &RsaPrivateKey) -> Result<String> {
    let der = key.to_public_key().to_public_key_der().map_err(|e| {
        ConnectorError::Authentication(format!("cannot encode public key: {}", e))
    })?;
    Ok(format!("SHA256:{}", STANDARD.encode(Sha256::digest(der.as_bytes()))))
}

/// Account locator as it appears in JWT claims: uppercased, without the
/// region or cloud suffix.
pub fn account_identifier(account: &str) -> String {
    let account = account.trim();
    let account = account
        .strip_suffix(".snowflakecomputing.com")
        .unwrap_or(account);
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_ascii_uppercase()
}

/// `{account}.snowflakecomputing.com`, tolerating an account that already
/// carries the domain.
pub fn default_host(account: &str) -> String {
    let account = account.trim().to_ascii_lowercase();
    let account = account
        .strip_suffix(".snowflakecomputing.com")
        .unwrap_or(&account);
    format!("{}.snowflakecomputing.com", account)
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyPairClaims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
}

struct KeyPairAuth {
    qualified_user: String,
    fingerprint: String,
    encoding_key: EncodingKey,
    cached: Option<(String, Instant)>,
}

impl KeyPairAuth {
    fn new(account: &str, user: &str, key: &RsaPrivateKey) -> Result<Self> {
        let der = key.to_pkcs1_der().map_err(|e| {
            ConnectorError::Authentication(format!("cannot encode private key: {}", e))
        })?;
        Ok(Self {
            qualified_user: format!(
                "{}.{}",
                account_identifier(account),
                user.trim().to_ascii_uppercase()
            ),
            fingerprint: public_key_fingerprint(key)?,
            encoding_key: EncodingKey::from_rsa_der(der.as_bytes()),
            cached: None,
        })
    }

    fn token(&mut self) -> Result<String> {
        if let Some((token, issued)) = &self.cached {
            if issued.elapsed() < JWT_RENEW_AFTER {
                return Ok(token.clone());
            }
        }
        let iat = chrono::Utc::now().timestamp();
        let claims = KeyPairClaims {
            iss: format!("{}.{}", self.qualified_user, self.fingerprint),
            sub: self.qualified_user.clone(),
            iat,
            exp: iat + JWT_LIFETIME.as_secs() as i64,
        };
        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| ConnectorError::Authentication(format!("failed to sign JWT: {}", e)))?;
        debug!("Signed key-pair JWT for {}", self.qualified_user);
        self.cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}

// ===========================================================================
// SQL API wire types
// ===========================================================================

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    result_set_meta_data: Option<ResultSetMeta>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
    statement_handle: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMeta {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    scale: Option<i64>,
}

impl RowType {
    fn type_tag(&self) -> TypeTag {
        match self.kind.to_ascii_lowercase().as_str() {
            "fixed" if self.scale.unwrap_or(0) > 0 => TypeTag::Float,
            "fixed" => TypeTag::Integer,
            "real" => TypeTag::Float,
            "boolean" => TypeTag::Boolean,
            "date" | "timestamp_ltz" | "timestamp_ntz" | "timestamp_tz" => TypeTag::Timestamp,
            _ => TypeTag::String,
        }
    }

    /// Dates arrive as days since the epoch; everything else parses as-is.
    fn normalize(&self, cell: Option<String>) -> Option<String> {
        match (self.kind.eq_ignore_ascii_case("date"), cell) {
            (true, Some(days)) => Some(
                days.trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|d| {
                        chrono::DateTime::from_timestamp(d * 86_400, 0)
                            .map(|dt| dt.date_naive().to_string())
                    })
                    .unwrap_or(days),
            ),
            (_, cell) => cell,
        }
    }
}

enum Progress {
    Done(StatementResponse),
    Pending(String),
}

// ===========================================================================
// Session
// ===========================================================================

/// Database / schema / warehouse / role attached to each statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

struct SnowflakeSession {
    http: reqwest::Client,
    auth: KeyPairAuth,
    base: String,
    context: SessionContext,
}

impl SnowflakeSession {
    fn authorize(&mut self, builder: RequestBuilder) -> Result<RequestBuilder> {
        Ok(builder
            .bearer_auth(self.auth.token()?)
            .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
            .header("Accept", "application/json"))
    }

    async fn run(&mut self, sql: &str, config: &ConnectorConfig) -> Result<ResultTable> {
        debug!("Snowflake submitting: {}", sql);
        let deadline = Instant::now() + config.statement_timeout();
        let request = StatementRequest {
            statement: sql,
            timeout: config.statement_timeout_secs,
            database: self.context.database.as_deref(),
            schema: self.context.schema.as_deref(),
            warehouse: self.context.warehouse.as_deref(),
            role: self.context.role.as_deref(),
        };
        let url = format!(
            "{}/api/v2/statements?requestId={}",
            self.base,
            uuid::Uuid::new_v4()
        );
        let builder = self.http.post(url).json(&request);
        let response = self.authorize(builder)?.send().await?;

        let mut progress = statement_progress(response).await?;
        let first = loop {
            match progress {
                Progress::Done(body) => break body,
                Progress::Pending(handle) => {
                    if Instant::now() >= deadline {
                        return Err(ConnectorError::Unreachable(format!(
                            "statement {} did not finish within {}s",
                            handle, config.statement_timeout_secs
                        )));
                    }
                    tokio::time::sleep(config.poll_interval()).await;
                    let url = format!("{}/api/v2/statements/{}", self.base, handle);
                    let builder = self.http.get(url);
                    progress = statement_progress(self.authorize(builder)?.send().await?).await?;
                }
            }
        };

        let meta = first.result_set_meta_data.unwrap_or_default();
        let mut rows = first.data;
        if meta.partition_info.len() > 1 {
            let handle = first.statement_handle.ok_or_else(|| {
                ConnectorError::Query("partitioned result without a statement handle".to_string())
            })?;
            for partition in 1..meta.partition_info.len() {
                let url = format!(
                    "{}/api/v2/statements/{}?partition={}",
                    self.base, handle, partition
                );
                let builder = self.http.get(url);
                match statement_progress(self.authorize(builder)?.send().await?).await? {
                    Progress::Done(part) => rows.extend(part.data),
                    Progress::Pending(_) => {
                        return Err(ConnectorError::Query(format!(
                            "partition {} of statement {} is not ready",
                            partition, handle
                        )))
                    }
                }
            }
        }

        let rows: Vec<Vec<Option<String>>> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(meta.row_type.iter())
                    .map(|(cell, column)| column.normalize(cell))
                    .collect()
            })
            .collect();
        let columns = meta
            .row_type
            .iter()
            .map(|c| (c.name.clone(), c.type_tag()))
            .collect();
        info!("Snowflake returned {} rows", rows.len());
        Ok(text_table(columns, &rows))
    }

    /// Values of the `name` column of a `SHOW ...` result.
    async fn show_names(&mut self, sql: &str, config: &ConnectorConfig) -> Result<Vec<String>> {
        let result = self.run(sql, config).await?;
        let column = result
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case("name"))
            .or_else(|| result.columns.get(1))
            .ok_or_else(|| ConnectorError::Query(format!("unexpected result shape for {}", sql)))?;
        Ok(column.values.iter().map(|v| v.to_text()).collect())
    }

    async fn use_database(&mut self, database: &str, config: &ConnectorConfig) -> Result<()> {
        if self.context.database.as_deref() == Some(database) {
            return Ok(());
        }
        self.run(&format!("USE DATABASE {}", quote_ident(database)), config)
            .await?;
        self.context.database = Some(database.to_string());
        self.context.schema = None;
        debug!("Snowflake context database -> {}", database);
        Ok(())
    }

    async fn use_schema(&mut self, schema: &str, config: &ConnectorConfig) -> Result<()> {
        if self.context.schema.as_deref() == Some(schema) {
            return Ok(());
        }
        self.run(&format!("USE SCHEMA {}", quote_ident(schema)), config)
            .await?;
        self.context.schema = Some(schema.to_string());
        debug!("Snowflake context schema -> {}", schema);
        Ok(())
    }

    /// Explicit schema, else the tracked schema when it belongs to the same
    /// database, else `PUBLIC`.
    fn resolve_schema(&self, table: &TableRef) -> String {
        if let Some(schema) = &table.schema {
            return schema.clone();
        }
        match (&self.context.database, &self.context.schema) {
            (Some(db), Some(schema)) if *db == table.catalog => schema.clone(),
            _ => DEFAULT_SCHEMA.to_string(),
        }
    }

    fn qualified(&self, table: &TableRef) -> String {
        format!(
            "{}.{}.{}",
            quote_ident(&table.catalog),
            quote_ident(&self.resolve_schema(table)),
            quote_ident(&table.table)
        )
    }
}

async fn statement_progress(response: Response) -> Result<Progress> {
    let status = response.status();
    if status.is_success() {
        let body: StatementResponse = response.json().await.map_err(|e| {
            ConnectorError::Query(format!("unexpected statement response: {}", e))
        })?;
        if status == StatusCode::ACCEPTED {
            let handle = body.statement_handle.ok_or_else(|| {
                ConnectorError::Query("pending statement without a handle".to_string())
            })?;
            return Ok(Progress::Pending(handle));
        }
        return Ok(Progress::Done(body));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<StatementResponse>(&body)
        .ok()
        .and_then(|r| r.message)
        .unwrap_or(body);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectorError::Authentication(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ConnectorError::Unreachable(message)
        }
        _ => ConnectorError::Query(message),
    })
}

/// Identifiers already in Snowflake's folded form (`^[A-Z_][A-Z0-9_$]*$`)
/// stay bare; anything else is double-quoted with embedded quotes doubled,
/// so names returned by SHOW keep their exact case.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let folded = matches!(chars.next(), Some(c) if c.is_ascii_uppercase() || c == '_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '$');
    if folded {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

// ===========================================================================
// Connector
// ===========================================================================

pub struct SnowflakeConnector {
    config: ConnectorConfig,
    lifecycle: Lifecycle,
    session: Option<SnowflakeSession>,
}

impl SnowflakeConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            session: None,
        }
    }

    /// Current database/schema/warehouse/role, once connected.
    pub fn context(&self) -> Option<&SessionContext> {
        self.session.as_ref().map(|s| &s.context)
    }

    /// Make `database` current for later unqualified statements.
    pub async fn use_database(&mut self, database: &str) -> Result<()> {
        let config = self.config.clone();
        self.session("use database")?
            .use_database(database, &config)
            .await
    }

    /// Make `schema` current within the current database.
    pub async fn use_schema(&mut self, schema: &str) -> Result<()> {
        let config = self.config.clone();
        self.session("use schema")?.use_schema(schema, &config).await
    }

    async fn open(config: &ConnectorConfig, credential: &Credential) -> Result<SnowflakeSession> {
        let account = credential.require("account")?;
        let user = credential.require("user")?;
        let key = load_private_key(
            credential.require("private_key")?,
            credential.get("private_key_passphrase"),
        )?;
        let auth = KeyPairAuth::new(account, user, &key)?;
        let host = match credential.get("host") {
            Some(host) => host.to_string(),
            None => default_host(account),
        };

        let mut session = SnowflakeSession {
            http: config.http_client()?,
            auth,
            base: base_url(&host),
            context: SessionContext {
                database: credential.get("database").map(str::to_string),
                schema: credential.get("schema").map(str::to_string),
                warehouse: Some(credential.require("warehouse")?.to_string()),
                role: credential.get("role").map(str::to_string),
            },
        };
        session.run("SELECT 1", config).await?;
        Ok(session)
    }

    fn session(&mut self, operation: &'static str) -> Result<&mut SnowflakeSession> {
        self.lifecycle.ensure_connected(operation)?;
        self.session
            .as_mut()
            .ok_or(ConnectorError::NotConnected(operation))
    }
}

#[async_trait]
impl Connector for SnowflakeConnector {
    fn kind(&self) -> &'static str {
        "snowflake"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Snowflake
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    async fn connect(&mut self, credential: &Credential) -> Result<()> {
        self.lifecycle.begin_connect()?;
        let outcome = match Self::open(&self.config, credential).await {
            Ok(session) => {
                info!("Connected to Snowflake at {}", session.base);
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!("Snowflake connect failed: {}", e);
                Err(e)
            }
        };
        self.lifecycle.finish_connect(outcome)
    }

    async fn list_catalogs(&mut self) -> Result<Vec<String>> {
        let config = self.config.clone();
        self.session("list catalogs")?
            .show_names("SHOW DATABASES", &config)
            .await
    }

    async fn list_schemas(&mut self, catalog: &str) -> Result<Vec<String>> {
        let config = self.config.clone();
        let session = self.session("list schemas")?;
        session.use_database(catalog, &config).await?;
        session.show_names("SHOW SCHEMAS", &config).await
    }

    async fn list_tables(&mut self, catalog: &str, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = match schema {
            Some(schema) => schema.to_string(),
            None => match self.list_schemas(catalog).await?.into_iter().next() {
                Some(first) => first,
                None => return Ok(Vec::new()),
            },
        };
        let config = self.config.clone();
        let session = self.session("list tables")?;
        session.use_database(catalog, &config).await?;
        session.use_schema(&schema, &config).await?;
        session.show_names("SHOW TABLES", &config).await
    }

    async fn sample_rows(&mut self, table: &TableRef, limit: usize) -> Result<ResultTable> {
        let config = self.config.clone();
        let session = self.session("sample rows")?;
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            session.qualified(table),
            config.sample_limit(limit)
        );
        session.run(&sql, &config).await
    }

    async fn table_schema(&mut self, table: &TableRef) -> Result<TableSchema> {
        let config = self.config.clone();
        let session = self.session("describe table")?;
        let sql = format!("DESCRIBE TABLE {}", session.qualified(table));
        let described = session.run(&sql, &config).await?;

        let (names, types) = match (described.column("name"), described.column("type")) {
            (Some(names), Some(types)) => (names, types),
            _ => {
                return Err(ConnectorError::Query(format!(
                    "unexpected DESCRIBE output for {}",
                    table
                )))
            }
        };
        Ok(TableSchema::new(
            names
                .values
                .iter()
                .zip(types.values.iter())
                .map(|(n, t)| SchemaField::new(n.to_text(), TypeTag::from_native(&t.to_text())))
                .collect(),
        ))
    }

    async fn execute(&mut self, sql: &str) -> Result<ResultTable> {
        let config = self.config.clone();
        self.session("execute")?.run(sql, &config).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.lifecycle.close() {
            self.session = None;
            info!("Closed Snowflake connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    const PKCS8: &str = include_str!("../tests/fixtures/rsa_pkcs8.pem");
    const PKCS8_ENCRYPTED: &str = include_str!("../tests/fixtures/rsa_pkcs8_encrypted.pem");
    const PKCS1: &str = include_str!("../tests/fixtures/rsa_pkcs1.pem");
    const PUBLIC: &str = include_str!("../tests/fixtures/rsa_public.pem");
    const FINGERPRINT: &str = include_str!("../tests/fixtures/public_key_fingerprint.txt");

    #[test]
    fn all_pem_forms_decode_to_the_same_key() {
        let plain = load_private_key(PKCS8, None).unwrap();
        let encrypted = load_private_key(PKCS8_ENCRYPTED, Some("flashviz")).unwrap();
        let traditional = load_private_key(PKCS1, None).unwrap();
        assert_eq!(plain.to_public_key(), encrypted.to_public_key());
        assert_eq!(plain.to_public_key(), traditional.to_public_key());
    }

    #[test]
    fn escaped_newlines_are_accepted() {
        let escaped = PKCS8.trim().replace('\n', "\\n");
        assert!(load_private_key(&escaped, None).is_ok());
    }

    #[test]
    fn encrypted_key_needs_passphrase() {
        assert!(matches!(
            load_private_key(PKCS8_ENCRYPTED, None),
            Err(ConnectorError::Authentication(_))
        ));
        assert!(matches!(
            load_private_key(PKCS8_ENCRYPTED, Some("wrong")),
            Err(ConnectorError::Authentication(_))
        ));
        assert!(matches!(
            load_private_key("garbage", None),
            Err(ConnectorError::Authentication(_))
        ));
    }

    #[test]
    fn fingerprint_matches_openssl() {
        let key = load_private_key(PKCS8, None).unwrap();
        assert_eq!(
            public_key_fingerprint(&key).unwrap(),
            format!("SHA256:{}", FINGERPRINT.trim())
        );
    }

    #[test]
    fn account_identifier_drops_region() {
        assert_eq!(account_identifier("xy12345.us-east-1"), "XY12345");
        assert_eq!(account_identifier("myorg-analytics"), "MYORG-ANALYTICS");
        assert_eq!(
            account_identifier("xy12345.eu-west-1.aws.snowflakecomputing.com"),
            "XY12345"
        );
    }

    #[test]
    fn default_host_strips_domain() {
        assert_eq!(default_host("xy12345.us-east-1"), "xy12345.us-east-1.snowflakecomputing.com");
        assert_eq!(default_host("MyOrg-Analytics"), "myorg-analytics.snowflakecomputing.com");
        assert_eq!(
            default_host("xxx.snowflakecomputing.com"),
            "xxx.snowflakecomputing.com"
        );
        assert_eq!(
            default_host(" xy12345.eu-west-1.aws.snowflakecomputing.com "),
            "xy12345.eu-west-1.aws.snowflakecomputing.com"
        );
    }

    #[test]
    fn jwt_claims_follow_keypair_format() {
        let key = load_private_key(PKCS8, None).unwrap();
        let mut auth = KeyPairAuth::new("xy12345.us-east-1", "analyst", &key).unwrap();
        let token = auth.token().unwrap();
        assert_eq!(auth.token().unwrap(), token);

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let claims = decode::<KeyPairClaims>(
            &token,
            &DecodingKey::from_rsa_pem(PUBLIC.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(claims.sub, "XY12345.ANALYST");
        assert_eq!(
            claims.iss,
            format!("XY12345.ANALYST.SHA256:{}", FINGERPRINT.trim())
        );
        assert_eq!(claims.exp - claims.iat, 59 * 60);
    }

    #[test]
    fn row_types_map_to_tags() {
        let row = |kind: &str, scale: Option<i64>| RowType {
            name: "c".into(),
            kind: kind.into(),
            scale,
        };
        assert_eq!(row("fixed", Some(0)).type_tag(), TypeTag::Integer);
        assert_eq!(row("fixed", Some(2)).type_tag(), TypeTag::Float);
        assert_eq!(row("real", None).type_tag(), TypeTag::Float);
        assert_eq!(row("text", None).type_tag(), TypeTag::String);
        assert_eq!(row("timestamp_ntz", None).type_tag(), TypeTag::Timestamp);
        assert_eq!(row("variant", None).type_tag(), TypeTag::String);
        assert_eq!(
            row("date", None).normalize(Some("19723".into())),
            Some("2024-01-01".to_string())
        );
        assert_eq!(row("text", None).normalize(None), None);
    }

    #[test]
    fn identifiers_quote_only_when_needed() {
        assert_eq!(quote_ident("SALES"), "SALES");
        assert_eq!(quote_ident("MY_DB$2"), "MY_DB$2");
        assert_eq!(quote_ident("my_db"), "\"my_db\"");
        assert_eq!(quote_ident("Sales"), "\"Sales\"");
        assert_eq!(quote_ident("Order Items"), "\"Order Items\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let mut connector = SnowflakeConnector::new(ConnectorConfig::default());
        let table = TableRef::new("DB", "T");
        assert!(matches!(connector.list_catalogs().await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.list_schemas("DB").await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.list_tables("DB", Some("S")).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.sample_rows(&table, 5).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.table_schema(&table).await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.execute("SELECT 1").await, Err(ConnectorError::NotConnected(_))));
        assert!(matches!(connector.use_database("DB").await, Err(ConnectorError::NotConnected(_))));
        connector.close().await.unwrap();
        connector.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_account_fails_connect() {
        let mut connector = SnowflakeConnector::new(ConnectorConfig::default());
        let err = connector
            .connect(&Credential::new().with("user", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
        assert_eq!(connector.state(), ConnectionState::Failed);
    }
}
