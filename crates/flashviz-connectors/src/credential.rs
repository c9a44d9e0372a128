//! Backend-typed connection parameters.
//!
//! A [`Credential`] is a flat key/value bag. It carries no schema of its
//! own: each adapter checks its required keys when `connect` runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};

/// Keys whose values are redacted in `Debug` output.
const SECRET_KEYS: &[&str] = &[
    "private_key",
    "private_key_passphrase",
    "access_token",
    "password",
    "token",
];

/// Connection parameters for one backend.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential {
    values: BTreeMap<String, String>,
}

impl Credential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Optional key. Empty strings count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Optional key with a backend-defined default.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Required key; a missing key is an authentication failure.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            ConnectorError::Authentication(format!("missing required credential '{}'", key))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Parse a JSON object. Scalar values are stringified; nulls are dropped.
    pub fn from_json(text: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            ConnectorError::Authentication(format!("credential file is not valid JSON: {}", e))
        })?;
        let object = parsed.as_object().ok_or_else(|| {
            ConnectorError::Authentication("credential file must be a JSON object".to_string())
        })?;

        let mut credential = Self::new();
        for (key, value) in object {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => credential.insert(key.clone(), s.clone()),
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {
                    credential.insert(key.clone(), value.to_string())
                }
                _ => {
                    return Err(ConnectorError::Authentication(format!(
                        "credential '{}' must be a scalar value",
                        key
                    )))
                }
            }
        }
        Ok(credential)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credential {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut credential = Self::new();
        for (k, v) in iter {
            credential.insert(k, v);
        }
        credential
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.values {
            if SECRET_KEYS.contains(&key.as_str()) {
                map.entry(key, &"***");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}
