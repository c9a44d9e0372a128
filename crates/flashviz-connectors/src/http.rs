//! Shared helpers for REST-backed adapters.

use flashviz_core::{Column, ResultTable, TypeTag};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ConnectorError, Result};

/// Turn a non-success response into the matching error, keeping the
/// backend's body as the diagnostic text.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        body
    };
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectorError::Authentication(detail),
        _ => ConnectorError::Query(detail),
    })
}

/// `check_status` then decode the JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ConnectorError::Query(format!("unexpected response body: {}", e)))
}

/// Normalize a configured host into a base URL. Hosts without a scheme get
/// `https://`; an explicit scheme is kept as-is.
pub(crate) fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Build a result table from row-major text cells and per-column tags.
/// Rows shorter than the column list read as NULL.
pub(crate) fn text_table(
    columns: Vec<(String, TypeTag)>,
    rows: &[Vec<Option<String>>],
) -> ResultTable {
    let columns = columns
        .into_iter()
        .enumerate()
        .map(|(idx, (name, tag))| {
            let raws: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get(idx).cloned().flatten())
                .collect();
            Column::from_raw(name, tag, &raws)
        })
        .collect();
    ResultTable::new(columns)
}

/// JSON cell as text: strings verbatim, null as NULL, anything else
/// (numbers, nested records) as its JSON rendering.
pub(crate) fn json_cell(cell: &serde_json::Value) -> Option<String> {
    match cell {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashviz_core::Value;

    #[test]
    fn text_table_types_columns() {
        let table = text_table(
            vec![("n".into(), TypeTag::Integer), ("s".into(), TypeTag::String)],
            &[
                vec![Some("1".into()), Some("a".into())],
                vec![None, Some("b".into())],
                vec![Some("3".into())],
            ],
        );
        assert_eq!(table.num_rows(), 3);
        assert_eq!(
            table.column("n").unwrap().values,
            vec![Value::Integer(1), Value::Null, Value::Integer(3)]
        );
        assert_eq!(table.column("s").unwrap().values[2], Value::Null);
    }

    #[test]
    fn base_url_adds_scheme() {
        assert_eq!(base_url("acme.snowflakecomputing.com"), "https://acme.snowflakecomputing.com");
        assert_eq!(base_url("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
    }
}
