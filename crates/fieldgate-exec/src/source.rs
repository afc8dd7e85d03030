//! Upstream sources: load one rendered request and return the raw response.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::time::{timeout_at, Instant};

use fieldgate_planner::datasource::RestConfiguration;

use crate::engine::LazyEngine;
use crate::error::{FetchError, Result};
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;

#[async_trait]
pub trait Source: Send + Sync {
    async fn load(&self, input: &[u8], deadline: Instant) -> Result<Bytes>;
}

#[derive(Debug, Deserialize)]
struct QueryParam {
    name: String,
    value: String,
}

/// A rendered GraphQL or REST request.
#[derive(Debug, Deserialize)]
struct HttpInput {
    method: String,
    url: String,
    #[serde(default)]
    header: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    query_params: Vec<QueryParam>,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    url_encode_body: bool,
}

/// Sends GraphQL and REST requests.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    rest: Option<RestConfiguration>,
}

impl HttpSource {
    pub fn graphql(client: Client) -> Self {
        Self { client, rest: None }
    }

    pub fn rest(client: Client, config: RestConfiguration) -> Self {
        Self {
            client,
            rest: Some(config),
        }
    }

    fn request(&self, input: HttpInput) -> Result<reqwest::RequestBuilder> {
        let method = Method::from_bytes(input.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| FetchError::InvalidInput(format!("method '{}': {e}", input.method)))?;
        let mut req = self.client.request(method, &input.url);
        for (name, values) in &input.header {
            for value in values {
                req = req.header(name.as_str(), value.as_str());
            }
        }
        if !input.query_params.is_empty() {
            let pairs: Vec<(&str, &str)> = input
                .query_params
                .iter()
                .map(|p| (p.name.as_str(), p.value.as_str()))
                .collect();
            req = req.query(&pairs);
        }
        req = match input.body {
            Value::Null => req,
            Value::Object(fields) if input.url_encode_body => {
                let form: Vec<(String, String)> = fields
                    .into_iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, v)
                    })
                    .collect();
                req.form(&form)
            }
            body => req.json(&body),
        };
        Ok(req)
    }
}

/// Tag a REST response with the GraphQL type its status code maps to.
pub fn apply_status_mapping(config: &RestConfiguration, status: u16, body: Bytes) -> Result<Bytes> {
    let mapping = config
        .status_code_type_mappings
        .iter()
        .find(|m| m.status_code == status);
    let (type_name, inject_status) = match (mapping, &config.default_type_name) {
        (Some(m), _) => (m.type_name.as_str(), m.inject_status_code_into_body),
        (None, Some(default)) => (default.as_str(), true),
        (None, None) => return Ok(body),
    };

    let mut object = if body.iter().all(u8::is_ascii_whitespace) {
        Map::new()
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Ok(body),
            Err(e) => return Err(FetchError::InvalidResponse(e.to_string())),
        }
    };
    object.insert("__typename".into(), Value::String(type_name.to_string()));
    if inject_status {
        object.insert("statusCode".into(), Value::from(status));
    }
    let out = serde_json::to_vec(&Value::Object(object))
        .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
    Ok(Bytes::from(out))
}

#[async_trait]
impl Source for HttpSource {
    async fn load(&self, input: &[u8], deadline: Instant) -> Result<Bytes> {
        let parsed: HttpInput =
            serde_json::from_slice(input).map_err(|e| FetchError::InvalidInput(e.to_string()))?;
        tracing::debug!(method = %parsed.method, url = %parsed.url, "upstream request");
        let req = self.request(parsed)?;

        let exchange = async {
            let res = req.send().await?;
            let status = res.status().as_u16();
            let body = res.bytes().await?;
            Ok::<_, FetchError>((status, body))
        };
        let (status, body) = timeout_at(deadline, exchange)
            .await
            .map_err(|_| FetchError::DeadlineExceeded { attempts: 1 })??;

        match &self.rest {
            Some(config) => apply_status_mapping(config, status, body),
            None if (200..300).contains(&status) => Ok(body),
            None => Err(FetchError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}

/// Answers with the rendered input itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSource;

#[async_trait]
impl Source for StaticSource {
    async fn load(&self, input: &[u8], _deadline: Instant) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(input))
    }
}

/// Whether the end of `head` lies inside a GraphQL string literal.
fn inside_string(head: &str) -> bool {
    let mut inside = false;
    let mut escaped = false;
    for c in head.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if inside => escaped = true,
            '"' => inside = !inside,
            _ => {}
        }
    }
    inside
}

/// Remove `name: null` arguments; the engine rejects explicit nulls for
/// optional inputs. Enum values such as `nulls_first` and string contents are
/// left alone.
pub fn strip_null_arguments(query: &str) -> String {
    const NULL: &str = ": null";
    let mut out = query.to_string();
    let mut from = 0;
    while let Some(found) = out[from..].find(NULL) {
        let at = from + found;
        let mut end = at + NULL.len();
        let is_token = !out[end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if !is_token || inside_string(&out[..at]) {
            from = end;
            continue;
        }
        let head = &out[..at];
        let start = ['{', '(', ',', ' ']
            .iter()
            .filter_map(|c| head.rfind(*c))
            .max()
            .map_or(0, |i| i + 1);
        if out[end..].starts_with(',') {
            end += 1;
        }
        out.replace_range(start..end, "");
        from = start;
    }
    out
}

/// Prepare a rendered database request for the engine.
pub fn normalize_database_request(input: &[u8]) -> Result<Vec<u8>> {
    let mut request: Value =
        serde_json::from_slice(input).map_err(|e| FetchError::InvalidInput(e.to_string()))?;
    let Value::Object(fields) = &mut request else {
        return Err(FetchError::InvalidInput("database request is not an object".into()));
    };
    fields.insert("variables".into(), Value::Object(Map::new()));
    if let Some(Value::String(query)) = fields.get_mut("query") {
        *query = strip_null_arguments(query);
    }
    serde_json::to_vec(&request).map_err(|e| FetchError::InvalidInput(e.to_string()))
}

/// Sends database requests to a lazily started engine.
pub struct DatabaseSource {
    engine: Arc<LazyEngine>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl DatabaseSource {
    pub fn new(engine: Arc<LazyEngine>, retry: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            engine,
            retry,
            metrics,
        }
    }
}

#[async_trait]
impl Source for DatabaseSource {
    async fn load(&self, input: &[u8], deadline: Instant) -> Result<Bytes> {
        let request = normalize_database_request(input)?;
        let engine = &self.engine;
        let request = &request;
        self.retry
            .run(deadline, &self.metrics, |_| async move {
                Ok(engine.execute(request, deadline).await?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgate_planner::datasource::StatusCodeTypeMapping;

    #[test]
    fn null_arguments_are_removed() {
        assert_eq!(
            strip_null_arguments("{findManyusers(where: null, take: 2){id}}"),
            "{findManyusers( take: 2){id}}"
        );
        assert_eq!(
            strip_null_arguments("{findFirstusers(cursor: null){id}}"),
            "{findFirstusers(){id}}"
        );
        assert_eq!(strip_null_arguments("{a(b: 1){id}}"), "{a(b: 1){id}}");
    }

    #[test]
    fn null_stripping_respects_token_boundaries() {
        assert_eq!(
            strip_null_arguments("{findManyusers(orderBy: {name: nulls_first}){id}}"),
            "{findManyusers(orderBy: {name: nulls_first}){id}}"
        );
        assert_eq!(
            strip_null_arguments(r#"{a(note: "x: null", b: null){id}}"#),
            r#"{a(note: "x: null", ){id}}"#
        );
        assert_eq!(
            strip_null_arguments("{a(sort: nullsLast, b: null){id}}"),
            "{a(sort: nullsLast, ){id}}"
        );
    }

    #[test]
    fn database_requests_get_empty_variables() {
        let out = normalize_database_request(br#"{"query":"{a(x: null){id}}","variables":null}"#).unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["variables"], serde_json::json!({}));
        assert_eq!(v["query"], "{a(){id}}");
        assert!(normalize_database_request(b"[1]").is_err());
    }

    fn rest_config() -> RestConfiguration {
        RestConfiguration {
            status_code_type_mappings: vec![
                StatusCodeTypeMapping {
                    status_code: 200,
                    type_name: "User".into(),
                    inject_status_code_into_body: false,
                },
                StatusCodeTypeMapping {
                    status_code: 404,
                    type_name: "NotFound".into(),
                    inject_status_code_into_body: true,
                },
            ],
            default_type_name: Some("Error".into()),
            ..RestConfiguration::default()
        }
    }

    #[test]
    fn status_codes_pick_the_type_name() {
        let cfg = rest_config();
        let body = apply_status_mapping(&cfg, 200, Bytes::from_static(br#"{"id":1}"#)).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            serde_json::json!({"id": 1, "__typename": "User"})
        );

        let body = apply_status_mapping(&cfg, 404, Bytes::new()).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            serde_json::json!({"__typename": "NotFound", "statusCode": 404})
        );

        let body = apply_status_mapping(&cfg, 500, Bytes::from_static(b"{}")).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            serde_json::json!({"__typename": "Error", "statusCode": 500})
        );

        let plain = RestConfiguration::default();
        let body = apply_status_mapping(&plain, 500, Bytes::from_static(b"oops")).unwrap();
        assert_eq!(&body[..], b"oops");
    }

    #[tokio::test]
    async fn static_source_echoes_input() {
        let out = StaticSource
            .load(br#"{"hello":"world"}"#, Instant::now())
            .await
            .unwrap();
        assert_eq!(&out[..], br#"{"hello":"world"}"#);
    }
}
