//! Variable binding table.
//!
//! A compiled request template references runtime values by position
//! (`$$N$$`). Each position maps to one `Binding` describing where the value
//! comes from and how it is rendered into the surrounding text.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::RenderError;

/// Where a bound value is read from at request time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum VariableSource {
    /// Client operation variables.
    Context { path: Vec<String> },
    /// The parent object a nested fetch is resolved for.
    Object { path: Vec<String> },
    /// A value fixed at compile time (e.g. a schema default).
    Literal { value: Json },
}

impl VariableSource {
    pub fn context(name: &str) -> Self {
        VariableSource::Context {
            path: vec![name.to_string()],
        }
    }

    pub fn object(path: &[String]) -> Self {
        VariableSource::Object {
            path: path.to_vec(),
        }
    }
}

/// How a bound value is written into the template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Renderer {
    /// Raw JSON text.
    Json,
    /// String content (or JSON text for non-strings), JSON-escaped, unquoted.
    Plain,
    /// List items joined by commas, JSON-escaped.
    Csv,
    /// GraphQL input literal, escaped for a JSON string.
    GraphqlLiteral,
    /// JSON text quoted as a GraphQL string, escaped for a JSON string.
    JsonString,
    /// Double-escaped JSON for raw query parameters.
    RawJson { parent_is_json: bool },
}

impl Renderer {
    pub fn name(&self) -> &'static str {
        match self {
            Renderer::Json => "json",
            Renderer::Plain => "plain",
            Renderer::Csv => "csv",
            Renderer::GraphqlLiteral => "graphql_literal",
            Renderer::JsonString => "json_string",
            Renderer::RawJson { .. } => "raw_json",
        }
    }

    pub fn render(&self, value: &Json, out: &mut String) -> Result<(), RenderError> {
        match self {
            Renderer::Json => out.push_str(&value.to_string()),
            Renderer::Plain => out.push_str(&json_escape(&plain_text(value))),
            Renderer::Csv => {
                let text = match value {
                    Json::Array(items) => {
                        let mut parts = Vec::with_capacity(items.len());
                        for item in items {
                            if item.is_array() || item.is_object() {
                                return Err(RenderError::Unrenderable {
                                    renderer: self.name(),
                                    reason: "nested list or object in csv value".into(),
                                });
                            }
                            parts.push(plain_text(item));
                        }
                        parts.join(",")
                    }
                    other => plain_text(other),
                };
                out.push_str(&json_escape(&text));
            }
            Renderer::GraphqlLiteral => {
                let mut literal = String::new();
                write_graphql_literal(value, &mut literal);
                out.push_str(&json_escape(&literal));
            }
            Renderer::JsonString => {
                let quoted = Json::String(value.to_string()).to_string();
                out.push_str(&json_escape(&quoted));
            }
            Renderer::RawJson { parent_is_json } => {
                if !parent_is_json {
                    out.push_str("\\\"");
                }
                out.push_str(&value.to_string().replace('"', "\\\\\\\""));
                if !parent_is_json {
                    out.push_str("\\\"");
                }
            }
        }
        Ok(())
    }
}

fn plain_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape `s` for embedding inside a JSON string literal (no surrounding quotes).
pub fn json_escape(s: &str) -> String {
    let quoted = Json::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Write a JSON value as a GraphQL input literal.
///
/// Object fields print as `{a: 1,b: "x"}`, matching the upstream printer.
pub fn write_graphql_literal(value: &Json, out: &mut String) {
    match value {
        Json::Null => out.push_str("null"),
        Json::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Json::Number(n) => out.push_str(&n.to_string()),
        Json::String(s) => out.push_str(&Json::String(s.clone()).to_string()),
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_graphql_literal(item, out);
            }
            out.push(']');
        }
        Json::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(k);
                out.push_str(": ");
                write_graphql_literal(v, out);
            }
            out.push('}');
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub source: VariableSource,
    pub renderer: Renderer,
}

impl Binding {
    pub fn new(source: VariableSource, renderer: Renderer) -> Self {
        Self { source, renderer }
    }

    pub fn render(&self, ctx: &RequestContext, out: &mut String) -> Result<(), RenderError> {
        let value = match &self.source {
            VariableSource::Context { path } => lookup(&ctx.variables, path),
            VariableSource::Object { path } => lookup(&ctx.object, path),
            VariableSource::Literal { value } => Some(value),
        };
        self.renderer.render(value.unwrap_or(&Json::Null), out)
    }
}

fn lookup<'a>(root: &'a Json, path: &[String]) -> Option<&'a Json> {
    path.iter().try_fold(root, |cur, key| match cur {
        Json::Object(map) => map.get(key),
        Json::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Runtime values a template is rendered against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    /// Client operation variables (a JSON object).
    pub variables: Json,
    /// Parent object for nested fetches.
    pub object: Json,
}

impl RequestContext {
    pub fn with_variables(variables: Json) -> Self {
        Self {
            variables,
            object: Json::Null,
        }
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.get(name).is_some()
    }
}

pub fn placeholder(position: usize) -> String {
    format!("$${position}$$")
}

/// Ordered, deduplicating binding table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableTable {
    bindings: Vec<Binding>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `binding` unless an identical one exists.
    ///
    /// Returns the placeholder token and whether the binding already existed.
    pub fn add(&mut self, binding: Binding) -> (String, bool) {
        if let Some(pos) = self.bindings.iter().position(|b| *b == binding) {
            return (placeholder(pos), true);
        }
        self.bindings.push(binding);
        (placeholder(self.bindings.len() - 1), false)
    }

    pub fn get(&self, position: usize) -> Option<&Binding> {
        self.bindings.get(position)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rendered(r: Renderer, v: Json) -> String {
        let mut out = String::new();
        r.render(&v, &mut out).unwrap();
        out
    }

    #[test]
    fn same_binding_is_bound_once() {
        let mut t = VariableTable::new();
        let p = Binding::new(VariableSource::context("p"), Renderer::GraphqlLiteral);
        let i = Binding::new(VariableSource::context("i"), Renderer::GraphqlLiteral);
        assert_eq!(t.add(p.clone()), ("$$0$$".to_string(), false));
        assert_eq!(t.add(i), ("$$1$$".to_string(), false));
        assert_eq!(t.add(p), ("$$0$$".to_string(), true));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn different_renderer_is_a_different_binding() {
        let mut t = VariableTable::new();
        t.add(Binding::new(VariableSource::context("p"), Renderer::Json));
        let (_, existed) = t.add(Binding::new(VariableSource::context("p"), Renderer::Plain));
        assert!(!existed);
    }

    #[test]
    fn renderers() {
        assert_eq!(rendered(Renderer::Json, json!({"a":"b"})), r#"{"a":"b"}"#);
        assert_eq!(rendered(Renderer::Plain, json!("say \"hi\"")), r#"say \"hi\""#);
        assert_eq!(rendered(Renderer::Plain, json!(42)), "42");
        assert_eq!(rendered(Renderer::Csv, json!(["a", 1, true])), "a,1,true");
        assert_eq!(
            rendered(Renderer::GraphqlLiteral, json!({"name":"x","n":[1,2]})),
            r#"{n: [1,2],name: \"x\"}"#
        );
        assert_eq!(
            rendered(Renderer::JsonString, json!({"a":1})),
            r#"\"{\\\"a\\\":1}\""#
        );
        assert_eq!(
            rendered(Renderer::RawJson { parent_is_json: false }, json!("x")),
            r#"\"\\\"x\\\"\""#
        );
        assert_eq!(
            rendered(Renderer::RawJson { parent_is_json: true }, json!(7)),
            "7"
        );
    }

    #[test]
    fn csv_rejects_nested_values() {
        let mut out = String::new();
        let err = Renderer::Csv.render(&json!([[1]]), &mut out).unwrap_err();
        assert!(matches!(err, RenderError::Unrenderable { renderer: "csv", .. }));
    }

    #[test]
    fn missing_values_render_as_null() {
        let ctx = RequestContext::with_variables(json!({"a": {"b": 1}}));
        let mut out = String::new();
        Binding::new(
            VariableSource::Context {
                path: vec!["a".into(), "b".into()],
            },
            Renderer::Json,
        )
        .render(&ctx, &mut out)
        .unwrap();
        Binding::new(VariableSource::context("zzz"), Renderer::Json)
            .render(&ctx, &mut out)
            .unwrap();
        assert_eq!(out, "1null");
    }
}
