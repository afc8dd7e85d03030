//! REST compiler.
//!
//! A REST fetch is fully described by its configuration; the client field only
//! supplies values. URL, header, query parameter and body templates reference
//! them with `{{ .arguments.NAME }}` and `{{ .object.PATH }}` selectors, which
//! become placeholders (or inline text, for literal arguments).

use regex::Regex;

use fieldgate_core::ast::{Field, FieldDefinition, OperationKind, Value};
use fieldgate_core::binding::{json_escape, Binding, Renderer, VariableSource, VariableTable};
use fieldgate_core::error::RenderError;
use fieldgate_core::template::RequestTemplate;

use crate::compiler::CompiledFetch;
use crate::datasource::{ArgumentRender, FieldConfiguration, RestConfiguration};
use crate::error::{CompileError, CompileResult, ConfigError};
use crate::walk::{Descend, FieldVisit, Visitor, WalkContext};

/// Matches `{{ .arguments.id }}`; group 1 is the selector without the dot.
pub(crate) fn selector_regex() -> Result<Regex, regex::Error> {
    Regex::new(r"\{\{\s*\.?([^\s}]+)\s*\}\}")
}

/// Where a template string ends up in the request JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Inside a JSON string (url, header value, query value).
    String,
    /// Raw JSON text (body).
    Json,
}

#[derive(Debug, Clone)]
struct RootCapture {
    field: Field,
    enclosing_type: String,
    definition: Option<FieldDefinition>,
    config: Option<FieldConfiguration>,
}

#[derive(Debug)]
pub struct RestCompiler {
    config: RestConfiguration,
    selectors: Regex,
    root: Option<RootCapture>,
    variables: VariableTable,
}

impl RestCompiler {
    pub fn new(config: RestConfiguration) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            selectors: selector_regex()?,
            root: None,
            variables: VariableTable::new(),
        })
    }

    pub fn config(&self) -> &RestConfiguration {
        &self.config
    }

    pub fn reset(&mut self) {
        self.root = None;
        self.variables.clear();
    }

    fn renderer_for(&self, argument: &str, slot: Slot) -> Renderer {
        let render = self
            .root
            .as_ref()
            .and_then(|r| r.config.as_ref())
            .and_then(|c| c.argument(argument))
            .map(|a| a.render_configuration)
            .unwrap_or_default();
        match (render, slot) {
            (ArgumentRender::RenderArgumentAsArrayCsv, _) => Renderer::Csv,
            (ArgumentRender::RenderArgumentAsGraphqlValue, _) => Renderer::GraphqlLiteral,
            (ArgumentRender::RenderArgumentDefault, Slot::String) => Renderer::Plain,
            (ArgumentRender::RenderArgumentDefault, Slot::Json) => Renderer::Json,
        }
    }

    fn render_inline(renderer: Renderer, value: &serde_json::Value) -> CompileResult<String> {
        let mut out = String::new();
        renderer
            .render(value, &mut out)
            .map_err(|e: RenderError| CompileError::Internal(e.to_string()))?;
        Ok(out)
    }

    /// Text that replaces one selector.
    fn resolve_selector(
        &mut self,
        cx: &WalkContext<'_>,
        selector: &str,
        string_context: bool,
        slot: Slot,
    ) -> CompileResult<String> {
        let mut parts = selector.split('.');
        let head = parts.next().unwrap_or_default();
        let rest: Vec<String> = parts.map(str::to_string).collect();

        match head {
            "arguments" => {
                let Some((name, sub_path)) = rest.split_first() else {
                    return Ok(String::new());
                };
                let renderer = if string_context {
                    self.renderer_for(name, Slot::String)
                } else {
                    self.renderer_for(name, slot)
                };
                let Some(root) = self.root.as_ref() else {
                    return Err(CompileError::Internal("no root field captured".into()));
                };
                match root.field.argument(name).map(|a| a.value.clone()) {
                    Some(Value::Variable(var)) => {
                        if cx.operation.variable_definition(&var).is_none() {
                            return Err(CompileError::UnknownVariable { name: var });
                        }
                        let mut path = vec![var];
                        path.extend(sub_path.iter().cloned());
                        let (placeholder, _) = self
                            .variables
                            .add(Binding::new(VariableSource::Context { path }, renderer));
                        Ok(placeholder)
                    }
                    Some(literal) => {
                        let json = literal.to_json().ok_or_else(|| {
                            CompileError::MalformedArgumentType {
                                type_name: root.enclosing_type.clone(),
                                field_name: root.field.name.clone(),
                                argument: name.clone(),
                                reason: "list or object argument mixes literals and variables"
                                    .into(),
                            }
                        })?;
                        let value = sub_path
                            .iter()
                            .try_fold(&json, |cur, key| cur.get(key))
                            .cloned()
                            .unwrap_or(serde_json::Value::Null);
                        Self::render_inline(renderer, &value)
                    }
                    None => {
                        let default = root
                            .definition
                            .as_ref()
                            .and_then(|d| d.argument(name))
                            .and_then(|a| a.default_value.clone());
                        match default {
                            Some(value) => {
                                let (placeholder, _) = self.variables.add(Binding::new(
                                    VariableSource::Literal { value },
                                    renderer,
                                ));
                                Ok(placeholder)
                            }
                            None if renderer == Renderer::Json => Ok("null".to_string()),
                            None => Ok(String::new()),
                        }
                    }
                }
            }
            "object" => {
                let renderer = if string_context {
                    Renderer::Plain
                } else {
                    match slot {
                        Slot::String => Renderer::Plain,
                        Slot::Json => Renderer::Json,
                    }
                };
                let (placeholder, _) = self
                    .variables
                    .add(Binding::new(VariableSource::Object { path: rest }, renderer));
                Ok(placeholder)
            }
            other => {
                tracing::debug!(selector = %other, "dropping unsupported template selector");
                Ok(String::new())
            }
        }
    }

    /// Expand the selectors of `template` for the given slot.
    fn expand(
        &mut self,
        cx: &WalkContext<'_>,
        template: &str,
        slot: Slot,
    ) -> CompileResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        let matches: Vec<(usize, usize, String)> = self
            .selectors
            .captures_iter(template)
            .filter_map(|c| {
                let whole = c.get(0)?;
                Some((whole.start(), whole.end(), c.get(1)?.as_str().to_string()))
            })
            .collect();
        for (start, end, selector) in matches {
            let literal = &template[last..start];
            match slot {
                Slot::String => out.push_str(&json_escape(literal)),
                Slot::Json => out.push_str(literal),
            }
            // A selector inside a JSON string in the body renders unquoted.
            let in_string = slot == Slot::Json
                && template[..start].ends_with('"')
                && template[end..].starts_with('"');
            let text = self.resolve_selector(cx, &selector, in_string, slot)?;
            out.push_str(&text);
            last = end;
        }
        let tail = &template[last..];
        match slot {
            Slot::String => out.push_str(&json_escape(tail)),
            Slot::Json => out.push_str(tail),
        }
        Ok(out)
    }

    /// Whether a query parameter survives: every argument it references is
    /// present, and variables among them are defined by the operation.
    fn keep_query_param(&self, cx: &WalkContext<'_>, value: &str) -> bool {
        let Some(root) = self.root.as_ref() else {
            return false;
        };
        self.selectors.captures_iter(value).all(|c| {
            let Some(selector) = c.get(1).map(|m| m.as_str()) else {
                return true;
            };
            let mut parts = selector.split('.');
            if parts.next() != Some("arguments") {
                return true;
            }
            let Some(name) = parts.next() else {
                return true;
            };
            match root.field.argument(name) {
                None => false,
                Some(arg) => match &arg.value {
                    Value::Variable(v) => cx.operation.variable_definition(v).is_some(),
                    _ => true,
                },
            }
        })
    }

    pub fn finish(&mut self, cx: &WalkContext<'_>) -> CompileResult<CompiledFetch> {
        let fetch = self.config.fetch.clone();

        let url = self.expand(cx, &fetch.url, Slot::String)?;

        let mut header = String::from("{");
        for (i, (name, values)) in fetch.header.iter().enumerate() {
            if i > 0 {
                header.push(',');
            }
            header.push_str(&serde_json::Value::String(name.clone()).to_string());
            header.push_str(":[");
            for (j, v) in values.iter().enumerate() {
                if j > 0 {
                    header.push(',');
                }
                header.push('"');
                header.push_str(&self.expand(cx, v, Slot::String)?);
                header.push('"');
            }
            header.push(']');
        }
        header.push('}');

        let mut query = String::from("[");
        let mut first = true;
        for param in &fetch.query {
            if !self.keep_query_param(cx, &param.value) {
                continue;
            }
            if !first {
                query.push(',');
            }
            first = false;
            query.push_str(r#"{"name":"#);
            query.push_str(&serde_json::Value::String(param.name.clone()).to_string());
            query.push_str(r#","value":""#);
            query.push_str(&self.expand(cx, &param.value, Slot::String)?);
            query.push_str(r#""}"#);
        }
        query.push(']');

        let body = if fetch.body.trim().is_empty() {
            "null".to_string()
        } else {
            self.expand(cx, &fetch.body, Slot::Json)?
        };

        let text = format!(
            r#"{{"method":{},"url":"{}","header":{},"query_params":{},"body":{},"url_encode_body":{}}}"#,
            serde_json::Value::String(fetch.method.clone()),
            url,
            header,
            query,
            body,
            fetch.url_encode_body
        );

        let root_field = self
            .root
            .as_ref()
            .map(|r| r.field.name.clone())
            .unwrap_or_default();
        Ok(CompiledFetch {
            template: RequestTemplate::new(text, std::mem::take(&mut self.variables)),
            root_field,
            operation_kind: if fetch.method.eq_ignore_ascii_case("GET") {
                OperationKind::Query
            } else {
                OperationKind::Mutation
            },
            downstream_alias: None,
            disallow_single_flight: !fetch.method.eq_ignore_ascii_case("GET"),
        })
    }
}

impl Visitor for RestCompiler {
    fn enter_field(
        &mut self,
        _cx: &WalkContext<'_>,
        visit: &FieldVisit<'_>,
    ) -> CompileResult<Descend> {
        if visit.is_root {
            self.root = Some(RootCapture {
                field: visit.field.clone(),
                enclosing_type: visit.enclosing_type.to_string(),
                definition: visit.definition.cloned(),
                config: visit.config.cloned(),
            });
        }
        Ok(Descend::Yes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_regex_matches_with_and_without_spaces() {
        let caps: Vec<_> = selector_regex()
            .unwrap()
            .captures_iter("/users/{{ .arguments.id }}/x/{{.object.a.b}}")
            .map(|c| c[1].to_string())
            .collect();
        assert_eq!(caps, vec!["arguments.id", "object.a.b"]);
    }
}
