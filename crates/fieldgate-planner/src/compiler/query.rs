//! Query-language compiler shared by upstream GraphQL services and the
//! database engine.
//!
//! Both backends receive a GraphQL document. They differ in how client
//! variables reach it:
//! - `Forward`: variables are redeclared on the upstream operation and sent in
//!   a `variables` object rendered with the `Json` renderer.
//! - `Inline`: the engine gets no variables; every value is spliced into the
//!   query text through a placeholder.

use fieldgate_core::ast::{OperationKind, TypeRef, Value};
use fieldgate_core::binding::{json_escape, Binding, Renderer, VariableSource, VariableTable};
use fieldgate_core::template::RequestTemplate;

use crate::compiler::document::{Document, Node, NodeId, UpstreamValue};
use crate::compiler::CompiledFetch;
use crate::datasource::{
    ArgumentConfiguration, ArgumentSource, DatabaseConfiguration, FieldConfiguration,
    GraphqlConfiguration,
};
use crate::error::{CompileError, CompileResult};
use crate::walk::{Descend, FieldVisit, Visitor, WalkContext};

#[derive(Debug, Clone)]
pub enum VariableStrategy {
    Forward(GraphqlConfiguration),
    Inline(DatabaseConfiguration),
}

fn is_query_raw_json(name: &str) -> bool {
    name == "queryRawJSON" || name.ends_with("_queryRawJSON")
}

fn is_query_raw(name: &str) -> bool {
    name == "queryRaw" || name.ends_with("_queryRaw")
}

fn is_execute_raw(name: &str) -> bool {
    name == "executeRaw" || name.ends_with("_executeRaw")
}

fn is_raw_field(name: &str) -> bool {
    is_query_raw_json(name) || is_query_raw(name) || is_execute_raw(name)
}

/// Spreadsheet-style names: a, b, ..., z, aa, ab, ...
fn variable_name(mut n: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug)]
pub struct QueryCompiler {
    strategy: VariableStrategy,
    doc: Document,
    nodes: Vec<NodeId>,
    variables: VariableTable,
    /// Upstream variable name and the placeholder filling it (`Forward` only).
    upstream_variables: Vec<(String, String)>,
    root_field_name: Option<String>,
    downstream_alias: Option<String>,
    raw_query_root: bool,
    disallow_single_flight: bool,
}

impl QueryCompiler {
    pub fn new(strategy: VariableStrategy) -> Self {
        Self {
            strategy,
            doc: Document::default(),
            nodes: Vec::new(),
            variables: VariableTable::new(),
            upstream_variables: Vec::new(),
            root_field_name: None,
            downstream_alias: None,
            raw_query_root: false,
            disallow_single_flight: false,
        }
    }

    pub fn strategy(&self) -> &VariableStrategy {
        &self.strategy
    }

    pub fn reset(&mut self) {
        self.doc.clear();
        self.nodes.clear();
        self.variables.clear();
        self.upstream_variables.clear();
        self.root_field_name = None;
        self.downstream_alias = None;
        self.raw_query_root = false;
        self.disallow_single_flight = false;
    }

    fn database(&self) -> Option<&DatabaseConfiguration> {
        match &self.strategy {
            VariableStrategy::Inline(db) => Some(db),
            VariableStrategy::Forward(_) => None,
        }
    }

    fn top(&self) -> CompileResult<NodeId> {
        self.nodes
            .last()
            .copied()
            .ok_or_else(|| CompileError::Internal("node stack is empty".into()))
    }

    fn undefined_variable(name: &str) -> CompileError {
        CompileError::UnknownVariable {
            name: name.to_string(),
        }
    }

    /// Renderer for an inlined client variable of type `ty`.
    fn inline_renderer(&self, ty: &TypeRef, raw: Option<bool>) -> Renderer {
        if let Some(parent_is_json) = raw {
            return Renderer::RawJson { parent_is_json };
        }
        match self.database() {
            Some(db) if db.is_json_input_type(ty.base_name()) => Renderer::JsonString,
            _ => Renderer::GraphqlLiteral,
        }
    }

    /// Bind a client variable and return the upstream value referencing it.
    ///
    /// `raw` is `Some(parent_is_json)` inside a raw `parameters` argument.
    fn bind_variable(
        &mut self,
        cx: &WalkContext<'_>,
        name: &str,
        raw: Option<bool>,
    ) -> CompileResult<UpstreamValue> {
        let def = cx
            .operation
            .variable_definition(name)
            .ok_or_else(|| Self::undefined_variable(name))?;
        match self.strategy {
            VariableStrategy::Inline(_) => {
                let renderer = self.inline_renderer(&def.ty, raw);
                let (placeholder, _) = self
                    .variables
                    .add(Binding::new(VariableSource::context(name), renderer));
                Ok(UpstreamValue::Placeholder(placeholder))
            }
            VariableStrategy::Forward(_) => {
                let ty = def.ty.to_string();
                self.forward_variable(name, ty, VariableSource::context(name));
                Ok(UpstreamValue::Variable(name.to_string()))
            }
        }
    }

    fn forward_variable(&mut self, name: &str, ty: String, source: VariableSource) {
        self.doc.add_variable(name, ty);
        let (placeholder, existed) = self.variables.add(Binding::new(source, Renderer::Json));
        if !existed || !self.upstream_variables.iter().any(|(n, _)| n == name) {
            self.upstream_variables.push((name.to_string(), placeholder));
        }
    }

    /// Copy a client value into the upstream document, binding variable leaves.
    fn import_value(
        &mut self,
        cx: &WalkContext<'_>,
        value: &Value,
        raw_parent: bool,
    ) -> CompileResult<UpstreamValue> {
        Ok(match value {
            Value::Variable(name) => {
                self.bind_variable(cx, name, raw_parent.then_some(true))?
            }
            Value::Int(i) => UpstreamValue::Int(*i),
            Value::Float(f) => UpstreamValue::Float(*f),
            Value::String(s) => UpstreamValue::String(s.clone()),
            Value::Boolean(b) => UpstreamValue::Boolean(*b),
            Value::Null => UpstreamValue::Null,
            Value::Enum(e) => UpstreamValue::Enum(e.clone()),
            Value::List(items) => UpstreamValue::List(
                items
                    .iter()
                    .map(|v| self.import_value(cx, v, raw_parent))
                    .collect::<CompileResult<_>>()?,
            ),
            Value::Object(fields) => UpstreamValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.import_value(cx, v, raw_parent)?)))
                    .collect::<CompileResult<_>>()?,
            ),
        })
    }

    fn configure_field_argument(
        &mut self,
        cx: &WalkContext<'_>,
        upstream_field: NodeId,
        visit: &FieldVisit<'_>,
        argument: &str,
    ) -> CompileResult<()> {
        let Some(client_arg) = visit.field.argument(argument) else {
            return Ok(());
        };
        let raw = self.database().is_some()
            && is_raw_field(&visit.field.name)
            && argument == "parameters";

        let value = match (&client_arg.value, raw) {
            (Value::Variable(name), true) => self.bind_variable(cx, name, Some(false))?,
            (Value::List(items), true) => UpstreamValue::JsonList(
                items
                    .iter()
                    .map(|v| self.import_value(cx, v, true))
                    .collect::<CompileResult<_>>()?,
            ),
            (other, _) => self.import_value(cx, other, false)?,
        };
        self.doc.add_argument(upstream_field, argument, value);
        Ok(())
    }

    fn unused_variable_name(&self, cx: &WalkContext<'_>) -> String {
        (0..)
            .map(variable_name)
            .find(|n| !self.doc.has_variable(n) && cx.operation.variable_definition(n).is_none())
            .unwrap_or_default()
    }

    fn configure_object_field(
        &mut self,
        cx: &WalkContext<'_>,
        upstream_field: NodeId,
        visit: &FieldVisit<'_>,
        config: &FieldConfiguration,
        arg: &ArgumentConfiguration,
    ) -> CompileResult<()> {
        let malformed = |reason: &str| CompileError::MalformedArgumentType {
            type_name: visit.enclosing_type.to_string(),
            field_name: visit.field.name.clone(),
            argument: arg.name.clone(),
            reason: reason.to_string(),
        };
        if arg.source_path.is_empty() {
            return Err(malformed("object field source has an empty path"));
        }

        let field_name = config.remapped_name().unwrap_or(visit.field.name.as_str());
        let definition = cx
            .schema
            .field(&cx.schema.query_type, field_name)
            .and_then(|f| f.argument(&arg.name))
            .or_else(|| visit.definition.and_then(|d| d.argument(&arg.name)))
            .ok_or_else(|| malformed("argument is not defined in the schema"))?;

        let source = VariableSource::object(&arg.source_path);
        let value = match self.strategy {
            VariableStrategy::Forward(_) => {
                let name = self.unused_variable_name(cx);
                self.forward_variable(&name, definition.ty.to_string(), source);
                UpstreamValue::Variable(name)
            }
            VariableStrategy::Inline(_) => {
                let renderer = self.inline_renderer(&definition.ty, None);
                let (placeholder, _) = self.variables.add(Binding::new(source, renderer));
                UpstreamValue::Placeholder(placeholder)
            }
        };
        self.doc.add_argument(upstream_field, &arg.name, value);
        Ok(())
    }

    fn configure_arguments(
        &mut self,
        cx: &WalkContext<'_>,
        upstream_field: NodeId,
        visit: &FieldVisit<'_>,
    ) -> CompileResult<()> {
        match visit.config {
            Some(config) if !config.arguments_configuration.is_empty() => {
                for arg in &config.arguments_configuration {
                    match arg.source_type {
                        ArgumentSource::FieldArgument => {
                            self.configure_field_argument(cx, upstream_field, visit, &arg.name)?
                        }
                        ArgumentSource::ObjectField => {
                            self.configure_object_field(cx, upstream_field, visit, config, arg)?
                        }
                    }
                }
            }
            _ => {
                for arg in &visit.field.arguments {
                    self.configure_field_argument(cx, upstream_field, visit, &arg.name)?;
                }
            }
        }

        if self.database().is_some()
            && is_raw_field(&visit.field.name)
            && visit.field.argument("parameters").is_none()
        {
            self.doc
                .add_argument(upstream_field, "parameters", UpstreamValue::JsonList(Vec::new()));
        }
        Ok(())
    }

    /// Emit the request template for the walked operation.
    pub fn finish(&mut self) -> CompileResult<CompiledFetch> {
        let query = self.doc.print();
        let text = match &self.strategy {
            VariableStrategy::Inline(_) => {
                format!(r#"{{"query":"{}","variables":null}}"#, json_escape(&query))
            }
            VariableStrategy::Forward(gql) => {
                let mut vars = String::from("{");
                for (i, (name, placeholder)) in self.upstream_variables.iter().enumerate() {
                    if i > 0 {
                        vars.push(',');
                    }
                    vars.push_str(&serde_json::Value::String(name.clone()).to_string());
                    vars.push(':');
                    vars.push_str(placeholder);
                }
                vars.push('}');
                let header = serde_json::to_string(&gql.fetch.header)
                    .map_err(|e| CompileError::Internal(e.to_string()))?;
                format!(
                    r#"{{"method":{},"url":{},"header":{},"body":{{"query":"{}","variables":{}}}}}"#,
                    serde_json::Value::String(gql.fetch.method.clone()),
                    serde_json::Value::String(gql.fetch.url.clone()),
                    header,
                    json_escape(&query),
                    vars
                )
            }
        };
        Ok(CompiledFetch {
            template: RequestTemplate::new(text, std::mem::take(&mut self.variables)),
            root_field: self.root_field_name.take().unwrap_or_default(),
            operation_kind: self.doc.operation_kind().unwrap_or(OperationKind::Query),
            downstream_alias: self.downstream_alias.take(),
            disallow_single_flight: self.disallow_single_flight,
        })
    }
}

impl Visitor for QueryCompiler {
    fn enter_operation(&mut self, cx: &WalkContext<'_>) -> CompileResult<()> {
        let kind = if cx.is_nested {
            OperationKind::Query
        } else {
            cx.operation.kind
        };
        let op = self.doc.add_operation(kind);
        self.disallow_single_flight = kind == OperationKind::Mutation;
        self.nodes.push(op);
        Ok(())
    }

    fn leave_operation(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        self.nodes.pop();
        if self.raw_query_root {
            // The engine exposes raw queries on its Mutation type.
            self.doc.set_operation_kind(OperationKind::Mutation);
            self.disallow_single_flight = true;
        }
        Ok(())
    }

    fn enter_selection_set(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        let parent = self.top()?;
        let set = self.doc.add_selection_set(parent);
        if matches!(self.doc.node(parent), Node::InlineFragment { .. }) {
            self.doc.add_field(set, "__typename".to_string(), None);
        }
        self.nodes.push(set);
        Ok(())
    }

    fn leave_selection_set(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        self.nodes.pop();
        Ok(())
    }

    fn enter_inline_fragment(
        &mut self,
        _cx: &WalkContext<'_>,
        type_condition: &str,
    ) -> CompileResult<()> {
        let set = self.top()?;
        let fragment = self.doc.add_inline_fragment(set, type_condition.to_string());
        self.nodes.push(fragment);
        Ok(())
    }

    fn leave_inline_fragment(&mut self, _cx: &WalkContext<'_>) -> CompileResult<()> {
        self.nodes.pop();
        Ok(())
    }

    fn enter_field(
        &mut self,
        cx: &WalkContext<'_>,
        visit: &FieldVisit<'_>,
    ) -> CompileResult<Descend> {
        let client = visit.field;
        let remapped = visit.config.and_then(FieldConfiguration::remapped_name);
        let mut name = remapped.unwrap_or(client.name.as_str()).to_string();

        let db = self.database().is_some();
        let json_field = db
            && (is_query_raw_json(&client.name)
                || self
                    .database()
                    .is_some_and(|d| d.is_json_type_field(visit.enclosing_type, &client.name)));
        if db && is_query_raw_json(&client.name) {
            name = name.replacen("queryRawJSON", "queryRaw", 1);
        }
        if db && visit.is_root && (is_query_raw(&client.name) || is_query_raw_json(&client.name)) {
            self.raw_query_root = true;
        }

        let response_key = client.response_key();
        let alias = (response_key != name).then(|| response_key.to_string());

        if visit.is_root {
            self.root_field_name = Some(name.clone());
            if remapped.is_some_and(|r| r != client.name) && client.alias.is_none() {
                self.downstream_alias = Some(client.name.clone());
            }
        }

        let set = self.top()?;
        let upstream_field = self.doc.add_field(set, name, alias);
        self.configure_arguments(cx, upstream_field, visit)?;
        self.nodes.push(upstream_field);

        Ok(if json_field { Descend::No } else { Descend::Yes })
    }

    fn leave_field(&mut self, _cx: &WalkContext<'_>, _visit: &FieldVisit<'_>) -> CompileResult<()> {
        self.nodes.pop();
        Ok(())
    }

    fn foreign_field(
        &mut self,
        _cx: &WalkContext<'_>,
        visit: &FieldVisit<'_>,
    ) -> CompileResult<()> {
        // Object-field arguments of the nested fetch read their values from
        // this response, so the keys they name must be selected here.
        let Some(config) = visit.config else {
            return Ok(());
        };
        let set = self.top()?;
        for arg in &config.arguments_configuration {
            if arg.source_type != ArgumentSource::ObjectField {
                continue;
            }
            let Some(key) = arg.source_path.first() else {
                continue;
            };
            let selected = match self.doc.node(set) {
                Node::SelectionSet { selections } => selections.iter().any(|id| {
                    matches!(
                        self.doc.node(*id),
                        Node::Field { name, alias: None, .. } if name == key
                    )
                }),
                _ => true,
            };
            if !selected {
                self.doc.add_field(set, key.clone(), None);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_names_are_spreadsheet_style() {
        assert_eq!(variable_name(0), "a");
        assert_eq!(variable_name(25), "z");
        assert_eq!(variable_name(26), "aa");
        assert_eq!(variable_name(27), "ab");
    }

    #[test]
    fn raw_field_names() {
        assert!(is_raw_field("queryRaw"));
        assert!(is_raw_field("db_queryRawJSON"));
        assert!(is_raw_field("main_executeRaw"));
        assert!(!is_raw_field("queryRawish"));
        assert!(is_query_raw_json("db_queryRawJSON"));
        assert!(!is_query_raw("db_queryRawJSON"));
    }
}
