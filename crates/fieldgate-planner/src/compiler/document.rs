//! Upstream operation document.
//!
//! Nodes live in a flat arena and reference each other by index. Compilers
//! keep a stack of open node ids while walking, so resetting a compiler is a
//! matter of clearing two vectors.

use fieldgate_core::ast::OperationKind;
use fieldgate_core::binding::json_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Argument values as they appear in the upstream text.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamValue {
    /// `$name`, declared on the upstream operation.
    Variable(String),
    /// `$$N$$`, filled at render time.
    Placeholder(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<UpstreamValue>),
    Object(Vec<(String, UpstreamValue)>),
    /// A list printed as a GraphQL string holding its JSON text.
    JsonList(Vec<UpstreamValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamArgument {
    pub name: String,
    pub value: UpstreamValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamVariable {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Operation {
        kind: OperationKind,
        variables: Vec<UpstreamVariable>,
        selection_set: Option<NodeId>,
    },
    SelectionSet {
        selections: Vec<NodeId>,
    },
    Field {
        alias: Option<String>,
        name: String,
        arguments: Vec<UpstreamArgument>,
        selection_set: Option<NodeId>,
    },
    InlineFragment {
        type_condition: String,
        selection_set: Option<NodeId>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Document {
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn add_operation(&mut self, kind: OperationKind) -> NodeId {
        let id = self.push(Node::Operation {
            kind,
            variables: Vec::new(),
            selection_set: None,
        });
        self.root = Some(id);
        id
    }

    pub fn set_operation_kind(&mut self, new_kind: OperationKind) {
        if let Some(root) = self.root {
            if let Node::Operation { kind, .. } = self.node_mut(root) {
                *kind = new_kind;
            }
        }
    }

    pub fn operation_kind(&self) -> Option<OperationKind> {
        match self.root.map(|r| self.node(r)) {
            Some(Node::Operation { kind, .. }) => Some(*kind),
            _ => None,
        }
    }

    pub fn has_variable(&self, name: &str) -> bool {
        match self.root.map(|r| self.node(r)) {
            Some(Node::Operation { variables, .. }) => variables.iter().any(|v| v.name == name),
            _ => false,
        }
    }

    /// Declare `$name: ty` on the operation unless already declared.
    pub fn add_variable(&mut self, name: &str, ty: String) {
        if self.has_variable(name) {
            return;
        }
        if let Some(root) = self.root {
            if let Node::Operation { variables, .. } = self.node_mut(root) {
                variables.push(UpstreamVariable {
                    name: name.to_string(),
                    ty,
                });
            }
        }
    }

    /// Attach a fresh selection set to `parent` (operation, field or fragment).
    pub fn add_selection_set(&mut self, parent: NodeId) -> NodeId {
        let set = self.push(Node::SelectionSet {
            selections: Vec::new(),
        });
        match self.node_mut(parent) {
            Node::Operation { selection_set, .. }
            | Node::Field { selection_set, .. }
            | Node::InlineFragment { selection_set, .. } => *selection_set = Some(set),
            Node::SelectionSet { .. } => {}
        }
        set
    }

    fn add_selection(&mut self, set: NodeId, child: NodeId) {
        if let Node::SelectionSet { selections } = self.node_mut(set) {
            selections.push(child);
        }
    }

    pub fn add_field(&mut self, set: NodeId, name: String, alias: Option<String>) -> NodeId {
        let field = self.push(Node::Field {
            alias,
            name,
            arguments: Vec::new(),
            selection_set: None,
        });
        self.add_selection(set, field);
        field
    }

    pub fn add_inline_fragment(&mut self, set: NodeId, type_condition: String) -> NodeId {
        let fragment = self.push(Node::InlineFragment {
            type_condition,
            selection_set: None,
        });
        self.add_selection(set, fragment);
        fragment
    }

    pub fn add_argument(&mut self, field: NodeId, name: &str, value: UpstreamValue) {
        if let Node::Field { arguments, .. } = self.node_mut(field) {
            arguments.push(UpstreamArgument {
                name: name.to_string(),
                value,
            });
        }
    }

    /// Print the operation in compact GraphQL syntax.
    pub fn print(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.print_node(root, &mut out);
        }
        out
    }

    fn print_node(&self, id: NodeId, out: &mut String) {
        match self.node(id) {
            Node::Operation {
                kind,
                variables,
                selection_set,
            } => {
                if *kind != OperationKind::Query || !variables.is_empty() {
                    out.push_str(kind.as_str());
                }
                if !variables.is_empty() {
                    out.push('(');
                    for (i, v) in variables.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push('$');
                        out.push_str(&v.name);
                        out.push_str(": ");
                        out.push_str(&v.ty);
                    }
                    out.push(')');
                }
                if let Some(set) = selection_set {
                    self.print_node(*set, out);
                }
            }
            Node::SelectionSet { selections } => {
                out.push('{');
                for (i, s) in selections.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.print_node(*s, out);
                }
                out.push('}');
            }
            Node::Field {
                alias,
                name,
                arguments,
                selection_set,
            } => {
                if let Some(alias) = alias {
                    out.push_str(alias);
                    out.push_str(": ");
                }
                out.push_str(name);
                if !arguments.is_empty() {
                    out.push('(');
                    for (i, a) in arguments.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&a.name);
                        out.push_str(": ");
                        print_value(&a.value, out);
                    }
                    out.push(')');
                }
                if let Some(set) = selection_set {
                    self.print_node(*set, out);
                }
            }
            Node::InlineFragment {
                type_condition,
                selection_set,
            } => {
                out.push_str("... on ");
                out.push_str(type_condition);
                out.push(' ');
                if let Some(set) = selection_set {
                    self.print_node(*set, out);
                }
            }
        }
    }
}

fn print_value(value: &UpstreamValue, out: &mut String) {
    match value {
        UpstreamValue::Variable(name) => {
            out.push('$');
            out.push_str(name);
        }
        UpstreamValue::Placeholder(p) => out.push_str(p),
        UpstreamValue::Int(i) => out.push_str(&i.to_string()),
        UpstreamValue::Float(f) => out.push_str(&format!("{f:?}")),
        UpstreamValue::String(s) => {
            out.push('"');
            out.push_str(&json_escape(s));
            out.push('"');
        }
        UpstreamValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        UpstreamValue::Null => out.push_str("null"),
        UpstreamValue::Enum(e) => out.push_str(e),
        UpstreamValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                print_value(item, out);
            }
            out.push(']');
        }
        UpstreamValue::Object(fields) => {
            out.push('{');
            for (i, (k, v)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(k);
                out.push_str(": ");
                print_value(v, out);
            }
            out.push('}');
        }
        UpstreamValue::JsonList(items) => {
            let mut json = String::new();
            print_json(&UpstreamValue::List(items.clone()), &mut json);
            out.push('"');
            out.push_str(&json);
            out.push('"');
        }
    }
}

/// JSON text of `value`, escaped to sit inside a GraphQL string.
/// Placeholders stay as they are; their renderers produce pre-escaped text.
fn print_json(value: &UpstreamValue, out: &mut String) {
    match value {
        UpstreamValue::Placeholder(p) => out.push_str(p),
        UpstreamValue::String(s) | UpstreamValue::Enum(s) => {
            let quoted = serde_json::Value::String(s.clone()).to_string();
            out.push_str(&json_escape(&quoted));
        }
        UpstreamValue::List(items) | UpstreamValue::JsonList(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                print_json(item, out);
            }
            out.push(']');
        }
        UpstreamValue::Object(fields) => {
            out.push('{');
            for (i, (k, v)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let key = serde_json::Value::String(k.clone()).to_string();
                out.push_str(&json_escape(&key));
                out.push(':');
                print_json(v, out);
            }
            out.push('}');
        }
        other => print_value(other, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_compact_mutation() {
        let mut doc = Document::default();
        let op = doc.add_operation(OperationKind::Mutation);
        let set = doc.add_selection_set(op);
        let f = doc.add_field(set, "createOneusers".into(), None);
        doc.add_argument(
            f,
            "data",
            UpstreamValue::Object(vec![
                ("provider".into(), UpstreamValue::Placeholder("$$0$$".into())),
                ("providerId".into(), UpstreamValue::Placeholder("$$1$$".into())),
            ]),
        );
        let sub = doc.add_selection_set(f);
        doc.add_field(sub, "id".into(), None);
        assert_eq!(
            doc.print(),
            "mutation{createOneusers(data: {provider: $$0$$,providerId: $$1$$}){id}}"
        );
    }

    #[test]
    fn anonymous_query_without_variables_omits_keyword() {
        let mut doc = Document::default();
        let op = doc.add_operation(OperationKind::Query);
        let set = doc.add_selection_set(op);
        let f = doc.add_field(set, "user".into(), Some("me".into()));
        let sub = doc.add_selection_set(f);
        doc.add_field(sub, "id".into(), None);
        doc.add_field(sub, "name".into(), None);
        assert_eq!(doc.print(), "{me: user{id name}}");

        doc.add_variable("id", "ID!".into());
        doc.add_variable("id", "ID!".into());
        assert_eq!(doc.print(), "query($id: ID!){me: user{id name}}");
    }

    #[test]
    fn json_list_prints_as_graphql_string() {
        let mut doc = Document::default();
        let op = doc.add_operation(OperationKind::Mutation);
        let set = doc.add_selection_set(op);
        let f = doc.add_field(set, "queryRaw".into(), None);
        doc.add_argument(f, "query", UpstreamValue::String("select 1".into()));
        doc.add_argument(
            f,
            "parameters",
            UpstreamValue::JsonList(vec![
                UpstreamValue::String("x".into()),
                UpstreamValue::Placeholder("$$0$$".into()),
            ]),
        );
        assert_eq!(
            doc.print(),
            r#"mutation{queryRaw(query: "select 1", parameters: "[\"x\",$$0$$]")}"#
        );
    }
}
