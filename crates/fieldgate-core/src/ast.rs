//! Client operation and schema trees.
//!
//! Operations arrive already parsed and normalized; this module only models
//! them. Traversal is read-only: compilers walk a borrowed `Operation` and never
//! mutate it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type reference as written in variable and argument definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn non_null(inner: TypeRef) -> Self {
        TypeRef::NonNull(Box::new(inner))
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    /// Innermost named type.
    pub fn base_name(&self) -> &str {
        match self {
            TypeRef::Named(n) => n,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.base_name(),
        }
    }

    pub fn is_list(&self) -> bool {
        match self {
            TypeRef::Named(_) => false,
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => inner.is_list(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(n) => f.write_str(n),
            TypeRef::List(inner) => write!(f, "[{inner}]"),
            TypeRef::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Argument and variable values.
///
/// Object fields keep their written order; printers rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn variable(name: impl Into<String>) -> Self {
        Value::Variable(name.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// True when any leaf of this value is a variable reference.
    pub fn has_variables(&self) -> bool {
        match self {
            Value::Variable(_) => true,
            Value::List(items) => items.iter().any(Value::has_variables),
            Value::Object(fields) => fields.iter().any(|(_, v)| v.has_variables()),
            _ => false,
        }
    }

    /// Convert a variable-free value to JSON. Enums become strings.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as J;
        Some(match self {
            Value::Variable(_) => return None,
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(J::Number)?,
            Value::String(s) | Value::Enum(s) => J::String(s.clone()),
            Value::Boolean(b) => J::Bool(*b),
            Value::Null => J::Null,
            Value::List(items) => J::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json()?);
                }
                J::Object(map)
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub alias: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    #[serde(default)]
    pub selection_set: Option<Vec<Selection>>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selection_set: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value,
        });
        self
    }

    pub fn select(mut self, selections: Vec<Selection>) -> Self {
        self.selection_set = Some(selections);
        self
    }

    /// Name the field appears under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFragment {
    #[serde(default)]
    pub type_condition: Option<String>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

impl From<Field> for Selection {
    fn from(f: Field) -> Self {
        Selection::Field(f)
    }
}

/// Leaf field shorthand used heavily by tests and benches.
pub fn leaf(name: &str) -> Selection {
    Selection::Field(Field::new(name))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    pub selection_set: Vec<Selection>,
}

impl Operation {
    pub fn new(kind: OperationKind, selection_set: Vec<Selection>) -> Self {
        Self {
            kind,
            name: None,
            variables: Vec::new(),
            selection_set,
        }
    }

    pub fn query(selection_set: Vec<Selection>) -> Self {
        Self::new(OperationKind::Query, selection_set)
    }

    pub fn mutation(selection_set: Vec<Selection>) -> Self {
        Self::new(OperationKind::Mutation, selection_set)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.variables.push(VariableDefinition {
            name: name.into(),
            ty,
            default_value: None,
        });
        self
    }

    pub fn variable_definition(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|v| v.name == name)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    #[default]
    Object,
    Interface,
    Union,
    InputObject,
    Enum,
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputValueDefinition {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<InputValueDefinition>,
    pub ty: TypeRef,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            ty,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.arguments.push(InputValueDefinition {
            name: name.into(),
            ty,
            default_value: None,
        });
        self
    }

    pub fn arg_with_default(
        mut self,
        name: impl Into<String>,
        ty: TypeRef,
        default_value: serde_json::Value,
    ) -> Self {
        self.arguments.push(InputValueDefinition {
            name: name.into(),
            ty,
            default_value: Some(default_value),
        });
        self
    }

    pub fn argument(&self, name: &str) -> Option<&InputValueDefinition> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl TypeDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub query_type: String,
    #[serde(default)]
    pub mutation_type: Option<String>,
    #[serde(default)]
    pub subscription_type: Option<String>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDefinition>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            query_type: "Query".to_string(),
            mutation_type: Some("Mutation".to_string()),
            subscription_type: None,
            types: BTreeMap::new(),
        }
    }
}

impl Schema {
    /// Add (or extend) an object type.
    pub fn with_type(mut self, name: &str, fields: Vec<FieldDefinition>) -> Self {
        self.add_type(name, TypeKind::Object, fields);
        self
    }

    pub fn with_input_type(mut self, name: &str, fields: Vec<FieldDefinition>) -> Self {
        self.add_type(name, TypeKind::InputObject, fields);
        self
    }

    pub fn add_type(&mut self, name: &str, kind: TypeKind, fields: Vec<FieldDefinition>) {
        let def = self
            .types
            .entry(name.to_string())
            .or_insert_with(|| TypeDefinition {
                name: name.to_string(),
                kind,
                fields: Vec::new(),
            });
        def.fields.extend(fields);
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(self.query_type.as_str()),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn is_root_type(&self, type_name: &str) -> bool {
        self.query_type == type_name
            || self.mutation_type.as_deref() == Some(type_name)
            || self.subscription_type.as_deref() == Some(type_name)
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.field(field_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ref_display_and_base() {
        let t = TypeRef::non_null(TypeRef::list(TypeRef::non_null(TypeRef::named("String"))));
        assert_eq!(t.to_string(), "[String!]!");
        assert_eq!(t.base_name(), "String");
        assert!(t.is_list());
    }

    #[test]
    fn literal_values_convert_to_json() {
        let v = Value::object([
            ("a", Value::Int(1)),
            ("b", Value::List(vec![Value::Boolean(true), Value::Null])),
            ("c", Value::Enum("ASC".into())),
        ]);
        assert_eq!(
            v.to_json(),
            Some(serde_json::json!({"a": 1, "b": [true, null], "c": "ASC"}))
        );
        assert_eq!(Value::List(vec![Value::variable("x")]).to_json(), None);
    }

    #[test]
    fn schema_root_lookup() {
        let schema = Schema::default().with_type(
            "Query",
            vec![FieldDefinition::new("user", TypeRef::named("User"))],
        );
        assert!(schema.is_root_type("Mutation"));
        assert!(!schema.is_root_type("User"));
        assert!(schema.field("Query", "user").is_some());
        assert_eq!(schema.root_type(OperationKind::Subscription), None);
    }
}
