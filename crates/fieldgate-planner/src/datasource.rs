//! Resolved data source descriptors and their kind-specific custom settings.
//!
//! A descriptor is what the loader produces after environment references and
//! interned strings are resolved. The `custom` payload stays JSON until a
//! compiler factory decodes it into the struct for its kind.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSourceKind {
    Graphql,
    Rest,
    Static,
    Postgresql,
    Mysql,
    Sqlserver,
    Mongodb,
    Sqlite,
    Prisma,
}

impl DataSourceKind {
    pub const ALL: [DataSourceKind; 9] = [
        DataSourceKind::Graphql,
        DataSourceKind::Rest,
        DataSourceKind::Static,
        DataSourceKind::Postgresql,
        DataSourceKind::Mysql,
        DataSourceKind::Sqlserver,
        DataSourceKind::Mongodb,
        DataSourceKind::Sqlite,
        DataSourceKind::Prisma,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataSourceKind::Graphql => "GRAPHQL",
            DataSourceKind::Rest => "REST",
            DataSourceKind::Static => "STATIC",
            DataSourceKind::Postgresql => "POSTGRESQL",
            DataSourceKind::Mysql => "MYSQL",
            DataSourceKind::Sqlserver => "SQLSERVER",
            DataSourceKind::Mongodb => "MONGODB",
            DataSourceKind::Sqlite => "SQLITE",
            DataSourceKind::Prisma => "PRISMA",
        }
    }

    /// Kinds served by the out-of-process query engine.
    pub fn is_database(self) -> bool {
        matches!(
            self,
            DataSourceKind::Postgresql
                | DataSourceKind::Mysql
                | DataSourceKind::Sqlserver
                | DataSourceKind::Mongodb
                | DataSourceKind::Sqlite
                | DataSourceKind::Prisma
        )
    }

    /// Kinds reached over plain HTTP, which honor proxy settings.
    pub fn uses_http_proxy(self) -> bool {
        matches!(self, DataSourceKind::Rest | DataSourceKind::Graphql)
    }

    /// Provider name for the engine schema's `datasource` block.
    ///
    /// `None` for kinds whose schema already carries one (or that have none).
    pub fn schema_provider(self) -> Option<&'static str> {
        match self {
            DataSourceKind::Postgresql => Some("postgresql"),
            DataSourceKind::Mongodb => Some("mongodb"),
            DataSourceKind::Mysql => Some("mysql"),
            DataSourceKind::Sqlserver => Some("sqlserver"),
            DataSourceKind::Sqlite => Some("sqlite"),
            _ => None,
        }
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type and the fields of it a data source serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeField {
    pub type_name: String,
    pub field_names: Vec<String>,
}

impl TypeField {
    pub fn new(type_name: &str, field_names: &[&str]) -> Self {
        Self {
            type_name: type_name.to_string(),
            field_names: field_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn contains(list: &[TypeField], type_name: &str, field_name: &str) -> bool {
        list.iter().any(|tf| {
            tf.type_name == type_name && tf.field_names.iter().any(|f| f == field_name)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtlsConfiguration {
    pub key: String,
    pub cert: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Per data source HTTP client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpClientConfiguration {
    #[serde(default)]
    pub mtls: Option<MtlsConfiguration>,
    /// `None`: not configured, use the process default.
    /// `Some("")`: explicitly disable proxying.
    #[serde(default)]
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfiguration {
    pub id: String,
    pub kind: DataSourceKind,
    #[serde(default)]
    pub root_nodes: Vec<TypeField>,
    #[serde(default)]
    pub child_nodes: Vec<TypeField>,
    #[serde(default)]
    pub custom: serde_json::Value,
    #[serde(default)]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub http: HttpClientConfiguration,
}

impl DataSourceConfiguration {
    pub fn new(id: &str, kind: DataSourceKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            root_nodes: Vec::new(),
            child_nodes: Vec::new(),
            custom: serde_json::Value::Null,
            request_timeout_secs: 0,
            http: HttpClientConfiguration::default(),
        }
    }

    pub fn with_root(mut self, type_name: &str, fields: &[&str]) -> Self {
        self.root_nodes.push(TypeField::new(type_name, fields));
        self
    }

    pub fn with_child(mut self, type_name: &str, fields: &[&str]) -> Self {
        self.child_nodes.push(TypeField::new(type_name, fields));
        self
    }

    pub fn with_custom<T: Serialize>(mut self, custom: &T) -> Self {
        self.custom = serde_json::to_value(custom).unwrap_or(serde_json::Value::Null);
        self
    }

    pub fn has_root_node(&self, type_name: &str, field_name: &str) -> bool {
        TypeField::contains(&self.root_nodes, type_name, field_name)
    }

    pub fn has_child_node(&self, type_name: &str, field_name: &str) -> bool {
        TypeField::contains(&self.child_nodes, type_name, field_name)
    }

    /// Whether this data source can resolve `type_name.field_name` itself.
    pub fn serves(&self, type_name: &str, field_name: &str) -> bool {
        field_name == "__typename"
            || self.has_root_node(type_name, field_name)
            || self.has_child_node(type_name, field_name)
    }

    /// Decode the kind-specific custom settings.
    pub fn custom_config<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(self.custom.clone()).map_err(|e| ConfigError::BadCustomConfig {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Field and type configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArgumentSource {
    /// Value comes from the client's argument on this field.
    #[default]
    FieldArgument,
    /// Value comes from the parent object of a nested fetch.
    ObjectField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArgumentRender {
    #[default]
    RenderArgumentDefault,
    RenderArgumentAsGraphqlValue,
    RenderArgumentAsArrayCsv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentConfiguration {
    pub name: String,
    #[serde(default)]
    pub source_type: ArgumentSource,
    #[serde(default)]
    pub source_path: Vec<String>,
    #[serde(default)]
    pub render_configuration: ArgumentRender,
}

impl ArgumentConfiguration {
    pub fn field_argument(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source_type: ArgumentSource::FieldArgument,
            source_path: vec![name.to_string()],
            render_configuration: ArgumentRender::RenderArgumentDefault,
        }
    }

    pub fn object_field(name: &str, source_path: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            source_type: ArgumentSource::ObjectField,
            source_path: source_path.iter().map(|s| s.to_string()).collect(),
            render_configuration: ArgumentRender::RenderArgumentDefault,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfiguration {
    pub type_name: String,
    pub field_name: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub arguments_configuration: Vec<ArgumentConfiguration>,
}

impl FieldConfiguration {
    pub fn new(type_name: &str, field_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
            path: Vec::new(),
            arguments_configuration: Vec::new(),
        }
    }

    pub fn with_argument(mut self, arg: ArgumentConfiguration) -> Self {
        self.arguments_configuration.push(arg);
        self
    }

    pub fn with_path(mut self, path: &[&str]) -> Self {
        self.path = path.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentConfiguration> {
        self.arguments_configuration.iter().find(|a| a.name == name)
    }

    /// Backend field name when the path is a plain single-element remap.
    pub fn remapped_name(&self) -> Option<&str> {
        match self.path.as_slice() {
            [single] => Some(single.as_str()),
            _ => None,
        }
    }
}

/// Lookup over field configurations by `(type, field)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldConfigurations {
    by_key: BTreeMap<(String, String), FieldConfiguration>,
}

impl FieldConfigurations {
    pub fn new(fields: impl IntoIterator<Item = FieldConfiguration>) -> Self {
        let by_key = fields
            .into_iter()
            .map(|f| ((f.type_name.clone(), f.field_name.clone()), f))
            .collect();
        Self { by_key }
    }

    pub fn for_type_field(&self, type_name: &str, field_name: &str) -> Option<&FieldConfiguration> {
        self.by_key
            .get(&(type_name.to_string(), field_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Kind-specific custom settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFetchConfiguration {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub header: BTreeMap<String, Vec<String>>,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlConfiguration {
    pub fetch: HttpFetchConfiguration,
    #[serde(default)]
    pub upstream_schema: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfiguration {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestFetchConfiguration {
    pub url: String,
    #[serde(default = "default_rest_method")]
    pub method: String,
    #[serde(default)]
    pub header: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub query: Vec<QueryConfiguration>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url_encode_body: bool,
}

fn default_rest_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodeTypeMapping {
    pub status_code: u16,
    pub type_name: String,
    #[serde(default)]
    pub inject_status_code_into_body: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestConfiguration {
    pub fetch: RestFetchConfiguration,
    #[serde(default)]
    pub status_code_type_mappings: Vec<StatusCodeTypeMapping>,
    #[serde(default)]
    pub default_type_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticConfiguration {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleTypeField {
    pub type_name: String,
    pub field_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfiguration {
    #[serde(default)]
    pub database_url: String,
    /// Engine schema, datasource header included.
    pub prisma_schema: String,
    #[serde(default)]
    pub graphql_schema: String,
    #[serde(default)]
    pub close_timeout_seconds: u64,
    #[serde(default)]
    pub json_type_fields: Vec<SingleTypeField>,
    #[serde(default)]
    pub json_input_variables: Vec<String>,
}

impl DatabaseConfiguration {
    pub fn is_json_type_field(&self, type_name: &str, field_name: &str) -> bool {
        self.json_type_fields
            .iter()
            .any(|f| f.type_name == type_name && f.field_name == field_name)
    }

    pub fn is_json_input_type(&self, type_name: &str) -> bool {
        self.json_input_variables.iter().any(|t| t == type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_uppercase() {
        let k: DataSourceKind = serde_json::from_str("\"POSTGRESQL\"").unwrap();
        assert_eq!(k, DataSourceKind::Postgresql);
        assert!(k.is_database());
        assert_eq!(serde_json::to_string(&DataSourceKind::Rest).unwrap(), "\"REST\"");
    }

    #[test]
    fn serves_typename_and_declared_nodes() {
        let ds = DataSourceConfiguration::new("db", DataSourceKind::Sqlite)
            .with_root("Query", &["users"])
            .with_child("User", &["id", "name"]);
        assert!(ds.serves("Query", "users"));
        assert!(ds.serves("User", "name"));
        assert!(ds.serves("Anything", "__typename"));
        assert!(!ds.serves("User", "posts"));
    }

    #[test]
    fn bad_custom_config_names_the_data_source() {
        let mut ds = DataSourceConfiguration::new("rest-1", DataSourceKind::Rest);
        ds.custom = serde_json::json!({"fetch": 12});
        let err = ds.custom_config::<RestConfiguration>().unwrap_err();
        assert!(matches!(err, ConfigError::BadCustomConfig { ref id, .. } if id == "rest-1"));
    }

    #[test]
    fn remap_requires_single_element_path() {
        let f = FieldConfiguration::new("Query", "me").with_path(&["currentUser"]);
        assert_eq!(f.remapped_name(), Some("currentUser"));
        let f = FieldConfiguration::new("Query", "me").with_path(&["a", "b"]);
        assert_eq!(f.remapped_name(), None);
    }
}
