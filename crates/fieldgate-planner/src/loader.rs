//! Declarative configuration → [`CompiledPlan`].
//!
//! Example (YAML):
//! ```yaml
//! default_flush_interval: 500
//! string_storage:
//!   users_schema: "model users { id Int @id }"
//!   users_gql: "type Query { findManyusers: [users] }"
//! datasource_configurations:
//!   - id: users
//!     kind: SQLITE
//!     root_nodes: [ { type_name: Query, field_names: [findManyusers] } ]
//!     custom_database:
//!       database_url: { env: USERS_DB, default: "file:./users.db" }
//!       prisma_schema: { key: users_schema }
//!       graphql_schema: { key: users_gql }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use fieldgate_core::ast::Schema;
use fieldgate_core::config::ConfigValue;

use crate::datasource::{
    DataSourceConfiguration, DataSourceKind, DatabaseConfiguration, FieldConfiguration,
    FieldConfigurations, GraphqlConfiguration, HttpClientConfiguration, HttpFetchConfiguration,
    MtlsConfiguration, QueryConfiguration, RestConfiguration, RestFetchConfiguration,
    SingleTypeField, StaticConfiguration, StatusCodeTypeMapping, TypeField,
};
use crate::error::{ConfigError, Result};
use crate::plan::{CompiledPlan, PlannedDataSource};
use crate::registry::{resolve_factory, DefaultFactoryResolver, FactoryResolver};

/// Fetch URLs starting with this prefix point at the gateway's own server.
pub const SERVER_URL_PLACEHOLDER: &str = "WG_SERVER_URL-";

/// Close timeout applied when a database source leaves it unset.
pub const DEFAULT_CLOSE_TIMEOUT_SECONDS: u64 = 30;

/// Reference into [`EngineConfiguration::string_storage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternedString {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MtlsInput {
    pub key: ConfigValue,
    pub cert: ConfigValue,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchInput {
    pub url: ConfigValue,
    pub base_url: ConfigValue,
    pub path: ConfigValue,
    pub method: Option<String>,
    pub header: BTreeMap<String, Vec<ConfigValue>>,
    pub query: Vec<QueryConfiguration>,
    pub body: ConfigValue,
    pub url_encode_body: bool,
    pub http_proxy_url: Option<ConfigValue>,
    pub mtls: Option<MtlsInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlInput {
    pub fetch: FetchInput,
    pub upstream_schema: InternedString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestInput {
    pub fetch: FetchInput,
    #[serde(default)]
    pub status_code_type_mappings: Vec<StatusCodeTypeMapping>,
    #[serde(default)]
    pub default_type_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticInput {
    pub data: ConfigValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInput {
    #[serde(default)]
    pub database_url: ConfigValue,
    pub prisma_schema: InternedString,
    pub graphql_schema: InternedString,
    #[serde(default)]
    pub close_timeout_seconds: u64,
    #[serde(default)]
    pub json_type_fields: Vec<SingleTypeField>,
    #[serde(default)]
    pub json_input_variables: Vec<String>,
}

/// One data source as written in the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceInput {
    pub id: String,
    pub kind: DataSourceKind,
    #[serde(default)]
    pub root_nodes: Vec<TypeField>,
    #[serde(default)]
    pub child_nodes: Vec<TypeField>,
    #[serde(default)]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub custom_graphql: Option<GraphqlInput>,
    #[serde(default)]
    pub custom_rest: Option<RestInput>,
    #[serde(default)]
    pub custom_static: Option<StaticInput>,
    #[serde(default)]
    pub custom_database: Option<DatabaseInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    pub default_flush_interval: i64,
    pub string_storage: BTreeMap<String, String>,
    pub field_configurations: Vec<FieldConfiguration>,
    pub datasource_configurations: Vec<DataSourceInput>,
}

impl EngineConfiguration {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a `.json` file as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn interned(&self, id: &str, s: &InternedString) -> Result<String> {
        self.string_storage
            .get(&s.key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingInternedString {
                id: id.to_string(),
                key: s.key.clone(),
            })
    }
}

/// `url` if set, else `base_url/path`; server-URL placeholders resolve to
/// `server_url/path`.
pub fn build_fetch_url(url: &str, base_url: &str, path: &str, server_url: &str) -> String {
    if url.starts_with(SERVER_URL_PLACEHOLDER) {
        return format!(
            "{}/{}",
            server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
    }
    if !url.is_empty() {
        return url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Prefix the engine schema with a `datasource db` block. `PRISMA` schemas
/// already carry one.
pub fn add_datasource_header(schema: &str, database_url: &str, kind: DataSourceKind) -> String {
    match kind.schema_provider() {
        Some(provider) => format!(
            "datasource db {{\n  url      = \"{database_url}\"\n  provider = \"{provider}\"\n}}\n\n{schema}"
        ),
        None => schema.to_string(),
    }
}

/// Builds compiled plans; resolvers are consulted in order.
pub struct Loader {
    resolvers: Vec<Box<dyn FactoryResolver>>,
    allowed_templates: Regex,
    placeholders: Regex,
}

impl Loader {
    pub fn new(resolvers: Vec<Box<dyn FactoryResolver>>) -> Result<Self> {
        Ok(Self {
            resolvers,
            allowed_templates: Regex::new(r"\{\{[^}]+\}\}")?,
            placeholders: Regex::new(r"\{.*\}")?,
        })
    }

    /// A loader with only the default kind → factory table.
    pub fn with_defaults() -> Result<Self> {
        Self::new(vec![Box::new(DefaultFactoryResolver)])
    }

    pub fn load(
        &self,
        config: &EngineConfiguration,
        schema: Schema,
        server_url: &str,
    ) -> Result<CompiledPlan> {
        let mut data_sources = Vec::with_capacity(config.datasource_configurations.len());
        for input in &config.datasource_configurations {
            let ds = self.descriptor(config, input, server_url)?;
            let factory = resolve_factory(&self.resolvers, &ds)?;
            tracing::debug!(id = %ds.id, kind = %ds.kind, ?factory, "resolved data source");
            data_sources.push(PlannedDataSource {
                config: ds,
                factory,
            });
        }

        let plan = CompiledPlan::new(
            data_sources,
            FieldConfigurations::new(config.field_configurations.iter().cloned()),
            config.default_flush_interval,
            schema,
        )?;
        tracing::info!(
            data_sources = plan.data_sources().len(),
            fields = plan.fields().len(),
            "loaded engine configuration"
        );
        Ok(plan)
    }

    fn fetch_url(&self, id: &str, fetch: &FetchInput, server_url: &str) -> Result<String> {
        let url = build_fetch_url(
            &fetch.url.resolve(),
            &fetch.base_url.resolve(),
            &fetch.path.resolve(),
            server_url,
        );
        let stripped = self.allowed_templates.replace_all(&url, "");
        if self.placeholders.is_match(&stripped) {
            return Err(ConfigError::InvalidFetchUrl {
                id: id.to_string(),
                url,
            });
        }
        Ok(url)
    }

    fn http_client(&self, kind: DataSourceKind, fetch: &FetchInput) -> HttpClientConfiguration {
        HttpClientConfiguration {
            mtls: fetch.mtls.as_ref().map(|m| MtlsConfiguration {
                key: m.key.resolve(),
                cert: m.cert.resolve(),
                insecure_skip_verify: m.insecure_skip_verify,
            }),
            proxy_url: if kind.uses_http_proxy() {
                fetch.http_proxy_url.as_ref().and_then(ConfigValue::lookup)
            } else {
                None
            },
        }
    }

    fn descriptor(
        &self,
        config: &EngineConfiguration,
        input: &DataSourceInput,
        server_url: &str,
    ) -> Result<DataSourceConfiguration> {
        let id = input.id.as_str();
        let missing = |block: &str| ConfigError::BadCustomConfig {
            id: id.to_string(),
            reason: format!("kind {} requires a `{block}` block", input.kind),
        };

        let mut ds = DataSourceConfiguration::new(id, input.kind);
        ds.root_nodes = input.root_nodes.clone();
        ds.child_nodes = input.child_nodes.clone();
        ds.request_timeout_secs = input.request_timeout_secs;

        match input.kind {
            DataSourceKind::Graphql => {
                let gql = input
                    .custom_graphql
                    .as_ref()
                    .ok_or_else(|| missing("custom_graphql"))?;
                let custom = GraphqlConfiguration {
                    fetch: HttpFetchConfiguration {
                        url: self.fetch_url(id, &gql.fetch, server_url)?,
                        method: gql.fetch.method.clone().unwrap_or_else(|| "POST".to_string()),
                        header: resolve_header(&gql.fetch.header),
                    },
                    upstream_schema: config.interned(id, &gql.upstream_schema)?,
                };
                ds.http = self.http_client(input.kind, &gql.fetch);
                Ok(ds.with_custom(&custom))
            }
            DataSourceKind::Rest => {
                let rest = input
                    .custom_rest
                    .as_ref()
                    .ok_or_else(|| missing("custom_rest"))?;
                let custom = RestConfiguration {
                    fetch: RestFetchConfiguration {
                        url: self.fetch_url(id, &rest.fetch, server_url)?,
                        method: rest.fetch.method.clone().unwrap_or_else(|| "GET".to_string()),
                        header: resolve_header(&rest.fetch.header),
                        query: rest.fetch.query.clone(),
                        body: rest.fetch.body.resolve(),
                        url_encode_body: rest.fetch.url_encode_body,
                    },
                    status_code_type_mappings: rest.status_code_type_mappings.clone(),
                    default_type_name: rest.default_type_name.clone(),
                };
                ds.http = self.http_client(input.kind, &rest.fetch);
                Ok(ds.with_custom(&custom))
            }
            DataSourceKind::Static => {
                let data = input
                    .custom_static
                    .as_ref()
                    .map(|s| s.data.resolve())
                    .unwrap_or_default();
                Ok(ds.with_custom(&StaticConfiguration { data }))
            }
            kind => {
                let db = input
                    .custom_database
                    .as_ref()
                    .ok_or_else(|| missing("custom_database"))?;
                let database_url = db.database_url.resolve();
                let prisma_schema = config.interned(id, &db.prisma_schema)?;
                let custom = DatabaseConfiguration {
                    prisma_schema: add_datasource_header(&prisma_schema, &database_url, kind),
                    graphql_schema: config.interned(id, &db.graphql_schema)?,
                    database_url,
                    close_timeout_seconds: match db.close_timeout_seconds {
                        0 => DEFAULT_CLOSE_TIMEOUT_SECONDS,
                        n => n,
                    },
                    json_type_fields: db.json_type_fields.clone(),
                    json_input_variables: db.json_input_variables.clone(),
                };
                Ok(ds.with_custom(&custom))
            }
        }
    }
}

fn resolve_header(header: &BTreeMap<String, Vec<ConfigValue>>) -> BTreeMap<String, Vec<String>> {
    header
        .iter()
        .map(|(name, values)| (name.clone(), values.iter().map(ConfigValue::resolve).collect()))
        .collect()
}
