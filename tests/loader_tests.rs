//! Loading declarative configuration documents into compiled plans.

use std::io::Write;

use fieldgate_core::ast::{leaf, Field, FieldDefinition, Operation, Schema, TypeRef, Value};
use fieldgate_planner::datasource::{
    DataSourceConfiguration, DataSourceKind, DatabaseConfiguration, GraphqlConfiguration,
    RestConfiguration,
};
use fieldgate_planner::error::Result as ConfigResult;
use fieldgate_planner::registry::{DefaultFactoryResolver, FactoryResolver, PlannerFactory};
use fieldgate_planner::{ConfigError, EngineConfiguration, Loader};
use serde_json::Value as Json;

const DOCUMENT: &str = r#"
default_flush_interval: 500
string_storage:
  users_schema: "model users { id Int @id }"
  users_gql: "type Query { findManyusers: [users] }"
  weather_sdl: "type Query { forecast(city: String!): Forecast }"
field_configurations:
  - type_name: Query
    field_name: me
    path: [currentUser]
datasource_configurations:
  - id: users
    kind: MYSQL
    root_nodes: [ { type_name: Query, field_names: [findManyusers] } ]
    child_nodes: [ { type_name: users, field_names: [id] } ]
    custom_database:
      database_url: "mysql://root@localhost/app"
      prisma_schema: { key: users_schema }
      graphql_schema: { key: users_gql }
      close_timeout_seconds: 5
  - id: weather
    kind: GRAPHQL
    root_nodes: [ { type_name: Query, field_names: [forecast, me] } ]
    child_nodes: [ { type_name: Forecast, field_names: [high] }, { type_name: User, field_names: [name] } ]
    custom_graphql:
      fetch:
        url: "WG_SERVER_URL-"
        path: "/internal/weather"
        header:
          X-Api-Key: [ { env: FIELDGATE_TEST_WEATHER_KEY_UNSET, default: "dev-key" } ]
      upstream_schema: { key: weather_sdl }
  - id: countries
    kind: REST
    request_timeout_secs: 3
    root_nodes: [ { type_name: Query, field_names: [country] } ]
    child_nodes: [ { type_name: Country, field_names: [name] } ]
    custom_rest:
      fetch:
        base_url: "https://countries.example/"
        path: "/v2/{{ .arguments.code }}"
        http_proxy_url: ""
      status_code_type_mappings:
        - { status_code: 404, type_name: CountryNotFound, inject_status_code_into_body: true }
  - id: motd
    kind: STATIC
    root_nodes: [ { type_name: Query, field_names: [motd] } ]
    custom_static:
      data: "\"hello\""
"#;

fn schema() -> Schema {
    Schema::default()
        .with_type(
            "Query",
            vec![
                FieldDefinition::new("findManyusers", TypeRef::list(TypeRef::named("users"))),
                FieldDefinition::new("forecast", TypeRef::named("Forecast"))
                    .arg("city", TypeRef::non_null(TypeRef::named("String"))),
                FieldDefinition::new("me", TypeRef::named("User")),
                FieldDefinition::new("country", TypeRef::named("Country"))
                    .arg("code", TypeRef::non_null(TypeRef::named("String"))),
                FieldDefinition::new("motd", TypeRef::named("String")),
            ],
        )
        .with_type("users", vec![FieldDefinition::new("id", TypeRef::named("Int"))])
        .with_type("Forecast", vec![FieldDefinition::new("high", TypeRef::named("Float"))])
        .with_type("User", vec![FieldDefinition::new("name", TypeRef::named("String"))])
        .with_type("Country", vec![FieldDefinition::new("name", TypeRef::named("String"))])
}

fn load(document: &str) -> ConfigResult<fieldgate_planner::CompiledPlan> {
    let config = EngineConfiguration::from_yaml_str(document)?;
    Loader::with_defaults()?.load(&config, schema(), "http://localhost:9992")
}

#[test]
fn every_kind_loads_from_one_document() {
    let plan = load(DOCUMENT).unwrap();
    assert_eq!(plan.default_flush_interval(), 500);
    let factories: Vec<_> = plan.data_sources().iter().map(|d| d.factory).collect();
    assert_eq!(
        factories,
        [
            PlannerFactory::Database,
            PlannerFactory::Graphql,
            PlannerFactory::Rest,
            PlannerFactory::Static
        ]
    );

    let db: DatabaseConfiguration = plan.data_sources()[0].config.custom_config().unwrap();
    assert_eq!(db.close_timeout_seconds, 5);
    assert!(db.prisma_schema.contains("provider = \"mysql\""));
    assert!(db.prisma_schema.ends_with("model users { id Int @id }"));

    let gql: GraphqlConfiguration = plan.data_sources()[1].config.custom_config().unwrap();
    assert_eq!(gql.fetch.url, "http://localhost:9992/internal/weather");
    assert_eq!(gql.fetch.method, "POST");
    assert_eq!(gql.fetch.header["X-Api-Key"], ["dev-key"]);
    assert!(gql.upstream_schema.starts_with("type Query"));

    let countries = &plan.data_sources()[2].config;
    let rest: RestConfiguration = countries.custom_config().unwrap();
    assert_eq!(rest.fetch.url, "https://countries.example/v2/{{ .arguments.code }}");
    assert_eq!(rest.fetch.method, "GET");
    assert_eq!(rest.status_code_type_mappings[0].type_name, "CountryNotFound");
    assert_eq!(countries.request_timeout_secs, 3);
    assert_eq!(countries.http.proxy_url.as_deref(), Some(""));
}

#[test]
fn loaded_plan_routes_fields_to_their_owners() {
    let plan = load(DOCUMENT).unwrap();
    let op = Operation::query(vec![
        Field::new("country")
            .arg("code", Value::string("NZ"))
            .select(vec![leaf("name")])
            .into(),
        leaf("motd"),
        Field::new("me").select(vec![leaf("name")]).into(),
    ]);
    let planned = plan.plan_operation(&op);
    assert!(planned.is_complete(), "{:?}", planned.errors);

    let country: Json = serde_json::from_str(planned.fetch_for_path(&["country"]).unwrap().fetch.input()).unwrap();
    assert_eq!(country["url"], "https://countries.example/v2/NZ");
    assert_eq!(planned.fetch_for_path(&["motd"]).unwrap().fetch.input(), "\"hello\"");

    let me = &planned.fetch_for_path(&["me"]).unwrap().fetch;
    assert_eq!(me.root_field, "currentUser");
    assert_eq!(me.downstream_alias.as_deref(), Some("me"));
    let body: Json = serde_json::from_str(me.input()).unwrap();
    assert_eq!(body["body"]["query"], "{me: currentUser{name}}");
}

#[test]
fn duplicate_root_fields_across_sources_fail_the_load() {
    let document = DOCUMENT.replace("field_names: [motd]", "field_names: [motd, country]");
    let err = load(&document).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::DuplicateRootField { ref field_name, ref first, ref second, .. }
            if field_name == "country" && first == "countries" && second == "motd"
    ));
}

#[test]
fn missing_custom_block_is_rejected() {
    let document = r#"
datasource_configurations:
  - id: orphan
    kind: REST
    root_nodes: [ { type_name: Query, field_names: [country] } ]
"#;
    assert!(matches!(load(document).unwrap_err(), ConfigError::BadCustomConfig { ref id, .. } if id == "orphan"));
}

#[test]
fn custom_resolvers_take_precedence() {
    let static_graphql = |ds: &DataSourceConfiguration| -> ConfigResult<Option<PlannerFactory>> {
        Ok((ds.id == "weather").then_some(PlannerFactory::Graphql))
    };
    let reject_mysql = |ds: &DataSourceConfiguration| -> ConfigResult<Option<PlannerFactory>> {
        if ds.kind == DataSourceKind::Mysql {
            return Err(ConfigError::BadCustomConfig {
                id: ds.id.clone(),
                reason: "mysql disabled".into(),
            });
        }
        Ok(None)
    };
    let resolvers: Vec<Box<dyn FactoryResolver>> = vec![
        Box::new(static_graphql),
        Box::new(reject_mysql),
        Box::new(DefaultFactoryResolver),
    ];
    let config = EngineConfiguration::from_yaml_str(DOCUMENT).unwrap();
    let err = Loader::new(resolvers)
        .unwrap()
        .load(&config, schema(), "")
        .unwrap_err();
    assert!(matches!(err, ConfigError::BadCustomConfig { ref reason, .. } if reason == "mysql disabled"));
}

#[test]
fn documents_load_from_yaml_and_json_files() {
    let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    yaml.write_all(DOCUMENT.as_bytes()).unwrap();
    let from_yaml = EngineConfiguration::from_path(yaml.path()).unwrap();
    assert_eq!(from_yaml.datasource_configurations.len(), 4);

    let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    json.write_all(serde_json::to_string(&from_yaml).unwrap().as_bytes())
        .unwrap();
    let from_json = EngineConfiguration::from_path(json.path()).unwrap();
    assert_eq!(from_json, from_yaml);

    assert!(matches!(
        EngineConfiguration::from_yaml_str("datasource_configurations: 12"),
        Err(ConfigError::Parse(_))
    ));
}
