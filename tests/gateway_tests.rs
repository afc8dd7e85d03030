//! End-to-end execution through the gateway facade.

use fieldgate::Gateway;
use fieldgate_core::ast::{leaf, FieldDefinition, Operation, Schema, TypeRef};
use fieldgate_core::config::GatewayConfig;
use fieldgate_planner::{CompileError, EngineConfiguration};
use serde_json::json;

const DOCUMENT: &str = r#"
datasource_configurations:
  - id: motd
    kind: STATIC
    root_nodes: [ { type_name: Query, field_names: [motd] } ]
    custom_static:
      data: "\"hello\""
"#;

fn schema() -> Schema {
    Schema::default().with_type(
        "Query",
        vec![
            FieldDefinition::new("motd", TypeRef::named("String")),
            FieldDefinition::new("weather", TypeRef::named("String")),
        ],
    )
}

fn gateway() -> Gateway {
    let config = EngineConfiguration::from_yaml_str(DOCUMENT).unwrap();
    Gateway::new(GatewayConfig::default(), &config, schema()).unwrap()
}

#[tokio::test]
async fn unplanned_root_fields_come_back_as_errors() {
    let gateway = gateway();
    let op = Operation::query(vec![leaf("motd"), leaf("weather")]);
    let execution = gateway.execute(&op, json!({})).await.unwrap();

    assert_eq!(execution.outcomes.len(), 1);
    assert_eq!(execution.outcomes[0].path, ["motd"]);
    let body = execution.outcomes[0].responses[0].as_ref().unwrap();
    assert_eq!(&body[..], b"\"hello\"");

    let error = execution.error_for_path(&["weather"]).expect("weather error");
    assert_eq!(
        error.error,
        CompileError::UnownedField {
            type_name: "Query".into(),
            field_name: "weather".into()
        }
    );
    assert!(!execution.is_ok());
    gateway.shutdown().await;
}

#[tokio::test]
async fn fully_planned_operations_succeed() {
    let gateway = gateway();
    let execution = gateway
        .execute(&Operation::query(vec![leaf("motd")]), json!({}))
        .await
        .unwrap();
    assert!(execution.is_ok());
    assert!(execution.errors.is_empty());
    gateway.shutdown().await;
}

#[tokio::test]
async fn invalid_settings_are_rejected_before_loading() {
    let config = EngineConfiguration::from_yaml_str(DOCUMENT).unwrap();
    let settings = GatewayConfig {
        fetch_deadline_ms: 0,
        ..GatewayConfig::default()
    };
    let err = Gateway::new(settings, &config, schema()).err().expect("rejected");
    assert!(matches!(err, fieldgate::GatewayError::Settings(_)), "{err}");
}
