use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use fieldgate_core::ast::leaf;
use fieldgate_core::prelude::*;
use fieldgate_planner::datasource::{
    DataSourceConfiguration, DataSourceKind, DatabaseConfiguration, FieldConfigurations,
};
use fieldgate_planner::plan::{CompiledPlan, PlannedDataSource};
use fieldgate_planner::registry::PlannerFactory;
use serde_json::json;

fn make_plan() -> CompiledPlan {
    let schema = Schema::default()
        .with_type(
            "Mutation",
            vec![FieldDefinition::new("createOneusers", TypeRef::named("users"))
                .arg("data", TypeRef::named("usersCreateInput"))],
        )
        .with_type(
            "users",
            vec![
                FieldDefinition::new("id", TypeRef::named("Int")),
                FieldDefinition::new("provider", TypeRef::named("String")),
            ],
        );
    let db = PlannedDataSource {
        config: DataSourceConfiguration::new("db", DataSourceKind::Postgresql)
            .with_root("Mutation", &["createOneusers"])
            .with_child("users", &["id", "provider"])
            .with_custom(&DatabaseConfiguration {
                prisma_schema: "model users { id Int @id }".into(),
                ..DatabaseConfiguration::default()
            }),
        factory: PlannerFactory::Database,
    };
    CompiledPlan::new(vec![db], FieldConfigurations::default(), 0, schema)
        .expect("bench plan")
}

fn make_operation(fields: usize) -> Operation {
    let data = Value::object((0..fields).map(|i| (format!("f{i}"), Value::variable(format!("v{}", i % 8)))));
    let mut op = Operation::mutation(vec![Field::new("createOneusers")
        .arg("data", data)
        .select(vec![leaf("id"), leaf("provider")])
        .into()]);
    for i in 0..8 {
        op = op.variable(format!("v{i}"), TypeRef::named("String"));
    }
    op
}

fn bench_compile(c: &mut Criterion) {
    let operation = make_operation(64);
    // A fresh plan per iteration so the plan cache never answers.
    c.bench_function("compile_create_one", |b| {
        b.iter_batched(
            make_plan,
            |plan| {
                let planned = plan.plan_operation(&operation);
                assert!(planned.is_complete());
            },
            BatchSize::SmallInput,
        )
    });

    let plan = make_plan();
    c.bench_function("plan_cache_hit", |b| {
        b.iter(|| plan.plan_operation(&operation));
    });
}

fn bench_render(c: &mut Criterion) {
    let plan = make_plan();
    let planned = plan.plan_operation(&make_operation(64));
    let template = &planned.fetches[0].fetch.template;
    let ctx = RequestContext::with_variables(json!({
        "v0": "a", "v1": "b\"", "v2": "c", "v3": "d",
        "v4": "e", "v5": "f", "v6": "g", "v7": "h",
    }));
    c.bench_function("render_template", |b| {
        b.iter(|| template.render(&ctx).expect("render"));
    });
}

criterion_group!(planning, bench_compile, bench_render);
criterion_main!(planning);
