//! Descriptor → compiler factory resolution.

use crate::compiler::{Compiler, QueryCompiler, RestCompiler, StaticCompiler, VariableStrategy};
use crate::datasource::{DataSourceConfiguration, DataSourceKind};
use crate::error::{ConfigError, Result};

/// Builds compiler instances for one data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerFactory {
    Graphql,
    Rest,
    Static,
    Database,
}

impl PlannerFactory {
    /// A fresh compiler configured from the descriptor's custom settings.
    pub fn create(&self, ds: &DataSourceConfiguration) -> Result<Compiler> {
        Ok(match self {
            PlannerFactory::Graphql => Compiler::Query(QueryCompiler::new(
                VariableStrategy::Forward(ds.custom_config()?),
            )),
            PlannerFactory::Database => Compiler::Query(QueryCompiler::new(
                VariableStrategy::Inline(ds.custom_config()?),
            )),
            PlannerFactory::Rest => Compiler::Rest(RestCompiler::new(ds.custom_config()?)?),
            PlannerFactory::Static => Compiler::Static(StaticCompiler::new(ds.custom_config()?)),
        })
    }
}

/// Explicit kind → factory table.
pub const KIND_FACTORIES: [(DataSourceKind, PlannerFactory); 9] = [
    (DataSourceKind::Graphql, PlannerFactory::Graphql),
    (DataSourceKind::Rest, PlannerFactory::Rest),
    (DataSourceKind::Static, PlannerFactory::Static),
    (DataSourceKind::Postgresql, PlannerFactory::Database),
    (DataSourceKind::Mysql, PlannerFactory::Database),
    (DataSourceKind::Sqlserver, PlannerFactory::Database),
    (DataSourceKind::Mongodb, PlannerFactory::Database),
    (DataSourceKind::Sqlite, PlannerFactory::Database),
    (DataSourceKind::Prisma, PlannerFactory::Database),
];

pub trait FactoryResolver: Send + Sync {
    /// `Ok(None)` passes the descriptor on to the next resolver.
    fn resolve(&self, ds: &DataSourceConfiguration) -> Result<Option<PlannerFactory>>;
}

impl<F> FactoryResolver for F
where
    F: Fn(&DataSourceConfiguration) -> Result<Option<PlannerFactory>> + Send + Sync,
{
    fn resolve(&self, ds: &DataSourceConfiguration) -> Result<Option<PlannerFactory>> {
        self(ds)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactoryResolver;

impl FactoryResolver for DefaultFactoryResolver {
    fn resolve(&self, ds: &DataSourceConfiguration) -> Result<Option<PlannerFactory>> {
        Ok(KIND_FACTORIES
            .iter()
            .find(|(kind, _)| *kind == ds.kind)
            .map(|(_, factory)| *factory))
    }
}

/// First resolver to return a factory wins.
pub fn resolve_factory(
    resolvers: &[Box<dyn FactoryResolver>],
    ds: &DataSourceConfiguration,
) -> Result<PlannerFactory> {
    for resolver in resolvers {
        if let Some(factory) = resolver.resolve(ds)? {
            return Ok(factory);
        }
    }
    Err(ConfigError::UnresolvedKind {
        id: ds.id.clone(),
        kind: ds.kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_factory() {
        for kind in DataSourceKind::ALL {
            let ds = DataSourceConfiguration::new("x", kind);
            let f = DefaultFactoryResolver.resolve(&ds).unwrap();
            assert!(f.is_some(), "{kind} has no factory");
            assert_eq!(f == Some(PlannerFactory::Database), kind.is_database());
        }
    }

    #[test]
    fn first_match_wins_and_none_falls_through() {
        let skip_all = |_: &DataSourceConfiguration| -> Result<Option<PlannerFactory>> { Ok(None) };
        let static_for_rest = |ds: &DataSourceConfiguration| -> Result<Option<PlannerFactory>> {
            Ok((ds.kind == DataSourceKind::Rest).then_some(PlannerFactory::Static))
        };
        let resolvers: Vec<Box<dyn FactoryResolver>> = vec![
            Box::new(skip_all),
            Box::new(static_for_rest),
            Box::new(DefaultFactoryResolver),
        ];
        let rest = DataSourceConfiguration::new("r", DataSourceKind::Rest);
        assert_eq!(resolve_factory(&resolvers, &rest).unwrap(), PlannerFactory::Static);
        let gql = DataSourceConfiguration::new("g", DataSourceKind::Graphql);
        assert_eq!(resolve_factory(&resolvers, &gql).unwrap(), PlannerFactory::Graphql);
    }

    #[test]
    fn unresolved_descriptor_is_a_config_error() {
        let resolvers: Vec<Box<dyn FactoryResolver>> = Vec::new();
        let ds = DataSourceConfiguration::new("lonely", DataSourceKind::Mongodb);
        let err = resolve_factory(&resolvers, &ds).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedKind { ref id, kind: DataSourceKind::Mongodb } if id == "lonely"));
    }

    #[test]
    fn factory_reports_bad_custom_config() {
        let ds = DataSourceConfiguration::new("db", DataSourceKind::Sqlite);
        let err = PlannerFactory::Database.create(&ds).unwrap_err();
        assert!(matches!(err, ConfigError::BadCustomConfig { .. }));
    }
}
