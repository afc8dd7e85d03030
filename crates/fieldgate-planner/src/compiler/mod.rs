//! Upstream compilers.
//!
//! One compiler instance turns one root field (and the part of its subtree
//! its data source owns) into a [`CompiledFetch`]. Instances keep walk state
//! and must be reset between compilations; [`Compiler::compile`] does that.

pub mod document;
pub mod query;
pub mod rest;

use fieldgate_core::ast::{Field, OperationKind};
use fieldgate_core::binding::VariableTable;
use fieldgate_core::template::RequestTemplate;

use crate::datasource::StaticConfiguration;
use crate::error::CompileResult;
use crate::walk::{
    walk_root_field, Boundary, Descend, FieldVisit, NestedField, Visitor, WalkContext,
};

pub use query::{QueryCompiler, VariableStrategy};
pub use rest::RestCompiler;

/// A request template with its binding table and fetch metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFetch {
    pub template: RequestTemplate,
    /// Upstream name of the root field.
    pub root_field: String,
    pub operation_kind: OperationKind,
    /// Client field name when the upstream field was renamed.
    pub downstream_alias: Option<String>,
    /// Identical in-flight requests must not be merged.
    pub disallow_single_flight: bool,
}

impl CompiledFetch {
    pub fn input(&self) -> &str {
        self.template.text()
    }

    pub fn variables(&self) -> &VariableTable {
        self.template.variables()
    }
}

/// Static data sources answer with configured data; nothing is compiled.
#[derive(Debug)]
pub struct StaticCompiler {
    data: String,
    root_field: Option<String>,
}

impl StaticCompiler {
    pub fn new(config: StaticConfiguration) -> Self {
        Self {
            data: config.data,
            root_field: None,
        }
    }

    fn finish(&mut self) -> CompiledFetch {
        CompiledFetch {
            template: RequestTemplate::new(self.data.clone(), VariableTable::new()),
            root_field: self.root_field.take().unwrap_or_default(),
            operation_kind: OperationKind::Query,
            downstream_alias: None,
            disallow_single_flight: false,
        }
    }
}

impl Visitor for StaticCompiler {
    fn enter_field(
        &mut self,
        _cx: &WalkContext<'_>,
        visit: &FieldVisit<'_>,
    ) -> CompileResult<Descend> {
        if visit.is_root {
            self.root_field = Some(visit.field.name.clone());
        }
        Ok(Descend::Yes)
    }
}

/// Closed set of compilers, one variant per backend family.
#[derive(Debug)]
pub enum Compiler {
    Query(QueryCompiler),
    Rest(RestCompiler),
    Static(StaticCompiler),
}

impl Compiler {
    pub fn reset(&mut self) {
        match self {
            Compiler::Query(c) => c.reset(),
            Compiler::Rest(c) => c.reset(),
            Compiler::Static(c) => c.root_field = None,
        }
    }

    /// Compile `root` (a field of `enclosing_type`).
    ///
    /// Returns the fetch plus the fields handed off to other data sources.
    pub fn compile<'a>(
        &mut self,
        cx: WalkContext<'a>,
        root: &'a Field,
        enclosing_type: &'a str,
        base_path: &[String],
        boundary: &dyn Boundary,
    ) -> CompileResult<(CompiledFetch, Vec<NestedField<'a>>)> {
        self.reset();
        let result = match self {
            Compiler::Query(c) => walk_root_field(cx, root, enclosing_type, base_path, c, boundary)
                .and_then(|nested| Ok((c.finish()?, nested))),
            Compiler::Rest(c) => walk_root_field(cx, root, enclosing_type, base_path, c, boundary)
                .and_then(|nested| Ok((c.finish(&cx)?, nested))),
            Compiler::Static(c) => walk_root_field(cx, root, enclosing_type, base_path, c, boundary)
                .map(|nested| (c.finish(), nested)),
        };
        self.reset();
        result
    }
}
