//! Convenient re-exports for downstream crates.

pub use crate::ast::{
    Argument, Field, FieldDefinition, InlineFragment, Operation, OperationKind, Schema, Selection,
    TypeRef, Value,
};
pub use crate::binding::{Binding, Renderer, RequestContext, VariableSource, VariableTable};
pub use crate::config::{ConfigValue, EngineMode, GatewayConfig, RetryMode};
pub use crate::error::{Error, RenderError, Result};
pub use crate::hash::Hash256;
pub use crate::id::{FetchId, SourceIndex};
pub use crate::template::RequestTemplate;
