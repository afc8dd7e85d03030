#![forbid(unsafe_code)]
//! fieldgate-core: shared types for the gateway planning layer.
//!
//! - `ast`: parsed client operations and the schema they run against
//! - `binding`: positional variable bindings and their renderers
//! - `template`: `$$N$$` request templates rendered per request
//! - `config`, `error`, `hash`, `id`: ambient plumbing
//!
//! No async runtime or IO lives here.

pub mod ast;
pub mod binding;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod template;

pub use error::{Error, RenderError, Result};
