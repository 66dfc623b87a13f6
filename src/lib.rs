//! Glyph: a hygienic macro-expansion engine for call-syntax trees.
//!
//! Pipeline per unit: read ([`syntax`]) → expand ([`macros`], driven by
//! [`unit::expand_unit`]) → hand the expanded forms to a backend. A
//! [`engine::Session`] expands many units and shares their interfaces.

pub use crate::diagnostics::{CallSite, DiagnosticRecord, ErrorKind, ExpansionError, Warning, WarningKind};

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod environment;
pub mod macros;
pub mod syntax;
pub mod unit;

pub use crate::ast::{AstArena, AstNode, ContextTag, Fragment, NodeId, UnitId};
pub use crate::config::{AmbiguityPolicy, ExpanderConfig};
pub use crate::engine::Session;
pub use crate::environment::{Environment, EnvironmentInfo};
pub use crate::unit::{Catalog, CompilationUnit, ExpandedUnit, UnitInterface};
