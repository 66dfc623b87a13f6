//! # Glyph Macro System
//!
//! Compile-time transformations over the call-syntax tree.
//!
//! ## Core Principles
//!
//! - **Syntactic only**: a macro body receives its arguments as unevaluated
//!   subtrees and returns one replacement subtree.
//! - **Hygienic**: code a template writes carries the template's context
//!   tag; code spliced in from the call site keeps its own. Two variables are
//!   the same binding only when name and tag agree.
//! - **Ordered**: within a unit a macro is visible only after its definition.
//!   A call that does not resolve as a macro is treated as a function call and
//!   checked once the unit is done.
//!
//! ## Layout
//!
//! - [`definition`]: macro definitions and `defmacro` parsing
//! - [`hygiene`]: context tags and the capture-time tagging pass
//! - [`quoting`]: capture, splice, `var!` and the [`MacroCall`] handed to bodies
//! - [`registry`]: per-unit definitions and cross-unit lookup
//! - [`resolve`]: the function-call fallback seam
//! - [`expander`]: traversal, invocation and fixed-point iteration

pub mod definition;
pub mod expander;
pub mod hygiene;
pub mod quoting;
pub mod registry;
pub mod resolve;

pub use definition::{
    is_macro_definition, parse_macro_definition, MacroBody, MacroDefinition, MacroFn, MacroTemplate,
    Visibility,
};
pub use expander::{
    ExpansionState, ExpansionStep, Expander, MacroExpansionStep, SPECIAL_FORMS,
};
pub use hygiene::ContextTagger;
pub use quoting::{capture, splice, unhygienic, Bindings, MacroCall};
pub use registry::{Lookup, LookupError, LookupScope, MacroProvenance, MacroRegistry};
pub use resolve::{FunctionQuery, FunctionResolver, LocalFunctions, StandardResolver};
