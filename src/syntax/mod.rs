//! Reader for Glyph's call syntax.
//!
//! The expansion engine itself works on trees; this module exists so units
//! can be loaded from text and so tests and tooling can write trees the way
//! they are printed.

pub mod parser;

pub use parser::{parse_expr, parse_program};
