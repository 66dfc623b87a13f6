//! # AST Builder Module
//!
//! Small fluent helper for assembling call nodes by hand, used by native
//! macro bodies and tests that would rather not go through the reader.
//!
//! ## Invariants
//! - Never mutates existing nodes; `finish` appends exactly one call node
//! - Arity always equals the number of collected arguments

use crate::ast::{AstArena, CallMeta, ContextTag, Literal, NodeId};

/// Collects the arguments of a call before pushing it.
///
/// # Examples
///
/// ```rust
/// use glyph::ast::{AstArena, CallBuilder, Literal};
/// let mut arena = AstArena::new();
/// let call = CallBuilder::new("print")
///     .literal(&mut arena, Literal::String("X".into()))
///     .finish(&mut arena);
/// assert_eq!(arena.pretty(call), "print(\"X\")");
/// ```
#[derive(Debug, Clone)]
pub struct CallBuilder {
    target: String,
    meta: CallMeta,
    args: Vec<NodeId>,
}

impl CallBuilder {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            meta: CallMeta::default(),
            args: Vec::new(),
        }
    }

    pub fn line(mut self, line: u32) -> Self {
        self.meta.line = line;
        self
    }

    pub fn position(mut self, position: u32) -> Self {
        self.meta.position = Some(position);
        self
    }

    pub fn arg(mut self, id: NodeId) -> Self {
        self.args.push(id);
        self
    }

    pub fn args(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.args.extend(ids);
        self
    }

    pub fn literal(mut self, arena: &mut AstArena, value: Literal) -> Self {
        self.args.push(arena.literal(value));
        self
    }

    pub fn variable(
        mut self,
        arena: &mut AstArena,
        name: &str,
        context: Option<ContextTag>,
    ) -> Self {
        self.args.push(arena.variable(name, context));
        self
    }

    pub fn atom(mut self, arena: &mut AstArena, name: &str) -> Self {
        self.args.push(arena.atom(name));
        self
    }

    pub fn finish(self, arena: &mut AstArena) -> NodeId {
        arena.call(self.target, self.meta, self.args)
    }
}
