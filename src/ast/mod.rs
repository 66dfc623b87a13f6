//! AST module for the Glyph expansion engine
//!
//! Code is data: every program fragment is a tree of [`AstNode`]s stored in an
//! append-only [`AstArena`] and addressed by [`NodeId`]. Nodes are immutable
//! once pushed; every "edit" appends new nodes and shares unchanged subtrees
//! by id. This keeps repeated rewriting free of aliasing hazards and lets
//! structural comparison run without recursion.

// ============================================================================
// IMPORTS
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod builder;
pub mod pretty;

pub use builder::CallBuilder;

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// Stable index of a node inside an [`AstArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Returns the raw arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a compilation unit (e.g. `Math.Ops`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(Arc<str>);

impl UnitId {
    pub fn new(name: impl AsRef<str>) -> Self {
        UnitId(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(name: &str) -> Self {
        UnitId::new(name)
    }
}

/// Hygiene identifier: the unit that performed a capture plus the
/// generation counter handed out at that capture site.
///
/// # Examples
///
/// ```rust
/// use glyph::ast::{ContextTag, UnitId};
/// let tag = ContextTag::new(UnitId::new("Math"), 3);
/// assert_eq!(tag.to_string(), "Math#3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextTag {
    pub unit: UnitId,
    pub generation: u64,
}

impl ContextTag {
    pub fn new(unit: UnitId, generation: u64) -> Self {
        Self { unit, generation }
    }
}

impl fmt::Display for ContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.unit, self.generation)
    }
}

/// Literal values carried by [`AstNode::Literal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Metadata recorded on every call node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallMeta {
    /// Source line of the call (0 when unknown).
    pub line: u32,
    /// Source position (top-level form ordinal) used for define-before-use.
    /// `None` means "the position of the enclosing top-level form".
    pub position: Option<u32>,
    /// Hygiene tag, only set on directives produced by a capture.
    pub context: Option<ContextTag>,
}

impl CallMeta {
    pub fn at_line(line: u32) -> Self {
        Self {
            line,
            ..Self::default()
        }
    }
}

/// The homoiconic node model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// A symbolic constant such as `:ok` or a module name such as `Math.Ops`.
    Atom(String),
    Literal(Literal),
    /// A variable reference. `context == None` means the variable belongs to
    /// the scope that wrote it (hand-written or unhygienic).
    Variable {
        name: String,
        context: Option<ContextTag>,
    },
    Call {
        target: String,
        arity: usize,
        meta: CallMeta,
        args: Vec<NodeId>,
    },
}

impl AstNode {
    /// Returns the call target when this node is a call.
    pub fn call_target(&self) -> Option<&str> {
        match self {
            AstNode::Call { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Returns the child ids of a call, or an empty slice for leaves.
    pub fn children(&self) -> &[NodeId] {
        match self {
            AstNode::Call { args, .. } => args,
            _ => &[],
        }
    }
}

/// Append-only node storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AstArena {
    nodes: Vec<AstNode>,
}

/// A detached subtree that owns its nodes, used to carry template bodies
/// between arenas (and therefore between units).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    arena: AstArena,
    root: NodeId,
}

// ============================================================================
// PUBLIC API IMPLEMENTATION
// ============================================================================

impl AstArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node and returns its id.
    pub fn push(&mut self, node: AstNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Returns the node stored under `id`.
    ///
    /// Ids are only ever produced by this arena, so lookups cannot miss.
    pub fn get(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.index()]
    }

    pub fn atom(&mut self, name: impl Into<String>) -> NodeId {
        self.push(AstNode::Atom(name.into()))
    }

    pub fn literal(&mut self, value: Literal) -> NodeId {
        self.push(AstNode::Literal(value))
    }

    pub fn variable(&mut self, name: impl Into<String>, context: Option<ContextTag>) -> NodeId {
        self.push(AstNode::Variable {
            name: name.into(),
            context,
        })
    }

    /// Pushes a call node; the arity is derived from `args`.
    pub fn call(&mut self, target: impl Into<String>, meta: CallMeta, args: Vec<NodeId>) -> NodeId {
        self.push(AstNode::Call {
            target: target.into(),
            arity: args.len(),
            meta,
            args,
        })
    }

    /// Returns `Some((target, args))` when `id` is a call.
    pub fn as_call(&self, id: NodeId) -> Option<(&str, &[NodeId])> {
        match self.get(id) {
            AstNode::Call { target, args, .. } => Some((target.as_str(), args.as_slice())),
            _ => None,
        }
    }

    /// True when `id` is a call to `target` with exactly `arity` arguments.
    pub fn is_call_to(&self, id: NodeId, target: &str, arity: usize) -> bool {
        matches!(self.as_call(id), Some((t, args)) if t == target && args.len() == arity)
    }

    /// Returns the variable name and tag when `id` is a variable.
    pub fn as_variable(&self, id: NodeId) -> Option<(&str, Option<&ContextTag>)> {
        match self.get(id) {
            AstNode::Variable { name, context } => Some((name.as_str(), context.as_ref())),
            _ => None,
        }
    }

    /// Source line of a node: the call's line, or 0 for leaves.
    pub fn line_of(&self, id: NodeId) -> u32 {
        match self.get(id) {
            AstNode::Call { meta, .. } => meta.line,
            _ => 0,
        }
    }

    /// Structural equality of two subtrees in this arena.
    pub fn structurally_eq(&self, a: NodeId, b: NodeId) -> bool {
        structurally_eq_across(self, a, self, b)
    }

    /// Copies a detached fragment into this arena and returns the new root.
    pub fn import(&mut self, fragment: &Fragment) -> NodeId {
        self.copy_subtree(&fragment.arena, fragment.root)
    }

    /// Copies the subtree rooted at `root` in `source` into this arena.
    pub fn copy_subtree(&mut self, source: &AstArena, root: NodeId) -> NodeId {
        match source.get(root) {
            AstNode::Call {
                target,
                arity,
                meta,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|arg| self.copy_subtree(source, *arg))
                    .collect();
                self.push(AstNode::Call {
                    target: target.clone(),
                    arity: *arity,
                    meta: meta.clone(),
                    args,
                })
            }
            leaf => self.push(leaf.clone()),
        }
    }

    /// Renders a subtree as source-like text.
    pub fn pretty(&self, id: NodeId) -> String {
        pretty::render(self, id, false)
    }

    /// Renders a subtree with context tags shown on variables (`v@Unit#2`).
    pub fn pretty_tagged(&self, id: NodeId) -> String {
        pretty::render(self, id, true)
    }
}

impl Fragment {
    /// Detaches the subtree rooted at `root` from `source`.
    pub fn extract(source: &AstArena, root: NodeId) -> Self {
        let mut arena = AstArena::new();
        let root = arena.copy_subtree(source, root);
        Self { arena, root }
    }

    pub fn arena(&self) -> &AstArena {
        &self.arena
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn pretty(&self) -> String {
        self.arena.pretty(self.root)
    }
}

/// Structural equality between subtrees that may live in different arenas.
///
/// Variants, names, literal values, arity, children and context tags must
/// match. Source line and position are location metadata and are ignored.
/// The walk uses an explicit work list so deep trees do not grow the stack.
pub fn structurally_eq_across(left: &AstArena, a: NodeId, right: &AstArena, b: NodeId) -> bool {
    let mut pending = vec![(a, b)];
    while let Some((a, b)) = pending.pop() {
        let same = match (left.get(a), right.get(b)) {
            (AstNode::Atom(x), AstNode::Atom(y)) => x == y,
            (AstNode::Literal(x), AstNode::Literal(y)) => x == y,
            (
                AstNode::Variable { name: n1, context: c1 },
                AstNode::Variable { name: n2, context: c2 },
            ) => n1 == n2 && c1 == c2,
            (
                AstNode::Call {
                    target: t1,
                    arity: a1,
                    meta: m1,
                    args: args1,
                },
                AstNode::Call {
                    target: t2,
                    arity: a2,
                    meta: m2,
                    args: args2,
                },
            ) => {
                if t1 != t2 || a1 != a2 || m1.context != m2.context || args1.len() != args2.len() {
                    false
                } else {
                    pending.extend(args1.iter().copied().zip(args2.iter().copied()));
                    true
                }
            }
            _ => false,
        };
        if !same {
            return false;
        }
    }
    true
}
