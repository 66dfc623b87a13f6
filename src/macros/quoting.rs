//! Capture, splice and the explicit hygiene override.
//!
//! - **Capture** turns a span of syntax into data and stamps it with a
//!   fresh context tag (see [`crate::macros::hygiene`]).
//! - **Splice** replaces `unquote(name)` placeholders with bound subtrees.
//!   Bound subtrees are inserted by id, verbatim: whatever tags they carry
//!   (usually the call site's) survive, and the template's own nodes keep
//!   the template's tag.
//! - **`var!`** rewrites one variable to the tag of the invocation
//!   environment, so a body can deliberately bind into its caller.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{AstArena, AstNode, ContextTag, NodeId, UnitId};
use crate::diagnostics::CallSite;
use crate::environment::Environment;
use crate::macros::hygiene::ContextTagger;
use crate::syntax::parse_expr;
use crate::{expand_err, ExpansionError};

pub const QUOTE: &str = "quote";
pub const UNQUOTE: &str = "unquote";
pub const UNHYGIENIC: &str = "var!";
pub const BLOCK: &str = "__block__";

/// Placeholder name to the subtree it stands for.
pub type Bindings = HashMap<String, NodeId>;

/// Tags `root` with a fresh context for `unit`; returns the new root and the tag used.
pub fn capture(
    arena: &mut AstArena,
    tagger: &mut ContextTagger,
    root: NodeId,
    unit: &UnitId,
) -> (NodeId, ContextTag) {
    let tag = tagger.fresh(unit);
    let root = tagger.tag_subtree(arena, root, &tag);
    (root, tag)
}

/// Substitutes every `unquote(name)` in `template` with `bindings[name]`.
///
/// Nested `quote` forms belong to a later capture and are left untouched.
pub fn splice(
    arena: &mut AstArena,
    template: NodeId,
    bindings: &Bindings,
    site: &CallSite,
) -> Result<NodeId, ExpansionError> {
    let AstNode::Call {
        target, meta, args, ..
    } = arena.get(template).clone()
    else {
        return Ok(template);
    };

    if target == UNQUOTE {
        let [placeholder] = args.as_slice() else {
            return Err(expand_err!(
                InvalidSplice,
                site.clone(),
                "`unquote` takes exactly one placeholder, found {}",
                args.len()
            ));
        };
        let Some((name, _)) = arena.as_variable(*placeholder) else {
            return Err(expand_err!(
                InvalidSplice,
                site.clone(),
                "`unquote` expects a placeholder name, found `{}`",
                arena.pretty(*placeholder)
            ));
        };
        return bindings.get(name).copied().ok_or_else(|| {
            expand_err!(
                InvalidSplice,
                site.clone(),
                "no binding for placeholder `{}`",
                name
            )
        });
    }
    if target == QUOTE {
        return Ok(template);
    }

    let mut spliced = Vec::with_capacity(args.len());
    for arg in &args {
        spliced.push(splice(arena, *arg, bindings, site)?);
    }
    if spliced == args {
        return Ok(template);
    }
    Ok(arena.call(target, meta, spliced))
}

/// Retags a variable with the invocation environment's context.
pub fn unhygienic(
    arena: &mut AstArena,
    node: NodeId,
    env: &Environment,
    site: &CallSite,
) -> Result<NodeId, ExpansionError> {
    let Some((name, _)) = arena.as_variable(node) else {
        return Err(expand_err!(
            InvalidSplice,
            site.clone(),
            "`var!` expects a variable, found `{}`",
            arena.pretty(node)
        ));
    };
    let name = name.to_string();
    Ok(arena.variable(name, env.context().cloned()))
}

/// What a native macro body sees while it runs.
///
/// Argument ids point at the raw, unexpanded subtrees of the invocation.
pub struct MacroCall<'a> {
    arena: &'a mut AstArena,
    tagger: &'a mut ContextTagger,
    env: &'a Environment,
    owner: &'a UnitId,
    args: Vec<NodeId>,
    site: CallSite,
    last_context: Option<ContextTag>,
}

impl<'a> MacroCall<'a> {
    pub(crate) fn new(
        arena: &'a mut AstArena,
        tagger: &'a mut ContextTagger,
        env: &'a Environment,
        owner: &'a UnitId,
        args: Vec<NodeId>,
        site: CallSite,
    ) -> Self {
        Self {
            arena,
            tagger,
            env,
            owner,
            args,
            site,
            last_context: None,
        }
    }

    pub fn args(&self) -> &[NodeId] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Result<NodeId, ExpansionError> {
        self.args.get(index).copied().ok_or_else(|| {
            self.fail(format!("argument {} is missing", index))
        })
    }

    /// Read-only view of the invocation environment.
    pub fn env(&self) -> &Environment {
        self.env
    }

    pub fn site(&self) -> &CallSite {
        &self.site
    }

    pub fn arena(&self) -> &AstArena {
        &*self.arena
    }

    pub fn arena_mut(&mut self) -> &mut AstArena {
        &mut *self.arena
    }

    /// Captures `root` as code written by the macro's owning unit.
    pub fn capture(&mut self, root: NodeId) -> NodeId {
        let (root, tag) = capture(self.arena, self.tagger, root, self.owner);
        self.last_context = Some(tag);
        root
    }

    pub fn splice(&mut self, template: NodeId, bindings: &Bindings) -> Result<NodeId, ExpansionError> {
        splice(self.arena, template, bindings, &self.site)
    }

    /// Capture followed by splice, the usual way to instantiate a template.
    pub fn capture_and_splice(
        &mut self,
        template: NodeId,
        bindings: &Bindings,
    ) -> Result<NodeId, ExpansionError> {
        let captured = self.capture(template);
        self.splice(captured, bindings)
    }

    pub fn unhygienic(&mut self, node: NodeId) -> Result<NodeId, ExpansionError> {
        unhygienic(self.arena, node, self.env, &self.site)
    }

    /// Reads `source` as one expression and copies it into the arena, untagged.
    pub fn parse_fragment(&mut self, source: &str) -> Result<NodeId, ExpansionError> {
        let fragment = parse_expr(source, Arc::clone(&self.site.file))?;
        Ok(self.arena.import(&fragment))
    }

    /// A failure reported at the invocation (relocated like any other error).
    pub fn fail(&self, message: impl Into<String>) -> ExpansionError {
        ExpansionError::MacroFailure {
            site: self.site.clone(),
            message: message.into(),
            pinned: false,
        }
    }

    /// A failure pinned to an explicit line; it is never relocated.
    pub fn fail_at(&self, line: u32, message: impl Into<String>) -> ExpansionError {
        ExpansionError::MacroFailure {
            site: CallSite {
                line,
                ..self.site.clone()
            },
            message: message.into(),
            pinned: true,
        }
    }

    pub(crate) fn last_context(&self) -> Option<&ContextTag> {
        self.last_context.as_ref()
    }
}
