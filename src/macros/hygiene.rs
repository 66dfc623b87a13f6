//! Context tagging.
//!
//! A capture stamps every untagged variable in the captured span, and every
//! `alias`/`require`/`import` directive, with a fresh [`ContextTag`]. Two
//! kinds of subtree are left alone: `unquote(..)` placeholders, whose
//! contents come from the call site at splice time, and `var!(..)`, the
//! explicit opt-out from hygiene. Nodes that carry a tag already keep it.

use std::collections::HashMap;

use crate::ast::{AstArena, AstNode, CallMeta, ContextTag, NodeId, UnitId};
use crate::macros::quoting::{UNHYGIENIC, UNQUOTE};

/// Directive targets whose calls record the capture's context.
pub const DIRECTIVES: &[&str] = &["alias", "require", "import"];

/// Hands out generation counters per capturing unit.
#[derive(Debug, Clone, Default)]
pub struct ContextTagger {
    generations: HashMap<UnitId, u64>,
}

impl ContextTagger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next tag for `unit`; generations start at 1 and never repeat.
    pub fn fresh(&mut self, unit: &UnitId) -> ContextTag {
        let next = self.generations.entry(unit.clone()).or_insert(0);
        *next += 1;
        ContextTag::new(unit.clone(), *next)
    }

    /// Tags the subtree at `root`, returning the (possibly new) root.
    ///
    /// Unchanged subtrees are shared, so a span with nothing to tag comes back as-is.
    pub fn tag_subtree(&self, arena: &mut AstArena, root: NodeId, tag: &ContextTag) -> NodeId {
        match arena.get(root).clone() {
            AstNode::Variable { name, context: None } => arena.variable(name, Some(tag.clone())),
            AstNode::Call {
                target,
                meta,
                args,
                ..
            } => {
                if target == UNQUOTE || target == UNHYGIENIC {
                    return root;
                }
                let tagged: Vec<NodeId> = args
                    .iter()
                    .map(|arg| self.tag_subtree(arena, *arg, tag))
                    .collect();
                let tag_directive = meta.context.is_none() && DIRECTIVES.contains(&target.as_str());
                if tagged == args && !tag_directive {
                    return root;
                }
                let meta = if tag_directive {
                    CallMeta {
                        context: Some(tag.clone()),
                        ..meta
                    }
                } else {
                    meta
                };
                arena.call(target, meta, tagged)
            }
            _ => root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_expr;

    #[test]
    fn generations_are_per_unit() {
        let mut tagger = ContextTagger::new();
        let a = UnitId::new("A");
        let b = UnitId::new("B");
        assert_eq!(tagger.fresh(&a).generation, 1);
        assert_eq!(tagger.fresh(&a).generation, 2);
        assert_eq!(tagger.fresh(&b).generation, 1);
    }

    #[test]
    fn tags_variables_and_directives_but_not_placeholders() {
        let fragment = parse_expr("{ require(Math); v = unquote(x); var!(w) }", "t.gly").unwrap();
        let mut arena = fragment.arena().clone();
        let mut tagger = ContextTagger::new();
        let tag = tagger.fresh(&UnitId::new("M"));
        let root = tagger.tag_subtree(&mut arena, fragment.root(), &tag);
        assert_eq!(
            arena.pretty_tagged(root),
            "{ require(Math); =(v@M#1, unquote(x)); var!(w) }"
        );
        let (_, items) = arena.as_call(root).unwrap();
        let AstNode::Call { meta, .. } = arena.get(items[0]) else {
            panic!("expected directive call");
        };
        assert_eq!(meta.context.as_ref(), Some(&tag));
    }

    #[test]
    fn existing_tags_are_kept() {
        let mut arena = AstArena::new();
        let old = ContextTag::new(UnitId::new("Old"), 9);
        let v = arena.variable("v", Some(old.clone()));
        let call = arena.call("f", CallMeta::default(), vec![v]);
        let mut tagger = ContextTagger::new();
        let tag = tagger.fresh(&UnitId::new("New"));
        assert_eq!(tagger.tag_subtree(&mut arena, call, &tag), call);
    }
}
