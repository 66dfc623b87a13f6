//! Deterministic pretty-printing of AST subtrees.
//!
//! Output is call syntax that the reader in [`crate::syntax`] reads back to a
//! structurally equal tree (for untagged trees). Layout is single-line.

use crate::ast::{AstArena, AstNode, Literal, NodeId};
use crate::macros::quoting::BLOCK;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Renders `id`; with `tags` set, tagged variables print as `name@Unit#n`.
pub fn render(arena: &AstArena, id: NodeId, tags: bool) -> String {
    let mut out = String::new();
    write_node(arena, id, tags, &mut out);
    out
}

/// True for targets printed in operator position, e.g. `=(v, 1)`.
pub fn is_operator(target: &str) -> bool {
    OPERATORS.contains(&target)
}

const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "<>", "++", "+", "-", "*", "/", "=", "<", ">",
];

// ============================================================================
// RENDERING HELPERS
// ============================================================================

fn write_node(arena: &AstArena, id: NodeId, tags: bool, out: &mut String) {
    match arena.get(id) {
        AstNode::Atom(name) => write_atom(name, out),
        AstNode::Literal(value) => write_literal(value, out),
        AstNode::Variable { name, context } => {
            out.push_str(name);
            if let (true, Some(tag)) = (tags, context) {
                out.push('@');
                out.push_str(&tag.to_string());
            }
        }
        AstNode::Call { target, args, .. } => write_call(arena, target, args, tags, out),
    }
}

fn write_atom(name: &str, out: &mut String) {
    // Module names print bare; everything else with a leading colon.
    if name.starts_with(|c: char| c.is_ascii_uppercase()) {
        out.push_str(name);
    } else {
        out.push(':');
        out.push_str(name);
    }
}

fn write_literal(value: &Literal, out: &mut String) {
    match value {
        Literal::Nil => out.push_str("nil"),
        Literal::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::Integer(n) => out.push_str(&n.to_string()),
        // Debug keeps a decimal point or exponent, so the reader sees a float.
        Literal::Float(x) => out.push_str(&format!("{:?}", x)),
        Literal::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
    }
}

fn write_call(arena: &AstArena, target: &str, args: &[NodeId], tags: bool, out: &mut String) {
    if target == BLOCK && args.len() != 1 {
        write_block(arena, args, tags, out);
        return;
    }
    if target == "!" && args.len() == 1 {
        out.push('!');
        let wrap = matches!(arena.as_call(args[0]), Some((t, _)) if is_operator(t));
        if wrap {
            out.push('(');
        }
        write_node(arena, args[0], tags, out);
        if wrap {
            out.push(')');
        }
        return;
    }
    out.push_str(target);
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_node(arena, *arg, tags, out);
    }
    out.push(')');
}

fn write_block(arena: &AstArena, items: &[NodeId], tags: bool, out: &mut String) {
    if items.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{ ");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        write_node(arena, *item, tags, out);
    }
    out.push_str(" }");
}
