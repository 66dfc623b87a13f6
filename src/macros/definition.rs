//! Macro definitions: native and template bodies, and the parser for
//! `defmacro(name(params)) { quote { ... } }` forms.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::ast::{AstArena, Fragment, NodeId, UnitId};
use crate::diagnostics::CallSite;
use crate::macros::quoting::{MacroCall, QUOTE};
use crate::{expand_err, ExpansionError};

pub const DEFMACRO: &str = "defmacro";
pub const DEFMACROP: &str = "defmacrop";

/// A native transformation body.
///
/// Receives the unevaluated argument subtrees and the invocation
/// environment through [`MacroCall`] and returns the replacement node.
pub type MacroFn =
    Arc<dyn Fn(&mut MacroCall<'_>) -> Result<NodeId, ExpansionError> + Send + Sync>;

/// A declarative macro: parameter names and the quoted body.
#[derive(Debug, Clone)]
pub struct MacroTemplate {
    pub params: Vec<String>,
    pub body: Fragment,
}

impl MacroTemplate {
    /// Builds a template, rejecting duplicate parameter names.
    pub fn new(params: Vec<String>, body: Fragment) -> Result<Self, String> {
        check_no_duplicate_params(&params)?;
        Ok(MacroTemplate { params, body })
    }
}

fn check_no_duplicate_params(params: &[String]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for name in params {
        if !seen.insert(name) {
            return Err(format!("duplicate parameter name `{}`", name));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub enum MacroBody {
    Native(MacroFn),
    Template(MacroTemplate),
}

impl fmt::Debug for MacroBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroBody::Native(_) => f.write_str("Native(<fn>)"),
            MacroBody::Template(template) => f
                .debug_struct("Template")
                .field("params", &template.params)
                .field("body", &template.body.pretty())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Visibility {
    Public,
    Private,
}

/// A registered transformation.
#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub name: String,
    pub arity: usize,
    pub body: MacroBody,
    pub visibility: Visibility,
    /// Owning unit.
    pub unit: UnitId,
    /// Rank of the definition among the unit's top-level items.
    pub position: u32,
    pub line: u32,
}

impl MacroDefinition {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn key(&self) -> (&str, usize) {
        (&self.name, self.arity)
    }
}

/// Returns true if `id` is a `defmacro`/`defmacrop` form.
pub fn is_macro_definition(arena: &AstArena, id: NodeId) -> bool {
    matches!(arena.as_call(id), Some((target, _)) if target == DEFMACRO || target == DEFMACROP)
}

/// A parsed `defmacro` form, ready to be registered.
#[derive(Debug, Clone)]
pub struct ParsedDefinition {
    pub name: String,
    pub visibility: Visibility,
    pub template: MacroTemplate,
    pub line: u32,
}

/// Parses `defmacro(name(p1, ..)) { quote { body } }` into a template.
///
/// The head must be a call whose arguments are plain variables and the
/// body must be a single `quote`. Anything else is a `MalformedDefinition`.
pub fn parse_macro_definition(
    arena: &AstArena,
    id: NodeId,
    unit: &UnitId,
    file: &Arc<str>,
) -> Result<ParsedDefinition, ExpansionError> {
    let line = arena.line_of(id);
    let Some((keyword, items)) = arena.as_call(id) else {
        let site = CallSite::new(unit.clone(), Arc::clone(file), line, DEFMACRO, 0);
        return Err(expand_err!(MalformedDefinition, site, "not a macro definition"));
    };
    let visibility = if keyword == DEFMACROP {
        Visibility::Private
    } else {
        Visibility::Public
    };
    let malformed = |name: &str, arity: usize, message: &str| {
        let site = CallSite::new(unit.clone(), Arc::clone(file), line, name, arity);
        expand_err!(MalformedDefinition, site, message)
    };

    let [head, body] = items else {
        return Err(malformed(
            keyword,
            items.len(),
            "expected a head and a body, as in `defmacro(name(args)) { quote { ... } }`",
        ));
    };
    let Some((name, param_ids)) = arena.as_call(*head) else {
        return Err(malformed(keyword, items.len(), "macro head must be a call such as `name(a, b)`"));
    };

    let mut params = Vec::with_capacity(param_ids.len());
    for param in param_ids {
        let Some((param_name, _)) = arena.as_variable(*param) else {
            return Err(malformed(name, param_ids.len(), "macro parameters must be plain variables"));
        };
        params.push(param_name.to_string());
    }

    let Some((QUOTE, [quoted])) = arena.as_call(*body) else {
        return Err(malformed(name, params.len(), "macro body must be a single `quote { ... }`"));
    };

    let template = MacroTemplate::new(params, Fragment::extract(arena, *quoted))
        .map_err(|message| malformed(name, param_ids.len(), &message))?;
    Ok(ParsedDefinition {
        name: name.to_string(),
        visibility,
        template,
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorKind;
    use crate::syntax::parse_expr;

    fn parse(source: &str) -> Result<ParsedDefinition, ExpansionError> {
        let fragment = parse_expr(source, "defs.gly").unwrap();
        parse_macro_definition(
            fragment.arena(),
            fragment.root(),
            &UnitId::new("Defs"),
            &Arc::from("defs.gly"),
        )
    }

    #[test]
    fn parses_public_template() {
        let def = parse("defmacro(unless(cond, body)) { quote { if(!unquote(cond)) { unquote(body) } } }")
            .unwrap();
        assert_eq!(def.name, "unless");
        assert_eq!(def.visibility, Visibility::Public);
        assert_eq!(def.template.params, vec!["cond", "body"]);
        assert_eq!(
            def.template.body.pretty(),
            "if(!unquote(cond), unquote(body))"
        );
    }

    #[test]
    fn private_keyword_sets_visibility() {
        let def = parse("defmacrop(two()) { quote { 2 } }").unwrap();
        assert_eq!(def.visibility, Visibility::Private);
        assert!(def.template.params.is_empty());
    }

    #[test]
    fn duplicate_params_are_malformed() {
        let err = parse("defmacro(pair(a, a)) { quote { tuple(unquote(a)) } }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDefinition);
        assert!(err.to_string().contains("duplicate parameter name `a`"));
    }

    #[test]
    fn body_must_be_quoted() {
        let err = parse("defmacro(two()) { 2 }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDefinition);
        assert_eq!(err.site().unwrap().name, "two");
    }
}
