//! Macro visibility across units: requires, imports, aliases, private
//! macros and ambiguous providers.

mod common;

use common::{expand_with, session};
use glyph::{AmbiguityPolicy, Catalog, CompilationUnit, ErrorKind, ExpanderConfig, ExpansionError, Session, UnitId};

const LIB: &str = "\
defmacrop(secret()) { quote { 42 } }
defmacro(shout(x)) { quote { print(unquote(x), secret_value()) } }
defmacro(reveal()) { quote { secret() } }
def(secret_value()) { 1 }
defp(hidden()) { 2 }";

fn with_lib() -> Session {
    let mut session = session();
    session.expand_source("Lib", "lib.gly", LIB).unwrap();
    session
}

fn expand_app(session: &mut Session, source: &str) -> Result<String, ExpansionError> {
    session.expand_source("App", "app.gly", source)
}

#[test]
fn interface_lists_only_public_names() {
    let session = with_lib();
    let summary = session.catalog().get(&UnitId::new("Lib")).unwrap().summary();
    assert_eq!(
        summary.macros,
        vec![("reveal".to_string(), 0), ("shout".to_string(), 1)]
    );
    assert_eq!(summary.functions, vec![("secret_value".to_string(), 0)]);
}

#[test]
fn public_macro_needs_a_require() {
    let mut session = with_lib();
    let err = expand_app(&mut session, "shout(1)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedFunction);

    let out = expand_app(&mut session, "require(Lib)\nshout(1)").unwrap();
    assert_eq!(out, "require(Lib)\nprint(1, secret_value())");
}

#[test]
fn private_macro_is_not_found_even_when_required() {
    let mut session = with_lib();
    let err = expand_app(&mut session, "require(Lib)\nsecret()").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedFunction);
    let err = expand_app(&mut session, "require(Lib)\nLib.secret()").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedFunction);
}

#[test]
fn private_macro_used_by_a_public_template_stays_behind() {
    // `reveal` expands to `secret()` in the caller's unit, where `secret` is unknown.
    let mut session = with_lib();
    let err = expand_app(&mut session, "require(Lib)\nreveal()").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedFunction);
    assert_eq!(err.site().unwrap().line, 2);
}

#[test]
fn qualified_call_without_require_is_module_not_required() {
    let mut session = with_lib();
    let err = expand_app(&mut session, "Lib.shout(1)").unwrap_err();
    let ExpansionError::ModuleNotRequired { module, site } = &err else {
        panic!("expected ModuleNotRequired, got {:?}", err);
    };
    assert_eq!(module, &UnitId::new("Lib"));
    assert_eq!((site.name.as_str(), site.arity, site.line), ("Lib.shout", 1, 1));
}

#[test]
fn qualified_call_resolves_through_aliases() {
    let mut session = session();
    session
        .expand_source("Math.Ops", "ops.gly", "defmacro(double(x)) { quote { unquote(x) * 2 } }")
        .unwrap();
    let out = expand_app(&mut session, "require(Math.Ops)\nalias(Math.Ops)\nOps.double(3)").unwrap();
    assert_eq!(out, "require(Math.Ops)\nalias(Math.Ops)\n*(3, 2)");
    let out = expand_app(&mut session, "alias(Math.Ops, M)\nrequire(M)\nM.double(4)").unwrap();
    assert_eq!(out, "alias(Math.Ops, M)\nrequire(M)\n*(4, 2)");
}

#[test]
fn functions_of_other_units_resolve_qualified_or_imported() {
    let mut session = with_lib();
    assert!(expand_app(&mut session, "print(Lib.secret_value())").is_ok());
    assert_eq!(
        expand_app(&mut session, "print(Lib.hidden())").unwrap_err().kind(),
        ErrorKind::UndefinedFunction
    );
    assert!(expand_app(&mut session, "import(Lib)\nprint(secret_value())").is_ok());
    assert!(expand_app(&mut session, "print(secret_value())").is_err());
}

#[test]
fn directives_inside_blocks_scope_to_later_siblings() {
    let mut session = with_lib();
    let out = expand_app(&mut session, "{ require(Lib); shout(:a) }").unwrap();
    assert_eq!(out, "{ require(Lib); print(:a, secret_value()) }");
    let err = expand_app(&mut session, "{ shout(:a); require(Lib) }").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedFunction);
    let err = expand_app(&mut session, "{ require(Lib); print(1) }\nshout(:b)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedFunction);
}

fn two_providers() -> Catalog {
    let mut session = session();
    session.expand_source("A", "a.gly", "defmacro(m()) { quote { :from_a } }").unwrap();
    session.expand_source("B", "b.gly", "defmacro(m()) { quote { :from_b } }\ndefmacro(n()) { quote { :only_b } }").unwrap();
    session.catalog().clone()
}

fn expand_against(catalog: &Catalog, config: &ExpanderConfig, source: &str) -> Result<String, ExpansionError> {
    let unit = CompilationUnit::parse("App", "app.gly", source)?;
    expand_with(&unit, catalog, config).map(|expanded| expanded.pretty())
}

#[test]
fn two_required_providers_are_ambiguous_by_default() {
    let catalog = two_providers();
    let config = ExpanderConfig::default();
    let err = expand_against(&catalog, &config, "require(A)\nrequire(B)\nprint(m())").unwrap_err();
    let ExpansionError::AmbiguousMacro { candidates, .. } = &err else {
        panic!("expected AmbiguousMacro, got {:?}", err);
    };
    assert_eq!(candidates.0, vec![UnitId::new("A"), UnitId::new("B")]);

    let out = expand_against(&catalog, &config, "require(A)\nrequire(B)\nprint(B.m(), n())").unwrap();
    assert_eq!(out, "require(A)\nrequire(B)\nprint(:from_b, :only_b)");
}

#[test]
fn first_required_policy_picks_the_earliest_require() {
    let catalog = two_providers();
    let config = ExpanderConfig {
        ambiguity: AmbiguityPolicy::FirstRequired,
        ..ExpanderConfig::default()
    };
    let out = expand_against(&catalog, &config, "require(B)\nrequire(A)\nprint(m())").unwrap();
    assert_eq!(out, "require(B)\nrequire(A)\nprint(:from_b)");
}

#[test]
fn import_only_narrows_unqualified_lookup() {
    let catalog = two_providers();
    let config = ExpanderConfig::default();
    let out = expand_against(
        &catalog,
        &config,
        "require(A)\nimport(B, only(:n, 0))\nprint(m(), n())",
    )
    .unwrap();
    assert_eq!(out, "require(A)\nimport(B, only(:n, 0))\nprint(:from_a, :only_b)");
}

#[test]
fn local_macros_win_over_required_ones() {
    let catalog = two_providers();
    let config = ExpanderConfig::default();
    let out = expand_against(
        &catalog,
        &config,
        "require(A)\nrequire(B)\ndefmacrop(m()) { quote { :local } }\nprint(m())",
    )
    .unwrap();
    assert_eq!(out, "require(A)\nrequire(B)\nprint(:local)");
}
