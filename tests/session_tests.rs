//! Multi-unit sessions: ordering by requires, parallel waves and failure
//! isolation.

mod common;

use common::session;
use glyph::macros::Visibility;
use glyph::{CompilationUnit, ErrorKind, Session, UnitId};

fn unit(id: &str, source: &str) -> CompilationUnit {
    CompilationUnit::parse(id, format!("{}.gly", id.to_lowercase()), source).unwrap()
}

#[test]
fn batch_respects_require_chains_in_any_input_order() {
    let units = vec![
        unit("App", "require(Base)\nrequire(Mid)\nprint(twice_inc(1))"),
        unit("Mid", "require(Base)\ndefmacro(twice_inc(x)) { quote { inc(inc(unquote(x))) } }"),
        unit("Base", "defmacro(inc(x)) { quote { unquote(x) + 1 } }"),
    ];
    let mut session = session();
    let results = session.expand_all(&units);
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].as_ref().unwrap().pretty(),
        "require(Base)\nrequire(Mid)\nprint(+(+(1, 1), 1))"
    );
    assert_eq!(results[1].as_ref().unwrap().pretty(), "require(Base)");
    assert_eq!(results[2].as_ref().unwrap().pretty(), "");
}

#[test]
fn macros_reached_through_a_template_still_need_a_require() {
    // `twice_inc` writes `inc(..)` into App; App never required Base.
    let units = vec![
        unit("Base", "defmacro(inc(x)) { quote { unquote(x) + 1 } }"),
        unit("Mid", "require(Base)\ndefmacro(twice_inc(x)) { quote { inc(inc(unquote(x))) } }"),
        unit("App", "require(Mid)\nprint(twice_inc(1))"),
    ];
    let results = session().expand_all(&units);
    let err = results[2].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedFunction);
    assert_eq!(err.site().unwrap().name, "inc");
}

#[test]
fn batch_expands_independent_units_and_collects_interfaces() {
    let mut units = Vec::new();
    for n in 0..8 {
        units.push(unit(
            &format!("Lib{}", n),
            &format!("defmacro(value{}()) {{ quote {{ {} }} }}\ndef(f{}()) {{ value{}() }}", n, n, n, n),
        ));
    }
    let mut session = session();
    let results = session.expand_all(&units);
    assert!(results.iter().all(Result::is_ok));
    for (n, result) in results.iter().enumerate() {
        let expanded = result.as_ref().unwrap();
        assert_eq!(expanded.unit, UnitId::new(format!("Lib{}", n)));
        assert_eq!(expanded.pretty(), format!("def(f{}(), {})", n, n));
    }
    assert_eq!(session.catalog().len(), 8);
}

#[test]
fn dependents_of_a_failed_unit_fail_alone() {
    let units = vec![
        unit("Broken", "defmacro(m()) { quote { nowhere() } }\nm()"),
        unit("User", "require(Broken)\nm()"),
        unit("Bystander", "print(:fine)"),
    ];
    let mut session = session();
    let results = session.expand_all(&units);
    assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::UndefinedFunction);
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::UndefinedFunction);
    assert_eq!(results[2].as_ref().unwrap().pretty(), "print(:fine)");
    assert!(!session.catalog().contains(&UnitId::new("Broken")));
}

#[test]
fn native_macros_travel_through_the_catalog() {
    let lib = CompilationUnit::new("Native", "native.gly").with_native_macro(
        "answer",
        0,
        Visibility::Public,
        |call| call.parse_fragment("42"),
    );
    let app = unit("App", "require(Native)\nprint(answer())");
    let mut session: Session = session();
    let results = session.expand_all(&[app, lib]);
    assert_eq!(results[0].as_ref().unwrap().pretty(), "require(Native)\nprint(42)");
    assert_eq!(results[0].as_ref().unwrap().trace.len(), 1);
}

#[test]
fn sequential_and_batch_expansion_agree() {
    let sources = [
        ("Base", "defmacro(inc(x)) { quote { unquote(x) + 1 } }"),
        ("App", "require(Base)\nprint(inc(inc(0)))"),
    ];
    let mut sequential = session();
    let one_by_one: Vec<_> = sources
        .iter()
        .map(|(id, source)| sequential.expand(&unit(id, source)).unwrap().pretty())
        .collect();
    let units: Vec<_> = sources.iter().map(|(id, source)| unit(id, source)).collect();
    let batch: Vec<_> = session()
        .expand_all(&units)
        .into_iter()
        .map(|result| result.unwrap().pretty())
        .collect();
    assert_eq!(one_by_one, batch);
    assert_eq!(batch[1], "require(Base)\nprint(+(+(0, 1), 1))");
}
