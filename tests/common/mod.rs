//! # Glyph Test Helpers
//!
//! Shared setup for the integration tests: unit expansion shortcuts, a
//! native `unless` macro and a toy evaluator standing in for the backend.

#![allow(dead_code)]

use std::collections::HashMap;

use glyph::macros::{Bindings, Visibility};
use glyph::unit::expand_unit;
use glyph::{
    AstArena, AstNode, Catalog, CompilationUnit, ContextTag, ExpandedUnit, ExpanderConfig,
    ExpansionError, NodeId, Session,
};
use glyph::ast::Literal;
use glyph::macros::StandardResolver;

/// Routes `tracing` output to the test writer when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn session() -> Session {
    init_tracing();
    Session::new(ExpanderConfig::default()).expect("default config is valid")
}

/// Expands `source` as unit `App` in file `app.gly` against an empty catalog.
pub fn expand(source: &str) -> Result<ExpandedUnit, ExpansionError> {
    let unit = CompilationUnit::parse("App", "app.gly", source)?;
    expand_with(&unit, &Catalog::new(), &ExpanderConfig::default())
}

pub fn expand_with(
    unit: &CompilationUnit,
    catalog: &Catalog,
    config: &ExpanderConfig,
) -> Result<ExpandedUnit, ExpansionError> {
    init_tracing();
    let resolver = StandardResolver::from_config(config).expect("valid kernel entries");
    expand_unit(unit, catalog, &resolver, config)
}

pub fn expand_ok(source: &str) -> ExpandedUnit {
    match expand(source) {
        Ok(expanded) => expanded,
        Err(err) => panic!("expansion failed: {} ({:?})", err, err.record()),
    }
}

pub fn expand_err(source: &str) -> ExpansionError {
    match expand(source) {
        Ok(expanded) => panic!("expected an error, got:\n{}", expanded.pretty()),
        Err(err) => err,
    }
}

/// Unit `App` with a native `unless(cond, body)` at position 0, followed by `source`.
pub fn unit_with_native_unless(source: &str) -> CompilationUnit {
    CompilationUnit::new("App", "app.gly")
        .with_native_macro("unless", 2, Visibility::Public, |call| {
            let template = call.parse_fragment("if(!unquote(cond)) { unquote(body) }")?;
            let bindings = Bindings::from([
                ("cond".to_string(), call.arg(0)?),
                ("body".to_string(), call.arg(1)?),
            ]);
            call.capture_and_splice(template, &bindings)
        })
        .with_source(source)
        .expect("test source parses")
}

// ============================================================================
// TOY EVALUATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    fn render(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let inner: Vec<_> = items.iter().map(Value::render).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }
}

/// Evaluates expanded forms. Variables are keyed by name and context tag,
/// exactly as the expander distinguishes them.
pub struct Evaluator<'a> {
    arena: &'a AstArena,
    variables: HashMap<(String, Option<ContextTag>), Value>,
    pub output: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(arena: &'a AstArena) -> Self {
        Self {
            arena,
            variables: HashMap::new(),
            output: Vec::new(),
        }
    }

    /// Runs every top-level form of an expanded unit and returns what was printed.
    pub fn run(expanded: &'a ExpandedUnit) -> Result<Vec<String>, String> {
        let mut evaluator = Evaluator::new(&expanded.arena);
        for form in &expanded.forms {
            evaluator.eval(*form)?;
        }
        Ok(evaluator.output)
    }

    pub fn eval(&mut self, id: NodeId) -> Result<Value, String> {
        match self.arena.get(id) {
            AstNode::Atom(name) => Ok(Value::Str(name.clone())),
            AstNode::Literal(literal) => Ok(match literal {
                Literal::Nil => Value::Nil,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Integer(n) => Value::Int(*n),
                Literal::Float(x) => Value::Str(x.to_string()),
                Literal::String(s) => Value::Str(s.clone()),
            }),
            AstNode::Variable { name, context } => self
                .variables
                .get(&(name.clone(), context.clone()))
                .cloned()
                .ok_or_else(|| format!("unbound variable {}", name)),
            AstNode::Call { target, args, .. } => {
                let args = args.clone();
                self.eval_call(target.as_str(), &args)
            }
        }
    }

    fn eval_call(&mut self, target: &str, args: &[NodeId]) -> Result<Value, String> {
        match target {
            "__block__" => {
                let mut last = Value::Nil;
                for item in args {
                    last = self.eval(*item)?;
                }
                Ok(last)
            }
            "=" => {
                let AstNode::Variable { name, context } = self.arena.get(args[0]) else {
                    return Err("only variable patterns are supported".to_string());
                };
                let key = (name.clone(), context.clone());
                let value = self.eval(args[1])?;
                self.variables.insert(key, value.clone());
                Ok(value)
            }
            "if" => {
                if self.eval(args[0])?.truthy() {
                    self.eval(args[1])
                } else if let Some(otherwise) = args.get(2) {
                    self.eval(*otherwise)
                } else {
                    Ok(Value::Nil)
                }
            }
            "!" => Ok(Value::Bool(!self.eval(args[0])?.truthy())),
            "print" => {
                let mut parts = Vec::new();
                for arg in args {
                    parts.push(self.eval(*arg)?.render());
                }
                self.output.push(parts.join(" "));
                Ok(Value::Nil)
            }
            "list" => {
                let mut items = Vec::new();
                for arg in args {
                    items.push(self.eval(*arg)?);
                }
                Ok(Value::List(items))
            }
            "+" | "-" | "*" => {
                let (Value::Int(a), Value::Int(b)) = (self.eval(args[0])?, self.eval(args[1])?) else {
                    return Err(format!("`{}` expects integers", target));
                };
                Ok(Value::Int(match target {
                    "+" => a + b,
                    "-" => a - b,
                    _ => a * b,
                }))
            }
            "==" => Ok(Value::Bool(self.eval(args[0])? == self.eval(args[1])?)),
            "require" | "import" | "alias" | "def" | "defp" => Ok(Value::Nil),
            other => Err(format!("unknown function {}/{}", other, args.len())),
        }
    }
}
