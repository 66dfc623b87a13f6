//! Glyph reader: source text to arena-backed AST.
//!
//! Purely syntactic. Nodes produced here carry no context tag, i.e. they
//! behave as code written by hand at that point.

use std::cell::RefCell;
use std::sync::Arc;

use once_cell::sync::Lazy;
use pest::error::{Error, LineColLocation};
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use crate::ast::{AstArena, CallMeta, Fragment, Literal, NodeId};
use crate::macros::quoting::BLOCK;
use crate::ExpansionError;

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
struct GlyphParser;

static PRATT: Lazy<PrattParser<Rule>> = Lazy::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::assign, Assoc::Right))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::neq, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::lte, Assoc::Left)
            | Op::infix(Rule::gte, Assoc::Left))
        .op(Op::infix(Rule::concat, Assoc::Right) | Op::infix(Rule::append, Assoc::Right))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left) | Op::infix(Rule::div, Assoc::Left))
        .op(Op::prefix(Rule::not))
});

// ============================================================================
// PUBLIC API
// ============================================================================

/// Reads a whole unit: the arena and its top-level forms in source order.
pub fn parse_program(
    source: &str,
    file: impl Into<Arc<str>>,
) -> Result<(AstArena, Vec<NodeId>), ExpansionError> {
    let reader = Reader::new(file.into());
    let mut pairs =
        GlyphParser::parse(Rule::program, source).map_err(|e| reader.syntax_error(e))?;
    let Some(program) = pairs.next() else {
        return Ok((AstArena::new(), Vec::new()));
    };
    let forms = program
        .into_inner()
        .filter(|p| p.as_rule() == Rule::expr)
        .map(|p| reader.build_expr(p.into_inner()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((reader.finish(), forms))
}

/// Reads exactly one expression into a detached fragment.
pub fn parse_expr(source: &str, file: impl Into<Arc<str>>) -> Result<Fragment, ExpansionError> {
    let reader = Reader::new(file.into());
    let mut pairs =
        GlyphParser::parse(Rule::fragment, source).map_err(|e| reader.syntax_error(e))?;
    let expr = pairs
        .next()
        .and_then(|fragment| fragment.into_inner().find(|p| p.as_rule() == Rule::expr));
    let Some(expr) = expr else {
        return Err(ExpansionError::Syntax {
            file: reader.file,
            line: 1,
            message: "expected an expression".to_string(),
        });
    };
    let root = reader.build_expr(expr.into_inner())?;
    let arena = reader.finish();
    Ok(Fragment::extract(&arena, root))
}

// ============================================================================
// AST BUILDERS
// ============================================================================

struct Reader {
    file: Arc<str>,
    // The Pratt callbacks all need to push nodes, so the arena sits behind a RefCell.
    arena: RefCell<AstArena>,
}

impl Reader {
    fn new(file: Arc<str>) -> Self {
        Self {
            file,
            arena: RefCell::new(AstArena::new()),
        }
    }

    fn finish(self) -> AstArena {
        self.arena.into_inner()
    }

    fn build_expr(&self, pairs: Pairs<Rule>) -> Result<NodeId, ExpansionError> {
        PRATT
            .map_primary(|primary| self.build_primary(primary))
            .map_prefix(|op, operand| {
                let operand = operand?;
                Ok(self.call("!", line_of(&op), vec![operand]))
            })
            .map_infix(|lhs, op, rhs| {
                let (lhs, rhs) = (lhs?, rhs?);
                Ok(self.call(op.as_str(), line_of(&op), vec![lhs, rhs]))
            })
            .parse(pairs)
    }

    fn build_primary(&self, pair: Pair<Rule>) -> Result<NodeId, ExpansionError> {
        let line = line_of(&pair);
        match pair.as_rule() {
            Rule::paren => {
                let inner = self.expect_inner(pair, "parenthesised expression")?;
                self.build_expr(inner.into_inner())
            }
            Rule::block => self.build_block(pair),
            Rule::call => {
                let mut inner = pair.into_inner();
                let name = self.expect_next(&mut inner, line, "call name")?;
                let args = self.build_call_tail(inner)?;
                Ok(self.call(name.as_str(), line, args))
            }
            Rule::remote_call => {
                let mut inner = pair.into_inner();
                let module = self.expect_next(&mut inner, line, "module name")?;
                let name = self.expect_next(&mut inner, line, "function name")?;
                let target = format!("{}.{}", module.as_str(), name.as_str());
                let args = self.build_call_tail(inner)?;
                Ok(self.call(&target, line, args))
            }
            Rule::op_call => {
                let mut inner = pair.into_inner();
                let operator = self.expect_next(&mut inner, line, "operator")?;
                let args = self.build_call_tail(inner)?;
                Ok(self.call(operator.as_str(), line, args))
            }
            Rule::integer => {
                let value = pair.as_str().parse::<i64>().map_err(|_| {
                    self.error_at(line, format!("integer literal `{}` is out of range", pair.as_str()))
                })?;
                Ok(self.literal(Literal::Integer(value)))
            }
            Rule::float => {
                let value = pair
                    .as_str()
                    .parse::<f64>()
                    .map_err(|_| self.error_at(line, format!("invalid float `{}`", pair.as_str())))?;
                Ok(self.literal(Literal::Float(value)))
            }
            Rule::string => {
                let inner = self.expect_inner(pair, "string body")?;
                Ok(self.literal(Literal::String(unescape(inner.as_str()))))
            }
            Rule::boolean => Ok(self.literal(Literal::Bool(pair.as_str() == "true"))),
            Rule::nil => Ok(self.literal(Literal::Nil)),
            Rule::atom => {
                let inner = self.expect_inner(pair, "atom name")?;
                Ok(self.arena.borrow_mut().atom(inner.as_str()))
            }
            Rule::module => Ok(self.arena.borrow_mut().atom(pair.as_str())),
            Rule::variable => Ok(self.arena.borrow_mut().variable(pair.as_str(), None)),
            other => Err(self.error_at(line, format!("unexpected {:?}", other))),
        }
    }

    // Argument list followed by an optional trailing block, in either order of presence.
    fn build_call_tail(&self, pairs: Pairs<Rule>) -> Result<Vec<NodeId>, ExpansionError> {
        let mut args = Vec::new();
        for pair in pairs {
            match pair.as_rule() {
                Rule::call_args => {
                    for arg in pair.into_inner() {
                        args.push(self.build_expr(arg.into_inner())?);
                    }
                }
                Rule::block => args.push(self.build_block(pair)?),
                _ => {}
            }
        }
        Ok(args)
    }

    // A block of exactly one expression reads as that expression.
    fn build_block(&self, pair: Pair<Rule>) -> Result<NodeId, ExpansionError> {
        let line = line_of(&pair);
        let mut items = pair
            .into_inner()
            .filter(|p| p.as_rule() == Rule::expr)
            .map(|p| self.build_expr(p.into_inner()))
            .collect::<Result<Vec<_>, _>>()?;
        if items.len() == 1 {
            if let Some(only) = items.pop() {
                return Ok(only);
            }
        }
        Ok(self.call(BLOCK, line, items))
    }

    fn call(&self, target: &str, line: u32, args: Vec<NodeId>) -> NodeId {
        self.arena
            .borrow_mut()
            .call(target, CallMeta::at_line(line), args)
    }

    fn literal(&self, value: Literal) -> NodeId {
        self.arena.borrow_mut().literal(value)
    }

    fn expect_inner<'i>(&self, pair: Pair<'i, Rule>, what: &str) -> Result<Pair<'i, Rule>, ExpansionError> {
        let line = line_of(&pair);
        self.expect_next(&mut pair.into_inner(), line, what)
    }

    fn expect_next<'i>(
        &self,
        pairs: &mut Pairs<'i, Rule>,
        line: u32,
        what: &str,
    ) -> Result<Pair<'i, Rule>, ExpansionError> {
        pairs
            .next()
            .ok_or_else(|| self.error_at(line, format!("missing {}", what)))
    }

    fn error_at(&self, line: u32, message: String) -> ExpansionError {
        ExpansionError::Syntax {
            file: Arc::clone(&self.file),
            line,
            message,
        }
    }

    fn syntax_error(&self, error: Error<Rule>) -> ExpansionError {
        let line = match error.line_col {
            LineColLocation::Pos((line, _)) | LineColLocation::Span((line, _), _) => line,
        };
        self.error_at(line as u32, error.variant.message().to_string())
    }
}

fn line_of(pair: &Pair<Rule>) -> u32 {
    pair.line_col().0 as u32
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
