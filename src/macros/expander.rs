//! The expander: resolves macro calls and rewrites the tree to a fixed point.
//!
//! ## Algorithm
//!
//! At each call the expander asks the registry whether `(name, arity)` is a
//! macro visible at the call's source position. If it is, the body runs on
//! the raw argument subtrees and its result replaces the call; the result is
//! scanned again (outer call first) before any of its children. Calls that
//! are not macros are function calls; they are checked against the
//! [`FunctionResolver`] only when the unit's expansion concludes, because
//! nothing earlier can know the full set of functions.
//!
//! ## Origins
//!
//! The arena is append-only, so every node a macro invocation creates has an
//! id at or above the arena length when the invocation started. Each
//! invocation pushes an [`OriginFrame`] recording that boundary. Walking the
//! frames tells, for any node, which template wrote it (its context) and who
//! invoked that template. A diagnostic raised on code a template wrote is
//! reported at the line of the user-written call that started the chain;
//! code the caller wrote and the template only spliced keeps its own line.
//!
//! ## Limits
//!
//! - `max_expansions_per_node`: successive rewrites of the same position.
//! - `max_expansion_depth`: macro results nested inside macro results. Only
//!   nodes an invocation created count as nested in it, so arguments the
//!   user wrote keep the depth of the code around them.
//!
//! Both raise `InfiniteExpansion`.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::ast::{AstArena, AstNode, CallMeta, ContextTag, NodeId, UnitId};
use crate::config::ExpanderConfig;
use crate::diagnostics::{CallSite, ErrorKind, UnitList, Warning};
use crate::environment::{BoundVariable, EnvAdditions, Environment, ImportFilter};
use crate::macros::definition::{
    parse_macro_definition, MacroBody, MacroDefinition, Visibility, DEFMACRO, DEFMACROP,
};
use crate::macros::hygiene::ContextTagger;
use crate::macros::quoting::{
    capture, splice, unhygienic, Bindings, MacroCall, BLOCK, QUOTE, UNHYGIENIC, UNQUOTE,
};
use crate::macros::registry::{Lookup, LookupError, LookupScope, MacroProvenance, MacroRegistry};
use crate::macros::resolve::{FunctionQuery, FunctionResolver, LocalFunctions};
use crate::unit::Catalog;
use crate::{expand_err, ExpansionError};

/// Call targets the expander interprets itself; they are never looked up as macros.
pub const SPECIAL_FORMS: &[&str] = &[
    QUOTE, UNQUOTE, UNHYGIENIC, BLOCK, "=", "def", "defp", DEFMACRO, DEFMACROP, "require",
    "import", "alias",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionState {
    Scanning,
    MacroCallDetected,
    Invoking,
    Substituted,
    Done,
    Failed(ErrorKind),
}

/// One macro invocation, for traceability.
#[derive(Debug, Clone)]
pub struct MacroExpansionStep {
    pub macro_name: String,
    pub arity: usize,
    pub provenance: MacroProvenance,
    pub line: u32,
    /// The call before expansion.
    pub input: NodeId,
    /// The replacement produced by the body.
    pub output: NodeId,
}

/// Result of [`Expander::expand_once`].
#[derive(Debug, Clone)]
pub enum ExpansionStep {
    Expanded {
        node: NodeId,
        macro_name: String,
        provenance: MacroProvenance,
    },
    Unchanged(NodeId),
}

impl ExpansionStep {
    pub fn node(&self) -> NodeId {
        match self {
            ExpansionStep::Expanded { node, .. } | ExpansionStep::Unchanged(node) => *node,
        }
    }
}

#[derive(Debug, Clone)]
struct OriginFrame {
    site: CallSite,
    /// Nodes with an index at or above this were created by the invocation.
    boundary: usize,
    /// Context of the code the invocation wrote.
    template_context: Option<ContextTag>,
    /// Context of the code containing the invocation.
    invocation_context: Option<ContextTag>,
}

#[derive(Debug, Clone)]
struct PendingCall {
    site: CallSite,
    env: Environment,
}

/// What remains once a unit has been expanded.
pub(crate) struct ExpanderOutput {
    pub arena: AstArena,
    pub registry: MacroRegistry,
    pub functions: LocalFunctions,
    pub trace: Vec<MacroExpansionStep>,
    pub warnings: Vec<Warning>,
}

/// Expands the forms of one unit. Owns the unit's arena and registry.
pub struct Expander<'a> {
    unit: UnitId,
    file: Arc<str>,
    arena: AstArena,
    registry: MacroRegistry,
    catalog: &'a Catalog,
    resolver: &'a dyn FunctionResolver,
    config: &'a ExpanderConfig,
    tagger: ContextTagger,
    state: ExpansionState,
    position: u32,
    line: u32,
    functions: LocalFunctions,
    frames: Vec<OriginFrame>,
    /// First boundary of each rewritten position on the current path.
    nesting: Vec<usize>,
    pending: Vec<PendingCall>,
    trace: Vec<MacroExpansionStep>,
    warnings: Vec<Warning>,
}

// ============================================================================
// PUBLIC API
// ============================================================================

impl<'a> Expander<'a> {
    pub fn new(
        unit: UnitId,
        file: impl Into<Arc<str>>,
        arena: AstArena,
        catalog: &'a Catalog,
        resolver: &'a dyn FunctionResolver,
        config: &'a ExpanderConfig,
    ) -> Self {
        let file = file.into();
        Self {
            registry: MacroRegistry::new(unit.clone(), Arc::clone(&file)),
            unit,
            file,
            arena,
            catalog,
            resolver,
            config,
            tagger: ContextTagger::new(),
            state: ExpansionState::Scanning,
            position: 0,
            line: 0,
            functions: LocalFunctions::new(),
            frames: Vec::new(),
            nesting: Vec::new(),
            pending: Vec::new(),
            trace: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn arena(&self) -> &AstArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut AstArena {
        &mut self.arena
    }

    pub fn state(&self) -> ExpansionState {
        self.state
    }

    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn trace(&self) -> &[MacroExpansionStep] {
        &self.trace
    }

    /// Moves the expander to a top-level item: its position and source line.
    ///
    /// Origins recorded by [`Expander::expand_once`] belong to the previous
    /// item and are dropped here.
    pub fn set_location(&mut self, position: u32, line: u32) {
        self.position = position;
        self.line = line;
        self.frames.clear();
    }

    /// Makes a function known to fallback resolution.
    pub fn declare_function(&mut self, name: &str, arity: usize, public: bool) {
        self.functions.declare(name, arity, public);
    }

    /// Registers a macro at the current source position.
    ///
    /// The definition is visible to calls at later positions only.
    pub fn define_macro(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        visibility: Visibility,
        body: MacroBody,
    ) -> Result<(), ExpansionError> {
        let name = name.into();
        if let MacroBody::Template(template) = &body {
            if template.params.len() != arity {
                let site = CallSite::new(
                    self.unit.clone(),
                    Arc::clone(&self.file),
                    self.line,
                    name,
                    arity,
                );
                return Err(expand_err!(
                    MalformedDefinition,
                    site,
                    "template declares {} parameters",
                    template.params.len()
                ));
            }
        }
        debug!(
            unit = %self.unit,
            name = %name,
            arity,
            position = self.position,
            visibility = ?visibility,
            "registered macro"
        );
        let definition = MacroDefinition {
            name,
            arity,
            body,
            visibility,
            unit: self.unit.clone(),
            position: self.position,
            line: self.line,
        };
        if let Some(warning) = self.registry.register(definition) {
            warn!("{}", warning);
            self.warnings.push(warning);
        }
        Ok(())
    }

    /// Registers a `defmacro`/`defmacrop` form at the current position.
    pub fn define_template(&mut self, form: NodeId) -> Result<(), ExpansionError> {
        let parsed = parse_macro_definition(&self.arena, form, &self.unit, &self.file)?;
        let arity = parsed.template.params.len();
        self.line = parsed.line;
        self.define_macro(
            parsed.name,
            arity,
            parsed.visibility,
            MacroBody::Template(parsed.template),
        )
    }

    /// Looks up a macro as a call at the current position would, counting
    /// definitions registered at this position too.
    pub fn resolve_macro(
        &self,
        name: &str,
        arity: usize,
        env: &Environment,
    ) -> Result<Arc<MacroDefinition>, ExpansionError> {
        let site = CallSite::new(self.unit.clone(), Arc::clone(&self.file), env.line(), name, arity);
        match self.lookup_named(name, arity, self.position.saturating_add(1), env, &site)? {
            Lookup::Found { definition, .. } => Ok(definition),
            Lookup::NotFound => Err(expand_err!(UndefinedMacro, site)),
        }
    }

    /// Expands `node` once if it is a macro call; children are not visited.
    ///
    /// The invocation's origin is kept, so stepping into the returned node
    /// sees the same contexts as [`Expander::expand_fully`] would.
    pub fn expand_once(
        &mut self,
        node: NodeId,
        env: &Environment,
    ) -> Result<ExpansionStep, ExpansionError> {
        self.transition(ExpansionState::Scanning);
        let Some((definition, provenance)) = self.lookup_call(node, env)? else {
            self.transition(ExpansionState::Done);
            return Ok(ExpansionStep::Unchanged(node));
        };
        let macro_name = definition.name.clone();
        let expanded = self.invoke(node, env, definition, provenance.clone());
        let node = self.settle(expanded)?;
        Ok(ExpansionStep::Expanded {
            node,
            macro_name,
            provenance,
        })
    }

    /// Expands `node` and all of its descendants to a fixed point, then
    /// resolves the remaining calls as functions.
    pub fn expand_fully(&mut self, node: NodeId, env: &Environment) -> Result<NodeId, ExpansionError> {
        let expanded = self.expand_form(node, env)?;
        self.conclude()?;
        Ok(expanded)
    }

    /// Checks every call recorded as a function call; the first that does
    /// not resolve is an `UndefinedFunction` error.
    pub fn conclude(&mut self) -> Result<(), ExpansionError> {
        let pending = std::mem::take(&mut self.pending);
        for call in &pending {
            let query = FunctionQuery {
                name: &call.site.name,
                arity: call.site.arity,
                env: &call.env,
                locals: &self.functions,
                catalog: self.catalog,
            };
            if !self.resolver.resolves(&query) {
                trace!(call = %call.site, line = call.site.line, "unresolved function call");
                let err = expand_err!(UndefinedFunction, call.site.clone());
                return self.settle(Err(err));
            }
        }
        self.transition(ExpansionState::Done);
        Ok(())
    }

    /// The environment in effect after `node` in a sequence: directives and
    /// `=` bindings extend it for the following siblings.
    pub fn scope_after(&self, env: &Environment, node: NodeId) -> Result<Environment, ExpansionError> {
        let AstNode::Call {
            target, meta, args, ..
        } = self.arena.get(node)
        else {
            return Ok(env.clone());
        };
        let env = env.at_line(meta.line);
        match (target.as_str(), args.as_slice()) {
            ("require", [module]) => {
                let unit = self.directive_unit(node, *module, &env)?;
                Ok(env.require_unit(unit))
            }
            ("import", [module]) => {
                let unit = self.directive_unit(node, *module, &env)?;
                Ok(env.import_unit(unit, ImportFilter::All))
            }
            ("import", [module, only]) => {
                let unit = self.directive_unit(node, *module, &env)?;
                let filter = self.import_filter(node, *only)?;
                Ok(env.import_unit(unit, filter))
            }
            ("alias", [full]) => {
                let unit = self.directive_unit(node, *full, &env)?;
                let short = unit
                    .as_str()
                    .rsplit('.')
                    .next()
                    .unwrap_or(unit.as_str())
                    .to_string();
                Ok(env.derive(EnvAdditions::new().alias(short, unit, meta.context.clone())))
            }
            ("alias", [full, short]) => {
                let unit = self.directive_unit(node, *full, &env)?;
                let AstNode::Atom(short) = self.arena.get(*short) else {
                    return Err(self.malformed(node, "alias name must be a module name"));
                };
                Ok(env.derive(EnvAdditions::new().alias(short.clone(), unit, meta.context.clone())))
            }
            ("require" | "import" | "alias", _) => {
                Err(self.malformed(node, "unexpected arguments to directive"))
            }
            ("=", [pattern, _]) => {
                let additions = collect_variables(&self.arena, *pattern)
                    .into_iter()
                    .fold(EnvAdditions::new(), EnvAdditions::bind);
                Ok(env.derive(additions))
            }
            _ => Ok(env),
        }
    }

    /// Expands one form without concluding; used by the unit driver, which
    /// concludes once after the last form.
    pub(crate) fn expand_form(
        &mut self,
        node: NodeId,
        env: &Environment,
    ) -> Result<NodeId, ExpansionError> {
        let expanded = self.expand_node(node, env);
        self.settle(expanded)
    }

    pub(crate) fn into_output(self) -> ExpanderOutput {
        ExpanderOutput {
            arena: self.arena,
            registry: self.registry,
            functions: self.functions,
            trace: self.trace,
            warnings: self.warnings,
        }
    }
}

// ============================================================================
// TRAVERSAL
// ============================================================================

impl<'a> Expander<'a> {
    fn expand_node(&mut self, id: NodeId, env: &Environment) -> Result<NodeId, ExpansionError> {
        let frames_before = self.frames.len();
        let nesting_before = self.nesting.len();
        let result = self.rewrite_position(id, env);
        self.frames.truncate(frames_before);
        self.nesting.truncate(nesting_before);
        result
    }

    // Rewrites the call at this position until it is no longer a macro call,
    // then descends into its children.
    fn rewrite_position(&mut self, id: NodeId, env: &Environment) -> Result<NodeId, ExpansionError> {
        let depth = self.depth_of(id);
        let mut current = id;
        let mut steps = 0usize;
        let mut mark = None;
        loop {
            self.transition(ExpansionState::Scanning);
            let Some((definition, provenance)) = self.lookup_call(current, env)? else {
                break;
            };
            self.transition(ExpansionState::MacroCallDetected);
            if depth >= self.config.max_expansion_depth {
                return Err(ExpansionError::InfiniteExpansion {
                    site: self.call_site(current),
                    limit: self.config.max_expansion_depth,
                });
            }
            steps += 1;
            if steps > self.config.max_expansions_per_node {
                return Err(ExpansionError::InfiniteExpansion {
                    site: self.call_site(id),
                    limit: self.config.max_expansions_per_node,
                });
            }
            if mark.is_none() {
                mark = Some(self.arena.len());
            }
            current = self.invoke(current, env, definition, provenance)?;
        }
        if let Some(mark) = mark {
            self.nesting.push(mark);
        }
        self.expand_children(current, env)
    }

    fn expand_children(&mut self, id: NodeId, env: &Environment) -> Result<NodeId, ExpansionError> {
        let AstNode::Call {
            target, meta, args, ..
        } = self.arena.get(id).clone()
        else {
            return Ok(id);
        };

        match target.as_str() {
            QUOTE | "require" | "import" | "alias" => Ok(id),
            UNQUOTE => Err(expand_err!(
                InvalidSplice,
                self.call_site(id),
                "`unquote` used outside of a quote"
            )),
            UNHYGIENIC => self.expand_override(id, env),
            DEFMACRO | DEFMACROP => Err(self.malformed(
                id,
                "macro definitions are only allowed at the top level of a unit",
            )),
            BLOCK => {
                let items = self.expand_sequence(&args, env)?;
                Ok(self.rebuild(id, &target, &meta, &args, items))
            }
            "def" | "defp" => self.expand_function(id, env),
            "=" if args.len() == 2 => {
                let pattern = self.rewrite_pattern(args[0], env)?;
                let value = self.expand_node(args[1], env)?;
                Ok(self.rebuild(id, &target, &meta, &args, vec![pattern, value]))
            }
            _ => {
                let mut expanded = Vec::with_capacity(args.len());
                for arg in &args {
                    expanded.push(self.expand_node(*arg, env)?);
                }
                self.defer_function_check(id, env);
                Ok(self.rebuild(id, &target, &meta, &args, expanded))
            }
        }
    }

    // Expands block items in order, threading the environment through them.
    fn expand_sequence(&mut self, items: &[NodeId], env: &Environment) -> Result<Vec<NodeId>, ExpansionError> {
        let mut scope = env.clone();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let expanded = self.expand_node(*item, &scope)?;
            scope = self.scope_after(&scope, expanded)?;
            out.push(expanded);
        }
        Ok(out)
    }

    // `def(name(params)) { body }`: parameters are bound in the body.
    fn expand_function(&mut self, id: NodeId, env: &Environment) -> Result<NodeId, ExpansionError> {
        let AstNode::Call {
            target, meta, args, ..
        } = self.arena.get(id).clone()
        else {
            return Ok(id);
        };
        let Some(head) = args.first().copied() else {
            return Err(self.malformed(id, "function definition needs a head such as `name(a, b)`"));
        };
        if self.arena.as_call(head).is_none() {
            return Err(self.malformed(id, "function head must be a call such as `name(a, b)`"));
        }
        let head = self.rewrite_pattern(head, env)?;
        let params = self.arena.as_call(head).map(|(_, params)| params.to_vec()).unwrap_or_default();
        let additions = params
            .iter()
            .flat_map(|param| collect_variables(&self.arena, *param))
            .fold(EnvAdditions::new(), EnvAdditions::bind);
        let body_env = env.derive(additions);

        let mut expanded = vec![head];
        for body in &args[1..] {
            expanded.push(self.expand_node(*body, &body_env)?);
        }
        Ok(self.rebuild(id, &target, &meta, &args, expanded))
    }

    // Patterns are not expanded, but `var!` inside them still applies.
    fn rewrite_pattern(&mut self, id: NodeId, env: &Environment) -> Result<NodeId, ExpansionError> {
        let AstNode::Call {
            target, meta, args, ..
        } = self.arena.get(id).clone()
        else {
            return Ok(id);
        };
        if target == UNHYGIENIC {
            return self.expand_override(id, env);
        }
        if target == QUOTE {
            return Ok(id);
        }
        let mut rewritten = Vec::with_capacity(args.len());
        for arg in &args {
            rewritten.push(self.rewrite_pattern(*arg, env)?);
        }
        Ok(self.rebuild(id, &target, &meta, &args, rewritten))
    }

    // `var!(v)`: `v` takes the context of the code that invoked the template
    // which wrote this `var!`.
    fn expand_override(&mut self, id: NodeId, env: &Environment) -> Result<NodeId, ExpansionError> {
        let site = self.call_site(id);
        let args = self.arena.get(id).children().to_vec();
        let [variable] = args.as_slice() else {
            return Err(expand_err!(
                InvalidSplice,
                site,
                "`var!` takes exactly one variable"
            ));
        };
        let env = env.in_context(self.invocation_context_of(id));
        unhygienic(&mut self.arena, *variable, &env, &site)
    }

    fn rebuild(
        &mut self,
        id: NodeId,
        target: &str,
        meta: &CallMeta,
        old: &[NodeId],
        new: Vec<NodeId>,
    ) -> NodeId {
        if old == new.as_slice() {
            id
        } else {
            self.arena.call(target, meta.clone(), new)
        }
    }
}

// ============================================================================
// INVOCATION AND LOOKUP
// ============================================================================

impl<'a> Expander<'a> {
    fn lookup_call(
        &self,
        id: NodeId,
        env: &Environment,
    ) -> Result<Option<(Arc<MacroDefinition>, MacroProvenance)>, ExpansionError> {
        let AstNode::Call {
            target,
            arity,
            meta,
            ..
        } = self.arena.get(id)
        else {
            return Ok(None);
        };
        if SPECIAL_FORMS.contains(&target.as_str()) {
            return Ok(None);
        }
        let at = meta.position.unwrap_or(self.position);
        let env = env.in_context(self.context_of(id));
        let site = self.call_site(id);
        match self.lookup_named(target, *arity, at, &env, &site)? {
            Lookup::Found {
                definition,
                provenance,
            } => Ok(Some((definition, provenance))),
            Lookup::NotFound => Ok(None),
        }
    }

    fn lookup_named(
        &self,
        name: &str,
        arity: usize,
        at: u32,
        env: &Environment,
        site: &CallSite,
    ) -> Result<Lookup, ExpansionError> {
        let scope = LookupScope {
            env,
            catalog: self.catalog,
            policy: self.config.ambiguity,
        };
        trace!(name, arity, at, unit = %self.unit, "macro lookup");
        self.registry
            .lookup(name, arity, at, scope)
            .map_err(|err| match err {
                LookupError::NotRequired(module) => ExpansionError::ModuleNotRequired {
                    site: site.clone(),
                    module,
                },
                LookupError::Ambiguous(units) => ExpansionError::AmbiguousMacro {
                    site: site.clone(),
                    candidates: UnitList(units),
                },
            })
    }

    fn invoke(
        &mut self,
        id: NodeId,
        env: &Environment,
        definition: Arc<MacroDefinition>,
        provenance: MacroProvenance,
    ) -> Result<NodeId, ExpansionError> {
        let site = self.call_site(id);
        let args = self.arena.get(id).children().to_vec();
        let invocation_context = self.context_of(id);
        let call_env = env.in_context(invocation_context.clone()).at_line(site.line);
        let boundary = self.arena.len();
        self.transition(ExpansionState::Invoking);

        let (result, template_context) = match &definition.body {
            MacroBody::Native(body) => {
                let mut call = MacroCall::new(
                    &mut self.arena,
                    &mut self.tagger,
                    &call_env,
                    &definition.unit,
                    args,
                    site.clone(),
                );
                let result = body(&mut call);
                let context = call
                    .last_context()
                    .cloned()
                    .or_else(|| invocation_context.clone());
                (result, context)
            }
            MacroBody::Template(template) => {
                let root = self.arena.import(&template.body);
                let (captured, tag) = capture(&mut self.arena, &mut self.tagger, root, &definition.unit);
                let bindings: Bindings = template.params.iter().cloned().zip(args).collect();
                (splice(&mut self.arena, captured, &bindings, &site), Some(tag))
            }
        };
        let output = result?;

        debug!(
            macro_name = %definition.name,
            arity = definition.arity,
            unit = %self.unit,
            line = site.line,
            provenance = ?provenance,
            "expanded macro call"
        );
        self.trace.push(MacroExpansionStep {
            macro_name: definition.name.clone(),
            arity: definition.arity,
            provenance,
            line: site.line,
            input: id,
            output,
        });
        self.frames.push(OriginFrame {
            site,
            boundary,
            template_context,
            invocation_context,
        });
        self.transition(ExpansionState::Substituted);
        Ok(output)
    }

    // Records a non-macro call for resolution when the unit concludes.
    fn defer_function_check(&mut self, id: NodeId, env: &Environment) {
        let site = self.call_site(id);
        let env = env.in_context(self.context_of(id));
        self.pending.push(PendingCall { site, env });
    }

    fn directive_unit(&self, directive: NodeId, module: NodeId, env: &Environment) -> Result<UnitId, ExpansionError> {
        let AstNode::Atom(name) = self.arena.get(module) else {
            return Err(self.malformed(directive, "expected a module name"));
        };
        if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(self.malformed(directive, "expected a module name"));
        }
        let context = match self.arena.get(directive) {
            AstNode::Call { meta, .. } => meta.context.clone(),
            _ => None,
        };
        Ok(env.in_context(context).resolve_alias(name))
    }

    // `only(:name, arity, ...)`
    fn import_filter(&self, directive: NodeId, only: NodeId) -> Result<ImportFilter, ExpansionError> {
        let Some(("only", pairs)) = self.arena.as_call(only) else {
            return Err(self.malformed(directive, "expected `only(:name, arity, ...)`"));
        };
        if pairs.len() % 2 != 0 {
            return Err(self.malformed(directive, "`only` takes name/arity pairs"));
        }
        let mut names = im::OrdSet::new();
        for pair in pairs.chunks(2) {
            let (AstNode::Atom(name), AstNode::Literal(crate::ast::Literal::Integer(arity))) =
                (self.arena.get(pair[0]), self.arena.get(pair[1]))
            else {
                return Err(self.malformed(directive, "`only` takes name/arity pairs"));
            };
            let Ok(arity) = usize::try_from(*arity) else {
                return Err(self.malformed(directive, "arity must not be negative"));
            };
            names.insert((name.clone(), arity));
        }
        Ok(ImportFilter::Only(names))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

impl<'a> Expander<'a> {
    // The innermost invocation that created `id`; `None` for caller-written code.
    fn origin_of(&self, id: NodeId) -> Option<&OriginFrame> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.boundary <= id.index())
    }

    fn context_of(&self, id: NodeId) -> Option<ContextTag> {
        self.origin_of(id)
            .and_then(|frame| frame.template_context.clone())
    }

    fn invocation_context_of(&self, id: NodeId) -> Option<ContextTag> {
        self.origin_of(id)
            .and_then(|frame| frame.invocation_context.clone())
    }

    // How many rewritten positions on the current path created `id`.
    fn depth_of(&self, id: NodeId) -> usize {
        self.nesting.partition_point(|mark| *mark <= id.index())
    }

    // Template-written nodes report the site of the invocation that wrote
    // them, which was itself resolved to a user-written call.
    fn call_site(&self, id: NodeId) -> CallSite {
        let (name, arity) = match self.arena.get(id) {
            AstNode::Call { target, arity, .. } => (target.clone(), *arity),
            _ => (self.arena.pretty(id), 0),
        };
        let site = CallSite::new(
            self.unit.clone(),
            Arc::clone(&self.file),
            self.arena.line_of(id),
            name,
            arity,
        );
        match self.origin_of(id) {
            Some(origin) => site.located_at(&origin.site),
            None => site,
        }
    }

    fn malformed(&self, id: NodeId, message: &str) -> ExpansionError {
        expand_err!(MalformedDefinition, self.call_site(id), message)
    }

    fn transition(&mut self, next: ExpansionState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "expander state");
            self.state = next;
        }
    }

    fn settle<T>(&mut self, result: Result<T, ExpansionError>) -> Result<T, ExpansionError> {
        if let Err(err) = &result {
            self.transition(ExpansionState::Failed(err.kind()));
        }
        result
    }
}

/// Variables bound by a pattern, with their tags.
fn collect_variables(arena: &AstArena, pattern: NodeId) -> Vec<BoundVariable> {
    let mut found = Vec::new();
    let mut pending = vec![pattern];
    while let Some(id) = pending.pop() {
        match arena.get(id) {
            AstNode::Variable { name, context } => {
                found.push(BoundVariable::new(name.clone(), context.clone()))
            }
            AstNode::Call { target, args, .. } if target != QUOTE => pending.extend(args.iter().rev()),
            _ => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::resolve::StandardResolver;
    use crate::syntax::parse_program;

    struct Fixture {
        catalog: Catalog,
        resolver: StandardResolver,
        config: ExpanderConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let config = ExpanderConfig::default();
            Self {
                catalog: Catalog::new(),
                resolver: StandardResolver::from_config(&config).unwrap(),
                config,
            }
        }

        fn expander(&self, source: &str) -> (Expander<'_>, Vec<NodeId>) {
            let (arena, forms) = parse_program(source, "t.gly").unwrap();
            let expander = Expander::new(
                UnitId::new("T"),
                "t.gly",
                arena,
                &self.catalog,
                &self.resolver,
                &self.config,
            );
            (expander, forms)
        }
    }

    fn env() -> Environment {
        Environment::new(UnitId::new("T"), "t.gly")
    }

    #[test]
    fn expand_once_does_not_visit_children() {
        let fixture = Fixture::new();
        let (mut expander, forms) = fixture.expander(
            "defmacro(twice(x)) { quote { list(unquote(x), unquote(x)) } }\ntwice(twice(1))",
        );
        expander.set_location(0, 1);
        expander.define_template(forms[0]).unwrap();
        expander.set_location(1, 2);

        let step = expander.expand_once(forms[1], &env()).unwrap();
        let ExpansionStep::Expanded { node, macro_name, .. } = step else {
            panic!("expected an expansion");
        };
        assert_eq!(macro_name, "twice");
        assert_eq!(expander.arena().pretty(node), "list(twice(1), twice(1))");

        let again = expander.expand_once(node, &env()).unwrap();
        assert!(matches!(again, ExpansionStep::Unchanged(n) if n == node));
    }

    #[test]
    fn stepping_keeps_the_origin_of_template_code() {
        let source = "\
defmacro(reset()) { quote { var!(v) = 0 } }
defmacro(reset_inside()) { quote { reset() } }
reset_inside()";
        let fixture = Fixture::new();

        let (mut direct, forms) = fixture.expander(source);
        direct.define_template(forms[0]).unwrap();
        direct.set_location(1, 2);
        direct.define_template(forms[1]).unwrap();
        direct.set_location(2, 3);
        let out = direct.expand_fully(forms[2], &env()).unwrap();
        let expected = direct.arena().pretty_tagged(out);

        let (mut stepped, forms) = fixture.expander(source);
        stepped.define_template(forms[0]).unwrap();
        stepped.set_location(1, 2);
        stepped.define_template(forms[1]).unwrap();
        stepped.set_location(2, 3);
        let inner = stepped.expand_once(forms[2], &env()).unwrap().node();
        let out = stepped.expand_fully(inner, &env()).unwrap();

        // `var!` lands in `reset_inside`'s context, so the variable is tagged.
        assert_eq!(stepped.arena().pretty_tagged(out), expected);
        assert_ne!(stepped.arena().pretty(out), expected);
    }

    #[test]
    fn expand_fully_reaches_the_fixed_point() {
        let fixture = Fixture::new();
        let (mut expander, forms) = fixture.expander(
            "defmacro(twice(x)) { quote { list(unquote(x), unquote(x)) } }\ntwice(twice(1))",
        );
        expander.define_template(forms[0]).unwrap();
        expander.set_location(1, 2);
        let out = expander.expand_fully(forms[1], &env()).unwrap();
        assert_eq!(
            expander.arena().pretty(out),
            "list(list(1, 1), list(1, 1))"
        );
        assert_eq!(expander.state(), ExpansionState::Done);
        assert_eq!(expander.trace().len(), 3);
        assert_eq!(expander.expand_fully(out, &env()).unwrap(), out);
    }

    #[test]
    fn self_reproducing_macro_hits_the_per_node_bound() {
        let fixture = Fixture::new();
        let (mut expander, forms) =
            fixture.expander("defmacro(again()) { quote { again() } }\nagain()");
        expander.define_template(forms[0]).unwrap();
        expander.set_location(1, 2);
        let err = expander.expand_fully(forms[1], &env()).unwrap_err();
        assert!(matches!(err, ExpansionError::InfiniteExpansion { limit: 100, .. }));
        assert_eq!(expander.state(), ExpansionState::Failed(ErrorKind::InfiniteExpansion));
    }

    #[test]
    fn nesting_macro_hits_the_depth_bound() {
        let fixture = Fixture::new();
        let (mut expander, forms) =
            fixture.expander("defmacro(deeper(x)) { quote { list(deeper(unquote(x))) } }\ndeeper(1)");
        expander.define_template(forms[0]).unwrap();
        expander.set_location(1, 2);
        let err = expander.expand_fully(forms[1], &env()).unwrap_err();
        assert!(matches!(err, ExpansionError::InfiniteExpansion { limit: 128, .. }));
        assert_eq!(err.site().unwrap().line, 2);
    }

    #[test]
    fn resolve_macro_reports_undefined_macros() {
        let fixture = Fixture::new();
        let (expander, _) = fixture.expander("nil");
        let err = expander.resolve_macro("nope", 1, &env()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedMacro);
    }

    #[test]
    fn unquote_outside_quote_is_invalid_splice() {
        let fixture = Fixture::new();
        let (mut expander, forms) = fixture.expander("print(unquote(x))");
        let err = expander.expand_fully(forms[0], &env()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSplice);
    }

    #[test]
    fn block_directives_scope_to_following_siblings() {
        let fixture = Fixture::new();
        let (expander, forms) = fixture.expander("{ alias(Math.Ops, O); v = 1 }");
        let (_, items) = expander.arena().as_call(forms[0]).unwrap();
        let items = items.to_vec();
        let after_alias = expander.scope_after(&env(), items[0]).unwrap();
        assert_eq!(after_alias.resolve_alias("O"), UnitId::new("Math.Ops"));
        let after_bind = expander.scope_after(&after_alias, items[1]).unwrap();
        assert!(after_bind.is_bound("v", None));
        assert!(!after_alias.is_bound("v", None));
    }
}
