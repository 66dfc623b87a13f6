//! Compilation units: what enters expansion and what leaves it.
//!
//! A unit is an ordered list of items. The index of an item is its source
//! position, which is what define-before-use is measured against. Expansion
//! of a unit either yields an [`ExpandedUnit`] or fails as a whole; nothing
//! of a failed unit reaches the [`Catalog`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span};

use crate::ast::{AstArena, AstNode, NodeId, UnitId};
use crate::config::ExpanderConfig;
use crate::diagnostics::{DiagnosticRecord, Warning};
use crate::environment::Environment;
use crate::macros::definition::{is_macro_definition, MacroBody, MacroDefinition, MacroFn, Visibility};
use crate::macros::expander::{Expander, MacroExpansionStep};
use crate::macros::quoting::MacroCall;
use crate::macros::resolve::FunctionResolver;
use crate::syntax::parse_program;
use crate::ExpansionError;

// ============================================================================
// INTERFACES AND CATALOG
// ============================================================================

/// What an expanded unit offers to the units that require it.
#[derive(Debug, Clone)]
pub struct UnitInterface {
    unit: UnitId,
    macros: im::HashMap<(String, usize), Arc<MacroDefinition>>,
    functions: im::HashSet<(String, usize)>,
}

impl UnitInterface {
    /// Private macros are dropped here if any are passed in.
    pub fn new(
        unit: UnitId,
        macros: im::HashMap<(String, usize), Arc<MacroDefinition>>,
        functions: im::HashSet<(String, usize)>,
    ) -> Self {
        let macros = macros
            .into_iter()
            .filter(|(_, definition)| definition.is_public())
            .collect();
        Self {
            unit,
            macros,
            functions,
        }
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn macro_named(&self, name: &str, arity: usize) -> Option<&Arc<MacroDefinition>> {
        self.macros.get(&(name.to_string(), arity))
    }

    pub fn exports_function(&self, name: &str, arity: usize) -> bool {
        self.functions.contains(&(name.to_string(), arity))
    }

    /// Exported names, sorted, for display and serialization.
    pub fn summary(&self) -> InterfaceSummary {
        let mut macros: Vec<_> = self.macros.keys().cloned().collect();
        macros.sort();
        let mut functions: Vec<_> = self.functions.iter().cloned().collect();
        functions.sort();
        InterfaceSummary {
            unit: self.unit.clone(),
            macros,
            functions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSummary {
    pub unit: UnitId,
    pub macros: Vec<(String, usize)>,
    pub functions: Vec<(String, usize)>,
}

/// Interfaces of every unit expanded so far.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    units: im::HashMap<UnitId, Arc<UnitInterface>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, interface: Arc<UnitInterface>) -> Self {
        self.insert(interface);
        self
    }

    pub fn insert(&mut self, interface: Arc<UnitInterface>) {
        self.units.insert(interface.unit().clone(), interface);
    }

    pub fn get(&self, unit: &UnitId) -> Option<&Arc<UnitInterface>> {
        self.units.get(unit)
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.units.contains_key(unit)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn exported_macro(&self, unit: &UnitId, name: &str, arity: usize) -> Option<Arc<MacroDefinition>> {
        self.get(unit)
            .and_then(|interface| interface.macro_named(name, arity))
            .cloned()
    }

    pub fn exports_function(&self, unit: &UnitId, name: &str, arity: usize) -> bool {
        self.get(unit)
            .is_some_and(|interface| interface.exports_function(name, arity))
    }
}

// ============================================================================
// COMPILATION UNITS
// ============================================================================

/// A macro implemented by host code.
#[derive(Clone)]
pub struct NativeMacro {
    pub name: String,
    pub arity: usize,
    pub visibility: Visibility,
    pub body: MacroFn,
    pub line: u32,
}

impl std::fmt::Debug for NativeMacro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeMacro")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("visibility", &self.visibility)
            .field("line", &self.line)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum UnitItem {
    Form(NodeId),
    NativeMacro(NativeMacro),
}

#[derive(Debug, Clone)]
pub struct CompilationUnit {
    id: UnitId,
    file: Arc<str>,
    arena: AstArena,
    items: Vec<UnitItem>,
}

impl CompilationUnit {
    pub fn new(id: impl Into<UnitId>, file: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            file: file.into(),
            arena: AstArena::new(),
            items: Vec::new(),
        }
    }

    /// Reads `source`; every top-level form becomes an item.
    pub fn parse(
        id: impl Into<UnitId>,
        file: impl Into<Arc<str>>,
        source: &str,
    ) -> Result<Self, ExpansionError> {
        let file = file.into();
        let (arena, forms) = parse_program(source, Arc::clone(&file))?;
        Ok(Self {
            id: id.into(),
            file,
            arena,
            items: forms.into_iter().map(UnitItem::Form).collect(),
        })
    }

    /// Appends a host-defined macro at the next source position.
    pub fn with_native_macro<F>(
        mut self,
        name: impl Into<String>,
        arity: usize,
        visibility: Visibility,
        body: F,
    ) -> Self
    where
        F: Fn(&mut MacroCall<'_>) -> Result<NodeId, ExpansionError> + Send + Sync + 'static,
    {
        let line = self
            .items
            .iter()
            .rev()
            .find_map(|item| match item {
                UnitItem::Form(id) => Some(self.arena.line_of(*id)),
                UnitItem::NativeMacro(native) => Some(native.line),
            })
            .unwrap_or(0);
        self.items.push(UnitItem::NativeMacro(NativeMacro {
            name: name.into(),
            arity,
            visibility,
            body: Arc::new(body),
            line,
        }));
        self
    }

    /// Appends more source at the following positions.
    pub fn with_source(mut self, source: &str) -> Result<Self, ExpansionError> {
        let (arena, forms) = parse_program(source, Arc::clone(&self.file))?;
        for form in forms {
            let copied = self.arena.copy_subtree(&arena, form);
            self.items.push(UnitItem::Form(copied));
        }
        Ok(self)
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn file(&self) -> &Arc<str> {
        &self.file
    }

    pub fn arena(&self) -> &AstArena {
        &self.arena
    }

    pub fn items(&self) -> &[UnitItem] {
        &self.items
    }

    /// Units named by top-level `require`/`import` forms, after aliases seen so far.
    ///
    /// Directives produced by macros are not visible here.
    pub fn requires(&self) -> Vec<UnitId> {
        let mut env = Environment::new(self.id.clone(), Arc::clone(&self.file));
        let mut found = Vec::new();
        for item in &self.items {
            let UnitItem::Form(id) = item else { continue };
            let Some((target, args)) = self.arena.as_call(*id) else { continue };
            let Some(AstNode::Atom(module)) = args.first().map(|a| self.arena.get(*a)) else {
                continue;
            };
            let unit = env.resolve_alias(module);
            match (target, args.len()) {
                ("require" | "import", _) => {
                    if !found.contains(&unit) {
                        found.push(unit);
                    }
                }
                ("alias", 1) => {
                    let short = unit.as_str().rsplit('.').next().unwrap_or(unit.as_str()).to_string();
                    env = env.alias(short, unit);
                }
                ("alias", 2) => {
                    if let AstNode::Atom(short) = self.arena.get(args[1]) {
                        env = env.alias(short.clone(), unit);
                    }
                }
                _ => {}
            }
        }
        found
    }
}

// ============================================================================
// EXPANSION
// ============================================================================

/// A fully expanded unit.
#[derive(Debug, Clone)]
pub struct ExpandedUnit {
    pub unit: UnitId,
    pub file: Arc<str>,
    pub arena: AstArena,
    /// Top-level forms in order; macro definitions are gone.
    pub forms: Vec<NodeId>,
    pub interface: Arc<UnitInterface>,
    pub warnings: Vec<Warning>,
    pub trace: Vec<MacroExpansionStep>,
}

impl ExpandedUnit {
    /// Forms pretty-printed one per line.
    pub fn pretty(&self) -> String {
        self.forms
            .iter()
            .map(|form| self.arena.pretty(*form))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn warning_records(&self) -> Vec<DiagnosticRecord> {
        self.warnings.iter().map(Warning::record).collect()
    }
}

/// Expands every item of `unit` in order.
///
/// Macro definitions register at their position and are removed; other
/// forms are expanded to a fixed point and kept. Function calls are
/// resolved once the last form has been expanded.
pub fn expand_unit(
    unit: &CompilationUnit,
    catalog: &Catalog,
    resolver: &dyn FunctionResolver,
    config: &ExpanderConfig,
) -> Result<ExpandedUnit, ExpansionError> {
    let span = info_span!("expand_unit", unit = %unit.id, file = %unit.file);
    let _guard = span.enter();

    let mut expander = Expander::new(
        unit.id.clone(),
        Arc::clone(&unit.file),
        unit.arena.clone(),
        catalog,
        resolver,
        config,
    );
    let mut env = Environment::new(unit.id.clone(), Arc::clone(&unit.file));
    let mut forms = Vec::with_capacity(unit.items.len());

    for (position, item) in unit.items.iter().enumerate() {
        let position = u32::try_from(position).unwrap_or(u32::MAX);
        match item {
            UnitItem::NativeMacro(native) => {
                expander.set_location(position, native.line);
                expander.define_macro(
                    native.name.clone(),
                    native.arity,
                    native.visibility,
                    MacroBody::Native(Arc::clone(&native.body)),
                )?;
            }
            UnitItem::Form(form) => {
                let line = expander.arena().line_of(*form);
                expander.set_location(position, line);
                if is_macro_definition(expander.arena(), *form) {
                    expander.define_template(*form)?;
                    continue;
                }
                let expanded = expander.expand_form(*form, &env.at_line(line))?;
                env = expander.scope_after(&env, expanded)?;
                declare_function(&mut expander, expanded);
                forms.push(expanded);
            }
        }
    }
    expander.conclude()?;

    let output = expander.into_output();
    let interface = Arc::new(UnitInterface::new(
        unit.id.clone(),
        output.registry.exports(),
        output.functions.public().cloned().collect(),
    ));
    info!(
        forms = forms.len(),
        macros = output.registry.len(),
        expansions = output.trace.len(),
        warnings = output.warnings.len(),
        "unit expanded"
    );
    Ok(ExpandedUnit {
        unit: unit.id.clone(),
        file: Arc::clone(&unit.file),
        arena: output.arena,
        forms,
        interface,
        warnings: output.warnings,
        trace: output.trace,
    })
}

// `def(name(params)) { .. }` and `defp(..)` at the top level.
fn declare_function(expander: &mut Expander<'_>, form: NodeId) {
    let arena = expander.arena();
    let Some((keyword @ ("def" | "defp"), args)) = arena.as_call(form) else {
        return;
    };
    let public = keyword == "def";
    let Some((name, params)) = args.first().and_then(|head| arena.as_call(*head)) else {
        return;
    };
    let (name, arity) = (name.to_string(), params.len());
    debug!(name = %name, arity, public, "declared function");
    expander.declare_function(&name, arity, public);
}
