//! Compile-time environment snapshots.
//!
//! An [`Environment`] describes the scope at one point of a unit: where we
//! are (unit, file, line), which variables are bound (name plus context tag),
//! which units were required or imported and which aliases are in effect.
//!
//! Environments are values. Every operation returns a new child and leaves
//! the parent untouched; the `im` collections make those copies share
//! structure, so deriving per block or per call site is cheap. Transformation
//! bodies only ever see `&Environment`, whose accessors are read-only.

use std::sync::Arc;

use im::{HashMap, HashSet, OrdMap, OrdSet, Vector};
use serde::Serialize;

use crate::ast::{ContextTag, UnitId};

/// A bound variable: two variables denote the same binding iff name and tag match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BoundVariable {
    pub name: String,
    pub context: Option<ContextTag>,
}

impl BoundVariable {
    pub fn new(name: impl Into<String>, context: Option<ContextTag>) -> Self {
        Self {
            name: name.into(),
            context,
        }
    }
}

/// Which names an `import` exposes for unqualified lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImportFilter {
    All,
    Only(OrdSet<(String, usize)>),
}

impl ImportFilter {
    pub fn allows(&self, name: &str, arity: usize) -> bool {
        match self {
            ImportFilter::All => true,
            ImportFilter::Only(names) => names.contains(&(name.to_string(), arity)),
        }
    }
}

/// Local additions layered onto a parent environment by [`Environment::derive`].
#[derive(Debug, Clone, Default)]
pub struct EnvAdditions {
    variables: Vec<BoundVariable>,
    requires: Vec<UnitId>,
    imports: Vec<(UnitId, ImportFilter)>,
    aliases: Vec<(AliasKey, UnitId)>,
    line: Option<u32>,
}

impl EnvAdditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, variable: BoundVariable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn require(mut self, unit: UnitId) -> Self {
        self.requires.push(unit);
        self
    }

    pub fn import(mut self, unit: UnitId, filter: ImportFilter) -> Self {
        self.imports.push((unit, filter));
        self
    }

    /// Adds an alias; a tagged alias is only seen by code carrying the same tag.
    pub fn alias(
        mut self,
        short: impl Into<String>,
        unit: UnitId,
        context: Option<ContextTag>,
    ) -> Self {
        self.aliases.push((AliasKey::new(short, context), unit));
        self
    }

    pub fn line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// An alias name together with the context of the directive that introduced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AliasKey {
    pub short: String,
    pub context: Option<ContextTag>,
}

impl AliasKey {
    pub fn new(short: impl Into<String>, context: Option<ContextTag>) -> Self {
        Self {
            short: short.into(),
            context,
        }
    }
}

/// Immutable snapshot of compile-time scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    unit: UnitId,
    file: Arc<str>,
    line: u32,
    context: Option<ContextTag>,
    variables: HashSet<BoundVariable>,
    requires: Vector<UnitId>,
    imports: OrdMap<UnitId, ImportFilter>,
    aliases: HashMap<AliasKey, UnitId>,
}

/// Serializable copy of everything the introspection accessors expose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentInfo {
    pub unit: UnitId,
    pub file: String,
    pub line: u32,
    pub context: Option<ContextTag>,
    pub variables: Vec<BoundVariable>,
    pub requires: Vec<UnitId>,
    pub imports: Vec<(UnitId, ImportFilter)>,
    pub aliases: Vec<(AliasKey, UnitId)>,
}

impl Environment {
    /// Root environment of a unit: nothing bound, nothing required.
    pub fn new(unit: UnitId, file: impl Into<Arc<str>>) -> Self {
        Self {
            unit,
            file: file.into(),
            line: 0,
            context: None,
            variables: HashSet::new(),
            requires: Vector::new(),
            imports: OrdMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Returns a child environment with `additions` layered on top.
    pub fn derive(&self, additions: EnvAdditions) -> Self {
        let mut child = self.clone();
        for variable in additions.variables {
            child.variables.insert(variable);
        }
        for unit in additions.requires {
            child.add_require(unit);
        }
        for (unit, filter) in additions.imports {
            child.add_require(unit.clone());
            child.imports.insert(unit, filter);
        }
        for (short, unit) in additions.aliases {
            child.aliases.insert(short, unit);
        }
        if let Some(line) = additions.line {
            child.line = line;
        }
        child
    }

    /// Returns a child environment in which `unit` is required.
    pub fn require_unit(&self, unit: UnitId) -> Self {
        self.derive(EnvAdditions::new().require(unit))
    }

    /// Returns a child environment that imports (and therefore requires) `unit`.
    pub fn import_unit(&self, unit: UnitId, filter: ImportFilter) -> Self {
        self.derive(EnvAdditions::new().import(unit, filter))
    }

    pub fn alias(&self, short: impl Into<String>, unit: UnitId) -> Self {
        self.derive(EnvAdditions::new().alias(short, unit, None))
    }

    pub fn bind(&self, variable: BoundVariable) -> Self {
        self.derive(EnvAdditions::new().bind(variable))
    }

    pub fn at_line(&self, line: u32) -> Self {
        if line == self.line || line == 0 {
            return self.clone();
        }
        self.derive(EnvAdditions::new().line(line))
    }

    /// Returns a child whose own code carries `context` (used by `var!`).
    pub fn in_context(&self, context: Option<ContextTag>) -> Self {
        let mut child = self.clone();
        child.context = context;
        child
    }

    fn add_require(&mut self, unit: UnitId) {
        if !self.requires.contains(&unit) {
            self.requires.push_back(unit);
        }
    }

    // ------------------------------------------------------------------------
    // Read-only introspection
    // ------------------------------------------------------------------------

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn file(&self) -> &Arc<str> {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// The tag carried by code written at this point; `None` for user code.
    pub fn context(&self) -> Option<&ContextTag> {
        self.context.as_ref()
    }

    pub fn variables(&self) -> impl Iterator<Item = &BoundVariable> {
        self.variables.iter()
    }

    pub fn is_bound(&self, name: &str, context: Option<&ContextTag>) -> bool {
        self.variables
            .contains(&BoundVariable::new(name, context.cloned()))
    }

    /// Required units in the order they were required.
    pub fn requires(&self) -> impl Iterator<Item = &UnitId> {
        self.requires.iter()
    }

    pub fn is_required(&self, unit: &UnitId) -> bool {
        unit == &self.unit || self.requires.contains(unit)
    }

    pub fn import_filter(&self, unit: &UnitId) -> Option<&ImportFilter> {
        self.imports.get(unit)
    }

    pub fn imports(&self) -> impl Iterator<Item = (&UnitId, &ImportFilter)> {
        self.imports.iter()
    }

    /// Resolves a short alias to its full unit name; unknown names resolve to themselves.
    ///
    /// Aliases introduced under this environment's context win over untagged ones.
    pub fn resolve_alias(&self, name: &str) -> UnitId {
        if let Some(context) = &self.context {
            let key = AliasKey::new(name, Some(context.clone()));
            if let Some(unit) = self.aliases.get(&key) {
                return unit.clone();
            }
        }
        self.aliases
            .get(&AliasKey::new(name, None))
            .cloned()
            .unwrap_or_else(|| UnitId::new(name))
    }

    /// A serializable copy of this environment, with sets in sorted order.
    pub fn info(&self) -> EnvironmentInfo {
        let mut variables: Vec<_> = self.variables.iter().cloned().collect();
        variables.sort();
        let mut aliases: Vec<_> = self
            .aliases
            .iter()
            .map(|(key, unit)| (key.clone(), unit.clone()))
            .collect();
        aliases.sort();
        EnvironmentInfo {
            unit: self.unit.clone(),
            file: self.file.to_string(),
            line: self.line,
            context: self.context.clone(),
            variables,
            requires: self.requires.iter().cloned().collect(),
            imports: self
                .imports
                .iter()
                .map(|(unit, filter)| (unit.clone(), filter.clone()))
                .collect(),
            aliases,
        }
    }
}
