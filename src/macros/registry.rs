//! Per-unit macro registry and cross-unit lookup.
//!
//! # Rules
//!
//! | Lookup            | Searched                                         | Failure            |
//! |-------------------|--------------------------------------------------|--------------------|
//! | `name(..)`        | local definitions with position < P, then public exports of required units (require order, `import only` filter) | `NotFound` / `Ambiguous` |
//! | `Mod.name(..)`    | the public exports of `Mod` (alias-resolved)     | `NotRequired`      |
//!
//! Private definitions are local only: they never enter [`MacroRegistry::exports`].
//! Registering the same (name, arity, visibility) twice supersedes the
//! earlier definition and produces a `DuplicateDefinition` warning.

use std::sync::Arc;

use tracing::trace;

use crate::ast::UnitId;
use crate::config::AmbiguityPolicy;
use crate::diagnostics::{CallSite, Warning};
use crate::environment::Environment;
use crate::macros::definition::MacroDefinition;
use crate::unit::Catalog;

/// Where a resolved macro came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroProvenance {
    Local,
    Required(UnitId),
}

#[derive(Debug, Clone)]
pub enum Lookup {
    Found {
        definition: Arc<MacroDefinition>,
        provenance: MacroProvenance,
    },
    NotFound,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found { .. })
    }
}

/// Lookups that find a macro but may not use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// A qualified call names a unit that exports the macro but was never required.
    NotRequired(UnitId),
    /// Several required units export the macro and the policy forbids picking one.
    Ambiguous(Vec<UnitId>),
}

/// What a lookup may see besides the local registry.
#[derive(Debug, Clone, Copy)]
pub struct LookupScope<'a> {
    pub env: &'a Environment,
    pub catalog: &'a Catalog,
    pub policy: AmbiguityPolicy,
}

/// Ordered catalogue of one unit's definitions.
#[derive(Debug, Clone)]
pub struct MacroRegistry {
    unit: UnitId,
    file: Arc<str>,
    definitions: Vec<Arc<MacroDefinition>>,
}

impl MacroRegistry {
    pub fn new(unit: UnitId, file: impl Into<Arc<str>>) -> Self {
        Self {
            unit,
            file: file.into(),
            definitions: Vec::new(),
        }
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MacroDefinition>> {
        self.definitions.iter()
    }

    /// Appends a definition; returns a warning when it supersedes an earlier one.
    pub fn register(&mut self, definition: MacroDefinition) -> Option<Warning> {
        let previous = self.definitions.iter().rev().find(|existing| {
            existing.key() == definition.key() && existing.visibility == definition.visibility
        });
        let warning = previous.map(|previous| {
            let site = CallSite::new(
                self.unit.clone(),
                Arc::clone(&self.file),
                definition.line,
                definition.name.clone(),
                definition.arity,
            );
            Warning::duplicate_definition(site, previous.line)
        });
        self.definitions.push(Arc::new(definition));
        warning
    }

    /// Nearest local definition registered strictly before `at`.
    pub fn lookup_local(&self, name: &str, arity: usize, at: u32) -> Option<&Arc<MacroDefinition>> {
        self.definitions
            .iter()
            .rev()
            .find(|def| def.position < at && def.name == name && def.arity == arity)
    }

    /// The latest public definition of each (name, arity).
    pub fn exports(&self) -> im::HashMap<(String, usize), Arc<MacroDefinition>> {
        let mut exports = im::HashMap::new();
        for def in self.definitions.iter().filter(|def| def.is_public()) {
            exports.insert((def.name.clone(), def.arity), Arc::clone(def));
        }
        exports
    }

    /// Resolves `name`/`arity` as seen from source position `at`.
    ///
    /// `name` may be qualified (`Mod.name`); the module part goes through the
    /// environment's aliases first.
    pub fn lookup(
        &self,
        name: &str,
        arity: usize,
        at: u32,
        scope: LookupScope<'_>,
    ) -> Result<Lookup, LookupError> {
        if let Some((module, local_name)) = split_qualified(name) {
            let unit = scope.env.resolve_alias(module);
            return self.lookup_qualified(&unit, local_name, arity, at, scope);
        }

        if let Some(definition) = self.lookup_local(name, arity, at) {
            trace!(name, arity, at, "resolved locally");
            return Ok(Lookup::Found {
                definition: Arc::clone(definition),
                provenance: MacroProvenance::Local,
            });
        }

        let mut candidates: Vec<(UnitId, Arc<MacroDefinition>)> = Vec::new();
        for unit in scope.env.requires() {
            let allowed = scope
                .env
                .import_filter(unit)
                .map_or(true, |filter| filter.allows(name, arity));
            if !allowed {
                continue;
            }
            if let Some(def) = scope.catalog.exported_macro(unit, name, arity) {
                candidates.push((unit.clone(), def));
            }
        }

        match candidates.len() {
            0 => Ok(Lookup::NotFound),
            1 => Ok(found_required(candidates.remove(0))),
            _ if scope.policy == AmbiguityPolicy::FirstRequired => {
                Ok(found_required(candidates.remove(0)))
            }
            _ => Err(LookupError::Ambiguous(
                candidates.into_iter().map(|(unit, _)| unit).collect(),
            )),
        }
    }

    fn lookup_qualified(
        &self,
        unit: &UnitId,
        name: &str,
        arity: usize,
        at: u32,
        scope: LookupScope<'_>,
    ) -> Result<Lookup, LookupError> {
        if unit == &self.unit {
            return Ok(self
                .lookup_local(name, arity, at)
                .map_or(Lookup::NotFound, |definition| Lookup::Found {
                    definition: Arc::clone(definition),
                    provenance: MacroProvenance::Local,
                }));
        }
        let Some(definition) = scope.catalog.exported_macro(unit, name, arity) else {
            return Ok(Lookup::NotFound);
        };
        if !scope.env.is_required(unit) {
            return Err(LookupError::NotRequired(unit.clone()));
        }
        trace!(%unit, name, arity, "resolved qualified macro");
        Ok(Lookup::Found {
            definition,
            provenance: MacroProvenance::Required(unit.clone()),
        })
    }
}

fn found_required((unit, definition): (UnitId, Arc<MacroDefinition>)) -> Lookup {
    Lookup::Found {
        definition,
        provenance: MacroProvenance::Required(unit),
    }
}

/// Splits `Math.Ops.double` into (`Math.Ops`, `double`); unqualified names give `None`.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let (module, local) = name.rsplit_once('.')?;
    if module.starts_with(|c: char| c.is_ascii_uppercase()) && !local.is_empty() {
        Some((module, local))
    } else {
        None
    }
}
