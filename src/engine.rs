use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{ConfigError, ExpanderConfig};
use crate::macros::resolve::{FunctionResolver, StandardResolver};
use crate::unit::{expand_unit, Catalog, CompilationUnit, ExpandedUnit};
use crate::{ast::UnitId, ExpansionError};

// ============================================================================
// SESSION - Expansion of many units against one catalog
// ============================================================================

/// Expands compilation units and accumulates their interfaces.
///
/// Each unit owns its registry while it expands; the only state shared
/// between units is the [`Catalog`] of finished interfaces, which a unit
/// reads but never writes.
pub struct Session {
    config: ExpanderConfig,
    resolver: Arc<dyn FunctionResolver>,
    catalog: Catalog,
}

impl Session {
    /// Creates a session using the [`StandardResolver`] for `config`.
    pub fn new(config: ExpanderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let resolver = StandardResolver::from_config(&config)?;
        Ok(Self {
            config,
            resolver: Arc::new(resolver),
            catalog: Catalog::new(),
        })
    }

    /// Replaces the function-call fallback.
    pub fn with_resolver(mut self, resolver: impl FunctionResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &ExpanderConfig {
        &self.config
    }

    /// Expands one unit; on success its interface joins the catalog.
    pub fn expand(&mut self, unit: &CompilationUnit) -> Result<ExpandedUnit, ExpansionError> {
        let expanded = expand_unit(unit, &self.catalog, self.resolver.as_ref(), &self.config)?;
        self.catalog.insert(Arc::clone(&expanded.interface));
        Ok(expanded)
    }

    /// Parses and expands source text as unit `id`, returning the pretty-printed forms.
    pub fn expand_source(&mut self, id: &str, file: &str, source: &str) -> Result<String, ExpansionError> {
        let unit = CompilationUnit::parse(id, file, source)?;
        Ok(self.expand(&unit)?.pretty())
    }

    /// Expands a batch of units, independent ones in parallel.
    ///
    /// Units run in waves: a unit is scheduled once every unit of the batch
    /// it requires has finished. Units caught in a require cycle run together
    /// in a final wave. Results are returned in input order; a failed unit
    /// only affects units that needed its macros.
    pub fn expand_all(&mut self, units: &[CompilationUnit]) -> Vec<Result<ExpandedUnit, ExpansionError>> {
        let batch: HashSet<&UnitId> = units.iter().map(CompilationUnit::id).collect();
        let dependencies: Vec<Vec<UnitId>> = units
            .iter()
            .map(|unit| {
                unit.requires()
                    .into_iter()
                    .filter(|dep| dep != unit.id() && batch.contains(dep))
                    .collect()
            })
            .collect();

        let mut results: Vec<Option<Result<ExpandedUnit, ExpansionError>>> =
            units.iter().map(|_| None).collect();
        let mut finished: HashSet<UnitId> = HashSet::new();

        loop {
            let remaining: Vec<usize> = (0..units.len()).filter(|i| results[*i].is_none()).collect();
            if remaining.is_empty() {
                break;
            }
            let mut wave: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|i| dependencies[*i].iter().all(|dep| finished.contains(dep)))
                .collect();
            if wave.is_empty() {
                let cycle: Vec<&str> = remaining.iter().map(|i| units[*i].id().as_str()).collect();
                warn!(units = ?cycle, "require cycle; expanding remaining units together");
                wave = remaining;
            }
            debug!(size = wave.len(), "expansion wave");

            for (index, outcome) in self.run_wave(units, &wave) {
                if let Ok(expanded) = &outcome {
                    self.catalog.insert(Arc::clone(&expanded.interface));
                }
                finished.insert(units[index].id().clone());
                results[index] = Some(outcome);
            }
        }

        let failed = results.iter().filter(|r| matches!(r, Some(Err(_)))).count();
        info!(units = units.len(), failed, "batch expanded");
        results.into_iter().flatten().collect()
    }

    fn run_wave(
        &self,
        units: &[CompilationUnit],
        wave: &[usize],
    ) -> Vec<(usize, Result<ExpandedUnit, ExpansionError>)> {
        let catalog = &self.catalog;
        let resolver = self.resolver.as_ref();
        let config = &self.config;
        std::thread::scope(|scope| {
            let handles: Vec<_> = wave
                .iter()
                .map(|&index| {
                    let unit = &units[index];
                    (index, scope.spawn(move || expand_unit(unit, catalog, resolver, config)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(index, handle)| match handle.join() {
                    Ok(outcome) => (index, outcome),
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}
