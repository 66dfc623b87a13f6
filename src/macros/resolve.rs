//! Function-call fallback.
//!
//! A call that does not resolve as a macro is an ordinary function call.
//! Whether such a call resolves is the surrounding compiler's business; the
//! expander only asks, through [`FunctionResolver`], once expansion of the
//! unit has concluded. [`StandardResolver`] answers from the unit's own
//! `def`/`defp` forms, the catalog of already-expanded units and a
//! configurable kernel list.

use std::collections::HashSet;

use crate::config::{ConfigError, ExpanderConfig};
use crate::environment::Environment;
use crate::macros::registry::split_qualified;
use crate::unit::Catalog;

/// Functions defined by the unit being expanded, in any source order.
#[derive(Debug, Clone, Default)]
pub struct LocalFunctions {
    public: HashSet<(String, usize)>,
    private: HashSet<(String, usize)>,
}

impl LocalFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, arity: usize, public: bool) {
        let key = (name.to_string(), arity);
        if public {
            self.public.insert(key);
        } else {
            self.private.insert(key);
        }
    }

    pub fn contains(&self, name: &str, arity: usize) -> bool {
        let key = (name.to_string(), arity);
        self.public.contains(&key) || self.private.contains(&key)
    }

    /// The `def` functions, which other units may call.
    pub fn public(&self) -> impl Iterator<Item = &(String, usize)> {
        self.public.iter()
    }
}

/// One unresolved call, as seen at the point where it was written.
#[derive(Debug, Clone, Copy)]
pub struct FunctionQuery<'a> {
    pub name: &'a str,
    pub arity: usize,
    pub env: &'a Environment,
    pub locals: &'a LocalFunctions,
    pub catalog: &'a Catalog,
}

/// Decides whether a non-macro call names a function.
pub trait FunctionResolver: Send + Sync {
    fn resolves(&self, query: &FunctionQuery<'_>) -> bool;
}

/// Default resolution rules.
///
/// - kernel entries (`name/arity` or `name`) resolve everywhere;
/// - local `def`/`defp` functions resolve within their unit;
/// - `import`ed units' public functions resolve unqualified;
/// - code written by a template of unit `U` also resolves `U`'s public functions;
/// - `Mod.f` resolves when `Mod` is a known unit with a public `f`.
#[derive(Debug, Clone, Default)]
pub struct StandardResolver {
    kernel: Vec<(String, Option<usize>)>,
}

impl StandardResolver {
    pub fn from_config(config: &ExpanderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            kernel: config.kernel_entries()?,
        })
    }

    fn in_kernel(&self, name: &str, arity: usize) -> bool {
        self.kernel
            .iter()
            .any(|(kernel, expected)| kernel == name && expected.map_or(true, |a| a == arity))
    }
}

impl FunctionResolver for StandardResolver {
    fn resolves(&self, query: &FunctionQuery<'_>) -> bool {
        let FunctionQuery {
            name,
            arity,
            env,
            locals,
            catalog,
        } = *query;
        if self.in_kernel(name, arity) {
            return true;
        }

        if let Some((module, local_name)) = split_qualified(name) {
            let unit = env.resolve_alias(module);
            if &unit == env.unit() {
                return locals.contains(local_name, arity);
            }
            return catalog.exports_function(&unit, local_name, arity)
                || self.in_kernel(&format!("{}.{}", unit, local_name), arity);
        }

        if locals.contains(name, arity) {
            return true;
        }
        // Calls written by another unit's template also see that unit's functions.
        if let Some(tag) = env.context() {
            if &tag.unit != env.unit() && catalog.exports_function(&tag.unit, name, arity) {
                return true;
            }
        }
        env.imports().any(|(unit, filter)| {
            filter.allows(name, arity) && catalog.exports_function(unit, name, arity)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ast::UnitId;
    use crate::environment::ImportFilter;
    use crate::unit::UnitInterface;

    fn resolver() -> StandardResolver {
        StandardResolver::from_config(&ExpanderConfig::default()).unwrap()
    }

    fn query<'a>(
        name: &'a str,
        arity: usize,
        env: &'a Environment,
        locals: &'a LocalFunctions,
        catalog: &'a Catalog,
    ) -> FunctionQuery<'a> {
        FunctionQuery {
            name,
            arity,
            env,
            locals,
            catalog,
        }
    }

    #[test]
    fn kernel_and_local_functions_resolve() {
        let env = Environment::new(UnitId::new("App"), "app.gly");
        let mut locals = LocalFunctions::new();
        locals.declare("four", 0, true);
        let catalog = Catalog::new();
        let r = resolver();
        assert!(r.resolves(&query("if", 2, &env, &locals, &catalog)));
        assert!(r.resolves(&query("print", 3, &env, &locals, &catalog)));
        assert!(r.resolves(&query("four", 0, &env, &locals, &catalog)));
        assert!(r.resolves(&query("App.four", 0, &env, &locals, &catalog)));
        assert!(!r.resolves(&query("two", 0, &env, &locals, &catalog)));
    }

    #[test]
    fn remote_and_imported_functions_resolve_through_the_catalog() {
        let functions: im::HashSet<(String, usize)> = [("area".to_string(), 1)].into_iter().collect();
        let catalog = Catalog::new().with(Arc::new(UnitInterface::new(
            UnitId::new("Geo"),
            im::HashMap::new(),
            functions,
        )));
        let locals = LocalFunctions::new();
        let env = Environment::new(UnitId::new("App"), "app.gly").alias("G", UnitId::new("Geo"));
        let r = resolver();
        assert!(r.resolves(&query("G.area", 1, &env, &locals, &catalog)));
        assert!(!r.resolves(&query("area", 1, &env, &locals, &catalog)));

        let imported = env.import_unit(UnitId::new("Geo"), ImportFilter::All);
        assert!(r.resolves(&query("area", 1, &imported, &locals, &catalog)));
        assert!(!r.resolves(&query("Unknown.area", 1, &env, &locals, &catalog)));

        let written_by_geo = Environment::new(UnitId::new("App"), "app.gly")
            .in_context(Some(crate::ast::ContextTag::new(UnitId::new("Geo"), 1)));
        assert!(r.resolves(&query("area", 1, &written_by_geo, &locals, &catalog)));
    }
}
