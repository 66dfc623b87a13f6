//! Expander configuration.
//!
//! All fields have defaults, so an empty YAML document is a valid
//! configuration. Kernel function entries are written `name/arity`, or just
//! `name` to accept any arity.

use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum nesting of macro results inside macro results.
pub const MAX_MACRO_RECURSION_DEPTH: usize = 128;

/// Maximum successive expansions replacing the same tree position.
pub const MAX_EXPANSIONS_PER_NODE: usize = 100;

/// Functions the surrounding evaluator provides without any definition in a unit.
static DEFAULT_KERNEL: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "if/2", "if/3", "!/1", "print", "+/2", "-/2", "*/2", "//2", "==/2", "!=/2", "</2",
        ">/2", "<=/2", ">=/2", "<>/2", "++/2", "and/2", "or/2", "list", "tuple",
    ]
    .iter()
    .map(|entry| entry.to_string())
    .collect()
});

/// What to do when several required units expose the same public macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Raise `AmbiguousMacroError`.
    #[default]
    Error,
    /// Use the unit that was required first.
    FirstRequired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpanderConfig {
    pub max_expansions_per_node: usize,
    pub max_expansion_depth: usize,
    pub ambiguity: AmbiguityPolicy,
    pub kernel_functions: Vec<String>,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            max_expansions_per_node: MAX_EXPANSIONS_PER_NODE,
            max_expansion_depth: MAX_MACRO_RECURSION_DEPTH,
            ambiguity: AmbiguityPolicy::default(),
            kernel_functions: DEFAULT_KERNEL.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid kernel function entry '{0}': expected `name` or `name/arity`")]
    KernelEntry(String),
}

impl ExpanderConfig {
    /// Parses a YAML document; missing keys take their defaults.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use glyph::config::{AmbiguityPolicy, ExpanderConfig};
    /// let config = ExpanderConfig::from_yaml_str("ambiguity: first_required").unwrap();
    /// assert_eq!(config.ambiguity, AmbiguityPolicy::FirstRequired);
    /// assert_eq!(config.max_expansion_depth, 128);
    /// ```
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ExpanderConfig = if source.trim().is_empty() {
            ExpanderConfig::default()
        } else {
            serde_yaml::from_str(source)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&source)
    }

    /// Checks that every kernel entry is well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.kernel_functions {
            parse_kernel_entry(entry)?;
        }
        Ok(())
    }

    /// Kernel entries as `(name, Some(arity))` or `(name, None)` for any arity.
    pub fn kernel_entries(&self) -> Result<Vec<(String, Option<usize>)>, ConfigError> {
        self.kernel_functions
            .iter()
            .map(|entry| parse_kernel_entry(entry))
            .collect()
    }
}

// Splits at the last '/' so the division operator `//2` parses as `/` with arity 2.
fn parse_kernel_entry(entry: &str) -> Result<(String, Option<usize>), ConfigError> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(ConfigError::KernelEntry(entry.to_string()));
    }
    let Some(split) = entry.rfind('/') else {
        return Ok((entry.to_string(), None));
    };
    let (name, arity) = (&entry[..split], &entry[split + 1..]);
    if name.is_empty() {
        // A bare "/" is the division operator with any arity.
        return Ok((entry.to_string(), None));
    }
    let arity = arity
        .parse::<usize>()
        .map_err(|_| ConfigError::KernelEntry(entry.to_string()))?;
    Ok((name.to_string(), Some(arity)))
}
