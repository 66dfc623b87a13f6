//!
//! ****************************************************************************************
//! ** ERROR CONSTRUCTION RULES FOR Glyph Expansion Errors (`expand_err!`)                 **
//! ****************************************************************************************
//!
//! # Overview
//!
//! Every failure the expansion engine can produce is an [`ExpansionError`]. Each variant
//! carries the [`CallSite`] it concerns (unit, file, line, name, arity), which is exactly
//! the record the surrounding compiler renders: see [`DiagnosticRecord`]. Non-fatal
//! diagnostics are [`Warning`]s and travel next to successful output.
//!
//! # Error Construction Macro
//!
//! - **Use `expand_err!` for site-only and site-plus-message variants.**
//!   - `expand_err!(UndefinedFunction, site)`
//!   - `expand_err!(InvalidSplice, site, "no binding for placeholder `{}`", name)`
//!
//! # Rules
//!
//! - **Always report the original call site.** Errors raised on code a macro invocation
//!   wrote are reported at the user-written call that started it; code the caller wrote
//!   keeps its own line. `MacroFailure { pinned: true, .. }` keeps its explicit location.
//! - **Never stringify a site by hand.** `CallSite` implements `Display` as `name/arity`.
//!
//! ****************************************************************************************

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::UnitId;

/// Where a diagnostic points: the unit, file and line of a call plus the
/// name and arity being called.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub unit: UnitId,
    pub file: Arc<str>,
    pub line: u32,
    pub name: String,
    pub arity: usize,
}

impl CallSite {
    pub fn new(
        unit: UnitId,
        file: impl Into<Arc<str>>,
        line: u32,
        name: impl Into<String>,
        arity: usize,
    ) -> Self {
        Self {
            unit,
            file: file.into(),
            line,
            name: name.into(),
            arity,
        }
    }

    /// Same name and arity, reported at another site's file and line.
    pub fn located_at(&self, origin: &CallSite) -> Self {
        Self {
            file: Arc::clone(&origin.file),
            line: origin.line,
            ..self.clone()
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Type-safe classification of diagnostics, used in records and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UndefinedMacro,
    UndefinedFunction,
    DuplicateDefinition,
    InvalidSplice,
    InfiniteExpansion,
    ModuleNotRequired,
    AmbiguousMacro,
    MalformedDefinition,
    MacroFailure,
    Syntax,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UndefinedMacro => "UndefinedMacroError",
            ErrorKind::UndefinedFunction => "UndefinedFunctionError",
            ErrorKind::DuplicateDefinition => "DuplicateDefinitionWarning",
            ErrorKind::InvalidSplice => "InvalidSpliceError",
            ErrorKind::InfiniteExpansion => "InfiniteExpansionError",
            ErrorKind::ModuleNotRequired => "ModuleNotRequiredError",
            ErrorKind::AmbiguousMacro => "AmbiguousMacroError",
            ErrorKind::MalformedDefinition => "MalformedDefinitionError",
            ErrorKind::MacroFailure => "MacroFailureError",
            ErrorKind::Syntax => "SyntaxError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The flat diagnostics format consumed by the surrounding compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    pub kind: ErrorKind,
    pub unit: String,
    pub file: String,
    pub line: u32,
    pub name: String,
    pub arity: usize,
}

impl DiagnosticRecord {
    fn from_site(kind: ErrorKind, site: &CallSite) -> Self {
        Self {
            kind,
            unit: site.unit.to_string(),
            file: site.file.to_string(),
            line: site.line,
            name: site.name.clone(),
            arity: site.arity,
        }
    }
}

/// Unified error type for every fatal expansion failure.
#[derive(Debug, Clone, Error)]
pub enum ExpansionError {
    #[error("undefined macro {site}")]
    UndefinedMacro { site: CallSite },

    #[error("undefined function {site}")]
    UndefinedFunction { site: CallSite },

    #[error("invalid splice in {site}: {message}")]
    InvalidSplice { site: CallSite, message: String },

    #[error("expansion of {site} did not reach a fixed point within {limit} steps")]
    InfiniteExpansion { site: CallSite, limit: usize },

    #[error("macro {site} requires unit {module}, which is not required here")]
    ModuleNotRequired { site: CallSite, module: UnitId },

    #[error("macro {site} is exposed by more than one required unit: {candidates}")]
    AmbiguousMacro { site: CallSite, candidates: UnitList },

    #[error("malformed definition {site}: {message}")]
    MalformedDefinition { site: CallSite, message: String },

    #[error("macro {site} failed: {message}")]
    MacroFailure {
        site: CallSite,
        message: String,
        /// Set when the body reported its own location explicitly.
        pinned: bool,
    },

    #[error("syntax error in {file}:{line}: {message}")]
    Syntax {
        file: Arc<str>,
        line: u32,
        message: String,
    },
}

/// Units listed in an ambiguity diagnostic, in require order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitList(pub Vec<UnitId>);

impl fmt::Display for UnitList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, unit) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", unit)?;
        }
        Ok(())
    }
}

impl ExpansionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExpansionError::UndefinedMacro { .. } => ErrorKind::UndefinedMacro,
            ExpansionError::UndefinedFunction { .. } => ErrorKind::UndefinedFunction,
            ExpansionError::InvalidSplice { .. } => ErrorKind::InvalidSplice,
            ExpansionError::InfiniteExpansion { .. } => ErrorKind::InfiniteExpansion,
            ExpansionError::ModuleNotRequired { .. } => ErrorKind::ModuleNotRequired,
            ExpansionError::AmbiguousMacro { .. } => ErrorKind::AmbiguousMacro,
            ExpansionError::MalformedDefinition { .. } => ErrorKind::MalformedDefinition,
            ExpansionError::MacroFailure { .. } => ErrorKind::MacroFailure,
            ExpansionError::Syntax { .. } => ErrorKind::Syntax,
        }
    }

    pub fn site(&self) -> Option<&CallSite> {
        match self {
            ExpansionError::UndefinedMacro { site }
            | ExpansionError::UndefinedFunction { site }
            | ExpansionError::InvalidSplice { site, .. }
            | ExpansionError::InfiniteExpansion { site, .. }
            | ExpansionError::ModuleNotRequired { site, .. }
            | ExpansionError::AmbiguousMacro { site, .. }
            | ExpansionError::MalformedDefinition { site, .. }
            | ExpansionError::MacroFailure { site, .. } => Some(site),
            ExpansionError::Syntax { .. } => None,
        }
    }

    /// Flattens the error into the `{kind, unit, file, line, name, arity}` record.
    pub fn record(&self) -> DiagnosticRecord {
        if let Some(site) = self.site() {
            return DiagnosticRecord::from_site(self.kind(), site);
        }
        let (file, line) = match self {
            ExpansionError::Syntax { file, line, .. } => (file.to_string(), *line),
            _ => (String::new(), 0),
        };
        DiagnosticRecord {
            kind: self.kind(),
            unit: String::new(),
            file,
            line,
            name: String::new(),
            arity: 0,
        }
    }

    fn help_text(&self) -> Option<String> {
        match self {
            ExpansionError::UndefinedFunction { site } => Some(format!(
                "if `{}` is a macro, define it before its first use in {}",
                site, site.unit
            )),
            ExpansionError::ModuleNotRequired { module, .. } => {
                Some(format!("add `require({})` before this call", module))
            }
            ExpansionError::AmbiguousMacro { site, .. } => Some(format!(
                "qualify the call, e.g. `Unit.{}(...)`, or import only one provider",
                site.name
            )),
            ExpansionError::InfiniteExpansion { .. } => {
                Some("check that the macro's result does not re-create the original call".to_string())
            }
            _ => None,
        }
    }
}

impl Diagnostic for ExpansionError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(format!("glyph::{}", self.kind())))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.help_text()
            .map(|h| Box::new(h) as Box<dyn fmt::Display + 'a>)
    }
}

/// Non-fatal diagnostic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    DuplicateDefinition,
}

/// A non-fatal diagnostic surfaced alongside successful output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub site: CallSite,
    /// Line of the definition that was superseded.
    pub previous_line: u32,
}

impl Warning {
    pub fn duplicate_definition(site: CallSite, previous_line: u32) -> Self {
        Self {
            kind: WarningKind::DuplicateDefinition,
            site,
            previous_line,
        }
    }

    pub fn record(&self) -> DiagnosticRecord {
        match self.kind {
            WarningKind::DuplicateDefinition => {
                DiagnosticRecord::from_site(ErrorKind::DuplicateDefinition, &self.site)
            }
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::DuplicateDefinition => write!(
                f,
                "warning: macro {} redefined at {}:{} (previous definition on line {})",
                self.site, self.site.file, self.site.line, self.previous_line
            ),
        }
    }
}

/// Constructs an [`ExpansionError`] variant that carries a site and, optionally, a message.
///
/// Supports formatting with any number of arguments.
#[macro_export]
macro_rules! expand_err {
    // Site only
    ($variant:ident, $site:expr) => {
        $crate::ExpansionError::$variant { site: $site }
    };
    // Site and plain message
    ($variant:ident, $site:expr, $msg:expr) => {
        $crate::ExpansionError::$variant {
            site: $site,
            message: format!("{}", $msg),
        }
    };
    // Site and formatted message
    ($variant:ident, $site:expr, $msg:expr, $($arg:expr),+) => {
        $crate::ExpansionError::$variant {
            site: $site,
            message: format!($msg, $($arg),+),
        }
    };
}

#[cfg(test)]
mod diagnostics_tests {
    use miette::Report;

    use super::*;

    fn site(line: u32) -> CallSite {
        CallSite::new(UnitId::new("Demo"), "demo.gly", line, "two", 0)
    }

    #[test]
    fn records_carry_the_flat_format() {
        let err = expand_err!(UndefinedFunction, site(7));
        let record = err.record();
        assert_eq!(record.kind, ErrorKind::UndefinedFunction);
        assert_eq!(record.unit, "Demo");
        assert_eq!(record.file, "demo.gly");
        assert_eq!(record.line, 7);
        assert_eq!(record.name, "two");
        assert_eq!(record.arity, 0);
    }

    #[test]
    fn located_at_keeps_name_and_arity() {
        let origin = CallSite::new(UnitId::new("Demo"), "caller.gly", 42, "outer", 1);
        let moved = site(3).located_at(&origin);
        assert_eq!((&*moved.file, moved.line), ("caller.gly", 42));
        assert_eq!((moved.name.as_str(), moved.arity), ("two", 0));
    }

    #[test]
    fn reports_render_code_and_help() {
        let report = Report::new(expand_err!(UndefinedFunction, site(1)));
        let output = format!("{report:?}");
        assert!(output.contains("UndefinedFunctionError"));
        assert!(output.contains("define it before its first use"));
    }

    #[test]
    fn warning_records_use_the_warning_kind() {
        let warning = Warning::duplicate_definition(site(9), 2);
        assert_eq!(warning.record().kind, ErrorKind::DuplicateDefinition);
        assert!(warning.to_string().contains("previous definition on line 2"));
    }
}
