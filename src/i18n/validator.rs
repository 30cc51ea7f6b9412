//! Configuration validation.
//!
//! Configuration problems are collected into a report instead of being
//! raised one at a time, so an operator sees every issue in one pass.

use super::registry::LocaleRegistry;
use crate::class::RecordClass;
use serde::Serialize;
use tracing::warn;

/// Validation report containing errors and warnings about the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Problems that make the configuration unusable
    pub errors: Vec<String>,

    /// Non-critical findings worth fixing
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Create a new empty validation report
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Check if the report has any errors
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Check if the report has any warnings
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Check if the report is clean (no errors or warnings)
    pub fn is_clean(&self) -> bool {
        !self.has_errors() && !self.has_warnings()
    }

    /// Append another report's findings to this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Emit every finding through `tracing`.
    pub fn log(&self) {
        for error in &self.errors {
            warn!("Configuration error: {}", error);
        }
        for warning in &self.warnings {
            warn!("Configuration warning: {}", warning);
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the locale catalog together with every record class declaration.
pub fn validate_configuration(registry: &LocaleRegistry, classes: &[&RecordClass]) -> ValidationReport {
    let mut report = registry.validate();
    for class in classes {
        class.validate(&mut report);
    }
    report
}
