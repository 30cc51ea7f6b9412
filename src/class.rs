//! Record class declarations and capabilities.
//!
//! A record class maps to one table per level of its class hierarchy (root
//! first). Capabilities are opted into per class and inherited by
//! subclasses; they combine freely except where [`RecordClass::validate`]
//! says otherwise.

use crate::error::{EngineError, Result};
use crate::fields::{localisable_fields, FieldRules, FieldSpec};
use crate::i18n::ValidationReport;
use crate::state::ExecutionContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Column names the engine manages itself.
pub const RESERVED_COLUMNS: &[&str] = &[
    "ID", "RecordID", "Locale", "Version", "Created", "LastEdited", "WasPublished", "WasArchived",
];

/// An optional behaviour a record class can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Per-locale shadow rows for translatable fields
    Localised,
    /// Draft/live stages and version history
    Versioned,
    /// Per-record list of locales the record is visible in
    Filtered,
    /// Each record belongs to exactly one locale
    Isolated,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Localised => "Localised",
            Capability::Versioned => "Versioned",
            Capability::Filtered => "Filtered",
            Capability::Isolated => "Isolated",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How aggressively a record falls back to other locales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InheritanceMode {
    /// Only the requested locale qualifies
    Exact,
    /// The requested locale, its fallback chain, then canonical content
    #[default]
    Any,
    /// The requested locale and its explicit fallback chain only
    Fallback,
}

/// Inheritance mode per execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InheritancePolicy {
    pub admin: InheritanceMode,
    pub frontend: InheritanceMode,
}

impl InheritancePolicy {
    pub fn mode_for(&self, context: ExecutionContext) -> InheritanceMode {
        match context {
            ExecutionContext::Admin => self.admin,
            ExecutionContext::Frontend => self.frontend,
        }
    }
}

/// A host-defined record class.
#[derive(Debug)]
pub struct RecordClass {
    name: String,
    table: String,
    fields: Vec<FieldSpec>,
    parent: Option<Arc<RecordClass>>,
    capabilities: Vec<Capability>,
    rules: FieldRules,
    inheritance: InheritancePolicy,
    filter_drafts: bool,

    /// Derived from static configuration only, so computed once.
    localisable: OnceLock<Vec<FieldSpec>>,
}

impl RecordClass {
    pub fn builder(name: &str) -> RecordClassBuilder {
        RecordClassBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table holding this level's own fields.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields declared on this level only.
    pub fn own_fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn parent(&self) -> Option<&RecordClass> {
        self.parent.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The root of the hierarchy; its table owns record ids.
    pub fn root(&self) -> &RecordClass {
        let mut class = self;
        while let Some(parent) = class.parent() {
            class = parent;
        }
        class
    }

    /// Every level from the root down to this class.
    pub fn hierarchy(&self) -> Vec<&RecordClass> {
        let mut levels = vec![self];
        let mut class = self;
        while let Some(parent) = class.parent() {
            levels.push(parent);
            class = parent;
        }
        levels.reverse();
        levels
    }

    /// Fields across the whole hierarchy.
    pub fn all_fields(&self) -> Vec<&FieldSpec> {
        self.hierarchy()
            .into_iter()
            .flat_map(|level| level.fields.iter())
            .collect()
    }

    /// Find a field and the level that declares it.
    pub fn find_field(&self, name: &str) -> Option<(&RecordClass, &FieldSpec)> {
        self.hierarchy()
            .into_iter()
            .find_map(|level| level.fields.iter().find(|f| f.name == name).map(|f| (level, f)))
    }

    pub fn own_capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Whether this class or any ancestor opted into `capability`.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.hierarchy()
            .iter()
            .any(|level| level.capabilities.contains(&capability))
    }

    /// Fail with `InvalidConfiguration` unless the class has `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(EngineError::missing_capability(&self.name, capability.as_str()))
        }
    }

    /// Reject capability combinations that cannot work together at runtime.
    pub fn check_compatible(&self) -> Result<()> {
        if self.has_capability(Capability::Localised) && self.has_capability(Capability::Isolated) {
            return Err(EngineError::InvalidConfiguration(format!(
                "class {} combines Localised and Isolated",
                self.name
            )));
        }
        Ok(())
    }

    pub fn rules(&self) -> &FieldRules {
        &self.rules
    }

    pub fn inheritance(&self) -> InheritancePolicy {
        self.inheritance
    }

    /// Whether visibility filtering also applies to the draft stage.
    pub fn filter_drafts(&self) -> bool {
        self.filter_drafts
    }

    /// Localisable fields declared on this level. Empty unless the class
    /// is localised.
    pub fn localisable_fields(&self) -> &[FieldSpec] {
        self.localisable.get_or_init(|| {
            if self.has_capability(Capability::Localised) {
                localisable_fields(&self.fields, &self.rules)
            } else {
                Vec::new()
            }
        })
    }

    /// Whether a field on this level is localised.
    pub fn is_field_localised(&self, name: &str) -> bool {
        self.localisable_fields().iter().any(|f| f.name == name)
    }

    /// Hierarchy levels that own a shadow table.
    pub fn localised_levels(&self) -> Vec<&RecordClass> {
        self.hierarchy()
            .into_iter()
            .filter(|level| !level.localisable_fields().is_empty())
            .collect()
    }

    /// Name of this level's shadow table for a given base suffix
    /// ("", "_Live" or "_Versions").
    pub fn shadow_table(&self, suffix: &str) -> String {
        format!("{}_Localised{}", self.table, suffix)
    }

    /// Name of the visibility association table (root level).
    pub fn filter_table(&self) -> String {
        format!("{}_FilteredLocales", self.root().table)
    }

    /// Append configuration problems for this class to `report`.
    pub fn validate(&self, report: &mut ValidationReport) {
        if let Err(err) = self.check_compatible() {
            report.errors.push(err.to_string());
        }

        if !self.is_root() {
            for capability in &self.capabilities {
                if matches!(
                    capability,
                    Capability::Versioned | Capability::Filtered | Capability::Isolated
                ) {
                    report.errors.push(format!(
                        "{} must be applied to the root of {}'s hierarchy, not to {}",
                        capability,
                        self.root().name,
                        self.name
                    ));
                }
            }
        }

        for field in &self.fields {
            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                report.errors.push(format!(
                    "Class {} declares reserved column {}",
                    self.name, field.name
                ));
            }
        }

        if let Some(allowlist) = &self.rules.translate {
            for name in allowlist {
                if !self.fields.iter().any(|f| &f.name == name) {
                    report.errors.push(format!(
                        "Class {} translates unknown field {}",
                        self.name, name
                    ));
                }
            }
        }

        for pattern in self.rules.invalid_patterns() {
            report.errors.push(format!(
                "Class {} has an invalid field pattern {}",
                self.name, pattern
            ));
        }

        if self.has_capability(Capability::Localised) && self.localised_levels().is_empty() {
            report.warnings.push(format!(
                "Class {} is localised but has no localisable fields",
                self.name
            ));
        }
    }
}

/// Builder for [`RecordClass`].
pub struct RecordClassBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldSpec>,
    parent: Option<Arc<RecordClass>>,
    capabilities: Vec<Capability>,
    rules: FieldRules,
    inheritance: InheritancePolicy,
    filter_drafts: bool,
}

impl RecordClassBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            fields: Vec::new(),
            parent: None,
            capabilities: Vec::new(),
            rules: FieldRules::default(),
            inheritance: InheritancePolicy::default(),
            filter_drafts: false,
        }
    }

    /// Table name; defaults to the class name.
    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn field(mut self, name: &str, db_type: &str) -> Self {
        self.fields.push(FieldSpec::new(name, db_type));
        self
    }

    pub fn parent(mut self, parent: Arc<RecordClass>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn rules(mut self, rules: FieldRules) -> Self {
        self.rules = rules;
        self
    }

    /// Shorthand for an explicit allowlist.
    pub fn translate(mut self, fields: &[&str]) -> Self {
        self.rules.translate = Some(fields.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn inheritance(mut self, admin: InheritanceMode, frontend: InheritanceMode) -> Self {
        self.inheritance = InheritancePolicy { admin, frontend };
        self
    }

    pub fn filter_drafts(mut self, enabled: bool) -> Self {
        self.filter_drafts = enabled;
        self
    }

    pub fn build(self) -> RecordClass {
        RecordClass {
            table: self.table.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            fields: self.fields,
            parent: self.parent,
            capabilities: self.capabilities,
            rules: self.rules,
            inheritance: self.inheritance,
            filter_drafts: self.filter_drafts,
            localisable: OnceLock::new(),
        }
    }
}
