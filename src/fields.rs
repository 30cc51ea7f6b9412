//! Localisable field set computation.
//!
//! A field is localisable when the class's explicit `translate` allowlist
//! names it. Without an allowlist, its name must pass the name
//! include/exclude lists and its type must pass the type include/exclude
//! lists.
//!
//! Patterns are either literal values or slash-delimited regular
//! expressions (`/^Meta/`). A value matches a list if it matches an entry
//! as-is or after stripping trailing type arguments (`Varchar(255)` is
//! checked as both `Varchar(255)` and `Varchar`).

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A column declared by a record class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    /// Host type identifier, possibly with arguments (e.g. "Varchar(255)")
    pub db_type: String,
}

impl FieldSpec {
    pub fn new(name: &str, db_type: &str) -> Self {
        Self {
            name: name.to_string(),
            db_type: db_type.to_string(),
        }
    }

    /// SQLite column type for this field.
    pub fn column_type(&self) -> &'static str {
        match strip_type_arguments(&self.db_type).to_ascii_lowercase().as_str() {
            "int" | "integer" | "boolean" | "foreignkey" | "bigint" => "INTEGER",
            "decimal" | "float" | "double" | "currency" | "percentage" => "REAL",
            _ => "TEXT",
        }
    }
}

/// Include/exclude configuration for one record class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    /// Explicit allowlist; bypasses every other rule when set
    pub translate: Option<Vec<String>>,

    /// Field name patterns to include; empty means "any name"
    pub field_include: Vec<String>,

    /// Field name patterns to exclude
    pub field_exclude: Vec<String>,

    /// Field type patterns to include; empty means "any type"
    pub type_include: Vec<String>,

    /// Field type patterns to exclude
    pub type_exclude: Vec<String>,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            translate: None,
            field_include: Vec::new(),
            field_exclude: ["ID", "ClassName", "Created", "LastEdited", "Version", "RecordID", "Locale"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            type_include: ["Varchar", "Text", "HTMLText", "HTMLVarchar"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            type_exclude: Vec::new(),
        }
    }
}

impl FieldRules {
    /// Rules that localise exactly the named fields.
    pub fn translate(fields: &[&str]) -> Self {
        Self {
            translate: Some(fields.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    /// Whether a single field is localisable under these rules.
    pub fn is_localisable(&self, field: &FieldSpec) -> bool {
        if let Some(allowlist) = &self.translate {
            return allowlist.iter().any(|name| name == &field.name);
        }

        let name_ok = (self.field_include.is_empty() || matches_any(&field.name, &self.field_include))
            && !matches_any(&field.name, &self.field_exclude);
        let type_ok = (self.type_include.is_empty() || matches_any(&field.db_type, &self.type_include))
            && !matches_any(&field.db_type, &self.type_exclude);

        name_ok && type_ok
    }

    /// Patterns that are written as `/regex/` but do not compile.
    pub fn invalid_patterns(&self) -> Vec<String> {
        [
            &self.field_include,
            &self.field_exclude,
            &self.type_include,
            &self.type_exclude,
        ]
        .into_iter()
        .flatten()
        .filter(|pattern| regex_body(pattern).is_some_and(|body| Regex::new(body).is_err()))
        .cloned()
        .collect()
    }
}

/// Apply rules to a list of fields.
///
/// With an allowlist the result is the allowlist itself, in allowlist
/// order, limited to fields the class actually declares.
pub fn localisable_fields(fields: &[FieldSpec], rules: &FieldRules) -> Vec<FieldSpec> {
    match &rules.translate {
        Some(allowlist) => allowlist
            .iter()
            .filter_map(|name| fields.iter().find(|f| &f.name == name).cloned())
            .collect(),
        None => fields
            .iter()
            .filter(|field| rules.is_localisable(field))
            .cloned()
            .collect(),
    }
}

/// `Varchar(255)` -> `Varchar`.
pub fn strip_type_arguments(value: &str) -> &str {
    match value.find('(') {
        Some(index) if value.trim_end().ends_with(')') => value[..index].trim_end(),
        _ => value,
    }
}

fn regex_body(pattern: &str) -> Option<&str> {
    pattern
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|body| !body.is_empty())
}

fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_body(pattern) {
        Some(body) => Regex::new(body).map(|re| re.is_match(value)).unwrap_or(false),
        None => value == pattern,
    }
}

/// Whether a value matches any pattern, as-is or with type arguments stripped.
pub fn matches_any(value: &str, patterns: &[String]) -> bool {
    let stripped = strip_type_arguments(value);
    patterns
        .iter()
        .any(|pattern| matches_pattern(value, pattern) || matches_pattern(stripped, pattern))
}
