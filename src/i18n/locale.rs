//! Locale and domain catalog types.
//!
//! A `Locale` is a language/region identifier such as `en_US` plus the
//! display and routing metadata that goes with it. A `Domain` scopes a subset
//! of locales to a host name.

use serde::{Deserialize, Serialize};

/// A configured locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    /// Locale code in `language_REGION` form (e.g. "en_US", "fr_CA")
    pub code: String,

    /// Display title (e.g. "English (US)")
    pub title: String,

    /// URL path segment used when routing by locale (e.g. "en")
    pub url_segment: String,

    /// Whether this is the global default locale
    #[serde(default)]
    pub is_default: bool,

    /// Fallback parents in priority order
    #[serde(default)]
    pub fallbacks: Vec<String>,

    /// Ordering key; lower sorts first
    #[serde(default)]
    pub sort: i32,
}

impl Locale {
    /// Build a locale with the URL segment derived from the code.
    pub fn new(code: &str, title: &str) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
            url_segment: code.to_lowercase().replace('_', "-"),
            is_default: false,
            fallbacks: Vec::new(),
            sort: 0,
        }
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_fallback(mut self, code: &str) -> Self {
        self.fallbacks.push(code.to_string());
        self
    }

    pub fn with_url_segment(mut self, segment: &str) -> Self {
        self.url_segment = segment.to_string();
        self
    }

    pub fn with_sort(mut self, sort: i32) -> Self {
        self.sort = sort;
        self
    }

    /// Primary language subtag, lowercased ("en" for "en_US").
    pub fn language(&self) -> String {
        split_code(&self.code).0.to_lowercase()
    }

    /// Region subtag, uppercased ("US" for "en_US"), if the code has one.
    pub fn region(&self) -> Option<String> {
        split_code(&self.code).1.map(|r| r.to_uppercase())
    }

    /// Code in BCP 47 style: lowercase with hyphens ("en-us").
    pub fn http_tag(&self) -> String {
        self.code.to_lowercase().replace('_', "-")
    }
}

/// Split a locale code into language and optional region.
fn split_code(code: &str) -> (&str, Option<&str>) {
    match code.split_once(['_', '-']) {
        Some((language, region)) if !region.is_empty() => (language, Some(region)),
        Some((language, _)) => (language, None),
        None => (code, None),
    }
}

/// A host name scoping a subset of locales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Host name without port (e.g. "example.co.nz")
    pub host: String,

    /// Codes of the locales served under this host
    #[serde(default)]
    pub locales: Vec<String>,

    /// Optional default locale for this host
    #[serde(default)]
    pub default_locale: Option<String>,
}

impl Domain {
    pub fn new(host: &str, locales: &[&str]) -> Self {
        Self {
            host: host.to_string(),
            locales: locales.iter().map(|code| code.to_string()).collect(),
            default_locale: None,
        }
    }

    pub fn with_default(mut self, code: &str) -> Self {
        self.default_locale = Some(code.to_string());
        self
    }

    /// Whether this domain serves the given locale (case-insensitive).
    pub fn contains(&self, code: &str) -> bool {
        self.locales.iter().any(|c| c.eq_ignore_ascii_case(code))
    }
}
