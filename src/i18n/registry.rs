//! Locale registry: the catalog of configured locales and domains.
//!
//! Unlike a process-wide singleton, a registry is an explicit value that is
//! built once from configuration and shared by reference (`Arc`) with every
//! component that needs it. Tests build their own and drop them, so no
//! identity-keyed catalog cache survives across test boundaries.

use super::locale::{Domain, Locale};
use super::validator::ValidationReport;
use crate::error::{EngineError, Result};
use std::collections::HashSet;

/// Maximum number of fallback hops followed before a chain is declared cyclic.
pub const MAX_FALLBACK_HOPS: usize = 16;

/// Catalog of locales and domains.
#[derive(Debug, Clone, Default)]
pub struct LocaleRegistry {
    /// Locales ordered by sort key, then code
    locales: Vec<Locale>,

    domains: Vec<Domain>,
}

impl LocaleRegistry {
    /// Build a registry. Locales are ordered by their sort key (stable, so
    /// equal keys keep catalog order).
    pub fn new(mut locales: Vec<Locale>, domains: Vec<Domain>) -> Self {
        locales.sort_by_key(|locale| locale.sort);
        Self { locales, domains }
    }

    /// Get a locale by code (case-insensitive).
    pub fn get(&self, code: &str) -> Option<&Locale> {
        self.locales
            .iter()
            .find(|locale| locale.code.eq_ignore_ascii_case(code))
    }

    /// Get a locale by its URL segment (case-insensitive).
    pub fn get_by_url_segment(&self, segment: &str) -> Option<&Locale> {
        self.locales
            .iter()
            .find(|locale| locale.url_segment.eq_ignore_ascii_case(segment))
    }

    /// Check if a locale code is registered.
    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    /// All locales in sort order.
    pub fn locales(&self) -> &[Locale] {
        &self.locales
    }

    /// All configured domains.
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// Find the domain serving a host. Any `:port` suffix is ignored.
    pub fn domain_for_host(&self, host: &str) -> Option<&Domain> {
        let host = host.split(':').next().unwrap_or(host);
        self.domains
            .iter()
            .find(|domain| domain.host.eq_ignore_ascii_case(host))
    }

    /// Get a domain by host name.
    pub fn domain(&self, host: &str) -> Option<&Domain> {
        self.domain_for_host(host)
    }

    /// Locales belonging to a domain, in sort order.
    pub fn locales_for_domain(&self, domain: &Domain) -> Vec<&Locale> {
        self.locales
            .iter()
            .filter(|locale| domain.contains(&locale.code))
            .collect()
    }

    /// The global default locale: the one flagged default, otherwise the
    /// first by sort order.
    pub fn global_default(&self) -> Option<&Locale> {
        self.locales
            .iter()
            .find(|locale| locale.is_default)
            .or_else(|| self.locales.first())
    }

    /// Default locale for a domain: its explicit default when that is a
    /// member, otherwise its first member by sort order.
    pub fn default_for_domain(&self, domain: &Domain) -> Option<&Locale> {
        domain
            .default_locale
            .as_deref()
            .filter(|code| domain.contains(code))
            .and_then(|code| self.get(code))
            .or_else(|| self.locales_for_domain(domain).into_iter().next())
    }

    /// Whether a locale code is the global default.
    pub fn is_global_default(&self, code: &str) -> bool {
        self.global_default()
            .map(|locale| locale.code.eq_ignore_ascii_case(code))
            .unwrap_or(false)
    }

    /// The locale followed by its fallback parents, depth-first in declared
    /// order, each locale listed once.
    ///
    /// # Errors
    /// * `UnknownLocale` if `code` is not registered
    /// * `FallbackCycle` if a parent leads back to a locale already on the
    ///   current path, or the walk exceeds [`MAX_FALLBACK_HOPS`]
    pub fn fallback_chain(&self, code: &str) -> Result<Vec<&Locale>> {
        let start = self
            .get(code)
            .ok_or_else(|| EngineError::UnknownLocale(code.to_string()))?;

        let mut chain = vec![start];
        let mut seen: HashSet<&str> = HashSet::from([start.code.as_str()]);
        let mut path = vec![start.code.as_str()];
        self.walk_fallbacks(start, start, &mut path, &mut chain, &mut seen)?;
        Ok(chain)
    }

    /// `path` holds the locales between `start` and `current`; `seen` every
    /// locale already listed, so shared ancestors are only walked once.
    fn walk_fallbacks<'a>(
        &'a self,
        start: &Locale,
        current: &'a Locale,
        path: &mut Vec<&'a str>,
        chain: &mut Vec<&'a Locale>,
        seen: &mut HashSet<&'a str>,
    ) -> Result<()> {
        for parent_code in &current.fallbacks {
            let cycle = || EngineError::FallbackCycle {
                locale: start.code.clone(),
                max_hops: MAX_FALLBACK_HOPS,
            };
            if path.len() > MAX_FALLBACK_HOPS {
                return Err(cycle());
            }
            // Unknown parents are reported by validate(); skip them here.
            let Some(parent) = self.get(parent_code) else {
                continue;
            };
            if path.contains(&parent.code.as_str()) {
                return Err(cycle());
            }
            if !seen.insert(parent.code.as_str()) {
                continue;
            }
            chain.push(parent);
            path.push(parent.code.as_str());
            self.walk_fallbacks(start, parent, path, chain, seen)?;
            path.pop();
        }
        Ok(())
    }

    /// Validate the catalog, collecting every problem found.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();

        if self.locales.is_empty() {
            report.errors.push("No locales configured".to_string());
            return report;
        }

        let mut codes = HashSet::new();
        let mut segments = HashSet::new();
        for locale in &self.locales {
            if !codes.insert(locale.code.to_lowercase()) {
                report
                    .errors
                    .push(format!("Duplicate locale code: {}", locale.code));
            }
            if !segments.insert(locale.url_segment.to_lowercase()) {
                report.errors.push(format!(
                    "Duplicate URL segment '{}' on locale {}",
                    locale.url_segment, locale.code
                ));
            }
            for fallback in &locale.fallbacks {
                if !self.contains(fallback) {
                    report.errors.push(format!(
                        "Locale {} falls back to unregistered locale {}",
                        locale.code, fallback
                    ));
                }
            }
            if let Err(err) = self.fallback_chain(&locale.code) {
                report.errors.push(err.to_string());
            }
        }

        let defaults: Vec<_> = self.locales.iter().filter(|l| l.is_default).collect();
        match defaults.len() {
            0 => report.warnings.push(format!(
                "No default locale flagged; using {}",
                self.locales[0].code
            )),
            1 => {}
            n => report
                .errors
                .push(format!("{} locales are flagged as the global default", n)),
        }

        self.validate_domains(&mut report);
        report
    }

    fn validate_domains(&self, report: &mut ValidationReport) {
        if self.domains.is_empty() {
            return;
        }

        let mut owners: Vec<(String, &str)> = Vec::new();
        for domain in &self.domains {
            for code in &domain.locales {
                if !self.contains(code) {
                    report.errors.push(format!(
                        "Domain {} lists unregistered locale {}",
                        domain.host, code
                    ));
                }
                if let Some((_, owner)) = owners.iter().find(|(c, _)| c.eq_ignore_ascii_case(code))
                {
                    report.errors.push(format!(
                        "Locale {} belongs to both {} and {}",
                        code, owner, domain.host
                    ));
                } else {
                    owners.push((code.clone(), domain.host.as_str()));
                }
            }
            if let Some(default) = &domain.default_locale {
                if !domain.contains(default) {
                    report.errors.push(format!(
                        "Default locale {} of domain {} is not one of its locales",
                        default, domain.host
                    ));
                }
            }
        }

        for locale in &self.locales {
            if !self.domains.iter().any(|d| d.contains(&locale.code)) {
                report.warnings.push(format!(
                    "Locale {} is not served by any domain",
                    locale.code
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> LocaleRegistry {
        LocaleRegistry::new(
            vec![
                Locale::new("en_NZ", "English (NZ)").with_default(true).with_sort(1),
                Locale::new("mi_NZ", "Māori").with_fallback("en_NZ").with_sort(2),
                Locale::new("en_US", "English (US)").with_sort(3),
                Locale::new("fr_CA", "French (Canada)")
                    .with_fallback("fr_FR")
                    .with_sort(4),
                Locale::new("fr_FR", "French").with_fallback("en_US").with_sort(5),
            ],
            vec![
                Domain::new("example.co.nz", &["en_NZ", "mi_NZ"]).with_default("mi_NZ"),
                Domain::new("example.com", &["en_US", "fr_CA", "fr_FR"]),
            ],
        )
    }

    // ==================== Lookup Tests ====================

    #[test]
    fn test_get_is_case_insensitive() {
        let registry = sample_registry();
        assert_eq!(registry.get("EN_nz").map(|l| l.code.as_str()), Some("en_NZ"));
        assert!(registry.get("de_DE").is_none());
    }

    #[test]
    fn test_get_by_url_segment() {
        let registry = sample_registry();
        let locale = registry.get_by_url_segment("fr-ca").expect("segment");
        assert_eq!(locale.code, "fr_CA");
    }

    #[test]
    fn test_locales_sorted_by_sort_key() {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("b_B", "B").with_sort(2),
                Locale::new("a_A", "A").with_sort(1),
            ],
            vec![],
        );
        let codes: Vec<_> = registry.locales().iter().map(|l| l.code.as_str()).collect();
        assert_eq!(codes, vec!["a_A", "b_B"]);
    }

    #[test]
    fn test_domain_for_host_ignores_port() {
        let registry = sample_registry();
        let domain = registry.domain_for_host("Example.com:8080").expect("domain");
        assert_eq!(domain.host, "example.com");
        assert!(registry.domain_for_host("other.org").is_none());
    }

    // ==================== Default Tests ====================

    #[test]
    fn test_global_default_is_flagged_locale() {
        let registry = sample_registry();
        assert_eq!(registry.global_default().map(|l| l.code.as_str()), Some("en_NZ"));
        assert!(registry.is_global_default("en_nz"));
        assert!(!registry.is_global_default("en_US"));
    }

    #[test]
    fn test_global_default_falls_back_to_first() {
        let registry = LocaleRegistry::new(
            vec![Locale::new("de_DE", "Deutsch"), Locale::new("en_US", "English")],
            vec![],
        );
        assert_eq!(registry.global_default().map(|l| l.code.as_str()), Some("de_DE"));
    }

    #[test]
    fn test_domain_default_explicit_and_implicit() {
        let registry = sample_registry();
        let nz = registry.domain("example.co.nz").expect("nz");
        let com = registry.domain("example.com").expect("com");
        assert_eq!(registry.default_for_domain(nz).map(|l| l.code.as_str()), Some("mi_NZ"));
        assert_eq!(registry.default_for_domain(com).map(|l| l.code.as_str()), Some("en_US"));
    }

    // ==================== Fallback Chain Tests ====================

    #[test]
    fn test_fallback_chain_follows_parents() {
        let registry = sample_registry();
        let chain: Vec<_> = registry
            .fallback_chain("fr_CA")
            .expect("chain")
            .into_iter()
            .map(|l| l.code.as_str())
            .collect();
        assert_eq!(chain, vec!["fr_CA", "fr_FR", "en_US"]);
    }

    #[test]
    fn test_fallback_chain_without_parents() {
        let registry = sample_registry();
        let chain = registry.fallback_chain("en_NZ").expect("chain");
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_fallback_chain_unknown_locale() {
        let registry = sample_registry();
        let err = registry.fallback_chain("xx_XX").unwrap_err();
        assert!(matches!(err, EngineError::UnknownLocale(_)));
    }

    #[test]
    fn test_fallback_chain_detects_cycle() {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("a_A", "A").with_fallback("b_B"),
                Locale::new("b_B", "B").with_fallback("a_A"),
            ],
            vec![],
        );
        let err = registry.fallback_chain("a_A").unwrap_err();
        assert!(matches!(err, EngineError::FallbackCycle { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fallback_chain_detects_cycle_behind_start() {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("a_A", "A").with_default(true).with_fallback("b_B"),
                Locale::new("b_B", "B").with_fallback("c_C"),
                Locale::new("c_C", "C").with_fallback("b_B"),
            ],
            vec![],
        );
        let err = registry.fallback_chain("a_A").unwrap_err();
        assert!(matches!(err, EngineError::FallbackCycle { ref locale, .. } if locale == "a_A"));

        let report = registry.validate();
        assert!(report.errors.iter().any(|e| e.contains("a_A") && e.contains("cyclic")));
    }

    #[test]
    fn test_fallback_chain_shared_ancestor_listed_once() {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("a_A", "A").with_fallback("b_B").with_fallback("c_C"),
                Locale::new("b_B", "B").with_fallback("c_C"),
                Locale::new("c_C", "C"),
            ],
            vec![],
        );
        let chain: Vec<_> = registry
            .fallback_chain("a_A")
            .expect("chain")
            .into_iter()
            .map(|l| l.code.as_str())
            .collect();
        assert_eq!(chain, vec!["a_A", "b_B", "c_C"]);
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_valid_catalog_is_clean() {
        let report = sample_registry().validate();
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn test_validate_empty_catalog() {
        let report = LocaleRegistry::default().validate();
        assert!(report.has_errors());
    }

    #[test]
    fn test_validate_collects_multiple_errors() {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("en_US", "A").with_default(true),
                Locale::new("en_GB", "B").with_default(true).with_fallback("xx_XX"),
                Locale::new("en_US", "C").with_url_segment("en-gb-2"),
            ],
            vec![],
        );
        let report = registry.validate();
        assert!(report.errors.iter().any(|e| e.contains("Duplicate locale code")));
        assert!(report.errors.iter().any(|e| e.contains("unregistered locale xx_XX")));
        assert!(report.errors.iter().any(|e| e.contains("global default")));
    }

    #[test]
    fn test_validate_reports_cycle() {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("a_A", "A").with_default(true).with_fallback("b_B"),
                Locale::new("b_B", "B").with_fallback("a_A"),
            ],
            vec![],
        );
        let report = registry.validate();
        assert!(report.errors.iter().any(|e| e.contains("cyclic")));
    }

    #[test]
    fn test_validate_domains() {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("en_US", "A").with_default(true),
                Locale::new("de_DE", "B"),
                Locale::new("fr_FR", "C"),
            ],
            vec![
                Domain::new("a.com", &["en_US", "xx_XX"]).with_default("de_DE"),
                Domain::new("b.com", &["en_US"]),
            ],
        );
        let report = registry.validate();
        assert!(report.errors.iter().any(|e| e.contains("unregistered locale xx_XX")));
        assert!(report.errors.iter().any(|e| e.contains("is not one of its locales")));
        assert!(report.errors.iter().any(|e| e.contains("belongs to both")));
        assert!(report.warnings.iter().any(|w| w.contains("fr_FR")));
    }

    #[test]
    fn test_validate_warns_without_default() {
        let registry = LocaleRegistry::new(vec![Locale::new("en_US", "A")], vec![]);
        let report = registry.validate();
        assert!(!report.has_errors());
        assert!(report.has_warnings());
    }
}
