use crate::i18n::{Domain, Locale, LocaleRegistry, NegotiationSettings};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Config {
    // Catalog
    pub catalog_path: String,

    // Server
    pub port: u16,

    // Negotiation
    pub negotiation: NegotiationSettings,
}

/// Locale and domain catalog as stored on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    pub locales: Vec<Locale>,

    #[serde(default)]
    pub domains: Vec<Domain>,
}

impl Catalog {
    pub fn into_registry(self) -> LocaleRegistry {
        LocaleRegistry::new(self.locales, self.domains)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = NegotiationSettings::default();

        Ok(Self {
            // Catalog
            catalog_path: std::env::var("LOCALE_CATALOG")
                .unwrap_or_else(|_| "locales.json".to_string()),

            // Server
            port: match non_empty("PORT") {
                Some(value) => value.parse().context("PORT must be a port number")?,
                None => 8080,
            },

            // Negotiation
            negotiation: NegotiationSettings {
                query_param: non_empty("LOCALE_QUERY_PARAM").unwrap_or(defaults.query_param),
                frontend_key: optional_key("LOCALE_COOKIE", defaults.frontend_key),
                admin_key: optional_key("LOCALE_ADMIN_COOKIE", defaults.admin_key),
                cookie_days: match non_empty("LOCALE_COOKIE_DAYS") {
                    Some(value) => value
                        .parse()
                        .context("LOCALE_COOKIE_DAYS must be a whole number of days")?,
                    None => defaults.cookie_days,
                },
                geo_header: optional_key("GEO_COUNTRY_HEADER", defaults.geo_header),
                detect_locale: flag("DETECT_LOCALE")?.unwrap_or(defaults.detect_locale),
                remember_locale: flag("REMEMBER_LOCALE")?.unwrap_or(defaults.remember_locale),
                force_domain_mode: flag("FORCE_DOMAIN_MODE")?,
            },
        })
    }
}

/// Load the locale catalog from a JSON file.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Catalog> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read locale catalog {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse locale catalog {}", path.display()))
}

/// Value of a variable, treating an empty value as unset.
fn non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A key that is on by default: unset keeps the default, empty disables it.
fn optional_key(name: &str, default: Option<String>) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => None,
        Ok(value) => Some(value.trim().to_string()),
        Err(_) => default,
    }
}

fn flag(name: &str) -> Result<Option<bool>> {
    match non_empty(name) {
        None => Ok(None),
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => anyhow::bail!("{} must be true or false, got {:?}", name, value),
        },
    }
}
