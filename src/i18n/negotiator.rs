//! Locale negotiation: resolve an inbound request to a single locale.
//!
//! Priority chain, first match wins:
//! 1. explicit query/routing parameter
//! 2. persisted locale (separate keys for front end and admin)
//! 3. `Accept-Language` negotiation (front end, detection enabled)
//! 4. geo-IP country header (front end, detection enabled)
//! 5. domain default, then global default
//!
//! Negotiation never fails. The only way to get no locale back is an empty
//! catalog.

use super::locale::Locale;
use super::metrics::ResolutionMetrics;
use super::registry::LocaleRegistry;
use crate::state::{ExecutionContext, RequestState};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// Geo results meaning "unknown country".
const GEO_UNKNOWN: &str = "XX";
/// Geo results meaning "anonymising network".
const GEO_ANONYMOUS: &str = "T1";

/// Tunables for negotiation and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NegotiationSettings {
    /// Query parameter that forces the locale
    pub query_param: String,

    /// Persistence key for the front end; `None` disables persistence there
    pub frontend_key: Option<String>,

    /// Persistence key for the admin context; `None` disables persistence there
    pub admin_key: Option<String>,

    /// Cookie lifetime in days
    pub cookie_days: u32,

    /// Name of the reverse-proxy geo country header; `None` disables geo detection
    pub geo_header: Option<String>,

    /// Enable browser and geo detection on the front end
    pub detect_locale: bool,

    /// Read and write the persisted front-end locale
    pub remember_locale: bool,

    /// Force domain segmentation on or off; `None` means "on when domains exist"
    pub force_domain_mode: Option<bool>,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            query_param: "l".to_string(),
            frontend_key: Some("locale".to_string()),
            admin_key: Some("admin_locale".to_string()),
            cookie_days: 90,
            geo_header: Some("CF-IPCountry".to_string()),
            detect_locale: false,
            remember_locale: true,
            force_domain_mode: None,
        }
    }
}

impl NegotiationSettings {
    /// Persistence key for a context, if persistence applies there.
    pub fn persistence_key(&self, context: ExecutionContext) -> Option<&str> {
        match context {
            ExecutionContext::Admin => self.admin_key.as_deref(),
            ExecutionContext::Frontend if self.remember_locale => self.frontend_key.as_deref(),
            ExecutionContext::Frontend => None,
        }
    }
}

/// The parts of a request that negotiation looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocaleRequest {
    /// Value of the locale query/routing parameter
    pub param: Option<String>,

    /// Locale stored under the front-end persistence key
    pub persisted_frontend: Option<String>,

    /// Locale stored under the admin persistence key
    pub persisted_admin: Option<String>,

    /// Raw `Accept-Language` header
    pub accept_language: Option<String>,

    /// ISO country code from the geo header
    pub geo_country: Option<String>,

    /// `Host` header
    pub host: Option<String>,
}

impl LocaleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, value: &str) -> Self {
        self.param = Some(value.to_string());
        self
    }

    pub fn with_persisted(mut self, context: ExecutionContext, value: &str) -> Self {
        match context {
            ExecutionContext::Frontend => self.persisted_frontend = Some(value.to_string()),
            ExecutionContext::Admin => self.persisted_admin = Some(value.to_string()),
        }
        self
    }

    pub fn with_accept_language(mut self, header: &str) -> Self {
        self.accept_language = Some(header.to_string());
        self
    }

    pub fn with_geo_country(mut self, country: &str) -> Self {
        self.geo_country = Some(country.to_string());
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    fn persisted(&self, context: ExecutionContext) -> Option<&str> {
        match context {
            ExecutionContext::Frontend => self.persisted_frontend.as_deref(),
            ExecutionContext::Admin => self.persisted_admin.as_deref(),
        }
    }
}

/// Which step of the priority chain produced the locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Parameter,
    Persisted,
    Browser,
    Geo,
    Default,
}

/// Instruction to store the resolved locale under a persistence key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistLocale {
    pub key: String,
    pub value: String,
}

/// Outcome of negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Resolved locale code; `None` only when the catalog is empty
    pub locale: Option<String>,

    /// Active domain host when domain segmentation applies
    pub domain: Option<String>,

    pub domain_mode: bool,
    pub source: ResolutionSource,

    /// Present when the locale must be written back to persistence
    pub persist: Option<PersistLocale>,
}

impl Resolution {
    /// Turn the resolution into request state for `context`.
    pub fn into_state(self, context: ExecutionContext) -> RequestState {
        let mut state = RequestState::new(context);
        if let Some(code) = &self.locale {
            state.set_locale(code);
        }
        state.set_domain(self.domain);
        state.set_domain_mode(self.domain_mode);
        state
    }
}

/// Resolves requests against a registry.
pub struct Negotiator<'a> {
    registry: &'a LocaleRegistry,
    settings: &'a NegotiationSettings,
}

impl<'a> Negotiator<'a> {
    pub fn new(registry: &'a LocaleRegistry, settings: &'a NegotiationSettings) -> Self {
        Self { registry, settings }
    }

    /// Whether domain segmentation is active.
    pub fn domain_mode(&self) -> bool {
        self.settings
            .force_domain_mode
            .unwrap_or_else(|| !self.registry.domains().is_empty())
    }

    /// Run the priority chain for a request.
    pub fn resolve(&self, request: &LocaleRequest, context: ExecutionContext) -> Resolution {
        let domain_mode = self.domain_mode();
        let domain = if domain_mode {
            request
                .host
                .as_deref()
                .and_then(|host| self.registry.domain_for_host(host))
        } else {
            None
        };
        let candidates: Vec<&Locale> = match domain {
            Some(domain) => self.registry.locales_for_domain(domain),
            None => self.registry.locales().iter().collect(),
        };
        let detect = context == ExecutionContext::Frontend && self.settings.detect_locale;

        let (locale, source) = if let Some(locale) = self.from_parameter(request, &candidates) {
            (Some(locale), ResolutionSource::Parameter)
        } else if let Some(locale) = self.from_persisted(request, context, &candidates) {
            (Some(locale), ResolutionSource::Persisted)
        } else if let Some(locale) = request
            .accept_language
            .as_deref()
            .filter(|_| detect)
            .and_then(|header| detect_browser_locale(header, &candidates))
        {
            (Some(locale), ResolutionSource::Browser)
        } else if let Some(locale) = request
            .geo_country
            .as_deref()
            .filter(|_| detect && self.settings.geo_header.is_some())
            .and_then(|country| detect_geo_locale(country, &candidates))
        {
            (Some(locale), ResolutionSource::Geo)
        } else {
            let fallback = domain
                .and_then(|domain| self.registry.default_for_domain(domain))
                .or_else(|| self.registry.global_default());
            (fallback, ResolutionSource::Default)
        };

        let code = locale.map(|l| l.code.clone());
        debug!(
            "Resolved locale {:?} from {:?} ({:?} context)",
            code, source, context
        );
        ResolutionMetrics::global().record_resolution(source);

        let persist = code.as_ref().and_then(|value| {
            let key = self.settings.persistence_key(context)?;
            if request.persisted(context) == Some(value.as_str()) {
                return None;
            }
            Some(PersistLocale {
                key: key.to_string(),
                value: value.clone(),
            })
        });

        Resolution {
            locale: code,
            domain: domain.map(|d| d.host.clone()),
            domain_mode,
            source,
            persist,
        }
    }

    /// Explicit parameter, matched against codes then URL segments.
    fn from_parameter<'c>(
        &self,
        request: &LocaleRequest,
        candidates: &[&'c Locale],
    ) -> Option<&'c Locale> {
        let value = request.param.as_deref()?.trim();
        find_candidate(candidates, |l| l.code.eq_ignore_ascii_case(value))
            .or_else(|| find_candidate(candidates, |l| l.url_segment.eq_ignore_ascii_case(value)))
    }

    /// Previously persisted locale for the context, if still registered.
    fn from_persisted<'c>(
        &self,
        request: &LocaleRequest,
        context: ExecutionContext,
        candidates: &[&'c Locale],
    ) -> Option<&'c Locale> {
        self.settings.persistence_key(context)?;
        let value = request.persisted(context)?;
        find_candidate(candidates, |l| l.code.eq_ignore_ascii_case(value))
    }
}

fn find_candidate<'c>(candidates: &[&'c Locale], pred: impl Fn(&Locale) -> bool) -> Option<&'c Locale> {
    candidates.iter().copied().find(|locale| pred(locale))
}

static ACCEPT_LANGUAGE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Parse an `Accept-Language` header into `(tag, quality)` pairs.
///
/// Grammar per entry: `tag ( ";q=" factor )?`, default factor 1.0. Entries
/// are ordered by descending quality; entries with equal quality keep header
/// order. Malformed entries, wildcards and `q=0` entries are dropped. Tags
/// are lowercased with `_` normalised to `-`.
pub fn parse_accept_language(header: &str) -> Vec<(String, f32)> {
    let regex = ACCEPT_LANGUAGE_REGEX.get_or_init(|| {
        Regex::new(r"(?i)^\s*([a-z]{1,8}(?:[-_][a-z0-9]{1,8})*)\s*(?:;\s*q\s*=\s*([01](?:\.[0-9]{0,3})?))?\s*$")
            .expect("static regex is valid")
    });

    let mut entries: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let captures = regex.captures(part)?;
            let tag = captures.get(1)?.as_str().to_lowercase().replace('_', "-");
            let quality = match captures.get(2) {
                Some(q) => q.as_str().parse::<f32>().ok()?,
                None => 1.0,
            };
            (quality > 0.0 && quality <= 1.0).then_some((tag, quality))
        })
        .collect();

    // Stable sort keeps header order inside each quality group.
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    entries
}

/// Whether a browser tag selects a locale: exact match, or one tag is a
/// prefix of the other ending at a subtag boundary (`en` matches `en_NZ`,
/// `en-gb-oxendict` matches `en_GB`).
fn tag_matches(tag: &str, locale: &Locale) -> bool {
    let locale_tag = locale.http_tag();
    let extends = |long: &str, short: &str| {
        long.strip_prefix(short)
            .is_some_and(|rest| rest.starts_with('-'))
    };
    locale_tag == tag || extends(&locale_tag, tag) || extends(tag, &locale_tag)
}

/// Browser negotiation over the candidate locales.
pub fn detect_browser_locale<'c>(header: &str, candidates: &[&'c Locale]) -> Option<&'c Locale> {
    parse_accept_language(header)
        .iter()
        .find_map(|(tag, _)| find_candidate(candidates, |l| tag_matches(tag, l)))
}

/// Geo negotiation: match the country code against locale regions.
pub fn detect_geo_locale<'c>(country: &str, candidates: &[&'c Locale]) -> Option<&'c Locale> {
    let country = country.trim();
    if country.is_empty()
        || country.eq_ignore_ascii_case(GEO_UNKNOWN)
        || country.eq_ignore_ascii_case(GEO_ANONYMOUS)
    {
        return None;
    }
    find_candidate(candidates, |l| {
        l.region()
            .is_some_and(|region| region.eq_ignore_ascii_case(country))
    })
}
