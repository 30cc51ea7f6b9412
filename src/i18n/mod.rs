//! Locale catalog and request negotiation.
//!
//! # Architecture
//!
//! - `locale`: `Locale` and `Domain` catalog types
//! - `registry`: the configured catalog, defaults and fallback chains
//! - `negotiator`: resolves an inbound request to one locale
//! - `validator`: collects configuration problems into a report
//! - `metrics`: counters for which negotiation step won
//!
//! # Example
//!
//! ```rust,ignore
//! use localised_records::i18n::{LocaleRegistry, LocaleRequest, Negotiator, NegotiationSettings};
//! use localised_records::state::ExecutionContext;
//!
//! let settings = NegotiationSettings::default();
//! let request = LocaleRequest::new().with_accept_language("en-us;q=1,en;q=0.5");
//! let resolution = Negotiator::new(&registry, &settings).resolve(&request, ExecutionContext::Frontend);
//! let state = resolution.into_state(ExecutionContext::Frontend);
//! ```

mod locale;
mod metrics;
mod negotiator;
mod registry;
mod validator;

pub use locale::{Domain, Locale};
pub use metrics::{MetricsReport, ResolutionMetrics};
pub use negotiator::{
    detect_browser_locale, detect_geo_locale, parse_accept_language, LocaleRequest,
    NegotiationSettings, Negotiator, PersistLocale, Resolution, ResolutionSource,
};
pub use registry::{LocaleRegistry, MAX_FALLBACK_HOPS};
pub use validator::{validate_configuration, ValidationReport};
