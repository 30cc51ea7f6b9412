//! Error taxonomy for the localisation engine.
//!
//! Resolution misses (no negotiable locale, no source locale) are not errors
//! and are modelled as `Option::None` by the callers. Everything here is
//! either a storage failure, propagated unchanged, or a precondition
//! violation that callers must treat as fatal.

use thiserror::Error;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The underlying store failed. Never retried by the engine.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A capability was used on a class that does not have it, or two
    /// incompatible capabilities were combined on one class.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A locale code that is not in the registry.
    #[error("unknown locale: {0}")]
    UnknownLocale(String),

    /// The fallback graph loops back on itself or is deeper than allowed.
    #[error("fallback chain for {locale} is cyclic or exceeds {max_hops} hops")]
    FallbackCycle { locale: String, max_hops: usize },

    /// A record id that does not exist in the canonical table.
    #[error("record {class}#{id} not found")]
    RecordNotFound { class: String, id: i64 },
}

impl EngineError {
    /// Whether this error is a programmer/configuration error that must
    /// not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfiguration(_) | EngineError::FallbackCycle { .. }
        )
    }

    pub(crate) fn missing_capability(class: &str, capability: &str) -> Self {
        EngineError::InvalidConfiguration(format!(
            "class {} does not have the {} capability",
            class, capability
        ))
    }
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
