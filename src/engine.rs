//! Engine facade.
//!
//! `LocaleEngine` bundles the store with the locale catalog. The record
//! operations live next to the component they belong to (`localisation`,
//! `versioning`, `visibility`, `deletion`) as further `impl` blocks on this
//! type. Every operation takes the request state explicitly; nothing is read
//! from a process-wide "current locale".

use crate::class::RecordClass;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::i18n::{LocaleRegistry, LocaleRequest, NegotiationSettings, Negotiator};
use crate::state::{ExecutionContext, RequestState};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct LocaleEngine {
    pub(crate) db: Database,
    pub(crate) registry: Arc<LocaleRegistry>,
}

impl LocaleEngine {
    pub fn new(db: Database, registry: Arc<LocaleRegistry>) -> Self {
        Self { db, registry }
    }

    pub fn registry(&self) -> &LocaleRegistry {
        &self.registry
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Check a class and create its tables.
    pub fn install(&self, class: &RecordClass) -> Result<()> {
        class.check_compatible()?;
        self.db.ensure_schema(class)?;
        info!(
            class = class.name(),
            localised_levels = class.localised_levels().len(),
            "Record class installed"
        );
        Ok(())
    }

    /// Negotiate a locale for a request and build its state.
    pub fn resolve_locale(
        &self,
        settings: &NegotiationSettings,
        request: &LocaleRequest,
        context: ExecutionContext,
    ) -> RequestState {
        Negotiator::new(&self.registry, settings)
            .resolve(request, context)
            .into_state(context)
    }

    /// Registry spelling of a locale code; unknown codes are an error.
    pub(crate) fn registered_code(&self, code: &str) -> Result<String> {
        self.registry
            .get(code)
            .map(|locale| locale.code.clone())
            .ok_or_else(|| EngineError::UnknownLocale(code.to_string()))
    }

    /// Locale codes consulted for `code`, the code itself first.
    ///
    /// A code missing from the registry has no fallbacks; a cyclic fallback
    /// graph is an error.
    pub(crate) fn chain_codes(&self, code: &str) -> Result<Vec<String>> {
        match self.registry.fallback_chain(code) {
            Ok(chain) => Ok(chain.iter().map(|locale| locale.code.clone()).collect()),
            Err(EngineError::UnknownLocale(_)) => Ok(vec![code.to_string()]),
            Err(e) => Err(e),
        }
    }
}
