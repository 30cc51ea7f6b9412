//! Request-scoped locale state.
//!
//! A `RequestState` is created once per inbound request and passed by
//! reference through every engine call. Nothing here is global: two requests
//! running on different threads each own their own state.
//!
//! Temporary overrides (acting "as" another locale, or reading another
//! stage) go through [`RequestState::with_state`], which snapshots the state,
//! runs a closure against it and restores the snapshot when the closure
//! finishes. The restore runs from a drop guard, so it also happens when the
//! closure returns an `Err` or panics.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Whether the engine runs for a public visitor or an editor.
///
/// This is the single switch consulted for inheritance-mode selection and
/// visibility filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    #[default]
    Frontend,
    Admin,
}

impl ExecutionContext {
    /// Stage read by default in this context.
    pub fn default_stage(self) -> Stage {
        match self {
            ExecutionContext::Frontend => Stage::Live,
            ExecutionContext::Admin => Stage::Draft,
        }
    }
}

/// Publication stage of a versioned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Draft,
    Live,
}

impl Stage {
    /// Suffix appended to a base table name for this stage.
    pub fn table_suffix(self) -> &'static str {
        match self {
            Stage::Draft => "",
            Stage::Live => "_Live",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Draft => "draft",
            Stage::Live => "live",
        }
    }
}

/// Locale state for one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestState {
    locale: Option<String>,
    domain: Option<String>,
    context: ExecutionContext,
    domain_mode: bool,
    stage: Stage,
}

impl RequestState {
    /// Create a state for a context with no locale selected yet.
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            locale: None,
            domain: None,
            context,
            domain_mode: false,
            stage: context.default_stage(),
        }
    }

    pub fn frontend() -> Self {
        Self::new(ExecutionContext::Frontend)
    }

    pub fn admin() -> Self {
        Self::new(ExecutionContext::Admin)
    }

    /// Builder form of [`set_locale`](Self::set_locale).
    pub fn for_locale(mut self, code: &str) -> Self {
        self.set_locale(code);
        self
    }

    /// Builder form of [`set_domain`](Self::set_domain).
    pub fn for_domain(mut self, host: &str) -> Self {
        self.set_domain(Some(host.to_string()));
        self.domain_mode = true;
        self
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn set_locale(&mut self, code: &str) {
        self.locale = Some(code.to_string());
    }

    pub fn clear_locale(&mut self) {
        self.locale = None;
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn set_domain(&mut self, host: Option<String>) {
        self.domain = host;
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn is_frontend(&self) -> bool {
        self.context == ExecutionContext::Frontend
    }

    /// Switch context. The reading stage follows the new context's default.
    pub fn set_context(&mut self, context: ExecutionContext) {
        self.context = context;
        self.stage = context.default_stage();
    }

    pub fn set_is_frontend(&mut self, is_frontend: bool) {
        self.set_context(if is_frontend {
            ExecutionContext::Frontend
        } else {
            ExecutionContext::Admin
        });
    }

    pub fn domain_mode(&self) -> bool {
        self.domain_mode
    }

    pub fn set_domain_mode(&mut self, enabled: bool) {
        self.domain_mode = enabled;
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Run `f` against this state and restore the current values afterwards.
    ///
    /// Changes `f` makes are visible to everything it calls and are undone on
    /// exit, whether `f` returns normally, returns an error value or panics.
    /// Nested calls each restore their own snapshot.
    pub fn with_state<T>(&mut self, f: impl FnOnce(&mut RequestState) -> T) -> T {
        let mut guard = StateGuard::new(self);
        f(&mut guard)
    }

    /// Run `f` with `code` installed as the active locale.
    pub fn with_locale<T>(&mut self, code: &str, f: impl FnOnce(&mut RequestState) -> T) -> T {
        self.with_state(|state| {
            state.set_locale(code);
            f(state)
        })
    }

    /// Run `f` reading from `stage`.
    pub fn with_stage<T>(&mut self, stage: Stage, f: impl FnOnce(&mut RequestState) -> T) -> T {
        self.with_state(|state| {
            state.set_stage(stage);
            f(state)
        })
    }
}

impl Default for RequestState {
    fn default() -> Self {
        Self::frontend()
    }
}

/// Restores a snapshot of the state when dropped.
struct StateGuard<'a> {
    state: &'a mut RequestState,
    saved: Option<RequestState>,
}

impl<'a> StateGuard<'a> {
    fn new(state: &'a mut RequestState) -> Self {
        let saved = Some(state.clone());
        Self { state, saved }
    }
}

impl Deref for StateGuard<'_> {
    type Target = RequestState;

    fn deref(&self) -> &RequestState {
        self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut RequestState {
        self.state
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.state = saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    // ==================== Construction Tests ====================

    #[test]
    fn test_frontend_reads_live() {
        let state = RequestState::frontend();
        assert!(state.is_frontend());
        assert_eq!(state.stage(), Stage::Live);
        assert_eq!(state.locale(), None);
    }

    #[test]
    fn test_admin_reads_draft() {
        let state = RequestState::admin().for_locale("en_US");
        assert!(!state.is_frontend());
        assert_eq!(state.stage(), Stage::Draft);
        assert_eq!(state.locale(), Some("en_US"));
    }

    #[test]
    fn test_set_is_frontend_switches_stage() {
        let mut state = RequestState::admin();
        state.set_is_frontend(true);
        assert_eq!(state.context(), ExecutionContext::Frontend);
        assert_eq!(state.stage(), Stage::Live);
    }

    #[test]
    fn test_for_domain_enables_domain_mode() {
        let state = RequestState::frontend().for_domain("example.com");
        assert_eq!(state.domain(), Some("example.com"));
        assert!(state.domain_mode());
    }

    // ==================== Scoped Override Tests ====================

    #[test]
    fn test_with_locale_installs_and_restores() {
        let mut state = RequestState::frontend().for_locale("en_US");

        let seen = state.with_locale("de_DE", |scoped| scoped.locale().map(str::to_string));

        assert_eq!(seen.as_deref(), Some("de_DE"));
        assert_eq!(state.locale(), Some("en_US"));
    }

    #[test]
    fn test_with_state_restores_every_field() {
        let mut state = RequestState::frontend().for_locale("en_US");
        let before = state.clone();

        state.with_state(|scoped| {
            scoped.set_locale("fr_FR");
            scoped.set_domain(Some("example.fr".to_string()));
            scoped.set_is_frontend(false);
            scoped.set_domain_mode(true);
        });

        assert_eq!(state, before);
    }

    #[test]
    fn test_nested_overrides_restore_in_order() {
        let mut state = RequestState::admin().for_locale("en_US");

        state.with_locale("de_DE", |outer| {
            outer.with_locale("fr_FR", |inner| {
                assert_eq!(inner.locale(), Some("fr_FR"));
            });
            assert_eq!(outer.locale(), Some("de_DE"));
        });

        assert_eq!(state.locale(), Some("en_US"));
    }

    #[test]
    fn test_restores_after_error_result() {
        let mut state = RequestState::frontend().for_locale("en_US");

        let result: Result<(), String> = state.with_locale("de_DE", |_| Err("boom".to_string()));

        assert!(result.is_err());
        assert_eq!(state.locale(), Some("en_US"));
    }

    #[test]
    fn test_restores_after_panic() {
        let mut state = RequestState::frontend().for_locale("en_US");

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: () = state.with_locale("de_DE", |_| panic!("body failed"));
        }));

        assert!(outcome.is_err());
        assert_eq!(state.locale(), Some("en_US"));
    }

    #[test]
    fn test_with_stage_restores_stage() {
        let mut state = RequestState::frontend();
        let stage = state.with_stage(Stage::Draft, |scoped| scoped.stage());
        assert_eq!(stage, Stage::Draft);
        assert_eq!(state.stage(), Stage::Live);
    }

    // ==================== Stage Tests ====================

    #[test]
    fn test_stage_table_suffix() {
        assert_eq!(Stage::Draft.table_suffix(), "");
        assert_eq!(Stage::Live.table_suffix(), "_Live");
        assert_eq!(Stage::Live.as_str(), "live");
    }
}
