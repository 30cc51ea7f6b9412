//! Deletion and archival policy chain.
//!
//! Dependent policies remove one locale's data and report whether other
//! locales still depend on the record (`blocked`). The terminal policy
//! removes the canonical rows and only runs when no dependent policy is
//! blocked. The chain is a list of `(capability, policy)` pairs; a dependent
//! policy runs only for classes that have its capability.

use crate::class::{Capability, RecordClass};
use crate::db::{stage_table, versions_table};
use crate::engine::LocaleEngine;
use crate::error::{EngineError, Result};
use crate::i18n::LocaleRegistry;
use crate::localisation::{record_exists, shadow_locales, stages_of};
use crate::query::quote_ident;
use crate::state::{RequestState, Stage};
use crate::visibility::{remove_visible, visible_codes};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

/// What a chain run does to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Removal {
    /// Remove draft data
    Delete,
    /// Remove draft and live data and mark the history archived
    Archive,
    /// Remove live data only
    Unpublish,
}

impl Removal {
    /// Stages affected for a class.
    pub fn stages(self, class: &RecordClass) -> Vec<Stage> {
        match self {
            Removal::Delete => vec![Stage::Draft],
            Removal::Unpublish => vec![Stage::Live],
            Removal::Archive => stages_of(class),
        }
    }
}

/// Everything a policy needs to act on one record.
pub struct PolicyContext<'a> {
    conn: &'a Connection,
    registry: &'a LocaleRegistry,
    pub class: &'a RecordClass,
    pub id: i64,
    pub state: &'a RequestState,
    pub removal: Removal,
}

impl<'a> PolicyContext<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        registry: &'a LocaleRegistry,
        class: &'a RecordClass,
        id: i64,
        state: &'a RequestState,
        removal: Removal,
    ) -> Self {
        Self {
            conn,
            registry,
            class,
            id,
            state,
            removal,
        }
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    pub fn registry(&self) -> &LocaleRegistry {
        self.registry
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.removal.stages(self.class)
    }

    /// The active locale; locale-scoped policies cannot run without one.
    fn active_locale(&self, policy: &str) -> Result<String> {
        let code = self.state.locale().ok_or_else(|| {
            EngineError::InvalidConfiguration(format!("{} needs an active locale", policy))
        })?;
        Ok(self
            .registry
            .get(code)
            .map_or_else(|| code.to_string(), |locale| locale.code.clone()))
    }

    /// Whether any registered locale other than `locale` is in `codes`.
    fn other_registered(&self, codes: &[String], locale: &str) -> bool {
        codes
            .iter()
            .any(|code| !code.eq_ignore_ascii_case(locale) && self.registry.contains(code))
    }

    /// Whether the root canonical row exists in any of the affected stages.
    fn record_present(&self) -> Result<bool> {
        for stage in self.stages() {
            if record_exists(self.conn, self.class, self.id, stage)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// One step of the chain.
pub trait DeletionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the policy. Returns `true` when the canonical record must stay.
    fn apply(&self, ctx: &PolicyContext<'_>) -> Result<bool>;

    /// Whether a block only means that other locales still hold data.
    /// Removing every locale in turn clears such a block, so a run over all
    /// locales uses its last pass. Any other block holds for the whole run.
    fn blocks_for_other_locales(&self) -> bool {
        false
    }
}

/// Removes the active locale's shadow rows on every localised level.
pub struct LocalisationRemoval;

impl DeletionPolicy for LocalisationRemoval {
    fn name(&self) -> &'static str {
        "LocalisationRemoval"
    }

    fn apply(&self, ctx: &PolicyContext<'_>) -> Result<bool> {
        ctx.class.require(Capability::Localised)?;
        let locale = ctx.active_locale(self.name())?;

        let mut remaining = Vec::new();
        for stage in ctx.stages() {
            for level in ctx.class.localised_levels() {
                ctx.conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE \"RecordID\" = ?1 AND \"Locale\" = ?2 COLLATE NOCASE",
                        quote_ident(&level.shadow_table(stage.table_suffix()))
                    ),
                    params![ctx.id, locale],
                )?;
            }
            remaining.extend(shadow_locales(ctx.conn, ctx.class, ctx.id, stage)?);
        }

        Ok(ctx.other_registered(&remaining, &locale))
    }

    fn blocks_for_other_locales(&self) -> bool {
        true
    }
}

/// Removes the active locale from the visible locales.
pub struct FilterRemoval;

impl DeletionPolicy for FilterRemoval {
    fn name(&self) -> &'static str {
        "FilterRemoval"
    }

    fn apply(&self, ctx: &PolicyContext<'_>) -> Result<bool> {
        ctx.class.require(Capability::Filtered)?;
        let locale = ctx.active_locale(self.name())?;

        remove_visible(ctx.conn, ctx.class, ctx.id, &locale)?;
        let remaining = visible_codes(ctx.conn, ctx.class, ctx.id)?;
        Ok(ctx.other_registered(&remaining, &locale))
    }

    fn blocks_for_other_locales(&self) -> bool {
        true
    }
}

/// Removes the canonical rows on every hierarchy level. Never blocks.
pub struct CanonicalRemoval;

impl DeletionPolicy for CanonicalRemoval {
    fn name(&self) -> &'static str {
        "CanonicalRemoval"
    }

    fn apply(&self, ctx: &PolicyContext<'_>) -> Result<bool> {
        let class = ctx.class;
        let versioned = class.has_capability(Capability::Versioned);

        if ctx.removal == Removal::Archive && versioned && ctx.record_present()? {
            let root = class.root();
            let table = quote_ident(&versions_table(root));
            let latest: i64 = ctx.conn.query_row(
                &format!(
                    "SELECT COALESCE(MAX(\"Version\"), 0) FROM {} WHERE \"RecordID\" = ?1",
                    table
                ),
                params![ctx.id],
                |row| row.get(0),
            )?;
            ctx.conn.execute(
                &format!(
                    "INSERT INTO {} (\"RecordID\", \"Version\", \"WasPublished\", \"WasArchived\", \"Created\") \
                     VALUES (?1, ?2, 0, 1, ?3)",
                    table
                ),
                params![ctx.id, latest + 1, Utc::now().to_rfc3339()],
            )?;
        }

        for stage in ctx.stages() {
            for level in class.hierarchy() {
                ctx.conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE \"ID\" = ?1",
                        quote_ident(&stage_table(level, stage))
                    ),
                    params![ctx.id],
                )?;
            }
            for level in class.localised_levels() {
                ctx.conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE \"RecordID\" = ?1",
                        quote_ident(&level.shadow_table(stage.table_suffix()))
                    ),
                    params![ctx.id],
                )?;
            }
        }

        if class.has_capability(Capability::Filtered) {
            let mut gone = true;
            for stage in stages_of(class) {
                if record_exists(ctx.conn, class, ctx.id, stage)? {
                    gone = false;
                }
            }
            if gone {
                ctx.conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE \"RecordID\" = ?1",
                        quote_ident(&class.filter_table())
                    ),
                    params![ctx.id],
                )?;
            }
        }

        Ok(false)
    }
}

/// Result of running a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeletionOutcome {
    /// A dependent policy kept the canonical record alive
    pub blocked: bool,

    /// The terminal policy removed existing canonical rows
    pub canonical_removed: bool,
}

/// Block results of one dependent pass, split by what they depend on.
#[derive(Debug, Clone, Copy, Default)]
struct Blocks {
    other_locales: bool,
    held: bool,
}

impl Blocks {
    fn any(self) -> bool {
        self.other_locales || self.held
    }
}

/// Ordered dependent policies plus the terminal policy.
pub struct PolicyChain {
    dependents: Vec<(Capability, Box<dyn DeletionPolicy>)>,
    terminal: Box<dyn DeletionPolicy>,
}

impl PolicyChain {
    /// Localisation removal, then filter removal, then canonical removal.
    pub fn standard() -> Self {
        Self {
            dependents: vec![
                dependent(Capability::Localised, LocalisationRemoval),
                dependent(Capability::Filtered, FilterRemoval),
            ],
            terminal: Box::new(CanonicalRemoval),
        }
    }

    /// Chain used for a removal kind. Unpublishing keeps visibility intact.
    pub fn for_removal(removal: Removal) -> Self {
        match removal {
            Removal::Unpublish => Self {
                dependents: vec![dependent(Capability::Localised, LocalisationRemoval)],
                terminal: Box::new(CanonicalRemoval),
            },
            Removal::Delete | Removal::Archive => Self::standard(),
        }
    }

    /// Append a dependent policy that runs for classes with `capability`.
    pub fn with_policy(mut self, capability: Capability, policy: Box<dyn DeletionPolicy>) -> Self {
        self.dependents.push((capability, policy));
        self
    }

    /// Names of the policies that apply to a class, in run order.
    pub fn applicable(&self, class: &RecordClass) -> Vec<&'static str> {
        self.dependents
            .iter()
            .filter(|(capability, _)| class.has_capability(*capability))
            .map(|(_, policy)| policy.name())
            .chain(std::iter::once(self.terminal.name()))
            .collect()
    }

    /// Run every applicable dependent policy. Returns whether any blocked.
    pub fn run_dependents(&self, ctx: &PolicyContext<'_>) -> Result<bool> {
        self.dependent_blocks(ctx).map(|blocks| blocks.any())
    }

    fn dependent_blocks(&self, ctx: &PolicyContext<'_>) -> Result<Blocks> {
        let mut blocks = Blocks::default();
        for (capability, policy) in &self.dependents {
            if !ctx.class.has_capability(*capability) {
                continue;
            }
            let result = policy.apply(ctx)?;
            debug!(
                policy = policy.name(),
                locale = ?ctx.state.locale(),
                blocked = result,
                "Policy applied"
            );
            if policy.blocks_for_other_locales() {
                blocks.other_locales |= result;
            } else {
                blocks.held |= result;
            }
        }
        Ok(blocks)
    }

    /// Run the terminal policy. Returns whether canonical rows existed.
    pub fn run_terminal(&self, ctx: &PolicyContext<'_>) -> Result<bool> {
        let present = ctx.record_present()?;
        self.terminal.apply(ctx)?;
        Ok(present)
    }

    /// Dependent policies, then the terminal policy unless blocked.
    pub fn run(&self, ctx: &PolicyContext<'_>) -> Result<DeletionOutcome> {
        let blocked = self.run_dependents(ctx)?;
        let canonical_removed = if blocked { false } else { self.run_terminal(ctx)? };
        Ok(DeletionOutcome {
            blocked,
            canonical_removed,
        })
    }
}

impl LocaleEngine {
    /// Delete a record's draft data in one locale. The canonical record goes
    /// too once no other locale depends on it.
    pub fn delete_in_locale(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        locale: &str,
    ) -> Result<DeletionOutcome> {
        self.remove_in_locale(state, class, id, locale, Removal::Delete)
    }

    /// Delete a record's draft data in every registered locale, then the
    /// canonical record.
    pub fn delete_in_all_locales(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
    ) -> Result<DeletionOutcome> {
        self.remove_in_all_locales(state, class, id, Removal::Delete)
    }

    /// Run `chain` in every registered locale, then its terminal policy
    /// unless a dependent policy still blocks.
    pub fn delete_in_all_locales_with(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        chain: &PolicyChain,
    ) -> Result<DeletionOutcome> {
        self.remove_with_chain(state, class, id, Removal::Delete, chain)
    }

    /// Run a single policy against a record inside a transaction.
    pub fn apply_policy(
        &self,
        state: &RequestState,
        class: &RecordClass,
        id: i64,
        policy: &dyn DeletionPolicy,
        removal: Removal,
    ) -> Result<bool> {
        self.db.transaction(|conn| {
            let ctx = PolicyContext::new(conn, &self.registry, class, id, state, removal);
            policy.apply(&ctx)
        })
    }

    pub(crate) fn remove_in_locale(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        locale: &str,
        removal: Removal,
    ) -> Result<DeletionOutcome> {
        check_removal(class, removal)?;
        let code = self.registered_code(locale)?;
        let chain = PolicyChain::for_removal(removal);

        let outcome = self.db.transaction(|conn| {
            state.with_locale(&code, |scoped| {
                let ctx = PolicyContext::new(conn, &self.registry, class, id, scoped, removal);
                chain.run(&ctx)
            })
        })?;

        info!(
            class = class.name(),
            id,
            locale = %code,
            removal = ?removal,
            blocked = outcome.blocked,
            canonical_removed = outcome.canonical_removed,
            "Removal in locale finished"
        );
        Ok(outcome)
    }

    pub(crate) fn remove_in_all_locales(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        removal: Removal,
    ) -> Result<DeletionOutcome> {
        self.remove_with_chain(state, class, id, removal, &PolicyChain::for_removal(removal))
    }

    fn remove_with_chain(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        removal: Removal,
        chain: &PolicyChain,
    ) -> Result<DeletionOutcome> {
        check_removal(class, removal)?;
        let codes: Vec<String> = self
            .registry
            .locales()
            .iter()
            .map(|locale| locale.code.clone())
            .collect();

        let outcome = self.db.transaction(|conn| {
            // Other-locale blocks count from the last pass only.
            let mut other_locales = false;
            let mut held = false;
            for code in &codes {
                let blocks = state.with_locale(code, |scoped| {
                    let ctx = PolicyContext::new(conn, &self.registry, class, id, scoped, removal);
                    chain.dependent_blocks(&ctx)
                })?;
                other_locales = blocks.other_locales;
                held |= blocks.held;
            }
            let blocked = other_locales || held;

            if blocked {
                return Ok(DeletionOutcome {
                    blocked,
                    canonical_removed: false,
                });
            }
            let ctx = PolicyContext::new(conn, &self.registry, class, id, state, removal);
            Ok(DeletionOutcome {
                blocked,
                canonical_removed: chain.run_terminal(&ctx)?,
            })
        })?;

        info!(
            class = class.name(),
            id,
            removal = ?removal,
            blocked = outcome.blocked,
            canonical_removed = outcome.canonical_removed,
            "Removal in all locales finished"
        );
        Ok(outcome)
    }
}

fn dependent(
    capability: Capability,
    policy: impl DeletionPolicy + 'static,
) -> (Capability, Box<dyn DeletionPolicy>) {
    (capability, Box::new(policy))
}

fn check_removal(class: &RecordClass, removal: Removal) -> Result<()> {
    class.check_compatible()?;
    if removal == Removal::Unpublish {
        class.require(Capability::Versioned)?;
    }
    Ok(())
}
