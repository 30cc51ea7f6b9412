//! Locale-scoped versioning.
//!
//! Versioned classes keep draft and live copies of both the canonical rows
//! and the shadow rows, plus version history for each. Publishing works in
//! one locale at a time; unpublishing and archiving reuse the deletion
//! policy chain against the affected stages.

use crate::class::{Capability, InheritanceMode, RecordClass};
use crate::db::{effective_stage, stage_table, versions_table};
use crate::deletion::{DeletionOutcome, Removal};
use crate::engine::LocaleEngine;
use crate::error::{EngineError, Result};
use crate::i18n::ResolutionMetrics;
use crate::localisation::{record_exists, shadow_row_exists};
use crate::query::quote_ident;
use crate::state::{RequestState, Stage};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

/// One row of a record's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionEntry {
    pub version: i64,
    pub was_published: bool,
    pub was_archived: bool,

    /// The requested locale has shadow content at this version
    pub localised: bool,
    pub created: String,
}

impl LocaleEngine {
    /// Whether the record has a draft shadow row in `locale`.
    pub fn is_drafted_in_locale(&self, class: &RecordClass, id: i64, locale: &str) -> Result<bool> {
        class.require(Capability::Localised)?;
        self.db
            .with_connection(|conn| shadow_row_exists(conn, class, id, locale, Stage::Draft))
    }

    /// Whether the record has a live shadow row in `locale`.
    ///
    /// Classes without versioning have no live stage, so a record that exists
    /// in the locale counts as published.
    pub fn is_published_in_locale(&self, class: &RecordClass, id: i64, locale: &str) -> Result<bool> {
        class.require(Capability::Localised)?;
        let stage = effective_stage(class, Stage::Live);
        self.db
            .with_connection(|conn| shadow_row_exists(conn, class, id, locale, stage))
    }

    /// Publish the record in the state's locale.
    ///
    /// Copies the canonical draft rows and the locale's draft shadow rows to
    /// the live stage and marks the current version as published. Without an
    /// active locale only the canonical rows are published.
    pub fn publish(&self, state: &RequestState, class: &RecordClass, id: i64) -> Result<()> {
        class.require(Capability::Versioned)?;
        let locale = match state.locale() {
            Some(code) if class.has_capability(Capability::Localised) => {
                Some(self.registered_code(code)?)
            }
            _ => None,
        };

        let version = self.db.transaction(|conn| {
            let version = current_version(conn, class, id)?.ok_or_else(|| {
                EngineError::RecordNotFound {
                    class: class.name().to_string(),
                    id,
                }
            })?;

            let isolated = class.has_capability(Capability::Isolated);
            for level in class.hierarchy() {
                let mut columns = vec![quote_ident("ID")];
                if level.is_root() {
                    columns.push(quote_ident("Created"));
                    columns.push(quote_ident("LastEdited"));
                    columns.push(quote_ident("Version"));
                    if isolated {
                        columns.push(quote_ident("Locale"));
                    }
                }
                columns.extend(level.own_fields().iter().map(|field| quote_ident(&field.name)));
                let columns = columns.join(", ");

                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {} ({}) SELECT {} FROM {} WHERE \"ID\" = ?1",
                        quote_ident(&stage_table(level, Stage::Live)),
                        columns,
                        columns,
                        quote_ident(&stage_table(level, Stage::Draft))
                    ),
                    params![id],
                )?;
            }

            if let Some(code) = &locale {
                for level in class.localised_levels() {
                    let mut columns = vec![
                        quote_ident("RecordID"),
                        quote_ident("Locale"),
                        quote_ident("Version"),
                    ];
                    columns.extend(
                        level
                            .localisable_fields()
                            .iter()
                            .map(|field| quote_ident(&field.name)),
                    );
                    let columns = columns.join(", ");

                    conn.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {} ({}) SELECT {} FROM {} \
                             WHERE \"RecordID\" = ?1 AND \"Locale\" = ?2",
                            quote_ident(&level.shadow_table(Stage::Live.table_suffix())),
                            columns,
                            columns,
                            quote_ident(&level.shadow_table(Stage::Draft.table_suffix()))
                        ),
                        params![id, code],
                    )?;
                }
            }

            conn.execute(
                &format!(
                    "UPDATE {} SET \"WasPublished\" = 1 WHERE \"RecordID\" = ?1 AND \"Version\" = ?2",
                    quote_ident(&versions_table(class.root()))
                ),
                params![id, version],
            )?;
            Ok(version)
        })?;

        info!(class = class.name(), id, version, locale = ?locale, "Record published");
        Ok(())
    }

    /// Remove the record's live content in `locale`. The canonical live rows
    /// go too once no other locale stays published.
    pub fn unpublish_in_locale(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        locale: &str,
    ) -> Result<DeletionOutcome> {
        self.remove_in_locale(state, class, id, locale, Removal::Unpublish)
    }

    /// Archive the record in `locale`. The record itself is archived once no
    /// other locale depends on it.
    pub fn archive_in_locale(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        locale: &str,
    ) -> Result<DeletionOutcome> {
        self.remove_in_locale(state, class, id, locale, Removal::Archive)
    }

    /// Archive the record in every registered locale, then the record itself.
    pub fn archive_in_all_locales(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
    ) -> Result<DeletionOutcome> {
        self.remove_in_all_locales(state, class, id, Removal::Archive)
    }

    /// Version history, oldest first. With `locale`, each entry says whether
    /// that locale had content at the version.
    pub fn version_history(
        &self,
        class: &RecordClass,
        id: i64,
        locale: Option<&str>,
    ) -> Result<Vec<VersionEntry>> {
        class.require(Capability::Versioned)?;
        let locale = locale.map(|code| self.registered_code(code)).transpose()?;

        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT \"Version\", \"WasPublished\", \"WasArchived\", \"Created\" \
                 FROM {} WHERE \"RecordID\" = ?1 ORDER BY \"Version\"",
                quote_ident(&versions_table(class.root()))
            ))?;
            let mut entries = stmt
                .query_map(params![id], |row| {
                    Ok(VersionEntry {
                        version: row.get(0)?,
                        was_published: row.get(1)?,
                        was_archived: row.get(2)?,
                        localised: false,
                        created: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            if let Some(code) = &locale {
                for entry in &mut entries {
                    entry.localised = localised_at(conn, class, id, code, entry.version)?;
                }
            }
            Ok(entries)
        })
    }

    /// Whether the latest version of the record is an archive marker.
    pub fn is_archived(&self, class: &RecordClass, id: i64) -> Result<bool> {
        class.require(Capability::Versioned)?;
        self.db.with_connection(|conn| {
            let archived: Option<bool> = conn
                .query_row(
                    &format!(
                        "SELECT \"WasArchived\" FROM {} WHERE \"RecordID\" = ?1 \
                         ORDER BY \"Version\" DESC LIMIT 1",
                        quote_ident(&versions_table(class.root()))
                    ),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(archived.unwrap_or(false))
        })
    }

    /// The locale whose content satisfies a request for `locale`.
    ///
    /// Checks the state's stage under the inheritance mode of the state's
    /// context: `Exact` tries `locale` only, `Fallback` walks its fallback
    /// chain, and `Any` walks the chain and then settles on the global
    /// default when the canonical row exists. `None` means no applicable
    /// locale has content.
    pub fn source_locale(
        &self,
        state: &RequestState,
        class: &RecordClass,
        id: i64,
        locale: &str,
    ) -> Result<Option<String>> {
        class.require(Capability::Localised)?;
        let stage = effective_stage(class, state.stage());
        let mode = class.inheritance().mode_for(state.context());
        let chain = self.chain_codes(locale)?;
        let candidates = match mode {
            InheritanceMode::Exact => &chain[..1],
            InheritanceMode::Fallback | InheritanceMode::Any => &chain[..],
        };

        let found = self.db.with_connection(|conn| {
            for code in candidates {
                if shadow_row_exists(conn, class, id, code, stage)? {
                    return Ok(Some(code.clone()));
                }
            }
            if mode == InheritanceMode::Any && record_exists(conn, class, id, stage)? {
                return Ok(self.registry.global_default().map(|locale| locale.code.clone()));
            }
            Ok(None)
        })?;

        if found.is_none() {
            ResolutionMetrics::global().record_source_miss();
            debug!(
                class = class.name(),
                id,
                locale,
                mode = ?mode,
                stage = stage.as_str(),
                "No source locale"
            );
        }
        Ok(found)
    }
}

fn current_version(conn: &Connection, class: &RecordClass, id: i64) -> Result<Option<i64>> {
    let version = conn
        .query_row(
            &format!(
                "SELECT \"Version\" FROM {} WHERE \"ID\" = ?1",
                quote_ident(&stage_table(class.root(), Stage::Draft))
            ),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

fn localised_at(conn: &Connection, class: &RecordClass, id: i64, locale: &str, version: i64) -> Result<bool> {
    for level in class.localised_levels() {
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE \"RecordID\" = ?1 AND \"Locale\" = ?2 AND \"Version\" = ?3",
                quote_ident(&level.shadow_table("_Versions"))
            ),
            params![id, locale, version],
            |row| row.get(0),
        )?;
        if count > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}
