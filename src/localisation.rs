//! Field localisation store.
//!
//! Reads merge each localisable column from the shadow rows of the active
//! locale's fallback chain, falling back to the canonical column. Writes
//! split the values: localisable fields go to the shadow row of the active
//! locale, everything else to the canonical row. The global default locale
//! also writes its localisable values to the canonical row, which serves as
//! the default-locale content.

use crate::class::{Capability, InheritanceMode, RecordClass};
use crate::db::{effective_stage, stage_table, versions_table};
use crate::engine::LocaleEngine;
use crate::error::{EngineError, Result};
use crate::query::{column_ref, localised_expr, quote_ident, JoinKind, SelectQuery};
use crate::record::{FieldValue, Record, Values};
use crate::state::{ExecutionContext, RequestState, Stage};
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

/// Alias of the visibility association in read queries.
const FILTER_ALIAS: &str = "FilteredLocales";

impl LocaleEngine {
    /// Read one record as seen by `state`.
    ///
    /// Returns `None` when the record does not exist in the state's stage,
    /// is hidden by visibility or isolation, or has no content under the
    /// context's inheritance mode.
    pub fn read(&self, state: &RequestState, class: &RecordClass, id: i64) -> Result<Option<Record>> {
        self.db
            .with_connection(|conn| self.read_in(conn, state, class, id, true))
    }

    /// All records visible to `state`, ordered by id.
    pub fn list(&self, state: &RequestState, class: &RecordClass) -> Result<Vec<Record>> {
        self.db.with_connection(|conn| {
            let (mut query, outputs) = self.build_select(state, class, true)?;
            query.order_by(column_ref(class.root().table(), "ID"));
            load_records(conn, &query, &outputs)
        })
    }

    /// Create a record and return its id.
    ///
    /// Every value is stored on the canonical rows. With an active locale the
    /// localisable values are also stored in that locale's shadow rows, and
    /// isolated classes are stamped with the locale.
    pub fn create(&self, state: &RequestState, class: &RecordClass, values: &Values) -> Result<i64> {
        class.check_compatible()?;
        check_fields(class, values)?;

        let isolated_locale = match (class.has_capability(Capability::Isolated), state.locale()) {
            (true, Some(code)) => Some(self.registered_code(code)?),
            _ => None,
        };

        let id = self.db.transaction(|conn| {
            let now = Utc::now().to_rfc3339();
            let mut id = None;

            for level in class.hierarchy() {
                let mut columns = Vec::new();
                let mut params: Vec<FieldValue> = Vec::new();

                match id {
                    None => {
                        columns.push(quote_ident("Created"));
                        params.push(now.as_str().into());
                        columns.push(quote_ident("LastEdited"));
                        params.push(now.as_str().into());
                        if let Some(code) = &isolated_locale {
                            columns.push(quote_ident("Locale"));
                            params.push(code.as_str().into());
                        }
                    }
                    Some(id) => {
                        columns.push(quote_ident("ID"));
                        params.push(FieldValue::Int(id));
                    }
                }
                for field in level.own_fields() {
                    if let Some(value) = values.get(&field.name) {
                        columns.push(quote_ident(&field.name));
                        params.push(value.clone());
                    }
                }

                insert_row(conn, &stage_table(level, Stage::Draft), &columns, params)?;
                if id.is_none() {
                    id = Some(conn.last_insert_rowid());
                }
            }

            let id = id.unwrap_or_default();
            self.write_in(conn, state, class, id, values)?;
            Ok(id)
        })?;

        debug!(class = class.name(), id, locale = ?state.locale(), "Record created");
        Ok(id)
    }

    /// Write values to an existing record under the active locale.
    pub fn write(&self, state: &RequestState, class: &RecordClass, id: i64, values: &Values) -> Result<()> {
        self.db
            .transaction(|conn| self.write_in(conn, state, class, id, values))
    }

    /// Whether the record has shadow rows for `locale` in any stage.
    pub fn exists_in_locale(&self, class: &RecordClass, id: i64, locale: &str) -> Result<bool> {
        class.require(Capability::Localised)?;
        self.db.with_connection(|conn| {
            for stage in stages_of(class) {
                if shadow_row_exists(conn, class, id, locale, stage)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Registered locales the record has shadow rows for, in registry order.
    pub fn localised_locales(&self, class: &RecordClass, id: i64) -> Result<Vec<String>> {
        class.require(Capability::Localised)?;
        self.db.with_connection(|conn| {
            let mut found = Vec::new();
            for stage in stages_of(class) {
                found.extend(shadow_locales(conn, class, id, stage)?);
            }
            Ok(self
                .registry
                .locales()
                .iter()
                .filter(|locale| found.iter().any(|code| code.eq_ignore_ascii_case(&locale.code)))
                .map(|locale| locale.code.clone())
                .collect())
        })
    }

    /// Copy the effective draft values of `from` into the `to` shadow rows.
    ///
    /// Values `from` inherits through its fallback chain or from canonical
    /// content are copied too, so `to` ends up showing what `from` shows.
    pub fn copy_between_locales(
        &self,
        state: &mut RequestState,
        class: &RecordClass,
        id: i64,
        from: &str,
        to: &str,
    ) -> Result<()> {
        class.require(Capability::Localised)?;
        let from = self.registered_code(from)?;
        let to = self.registered_code(to)?;

        self.db.transaction(|conn| {
            state.with_state(|scoped| {
                scoped.set_context(ExecutionContext::Admin);
                scoped.set_locale(&from);
                let record = self
                    .read_in(conn, scoped, class, id, false)?
                    .ok_or_else(|| EngineError::RecordNotFound {
                        class: class.name().to_string(),
                        id,
                    })?;

                let values: Values = record
                    .values
                    .into_iter()
                    .filter(|(name, _)| {
                        class
                            .hierarchy()
                            .iter()
                            .any(|level| level.is_field_localised(name))
                    })
                    .collect();

                scoped.set_locale(&to);
                self.write_in(conn, scoped, class, id, &values)
            })
        })?;

        debug!(class = class.name(), id, from = %from, to = %to, "Copied localised values");
        Ok(())
    }

    pub(crate) fn read_in(
        &self,
        conn: &Connection,
        state: &RequestState,
        class: &RecordClass,
        id: i64,
        restrict: bool,
    ) -> Result<Option<Record>> {
        let (mut query, outputs) = self.build_select(state, class, restrict)?;
        query.filter(
            format!("{} = ?", column_ref(class.root().table(), "ID")),
            vec![FieldValue::Int(id)],
        );
        Ok(load_records(conn, &query, &outputs)?.into_iter().next())
    }

    /// Write `values` to the draft stage under the state's locale.
    pub(crate) fn write_in(
        &self,
        conn: &Connection,
        state: &RequestState,
        class: &RecordClass,
        id: i64,
        values: &Values,
    ) -> Result<()> {
        check_fields(class, values)?;

        let root = class.root();
        let versioned = class.has_capability(Capability::Versioned);
        let shadow_locale = match state.locale() {
            Some(code) if class.has_capability(Capability::Localised) => {
                Some(self.registered_code(code)?)
            }
            _ => None,
        };
        let canonical_gets_localised = shadow_locale
            .as_deref()
            .map_or(true, |code| self.registry.is_global_default(code));

        let current: Option<i64> = if versioned {
            conn.query_row(
                &format!(
                    "SELECT \"Version\" FROM {} WHERE \"ID\" = ?1",
                    quote_ident(&stage_table(root, Stage::Draft))
                ),
                params![id],
                |row| row.get(0),
            )
            .optional()?
        } else {
            conn.query_row(
                &format!(
                    "SELECT 0 FROM {} WHERE \"ID\" = ?1",
                    quote_ident(&stage_table(root, Stage::Draft))
                ),
                params![id],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(current) = current else {
            return Err(EngineError::RecordNotFound {
                class: class.name().to_string(),
                id,
            });
        };
        let version = current + 1;
        let now = Utc::now().to_rfc3339();

        for level in class.hierarchy() {
            let mut assignments = Vec::new();
            let mut params: Vec<FieldValue> = Vec::new();

            if level.is_root() {
                assignments.push(format!("{} = ?", quote_ident("LastEdited")));
                params.push(now.as_str().into());
                if versioned {
                    assignments.push(format!("{} = ?", quote_ident("Version")));
                    params.push(FieldValue::Int(version));
                }
            }
            for field in level.own_fields() {
                let Some(value) = values.get(&field.name) else {
                    continue;
                };
                if level.is_field_localised(&field.name) && !canonical_gets_localised {
                    continue;
                }
                assignments.push(format!("{} = ?", quote_ident(&field.name)));
                params.push(value.clone());
            }

            if assignments.is_empty() {
                continue;
            }
            params.push(FieldValue::Int(id));
            conn.execute(
                &format!(
                    "UPDATE {} SET {} WHERE \"ID\" = ?",
                    quote_ident(&stage_table(level, Stage::Draft)),
                    assignments.join(", ")
                ),
                params_from_iter(params),
            )?;
        }

        if let Some(code) = &shadow_locale {
            upsert_shadow_rows(conn, class, id, code, values, versioned.then_some(version))?;
        }
        if versioned {
            snapshot_version(conn, class, id, version, shadow_locale.as_deref(), &now)?;
        }

        debug!(
            class = class.name(),
            id,
            locale = ?shadow_locale,
            fields = values.len(),
            "Record written"
        );
        Ok(())
    }

    /// Build the merged read for `class` under `state`.
    ///
    /// `restrict` applies the context's inheritance mode; internal reads that
    /// need the merged values regardless of it pass `false`.
    fn build_select(
        &self,
        state: &RequestState,
        class: &RecordClass,
        restrict: bool,
    ) -> Result<(SelectQuery, Vec<String>)> {
        let stage = effective_stage(class, state.stage());
        let versioned = class.has_capability(Capability::Versioned);
        let root = class.root();
        let root_id = column_ref(root.table(), "ID");

        let mut query = SelectQuery::from(&stage_table(root, stage), root.table());
        query.column(root_id.clone(), "ID");
        for level in class.hierarchy().into_iter().skip(1) {
            query.join(
                JoinKind::Inner,
                &stage_table(level, stage),
                level.table(),
                format!("{} = {}", column_ref(level.table(), "ID"), root_id),
                Vec::new(),
            );
        }

        let chain = match state.locale() {
            Some(code) if class.has_capability(Capability::Localised) => self.chain_codes(code)?,
            _ => Vec::new(),
        };

        let mut outputs = Vec::new();
        let mut requested_aliases = Vec::new();
        let mut chain_aliases = Vec::new();
        for level in class.hierarchy() {
            let mut aliases = Vec::new();
            if !level.localisable_fields().is_empty() {
                for (index, code) in chain.iter().enumerate() {
                    let alias = format!("{}_Localised_{}", level.table(), index);
                    query.join(
                        JoinKind::Left,
                        &level.shadow_table(stage.table_suffix()),
                        &alias,
                        format!(
                            "{} = {} AND {} = ?",
                            column_ref(&alias, "RecordID"),
                            root_id,
                            column_ref(&alias, "Locale")
                        ),
                        vec![code.as_str().into()],
                    );
                    if index == 0 {
                        requested_aliases.push(alias.clone());
                    }
                    chain_aliases.push(alias.clone());
                    aliases.push(alias);
                }
            }

            for field in level.own_fields() {
                let expr = if level.is_field_localised(&field.name) {
                    localised_expr(&aliases, level.table(), &field.name)
                } else {
                    column_ref(level.table(), &field.name)
                };
                query.column(expr, &field.name);
                outputs.push(field.name.clone());
            }
        }

        let code = state.locale().map(|code| {
            self.registry
                .get(code)
                .map_or(code, |locale| locale.code.as_str())
        });

        // Without a locale the join binds NULL, which no visible locale equals.
        let filter_drafts = class.filter_drafts() || root.filter_drafts();
        if class.has_capability(Capability::Filtered)
            && state.is_frontend()
            && (!versioned || stage == Stage::Live || filter_drafts)
        {
            query.join(
                JoinKind::Inner,
                &class.filter_table(),
                FILTER_ALIAS,
                format!(
                    "{} = {} AND {} = ?",
                    column_ref(FILTER_ALIAS, "RecordID"),
                    root_id,
                    column_ref(FILTER_ALIAS, "Locale")
                ),
                vec![code.map_or(FieldValue::Null, FieldValue::from)],
            );
        }

        if let Some(code) = code {
            if class.has_capability(Capability::Isolated) {
                query.filter(
                    format!("{} = ?", column_ref(root.table(), "Locale")),
                    vec![code.into()],
                );
            }
        }

        if restrict {
            let required: &[String] = match class.inheritance().mode_for(state.context()) {
                InheritanceMode::Exact => &requested_aliases,
                InheritanceMode::Fallback => &chain_aliases,
                InheritanceMode::Any => &[],
            };
            if !required.is_empty() {
                let any_row = required
                    .iter()
                    .map(|alias| format!("{} IS NOT NULL", column_ref(alias, "RecordID")))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                query.filter(format!("({})", any_row), Vec::new());
            }
        }

        Ok((query, outputs))
    }
}

fn load_records(conn: &Connection, query: &SelectQuery, outputs: &[String]) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(&query.to_sql())?;
    let records = stmt
        .query_map(params_from_iter(query.params()), |row| {
            let id: i64 = row.get(0)?;
            let mut values = Values::new();
            for (index, name) in outputs.iter().enumerate() {
                values.insert(name.clone(), row.get::<_, FieldValue>(index + 1)?);
            }
            Ok(Record { id, values })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

fn check_fields(class: &RecordClass, values: &Values) -> Result<()> {
    for name in values.keys() {
        if class.find_field(name).is_none() {
            return Err(EngineError::InvalidConfiguration(format!(
                "class {} has no field {}",
                class.name(),
                name
            )));
        }
    }
    Ok(())
}

fn insert_row(conn: &Connection, table: &str, columns: &[String], params: Vec<FieldValue>) -> Result<()> {
    let placeholders = vec!["?"; columns.len()].join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders
        ),
        params_from_iter(params),
    )?;
    Ok(())
}

/// Insert or update the draft shadow row of every localised level.
fn upsert_shadow_rows(
    conn: &Connection,
    class: &RecordClass,
    id: i64,
    locale: &str,
    values: &Values,
    version: Option<i64>,
) -> Result<()> {
    for level in class.localised_levels() {
        let mut columns = vec![quote_ident("RecordID"), quote_ident("Locale")];
        let mut params: Vec<FieldValue> = vec![FieldValue::Int(id), locale.into()];
        if let Some(version) = version {
            columns.push(quote_ident("Version"));
            params.push(FieldValue::Int(version));
        }
        for field in level.localisable_fields() {
            if let Some(value) = values.get(&field.name) {
                columns.push(quote_ident(&field.name));
                params.push(value.clone());
            }
        }

        let updates: Vec<String> = columns[2..]
            .iter()
            .map(|column| format!("{} = excluded.{}", column, column))
            .collect();
        let on_conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        let placeholders = vec!["?"; columns.len()].join(", ");
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (\"RecordID\", \"Locale\") {}",
                quote_ident(&level.shadow_table("")),
                columns.join(", "),
                placeholders,
                on_conflict
            ),
            params_from_iter(params),
        )?;
    }
    Ok(())
}

/// Record the draft state at `version` in the history tables.
fn snapshot_version(
    conn: &Connection,
    class: &RecordClass,
    id: i64,
    version: i64,
    locale: Option<&str>,
    created: &str,
) -> Result<()> {
    let isolated = class.has_capability(Capability::Isolated);

    for level in class.hierarchy() {
        let mut copied: Vec<String> = level
            .own_fields()
            .iter()
            .map(|field| quote_ident(&field.name))
            .collect();
        if level.is_root() && isolated {
            copied.push(quote_ident("Locale"));
        }

        let (mut target, mut source) = if level.is_root() {
            (
                vec![
                    "\"RecordID\"".to_string(),
                    "\"Version\"".to_string(),
                    "\"WasPublished\"".to_string(),
                    "\"WasArchived\"".to_string(),
                    "\"Created\"".to_string(),
                ],
                vec![
                    "\"ID\"".to_string(),
                    "?1".to_string(),
                    "0".to_string(),
                    "0".to_string(),
                    "?2".to_string(),
                ],
            )
        } else {
            (
                vec!["\"RecordID\"".to_string(), "\"Version\"".to_string()],
                vec!["\"ID\"".to_string(), "?1".to_string()],
            )
        };
        target.extend(copied.iter().cloned());
        source.extend(copied);

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}) SELECT {} FROM {} WHERE \"ID\" = ?3",
                quote_ident(&versions_table(level)),
                target.join(", "),
                source.join(", "),
                quote_ident(&stage_table(level, Stage::Draft))
            ),
            params![version, created, id],
        )?;
    }

    let Some(locale) = locale else {
        return Ok(());
    };
    for level in class.localised_levels() {
        let copied: Vec<String> = level
            .localisable_fields()
            .iter()
            .map(|field| quote_ident(&field.name))
            .collect();
        let mut target = vec!["\"RecordID\"", "\"Locale\"", "\"Version\""]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let mut source = vec!["\"RecordID\"", "\"Locale\"", "?1"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        target.extend(copied.iter().cloned());
        source.extend(copied);

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}) SELECT {} FROM {} WHERE \"RecordID\" = ?2 AND \"Locale\" = ?3",
                quote_ident(&level.shadow_table("_Versions")),
                target.join(", "),
                source.join(", "),
                quote_ident(&level.shadow_table(""))
            ),
            params![version, id, locale],
        )?;
    }
    Ok(())
}

/// Stages a class stores rows in.
pub(crate) fn stages_of(class: &RecordClass) -> Vec<Stage> {
    if class.has_capability(Capability::Versioned) {
        vec![Stage::Draft, Stage::Live]
    } else {
        vec![Stage::Draft]
    }
}

/// Whether the root canonical row exists in a stage.
pub(crate) fn record_exists(conn: &Connection, class: &RecordClass, id: i64, stage: Stage) -> Result<bool> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE \"ID\" = ?1",
            quote_ident(&stage_table(class.root(), stage))
        ),
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether any localised level has a shadow row for `locale` in a stage.
pub(crate) fn shadow_row_exists(
    conn: &Connection,
    class: &RecordClass,
    id: i64,
    locale: &str,
    stage: Stage,
) -> Result<bool> {
    for level in class.localised_levels() {
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE \"RecordID\" = ?1 AND \"Locale\" = ?2 COLLATE NOCASE",
                quote_ident(&level.shadow_table(stage.table_suffix()))
            ),
            params![id, locale],
            |row| row.get(0),
        )?;
        if count > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Distinct locales with shadow rows for a record in a stage.
pub(crate) fn shadow_locales(
    conn: &Connection,
    class: &RecordClass,
    id: i64,
    stage: Stage,
) -> Result<Vec<String>> {
    let mut locales: Vec<String> = Vec::new();
    for level in class.localised_levels() {
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT \"Locale\" FROM {} WHERE \"RecordID\" = ?1",
            quote_ident(&level.shadow_table(stage.table_suffix()))
        ))?;
        let found = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for locale in found {
            if !locales.contains(&locale) {
                locales.push(locale);
            }
        }
    }
    Ok(locales)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::i18n::{Locale, LocaleRegistry};
    use crate::record::values;
    use std::sync::Arc;

    // ==================== Helper Functions ====================

    fn registry() -> LocaleRegistry {
        LocaleRegistry::new(
            vec![
                Locale::new("en_US", "English").with_default(true).with_sort(1),
                Locale::new("en_NZ", "English (NZ)").with_fallback("en_US").with_sort(2),
                Locale::new("fr_CA", "French (Canada)").with_sort(3),
                Locale::new("de_DE", "German").with_sort(4),
            ],
            Vec::new(),
        )
    }

    fn engine() -> LocaleEngine {
        LocaleEngine::new(Database::in_memory().expect("db"), Arc::new(registry()))
    }

    fn snippet() -> RecordClass {
        RecordClass::builder("Snippet")
            .field("Title", "Varchar(255)")
            .field("Sort", "Int")
            .capability(Capability::Localised)
            .build()
    }

    fn admin(locale: &str) -> RequestState {
        RequestState::admin().for_locale(locale)
    }

    // ==================== Write/Read Tests ====================

    #[test]
    fn test_round_trip_and_canonical_fallback() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Hello".into()), ("Sort", 1i64.into())]))
            .expect("create");
        engine
            .write(&admin("fr_CA"), &class, id, &values([("Title", "Bonjour".into())]))
            .expect("write");

        let fr = engine.read(&admin("fr_CA"), &class, id).expect("read").expect("record");
        assert_eq!(fr.text("Title"), Some("Bonjour"));
        assert_eq!(fr.get("Sort"), Some(&FieldValue::Int(1)));

        let de = engine.read(&admin("de_DE"), &class, id).expect("read").expect("record");
        assert_eq!(de.text("Title"), Some("Hello"));
    }

    #[test]
    fn test_non_default_locale_leaves_canonical_untouched() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Hello".into())]))
            .expect("create");
        engine
            .write(
                &admin("fr_CA"),
                &class,
                id,
                &values([("Title", "Bonjour".into()), ("Sort", 5i64.into())]),
            )
            .expect("write");

        let canonical = engine.read(&RequestState::admin(), &class, id).expect("read").expect("record");
        assert_eq!(canonical.text("Title"), Some("Hello"));
        assert_eq!(canonical.get("Sort"), Some(&FieldValue::Int(5)));
    }

    #[test]
    fn test_default_locale_writes_canonical() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Hello".into())]))
            .expect("create");
        engine
            .write(&admin("en_US"), &class, id, &values([("Title", "Howdy".into())]))
            .expect("write");

        let canonical = engine.read(&RequestState::admin(), &class, id).expect("read").expect("record");
        assert_eq!(canonical.text("Title"), Some("Howdy"));
        assert!(engine.exists_in_locale(&class, id, "en_US").expect("exists"));
    }

    #[test]
    fn test_empty_shadow_value_falls_back() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Hello".into())]))
            .expect("create");
        engine
            .write(&admin("fr_CA"), &class, id, &values([("Title", "".into())]))
            .expect("write");

        let fr = engine.read(&admin("fr_CA"), &class, id).expect("read").expect("record");
        assert_eq!(fr.text("Title"), Some("Hello"));
        assert!(engine.exists_in_locale(&class, id, "fr_CA").expect("exists"));
    }

    #[test]
    fn test_fallback_chain_is_consulted() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Canonical".into())]))
            .expect("create");
        engine
            .write(&admin("en_US"), &class, id, &values([("Title", "American".into())]))
            .expect("write");
        engine
            .write(&RequestState::admin(), &class, id, &values([("Title", "Canonical".into())]))
            .expect("reset canonical");

        let nz = engine.read(&admin("en_NZ"), &class, id).expect("read").expect("record");
        assert_eq!(nz.text("Title"), Some("American"));
    }

    #[test]
    fn test_write_unknown_record() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let err = engine
            .write(&admin("fr_CA"), &class, 99, &values([("Title", "x".into())]))
            .unwrap_err();
        assert!(matches!(err, EngineError::RecordNotFound { id: 99, .. }));
    }

    #[test]
    fn test_write_unknown_field_is_rejected() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let err = engine
            .create(&RequestState::admin(), &class, &values([("Nope", "x".into())]))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_write_in_unregistered_locale_is_rejected() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Hello".into())]))
            .expect("create");
        let err = engine
            .write(&admin("xx_XX"), &class, id, &values([("Title", "x".into())]))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownLocale(_)));
    }

    // ==================== Inheritance Mode Tests ====================

    #[test]
    fn test_list_respects_inheritance_mode() {
        let engine = engine();
        let class = RecordClass::builder("News")
            .field("Title", "Varchar")
            .capability(Capability::Localised)
            .inheritance(InheritanceMode::Exact, InheritanceMode::Fallback)
            .build();
        engine.install(&class).expect("install");

        let us = engine
            .create(&admin("en_US"), &class, &values([("Title", "US".into())]))
            .expect("create");
        let plain = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Plain".into())]))
            .expect("create");

        let exact: Vec<i64> = engine
            .list(&admin("en_NZ"), &class)
            .expect("list")
            .iter()
            .map(|r| r.id)
            .collect();
        assert!(exact.is_empty());

        let fallback: Vec<i64> = engine
            .list(&RequestState::frontend().for_locale("en_NZ"), &class)
            .expect("list")
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(fallback, vec![us]);

        let unrestricted = engine.list(&RequestState::admin(), &class).expect("list");
        assert_eq!(unrestricted.len(), 2);
        assert_eq!(unrestricted[1].id, plain);
    }

    // ==================== Locale Set Tests ====================

    #[test]
    fn test_localised_locales_in_registry_order() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&admin("de_DE"), &class, &values([("Title", "Hallo".into())]))
            .expect("create");
        engine
            .write(&admin("fr_CA"), &class, id, &values([("Title", "Salut".into())]))
            .expect("write");

        assert_eq!(
            engine.localised_locales(&class, id).expect("locales"),
            vec!["fr_CA", "de_DE"]
        );
        assert!(!engine.exists_in_locale(&class, id, "en_NZ").expect("exists"));
    }

    #[test]
    fn test_copy_between_locales() {
        let engine = engine();
        let class = snippet();
        engine.install(&class).expect("install");

        let id = engine
            .create(&admin("fr_CA"), &class, &values([("Title", "Bonjour".into()), ("Sort", 3i64.into())]))
            .expect("create");

        let mut state = RequestState::frontend().for_locale("en_US");
        engine
            .copy_between_locales(&mut state, &class, id, "fr_CA", "de_DE")
            .expect("copy");
        assert_eq!(state.locale(), Some("en_US"));
        assert!(state.is_frontend());

        let de = engine.read(&admin("de_DE"), &class, id).expect("read").expect("record");
        assert_eq!(de.text("Title"), Some("Bonjour"));
        assert!(engine.exists_in_locale(&class, id, "de_DE").expect("exists"));
    }

    #[test]
    fn test_locale_predicates_require_capability() {
        let engine = engine();
        let class = RecordClass::builder("Plain").field("Title", "Varchar").build();
        engine.install(&class).expect("install");
        assert!(engine.exists_in_locale(&class, 1, "en_US").unwrap_err().is_fatal());
    }

    // ==================== Hierarchy Tests ====================

    #[test]
    fn test_subclass_levels_merge_independently() {
        let engine = engine();
        let base = Arc::new(snippet());
        let page = RecordClass::builder("Page")
            .field("Summary", "Text")
            .field("Rating", "Int")
            .parent(base)
            .build();
        engine.install(&page).expect("install");

        let id = engine
            .create(
                &RequestState::admin(),
                &page,
                &values([("Title", "Hello".into()), ("Summary", "Short".into()), ("Rating", 4i64.into())]),
            )
            .expect("create");
        engine
            .write(&admin("fr_CA"), &page, id, &values([("Summary", "Court".into())]))
            .expect("write");

        let fr = engine.read(&admin("fr_CA"), &page, id).expect("read").expect("record");
        assert_eq!(fr.text("Title"), Some("Hello"));
        assert_eq!(fr.text("Summary"), Some("Court"));
        assert_eq!(fr.get("Rating"), Some(&FieldValue::Int(4)));
    }
}
