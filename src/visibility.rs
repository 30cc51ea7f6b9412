//! Per-record visible locales.
//!
//! A filtered record is shown on the front end only in the locales its
//! association lists. An empty association hides the record everywhere the
//! filter applies. Admin reads are never filtered.

use crate::class::{Capability, RecordClass};
use crate::engine::LocaleEngine;
use crate::error::{EngineError, Result};
use crate::localisation::{record_exists, stages_of};
use crate::query::quote_ident;
use rusqlite::{params, Connection};
use tracing::debug;

impl LocaleEngine {
    /// Replace the visible locales of a record.
    pub fn set_visible_locales(&self, class: &RecordClass, id: i64, locales: &[&str]) -> Result<()> {
        class.require(Capability::Filtered)?;
        let codes = locales
            .iter()
            .map(|code| self.registered_code(code))
            .collect::<Result<Vec<_>>>()?;

        self.db.transaction(|conn| {
            ensure_record(conn, class, id)?;
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE \"RecordID\" = ?1",
                    quote_ident(&class.filter_table())
                ),
                params![id],
            )?;
            for code in &codes {
                insert_visible(conn, class, id, code)?;
            }
            Ok(())
        })?;

        debug!(class = class.name(), id, locales = ?codes, "Visible locales replaced");
        Ok(())
    }

    /// Make a record visible in one more locale.
    pub fn add_visible_locale(&self, class: &RecordClass, id: i64, locale: &str) -> Result<()> {
        class.require(Capability::Filtered)?;
        let code = self.registered_code(locale)?;
        self.db.transaction(|conn| {
            ensure_record(conn, class, id)?;
            insert_visible(conn, class, id, &code)
        })
    }

    /// Hide a record in one locale. Returns whether it was visible there.
    pub fn remove_visible_locale(&self, class: &RecordClass, id: i64, locale: &str) -> Result<bool> {
        class.require(Capability::Filtered)?;
        let code = self.registered_code(locale)?;
        self.db
            .with_connection(|conn| remove_visible(conn, class, id, &code))
    }

    /// Locales a record is visible in, in registry order.
    pub fn visible_locales(&self, class: &RecordClass, id: i64) -> Result<Vec<String>> {
        class.require(Capability::Filtered)?;
        let stored = self.db.with_connection(|conn| visible_codes(conn, class, id))?;
        Ok(self
            .registry
            .locales()
            .iter()
            .filter(|locale| stored.iter().any(|code| code == &locale.code))
            .map(|locale| locale.code.clone())
            .collect())
    }

    /// Whether a record is visible in `locale`.
    pub fn is_available_in_locale(&self, class: &RecordClass, id: i64, locale: &str) -> Result<bool> {
        class.require(Capability::Filtered)?;
        let code = self.registered_code(locale)?;
        let stored = self.db.with_connection(|conn| visible_codes(conn, class, id))?;
        Ok(stored.contains(&code))
    }
}

fn ensure_record(conn: &Connection, class: &RecordClass, id: i64) -> Result<()> {
    for stage in stages_of(class) {
        if record_exists(conn, class, id, stage)? {
            return Ok(());
        }
    }
    Err(EngineError::RecordNotFound {
        class: class.name().to_string(),
        id,
    })
}

fn insert_visible(conn: &Connection, class: &RecordClass, id: i64, code: &str) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} (\"RecordID\", \"Locale\") VALUES (?1, ?2)",
            quote_ident(&class.filter_table())
        ),
        params![id, code],
    )?;
    Ok(())
}

pub(crate) fn remove_visible(conn: &Connection, class: &RecordClass, id: i64, code: &str) -> Result<bool> {
    let removed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE \"RecordID\" = ?1 AND \"Locale\" = ?2",
            quote_ident(&class.filter_table())
        ),
        params![id, code],
    )?;
    Ok(removed > 0)
}

pub(crate) fn visible_codes(conn: &Connection, class: &RecordClass, id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT \"Locale\" FROM {} WHERE \"RecordID\" = ?1 ORDER BY \"Locale\"",
        quote_ident(&class.filter_table())
    ))?;
    let codes = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::i18n::{Locale, LocaleRegistry};
    use crate::record::values;
    use crate::state::RequestState;
    use std::sync::Arc;

    fn engine() -> LocaleEngine {
        let registry = LocaleRegistry::new(
            vec![
                Locale::new("en_US", "English").with_default(true),
                Locale::new("fr_CA", "French"),
                Locale::new("de_DE", "German"),
            ],
            Vec::new(),
        );
        LocaleEngine::new(Database::in_memory().expect("db"), Arc::new(registry))
    }

    fn event() -> RecordClass {
        RecordClass::builder("Event")
            .field("Title", "Varchar")
            .capability(Capability::Filtered)
            .build()
    }

    fn notice() -> RecordClass {
        RecordClass::builder("Notice")
            .field("Body", "Text")
            .capability(Capability::Isolated)
            .build()
    }

    // ==================== Association Tests ====================

    #[test]
    fn test_set_add_remove() {
        let engine = engine();
        let class = event();
        engine.install(&class).expect("install");
        let id = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Launch".into())]))
            .expect("create");

        engine
            .set_visible_locales(&class, id, &["de_DE", "en_us"])
            .expect("set");
        assert_eq!(engine.visible_locales(&class, id).expect("list"), vec!["en_US", "de_DE"]);

        engine.add_visible_locale(&class, id, "fr_CA").expect("add");
        engine.add_visible_locale(&class, id, "fr_CA").expect("add twice");
        assert!(engine.is_available_in_locale(&class, id, "fr_CA").expect("check"));

        assert!(engine.remove_visible_locale(&class, id, "de_DE").expect("remove"));
        assert!(!engine.remove_visible_locale(&class, id, "de_DE").expect("remove again"));
        assert_eq!(engine.visible_locales(&class, id).expect("list"), vec!["en_US", "fr_CA"]);
    }

    #[test]
    fn test_unknown_locale_and_missing_record() {
        let engine = engine();
        let class = event();
        engine.install(&class).expect("install");

        assert!(matches!(
            engine.add_visible_locale(&class, 1, "xx_XX"),
            Err(EngineError::UnknownLocale(_))
        ));
        assert!(matches!(
            engine.add_visible_locale(&class, 1, "fr_CA"),
            Err(EngineError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_requires_filtered_capability() {
        let engine = engine();
        let class = notice();
        engine.install(&class).expect("install");
        assert!(engine.visible_locales(&class, 1).unwrap_err().is_fatal());
    }

    // ==================== Query Filter Tests ====================

    #[test]
    fn test_frontend_reads_are_filtered() {
        let engine = engine();
        let class = event();
        engine.install(&class).expect("install");

        let shown = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Shown".into())]))
            .expect("create");
        let hidden = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Hidden".into())]))
            .expect("create");
        engine.set_visible_locales(&class, shown, &["fr_CA"]).expect("set");

        let frontend = RequestState::frontend().for_locale("fr_CA");
        let ids: Vec<i64> = engine.list(&frontend, &class).expect("list").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![shown]);
        assert!(engine.read(&frontend, &class, hidden).expect("read").is_none());

        let other = RequestState::frontend().for_locale("de_DE");
        assert!(engine.list(&other, &class).expect("list").is_empty());

        let admin = RequestState::admin().for_locale("de_DE");
        assert_eq!(engine.list(&admin, &class).expect("list").len(), 2);
    }

    #[test]
    fn test_frontend_without_locale_sees_no_filtered_records() {
        let engine = engine();
        let class = event();
        engine.install(&class).expect("install");

        let hidden = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Hidden".into())]))
            .expect("create");
        let shown = engine
            .create(&RequestState::admin(), &class, &values([("Title", "Shown".into())]))
            .expect("create");
        engine.set_visible_locales(&class, shown, &["en_US"]).expect("set");

        let frontend = RequestState::frontend();
        assert!(engine.read(&frontend, &class, hidden).expect("read").is_none());
        assert!(engine.read(&frontend, &class, shown).expect("read").is_none());
        assert!(engine.list(&frontend, &class).expect("list").is_empty());

        let admin = RequestState::admin();
        assert!(engine.read(&admin, &class, hidden).expect("read").is_some());
        assert_eq!(engine.list(&admin, &class).expect("list").len(), 2);
    }

    #[test]
    fn test_isolated_records_belong_to_one_locale() {
        let engine = engine();
        let class = notice();
        engine.install(&class).expect("install");

        let fr = RequestState::admin().for_locale("fr_CA");
        let de = RequestState::admin().for_locale("de_DE");
        let id = engine
            .create(&fr, &class, &values([("Body", "Avis".into())]))
            .expect("create");

        assert_eq!(engine.list(&fr, &class).expect("list").len(), 1);
        assert!(engine.read(&de, &class, id).expect("read").is_none());
        assert!(engine.list(&RequestState::frontend().for_locale("de_DE"), &class).expect("list").is_empty());
    }
}
