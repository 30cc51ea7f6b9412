//! Locale-aware content resolution for relational records.
//!
//! - `i18n`: locale catalog, request negotiation and configuration checks
//! - `state`: per-request locale state with scoped overrides
//! - `class`, `fields`: record class declarations and localisable fields
//! - `db`, `query`: SQLite store, schema and SELECT builder
//! - `engine`: the facade every record operation hangs off
//! - `localisation`, `versioning`, `visibility`, `deletion`: record operations
//! - `http`: axum middleware and routes

pub mod class;
pub mod config;
pub mod db;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod fields;
pub mod http;
pub mod i18n;
pub mod localisation;
pub mod query;
pub mod record;
pub mod state;
pub mod versioning;
pub mod visibility;

pub use class::{Capability, InheritanceMode, InheritancePolicy, RecordClass};
pub use db::Database;
pub use deletion::{DeletionOutcome, DeletionPolicy, PolicyChain, Removal};
pub use engine::LocaleEngine;
pub use error::{EngineError, Result};
pub use record::{FieldValue, Record, Values};
pub use state::{ExecutionContext, RequestState, Stage};
pub use versioning::VersionEntry;
