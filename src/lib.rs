//! Bulk loading for PostgreSQL through staging tables and binary COPY.
//!
//! Records are serialized into PostgreSQL's binary COPY format, streamed
//! into a transaction-scoped staging table, and merged into the target
//! table with a single generated statement. Per-field update policy,
//! conflict handling and change detection are all expressed in that
//! statement, so a batch costs a handful of round trips regardless of
//! its size.
//!
//! ## Model
//!
//! - [`Schema`]: Target table columns, types and primary key
//! - [`Record`]: One row as field name → [`Value`]
//! - [`FieldPolicy`]: Match key and per-field update rules
//!
//! ## Operations
//!
//! All operations run on a caller-owned [`Transaction`](tokio_postgres::Transaction)
//! through a [`Loader`]:
//!
//! - [`Loader::bulk_insert`]
//! - [`Loader::bulk_update`]
//! - [`Loader::bulk_upsert`]
//! - [`Loader::bulk_insert_if_changed`]
//! - [`Loader::bulk_select`]
//! - [`Loader::bulk_load_with_queries`]
//!
//! ## Connectivity
//!
//! - [`connect()`]: Opens a client from `DB_URL`
mod config;
mod error;
mod loader;
mod model;
mod postgres;
pub mod sql;

pub use config::*;
pub use error::*;
pub use loader::*;
pub use model::*;
pub use postgres::*;

// ============================================================================
// STAGING
// Transient tables live for one transaction and carry the caller's order.
// ============================================================================
/// Prefix of every staging table name.
pub const STAGING_PREFIX: &str = "loading_";
/// Extra staging column holding each record's input position.
pub const ORDINAL: &str = "__bulk_ordinal";
/// Select-list item that adds [`ORDINAL`] to a staging table.
pub const ORDINAL_COLUMN: &str = const_format::concatcp!("0::int8 AS \"", ORDINAL, "\"");
/// PostgreSQL truncates identifiers beyond this many bytes.
pub const IDENTIFIER_MAX_LEN: usize = 63;
/// Staged batches above this size get an index on the match key.
pub const INDEX_THRESHOLD: usize = 1000;

// ============================================================================
// SELECTION
// ============================================================================
/// Filter sets up to this size are bound inline instead of staged.
pub const INLINE_FILTER_LIMIT: usize = 1000;
/// Bind parameter ceiling of the extended query protocol.
pub const MAX_BIND_PARAMS: usize = 65535;

/// Install a terminal logger at INFO level.
#[cfg(feature = "logging")]
pub fn log() -> Result<(), log::SetLoggerError> {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    simplelog::TermLogger::init(
        log::LevelFilter::Info,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
}
