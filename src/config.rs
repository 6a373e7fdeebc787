use crate::error::*;
use std::str::FromStr;

/// How upserts are expressed in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertStrategy {
    /// `INSERT ... ON CONFLICT (key) DO UPDATE`. Needs a unique index on the
    /// match key.
    #[default]
    OnConflict,
    /// `MERGE INTO ... USING`. PostgreSQL 15 or later, no index needed.
    Merge,
}

impl FromStr for UpsertStrategy {
    type Err = BulkError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_conflict" | "onconflict" | "on-conflict" => Ok(Self::OnConflict),
            "merge" => Ok(Self::Merge),
            other => Err(BulkError::config(format!(
                "unknown upsert strategy `{}`",
                other
            ))),
        }
    }
}

/// Tunables carried by a [`Loader`](crate::Loader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Staged batches larger than this get an index on the match key.
    pub index_threshold: usize,
    /// Largest filter set `bulk_select` sends inline.
    pub inline_filter_limit: usize,
    pub upsert_strategy: UpsertStrategy,
    /// Accept [`Value::Bytes`](crate::Value::Bytes) in records.
    pub allow_binary: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_threshold: crate::INDEX_THRESHOLD,
            inline_filter_limit: crate::INLINE_FILTER_LIMIT,
            upsert_strategy: UpsertStrategy::default(),
            allow_binary: false,
        }
    }
}

impl Config {
    /// Defaults overridden by `BULK_*` environment variables.
    pub fn from_env() -> BulkResult<Self> {
        let mut config = Self::default();
        if let Some(n) = var::<usize>("BULK_INDEX_THRESHOLD")? {
            config.index_threshold = n;
        }
        if let Some(n) = var::<usize>("BULK_INLINE_FILTER_LIMIT")? {
            config.inline_filter_limit = n;
        }
        if let Some(s) = var::<UpsertStrategy>("BULK_UPSERT_STRATEGY")? {
            config.upsert_strategy = s;
        }
        if let Some(b) = var::<bool>("BULK_ALLOW_BINARY")? {
            config.allow_binary = b;
        }
        Ok(config)
    }
    pub fn upsert_strategy(mut self, strategy: UpsertStrategy) -> Self {
        self.upsert_strategy = strategy;
        self
    }
    pub fn allow_binary(mut self) -> Self {
        self.allow_binary = true;
        self
    }
}

fn var<T: FromStr>(key: &str) -> BulkResult<Option<T>> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| BulkError::config(format!("malformed {}=`{}`", key, raw))),
    }
}
