use crate::error::*;
use crate::model::*;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use tokio_postgres::types::FromSql;

/// Loading rows returned by the database.
pub trait Hydrate: Sized {
    fn hydrate(row: &tokio_postgres::Row) -> BulkResult<Self>;
}

impl Hydrate for Mapping {
    fn hydrate(row: &tokio_postgres::Row) -> BulkResult<Self> {
        let mut mapping = Mapping::new();
        for (i, column) in row.columns().iter().enumerate() {
            if !<Value as FromSql>::accepts(column.type_()) {
                return Err(BulkError::Decode {
                    column: column.name().to_string(),
                    ty: column.type_().to_string(),
                });
            }
            mapping.insert(column.name().to_string(), row.try_get::<_, Value>(i)?);
        }
        Ok(mapping)
    }
}

impl Hydrate for Record {
    fn hydrate(row: &tokio_postgres::Row) -> BulkResult<Self> {
        Mapping::hydrate(row).map(Record::from)
    }
}

/// Why an input record produced no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Insert collided with an existing row and was ignored.
    Conflict,
    /// Update found no target row with the record's key.
    NoMatch,
    /// A target row exists but the update guard left it alone, or change
    /// detection found nothing new.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    /// Position of the record in the caller's batch.
    pub index: usize,
    pub reason: SkipReason,
}

/// What a bulk write did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Rows written by the merge statement.
    pub affected: u64,
    /// Resulting rows in batch order, when requested. Skipped records are
    /// absent.
    pub records: Option<Vec<Record>>,
    /// Records that produced no row, when records were requested.
    pub skipped: Vec<Skipped>,
}

impl Outcome {
    pub fn empty(return_records: bool) -> Self {
        Self {
            records: return_records.then(Vec::new),
            ..Self::default()
        }
    }
}

/// Lookup key for a list of values.
pub fn key_of(values: &[Value]) -> String {
    format!("{:?}", values)
}

/// Lookup key of a returned row on the given fields.
pub fn row_key(mapping: &Mapping, fields: &[String]) -> String {
    let values = fields
        .iter()
        .map(|f| mapping.get(f).cloned().unwrap_or(Value::Null))
        .collect::<Vec<_>>();
    key_of(&values)
}

/// Puts rows returned by `INSERT ... RETURNING` back in batch order.
///
/// With `keys` (one per input, plus the key field names) every input
/// consumes the first unclaimed row with its key, and inputs left
/// without one are skipped with `reason`. Without keys the rows are
/// already in batch order.
pub fn consume(
    rows: Vec<Mapping>,
    keys: Option<(&[String], &[String])>,
    reason: SkipReason,
) -> (Vec<Record>, Vec<Skipped>) {
    let (inputs, fields) = match keys {
        None => return (rows.into_iter().map(Record::from).collect(), vec![]),
        Some(keys) => keys,
    };
    let mut pool = HashMap::<String, VecDeque<Mapping>>::new();
    for row in rows {
        pool.entry(row_key(&row, fields)).or_default().push_back(row);
    }
    let mut records = Vec::with_capacity(inputs.len());
    let mut skipped = Vec::new();
    for (index, key) in inputs.iter().enumerate() {
        match pool.get_mut(key).and_then(VecDeque::pop_front) {
            Some(row) => records.push(Record::from(row)),
            None => skipped.push(Skipped { index, reason }),
        }
    }
    (records, skipped)
}

/// Puts re-selected target rows back in batch order.
///
/// Inputs sharing a key share the row. `touched` holds the keys the
/// merge statement actually wrote; a matched input outside it was
/// guarded off. Without it every matched input counts as written.
pub fn rematch(
    rows: Vec<Mapping>,
    inputs: &[String],
    fields: &[String],
    touched: Option<&HashSet<String>>,
) -> (Vec<Record>, Vec<Skipped>) {
    let found = rows
        .into_iter()
        .map(|row| (row_key(&row, fields), row))
        .collect::<HashMap<_, _>>();
    let mut records = Vec::with_capacity(inputs.len());
    let mut skipped = Vec::new();
    for (index, key) in inputs.iter().enumerate() {
        match found.get(key) {
            Some(row) if touched.is_none_or(|t| t.contains(key)) => {
                records.push(Record::from(row.clone()))
            }
            Some(_) => skipped.push(Skipped {
                index,
                reason: SkipReason::Unchanged,
            }),
            None => skipped.push(Skipped {
                index,
                reason: SkipReason::NoMatch,
            }),
        }
    }
    (records, skipped)
}
