//! Statement builders. Pure string generation, no I/O.
//!
//! Every identifier is quoted. Generated statements alias the target
//! table as `"target"` and the staging table as `"source"`.
mod changed;
mod merge;
mod select;

pub use changed::*;
pub use merge::*;
pub use select::*;

use crate::model::*;

#[rustfmt::skip]
const TARGET:   &str = "\"target\"";
#[rustfmt::skip]
const SOURCE:   &str = "\"source\"";
#[rustfmt::skip]
const EXCLUDED: &str = "EXCLUDED";

/// `"a", "b"`
fn list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `alias."a", alias."b"`
fn qualified(alias: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| qualify(alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `left."k" = right."k" AND ...`
fn join(left: &str, right: &str, key: &[String]) -> String {
    key.iter()
        .map(|k| format!("{} = {}", qualify(left, k), qualify(right, k)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `(source."c" IS DISTINCT FROM target."c" OR ...)`, or nothing when no
/// columns are compared.
fn distinct(source: &str, target: &str, columns: &[String]) -> Option<String> {
    match columns.is_empty() {
        true => None,
        false => Some(format!(
            "({})",
            columns
                .iter()
                .map(|c| format!("{} IS DISTINCT FROM {}", qualify(source, c), qualify(target, c)))
                .collect::<Vec<_>>()
                .join(" OR ")
        )),
    }
}

/// Ordering clause restoring the caller's batch order.
fn ordinal(alias: &str) -> String {
    format!("ORDER BY {}", qualify(alias, crate::ORDINAL))
}
