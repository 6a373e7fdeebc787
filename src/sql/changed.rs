use super::*;
use crate::postgres::Stage;

#[rustfmt::skip]
const LATEST: &str = "\"latest\"";
#[rustfmt::skip]
const KEYS:   &str = "\"keys\"";

/// Append-only insert of staged rows that are new or differ from the
/// latest stored row with the same key.
///
/// The latest row per key is the one with the highest `order` value,
/// found with `DISTINCT ON` over the target rows whose key appears in
/// staging. A staged row is inserted when no such row exists, or when any
/// compared column is distinct from it. Nothing is ever updated.
pub fn insert_if_changed(
    schema: &Schema,
    stage: &Stage,
    history: &History,
    returning: bool,
) -> String {
    let ref key = history.key;
    let latest = format!(
        "SELECT DISTINCT ON ({tk}) {t}.* FROM {} AS {t} \
         INNER JOIN (SELECT DISTINCT {} FROM {}) AS {k} ON {} \
         ORDER BY {tk}, {} DESC",
        quote(schema.table()),
        list(key),
        stage.ident(),
        join(TARGET, KEYS, key),
        qualify(TARGET, &history.order),
        t = TARGET,
        k = KEYS,
        tk = qualified(TARGET, key),
    );
    let mut fresh = format!("{} IS NULL", qualify(LATEST, &key[0]));
    if let Some(differs) = distinct(SOURCE, LATEST, &history.compare) {
        fresh = format!("{} OR {}", fresh, differs);
    }
    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} AS {} LEFT JOIN ({}) AS {} ON {} WHERE {} {}",
        quote(schema.table()),
        list(stage.columns()),
        qualified(SOURCE, stage.columns()),
        stage.ident(),
        SOURCE,
        latest,
        LATEST,
        join(SOURCE, LATEST, key),
        fresh,
        ordinal(SOURCE)
    );
    if returning {
        sql.push_str(" RETURNING *");
    }
    sql
}
