use super::*;
use crate::config::UpsertStrategy;
use crate::postgres::Stage;

/// `SET` entries: plain overwrites, then null-guarded ones.
fn assignments(plan: &Plan, source: &str) -> String {
    plan.assign
        .iter()
        .map(|c| format!("{} = {}", quote(c), qualify(source, c)))
        .chain(plan.if_null.iter().map(|c| {
            format!(
                "{} = COALESCE({}, {})",
                quote(c),
                qualify(TARGET, c),
                qualify(source, c)
            )
        }))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Conditions a matched row must meet to be written.
fn guard(plan: &Plan, source: &str) -> Option<String> {
    let conditions = distinct(source, TARGET, &plan.changed)
        .into_iter()
        .chain(
            plan.predicate
                .as_ref()
                .map(|p| format!("({})", p(&Scope::new(source, TARGET)))),
        )
        .collect::<Vec<_>>();
    match conditions.is_empty() {
        true => None,
        false => Some(conditions.join(" AND ")),
    }
}

/// `INSERT ... SELECT` from staging in batch order.
pub fn insert(schema: &Schema, stage: &Stage, ignore_conflicts: bool, returning: bool) -> String {
    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} AS {} {}",
        quote(schema.table()),
        list(stage.columns()),
        qualified(SOURCE, stage.columns()),
        stage.ident(),
        SOURCE,
        ordinal(SOURCE)
    );
    if ignore_conflicts {
        sql.push_str(" ON CONFLICT DO NOTHING");
    }
    if returning {
        sql.push_str(" RETURNING *");
    }
    sql
}

/// `UPDATE ... FROM` staging, joined on the plan's key. With `returning`
/// the key of every written row comes back.
pub fn update(schema: &Schema, stage: &Stage, plan: &Plan, returning: bool) -> String {
    let mut sql = format!(
        "UPDATE {} AS {} SET {} FROM {} AS {} WHERE {}",
        quote(schema.table()),
        TARGET,
        assignments(plan, SOURCE),
        stage.ident(),
        SOURCE,
        join(TARGET, SOURCE, &plan.key)
    );
    if let Some(guard) = guard(plan, SOURCE) {
        sql.push_str(" AND ");
        sql.push_str(&guard);
    }
    if returning {
        sql.push_str(" RETURNING ");
        sql.push_str(&qualified(TARGET, &plan.key));
    }
    sql
}

/// Insert-or-update in one statement.
///
/// `returning` is honoured by [`UpsertStrategy::OnConflict`] only; `MERGE`
/// gained `RETURNING` after the oldest server it supports.
pub fn upsert(
    schema: &Schema,
    stage: &Stage,
    plan: &Plan,
    strategy: UpsertStrategy,
    returning: bool,
) -> String {
    match strategy {
        UpsertStrategy::OnConflict => on_conflict(schema, stage, plan, returning),
        UpsertStrategy::Merge => merge(schema, stage, plan),
    }
}

fn on_conflict(schema: &Schema, stage: &Stage, plan: &Plan, returning: bool) -> String {
    let mut sql = format!(
        "INSERT INTO {} AS {} ({}) SELECT {} FROM {} AS {} {} ON CONFLICT ({})",
        quote(schema.table()),
        TARGET,
        list(stage.columns()),
        qualified(SOURCE, stage.columns()),
        stage.ident(),
        SOURCE,
        ordinal(SOURCE),
        list(&plan.key)
    );
    match plan.writes() {
        false => sql.push_str(" DO NOTHING"),
        true => {
            sql.push_str(" DO UPDATE SET ");
            sql.push_str(&assignments(plan, EXCLUDED));
            if let Some(guard) = guard(plan, EXCLUDED) {
                sql.push_str(" WHERE ");
                sql.push_str(&guard);
            }
        }
    }
    if returning {
        sql.push_str(" RETURNING ");
        sql.push_str(&qualified(TARGET, &plan.key));
    }
    sql
}

fn merge(schema: &Schema, stage: &Stage, plan: &Plan) -> String {
    let mut sql = format!(
        "MERGE INTO {} AS {} USING {} AS {} ON {}",
        quote(schema.table()),
        TARGET,
        stage.ident(),
        SOURCE,
        join(TARGET, SOURCE, &plan.key)
    );
    if plan.writes() {
        sql.push_str(" WHEN MATCHED");
        if let Some(guard) = guard(plan, SOURCE) {
            sql.push_str(" AND ");
            sql.push_str(&guard);
        }
        sql.push_str(" THEN UPDATE SET ");
        sql.push_str(&assignments(plan, SOURCE));
    }
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        list(stage.columns()),
        qualified(SOURCE, stage.columns())
    ));
    sql
}

/// Current target rows for every staged key.
pub fn reselect(schema: &Schema, stage: &Stage, key: &[String]) -> String {
    format!(
        "SELECT {t}.* FROM {} AS {t} WHERE ({}) IN (SELECT {} FROM {})",
        quote(schema.table()),
        qualified(TARGET, key),
        list(key),
        stage.ident(),
        t = TARGET
    )
}

/// Staged values of `fields`, one row per input in batch order.
///
/// Read back through the staging table's column types, these compare
/// equal to the same values returned from the target.
pub fn staged_keys(stage: &Stage, fields: &[String]) -> String {
    format!(
        "SELECT {} FROM {} AS {} {}",
        qualified(SOURCE, fields),
        stage.ident(),
        SOURCE,
        ordinal(SOURCE)
    )
}
