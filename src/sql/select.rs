use super::*;
use crate::postgres::Stage;
use tokio_postgres::types::Type;

/// Whether a filter set of `tuples` × `arity` values is bound inline
/// rather than staged.
pub fn inline(tuples: usize, arity: usize, limit: usize) -> bool {
    tuples <= limit && tuples * arity <= crate::MAX_BIND_PARAMS
}

/// Type name for a parameter cast. Built-in types go bare, user-defined
/// ones are schema-qualified so they resolve outside `search_path`.
fn cast(ty: &Type) -> String {
    match ty.schema() {
        "pg_catalog" => ty.name().to_string(),
        schema => format!("{}.{}", quote(schema), quote(ty.name())),
    }
}

fn lock(sql: &mut String, for_update: bool) {
    if for_update {
        sql.push_str(" FOR UPDATE");
    }
}

/// Composite `IN (VALUES ...)` filter with one bind parameter per value,
/// each cast to its column type.
pub fn select_inline(
    schema: &Schema,
    filter: &[&Column],
    select: &[String],
    tuples: usize,
    for_update: bool,
) -> String {
    let fields = filter
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>();
    let values = (0..tuples)
        .map(|t| {
            let row = filter
                .iter()
                .enumerate()
                .map(|(i, c)| format!("${}::{}", t * filter.len() + i + 1, cast(c.ty())))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", row)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "SELECT {} FROM {} AS {} WHERE ({}) IN (VALUES {})",
        qualified(TARGET, select),
        quote(schema.table()),
        TARGET,
        qualified(TARGET, &fields),
        values
    );
    lock(&mut sql, for_update);
    sql
}

/// Composite filter against a staged filter set.
pub fn select_staged(
    schema: &Schema,
    stage: &Stage,
    filter: &[String],
    select: &[String],
    for_update: bool,
) -> String {
    let mut sql = format!(
        "SELECT {} FROM {} AS {} WHERE ({}) IN (SELECT {} FROM {})",
        qualified(TARGET, select),
        quote(schema.table()),
        TARGET,
        qualified(TARGET, filter),
        list(filter),
        stage.ident()
    );
    lock(&mut sql, for_update);
    sql
}
