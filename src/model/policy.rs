use super::*;
use crate::error::*;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::sync::Arc;

/// Qualifiers a custom update predicate may reference.
///
/// `source` is the incoming row (the staging table, or `EXCLUDED` inside
/// an `ON CONFLICT` branch) and `target` the existing row. Both are
/// already quoted.
pub struct Scope<'a> {
    source: &'a str,
    target: &'a str,
}

impl<'a> Scope<'a> {
    pub fn new(source: &'a str, target: &'a str) -> Self {
        Self { source, target }
    }
    pub fn source(&self, column: &str) -> String {
        qualify(self.source, column)
    }
    pub fn target(&self, column: &str) -> String {
        qualify(self.target, column)
    }
}

/// Caller-supplied SQL boolean expression restricting which existing rows
/// may be updated. It is `AND`ed into the update condition.
pub type UpdateWhere = Arc<dyn Fn(&Scope<'_>) -> String + Send + Sync>;

/// Per-batch field policy shared by updates and upserts.
///
/// Empty lists mean "not set". An empty `pk_field_names` falls back to the
/// schema's primary key.
#[derive(Clone, Default)]
pub struct FieldPolicy {
    pub pk_field_names: Vec<String>,
    pub update_field_names: Option<Vec<String>>,
    pub insert_only_field_names: Vec<String>,
    pub model_changed_field_names: Vec<String>,
    pub update_if_null_field_names: Vec<String>,
    pub update_where: Option<UpdateWhere>,
}

impl Debug for FieldPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldPolicy")
            .field("pk_field_names", &self.pk_field_names)
            .field("update_field_names", &self.update_field_names)
            .field("insert_only_field_names", &self.insert_only_field_names)
            .field("model_changed_field_names", &self.model_changed_field_names)
            .field("update_if_null_field_names", &self.update_if_null_field_names)
            .field("update_where", &self.update_where.is_some())
            .finish()
    }
}

/// Which merge a policy is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Update,
    Upsert,
}

/// A [`FieldPolicy`] checked against a schema, with every column list
/// spelled out in schema order.
#[derive(Clone)]
pub struct Plan {
    /// Match key.
    pub key: Vec<String>,
    /// Columns overwritten from the incoming row.
    pub assign: Vec<String>,
    /// Columns written only while the existing value is NULL.
    pub if_null: Vec<String>,
    /// Columns whose difference makes an update worth doing.
    pub changed: Vec<String>,
    /// Columns written on insert only.
    pub insert_only: Vec<String>,
    pub predicate: Option<UpdateWhere>,
}

impl Plan {
    /// Columns that must be staged for an update under this plan.
    pub fn fields(&self, schema: &Schema) -> Vec<String> {
        let all = self
            .key
            .iter()
            .chain(self.assign.iter())
            .chain(self.changed.iter())
            .chain(self.if_null.iter())
            .cloned()
            .collect::<Vec<_>>();
        schema.ordered(all.as_slice())
    }
    /// Whether the conflict branch has anything to write.
    pub fn writes(&self) -> bool {
        !self.assign.is_empty() || !self.if_null.is_empty()
    }
}

fn clash(left: &[String], right: &[String], what: &str) -> BulkResult<()> {
    match left.iter().find(|name| right.contains(name)) {
        Some(name) => Err(BulkError::config(format!(
            "field `{}` cannot be {}",
            name, what
        ))),
        None => Ok(()),
    }
}

impl FieldPolicy {
    pub fn resolve(&self, schema: &Schema, mode: Mode) -> BulkResult<Plan> {
        let key = match self.pk_field_names.is_empty() {
            true => schema.primary_key().to_vec(),
            false => self.pk_field_names.clone(),
        };
        schema.resolve(key.as_slice())?;
        schema.resolve(self.insert_only_field_names.as_slice())?;
        schema.resolve(self.model_changed_field_names.as_slice())?;
        let nullable = schema.resolve(self.update_if_null_field_names.as_slice())?;
        if let Some(ref fields) = self.update_field_names {
            schema.resolve(fields.as_slice())?;
        }
        let ref insert_only = self.insert_only_field_names;
        let ref if_null = self.update_if_null_field_names;
        let ref changed = self.model_changed_field_names;
        clash(&key, insert_only, "both a match key and insert-only")?;
        clash(&key, if_null, "both a match key and update-if-null")?;
        clash(&key, changed, "both a match key and model-changed")?;
        clash(insert_only, if_null, "both insert-only and update-if-null")?;
        clash(changed, if_null, "both model-changed and update-if-null")?;
        if let Some(column) = nullable.iter().find(|c| !c.is_updatable()) {
            return Err(BulkError::config(format!(
                "generated field `{}` cannot be update-if-null",
                column.name()
            )));
        }
        match mode {
            Mode::Update if !insert_only.is_empty() => {
                return Err(BulkError::config("insert-only fields apply to upserts only"));
            }
            Mode::Upsert if self.update_field_names.is_some() => {
                return Err(BulkError::config("update fields apply to updates only"));
            }
            _ => {}
        }
        let assign = schema
            .columns()
            .iter()
            .filter(|c| c.is_updatable())
            .map(Column::name)
            .filter(|name| match self.update_field_names {
                Some(ref fields) => fields.iter().any(|f| f == name),
                None => true,
            })
            .filter(|name| !key.iter().any(|k| k == name))
            .filter(|name| !insert_only.iter().any(|f| f == name))
            .filter(|name| !if_null.iter().any(|f| f == name))
            .map(String::from)
            .collect::<Vec<_>>();
        let plan = Plan {
            key: schema.ordered(key.as_slice()),
            assign,
            if_null: schema.ordered(if_null.as_slice()),
            changed: schema.ordered(changed.as_slice()),
            insert_only: schema.ordered(insert_only.as_slice()),
            predicate: self.update_where.clone(),
        };
        if mode == Mode::Update && !plan.writes() {
            return Err(BulkError::config(format!(
                "nothing to update on `{}`",
                schema.table()
            )));
        }
        Ok(plan)
    }
}

fn names<I, S>(fields: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    fields.into_iter().map(Into::into).collect()
}

/// Options for [`Loader::bulk_insert`](crate::Loader::bulk_insert).
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub ignore_conflicts: bool,
    pub return_records: bool,
}

impl InsertOptions {
    pub fn ignore_conflicts(mut self) -> Self {
        self.ignore_conflicts = true;
        self
    }
    pub fn return_records(mut self) -> Self {
        self.return_records = true;
        self
    }
}

/// Options for [`Loader::bulk_update`](crate::Loader::bulk_update).
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub policy: FieldPolicy,
    pub return_records: bool,
}

impl UpdateOptions {
    pub fn update_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.update_field_names = Some(names(fields));
        self
    }
    pub fn pk_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.pk_field_names = names(fields);
        self
    }
    pub fn changed_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.model_changed_field_names = names(fields);
        self
    }
    pub fn null_update_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.update_if_null_field_names = names(fields);
        self
    }
    pub fn custom_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Scope<'_>) -> String + Send + Sync + 'static,
    {
        self.policy.update_where = Some(Arc::new(predicate));
        self
    }
    pub fn return_records(mut self) -> Self {
        self.return_records = true;
        self
    }
}

/// Options for [`Loader::bulk_upsert`](crate::Loader::bulk_upsert).
#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    pub policy: FieldPolicy,
    pub return_records: bool,
}

impl UpsertOptions {
    pub fn pk_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.pk_field_names = names(fields);
        self
    }
    pub fn insert_only_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.insert_only_field_names = names(fields);
        self
    }
    pub fn changed_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.model_changed_field_names = names(fields);
        self
    }
    pub fn null_update_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.policy.update_if_null_field_names = names(fields);
        self
    }
    pub fn custom_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Scope<'_>) -> String + Send + Sync + 'static,
    {
        self.policy.update_where = Some(Arc::new(predicate));
        self
    }
    pub fn return_records(mut self) -> Self {
        self.return_records = true;
        self
    }
}

/// Options for
/// [`Loader::bulk_insert_if_changed`](crate::Loader::bulk_insert_if_changed).
#[derive(Debug, Clone, Default)]
pub struct ChangedOptions {
    pub pk_field_names: Vec<String>,
    pub compare_field_names: Vec<String>,
    /// Defaults to the first primary key column.
    pub order_field_name: Option<String>,
    pub return_records: bool,
}

/// Resolved change-detection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    pub key: Vec<String>,
    pub compare: Vec<String>,
    pub order: String,
}

impl ChangedOptions {
    pub fn new<K, C, S, T>(pk_fields: K, compare_fields: C) -> Self
    where
        K: IntoIterator<Item = S>,
        C: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            pk_field_names: names(pk_fields),
            compare_field_names: names(compare_fields),
            ..Self::default()
        }
    }
    pub fn order_field(mut self, field: impl Into<String>) -> Self {
        self.order_field_name = Some(field.into());
        self
    }
    pub fn return_records(mut self) -> Self {
        self.return_records = true;
        self
    }
    pub fn resolve(&self, schema: &Schema) -> BulkResult<History> {
        if self.pk_field_names.is_empty() {
            return Err(BulkError::config("change detection needs pk fields"));
        }
        schema.resolve(self.pk_field_names.as_slice())?;
        schema.resolve(self.compare_field_names.as_slice())?;
        let order = match self.order_field_name {
            Some(ref name) => name.clone(),
            None => schema.primary_key()[0].clone(),
        };
        schema.resolve(&[order.as_str()])?;
        if self.pk_field_names.contains(&order) {
            return Err(BulkError::config(format!(
                "order field `{}` is part of the pk fields, every row would be inserted",
                order
            )));
        }
        let ref excluded = self
            .pk_field_names
            .iter()
            .chain(std::iter::once(&order))
            .cloned()
            .collect::<Vec<_>>();
        clash(&self.compare_field_names, excluded, "compared, it is a pk or order field")?;
        Ok(History {
            key: schema.ordered(self.pk_field_names.as_slice()),
            compare: schema.ordered(self.compare_field_names.as_slice()),
            order,
        })
    }
}

/// Options for [`Loader::bulk_select`](crate::Loader::bulk_select).
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Send filter values as given instead of coercing them to the column
    /// types first.
    pub skip_filter_transform: bool,
    /// Lock matched rows until the caller's transaction ends.
    pub select_for_update: bool,
}

impl SelectOptions {
    pub fn skip_filter_transform(mut self) -> Self {
        self.skip_filter_transform = true;
        self
    }
    pub fn select_for_update(mut self) -> Self {
        self.select_for_update = true;
        self
    }
}
