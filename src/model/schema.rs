use crate::error::*;
use tokio_postgres::types::Type;

/// How a column gets its value when a record leaves it unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Generated {
    /// Plain column. Unset means NULL.
    #[default]
    No,
    /// Filled by the server (identity, serial, column default).
    /// Never written by updates.
    Serial,
    /// Stamped with the current time on every write.
    AutoNow,
    /// Stamped with the current time on insert. Never written by updates.
    AutoNowAdd,
}

/// One column of a target table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    ty: Type,
    generated: Generated,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            generated: Generated::No,
        }
    }
    pub fn serial(self) -> Self {
        self.generated(Generated::Serial)
    }
    pub fn auto_now(self) -> Self {
        self.generated(Generated::AutoNow)
    }
    pub fn auto_now_add(self) -> Self {
        self.generated(Generated::AutoNowAdd)
    }
    pub fn generated(mut self, generated: Generated) -> Self {
        self.generated = generated;
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn ty(&self) -> &Type {
        &self.ty
    }
    pub fn kind(&self) -> Generated {
        self.generated
    }
    /// Whether updates may overwrite this column.
    pub fn is_updatable(&self) -> bool {
        !matches!(self.generated, Generated::Serial | Generated::AutoNowAdd)
    }
}

/// Immutable description of a target table.
///
/// Resolved once per batch and shared by every record in it. Column order
/// is the order used for staging and for generated column lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    table: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl Schema {
    /// Validates and builds a schema.
    pub fn build(
        table: impl Into<String>,
        columns: Vec<Column>,
        primary_key: &[&str],
    ) -> BulkResult<Self> {
        let table = table.into();
        if table.is_empty() {
            return Err(BulkError::config("table name is empty"));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(BulkError::config(format!(
                    "column `{}` declared twice on `{}`",
                    column.name, table
                )));
            }
        }
        if primary_key.is_empty() {
            return Err(BulkError::config(format!(
                "table `{}` has no primary key",
                table
            )));
        }
        let schema = Self {
            table,
            columns,
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
        };
        schema.resolve(schema.primary_key.as_slice())?;
        Ok(schema)
    }
    pub fn table(&self) -> &str {
        &self.table
    }
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }
    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
    /// Looks up every name, failing on the first unknown one.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> BulkResult<Vec<&Column>> {
        names
            .iter()
            .map(|name| {
                self.column(name.as_ref()).ok_or_else(|| {
                    BulkError::config(format!(
                        "unknown field `{}` on `{}`",
                        name.as_ref(),
                        self.table
                    ))
                })
            })
            .collect()
    }
    /// Restricts `names` to this schema's column order, dropping duplicates.
    pub fn ordered<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| names.iter().any(|n| n.as_ref() == c.name))
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Quotes an SQL identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"alias"."column"`, where `alias` is already quoted (or `EXCLUDED`).
pub fn qualify(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote(column))
}
