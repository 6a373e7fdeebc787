use super::*;
use crate::config::Config;
use crate::error::*;
use crate::model::*;
use tokio_postgres::Transaction;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::Type;

/// A transaction-scoped staging table holding one serialized batch.
///
/// The table mirrors the staged columns of its target plus the
/// [`ORDINAL`](crate::ORDINAL) column, and is dropped on commit or
/// rollback by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    name: String,
    columns: Vec<String>,
    rows: usize,
}

impl Stage {
    pub(crate) fn new(name: impl Into<String>, columns: Vec<String>, rows: usize) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }
    /// Unquoted table name.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Quoted table name, ready to splice into SQL.
    pub fn ident(&self) -> String {
        quote(&self.name)
    }
    /// Staged target columns, in schema order, without the ordinal.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// `CREATE TEMPORARY TABLE ... WITH NO DATA` copying the target's
    /// column types.
    pub fn creates(&self, schema: &Schema) -> String {
        let select = self
            .columns
            .iter()
            .map(|c| quote(c))
            .chain(std::iter::once(crate::ORDINAL_COLUMN.to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TEMPORARY TABLE {} ON COMMIT DROP AS SELECT {} FROM {} WITH NO DATA",
            self.ident(),
            select,
            quote(schema.table())
        )
    }
    /// `COPY ... FROM STDIN BINARY` for the staged columns.
    pub fn copy(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(crate::ORDINAL))
            .map(quote)
            .collect::<Vec<_>>()
            .join(", ");
        format!("COPY {} ({}) FROM STDIN BINARY", self.ident(), columns)
    }
    /// Index on the match key followed by fresh planner statistics.
    pub fn indices(&self, key: &[String]) -> String {
        let key = key.iter().map(|k| quote(k)).collect::<Vec<_>>().join(", ");
        format!(
            "CREATE INDEX ON {t} ({k}); ANALYZE {t};",
            t = self.ident(),
            k = key
        )
    }

    /// Creates the staging table and streams `tuples` into it.
    ///
    /// Batches above [`Config::index_threshold`] rows get an index on
    /// `key`.
    pub async fn load(
        tx: &Transaction<'_>,
        schema: &Schema,
        columns: &[&Column],
        tuples: Vec<Tuple>,
        key: &[String],
        config: &Config,
    ) -> BulkResult<Self> {
        let stage = Self::new(
            staging_name(schema.table()),
            columns.iter().map(|c| c.name().to_string()).collect(),
            tuples.len(),
        );
        let ref creates = stage.creates(schema);
        log::debug!("{}", creates);
        tx.batch_execute(creates).await?;
        let types = columns
            .iter()
            .map(|c| c.ty().clone())
            .chain(std::iter::once(Type::INT8))
            .collect::<Vec<_>>();
        let sink = tx.copy_in(stage.copy().as_str()).await?;
        let writer = BinaryCopyInWriter::new(sink, &types);
        futures::pin_mut!(writer);
        for tuple in tuples {
            tuple.write(writer.as_mut()).await?;
        }
        let n = writer.finish().await?;
        log::debug!("staged {} rows into {}", n, stage.name);
        if stage.rows > config.index_threshold && !key.is_empty() {
            log::debug!("indexing staging table ({})", stage.name);
            tx.batch_execute(&stage.indices(key)).await?;
        }
        Ok(stage)
    }
}

/// `loading_<table>_<uuid>`, with the table part cut so the whole name
/// fits PostgreSQL's identifier limit.
pub fn staging_name(table: &str) -> String {
    let suffix = uuid::Uuid::now_v7().simple().to_string();
    let room = crate::IDENTIFIER_MAX_LEN - crate::STAGING_PREFIX.len() - suffix.len() - 1;
    let table = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .take(room)
        .collect::<String>();
    format!("{}{}_{}", crate::STAGING_PREFIX, table, suffix)
}
