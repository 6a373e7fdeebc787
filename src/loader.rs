use crate::config::*;
use crate::error::*;
use crate::model::*;
use crate::postgres::*;
use crate::sql;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::time::Instant;
use tokio_postgres::Transaction;

/// Lazy, forward-only stream of selected rows.
pub type Selection = BoxStream<'static, BulkResult<Mapping>>;

/// Runs bulk operations inside a caller-owned transaction.
///
/// Each write serializes its batch, stages it with one binary COPY and
/// merges it with one statement. Staging tables are dropped when the
/// transaction ends; the loader never commits or rolls back.
pub struct Loader<'a, 't> {
    tx: &'a Transaction<'t>,
    config: Config,
}

impl<'a, 't> Loader<'a, 't> {
    pub fn new(tx: &'a Transaction<'t>) -> Self {
        Self::with_config(tx, Config::default())
    }
    pub fn with_config(tx: &'a Transaction<'t>, config: Config) -> Self {
        Self { tx, config }
    }
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Inserts every record. Conflicts abort the batch unless
    /// `ignore_conflicts` is set, in which case colliding records are
    /// skipped.
    pub async fn bulk_insert(
        &self,
        schema: &Schema,
        records: &[Record],
        options: &InsertOptions,
    ) -> BulkResult<Outcome> {
        if records.is_empty() {
            log::warn!("empty insert batch for ({})", schema.table());
            return Ok(Outcome::empty(options.return_records));
        }
        let clock = Instant::now();
        log::info!("inserting {} records into ({})", records.len(), schema.table());
        let (columns, tuples) = self.encode(schema, records, None, true)?;
        if columns.is_empty() {
            return Err(BulkError::config(format!(
                "nothing to insert into `{}`",
                schema.table()
            )));
        }
        let keyed = options.return_records && staged(&columns, schema.primary_key()).is_ok();
        if options.return_records && options.ignore_conflicts && !keyed {
            return Err(BulkError::config(
                "cannot return records for ignored conflicts when keys are server-generated",
            ));
        }
        let stage = Stage::load(self.tx, schema, &columns, tuples, &[], &self.config).await?;
        let inputs = match keyed {
            true => Some(self.inputs(&stage, schema.primary_key()).await?),
            false => None,
        };
        let statement = sql::insert(schema, &stage, options.ignore_conflicts, options.return_records);
        log::debug!("{}", statement);
        let outcome = match options.return_records {
            false => Outcome {
                affected: self.tx.execute(statement.as_str(), &[]).await?,
                ..Outcome::default()
            },
            true => {
                let rows = self.rows(&statement).await?;
                let affected = rows.len() as u64;
                let keys = inputs.as_deref().map(|k| (k, schema.primary_key()));
                let (records, skipped) = consume(rows, keys, SkipReason::Conflict);
                Outcome {
                    affected,
                    records: Some(records),
                    skipped,
                }
            }
        };
        log::info!(
            "inserted {} of {} records into ({}) in {:?}",
            outcome.affected,
            records.len(),
            schema.table(),
            clock.elapsed()
        );
        Ok(outcome)
    }

    /// Updates existing rows matched on the policy's key. Records without
    /// a matching row are ignored.
    pub async fn bulk_update(
        &self,
        schema: &Schema,
        records: &[Record],
        options: &UpdateOptions,
    ) -> BulkResult<Outcome> {
        let plan = options.policy.resolve(schema, Mode::Update)?;
        if records.is_empty() {
            log::warn!("empty update batch for ({})", schema.table());
            return Ok(Outcome::empty(options.return_records));
        }
        let clock = Instant::now();
        log::info!("updating {} records in ({})", records.len(), schema.table());
        let fields = plan.fields(schema);
        let (columns, tuples) = self.encode(schema, records, Some(fields.as_slice()), false)?;
        staged(&columns, &fields)?;
        let stage = Stage::load(self.tx, schema, &columns, tuples, &plan.key, &self.config).await?;
        let statement = sql::update(schema, &stage, &plan, options.return_records);
        let outcome = self
            .written(schema, &stage, &plan.key, &statement, options.return_records, true)
            .await?;
        log::info!(
            "updated {} of {} records in ({}) in {:?}",
            outcome.affected,
            records.len(),
            schema.table(),
            clock.elapsed()
        );
        Ok(outcome)
    }

    /// Inserts new rows and updates existing ones in one statement,
    /// following the configured [`UpsertStrategy`].
    pub async fn bulk_upsert(
        &self,
        schema: &Schema,
        records: &[Record],
        options: &UpsertOptions,
    ) -> BulkResult<Outcome> {
        let plan = options.policy.resolve(schema, Mode::Upsert)?;
        if records.is_empty() {
            log::warn!("empty upsert batch for ({})", schema.table());
            return Ok(Outcome::empty(options.return_records));
        }
        let clock = Instant::now();
        log::info!("upserting {} records into ({})", records.len(), schema.table());
        let (columns, tuples) = self.encode(schema, records, None, true)?;
        staged(&columns, &plan.fields(schema))?;
        let stage = Stage::load(self.tx, schema, &columns, tuples, &plan.key, &self.config).await?;
        let strategy = self.config.upsert_strategy;
        let returning = options.return_records && strategy == UpsertStrategy::OnConflict;
        let statement = sql::upsert(schema, &stage, &plan, strategy, returning);
        let outcome = self
            .written(schema, &stage, &plan.key, &statement, options.return_records, returning)
            .await?;
        log::info!(
            "upserted {} of {} records into ({}) in {:?}",
            outcome.affected,
            records.len(),
            schema.table(),
            clock.elapsed()
        );
        Ok(outcome)
    }

    /// Appends records that are new or differ from the latest stored row
    /// with the same key. Existing rows are never touched.
    pub async fn bulk_insert_if_changed(
        &self,
        schema: &Schema,
        records: &[Record],
        options: &ChangedOptions,
    ) -> BulkResult<Outcome> {
        let history = options.resolve(schema)?;
        if records.is_empty() {
            log::warn!("empty change-detection batch for ({})", schema.table());
            return Ok(Outcome::empty(options.return_records));
        }
        let clock = Instant::now();
        log::info!(
            "inserting changed records out of {} into ({})",
            records.len(),
            schema.table()
        );
        let (columns, tuples) = self.encode(schema, records, None, true)?;
        let identity = schema.ordered(
            history
                .key
                .iter()
                .chain(history.compare.iter())
                .collect::<Vec<_>>()
                .as_slice(),
        );
        staged(&columns, &identity)?;
        let stage = Stage::load(self.tx, schema, &columns, tuples, &history.key, &self.config).await?;
        let statement = sql::insert_if_changed(schema, &stage, &history, options.return_records);
        log::debug!("{}", statement);
        let outcome = match options.return_records {
            false => Outcome {
                affected: self.tx.execute(statement.as_str(), &[]).await?,
                ..Outcome::default()
            },
            true => {
                let inputs = self.inputs(&stage, &identity).await?;
                let rows = self.rows(&statement).await?;
                let affected = rows.len() as u64;
                let keys = Some((inputs.as_slice(), identity.as_slice()));
                let (records, skipped) = consume(rows, keys, SkipReason::Unchanged);
                Outcome {
                    affected,
                    records: Some(records),
                    skipped,
                }
            }
        };
        log::info!(
            "appended {} of {} records to ({}) in {:?}",
            outcome.affected,
            records.len(),
            schema.table(),
            clock.elapsed()
        );
        Ok(outcome)
    }

    /// Streams the rows whose `filter_fields` equal one of the
    /// `filter_data` tuples.
    ///
    /// The filter fields are always part of the output. An empty
    /// `select_fields` selects every column. Small filter sets are bound
    /// inline; larger ones are staged first.
    pub async fn bulk_select<S: AsRef<str>>(
        &self,
        schema: &Schema,
        filter_fields: &[S],
        select_fields: &[S],
        filter_data: Vec<Vec<Value>>,
        options: &SelectOptions,
    ) -> BulkResult<Selection> {
        let filter = schema.resolve(filter_fields)?;
        if filter.is_empty() {
            return Err(BulkError::config("bulk select needs filter fields"));
        }
        schema.resolve(select_fields)?;
        let mut select = match select_fields.is_empty() {
            true => schema.columns().iter().map(|c| c.name().to_string()).collect(),
            false => select_fields
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect::<Vec<_>>(),
        };
        for column in filter.iter() {
            if !select.iter().any(|s| s == column.name()) {
                select.push(column.name().to_string());
            }
        }
        let names = filter
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>();
        if let Some(index) = filter_data.iter().position(|t| t.len() != filter.len()) {
            return Err(BulkError::validation(
                index,
                &names.join(", "),
                format!(
                    "expected {} filter values, got {}",
                    filter.len(),
                    filter_data[index].len()
                ),
            ));
        }
        if filter_data.is_empty() {
            log::warn!("empty filter set for ({})", schema.table());
            return Ok(futures::stream::empty().boxed());
        }
        let clock = Instant::now();
        let n = filter_data.len();
        let stream = match sql::inline(n, filter.len(), self.config.inline_filter_limit) {
            true => {
                let mut params = Vec::with_capacity(n * filter.len());
                for (index, tuple) in filter_data.into_iter().enumerate() {
                    for (value, column) in tuple.into_iter().zip(filter.iter()) {
                        params.push(match options.skip_filter_transform {
                            true => value,
                            false => coerce(value, column.ty(), self.config.allow_binary)
                                .map_err(|reason| BulkError::validation(index, column.name(), reason))?,
                        });
                    }
                }
                let statement = sql::select_inline(schema, &filter, &select, n, options.select_for_update);
                log::debug!("{}", statement);
                self.tx.query_raw(statement.as_str(), params.iter()).await?
            }
            false => {
                let records = filter_data
                    .into_iter()
                    .map(|tuple| names.iter().cloned().zip(tuple).collect::<Record>())
                    .collect::<Vec<_>>();
                let encoding = Encoding::new(self.config.allow_binary, false);
                let tuples = serialize_all(&records, &filter, &encoding)?;
                let stage = Stage::load(self.tx, schema, &filter, tuples, &names, &self.config).await?;
                let statement = sql::select_staged(schema, &stage, &names, &select, options.select_for_update);
                log::debug!("{}", statement);
                self.tx
                    .query_raw(statement.as_str(), Vec::<Value>::new().iter())
                    .await?
            }
        };
        log::info!(
            "selecting from ({}) by {} filter tuples, ready in {:?}",
            schema.table(),
            n,
            clock.elapsed()
        );
        Ok(stream
            .map(|row| row.map_err(BulkError::from).and_then(|row| Mapping::hydrate(&row)))
            .boxed())
    }

    /// Stages `records` (all columns, or only `fields`) and runs the
    /// statements `queries` builds against the staging table, in order.
    ///
    /// Each statement must be a single SQL command. Rows returned by any
    /// of them are collected when `return_records` is set.
    pub async fn bulk_load_with_queries<F>(
        &self,
        schema: &Schema,
        records: &[Record],
        fields: Option<&[String]>,
        queries: F,
        return_records: bool,
    ) -> BulkResult<Outcome>
    where
        F: FnOnce(&Stage) -> Vec<String>,
    {
        if records.is_empty() {
            log::warn!("empty load batch for ({})", schema.table());
            return Ok(Outcome::empty(return_records));
        }
        let clock = Instant::now();
        log::info!("loading {} records for ({})", records.len(), schema.table());
        let (columns, tuples) = self.encode(schema, records, fields, true)?;
        let stage = Stage::load(self.tx, schema, &columns, tuples, &[], &self.config).await?;
        let mut outcome = Outcome::empty(return_records);
        let mut returned = false;
        for statement in queries(&stage) {
            log::debug!("{}", statement);
            let prepared = self.tx.prepare(statement.as_str()).await?;
            if prepared.columns().is_empty() {
                outcome.affected += self.tx.execute(&prepared, &[]).await?;
                continue;
            }
            let rows = self.tx.query(&prepared, &[]).await?;
            outcome.affected += rows.len() as u64;
            returned = true;
            if let Some(ref mut hydrated) = outcome.records {
                for row in rows.iter() {
                    hydrated.push(Record::hydrate(row)?);
                }
            }
        }
        if return_records && !returned {
            return Err(BulkError::config("records requested but no query returned rows"));
        }
        log::info!(
            "ran queries over {} staged records for ({}) in {:?}",
            stage.rows(),
            schema.table(),
            clock.elapsed()
        );
        Ok(outcome)
    }

    /// Picks columns and serializes the batch.
    fn encode<'s>(
        &self,
        schema: &'s Schema,
        records: &[Record],
        fields: Option<&[String]>,
        insert: bool,
    ) -> BulkResult<(Vec<&'s Column>, Vec<Tuple>)> {
        let columns = columns(schema, records, fields)?;
        let encoding = Encoding::new(self.config.allow_binary, insert);
        let tuples = serialize_all(records, &columns, &encoding)?;
        Ok((columns, tuples))
    }

    async fn rows(&self, statement: &str) -> BulkResult<Vec<Mapping>> {
        self.tx
            .query(statement, &[])
            .await?
            .iter()
            .map(Mapping::hydrate)
            .collect()
    }

    /// Lookup keys of the staged batch on `fields`, in batch order.
    ///
    /// Taken from the staging table rather than the caller's values, so
    /// they carry the precision the column types store (`float4`,
    /// microsecond timestamps) and match rows read back from the target.
    async fn inputs(&self, stage: &Stage, fields: &[String]) -> BulkResult<Vec<String>> {
        let statement = sql::staged_keys(stage, fields);
        log::debug!("{}", statement);
        Ok(self
            .rows(&statement)
            .await?
            .iter()
            .map(|row| row_key(row, fields))
            .collect())
    }

    /// Runs an update or upsert and, when records are wanted, re-selects
    /// the target rows by key.
    ///
    /// With `returns_keys` the statement reports the keys it wrote, which
    /// tells guarded-off records apart from written ones.
    async fn written(
        &self,
        schema: &Schema,
        stage: &Stage,
        key: &[String],
        statement: &str,
        return_records: bool,
        returns_keys: bool,
    ) -> BulkResult<Outcome> {
        log::debug!("{}", statement);
        if !return_records {
            return Ok(Outcome {
                affected: self.tx.execute(statement, &[]).await?,
                ..Outcome::default()
            });
        }
        let (affected, touched) = match returns_keys {
            false => (self.tx.execute(statement, &[]).await?, None),
            true => {
                let rows = self.rows(statement).await?;
                let touched = rows
                    .iter()
                    .map(|row| row_key(row, key))
                    .collect::<HashSet<_>>();
                (rows.len() as u64, Some(touched))
            }
        };
        let inputs = self.inputs(stage, key).await?;
        let reselect = sql::reselect(schema, stage, key);
        log::debug!("{}", reselect);
        let rows = self.rows(&reselect).await?;
        let (records, skipped) = rematch(rows, &inputs, key, touched.as_ref());
        Ok(Outcome {
            affected,
            records: Some(records),
            skipped,
        })
    }
}

/// Positions of `fields` among the staged columns.
fn staged(columns: &[&Column], fields: &[String]) -> BulkResult<Vec<usize>> {
    fields
        .iter()
        .map(|field| {
            columns
                .iter()
                .position(|c| c.name() == field)
                .ok_or_else(|| {
                    BulkError::config(format!(
                        "field `{}` is needed but not staged, it is server-generated and unset",
                        field
                    ))
                })
        })
        .collect()
}
