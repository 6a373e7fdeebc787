use crate::error::*;
use crate::model::*;
use chrono::DateTime;
use chrono::Utc;
use rust_decimal::Decimal;
use std::pin::Pin;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::Kind;
use tokio_postgres::types::ToSql;
use tokio_postgres::types::Type;

/// Binary row serialization for the COPY protocol.
///
/// Field order and types must match the column list the COPY was opened
/// with.
#[async_trait::async_trait]
pub trait Row: Send {
    /// Writes this row to the binary COPY stream.
    async fn write(self, writer: Pin<&mut BinaryCopyInWriter>) -> Result<(), PgErr>;
}

/// A serialized record: one coerced value per staged column, followed by
/// the record's input position.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    /// Staged column values in COPY order, ordinal last.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

#[async_trait::async_trait]
impl Row for Tuple {
    async fn write(self, writer: Pin<&mut BinaryCopyInWriter>) -> Result<(), PgErr> {
        let refs = self
            .values()
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect::<Vec<_>>();
        writer.write(&refs).await
    }
}

/// Per-batch serializer settings.
#[derive(Debug, Clone, Copy)]
pub struct Encoding {
    pub allow_binary: bool,
    /// Whether unset `AutoNowAdd` columns get stamped.
    pub insert: bool,
    /// One timestamp for the whole batch.
    pub now: DateTime<Utc>,
}

impl Encoding {
    pub fn new(allow_binary: bool, insert: bool) -> Self {
        Self {
            allow_binary,
            insert,
            now: Utc::now(),
        }
    }
}

/// Picks the columns a batch stages.
///
/// `fields` restricts staging to a subset (kept in schema order); `None`
/// stages every column. Server-generated columns are staged only when the
/// records supply them, and then all of them must.
pub fn columns<'s>(
    schema: &'s Schema,
    records: &[Record],
    fields: Option<&[String]>,
) -> BulkResult<Vec<&'s Column>> {
    for (index, record) in records.iter().enumerate() {
        if let Some(name) = record.names().find(|name| !schema.contains(name)) {
            return Err(BulkError::validation(
                index,
                name,
                format!("not a column of `{}`", schema.table()),
            ));
        }
    }
    let candidates = match fields {
        Some(fields) => schema.resolve(schema.ordered(fields).as_slice())?,
        None => schema.columns().iter().collect(),
    };
    let mut staged = Vec::with_capacity(candidates.len());
    for column in candidates {
        if column.kind() != Generated::Serial {
            staged.push(column);
            continue;
        }
        let set = records.iter().filter(|r| r.is_set(column.name())).count();
        if set == records.len() && set > 0 {
            staged.push(column);
        } else if set > 0 {
            let index = records
                .iter()
                .position(|r| !r.is_set(column.name()))
                .unwrap_or_default();
            return Err(BulkError::validation(
                index,
                column.name(),
                "server-generated field must be set on every record or on none",
            ));
        }
    }
    Ok(staged)
}

/// Serializes one record against the staged columns.
pub fn serialize(
    record: &Record,
    index: usize,
    columns: &[&Column],
    encoding: &Encoding,
) -> BulkResult<Tuple> {
    let mut values = Vec::with_capacity(columns.len() + 1);
    for column in columns {
        let value = match record.get(column.name()) {
            Some(value) => value.clone(),
            None => match column.kind() {
                Generated::AutoNow => Value::Timestamp(encoding.now),
                Generated::AutoNowAdd if encoding.insert => Value::Timestamp(encoding.now),
                _ => Value::Null,
            },
        };
        let value = coerce(value, column.ty(), encoding.allow_binary)
            .map_err(|reason| BulkError::validation(index, column.name(), reason))?;
        values.push(value);
    }
    values.push(Value::Int(index as i64));
    Ok(Tuple { values })
}

/// Serializes a whole batch, stopping at the first bad record.
pub fn serialize_all(
    records: &[Record],
    columns: &[&Column],
    encoding: &Encoding,
) -> BulkResult<Vec<Tuple>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| serialize(record, index, columns, encoding))
        .collect()
}

/// Converts a value to the representation its column expects.
pub fn coerce(value: Value, ty: &Type, allow_binary: bool) -> Result<Value, String> {
    match (value, ty.kind()) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Bytes(_), _) if !allow_binary => {
            Err("binary values are disabled, see Config::allow_binary".to_string())
        }
        (Value::Array(items), Kind::Array(member)) => items
            .into_iter()
            .map(|item| coerce(item, member, allow_binary))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (value, _) if matches!(*ty, Type::JSON | Type::JSONB) => Ok(Value::Json(value.into_json())),
        (Value::Int(i), _) if matches!(*ty, Type::FLOAT4 | Type::FLOAT8) => Ok(Value::Float(i as f64)),
        (Value::Int(i), _) if *ty == Type::NUMERIC => Ok(Value::Decimal(Decimal::from(i))),
        (Value::Float(f), _) if *ty == Type::NUMERIC => Decimal::try_from(f)
            .map(Value::Decimal)
            .map_err(|e| format!("{} is not a valid numeric: {}", f, e)),
        (Value::Text(s), _) if *ty == Type::NUMERIC => s
            .trim()
            .parse::<Decimal>()
            .map(Value::Decimal)
            .map_err(|e| format!("`{}` is not a valid numeric: {}", s, e)),
        (Value::Int(i), _) if *ty == Type::INT2 && i16::try_from(i).is_err() => {
            Err(format!("{} overflows smallint", i))
        }
        (Value::Int(i), _) if *ty == Type::INT4 && i32::try_from(i).is_err() => {
            Err(format!("{} overflows integer", i))
        }
        (Value::Timestamp(t), _) if *ty == Type::DATE => Ok(Value::Date(t.date_naive())),
        (value, _) if value.fits(ty) => Ok(value),
        (value, _) => Err(format!("{} value does not fit column type {}", value.kind(), ty)),
    }
}
