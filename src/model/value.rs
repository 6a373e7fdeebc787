use bytes::BytesMut;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use std::error::Error;
use tokio_postgres::types::FromSql;
use tokio_postgres::types::IsNull;
use tokio_postgres::types::Kind;
use tokio_postgres::types::ToSql;
use tokio_postgres::types::Type;
use tokio_postgres::types::to_sql_checked;

type BoxErr = Box<dyn Error + Sync + Send>;

/// A single typed field value.
///
/// Integers of every width collapse into `Int` and are narrowed to the
/// column width on write; the same goes for floats. Arrays carry their
/// elements untyped and pick up the member type of the target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Uuid(uuid::Uuid),
    Array(Vec<Value>),
    Bytes(Vec<u8>),
}

/// Scalar types a [`Value`] can be decoded from.
#[rustfmt::skip]
const SCALARS: &[Type] = &[
    Type::BOOL,
    Type::INT2, Type::INT4, Type::INT8,
    Type::FLOAT4, Type::FLOAT8,
    Type::NUMERIC,
    Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME,
    Type::JSON, Type::JSONB,
    Type::TIMESTAMP, Type::TIMESTAMPTZ, Type::DATE,
    Type::UUID,
    Type::BYTEA,
];

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
            Self::Uuid(_) => "uuid",
            Self::Array(_) => "array",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Whether this value can be written to a column of type `ty` as is.
    pub fn fits(&self, ty: &Type) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(_) => <bool as ToSql>::accepts(ty),
            Self::Int(_) => matches!(*ty, Type::INT2 | Type::INT4 | Type::INT8),
            Self::Float(_) => matches!(*ty, Type::FLOAT4 | Type::FLOAT8),
            Self::Decimal(_) => <Decimal as ToSql>::accepts(ty),
            Self::Text(_) => <String as ToSql>::accepts(ty),
            Self::Json(_) => <serde_json::Value as ToSql>::accepts(ty),
            Self::Timestamp(_) => matches!(*ty, Type::TIMESTAMP | Type::TIMESTAMPTZ),
            Self::Date(_) => <NaiveDate as ToSql>::accepts(ty),
            Self::Uuid(_) => <uuid::Uuid as ToSql>::accepts(ty),
            Self::Bytes(_) => <Vec<u8> as ToSql>::accepts(ty),
            Self::Array(items) => match ty.kind() {
                Kind::Array(member) => items.iter().all(|item| item.fits(member)),
                _ => false,
            },
        }
    }

    /// Structured JSON rendering, used when a non-JSON value targets a
    /// `json`/`jsonb` column.
    pub fn into_json(self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(b),
            Self::Int(i) => J::from(i),
            Self::Float(f) => serde_json::Number::from_f64(f).map_or(J::Null, J::Number),
            Self::Decimal(d) => J::String(d.to_string()),
            Self::Text(s) => J::String(s),
            Self::Json(j) => j,
            Self::Timestamp(t) => J::String(t.to_rfc3339()),
            Self::Date(d) => J::String(d.to_string()),
            Self::Uuid(u) => J::String(u.to_string()),
            Self::Array(items) => J::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Bytes(b) => J::Array(b.into_iter().map(J::from).collect()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxErr> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(b) => b.to_sql_checked(ty, out),
            Self::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql_checked(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql_checked(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql_checked(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql_checked(ty, out),
                _ => i.to_sql_checked(ty, out),
            },
            Self::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql_checked(ty, out),
                _ => f.to_sql_checked(ty, out),
            },
            Self::Decimal(d) => d.to_sql_checked(ty, out),
            Self::Text(s) => s.to_sql_checked(ty, out),
            Self::Json(j) => j.to_sql_checked(ty, out),
            Self::Timestamp(t) => match *ty {
                Type::TIMESTAMP => t.naive_utc().to_sql_checked(ty, out),
                _ => t.to_sql_checked(ty, out),
            },
            Self::Date(d) => d.to_sql_checked(ty, out),
            Self::Uuid(u) => u.to_sql_checked(ty, out),
            Self::Array(items) => items.to_sql_checked(ty, out),
            Self::Bytes(b) => b.as_slice().to_sql_checked(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxErr> {
        match *ty {
            Type::BOOL => bool::from_sql(ty, raw).map(Self::Bool),
            Type::INT2 => i16::from_sql(ty, raw).map(|i| Self::Int(i.into())),
            Type::INT4 => i32::from_sql(ty, raw).map(|i| Self::Int(i.into())),
            Type::INT8 => i64::from_sql(ty, raw).map(Self::Int),
            Type::FLOAT4 => f32::from_sql(ty, raw).map(|f| Self::Float(f.into())),
            Type::FLOAT8 => f64::from_sql(ty, raw).map(Self::Float),
            Type::NUMERIC => Decimal::from_sql(ty, raw).map(Self::Decimal),
            Type::JSON | Type::JSONB => serde_json::Value::from_sql(ty, raw).map(Self::Json),
            Type::TIMESTAMPTZ => DateTime::<Utc>::from_sql(ty, raw).map(Self::Timestamp),
            Type::TIMESTAMP => NaiveDateTime::from_sql(ty, raw).map(|t| Self::Timestamp(t.and_utc())),
            Type::DATE => NaiveDate::from_sql(ty, raw).map(Self::Date),
            Type::UUID => uuid::Uuid::from_sql(ty, raw).map(Self::Uuid),
            Type::BYTEA => Vec::<u8>::from_sql(ty, raw).map(Self::Bytes),
            _ if <String as FromSql>::accepts(ty) => String::from_sql(ty, raw).map(Self::Text),
            _ => match ty.kind() {
                Kind::Array(_) => Vec::<Value>::from_sql(ty, raw).map(Self::Array),
                _ => Err(format!("cannot decode {}", ty).into()),
            },
        }
    }

    fn from_sql_null(_: &Type) -> Result<Self, BoxErr> {
        Ok(Self::Null)
    }

    fn accepts(ty: &Type) -> bool {
        match ty.kind() {
            Kind::Array(member) => <Self as FromSql>::accepts(member),
            _ => SCALARS.contains(ty) || <String as FromSql>::accepts(ty),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Self::Int(i.into())
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i.into())
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}
impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f.into())
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}
impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Self::Json(j)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}
impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}
impl From<uuid::Uuid> for Value {
    fn from(u: uuid::Uuid) -> Self {
        Self::Uuid(u)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}
