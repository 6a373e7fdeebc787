use super::*;
use std::collections::BTreeMap;

/// Plain field mapping, as streamed back by bulk selects.
pub type Mapping = BTreeMap<String, Value>;

/// One structured row: field name to value.
///
/// A field that was never set is absent, which is different from being
/// set to [`Value::Null`]: unset server-generated columns are left for the
/// database to fill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Mapping,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }
    /// Builder-style setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
    pub fn is_set(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
    pub fn into_mapping(self) -> Mapping {
        self.fields
    }
}

impl From<Mapping> for Record {
    fn from(fields: Mapping) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
