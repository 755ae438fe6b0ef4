use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::ser::SerializeSeq;
use serde::Serialize;
use serde::Serializer;
use serde_json_bytes::ByteString;

use crate::cache::PageInfo;
use crate::json_ext::Value;

/// The fields of a response object, by response key.
pub type ResponseObject = IndexMap<ByteString, ResponseValue>;

/// A node of the denormalized response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseValue {
    Null,
    Leaf(Value),
    Object(ResponseObject),
    List(ResponseList),
}

/// A list along with the pagination flags of the cached list it was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseList {
    pub items: Vec<ResponseValue>,
    pub page_info: PageInfo,
}

impl ResponseValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ResponseValue::Null)
    }

    pub fn get(&self, key: &str) -> Option<&ResponseValue> {
        self.as_object()?.get(key)
    }

    pub fn as_object(&self) -> Option<&ResponseObject> {
        match self {
            ResponseValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ResponseList> {
        match self {
            ResponseValue::List(list) => Some(list),
            _ => None,
        }
    }

    /// Plain JSON form of the response.
    ///
    /// Pagination flags are not part of it, read them from [`ResponseList::page_info`].
    pub fn to_json(&self) -> Value {
        match self {
            ResponseValue::Null => Value::Null,
            ResponseValue::Leaf(value) => value.clone(),
            ResponseValue::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            ResponseValue::List(list) => {
                Value::Array(list.items.iter().map(ResponseValue::to_json).collect())
            }
        }
    }
}

/// Inserts `value` under `key`, merging it into the value already there.
///
/// Selections sharing a response key contribute to the same value: objects are merged field by
/// field, lists of the same length element by element. Anything else is replaced.
pub(crate) fn insert_merged(object: &mut ResponseObject, key: ByteString, value: ResponseValue) {
    match object.get_mut(key.as_str()) {
        Some(existing) => existing.merge(value),
        None => {
            object.insert(key, value);
        }
    }
}

impl ResponseValue {
    fn merge(&mut self, other: ResponseValue) {
        match (self, other) {
            (ResponseValue::Object(existing), ResponseValue::Object(other)) => {
                for (key, value) in other {
                    insert_merged(existing, key, value);
                }
            }
            (ResponseValue::List(existing), ResponseValue::List(other))
                if existing.items.len() == other.items.len() =>
            {
                for (item, other) in existing.items.iter_mut().zip(other.items) {
                    item.merge(other);
                }
            }
            (existing, other) => *existing = other,
        }
    }
}

impl Serialize for ResponseValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ResponseValue::Null => serializer.serialize_unit(),
            ResponseValue::Leaf(value) => value.serialize(serializer),
            ResponseValue::Object(object) => {
                let mut map = serializer.serialize_map(Some(object.len()))?;
                for (key, value) in object {
                    map.serialize_entry(key.as_str(), value)?;
                }
                map.end()
            }
            ResponseValue::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.items.len()))?;
                for item in &list.items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl From<Value> for ResponseValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ResponseValue::Null,
            value => ResponseValue::Leaf(value),
        }
    }
}
