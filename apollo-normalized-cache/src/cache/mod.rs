//! Normalized entity store.
//!
//! Entities are stored flat, by type name and document id. Relationships between them are
//! [`Reference`]s rather than nested copies.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json_bytes::ByteString;

use crate::error::CacheError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// JSON key marking a reference in the JSON encoding of the store.
pub const REFERENCE_KEY: &str = "__ref";
/// JSON key holding the items of a paginated list in the JSON encoding of the store.
pub const ITEMS_KEY: &str = "__items";
pub const BOF_KEY: &str = "BOF";
pub const EOF_KEY: &str = "EOF";
pub const COUNT_KEY: &str = "count";

/// A pointer to an entity of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub type_name: String,
    pub id: String,
}

impl Reference {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

impl FromStr for Reference {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((type_name, id)) if !type_name.is_empty() && !id.is_empty() => {
                Ok(Reference::new(type_name, id))
            }
            _ => Err(CacheError::MalformedReference(s.to_string())),
        }
    }
}

/// The cached fields of one entity, or of an object stored inline.
pub type Record = IndexMap<ByteString, CacheValue>;

/// Out of band pagination flags attached to a cached list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// The list starts at the beginning of the feed.
    pub bof: Option<bool>,
    /// The list ends at the end of the feed.
    pub eof: Option<bool>,
    pub count: Option<usize>,
}

impl PageInfo {
    pub fn is_empty(&self) -> bool {
        self.bof.is_none() && self.eof.is_none() && self.count.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedList {
    pub items: Vec<CacheValue>,
    pub page_info: PageInfo,
}

impl CachedList {
    pub fn new(items: Vec<CacheValue>) -> Self {
        Self {
            items,
            page_info: PageInfo::default(),
        }
    }

    pub fn with_page_info(mut self, page_info: PageInfo) -> Self {
        self.page_info = page_info;
        self
    }
}

/// A value held by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Null,
    /// A leaf value. Custom scalars may hold any JSON.
    Scalar(Value),
    Reference(Reference),
    Record(Record),
    List(CachedList),
}

impl CacheValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null)
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            CacheValue::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&CachedList> {
        match self {
            CacheValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            CacheValue::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Encodes the value back into its JSON representation.
    pub fn to_json(&self) -> Value {
        match self {
            CacheValue::Null => Value::Null,
            CacheValue::Scalar(value) => value.clone(),
            CacheValue::Reference(reference) => {
                let mut object = Object::new();
                object.insert(REFERENCE_KEY, Value::String(reference.to_string().into()));
                Value::Object(object)
            }
            CacheValue::Record(record) => Value::Object(
                record
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            CacheValue::List(list) => {
                let items = Value::Array(list.items.iter().map(CacheValue::to_json).collect());
                if list.page_info.is_empty() {
                    return items;
                }
                let mut object = Object::new();
                object.insert(ITEMS_KEY, items);
                if let Some(bof) = list.page_info.bof {
                    object.insert(BOF_KEY, Value::Bool(bof));
                }
                if let Some(eof) = list.page_info.eof {
                    object.insert(EOF_KEY, Value::Bool(eof));
                }
                if let Some(count) = list.page_info.count {
                    object.insert(COUNT_KEY, Value::from(count));
                }
                Value::Object(object)
            }
        }
    }
}

impl From<Reference> for CacheValue {
    fn from(reference: Reference) -> Self {
        CacheValue::Reference(reference)
    }
}

impl From<Record> for CacheValue {
    fn from(record: Record) -> Self {
        CacheValue::Record(record)
    }
}

impl From<CachedList> for CacheValue {
    fn from(list: CachedList) -> Self {
        CacheValue::List(list)
    }
}

/// Decodes the JSON representation of the store.
///
/// `{"__ref": "Type:id"}` is a reference and `{"__items": [...], "BOF": .., "EOF": .., "count": ..}`
/// a list carrying pagination flags. Other objects are records, arrays are plain lists.
impl TryFrom<Value> for CacheValue {
    type Error = CacheError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => CacheValue::Null,
            Value::Array(items) => CacheValue::List(CachedList::new(
                items
                    .into_iter()
                    .map(CacheValue::try_from)
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(mut object) => {
                if object.len() == 1 {
                    if let Some(reference) = object.get(REFERENCE_KEY) {
                        let reference = reference.as_str().ok_or_else(|| {
                            CacheError::MalformedReference(format!("{reference:?}"))
                        })?;
                        return Ok(CacheValue::Reference(reference.parse()?));
                    }
                }
                if let Some(items) = object.remove(ITEMS_KEY) {
                    let items = match CacheValue::try_from(items)? {
                        CacheValue::List(list) => list.items,
                        _ => {
                            return Err(CacheError::InvalidState(format!(
                                "'{ITEMS_KEY}' must hold an array"
                            )))
                        }
                    };
                    let page_info = PageInfo {
                        bof: object.get(BOF_KEY).and_then(Value::as_bool),
                        eof: object.get(EOF_KEY).and_then(Value::as_bool),
                        count: object
                            .get(COUNT_KEY)
                            .and_then(Value::as_u64)
                            .and_then(|count| usize::try_from(count).ok()),
                    };
                    return Ok(CacheValue::List(CachedList { items, page_info }));
                }
                CacheValue::Record(record_from_object(object)?)
            }
            scalar => CacheValue::Scalar(scalar),
        })
    }
}

fn record_from_object(object: Object) -> Result<Record, CacheError> {
    object
        .into_iter()
        .map(|(key, value)| Ok((key, CacheValue::try_from(value)?)))
        .collect()
}

/// A snapshot of the normalized store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheState {
    /// Entities by type name, then by document id.
    pub entities: HashMap<String, HashMap<String, Record>>,
    /// Top level query results by field name. Live fields are keyed by alias, then channel key.
    pub result: Record,
}

impl CacheState {
    /// Decodes `{"entities": {Type: {id: record}}, "result": {...}}`.
    pub fn from_json(value: Value) -> Result<Self, CacheError> {
        let mut object = match value {
            Value::Object(object) => object,
            _ => {
                return Err(CacheError::InvalidState(
                    "the cache state must be an object".to_string(),
                ))
            }
        };

        let mut state = CacheState::default();
        if let Some(entities) = object.remove("entities") {
            let Value::Object(entities) = entities else {
                return Err(CacheError::InvalidState(
                    "'entities' must be an object".to_string(),
                ));
            };
            for (type_name, documents) in entities {
                let Value::Object(documents) = documents else {
                    return Err(CacheError::InvalidState(format!(
                        "entities of type '{}' must be an object",
                        type_name.as_str()
                    )));
                };
                let mut by_id = HashMap::with_capacity(documents.len());
                for (id, document) in documents {
                    let Value::Object(document) = document else {
                        return Err(CacheError::InvalidState(format!(
                            "entity '{}:{}' must be an object",
                            type_name.as_str(),
                            id.as_str()
                        )));
                    };
                    by_id.insert(id.as_str().to_string(), record_from_object(document)?);
                }
                state.entities.insert(type_name.as_str().to_string(), by_id);
            }
        }
        if let Some(result) = object.remove("result") {
            let Value::Object(result) = result else {
                return Err(CacheError::InvalidState(
                    "'result' must be an object".to_string(),
                ));
            };
            state.result = record_from_object(result)?;
        }
        Ok(state)
    }

    pub fn entity(&self, reference: &Reference) -> Option<&Record> {
        self.entities
            .get(&reference.type_name)
            .and_then(|documents| documents.get(&reference.id))
    }

    pub fn insert_entity(&mut self, reference: Reference, record: Record) {
        self.entities
            .entry(reference.type_name)
            .or_default()
            .insert(reference.id, record);
    }

    pub fn into_source(self) -> Arc<dyn StateSource> {
        Arc::new(Arc::new(self))
    }
}

/// Gives access to the current store snapshot.
///
/// The denormalizer samples it once per call and reads that snapshot for the whole traversal.
pub trait StateSource: Send + Sync {
    fn get_state(&self) -> Arc<CacheState>;
}

impl StateSource for Arc<CacheState> {
    fn get_state(&self) -> Arc<CacheState> {
        self.clone()
    }
}

/// A store whose snapshot can be replaced while readers hold on to older ones.
#[derive(Debug, Default)]
pub struct CacheStore {
    state: RwLock<Arc<CacheState>>,
}

impl CacheStore {
    pub fn new(state: CacheState) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// Installs a new snapshot. Traversals already running keep reading the previous one.
    pub fn replace(&self, state: CacheState) {
        *self.state.write() = Arc::new(state);
    }

    pub fn update(&self, f: impl FnOnce(&mut CacheState)) {
        let mut guard = self.state.write();
        f(Arc::make_mut(&mut guard));
    }
}

impl StateSource for CacheStore {
    fn get_state(&self) -> Arc<CacheState> {
        self.state.read().clone()
    }
}
