//! Selection of the cached value matching the arguments of a field.

use std::borrow::Cow;

use crate::cache::CacheState;
use crate::cache::CacheValue;
use crate::cache::CachedList;
use crate::cache::PageInfo;
use crate::configuration::Pagination;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::Field;

/// Bucket holding a list fetched from both ends, or fetched entirely.
pub const FULL_BUCKET: &str = "full";
/// Bucket holding the items fetched from the beginning of a list.
pub const FRONT_BUCKET: &str = "front";
/// Bucket holding the items fetched from the end of a list.
pub const BACK_BUCKET: &str = "back";

/// Resolves which cached value applies to a field, given its arguments.
pub trait FieldStateResolver: Send + Sync {
    /// `cached` is the value stored under the field name. Returning `None` means nothing is cached
    /// for these arguments, and the field goes through the missing data handler.
    fn resolve<'v>(
        &self,
        cached: &'v CacheValue,
        field: &Field,
        arguments: &Object,
        state: &'v CacheState,
    ) -> Option<Cow<'v, CacheValue>>;
}

/// The default [`FieldStateResolver`].
///
/// Regular arguments select a sub value of a record keyed by [`ArgumentsResolver::arguments_key`].
/// Pagination arguments then read a page out of the selected value: either a plain list, or a
/// record of buckets ([`FULL_BUCKET`], [`FRONT_BUCKET`], [`BACK_BUCKET`]). `first` and `after`
/// read the full bucket, else the front one. `last` and `before` read the full bucket, else the
/// back one. Cursors are read from the `cursor_field` of the listed entities.
///
/// A page that cannot be served entirely from the cache resolves to the bucket record itself,
/// which is not a list and gets flagged for fetching.
#[derive(Debug, Clone, Default)]
pub struct ArgumentsResolver {
    pagination: Pagination,
}

impl ArgumentsResolver {
    pub fn new(pagination: Pagination) -> Self {
        Self { pagination }
    }

    /// Canonical key of a set of arguments: their JSON encoding, with object keys sorted.
    pub fn arguments_key(arguments: &Object) -> String {
        serde_json::to_string(&canonical(&Value::Object(arguments.clone()))).unwrap_or_default()
    }

    fn page<'v>(
        &self,
        cached: &'v CacheValue,
        arguments: &Object,
        state: &'v CacheState,
    ) -> Cow<'v, CacheValue> {
        let (count, from_front) = match (
            count_argument(arguments, &self.pagination.first),
            count_argument(arguments, &self.pagination.last),
        ) {
            (Some(count), _) => (count, true),
            (None, Some(count)) => (count, false),
            (None, None) => return Cow::Borrowed(cached),
        };
        let cursor_argument = if from_front {
            &self.pagination.after
        } else {
            &self.pagination.before
        };
        let cursor = arguments
            .get(cursor_argument.as_str())
            .filter(|cursor| !cursor.is_null());

        let (bucket, default_complete) = match cached {
            CacheValue::List(list) => (list, true),
            CacheValue::Record(buckets) => {
                let partial = if from_front { FRONT_BUCKET } else { BACK_BUCKET };
                match (
                    buckets.get(FULL_BUCKET).and_then(CacheValue::as_list),
                    buckets.get(partial).and_then(CacheValue::as_list),
                ) {
                    (Some(full), _) => (full, true),
                    (None, Some(partial)) => (partial, false),
                    (None, None) => return Cow::Borrowed(cached),
                }
            }
            _ => return Cow::Borrowed(cached),
        };
        // a bucket is complete on the side it is read from when it reaches the end of the feed
        let complete = if from_front {
            bucket.page_info.eof
        } else {
            bucket.page_info.bof
        }
        .unwrap_or(default_complete);

        let items = &bucket.items;
        let cursor_position = match cursor {
            Some(cursor) => match self.position(items, cursor, state) {
                Some(position) => Some(position),
                None => {
                    tracing::trace!("cursor {cursor:?} is not cached");
                    return Cow::Borrowed(cached);
                }
            },
            None => None,
        };

        let (start, end) = if from_front {
            let start = cursor_position.map(|position| position + 1).unwrap_or(0);
            let wanted = start.saturating_add(count);
            if wanted > items.len() && !complete {
                tracing::trace!("only {} items cached, {wanted} wanted", items.len());
                return Cow::Borrowed(cached);
            }
            (start, wanted.min(items.len()))
        } else {
            let end = cursor_position.unwrap_or(items.len());
            if count > end && !complete {
                tracing::trace!("only {end} items cached before the cursor, {count} wanted");
                return Cow::Borrowed(cached);
            }
            (end.saturating_sub(count), end)
        };

        let page_info = if from_front {
            PageInfo {
                bof: Some(start == 0),
                eof: Some(complete && end == items.len()),
                count: Some(end - start),
            }
        } else {
            PageInfo {
                bof: Some(complete && start == 0),
                eof: Some(end == items.len()),
                count: Some(end - start),
            }
        };
        Cow::Owned(CacheValue::List(
            CachedList::new(items[start..end].to_vec()).with_page_info(page_info),
        ))
    }

    fn position(&self, items: &[CacheValue], cursor: &Value, state: &CacheState) -> Option<usize> {
        items
            .iter()
            .position(|item| self.cursor_of(item, state) == Some(cursor))
    }

    fn cursor_of<'s>(&self, item: &'s CacheValue, state: &'s CacheState) -> Option<&'s Value> {
        let record = match item {
            CacheValue::Reference(reference) => state.entity(reference)?,
            CacheValue::Record(record) => record,
            _ => return None,
        };
        match record.get(self.pagination.cursor_field.as_str())? {
            CacheValue::Scalar(cursor) => Some(cursor),
            _ => None,
        }
    }
}

impl FieldStateResolver for ArgumentsResolver {
    fn resolve<'v>(
        &self,
        cached: &'v CacheValue,
        field: &Field,
        arguments: &Object,
        state: &'v CacheState,
    ) -> Option<Cow<'v, CacheValue>> {
        let mut paging = Object::new();
        let mut regular = Object::new();
        for (name, value) in arguments.iter() {
            if self.pagination.is_pagination_argument(name.as_str()) {
                paging.insert(name.clone(), value.clone());
            } else {
                regular.insert(name.clone(), value.clone());
            }
        }

        let mut selected = cached;
        if !regular.is_empty() {
            let key = Self::arguments_key(&regular);
            selected = match cached {
                CacheValue::Record(by_arguments) => by_arguments.get(key.as_str())?,
                _ => {
                    tracing::trace!(
                        field = field.name.as_str(),
                        "cached value is not keyed by arguments"
                    );
                    return None;
                }
            };
        }
        if paging.is_empty() {
            return Some(Cow::Borrowed(selected));
        }
        Some(self.page(selected, &paging, state))
    }
}

fn count_argument(arguments: &Object, name: &str) -> Option<usize> {
    arguments
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|count| usize::try_from(count).ok())
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<_> = object.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonical(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json_bytes::json;

    use super::*;
    use crate::cache::Reference;
    use crate::spec::Query;

    fn feed_state() -> CacheState {
        let mut state = CacheState::default();
        for id in 1..=5 {
            let post = CacheValue::try_from(json!({"id": id.to_string(), "cursor": format!("c{id}")}))
                .unwrap();
            state.insert_entity(
                Reference::new("Post", id.to_string()),
                post.as_record().unwrap().clone(),
            );
        }
        state
    }

    fn refs(ids: &[u32]) -> Vec<Value> {
        ids.iter()
            .map(|id| json!({"__ref": format!("Post:{id}")}))
            .collect()
    }

    fn resolve(cached: Value, arguments: Value) -> CacheValue {
        let query = Query::parse("{ posts }", None).unwrap();
        let field = query.operation().find_field("posts").unwrap();
        let cached = CacheValue::try_from(cached).unwrap();
        let state = feed_state();
        ArgumentsResolver::default()
            .resolve(&cached, field, arguments.as_object().unwrap(), &state)
            .map(Cow::into_owned)
            .unwrap_or(CacheValue::Null)
    }

    fn page_ids(value: &CacheValue) -> Option<(Vec<String>, PageInfo)> {
        let list = value.as_list()?;
        Some((
            list.items
                .iter()
                .map(|item| item.as_reference().map(|r| r.id.clone()).unwrap_or_default())
                .collect(),
            list.page_info,
        ))
    }

    #[test]
    fn arguments_key_is_canonical() {
        let a = json!({"b": 1, "a": {"y": true, "x": [2, 1]}});
        let b = json!({"a": {"x": [2, 1], "y": true}, "b": 1});
        let key = ArgumentsResolver::arguments_key(a.as_object().unwrap());
        assert_eq!(key, ArgumentsResolver::arguments_key(b.as_object().unwrap()));
        assert_eq!(key, r#"{"a":{"x":[2,1],"y":true},"b":1}"#);
    }

    #[test]
    fn regular_arguments_select_sub_value() {
        let cached = json!({
            r#"{"id":"1"}"#: {"__ref": "Person:1"},
            r#"{"id":"2"}"#: {"__ref": "Person:2"}
        });
        assert_eq!(
            resolve(cached.clone(), json!({"id": "2"})),
            CacheValue::Reference(Reference::new("Person", "2"))
        );
        assert_eq!(resolve(cached, json!({"id": "3"})), CacheValue::Null);
        assert_eq!(
            resolve(json!({"__ref": "Person:1"}), json!({})),
            CacheValue::Reference(Reference::new("Person", "1"))
        );
    }

    #[rstest]
    #[case::first_of_full(json!({"full": refs(&[1, 2, 3, 4, 5])}), json!({"first": 2}), vec!["1", "2"], true, false)]
    #[case::after_cursor(json!({"full": refs(&[1, 2, 3, 4, 5])}), json!({"first": 2, "after": "c2"}), vec!["3", "4"], false, false)]
    #[case::reaches_end(json!({"full": refs(&[1, 2, 3, 4, 5])}), json!({"first": 10, "after": "c3"}), vec!["4", "5"], false, true)]
    #[case::last_of_full(json!({"full": refs(&[1, 2, 3, 4, 5])}), json!({"last": 2}), vec!["4", "5"], false, true)]
    #[case::before_cursor(json!({"full": refs(&[1, 2, 3, 4, 5])}), json!({"last": 2, "before": "c3"}), vec!["1", "2"], true, false)]
    #[case::front_bucket(json!({"front": refs(&[1, 2, 3])}), json!({"first": 3}), vec!["1", "2", "3"], true, false)]
    #[case::back_bucket(json!({"back": refs(&[4, 5])}), json!({"last": 1}), vec!["5"], false, true)]
    #[case::plain_list(json!(refs(&[1, 2])), json!({"first": 5}), vec!["1", "2"], true, true)]
    fn serve_page(
        #[case] cached: Value,
        #[case] arguments: Value,
        #[case] ids: Vec<&str>,
        #[case] bof: bool,
        #[case] eof: bool,
    ) {
        let (page, page_info) = page_ids(&resolve(cached, arguments)).expect("a page");
        assert_eq!(page, ids);
        assert_eq!(page_info.bof, Some(bof));
        assert_eq!(page_info.eof, Some(eof));
        assert_eq!(page_info.count, Some(ids.len()));
    }

    #[rstest]
    #[case::front_too_short(json!({"front": refs(&[1, 2])}), json!({"first": 3}))]
    #[case::wrong_bucket(json!({"front": refs(&[1, 2])}), json!({"last": 1}))]
    #[case::unknown_cursor(json!({"full": refs(&[1, 2])}), json!({"first": 1, "after": "c9"}))]
    fn unserved_page_is_not_a_list(#[case] cached: Value, #[case] arguments: Value) {
        let resolved = resolve(cached, arguments);
        assert!(resolved.as_record().is_some(), "{resolved:?}");
    }
}
