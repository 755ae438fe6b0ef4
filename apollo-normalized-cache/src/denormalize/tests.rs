use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;

use super::*;
use crate::cache::CacheStore;
use crate::cache::CachedList;
use crate::cache::PageInfo;
use crate::cache::Reference;
use crate::configuration::DanglingReferences;
use crate::json_ext::Path;
use crate::spec::Operation;

const SCHEMA: &str = r#"
    type Query {
        person(id: ID!): Person
        people: [Person!]!
        pet(id: ID!): Pet
        feed(first: Int, after: String, last: Int, before: String): [Post!]!
        messages(channel: ID): [Message]
        now: Date
        version: String
    }
    interface Node { id: ID! }
    type Person implements Node {
        id: ID!
        name: String
        birthday: Date
        friends: [Person!]!
        best: Person
        address: Address
    }
    type Address { city: String }
    type Dog implements Node { id: ID! name: String barks: Boolean }
    type Cat implements Node { id: ID! name: String meows: Boolean }
    union Pet = Dog | Cat
    type Post { id: ID! cursor: String title: String }
    type Message { id: ID! text: String }
    scalar Date
"#;

fn state() -> CacheState {
    CacheState::from_json(json!({
        "entities": {
            "Person": {
                "1": {
                    "id": "1",
                    "name": "Ada",
                    "birthday": "1815-12-10",
                    "friends": [{"__ref": "Person:2"}],
                    "best": {"__ref": "Person:2"},
                    "address": {"city": "London"}
                },
                "2": {
                    "id": "2",
                    "name": "Charles",
                    "friends": {"__items": [{"__ref": "Person:1"}], "BOF": true, "EOF": false, "count": 1}
                },
                "3": {},
                "4": {"id": "4", "name": null, "best": null}
            },
            "Dog": {"7": {"id": "7", "name": "Rex", "barks": true}},
            "Post": {
                "1": {"id": "1", "cursor": "p1", "title": "first"},
                "2": {"id": "2", "cursor": "p2", "title": "second"}
            },
            "Message": {"1": {"id": "1", "text": "hi"}}
        },
        "result": {
            "person": {
                "{\"id\":\"1\"}": {"__ref": "Person:1"},
                "{\"id\":\"2\"}": {"__ref": "Person:2"},
                "{\"id\":\"3\"}": {"__ref": "Person:3"},
                "{\"id\":\"4\"}": {"__ref": "Person:4"},
                "{\"id\":\"9\"}": {"__ref": "Person:9"}
            },
            "people": {"__items": [{"__ref": "Person:1"}, {"__ref": "Person:2"}], "BOF": true, "EOF": false, "count": 2},
            "pet": {
                "{\"id\":\"7\"}": {"__ref": "Dog:7"},
                "{\"id\":\"8\"}": {"id": "8", "name": "inline"}
            },
            "feed": {"front": [{"__ref": "Post:1"}, {"__ref": "Post:2"}]},
            "messages": {"general": [{"__ref": "Message:1"}]},
            "version": "1.0"
        }
    }))
    .unwrap()
}

fn execution_context(query: &str) -> ExecutionContext {
    context_with_source(query, state().into_source())
}

fn context_with_source(query: &str, source: Arc<dyn StateSource>) -> ExecutionContext {
    let schema = Arc::new(Schema::parse(SCHEMA).unwrap());
    let query = Arc::new(Query::parse(query, None).unwrap());
    ExecutionContext::new(schema, query, source)
}

fn run(query: &str) -> (Denormalized, ExecutionContext) {
    let mut context = execution_context(query);
    let result = denormalize(&mut context).unwrap();
    (result, context)
}

/// Response paths of the flagged fields, in document order.
fn flagged(operation: &Operation, flags: &FetchFlags) -> Vec<String> {
    fn walk(selections: &[Selection], prefix: &str, flags: &FetchFlags, out: &mut Vec<String>) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    let path = if prefix.is_empty() {
                        field.response_key().as_str().to_string()
                    } else {
                        format!("{prefix}/{}", field.response_key().as_str())
                    };
                    if flags.needs_fetch(field.id) {
                        out.push(path.clone());
                    }
                    if let Some(children) = &field.selection_set {
                        walk(children, &path, flags, out);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    walk(&fragment.selection_set, prefix, flags, out)
                }
            }
        }
    }
    let mut out = Vec::new();
    walk(&operation.selection_set, "", flags, &mut out);
    out
}

#[test]
fn response_has_the_shape_of_the_query() {
    let (result, context) = run(r#"{
        me: person(id: "1") {
            id
            name
            best { name }
            address { city }
            __typename
        }
        version
        __typename
    }"#);

    assert_eq!(
        result.data.to_json(),
        json!({
            "me": {
                "id": "1",
                "name": "Ada",
                "best": {"name": "Charles"},
                "address": {"city": "London"},
                "__typename": "Person"
            },
            "version": "1.0",
            "__typename": "Query"
        })
    );
    assert!(!result.needs_fetch());
    assert!(flagged(context.query().operation(), &result.flags).is_empty());
}

#[test]
fn denormalization_is_idempotent() {
    let mut context = execution_context(
        r#"{ person(id: "3") { id name } people { name friends { name } } feed(first: 5) { title } }"#,
    );
    let first = denormalize(&mut context).unwrap();
    let second = denormalize(&mut context).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first.data).unwrap(),
        serde_json::to_string(&second.data).unwrap()
    );
}

#[test]
fn missing_scalars_are_flagged() {
    let (result, context) = run(r#"{ person(id: "3") { id name } version }"#);

    assert_eq!(
        result.data.to_json(),
        json!({"person": {"id": null, "name": null}, "version": "1.0"})
    );
    assert_eq!(
        flagged(context.query().operation(), &result.flags),
        vec!["person", "person/id", "person/name"]
    );
    assert!(result.needs_fetch());
}

#[test]
fn missing_objects_are_scaffolded() {
    let (result, context) =
        run(r#"{ person(id: "3") { address { city } friends { name } best { id } } now }"#);

    assert_eq!(
        result.data.to_json(),
        json!({
            "person": {"address": {"city": null}, "friends": [], "best": {"id": null}},
            "now": null
        })
    );
    assert_eq!(
        flagged(context.query().operation(), &result.flags),
        vec![
            "person",
            "person/address",
            "person/address/city",
            "person/friends",
            "person/friends/name",
            "person/best",
            "person/best/id",
            "now"
        ]
    );
}

#[test]
fn cached_null_is_data() {
    let (result, _) = run(r#"{ person(id: "4") { id name best { name } } }"#);
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"id": "4", "name": null, "best": null}})
    );
    assert!(!result.needs_fetch());
}

#[test]
fn cached_null_list_is_fetched() {
    let mut state = state();
    let person = state
        .entities
        .get_mut("Person")
        .and_then(|people| people.get_mut("4"))
        .unwrap();
    person.insert("friends".into(), CacheValue::Null);

    let mut context = context_with_source(
        r#"{ person(id: "4") { id friends { name } best { name } } }"#,
        state.into_source(),
    );
    let result = denormalize(&mut context).unwrap();
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"id": "4", "friends": [], "best": null}})
    );
    let operation = context.query().operation();
    assert_eq!(
        flagged(operation, &result.flags),
        vec!["person", "person/friends", "person/friends/name"]
    );
}

#[test]
fn selections_sharing_a_key_are_merged() {
    let (result, _) = run(
        r#"{ person(id: "1") { best { name } ... on Person { best { id } } } person(id: "1") { id } }"#,
    );
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"best": {"name": "Charles", "id": "2"}, "id": "1"}})
    );
    assert!(!result.needs_fetch());
}

#[test]
fn pagination_metadata_is_preserved() {
    let (result, _) = run("{ people { name } }");

    let people = result.data.get("people").and_then(ResponseValue::as_list).unwrap();
    assert_eq!(
        people.page_info,
        PageInfo {
            bof: Some(true),
            eof: Some(false),
            count: Some(2)
        }
    );
    assert_eq!(people.items.len(), 2);
    assert_eq!(
        result.data.to_json(),
        json!({"people": [{"name": "Ada"}, {"name": "Charles"}]})
    );

    let (result, _) = run(r#"{ person(id: "2") { friends { name } } }"#);
    let friends = result
        .data
        .get("person")
        .and_then(|person| person.get("friends"))
        .and_then(ResponseValue::as_list)
        .unwrap();
    assert_eq!(friends.page_info.count, Some(1));
    assert_eq!(friends.page_info.bof, Some(true));
    assert_eq!(friends.items.len(), 1);
}

#[test]
fn union_members_only_get_their_fragments() {
    let (result, context) = run(r#"{
        pet(id: "7") {
            __typename
            ... on Cat { meows }
            ... on Dog { barks }
            ... on Node { id }
            ... { name }
        }
    }"#);

    assert_eq!(
        result.data.to_json(),
        json!({"pet": {"__typename": "Dog", "barks": true, "id": "7", "name": "Rex"}})
    );
    assert!(result.data.get("pet").unwrap().get("meows").is_none());
    assert!(flagged(context.query().operation(), &result.flags).is_empty());
}

#[test]
fn unresolved_pages_are_fetched() {
    let (result, context) = run("{ feed(first: 5) { id title } version }");

    assert_eq!(result.data.to_json(), json!({"feed": [], "version": "1.0"}));
    assert_eq!(
        flagged(context.query().operation(), &result.flags),
        vec!["feed", "feed/id", "feed/title"]
    );
    assert!(result.needs_fetch());

    let (result, _) = run("{ feed(first: 2) { title } }");
    assert_eq!(
        result.data.to_json(),
        json!({"feed": [{"title": "first"}, {"title": "second"}]})
    );
    let feed = result.data.get("feed").and_then(ResponseValue::as_list).unwrap();
    assert_eq!(feed.page_info.bof, Some(true));
    assert_eq!(feed.page_info.eof, Some(false));
    assert!(!result.needs_fetch());
}

#[test]
fn live_fields_register_one_dependency_per_channel() {
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let mut context = execution_context("query Inbox($id: ID) { messages(channel: $id) @live { id text } }")
        .with_variables(json!({"id": "general"}).as_object().unwrap().clone())
        .with_subscriber(move |_: &SubscriptionRequest<'_>| -> Option<CacheValue> {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });

    let first = denormalize(&mut context).unwrap();
    let second = denormalize(&mut context).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.data.to_json(),
        json!({"messages": [{"id": "1", "text": "hi"}]})
    );
    assert_eq!(started.load(Ordering::SeqCst), 1);

    let deps = context.subscription_deps();
    assert_eq!(deps.len(), 1);
    let readers = deps.get("messages::general").unwrap();
    assert_eq!(readers.len(), 1);
    assert!(readers.contains("Inbox"));
}

#[test]
fn live_fields_fall_back_to_the_initial_value() {
    let live = LiveConfig::new().with_field(
        "messages",
        LiveField::new()
            .with_resolver(|_: Option<&Value>, variables: &Object| {
                format!("room-{}", variables.get("room").and_then(Value::as_str).unwrap_or("?"))
            })
            .with_subscriber(|request: &SubscriptionRequest<'_>| {
                assert_eq!(request.return_type.to_string(), "[Message]");
                Some(CacheValue::List(CachedList::new(vec![CacheValue::Reference(
                    Reference::new("Message", "1"),
                )])))
            }),
    );
    let mut context = execution_context("{ messages @live { text } }")
        .with_variables(json!({"room": "a"}).as_object().unwrap().clone())
        .with_query_dep("badge")
        .with_live(live);

    let result = denormalize(&mut context).unwrap();
    assert_eq!(result.data.to_json(), json!({"messages": [{"text": "hi"}]}));
    assert!(context
        .subscription_deps()
        .get("messages::room-a")
        .unwrap()
        .contains("badge"));
}

#[test]
fn live_field_without_any_value_is_fetched() {
    let (result, context) = run("{ messages @live { text } }");
    assert_eq!(result.data.to_json(), json!({"messages": []}));
    assert_eq!(
        flagged(context.query().operation(), &result.flags),
        vec!["messages", "messages/text"]
    );
    assert!(context.subscription_deps().get("messages::").is_some());
}

#[test]
fn state_is_sampled_once_per_call() {
    let store = Arc::new(CacheStore::new(state()));
    let emptied = store.clone();
    let mut context = context_with_source(
        r#"{ messages(channel: "general") @live { text } person(id: "1") { name } }"#,
        store.clone(),
    )
    .with_subscriber(move |_: &SubscriptionRequest<'_>| -> Option<CacheValue> {
        emptied.replace(CacheState::default());
        None
    });

    let result = denormalize(&mut context).unwrap();
    assert_eq!(
        result.data.to_json(),
        json!({"messages": [], "person": {"name": "Ada"}})
    );
    assert!(store.get_state().entities.is_empty());
}

#[test]
fn dangling_references() {
    let mut context = execution_context(r#"{ person(id: "9") { id name } }"#);
    let error = denormalize(&mut context).unwrap_err();
    assert!(matches!(
        &error,
        DenormalizeError::DanglingReference { reference, path }
            if reference == &Reference::new("Person", "9") && path == &Path::from("person")
    ));
    assert!(!error.is_schema_mismatch());

    let mut context = execution_context(r#"{ person(id: "9") { id name } }"#).with_configuration(
        Configuration::builder()
            .dangling_references(DanglingReferences::Fetch)
            .build(),
    );
    let result = denormalize(&mut context).unwrap();
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"id": null, "name": null}})
    );
    assert_eq!(
        flagged(context.query().operation(), &result.flags),
        vec!["person", "person/id", "person/name"]
    );
}

#[test]
fn scalars_are_coerced() {
    let coercions = ScalarCoercions::new().with("Date", |value: Value| {
        let date = value.as_str().ok_or("dates are strings")?;
        let year: i64 = date.split('-').next().unwrap_or_default().parse()?;
        Ok(json!({ "year": year }))
    });
    let mut context =
        execution_context(r#"{ person(id: "1") { birthday } }"#).with_coercions(coercions.clone());
    let result = denormalize(&mut context).unwrap();
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"birthday": {"year": 1815}}})
    );

    let failing = ScalarCoercions::new().with("String", |_| Err("no strings".into()));
    let mut context = execution_context(r#"{ person(id: "1") { birthday name } }"#).with_coercions(failing);
    match denormalize(&mut context).unwrap_err() {
        DenormalizeError::Coercion {
            type_name, path, ..
        } => {
            assert_eq!(type_name, "String");
            assert_eq!(path.to_string(), "person/name");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn schema_mismatches_abort() {
    let mut context = execution_context(r#"{ person(id: "1") { age } }"#);
    let error = denormalize(&mut context).unwrap_err();
    assert!(matches!(
        &error,
        DenormalizeError::InvalidField { field, type_name } if field == "age" && type_name == "Person"
    ));
    assert!(error.is_schema_mismatch());

    let mut context = execution_context(r#"{ pet(id: "8") { __typename } }"#);
    assert!(matches!(
        denormalize(&mut context).unwrap_err(),
        DenormalizeError::UnexpectedValue { type_name, .. } if type_name == "Pet"
    ));

    let mut context = execution_context("mutation { version }");
    assert!(matches!(
        denormalize(&mut context).unwrap_err(),
        DenormalizeError::MissingRootType(crate::spec::OperationKind::Mutation)
    ));
}

#[test]
fn variables_and_defaults_select_arguments() {
    let mut context = execution_context(r#"query ($id: ID = "1") { person(id: $id) { name } }"#);
    let result = denormalize(&mut context).unwrap();
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"name": "Ada"}})
    );

    let mut context = execution_context(r#"query ($id: ID = "1") { person(id: $id) { name } }"#)
        .with_variables(json!({"id": "2"}).as_object().unwrap().clone());
    let result = denormalize(&mut context).unwrap();
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"name": "Charles"}})
    );

    // nothing cached for these arguments
    let (result, context) = run(r#"{ person(id: "5") { name } }"#);
    assert_eq!(result.data.to_json(), json!({"person": {"name": null}}));
    assert_eq!(
        flagged(context.query().operation(), &result.flags),
        vec!["person", "person/name"]
    );
}

#[test]
fn custom_missing_data_handler() {
    struct Placeholder;

    impl MissingDataHandler for Placeholder {
        fn handle(
            &self,
            visitor: &mut Visitor<'_>,
            field: &Field,
            _ty: &crate::spec::FieldType,
        ) -> Result<ResponseValue, DenormalizeError> {
            visitor.mark_subtree(field);
            Ok(ResponseValue::Leaf(json!("loading")))
        }
    }

    let mut context = execution_context(r#"{ person(id: "3") { id name } }"#)
        .with_missing_data_handler(Arc::new(Placeholder));
    let result = denormalize(&mut context).unwrap();
    assert_eq!(
        result.data.to_json(),
        json!({"person": {"id": "loading", "name": "loading"}})
    );
    assert!(result.needs_fetch());
}

#[test]
fn flags_are_readable_per_field() {
    let (result, context) = run(r#"{ person(id: "1") { name } feed(first: 5) { title } }"#);
    let operation = context.query().operation();
    assert!(!result.field_needs_fetch(operation.find_field("person/name").unwrap()));
    assert!(result.field_needs_fetch(operation.find_field("feed/title").unwrap()));
    assert_eq!(result.flags.flagged().count(), 3);
}
