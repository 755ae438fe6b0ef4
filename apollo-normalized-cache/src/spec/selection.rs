use std::collections::HashMap;

use apollo_compiler::ast;
use apollo_compiler::Node;
use serde_json_bytes::ByteString;

use crate::error::SpecError;
use crate::json_ext::Object;
use crate::json_ext::Value;

const SKIP_DIRECTIVE_NAME: &str = "skip";
const INCLUDE_DIRECTIVE_NAME: &str = "include";

/// Identifies a selection node inside its [`crate::Query`].
///
/// Ids are dense and assigned in document order, the operation itself being `0`. The
/// send-to-server flags are keyed by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelectionId(pub(crate) usize);

impl SelectionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

impl Selection {
    pub fn id(&self) -> SelectionId {
        match self {
            Selection::Field(field) => field.id,
            Selection::InlineFragment(fragment) => fragment.id,
        }
    }

    /// The nested selection set, if any.
    pub fn selection_set(&self) -> Option<&[Selection]> {
        match self {
            Selection::Field(field) => field.selection_set.as_deref(),
            Selection::InlineFragment(fragment) => Some(&fragment.selection_set),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: SelectionId,
    pub name: ByteString,
    pub alias: Option<ByteString>,
    pub arguments: Vec<(String, ArgumentValue)>,
    /// Names of the directives applied to the field, `@skip` and `@include` excluded.
    pub directives: Vec<String>,
    /// `None` for leaf fields.
    pub selection_set: Option<Vec<Selection>>,
}

impl Field {
    /// The key under which the field appears in the response.
    pub fn response_key(&self) -> &ByteString {
        self.alias.as_ref().unwrap_or(&self.name)
    }

    pub fn has_directive(&self, name: &str) -> bool {
        self.directives.iter().any(|directive| directive == name)
    }

    /// Resolves the argument values against the operation variables.
    ///
    /// Arguments bound to an unset variable are omitted, as if they were not provided.
    pub fn resolve_arguments(&self, variables: &Object) -> Object {
        self.arguments
            .iter()
            .filter_map(|(name, value)| {
                if let ArgumentValue::Variable(variable) = value {
                    if !variables.contains_key(variable.as_str()) {
                        return None;
                    }
                }
                Some((ByteString::from(name.as_str()), value.resolve(variables)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub id: SelectionId,
    /// Fragments without a type condition apply to every type.
    pub type_condition: Option<String>,
    pub selection_set: Vec<Selection>,
}

/// An argument value as written in the query.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Variable(String),
    Value(Value),
    List(Vec<ArgumentValue>),
    Object(Vec<(String, ArgumentValue)>),
}

impl ArgumentValue {
    /// Substitutes variables. Unset variables resolve to `null`.
    pub fn resolve(&self, variables: &Object) -> Value {
        match self {
            ArgumentValue::Variable(name) => {
                variables.get(name.as_str()).cloned().unwrap_or_default()
            }
            ArgumentValue::Value(value) => value.clone(),
            ArgumentValue::List(items) => {
                Value::Array(items.iter().map(|item| item.resolve(variables)).collect())
            }
            ArgumentValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (ByteString::from(name.as_str()), value.resolve(variables)))
                    .collect(),
            ),
        }
    }
}

impl From<&ast::Value> for ArgumentValue {
    fn from(value: &ast::Value) -> Self {
        match value {
            ast::Value::Null => ArgumentValue::Value(Value::Null),
            ast::Value::Variable(name) => ArgumentValue::Variable(name.to_string()),
            ast::Value::Enum(name) => ArgumentValue::Value(Value::String(name.as_str().into())),
            ast::Value::String(s) => ArgumentValue::Value(Value::String(s.as_str().into())),
            ast::Value::Boolean(b) => ArgumentValue::Value(Value::Bool(*b)),
            ast::Value::Int(i) => ArgumentValue::Value(
                i.as_str()
                    .parse::<i64>()
                    .map(Value::from)
                    .or_else(|_| i.as_str().parse::<f64>().map(Value::from))
                    .unwrap_or_default(),
            ),
            ast::Value::Float(f) => ArgumentValue::Value(
                f.as_str()
                    .parse::<f64>()
                    .map(Value::from)
                    .unwrap_or_default(),
            ),
            ast::Value::List(items) => {
                ArgumentValue::List(items.iter().map(|item| (&**item).into()).collect())
            }
            ast::Value::Object(fields) => ArgumentValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), (&**value).into()))
                    .collect(),
            ),
        }
    }
}

/// Builds the selection tree out of the parsed document, inlining named fragments and
/// numbering every node.
pub(crate) struct SelectionBuilder<'a> {
    fragments: &'a HashMap<&'a str, &'a Node<ast::FragmentDefinition>>,
    /// Named fragments being expanded, outermost first.
    expanding: Vec<&'a str>,
    next_id: usize,
}

impl<'a> SelectionBuilder<'a> {
    // The RECURSION_LIMIT is chosen to be:
    //   < # expected to cause stack overflow &&
    //   > # expected in a legitimate query
    const RECURSION_LIMIT: usize = 128;

    pub(crate) fn new(fragments: &'a HashMap<&'a str, &'a Node<ast::FragmentDefinition>>) -> Self {
        Self {
            fragments,
            expanding: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn next_id(&mut self) -> SelectionId {
        let id = SelectionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Number of ids handed out so far.
    pub(crate) fn count(&self) -> usize {
        self.next_id
    }

    pub(crate) fn selection_set(
        &mut self,
        selections: &[ast::Selection],
        depth: usize,
    ) -> Result<Vec<Selection>, SpecError> {
        if depth > Self::RECURSION_LIMIT {
            tracing::error!(
                "selection processing recursion limit({}) exceeded",
                Self::RECURSION_LIMIT
            );
            return Err(SpecError::RecursionLimitExceeded);
        }
        let mut result = Vec::with_capacity(selections.len());
        for selection in selections {
            if let Some(selection) = self.selection(selection, depth)? {
                result.push(selection);
            }
        }
        Ok(result)
    }

    fn selection(
        &mut self,
        selection: &ast::Selection,
        depth: usize,
    ) -> Result<Option<Selection>, SpecError> {
        Ok(match selection {
            // Spec: https://spec.graphql.org/draft/#Field
            ast::Selection::Field(field) => {
                if statically_skipped(&field.directives) {
                    return Ok(None);
                }
                let id = self.next_id();
                let selection_set = if field.selection_set.is_empty() {
                    None
                } else {
                    Some(self.selection_set(&field.selection_set, depth + 1)?)
                };
                Some(Selection::Field(Field {
                    id,
                    name: field.name.as_str().into(),
                    alias: field.alias.as_ref().map(|alias| alias.as_str().into()),
                    arguments: field
                        .arguments
                        .iter()
                        .map(|argument| (argument.name.to_string(), (&*argument.value).into()))
                        .collect(),
                    directives: field
                        .directives
                        .iter()
                        .map(|directive| directive.name.to_string())
                        .filter(|name| name != SKIP_DIRECTIVE_NAME && name != INCLUDE_DIRECTIVE_NAME)
                        .collect(),
                    selection_set,
                }))
            }
            // Spec: https://spec.graphql.org/draft/#InlineFragment
            ast::Selection::InlineFragment(inline_fragment) => {
                if statically_skipped(&inline_fragment.directives) {
                    return Ok(None);
                }
                let id = self.next_id();
                Some(Selection::InlineFragment(InlineFragment {
                    id,
                    type_condition: inline_fragment
                        .type_condition
                        .as_ref()
                        .map(|name| name.to_string()),
                    selection_set: self.selection_set(&inline_fragment.selection_set, depth + 1)?,
                }))
            }
            // Spec: https://spec.graphql.org/draft/#FragmentSpread
            ast::Selection::FragmentSpread(fragment_spread) => {
                if statically_skipped(&fragment_spread.directives) {
                    return Ok(None);
                }
                let name = fragment_spread.fragment_name.as_str();
                let fragments = self.fragments;
                let fragment = *fragments
                    .get(name)
                    .ok_or_else(|| SpecError::UnknownFragment(name.to_string()))?;
                if statically_skipped(&fragment.directives) {
                    return Ok(None);
                }
                let name = fragment.name.as_str();
                if self.expanding.contains(&name) {
                    return Err(SpecError::FragmentCycle(name.to_string()));
                }
                let id = self.next_id();
                self.expanding.push(name);
                let selection_set = self.selection_set(&fragment.selection_set, depth + 1);
                self.expanding.pop();
                Some(Selection::InlineFragment(InlineFragment {
                    id,
                    type_condition: Some(fragment.type_condition.to_string()),
                    selection_set: selection_set?,
                }))
            }
        })
    }
}

/// `@skip(if: true)` and `@include(if: false)` with constant conditions remove the selection.
/// Conditions bound to variables keep it.
fn statically_skipped(directives: &ast::DirectiveList) -> bool {
    directives.iter().any(|directive| {
        let condition = directive
            .specified_argument_by_name("if")
            .map(|value| &**value);
        match (directive.name.as_str(), condition) {
            (SKIP_DIRECTIVE_NAME, Some(ast::Value::Boolean(true))) => true,
            (INCLUDE_DIRECTIVE_NAME, Some(ast::Value::Boolean(false))) => true,
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn argument_resolution() {
        let arguments = vec![
            ("id".to_string(), ArgumentValue::Variable("personId".to_string())),
            ("missing".to_string(), ArgumentValue::Variable("unset".to_string())),
            (
                "filter".to_string(),
                ArgumentValue::Object(vec![
                    (
                        "tags".to_string(),
                        ArgumentValue::List(vec![
                            ArgumentValue::Value(json!("a")),
                            ArgumentValue::Variable("tag".to_string()),
                        ]),
                    ),
                    ("limit".to_string(), ArgumentValue::Value(json!(3))),
                ]),
            ),
        ];
        let field = Field {
            id: SelectionId(1),
            name: "person".into(),
            alias: Some("me".into()),
            arguments,
            directives: vec!["live".to_string()],
            selection_set: None,
        };
        let variables = json!({"personId": "1", "tag": "b"});
        let resolved = field.resolve_arguments(variables.as_object().unwrap());

        assert_eq!(
            Value::Object(resolved),
            json!({"id": "1", "filter": {"tags": ["a", "b"], "limit": 3}})
        );
        assert_eq!(field.response_key().as_str(), "me");
        assert!(field.has_directive("live"));
        assert!(!field.has_directive("skip"));
    }
}
