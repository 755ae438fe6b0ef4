//! Query processing.
//!
//! Parsing of an executable document into the selection tree walked by the denormalizer.

use std::collections::HashMap;
use std::fmt;

use apollo_compiler::ast;
use derivative::Derivative;
use serde::Deserialize;
use serde::Serialize;

use crate::error::SpecError;
use crate::json_ext::Object;
use crate::spec::selection::SelectionBuilder;
use crate::spec::ArgumentValue;
use crate::spec::Field;
use crate::spec::Selection;
use crate::spec::SelectionId;

pub const TYPENAME: &str = "__typename";

/// A parsed GraphQL operation, ready to be denormalized.
#[derive(Debug, Derivative)]
#[derivative(PartialEq, Hash, Eq)]
pub struct Query {
    string: String,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    operation: Operation,
    #[derivative(PartialEq = "ignore", Hash = "ignore")]
    selection_count: usize,
}

impl Query {
    /// Parses `query` and selects the operation to run.
    ///
    /// `operation_name` may be omitted when the document holds a single operation.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn parse(query: impl Into<String>, operation_name: Option<&str>) -> Result<Self, SpecError> {
        let string = query.into();
        let document = ast::Document::parse(string.as_str(), "query.graphql")
            .map_err(|invalid| SpecError::ParsingError(invalid.errors.to_string()))?;

        let fragments: HashMap<&str, &apollo_compiler::Node<ast::FragmentDefinition>> = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::FragmentDefinition(fragment) => {
                    Some((fragment.name.as_str(), fragment))
                }
                _ => None,
            })
            .collect();

        let mut operations = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            });
        let definition = match operation_name {
            Some(name) => operations
                .find(|operation| operation.name.as_ref().map(|n| n.as_str()) == Some(name))
                .ok_or_else(|| SpecError::UnknownOperation(name.to_string()))?,
            None => {
                let first = operations.next().ok_or(SpecError::NoOperation)?;
                if operations.next().is_some() {
                    return Err(SpecError::AmbiguousOperation);
                }
                first
            }
        };

        let mut builder = SelectionBuilder::new(&fragments);
        let id = builder.next_id();
        let selection_set = builder.selection_set(&definition.selection_set, 0)?;
        let empty = Object::default();
        let variables = definition
            .variables
            .iter()
            .filter_map(|variable| {
                let default = variable.default_value.as_ref()?;
                Some((
                    variable.name.as_str().into(),
                    ArgumentValue::from(&**default).resolve(&empty),
                ))
            })
            .collect();

        let operation = Operation {
            id,
            name: definition.name.as_ref().map(|name| name.to_string()),
            kind: definition.operation_type.into(),
            selection_set,
            variables,
        };

        Ok(Query {
            selection_count: builder.count(),
            string,
            operation,
        })
    }

    /// Returns a reference to the underlying query string.
    pub fn as_str(&self) -> &str {
        self.string.as_str()
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Number of selection nodes in the operation, the operation itself included.
    pub fn selection_count(&self) -> usize {
        self.selection_count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: SelectionId,
    pub name: Option<String>,
    pub kind: OperationKind,
    pub selection_set: Vec<Selection>,
    /// Default values declared for the operation variables.
    pub variables: Object,
}

impl Operation {
    /// Merges the request variables over the declared defaults.
    pub fn variables_with_defaults(&self, variables: &Object) -> Object {
        if self.variables.is_empty() {
            return variables.clone();
        }
        let mut all_variables = self.variables.clone();
        for (name, value) in variables.iter() {
            all_variables.insert(name.clone(), value.clone());
        }
        all_variables
    }

    /// Finds a field by its `/` separated response keys, looking through inline fragments.
    pub fn find_field(&self, path: &str) -> Option<&Field> {
        let mut keys = path.split('/').filter(|key| !key.is_empty());
        let mut field = find_in(&self.selection_set, keys.next()?)?;
        for key in keys {
            field = find_in(field.selection_set.as_deref()?, key)?;
        }
        Some(field)
    }
}

fn find_in<'q>(selections: &'q [Selection], key: &str) -> Option<&'q Field> {
    selections.iter().find_map(|selection| match selection {
        Selection::Field(field) if field.response_key().as_str() == key => Some(field),
        Selection::Field(_) => None,
        Selection::InlineFragment(fragment) => find_in(&fragment.selection_set, key),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub(crate) const fn default_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => write!(f, "query"),
            OperationKind::Mutation => write!(f, "mutation"),
            OperationKind::Subscription => write!(f, "subscription"),
        }
    }
}

impl From<ast::OperationType> for OperationKind {
    // Spec: https://spec.graphql.org/draft/#OperationType
    fn from(operation_type: ast::OperationType) -> Self {
        match operation_type {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}
