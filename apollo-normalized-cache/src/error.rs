//! Cache errors.
use std::sync::Arc;

use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::cache::Reference;
use crate::json_ext::Path;
use crate::spec::OperationKind;

pub use crate::configuration::ConfigurationError;

/// Boxed error returned by user supplied callbacks such as scalar coercions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Maps an error to the code exposed in GraphQL error extensions.
pub trait ErrorExtension
where
    Self: Sized,
{
    fn extension_code(&self) -> String;
}

/// Error types for denormalization.
///
/// Structural faults abort the whole call. Data availability gaps are not errors: they are
/// reported through [`crate::FetchFlags`].
#[derive(Error, Display, Debug, Clone)]
#[non_exhaustive]
pub enum DenormalizeError {
    /// cannot query field '{field}' on type '{type_name}'
    InvalidField {
        /// The field that was selected.
        field: String,
        /// The type it was selected on.
        type_name: String,
    },

    /// unknown type '{0}'
    UnknownType(String),

    /// cached value at '{path}' does not match type '{type_name}'
    UnexpectedValue {
        /// The type the schema expects.
        type_name: String,
        /// Where the value was found.
        path: Path,
    },

    /// reference '{reference}' at '{path}' points to an entity missing from the store
    DanglingReference {
        /// The unresolvable reference.
        reference: Reference,
        /// Where the reference was found.
        path: Path,
    },

    /// could not coerce scalar '{type_name}' at '{path}': {source}
    Coercion {
        /// The scalar type the coercion is registered for.
        type_name: String,
        /// Where the value was found.
        path: Path,
        /// The error returned by the coercion function.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// the schema does not define a root type for {0} operations
    MissingRootType(OperationKind),
}

impl DenormalizeError {
    /// Schema mismatches are precondition violations. Everything else may be recovered by
    /// falling back to the network.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            DenormalizeError::InvalidField { .. }
                | DenormalizeError::UnknownType(_)
                | DenormalizeError::UnexpectedValue { .. }
                | DenormalizeError::MissingRootType(_)
        )
    }
}

impl ErrorExtension for DenormalizeError {
    fn extension_code(&self) -> String {
        match self {
            DenormalizeError::InvalidField { .. } => "INVALID_FIELD",
            DenormalizeError::UnknownType(_) => "UNKNOWN_TYPE",
            DenormalizeError::UnexpectedValue { .. } => "UNEXPECTED_CACHE_VALUE",
            DenormalizeError::DanglingReference { .. } => "DANGLING_REFERENCE",
            DenormalizeError::Coercion { .. } => "SCALAR_COERCION_FAILED",
            DenormalizeError::MissingRootType(_) => "MISSING_ROOT_TYPE",
        }
        .to_string()
    }
}

/// GraphQL parsing errors.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SpecError {
    /// selection processing recursion limit exceeded
    RecursionLimitExceeded,
    /// parsing error: {0}
    ParsingError(String),
    /// unknown operation named "{0}"
    UnknownOperation(String),
    /// the document does not contain any operation
    NoOperation,
    /// several operations are defined, an operation name is required
    AmbiguousOperation,
    /// unknown fragment "{0}"
    UnknownFragment(String),
    /// fragment "{0}" spreads itself
    FragmentCycle(String),
}

impl ErrorExtension for SpecError {
    fn extension_code(&self) -> String {
        match self {
            SpecError::RecursionLimitExceeded => "RECURSION_LIMIT_EXCEEDED",
            SpecError::ParsingError(_) => "PARSING_ERROR",
            SpecError::UnknownOperation(_)
            | SpecError::NoOperation
            | SpecError::AmbiguousOperation => "GRAPHQL_UNKNOWN_OPERATION_NAME",
            SpecError::UnknownFragment(_) | SpecError::FragmentCycle(_) => {
                "GRAPHQL_VALIDATION_FAILED"
            }
        }
        .to_string()
    }
}

/// Errors related to the schema.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    /// GraphQL parser error: {0}
    Parse(String),
    /// invalid introspection result: {0}
    Introspection(String),
}

/// Errors raised while decoding a cache snapshot.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    /// malformed reference '{0}', expected 'Type:id'
    MalformedReference(String),
    /// invalid cache state: {0}
    InvalidState(String),
}

impl ErrorExtension for CacheError {
    fn extension_code(&self) -> String {
        match self {
            CacheError::MalformedReference(_) => "MALFORMED_REFERENCE",
            CacheError::InvalidState(_) => "INVALID_CACHE_STATE",
        }
        .to_string()
    }
}
