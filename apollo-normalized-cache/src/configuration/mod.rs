//! Logic for loading configuration in to an object model

use std::str::FromStr;

use displaydoc::Display;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;


/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_yaml::Error),
}

/// The configuration for the denormalizer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Name of the field holding entity ids.
    pub id_field_name: String,

    /// Name of the directive marking a field as live.
    pub live_directive: String,

    /// What to do when a reference points to an entity missing from the store.
    pub dangling_references: DanglingReferences,

    /// Argument names used for cursor pagination.
    pub pagination: Pagination,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(
        id_field_name: Option<String>,
        live_directive: Option<String>,
        dangling_references: Option<DanglingReferences>,
        pagination: Option<Pagination>,
    ) -> Self {
        Self {
            id_field_name: id_field_name.unwrap_or_else(default_id_field_name),
            live_directive: live_directive.unwrap_or_else(default_live_directive),
            dangling_references: dangling_references.unwrap_or_default(),
            pagination: pagination.unwrap_or_default(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s).map_err(ConfigurationError::DeserializeConfigError)
    }
}

fn default_id_field_name() -> String {
    "id".to_string()
}

fn default_live_directive() -> String {
    "live".to_string()
}

/// Handling of references to entities absent from the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DanglingReferences {
    /// Abort the call with a dangling reference error.
    #[default]
    Error,
    /// Treat the entity as missing and flag the branch for fetching.
    Fetch,
}

/// Names of the pagination arguments.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Pagination {
    /// Number of items to read from the front of a list.
    pub first: String,
    /// Number of items to read from the back of a list.
    pub last: String,
    /// Cursor after which `first` starts.
    pub after: String,
    /// Cursor before which `last` ends.
    pub before: String,
    /// Field of a list item holding its cursor.
    pub cursor_field: String,
}

impl Pagination {
    pub(crate) fn is_pagination_argument(&self, name: &str) -> bool {
        name == self.first || name == self.last || name == self.after || name == self.before
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            first: "first".to_string(),
            last: "last".to_string(),
            after: "after".to_string(),
            before: "before".to_string(),
            cursor_field: "cursor".to_string(),
        }
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });

    let gen = settings.into_generator();
    gen.into_root_schema_for::<Configuration>()
}
