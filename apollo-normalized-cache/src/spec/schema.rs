//! GraphQL schema.

use std::collections::HashMap;

use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::DenormalizeError;
use crate::error::SchemaError;
use crate::spec::FieldType;
use crate::spec::OperationKind;

/// Kind of a named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Scalar,
    Enum,
    InputObject,
}

impl TypeKind {
    /// Abstract types are stored by reference in the cache, never inlined.
    pub fn is_abstract(&self) -> bool {
        matches!(self, TypeKind::Interface | TypeKind::Union)
    }
}

/// A named type of the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaType {
    pub name: String,
    pub kind: TypeKind,
    pub fields: IndexMap<String, FieldDefinition>,
    /// Object types a union or interface may resolve to.
    pub possible_types: Vec<String>,
}

/// A field of an object or interface type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub arguments: Vec<String>,
    pub ty: FieldType,
}

impl FieldDefinition {
    pub fn has_arguments(&self) -> bool {
        !self.arguments.is_empty()
    }
}

/// A GraphQL schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<String, SchemaType>,
    root_operations: HashMap<OperationKind, String>,
}

impl Schema {
    /// Parses and validates a schema in SDL syntax.
    pub fn parse(sdl: &str) -> Result<Self, SchemaError> {
        let definitions = apollo_compiler::Schema::parse_and_validate(sdl, "schema.graphql")
            .map_err(|invalid| SchemaError::Parse(invalid.errors.to_string()))?;

        let mut types = HashMap::new();
        for (name, definition) in definitions.types.iter() {
            if name.as_str().starts_with("__") {
                continue;
            }
            let schema_type = match definition {
                ExtendedType::Object(object) => SchemaType {
                    name: name.to_string(),
                    kind: TypeKind::Object,
                    fields: object
                        .fields
                        .iter()
                        .map(|(field_name, field)| {
                            (
                                field_name.to_string(),
                                FieldDefinition {
                                    name: field_name.to_string(),
                                    arguments: field
                                        .arguments
                                        .iter()
                                        .map(|argument| argument.name.to_string())
                                        .collect(),
                                    ty: FieldType::from(&field.ty),
                                },
                            )
                        })
                        .collect(),
                    possible_types: Vec::new(),
                },
                ExtendedType::Interface(interface) => SchemaType {
                    name: name.to_string(),
                    kind: TypeKind::Interface,
                    fields: interface
                        .fields
                        .iter()
                        .map(|(field_name, field)| {
                            (
                                field_name.to_string(),
                                FieldDefinition {
                                    name: field_name.to_string(),
                                    arguments: field
                                        .arguments
                                        .iter()
                                        .map(|argument| argument.name.to_string())
                                        .collect(),
                                    ty: FieldType::from(&field.ty),
                                },
                            )
                        })
                        .collect(),
                    possible_types: definitions
                        .types
                        .iter()
                        .filter_map(|(implementor, ty)| match ty {
                            ExtendedType::Object(object)
                                if object
                                    .implements_interfaces
                                    .iter()
                                    .any(|i| i.name.as_str() == name.as_str()) =>
                            {
                                Some(implementor.to_string())
                            }
                            _ => None,
                        })
                        .collect(),
                },
                ExtendedType::Union(union) => SchemaType {
                    name: name.to_string(),
                    kind: TypeKind::Union,
                    fields: IndexMap::new(),
                    possible_types: union
                        .members
                        .iter()
                        .map(|member| member.name.to_string())
                        .collect(),
                },
                ExtendedType::Scalar(_) => SchemaType::leaf(name.as_str(), TypeKind::Scalar),
                ExtendedType::Enum(_) => SchemaType::leaf(name.as_str(), TypeKind::Enum),
                ExtendedType::InputObject(_) => {
                    SchemaType::leaf(name.as_str(), TypeKind::InputObject)
                }
            };
            types.insert(name.to_string(), schema_type);
        }

        let mut root_operations = HashMap::new();
        let schema_definition = &definitions.schema_definition;
        for (kind, root) in [
            (OperationKind::Query, &schema_definition.query),
            (OperationKind::Mutation, &schema_definition.mutation),
            (OperationKind::Subscription, &schema_definition.subscription),
        ] {
            if let Some(root) = root {
                root_operations.insert(kind, root.name.to_string());
            }
        }

        Ok(Self::from_parts(types, root_operations))
    }

    /// Loads a schema from the JSON result of the standard introspection query.
    ///
    /// Both the bare `{"__schema": ...}` object and a full `{"data": {"__schema": ...}}` response
    /// are accepted.
    pub fn from_introspection(introspection: &str) -> Result<Self, SchemaError> {
        let mut value: serde_json::Value = serde_json::from_str(introspection)
            .map_err(|e| SchemaError::Introspection(e.to_string()))?;
        if let Some(data) = value.get_mut("data").map(serde_json::Value::take) {
            value = data;
        }
        let result: introspection::IntrospectionResult = serde_json::from_value(value)
            .map_err(|e| SchemaError::Introspection(e.to_string()))?;

        let introspection::IntrospectionSchema {
            query_type,
            mutation_type,
            subscription_type,
            types: introspected,
        } = result.schema;

        let mut types = HashMap::new();
        for ty in introspected {
            if ty.name.starts_with("__") {
                continue;
            }
            let kind = match ty.kind {
                introspection::Kind::Object => TypeKind::Object,
                introspection::Kind::Interface => TypeKind::Interface,
                introspection::Kind::Union => TypeKind::Union,
                introspection::Kind::Scalar => TypeKind::Scalar,
                introspection::Kind::Enum => TypeKind::Enum,
                introspection::Kind::InputObject => TypeKind::InputObject,
                introspection::Kind::List | introspection::Kind::NonNull => {
                    return Err(SchemaError::Introspection(format!(
                        "type '{}' cannot be a wrapping type",
                        ty.name
                    )));
                }
            };
            let fields = ty
                .fields
                .unwrap_or_default()
                .into_iter()
                .map(|field| {
                    let definition = FieldDefinition {
                        name: field.name.clone(),
                        arguments: field.args.into_iter().map(|arg| arg.name).collect(),
                        ty: field.ty.to_field_type()?,
                    };
                    Ok((field.name, definition))
                })
                .collect::<Result<IndexMap<_, _>, SchemaError>>()?;
            let possible_types = ty
                .possible_types
                .unwrap_or_default()
                .into_iter()
                .map(|named| named.name)
                .collect();
            types.insert(
                ty.name.clone(),
                SchemaType {
                    name: ty.name,
                    kind,
                    fields,
                    possible_types,
                },
            );
        }

        let root_operations = [
            (OperationKind::Query, query_type),
            (OperationKind::Mutation, mutation_type),
            (OperationKind::Subscription, subscription_type),
        ]
        .into_iter()
        .filter_map(|(kind, named)| named.map(|named| (kind, named.name)))
        .collect();

        Ok(Self::from_parts(types, root_operations))
    }

    fn from_parts(
        types: HashMap<String, SchemaType>,
        mut root_operations: HashMap<OperationKind, String>,
    ) -> Self {
        // Root operation types default to their conventional names.
        for kind in [
            OperationKind::Query,
            OperationKind::Mutation,
            OperationKind::Subscription,
        ] {
            let default_name = kind.default_type_name();
            if !root_operations.contains_key(&kind) && types.contains_key(default_name) {
                root_operations.insert(kind, default_name.to_string());
            }
        }
        Schema {
            types,
            root_operations,
        }
    }

    pub fn get_type(&self, name: &str) -> Result<&SchemaType, DenormalizeError> {
        self.types
            .get(name)
            .ok_or_else(|| DenormalizeError::UnknownType(name.to_string()))
    }

    /// Looks up the definition of `field` on `type_name`.
    pub fn field(&self, type_name: &str, field: &str) -> Result<&FieldDefinition, DenormalizeError> {
        self.get_type(type_name)?
            .fields
            .get(field)
            .ok_or_else(|| DenormalizeError::InvalidField {
                field: field.to_string(),
                type_name: type_name.to_string(),
            })
    }

    pub fn root_type(&self, kind: OperationKind) -> Result<&SchemaType, DenormalizeError> {
        let name = self
            .root_operations
            .get(&kind)
            .ok_or(DenormalizeError::MissingRootType(kind))?;
        self.get_type(name)
    }

    /// Returns true if `maybe_subtype` is a possible type of `abstract_type`.
    pub fn is_subtype(&self, abstract_type: &str, maybe_subtype: &str) -> bool {
        self.types
            .get(abstract_type)
            .map(|ty| ty.possible_types.iter().any(|t| t == maybe_subtype))
            .unwrap_or(false)
    }
}

impl SchemaType {
    fn leaf(name: &str, kind: TypeKind) -> Self {
        SchemaType {
            name: name.to_string(),
            kind,
            fields: IndexMap::new(),
            possible_types: Vec::new(),
        }
    }
}

mod introspection {
    use serde::Deserialize;

    use crate::error::SchemaError;
    use crate::spec::FieldType;

    #[derive(Deserialize)]
    pub(super) struct IntrospectionResult {
        #[serde(rename = "__schema")]
        pub(super) schema: IntrospectionSchema,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct IntrospectionSchema {
        pub(super) query_type: Option<NamedRef>,
        #[serde(default)]
        pub(super) mutation_type: Option<NamedRef>,
        #[serde(default)]
        pub(super) subscription_type: Option<NamedRef>,
        pub(super) types: Vec<IntrospectionType>,
    }

    #[derive(Deserialize)]
    pub(super) struct NamedRef {
        pub(super) name: String,
    }

    #[derive(Deserialize, Clone, Copy)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub(super) enum Kind {
        Scalar,
        Object,
        Interface,
        Union,
        Enum,
        InputObject,
        List,
        NonNull,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct IntrospectionType {
        pub(super) kind: Kind,
        pub(super) name: String,
        #[serde(default)]
        pub(super) fields: Option<Vec<IntrospectionField>>,
        #[serde(default)]
        pub(super) possible_types: Option<Vec<NamedRef>>,
    }

    #[derive(Deserialize)]
    pub(super) struct IntrospectionField {
        pub(super) name: String,
        #[serde(default)]
        pub(super) args: Vec<IntrospectionInputValue>,
        #[serde(rename = "type")]
        pub(super) ty: TypeRef,
    }

    #[derive(Deserialize)]
    pub(super) struct IntrospectionInputValue {
        pub(super) name: String,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct TypeRef {
        kind: Kind,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        of_type: Option<Box<TypeRef>>,
    }

    impl TypeRef {
        pub(super) fn to_field_type(&self) -> Result<FieldType, SchemaError> {
            match self.kind {
                Kind::NonNull | Kind::List => {
                    let inner = self.of_type.as_ref().ok_or_else(|| {
                        SchemaError::Introspection("wrapping type without ofType".to_string())
                    })?;
                    let inner = Box::new(inner.to_field_type()?);
                    Ok(if matches!(self.kind, Kind::List) {
                        FieldType::List(inner)
                    } else {
                        FieldType::NonNull(inner)
                    })
                }
                _ => self
                    .name
                    .as_deref()
                    .map(FieldType::from_name)
                    .ok_or_else(|| {
                        SchemaError::Introspection("named type without name".to_string())
                    }),
            }
        }
    }
}
