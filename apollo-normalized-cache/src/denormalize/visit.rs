use std::borrow::Cow;
use std::sync::Arc;

use crate::cache::CacheState;
use crate::cache::CacheValue;
use crate::cache::CachedList;
use crate::cache::Record;
use crate::cache::Reference;
use crate::configuration::Configuration;
use crate::configuration::DanglingReferences;
use crate::denormalize::FetchFlags;
use crate::denormalize::FieldStateResolver;
use crate::denormalize::MissingDataHandler;
use crate::denormalize::response::insert_merged;
use crate::denormalize::ResponseList;
use crate::denormalize::ResponseObject;
use crate::denormalize::ResponseValue;
use crate::denormalize::ScalarCoercions;
use crate::error::DenormalizeError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::spec::Field;
use crate::spec::FieldType;
use crate::spec::InlineFragment;
use crate::spec::Schema;
use crate::spec::SchemaType;
use crate::spec::Selection;
use crate::spec::SelectionId;
use crate::spec::TypeKind;
use crate::spec::TYPENAME;

/// How a value of a given type is read from the cache.
enum Shape<'s> {
    /// Stored inline, or by reference.
    Object(&'s SchemaType),
    /// Unions and interfaces, always stored by reference.
    Abstract(&'s SchemaType),
    /// Holds the element type.
    List(&'s FieldType),
    /// Scalars and enums, by type name.
    Leaf(&'s str),
}

/// Walks a selection tree over one snapshot of the store.
///
/// Produces the response and records the selections that must be fetched.
pub struct Visitor<'a> {
    schema: &'a Schema,
    state: &'a CacheState,
    variables: &'a Object,
    configuration: &'a Configuration,
    coercions: &'a ScalarCoercions,
    field_state: &'a dyn FieldStateResolver,
    missing_data: &'a dyn MissingDataHandler,
    flags: FetchFlags,
    path: Path,
}

impl<'a> Visitor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        schema: &'a Schema,
        state: &'a CacheState,
        variables: &'a Object,
        configuration: &'a Configuration,
        coercions: &'a ScalarCoercions,
        field_state: &'a dyn FieldStateResolver,
        missing_data: &'a dyn MissingDataHandler,
        selection_count: usize,
    ) -> Self {
        Self {
            schema,
            state,
            variables,
            configuration,
            coercions,
            field_state,
            missing_data,
            flags: FetchFlags::new(selection_count),
            path: Path::empty(),
        }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn state(&self) -> &'a CacheState {
        self.state
    }

    pub fn variables(&self) -> &'a Object {
        self.variables
    }

    /// Response path of the value being visited.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flags(&self) -> &FetchFlags {
        &self.flags
    }

    pub(crate) fn field_state_resolver(&self) -> &'a dyn FieldStateResolver {
        self.field_state
    }

    pub(crate) fn into_flags(self) -> FetchFlags {
        self.flags
    }

    /// Flags `field` and every selection below it for fetching.
    pub fn mark_subtree(&mut self, field: &Field) {
        self.flags
            .mark_subtree(field.id, field.selection_set.as_deref().unwrap_or_default());
    }

    pub(crate) fn mark(&mut self, id: SelectionId) {
        self.flags.set(id);
    }

    pub(crate) fn propagate(&mut self, id: SelectionId, children: &[Selection]) -> bool {
        self.flags.propagate(id, children)
    }

    pub(crate) fn enter(&mut self, element: PathElement) {
        self.path.push(element);
    }

    pub(crate) fn leave(&mut self) {
        self.path.pop();
    }

    /// Denormalizes `value`, selected by `field`, as a value of type `ty`.
    pub fn visit(
        &mut self,
        value: &CacheValue,
        field: &Field,
        ty: &FieldType,
    ) -> Result<ResponseValue, DenormalizeError> {
        let shape = self.shape(ty)?;
        // an explicit null is cached data, not a miss, except for lists whose page is unresolved
        if value.is_null() && !matches!(shape, Shape::List(_)) {
            return Ok(ResponseValue::Null);
        }
        match shape {
            Shape::Object(object_type) => match value {
                CacheValue::Record(record) => self.visit_object(record, field, object_type),
                CacheValue::Reference(reference) => self.visit_reference(reference, field),
                _ => Err(self.unexpected_value(&object_type.name)),
            },
            Shape::Abstract(abstract_type) => match value {
                CacheValue::Reference(reference) => self.visit_reference(reference, field),
                _ => Err(self.unexpected_value(&abstract_type.name)),
            },
            Shape::List(element_type) => self.visit_list(value, field, element_type),
            Shape::Leaf(type_name) => self.visit_scalar(value, type_name),
        }
    }

    /// Resolves the selection set of `field` over `record`, a value of `object_type`.
    pub fn visit_object(
        &mut self,
        record: &Record,
        field: &Field,
        object_type: &SchemaType,
    ) -> Result<ResponseValue, DenormalizeError> {
        let mut output = ResponseObject::new();
        if let Some(selection_set) = &field.selection_set {
            self.visit_selections(record, selection_set, object_type, &mut output)?;
        }
        Ok(ResponseValue::Object(output))
    }

    fn visit_selections(
        &mut self,
        record: &Record,
        selection_set: &[Selection],
        object_type: &SchemaType,
        output: &mut ResponseObject,
    ) -> Result<(), DenormalizeError> {
        for selection in selection_set {
            match selection {
                Selection::InlineFragment(fragment) => {
                    if self.fragment_applies(fragment, object_type) {
                        self.visit_selections(record, &fragment.selection_set, object_type, output)?;
                    }
                }
                Selection::Field(field) if field.name.as_str() == TYPENAME => {
                    output.insert(
                        field.response_key().clone(),
                        ResponseValue::Leaf(Value::String(object_type.name.as_str().into())),
                    );
                }
                Selection::Field(field) => {
                    let definition = self.schema.field(&object_type.name, field.name.as_str())?;
                    let key = field.response_key();
                    self.enter(PathElement::Key(key.as_str().to_string()));

                    let cached = match record.get(field.name.as_str()) {
                        Some(cached) if definition.has_arguments() => {
                            let arguments = field.resolve_arguments(self.variables);
                            self.field_state
                                .resolve(cached, field, &arguments, self.state)
                        }
                        Some(cached) => Some(Cow::Borrowed(cached)),
                        None => None,
                    };
                    let value = match cached {
                        Some(cached) => {
                            let value = self.visit(&cached, field, &definition.ty)?;
                            if let Some(children) = &field.selection_set {
                                self.propagate(field.id, children);
                            }
                            value
                        }
                        None => self.missing(field, &definition.ty)?,
                    };

                    self.leave();
                    insert_merged(output, key.clone(), value);
                }
            }
        }
        Ok(())
    }

    /// Fragments without a type condition always apply. Fragments on an abstract type apply to
    /// its possible types.
    pub(crate) fn fragment_applies(&self, fragment: &InlineFragment, object_type: &SchemaType) -> bool {
        match &fragment.type_condition {
            None => true,
            Some(condition) => {
                condition == &object_type.name || self.schema.is_subtype(condition, &object_type.name)
            }
        }
    }

    /// Hands a field with nothing cached to the missing data handler.
    pub(crate) fn missing(
        &mut self,
        field: &Field,
        ty: &FieldType,
    ) -> Result<ResponseValue, DenormalizeError> {
        let handler = self.missing_data;
        handler.handle(self, field, ty)
    }

    fn visit_reference(
        &mut self,
        reference: &Reference,
        field: &Field,
    ) -> Result<ResponseValue, DenormalizeError> {
        let concrete_type = self.schema.get_type(&reference.type_name)?;
        if concrete_type.kind != TypeKind::Object {
            return Err(self.unexpected_value(&reference.type_name));
        }
        match self.state.entity(reference) {
            Some(record) => self.visit_object(record, field, concrete_type),
            None => match self.configuration.dangling_references {
                DanglingReferences::Error => Err(DenormalizeError::DanglingReference {
                    reference: reference.clone(),
                    path: self.path.clone(),
                }),
                DanglingReferences::Fetch => {
                    failfast_debug!(
                        "reference '{}' at '{}' points to a missing entity, it will be fetched",
                        reference,
                        self.path
                    );
                    self.mark_subtree(field);
                    self.visit_object(&Record::default(), field, concrete_type)
                }
            },
        }
    }

    fn visit_list(
        &mut self,
        value: &CacheValue,
        field: &Field,
        element_type: &FieldType,
    ) -> Result<ResponseValue, DenormalizeError> {
        let CacheValue::List(CachedList { items, page_info }) = value else {
            // the page is not resolved yet, nothing below it can be trusted
            tracing::trace!(path = %self.path, "list is not cached yet");
            self.mark_subtree(field);
            return Ok(ResponseValue::List(ResponseList::default()));
        };

        let mut output = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            self.enter(PathElement::Index(index));
            output.push(self.visit(item, field, element_type)?);
            self.leave();
        }
        Ok(ResponseValue::List(ResponseList {
            items: output,
            page_info: *page_info,
        }))
    }

    fn visit_scalar(
        &mut self,
        value: &CacheValue,
        type_name: &str,
    ) -> Result<ResponseValue, DenormalizeError> {
        let raw = match value {
            CacheValue::Scalar(raw) => raw.clone(),
            CacheValue::Reference(_) => return Err(self.unexpected_value(type_name)),
            // custom scalars may hold any JSON
            other => other.to_json(),
        };
        let coerced =
            self.coercions
                .coerce(type_name, raw)
                .map_err(|source| DenormalizeError::Coercion {
                    type_name: type_name.to_string(),
                    path: self.path.clone(),
                    source: Arc::from(source),
                })?;
        Ok(coerced.into())
    }

    fn shape<'t>(&self, ty: &'t FieldType) -> Result<Shape<'t>, DenormalizeError>
    where
        'a: 't,
    {
        let named = match ty.without_non_null() {
            FieldType::List(element_type) => return Ok(Shape::List(element_type)),
            FieldType::NonNull(_) => return Err(self.unexpected_value(&ty.to_string())),
            FieldType::String => return Ok(Shape::Leaf("String")),
            FieldType::Int => return Ok(Shape::Leaf("Int")),
            FieldType::Float => return Ok(Shape::Leaf("Float")),
            FieldType::Id => return Ok(Shape::Leaf("ID")),
            FieldType::Boolean => return Ok(Shape::Leaf("Boolean")),
            FieldType::Named(name) => name,
        };
        let schema_type = self.schema.get_type(named)?;
        Ok(match schema_type.kind {
            TypeKind::Object => Shape::Object(schema_type),
            TypeKind::Interface | TypeKind::Union => Shape::Abstract(schema_type),
            TypeKind::Scalar | TypeKind::Enum => Shape::Leaf(named),
            TypeKind::InputObject => return Err(self.unexpected_value(named)),
        })
    }

    fn unexpected_value(&self, type_name: &str) -> DenormalizeError {
        DenormalizeError::UnexpectedValue {
            type_name: type_name.to_string(),
            path: self.path.clone(),
        }
    }
}
