use crate::cache::Record;
use crate::denormalize::ResponseList;
use crate::denormalize::ResponseValue;
use crate::denormalize::Visitor;
use crate::error::DenormalizeError;
use crate::spec::Field;
use crate::spec::FieldType;
use crate::spec::TypeKind;

/// Produces the value of a field that has nothing cached.
///
/// Implementations are responsible for flagging the selections to fetch.
pub trait MissingDataHandler: Send + Sync {
    fn handle(
        &self,
        visitor: &mut Visitor<'_>,
        field: &Field,
        ty: &FieldType,
    ) -> Result<ResponseValue, DenormalizeError>;
}

/// The default [`MissingDataHandler`].
///
/// Flags the whole subtree of the field and returns a placeholder shaped like the expected
/// response: an empty list for lists, an object of placeholders for object types, `null`
/// otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaffoldMissingData;

impl MissingDataHandler for ScaffoldMissingData {
    fn handle(
        &self,
        visitor: &mut Visitor<'_>,
        field: &Field,
        ty: &FieldType,
    ) -> Result<ResponseValue, DenormalizeError> {
        tracing::trace!(path = %visitor.path(), "no cached value");
        visitor.mark_subtree(field);
        match ty.without_non_null() {
            FieldType::List(_) => Ok(ResponseValue::List(ResponseList::default())),
            named => {
                let Some(type_name) = named.inner_type_name() else {
                    return Ok(ResponseValue::Null);
                };
                let schema_type = visitor.schema().get_type(type_name)?;
                if schema_type.kind == TypeKind::Object && field.selection_set.is_some() {
                    visitor.visit_object(&Record::default(), field, schema_type)
                } else {
                    Ok(ResponseValue::Null)
                }
            }
        }
    }
}
