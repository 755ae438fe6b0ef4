//! Schema and query model.

mod field_type;
mod query;
mod schema;
mod selection;

pub use field_type::FieldType;
pub use query::Operation;
pub use query::OperationKind;
pub use query::Query;
pub use query::TYPENAME;
pub use schema::FieldDefinition;
pub use schema::Schema;
pub use schema::SchemaType;
pub use schema::TypeKind;
pub use selection::ArgumentValue;
pub use selection::Field;
pub use selection::InlineFragment;
pub use selection::Selection;
pub use selection::SelectionId;
