use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::json_ext::Value;

/// Converts the raw cached value of a scalar into its client representation.
pub type ScalarCoercion = Arc<dyn Fn(Value) -> Result<Value, BoxError> + Send + Sync>;

/// Scalar coercions, by scalar type name.
#[derive(Clone, Default)]
pub struct ScalarCoercions {
    coercions: HashMap<String, ScalarCoercion>,
}

impl ScalarCoercions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        type_name: impl Into<String>,
        coercion: impl Fn(Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.insert(type_name, coercion);
        self
    }

    pub fn insert(
        &mut self,
        type_name: impl Into<String>,
        coercion: impl Fn(Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    ) {
        self.coercions.insert(type_name.into(), Arc::new(coercion));
    }

    pub fn get(&self, type_name: &str) -> Option<&ScalarCoercion> {
        self.coercions.get(type_name)
    }

    /// Applies the coercion registered for `type_name`. Values of other types pass through.
    pub(crate) fn coerce(&self, type_name: &str, value: Value) -> Result<Value, BoxError> {
        match self.coercions.get(type_name) {
            Some(coercion) => coercion(value),
            None => Ok(value),
        }
    }
}

impl fmt::Debug for ScalarCoercions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.coercions.keys()).finish()
    }
}
