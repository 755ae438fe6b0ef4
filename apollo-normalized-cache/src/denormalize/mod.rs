//! Denormalization of a query over the normalized store.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

mod coercion;
mod field_state;
mod live;
mod missing;
mod response;
mod send_to_server;
#[cfg(test)]
mod tests;
mod visit;

pub use coercion::ScalarCoercion;
pub use coercion::ScalarCoercions;
pub use field_state::ArgumentsResolver;
pub use field_state::FieldStateResolver;
pub use field_state::BACK_BUCKET;
pub use field_state::FRONT_BUCKET;
pub use field_state::FULL_BUCKET;
pub use live::full_channel;
pub use live::ChannelKeyResolver;
pub use live::LiveConfig;
pub use live::LiveField;
pub use live::Subscriber;
pub use live::SubscriptionDeps;
pub use live::SubscriptionRegistry;
pub use live::SubscriptionRequest;
pub use live::Subscriptions;
pub use missing::MissingDataHandler;
pub use missing::ScaffoldMissingData;
pub use response::ResponseList;
pub use response::ResponseObject;
pub use response::ResponseValue;
pub use send_to_server::FetchFlags;
pub use visit::Visitor;

use response::insert_merged;

use crate::cache::CacheState;
use crate::cache::CacheValue;
use crate::cache::StateSource;
use crate::configuration::Configuration;
use crate::error::DenormalizeError;
use crate::json_ext::Object;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::spec::Field;
use crate::spec::FieldDefinition;
use crate::spec::Query;
use crate::spec::Schema;
use crate::spec::SchemaType;
use crate::spec::Selection;
use crate::spec::SelectionId;
use crate::spec::TYPENAME;

/// Everything a denormalization call reads, plus the subscription dependencies it records.
pub struct ExecutionContext {
    schema: Arc<Schema>,
    query: Arc<Query>,
    state: Arc<dyn StateSource>,
    configuration: Configuration,
    coercions: ScalarCoercions,
    live: LiveConfig,
    subscriber: Option<Arc<dyn Subscriber>>,
    registry: Arc<dyn SubscriptionRegistry>,
    field_state: Option<Arc<dyn FieldStateResolver>>,
    missing_data: Arc<dyn MissingDataHandler>,
    subscription_deps: SubscriptionDeps,
    query_dep: String,
    variables: Object,
}

impl ExecutionContext {
    pub fn new(schema: Arc<Schema>, query: Arc<Query>, state: Arc<dyn StateSource>) -> Self {
        let query_dep = query.operation().name.clone().unwrap_or_default();
        Self {
            schema,
            query,
            state,
            configuration: Configuration::default(),
            coercions: ScalarCoercions::default(),
            live: LiveConfig::default(),
            subscriber: None,
            registry: Arc::new(Subscriptions::default()),
            field_state: None,
            missing_data: Arc::new(ScaffoldMissingData),
            subscription_deps: SubscriptionDeps::default(),
            query_dep,
            variables: Object::default(),
        }
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_coercions(mut self, coercions: ScalarCoercions) -> Self {
        self.coercions = coercions;
        self
    }

    pub fn with_live(mut self, live: LiveConfig) -> Self {
        self.live = live;
        self
    }

    /// Subscriber used by live fields without one of their own.
    pub fn with_subscriber(mut self, subscriber: impl Subscriber + 'static) -> Self {
        self.subscriber = Some(Arc::new(subscriber));
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn SubscriptionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the default [`ArgumentsResolver`].
    pub fn with_field_state_resolver(mut self, resolver: Arc<dyn FieldStateResolver>) -> Self {
        self.field_state = Some(resolver);
        self
    }

    pub fn with_missing_data_handler(mut self, handler: Arc<dyn MissingDataHandler>) -> Self {
        self.missing_data = handler;
        self
    }

    pub fn with_subscription_deps(mut self, subscription_deps: SubscriptionDeps) -> Self {
        self.subscription_deps = subscription_deps;
        self
    }

    /// Identifies the query in the subscription dependencies. Defaults to the operation name.
    pub fn with_query_dep(mut self, query_dep: impl Into<String>) -> Self {
        self.query_dep = query_dep.into();
        self
    }

    pub fn with_variables(mut self, variables: Object) -> Self {
        self.variables = variables;
        self
    }

    pub fn query(&self) -> &Arc<Query> {
        &self.query
    }

    pub fn registry(&self) -> &Arc<dyn SubscriptionRegistry> {
        &self.registry
    }

    pub fn subscription_deps(&self) -> &SubscriptionDeps {
        &self.subscription_deps
    }

    pub fn take_subscription_deps(&mut self) -> SubscriptionDeps {
        std::mem::take(&mut self.subscription_deps)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("query", &self.query.as_str())
            .field("configuration", &self.configuration)
            .field("coercions", &self.coercions)
            .field("live", &self.live)
            .field("subscription_deps", &self.subscription_deps)
            .field("query_dep", &self.query_dep)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

/// The result of a denormalization call.
#[derive(Debug, Clone, PartialEq)]
pub struct Denormalized {
    /// The response, shaped like the selection set of the operation.
    pub data: ResponseValue,
    pub flags: FetchFlags,
    operation: SelectionId,
}

impl Denormalized {
    /// Returns true if any part of the operation must be fetched.
    pub fn needs_fetch(&self) -> bool {
        self.flags.needs_fetch(self.operation)
    }

    pub fn field_needs_fetch(&self, field: &Field) -> bool {
        self.flags.needs_fetch(field.id)
    }
}

/// Rebuilds the response of the context query from the store.
///
/// The store is sampled once, and the whole traversal reads that snapshot. Live fields register
/// their channel in the context subscription dependencies.
#[tracing::instrument(skip_all, level = "trace")]
pub fn denormalize(context: &mut ExecutionContext) -> Result<Denormalized, DenormalizeError> {
    let mut subscription_deps = std::mem::take(&mut context.subscription_deps);
    let result = execute(context, &mut subscription_deps);
    context.subscription_deps = subscription_deps;
    result
}

fn execute(
    context: &ExecutionContext,
    subscription_deps: &mut SubscriptionDeps,
) -> Result<Denormalized, DenormalizeError> {
    let state = context.state.get_state();
    let operation = context.query.operation();
    let root_type = context.schema.root_type(operation.kind)?;
    let variables = operation.variables_with_defaults(&context.variables);

    let default_resolver;
    let field_state: &dyn FieldStateResolver = match &context.field_state {
        Some(resolver) => resolver.as_ref(),
        None => {
            default_resolver = ArgumentsResolver::new(context.configuration.pagination.clone());
            &default_resolver
        }
    };
    let mut root = Root {
        context,
        subscription_deps,
        visitor: Visitor::new(
            &context.schema,
            &state,
            &variables,
            &context.configuration,
            &context.coercions,
            field_state,
            context.missing_data.as_ref(),
            context.query.selection_count(),
        ),
        root_type,
    };

    let mut data = ResponseObject::new();
    root.visit_selections(&operation.selection_set, &mut data)?;

    let mut visitor = root.visitor;
    if visitor.propagate(operation.id, &operation.selection_set) {
        tracing::debug!(
            fields = visitor.flags().flagged().count(),
            "operation needs data from the server"
        );
    }
    Ok(Denormalized {
        data: ResponseValue::Object(data),
        flags: visitor.into_flags(),
        operation: operation.id,
    })
}

/// Resolves the root fields of the operation.
struct Root<'a, 'd> {
    context: &'a ExecutionContext,
    subscription_deps: &'d mut SubscriptionDeps,
    visitor: Visitor<'a>,
    root_type: &'a SchemaType,
}

impl<'a> Root<'a, '_> {
    fn visit_selections(
        &mut self,
        selection_set: &[Selection],
        output: &mut ResponseObject,
    ) -> Result<(), DenormalizeError> {
        for selection in selection_set {
            match selection {
                Selection::InlineFragment(fragment) => {
                    if self.visitor.fragment_applies(fragment, self.root_type) {
                        self.visit_selections(&fragment.selection_set, output)?;
                        self.visitor.propagate(fragment.id, &fragment.selection_set);
                    }
                }
                Selection::Field(field) if field.name.as_str() == TYPENAME => {
                    output.insert(
                        field.response_key().clone(),
                        ResponseValue::Leaf(Value::String(self.root_type.name.as_str().into())),
                    );
                }
                Selection::Field(field) => {
                    let value = self.visit_field(field)?;
                    insert_merged(output, field.response_key().clone(), value);
                }
            }
        }
        Ok(())
    }

    fn visit_field(&mut self, field: &Field) -> Result<ResponseValue, DenormalizeError> {
        let schema = self.visitor.schema();
        let state = self.visitor.state();
        let definition = schema.field(&self.root_type.name, field.name.as_str())?;
        let key = field.response_key();
        self.visitor.enter(PathElement::Key(key.as_str().to_string()));

        let cached = if field.has_directive(&self.context.configuration.live_directive) {
            self.live_state(field, definition, state)
        } else {
            let resolver = self.visitor.field_state_resolver();
            let arguments = field.resolve_arguments(self.visitor.variables());
            state
                .result
                .get(field.name.as_str())
                .and_then(|cached| resolver.resolve(cached, field, &arguments, state))
        };

        let value = match cached {
            Some(cached) => self.visitor.visit(&cached, field, &definition.ty)?,
            None => {
                let value = self.visitor.missing(field, &definition.ty)?;
                if field.selection_set.is_none() {
                    self.visitor.mark(field.id);
                }
                value
            }
        };
        if let Some(children) = &field.selection_set {
            self.visitor.propagate(field.id, children);
        }
        self.visitor.leave();
        Ok(value)
    }

    /// Reads a live field from its channel, subscribing to it and recording the dependency.
    fn live_state(
        &mut self,
        field: &Field,
        definition: &FieldDefinition,
        state: &'a CacheState,
    ) -> Option<Cow<'a, CacheValue>> {
        let alias = field.response_key().as_str();
        let overrides = self.context.live.get(alias);
        let channel_key = match overrides.and_then(|live| live.resolver.as_ref()) {
            Some(resolver) => resolver.channel_key(None, self.visitor.variables()),
            None => live::IdChannelKey(&self.context.configuration.id_field_name)
                .channel_key(None, self.visitor.variables()),
        };
        let subscriber = overrides
            .and_then(|live| live.subscriber.as_deref())
            .or(self.context.subscriber.as_deref());
        let request = SubscriptionRequest {
            alias,
            channel_key: &channel_key,
            return_type: definition.ty.without_non_null(),
        };
        let initial = self.context.registry.subscribe(&request, subscriber);

        if self
            .subscription_deps
            .insert(request.full_channel(), self.context.query_dep.clone())
        {
            tracing::debug!(
                channel = %request.full_channel(),
                query = %self.context.query_dep,
                "registered live dependency"
            );
        }

        state
            .result
            .get(alias)
            .and_then(CacheValue::as_record)
            .and_then(|channels| channels.get(channel_key.as_str()))
            .map(Cow::Borrowed)
            .or_else(|| initial.map(Cow::Owned))
    }
}
