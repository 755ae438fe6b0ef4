//! Rebuilds GraphQL responses from a normalized entity cache.
//!
//! Given a parsed [`Query`], a [`Schema`] and a snapshot of the normalized store, [`denormalize`]
//! produces the response the client expects, substituting cached entities wherever they are
//! available and flagging, per selection, which branches must still be fetched from the server.

#![cfg_attr(feature = "failfast", allow(unreachable_code))]
#![warn(unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

pub mod json_ext;

pub mod cache;
mod configuration;
mod denormalize;
pub mod error;
mod spec;

pub use cache::CacheState;
pub use cache::CacheStore;
pub use cache::CacheValue;
pub use cache::CachedList;
pub use cache::PageInfo;
pub use cache::Record;
pub use cache::Reference;
pub use cache::StateSource;
pub use configuration::generate_config_schema;
pub use configuration::Configuration;
pub use configuration::ConfigurationError;
pub use configuration::DanglingReferences;
pub use configuration::Pagination;
pub use denormalize::denormalize;
pub use denormalize::full_channel;
pub use denormalize::ArgumentsResolver;
pub use denormalize::ChannelKeyResolver;
pub use denormalize::Denormalized;
pub use denormalize::ExecutionContext;
pub use denormalize::FetchFlags;
pub use denormalize::FieldStateResolver;
pub use denormalize::LiveConfig;
pub use denormalize::LiveField;
pub use denormalize::MissingDataHandler;
pub use denormalize::ResponseList;
pub use denormalize::ResponseObject;
pub use denormalize::ResponseValue;
pub use denormalize::ScaffoldMissingData;
pub use denormalize::ScalarCoercion;
pub use denormalize::ScalarCoercions;
pub use denormalize::Subscriber;
pub use denormalize::SubscriptionDeps;
pub use denormalize::SubscriptionRegistry;
pub use denormalize::SubscriptionRequest;
pub use denormalize::Subscriptions;
pub use denormalize::Visitor;
pub use denormalize::BACK_BUCKET;
pub use denormalize::FRONT_BUCKET;
pub use denormalize::FULL_BUCKET;
pub use spec::ArgumentValue;
pub use spec::Field;
pub use spec::FieldDefinition;
pub use spec::FieldType;
pub use spec::InlineFragment;
pub use spec::Operation;
pub use spec::OperationKind;
pub use spec::Query;
pub use spec::Schema;
pub use spec::SchemaType;
pub use spec::Selection;
pub use spec::SelectionId;
pub use spec::TypeKind;
pub use spec::TYPENAME;
