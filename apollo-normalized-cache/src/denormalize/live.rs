//! Live fields.
//!
//! A root field carrying the live directive is served from a subscription channel rather than
//! from the one shot query results. Channels are identified by the field alias and a channel key
//! computed from the query variables.

use std::collections::hash_map;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CacheValue;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::FieldType;

/// Full channel name of a live field: `alias::channel_key`.
pub fn full_channel(alias: &str, channel_key: &str) -> String {
    format!("{alias}::{channel_key}")
}

/// Computes the channel key of a live field.
pub trait ChannelKeyResolver: Send + Sync {
    /// `source` is the parent value, always `None` for root fields.
    fn channel_key(&self, source: Option<&Value>, variables: &Object) -> String;
}

impl<F> ChannelKeyResolver for F
where
    F: Fn(Option<&Value>, &Object) -> String + Send + Sync,
{
    fn channel_key(&self, source: Option<&Value>, variables: &Object) -> String {
        self(source, variables)
    }
}

/// The channel key used when a live field has no resolver of its own: the value of the id
/// variable, or the empty string.
pub(crate) struct IdChannelKey<'a>(pub(crate) &'a str);

impl ChannelKeyResolver for IdChannelKey<'_> {
    fn channel_key(&self, _source: Option<&Value>, variables: &Object) -> String {
        match variables.get(self.0) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(id)) => id.as_str().to_string(),
            Some(other) => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

/// What a live field subscribes to.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionRequest<'a> {
    pub alias: &'a str,
    pub channel_key: &'a str,
    /// Return type of the field, non null wrapper removed.
    pub return_type: &'a FieldType,
}

impl SubscriptionRequest<'_> {
    pub fn full_channel(&self) -> String {
        full_channel(self.alias, self.channel_key)
    }
}

/// Opens the transport stream feeding a channel.
pub trait Subscriber: Send + Sync {
    /// Starts streaming. Returns the value to serve until the first payload lands in the store.
    fn start(&self, request: &SubscriptionRequest<'_>) -> Option<CacheValue>;
}

impl<F> Subscriber for F
where
    F: Fn(&SubscriptionRequest<'_>) -> Option<CacheValue> + Send + Sync,
{
    fn start(&self, request: &SubscriptionRequest<'_>) -> Option<CacheValue> {
        self(request)
    }
}

/// Keeps track of the open channels.
pub trait SubscriptionRegistry: Send + Sync {
    /// Subscribes to the channel of `request` and returns its initial value.
    ///
    /// Must be idempotent per full channel: denormalizing the same query again must not open a
    /// second stream.
    fn subscribe(
        &self,
        request: &SubscriptionRequest<'_>,
        subscriber: Option<&dyn Subscriber>,
    ) -> Option<CacheValue>;
}

/// The default [`SubscriptionRegistry`].
///
/// Starts the subscriber the first time a channel is requested and remembers its initial value
/// for later requests.
#[derive(Debug, Default)]
pub struct Subscriptions {
    channels: Mutex<HashMap<String, Option<CacheValue>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self, full_channel: &str) -> bool {
        self.channels.lock().contains_key(full_channel)
    }

    /// Forgets a channel, so the next request starts it again. Returns false if it was not open.
    pub fn unsubscribe(&self, full_channel: &str) -> bool {
        self.channels.lock().remove(full_channel).is_some()
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}

impl SubscriptionRegistry for Subscriptions {
    fn subscribe(
        &self,
        request: &SubscriptionRequest<'_>,
        subscriber: Option<&dyn Subscriber>,
    ) -> Option<CacheValue> {
        // the subscriber runs under the lock and must not call back into the registry
        match self.channels.lock().entry(request.full_channel()) {
            hash_map::Entry::Occupied(entry) => entry.get().clone(),
            hash_map::Entry::Vacant(entry) => {
                tracing::debug!(
                    channel = %entry.key(),
                    return_type = %request.return_type,
                    "starting subscription"
                );
                let initial = subscriber.and_then(|subscriber| subscriber.start(request));
                entry.insert(initial).clone()
            }
        }
    }
}

/// Overrides for one live field.
#[derive(Clone, Default)]
pub struct LiveField {
    pub resolver: Option<Arc<dyn ChannelKeyResolver>>,
    pub subscriber: Option<Arc<dyn Subscriber>>,
}

impl LiveField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: impl ChannelKeyResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_subscriber(mut self, subscriber: impl Subscriber + 'static) -> Self {
        self.subscriber = Some(Arc::new(subscriber));
        self
    }
}

impl fmt::Debug for LiveField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveField")
            .field("resolver", &self.resolver.is_some())
            .field("subscriber", &self.subscriber.is_some())
            .finish()
    }
}

/// Live field overrides, by field alias.
#[derive(Debug, Clone, Default)]
pub struct LiveConfig {
    fields: HashMap<String, LiveField>,
}

impl LiveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, alias: impl Into<String>, field: LiveField) -> Self {
        self.fields.insert(alias.into(), field);
        self
    }

    pub fn get(&self, alias: &str) -> Option<&LiveField> {
        self.fields.get(alias)
    }
}

/// Query dependencies of every live channel: full channel name to query dependency ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDeps {
    channels: HashMap<String, HashSet<String>>,
}

impl SubscriptionDeps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `query_dep` reads `full_channel`. Returns false if it was already recorded.
    pub fn insert(&mut self, full_channel: String, query_dep: String) -> bool {
        self.channels.entry(full_channel).or_default().insert(query_dep)
    }

    pub fn get(&self, full_channel: &str) -> Option<&HashSet<String>> {
        self.channels.get(full_channel)
    }

    /// Removes `query_dep` from every channel and drops the channels nobody depends on anymore.
    /// Returns the dropped channels.
    pub fn remove_query(&mut self, query_dep: &str) -> Vec<String> {
        let mut dropped = Vec::new();
        self.channels.retain(|channel, deps| {
            deps.remove(query_dep);
            if deps.is_empty() {
                dropped.push(channel.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HashSet<String>)> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
