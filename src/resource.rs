//! Representations of entities producing telemetry.
//!
//! A [Resource] is the immutable identity of the process or service emitting
//! metrics (service name, host, and so on). It is created once when the SDK
//! is configured and attached to every collected snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{Key, KeyValue, Value};

const SERVICE_NAME: Key = Key::from_static_str("service.name");

/// An immutable representation of the entity producing telemetry as attributes.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

#[derive(Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
struct ResourceInner {
    attrs: BTreeMap<Key, Value>,
}

impl Resource {
    /// Creates a [ResourceBuilder] that allows you to configure a [Resource].
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            attrs: BTreeMap::new(),
        }
    }

    /// Create an empty resource with no attributes.
    pub fn empty() -> Self {
        Resource::default()
    }

    /// Returns the value of the resource attribute with the given key.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.inner.attrs.get(key)
    }

    /// Returns an iterator over the resource attributes, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.inner.attrs.iter()
    }

    /// The number of attributes in this resource.
    pub fn len(&self) -> usize {
        self.inner.attrs.len()
    }

    /// Whether this resource carries no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.attrs.is_empty()
    }
}

/// A builder for [Resource].
#[derive(Debug)]
pub struct ResourceBuilder {
    attrs: BTreeMap<Key, Value>,
}

impl ResourceBuilder {
    /// Add the `service.name` attribute to the resource.
    pub fn with_service_name(self, name: impl Into<Value>) -> Self {
        self.with_attribute(KeyValue {
            key: SERVICE_NAME,
            value: name.into(),
        })
    }

    /// Add a single attribute, replacing a previous value under the same key.
    pub fn with_attribute(mut self, kv: KeyValue) -> Self {
        self.attrs.insert(kv.key, kv.value);
        self
    }

    /// Add multiple attributes; later keys replace earlier ones.
    pub fn with_attributes<I: IntoIterator<Item = KeyValue>>(mut self, attrs: I) -> Self {
        self.attrs
            .extend(attrs.into_iter().map(|kv| (kv.key, kv.value)));
        self
    }

    /// Create a [Resource] from this configuration.
    pub fn build(self) -> Resource {
        Resource {
            inner: Arc::new(ResourceInner { attrs: self.attrs }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_attributes_replace_earlier() {
        let resource = Resource::builder()
            .with_attributes([
                KeyValue::new("pool", "a"),
                KeyValue::new("region", "eu-west-1"),
                KeyValue::new("pool", "b"),
            ])
            .build();

        assert_eq!(resource.len(), 2);
        assert_eq!(resource.get(&Key::new("pool")), Some(&Value::from("b")));
    }

    #[test]
    fn service_name_is_an_attribute() {
        let resource = Resource::builder().with_service_name("checkout").build();
        assert_eq!(
            resource.get(&Key::new("service.name")),
            Some(&Value::from("checkout"))
        );
    }
}
