//! Identity of the library or module that created a set of instruments.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::KeyValue;

/// Information about the library producing measurements.
///
/// Scope identity is the pair of name and version: two scopes with equal
/// name and version compare equal (and group together) even when their
/// attributes differ.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InstrumentationScope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl InstrumentationScope {
    /// Create a new builder to create an [InstrumentationScope].
    pub fn builder<T: Into<Cow<'static, str>>>(name: T) -> InstrumentationScopeBuilder {
        InstrumentationScopeBuilder {
            name: name.into(),
            version: None,
            attributes: None,
        }
    }

    /// The library name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The library version.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The library attributes.
    pub fn attributes(&self) -> impl Iterator<Item = &KeyValue> {
        self.attributes.iter()
    }
}

impl PartialEq for InstrumentationScope {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version
    }
}

impl Eq for InstrumentationScope {}

impl Hash for InstrumentationScope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl PartialOrd for InstrumentationScope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstrumentationScope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
    }
}

/// Configuration options for [InstrumentationScope].
#[derive(Debug)]
pub struct InstrumentationScopeBuilder {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    attributes: Option<Vec<KeyValue>>,
}

impl InstrumentationScopeBuilder {
    /// Configure the version for the scope
    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Configure the attributes for the scope
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes = Some(attributes.into_iter().collect());
        self
    }

    /// Create a new [InstrumentationScope] from this configuration
    pub fn build(self) -> InstrumentationScope {
        InstrumentationScope {
            name: self.name,
            version: self.version,
            attributes: self.attributes.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InstrumentationScope;
    use crate::KeyValue;

    #[test]
    fn scope_identity_ignores_attributes() {
        let a = InstrumentationScope::builder("http")
            .with_version("0.2.0")
            .with_attributes([KeyValue::new("host", "a")])
            .build();
        let b = InstrumentationScope::builder("http")
            .with_version("0.2.0")
            .with_attributes([KeyValue::new("host", "b")])
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn scope_ordering_is_name_then_version() {
        let mut scopes = vec![
            InstrumentationScope::builder("db").with_version("2").build(),
            InstrumentationScope::builder("db").with_version("1").build(),
            InstrumentationScope::builder("auth").build(),
        ];
        scopes.sort();
        assert_eq!(scopes[0].name(), "auth");
        assert_eq!(scopes[1].version(), Some("1"));
        assert_eq!(scopes[2].version(), Some("2"));
    }
}
