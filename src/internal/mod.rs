//! Internal aggregation state shared by the built-in instruments.

pub(crate) mod histogram;
pub(crate) mod observable;
pub(crate) mod sum;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::mem::discriminant;
use std::time::Duration;

use crate::error::CollectionError;
use crate::instrument::InstrumentDescriptor;
use crate::{Array, KeyValue, Value};

/// A fault raised while collecting one instrument, before it is attributed
/// to the instrument's descriptor by the pipeline.
#[derive(Debug)]
pub(crate) enum InstrumentFault {
    Callback { message: String },
    CallbackTimeout { timeout: Duration },
    InvalidMeasurement { reason: String },
    NonMonotonic { previous: f64, current: f64 },
}

impl InstrumentFault {
    pub(crate) fn attribute_to(self, descriptor: &InstrumentDescriptor) -> CollectionError {
        let descriptor = descriptor.clone();
        match self {
            InstrumentFault::Callback { message } => CollectionError::Callback {
                descriptor,
                message,
            },
            InstrumentFault::CallbackTimeout { timeout } => CollectionError::CallbackTimeout {
                descriptor,
                timeout,
            },
            InstrumentFault::InvalidMeasurement { reason } => CollectionError::InvalidMeasurement {
                descriptor,
                reason,
            },
            InstrumentFault::NonMonotonic { previous, current } => CollectionError::NonMonotonic {
                descriptor,
                previous,
                current,
            },
        }
    }
}

/// An attribute set as used to key one time series: deduplicated by key with
/// the last write winning, and stably ordered so equal sets compare equal
/// regardless of the order measurements supplied them in.
#[derive(Clone, Debug)]
pub(crate) struct AttributeSet(Vec<KeyValue>);

impl AttributeSet {
    pub(crate) fn new(attributes: &[KeyValue]) -> Self {
        let mut deduped: Vec<KeyValue> = Vec::with_capacity(attributes.len());
        for kv in attributes {
            match deduped.iter_mut().find(|existing| existing.key == kv.key) {
                Some(existing) => existing.value = kv.value.clone(),
                None => deduped.push(kv.clone()),
            }
        }
        deduped.sort_by(|a, b| a.key.cmp(&b.key));
        AttributeSet(deduped)
    }

    pub(crate) fn to_vec(&self) -> Vec<KeyValue> {
        self.0.clone()
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.key == b.key && value_eq(&a.value, &b.value))
    }
}

impl Eq for AttributeSet {}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for kv in &self.0 {
            kv.key.hash(state);
            hash_value(&kv.value, state);
        }
    }
}

// Floats are compared and hashed by bit pattern so an attribute set can act
// as a map key.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
        (Value::Array(Array::F64(a)), Value::Array(Array::F64(b))) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(a, b)| a.to_bits() == b.to_bits())
        }
        _ => a == b,
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    discriminant(value).hash(state);
    match value {
        Value::Bool(v) => v.hash(state),
        Value::I64(v) => v.hash(state),
        Value::F64(v) => v.to_bits().hash(state),
        Value::String(v) => v.hash(state),
        Value::Array(array) => {
            discriminant(array).hash(state);
            match array {
                Array::Bool(values) => values.hash(state),
                Array::I64(values) => values.hash(state),
                Array::F64(values) => {
                    for v in values {
                        v.to_bits().hash(state);
                    }
                }
                Array::String(values) => values.hash(state),
            }
        }
    }
}

/// Values keyed by attribute set, preserving first-recorded order so data
/// points come out in the order their time series appeared.
#[derive(Debug, Default)]
pub(crate) struct ValueMap<V> {
    index: HashMap<AttributeSet, usize>,
    entries: Vec<(AttributeSet, V)>,
}

impl<V> ValueMap<V> {
    pub(crate) fn new() -> Self {
        ValueMap {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Applies `apply` to the value under `attributes`, initializing it with
    /// `init` first if the set is new.
    pub(crate) fn update(
        &mut self,
        attributes: &[KeyValue],
        init: impl FnOnce() -> V,
        apply: impl FnOnce(&mut V),
    ) {
        let key = AttributeSet::new(attributes);
        let i = match self.index.get(&key) {
            Some(i) => *i,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, init()));
                self.entries.len() - 1
            }
        };
        apply(&mut self.entries[i].1);
    }

    /// Replaces the value under `attributes`, the last write winning.
    pub(crate) fn insert(&mut self, attributes: &[KeyValue], value: V) {
        let key = AttributeSet::new(attributes);
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &(AttributeSet, V)> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_sets_ignore_order_and_keep_last_duplicate() {
        let a = AttributeSet::new(&[
            KeyValue::new("method", "GET"),
            KeyValue::new("route", "/old"),
            KeyValue::new("route", "/new"),
        ]);
        let b = AttributeSet::new(&[
            KeyValue::new("route", "/new"),
            KeyValue::new("method", "GET"),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.to_vec().len(), 2);
    }

    #[test]
    fn value_map_preserves_first_recorded_order() {
        let mut map = ValueMap::new();
        map.update(&[KeyValue::new("c", 1i64)], || 0.0, |v| *v += 1.0);
        map.update(&[KeyValue::new("a", 1i64)], || 0.0, |v| *v += 1.0);
        map.update(&[KeyValue::new("c", 1i64)], || 0.0, |v| *v += 1.0);

        let values: Vec<f64> = map.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2.0, 1.0]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn float_attributes_key_by_bit_pattern() {
        let mut map = ValueMap::new();
        map.insert(&[KeyValue::new("ratio", 0.5f64)], 1.0);
        map.insert(&[KeyValue::new("ratio", 0.5f64)], 2.0);
        assert_eq!(map.len(), 1);
        assert_eq!(map.iter().next().map(|(_, v)| *v), Some(2.0));
    }
}
