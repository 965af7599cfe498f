//! Public instrument handles and their builders.
//!
//! Synchronous instruments ([Counter], [UpDownCounter], [Histogram]) record
//! measurements on the code path being measured. Observable instruments
//! report through callbacks that run inside each collection cycle; an
//! [Observer] is handed to every callback to receive its observations.

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::instrument::{InstrumentDescriptor, InstrumentKind};
use crate::internal::histogram::HistogramAccumulator;
use crate::internal::sum::SumAccumulator;
use crate::internal::{AttributeSet, ValueMap};
use crate::meter::Meter;
use crate::KeyValue;

/// The error type observable callbacks may fail with.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An observable callback, shared between the pipelines it reports to.
pub(crate) type Callback =
    Arc<dyn Fn(&Observer) -> Result<(), CallbackError> + Send + Sync + 'static>;

/// The measuring half of a synchronous instrument.
pub(crate) trait SyncInstrument: Send + Sync {
    fn measure(&self, value: f64, attributes: &[KeyValue]);
}

/// An instrument that records monotonically increasing values.
#[derive(Clone)]
pub struct Counter(Arc<dyn SyncInstrument>);

impl Counter {
    pub(crate) fn new(inner: Arc<dyn SyncInstrument>) -> Self {
        Counter(inner)
    }

    /// Records an increment to the counter.
    ///
    /// Negative or non-finite values are rejected and surface as an invalid
    /// measurement fault on the next collection.
    pub fn add(&self, value: f64, attributes: &[KeyValue]) {
        self.0.measure(value, attributes)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Counter")
    }
}

/// An instrument that records increasing or decreasing values.
#[derive(Clone)]
pub struct UpDownCounter(Arc<dyn SyncInstrument>);

impl UpDownCounter {
    pub(crate) fn new(inner: Arc<dyn SyncInstrument>) -> Self {
        UpDownCounter(inner)
    }

    /// Records a positive or negative change to the counter.
    pub fn add(&self, value: f64, attributes: &[KeyValue]) {
        self.0.measure(value, attributes)
    }
}

impl fmt::Debug for UpDownCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpDownCounter")
    }
}

/// An instrument that records a distribution of values.
#[derive(Clone)]
pub struct Histogram(Arc<dyn SyncInstrument>);

impl Histogram {
    pub(crate) fn new(inner: Arc<dyn SyncInstrument>) -> Self {
        Histogram(inner)
    }

    /// Adds a value to the distribution.
    pub fn record(&self, value: f64, attributes: &[KeyValue]) {
        self.0.measure(value, attributes)
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Histogram")
    }
}

macro_rules! observable_handle {
    ($(#[$doc:meta] $name:ident,)+) => {
        $(
            #[$doc]
            ///
            /// Values are reported by the callbacks registered at build time;
            /// the handle itself only carries the instrument's identity.
            #[derive(Clone, Debug)]
            pub struct $name {
                descriptor: InstrumentDescriptor,
            }

            impl $name {
                pub(crate) fn new(descriptor: InstrumentDescriptor) -> Self {
                    $name { descriptor }
                }

                /// The identity this instrument was registered with.
                pub fn descriptor(&self) -> &InstrumentDescriptor {
                    &self.descriptor
                }
            }
        )+
    };
}

observable_handle!(
    /// An instrument observing monotonically increasing values.
    ObservableCounter,
    /// An instrument observing increasing or decreasing values.
    ObservableUpDownCounter,
    /// An instrument observing a current value.
    ObservableGauge,
);

/// Receives the observations of one observable callback invocation.
///
/// Observations are scoped to the collection cycle that invoked the
/// callback; within one cycle the last observation per attribute set wins.
pub struct Observer {
    observed: Mutex<ValueMap<f64>>,
    invalid: Mutex<Option<String>>,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Observer {
            observed: Mutex::new(ValueMap::new()),
            invalid: Mutex::new(None),
        }
    }

    /// Records the current value for the given attribute set.
    ///
    /// Non-finite values are rejected and surface as an invalid measurement
    /// fault for the cycle.
    pub fn observe(&self, value: f64, attributes: &[KeyValue]) {
        if !value.is_finite() {
            if let Ok(mut invalid) = self.invalid.lock() {
                invalid.get_or_insert_with(|| format!("observed non-finite value {value}"));
            }
            return;
        }
        if let Ok(mut observed) = self.observed.lock() {
            observed.insert(attributes, value);
        }
    }

    /// Discards observations from the previous cycle.
    pub(crate) fn reset(&self) {
        if let Ok(mut observed) = self.observed.lock() {
            observed.clear();
        }
        if let Ok(mut invalid) = self.invalid.lock() {
            invalid.take();
        }
    }

    pub(crate) fn take_invalid(&self) -> Option<String> {
        self.invalid.lock().ok().and_then(|mut invalid| invalid.take())
    }

    pub(crate) fn snapshot(&self) -> Vec<(AttributeSet, f64)> {
        self.observed
            .lock()
            .map(|observed| observed.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Observer")
    }
}

/// Fans a synchronous measurement out to the accumulator of every
/// registered reader's pipeline.
pub(crate) struct ResolvedSumMeasures {
    pub(crate) measures: Vec<Arc<SumAccumulator>>,
}

impl SyncInstrument for ResolvedSumMeasures {
    fn measure(&self, value: f64, attributes: &[KeyValue]) {
        for measure in &self.measures {
            measure.measure(value, attributes);
        }
    }
}

pub(crate) struct ResolvedHistogramMeasures {
    pub(crate) measures: Vec<Arc<HistogramAccumulator>>,
}

impl SyncInstrument for ResolvedHistogramMeasures {
    fn measure(&self, value: f64, attributes: &[KeyValue]) {
        for measure in &self.measures {
            measure.measure(value, attributes);
        }
    }
}

/// Configuration for building a synchronous additive instrument.
#[derive(Debug)]
pub struct InstrumentBuilder<'a, T> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    _marker: PhantomData<T>,
}

impl<'a, T> InstrumentBuilder<'a, T> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        InstrumentBuilder {
            meter,
            name,
            description: Cow::Borrowed(""),
            unit: Cow::Borrowed(""),
            _marker: PhantomData,
        }
    }

    /// Set the description of this instrument.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the unit of this instrument.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    fn descriptor(&self, kind: InstrumentKind) -> InstrumentDescriptor {
        InstrumentDescriptor::new(
            self.name.clone(),
            kind,
            self.unit.clone(),
            self.description.clone(),
        )
    }
}

impl InstrumentBuilder<'_, Counter> {
    /// Creates the counter, registering it with every reader's pipeline.
    pub fn build(self) -> Counter {
        let descriptor = self.descriptor(InstrumentKind::Counter);
        self.meter.instrument_provider.counter(descriptor)
    }
}

impl InstrumentBuilder<'_, UpDownCounter> {
    /// Creates the up-down counter, registering it with every reader's
    /// pipeline.
    pub fn build(self) -> UpDownCounter {
        let descriptor = self.descriptor(InstrumentKind::UpDownCounter);
        self.meter.instrument_provider.up_down_counter(descriptor)
    }
}

/// Configuration for building a [Histogram].
#[derive(Debug)]
pub struct HistogramBuilder<'a> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    boundaries: Option<Vec<f64>>,
}

impl<'a> HistogramBuilder<'a> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        HistogramBuilder {
            meter,
            name,
            description: Cow::Borrowed(""),
            unit: Cow::Borrowed(""),
            boundaries: None,
        }
    }

    /// Set the description of this instrument.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the unit of this instrument.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the explicit bucket boundaries, overriding the defaults.
    ///
    /// Boundaries must be finite, sorted, and free of duplicates.
    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.boundaries = Some(boundaries);
        self
    }

    /// Creates the histogram, registering it with every reader's pipeline.
    pub fn build(self) -> Histogram {
        let descriptor = InstrumentDescriptor::new(
            self.name,
            InstrumentKind::Histogram,
            self.unit,
            self.description,
        );
        self.meter
            .instrument_provider
            .histogram(descriptor, self.boundaries)
    }
}

/// Configuration for building an observable instrument.
pub struct ObservableBuilder<'a, T> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    callbacks: Vec<Callback>,
    _marker: PhantomData<T>,
}

impl<'a, T> ObservableBuilder<'a, T> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        ObservableBuilder {
            meter,
            name,
            description: Cow::Borrowed(""),
            unit: Cow::Borrowed(""),
            callbacks: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Set the description of this instrument.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the unit of this instrument.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Register a callback invoked on every collection cycle.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Observer) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    fn descriptor(&self, kind: InstrumentKind) -> InstrumentDescriptor {
        InstrumentDescriptor::new(
            self.name.clone(),
            kind,
            self.unit.clone(),
            self.description.clone(),
        )
    }
}

impl<T> fmt::Debug for ObservableBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableBuilder")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl ObservableBuilder<'_, ObservableCounter> {
    /// Creates the observable counter, registering it and its callbacks with
    /// every reader's pipeline.
    pub fn build(self) -> ObservableCounter {
        let descriptor = self.descriptor(InstrumentKind::ObservableCounter);
        self.meter
            .instrument_provider
            .observable_counter(descriptor, self.callbacks)
    }
}

impl ObservableBuilder<'_, ObservableUpDownCounter> {
    /// Creates the observable up-down counter, registering it and its
    /// callbacks with every reader's pipeline.
    pub fn build(self) -> ObservableUpDownCounter {
        let descriptor = self.descriptor(InstrumentKind::ObservableUpDownCounter);
        self.meter
            .instrument_provider
            .observable_up_down_counter(descriptor, self.callbacks)
    }
}

impl ObservableBuilder<'_, ObservableGauge> {
    /// Creates the observable gauge, registering it and its callbacks with
    /// every reader's pipeline.
    pub fn build(self) -> ObservableGauge {
        let descriptor = self.descriptor(InstrumentKind::ObservableGauge);
        self.meter
            .instrument_provider
            .observable_gauge(descriptor, self.callbacks)
    }
}
