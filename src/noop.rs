//! No-op implementations of the instrument surface.
//!
//! Used when metrics should be disabled without changing instrumentation
//! code: every handle accepts measurements and drops them, observable
//! callbacks are never invoked, and nothing is ever registered with a
//! pipeline. A stateless [NoopMeterProvider] is trivially constructible
//! wherever one is needed; no global instance exists.

use std::borrow::Cow;
use std::sync::Arc;

use crate::instrument::InstrumentDescriptor;
use crate::instrumentation::InstrumentationScope;
use crate::instruments::{
    Callback, Counter, Histogram, ObservableCounter, ObservableGauge, ObservableUpDownCounter,
    SyncInstrument, UpDownCounter,
};
use crate::meter::{InstrumentProvider, Meter};
use crate::KeyValue;

/// A meter provider whose meters produce no telemetry.
#[derive(Debug, Default, Clone)]
pub struct NoopMeterProvider {
    _private: (),
}

impl NoopMeterProvider {
    /// Create a new no-op meter provider.
    pub fn new() -> Self {
        NoopMeterProvider { _private: () }
    }

    /// Returns a no-op [Meter] for the named scope.
    pub fn meter(&self, name: impl Into<Cow<'static, str>>) -> Meter {
        self.meter_with_scope(InstrumentationScope::builder(name).build())
    }

    /// Returns a no-op [Meter] for the given scope.
    pub fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
        Meter::new(Arc::new(NoopMeter::new()))
    }
}

/// A no-op instance of a `Meter`.
#[derive(Debug, Default)]
pub(crate) struct NoopMeter {
    _private: (),
}

impl NoopMeter {
    pub(crate) fn new() -> Self {
        NoopMeter { _private: () }
    }
}

impl InstrumentProvider for NoopMeter {
    fn counter(&self, _descriptor: InstrumentDescriptor) -> Counter {
        Counter::new(Arc::new(NoopSyncInstrument::new()))
    }

    fn up_down_counter(&self, _descriptor: InstrumentDescriptor) -> UpDownCounter {
        UpDownCounter::new(Arc::new(NoopSyncInstrument::new()))
    }

    fn histogram(
        &self,
        _descriptor: InstrumentDescriptor,
        _boundaries: Option<Vec<f64>>,
    ) -> Histogram {
        Histogram::new(Arc::new(NoopSyncInstrument::new()))
    }

    fn observable_counter(
        &self,
        descriptor: InstrumentDescriptor,
        _callbacks: Vec<Callback>,
    ) -> ObservableCounter {
        ObservableCounter::new(descriptor)
    }

    fn observable_up_down_counter(
        &self,
        descriptor: InstrumentDescriptor,
        _callbacks: Vec<Callback>,
    ) -> ObservableUpDownCounter {
        ObservableUpDownCounter::new(descriptor)
    }

    fn observable_gauge(
        &self,
        descriptor: InstrumentDescriptor,
        _callbacks: Vec<Callback>,
    ) -> ObservableGauge {
        ObservableGauge::new(descriptor)
    }
}

/// A no-op sync instrument.
#[derive(Debug, Default)]
pub(crate) struct NoopSyncInstrument {
    _private: (),
}

impl NoopSyncInstrument {
    pub(crate) fn new() -> Self {
        NoopSyncInstrument { _private: () }
    }
}

impl SyncInstrument for NoopSyncInstrument {
    fn measure(&self, _value: f64, _attributes: &[KeyValue]) {
        // Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_instruments_accept_measurements_without_effect() {
        let meter = NoopMeterProvider::new().meter("disabled");

        let counter = meter.counter("requests").build();
        counter.add(1.0, &[KeyValue::new("route", "/")]);

        let histogram = meter.histogram("latency").build();
        histogram.record(0.25, &[]);

        let gauge = meter
            .observable_gauge("temperature")
            .with_callback(|observer| {
                observer.observe(21.5, &[]);
                Ok(())
            })
            .build();
        assert_eq!(gauge.descriptor().name(), "temperature");
    }
}
