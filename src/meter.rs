//! Handles the creation and coordination of all metric instruments.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::{MetricError, MetricResult};
use crate::instrument::InstrumentDescriptor;
use crate::instrumentation::InstrumentationScope;
use crate::instruments::{
    Callback, Counter, Histogram, HistogramBuilder, InstrumentBuilder, ObservableBuilder,
    ObservableCounter, ObservableGauge, ObservableUpDownCounter, ResolvedHistogramMeasures,
    ResolvedSumMeasures, UpDownCounter,
};
use crate::noop::NoopSyncInstrument;
use crate::pipeline::Pipelines;

// maximum length of instrument name
const INSTRUMENT_NAME_MAX_LENGTH: usize = 255;
// maximum length of instrument unit name
const INSTRUMENT_UNIT_NAME_MAX_LENGTH: usize = 63;
const INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS: [char; 4] = ['_', '.', '-', '/'];

// instrument validation error strings
pub(crate) const INSTRUMENT_NAME_EMPTY: &str = "instrument name must be non-empty";
pub(crate) const INSTRUMENT_NAME_LENGTH: &str =
    "instrument name must be less than 256 characters";
pub(crate) const INSTRUMENT_NAME_INVALID_CHAR: &str =
    "characters in instrument name must be ASCII and belong to the alphanumeric characters, '_', '.', '-' and '/'";
pub(crate) const INSTRUMENT_NAME_FIRST_ALPHABETIC: &str =
    "instrument name must start with an alphabetic character";
pub(crate) const INSTRUMENT_UNIT_LENGTH: &str =
    "instrument unit must be less than 64 characters";
pub(crate) const INSTRUMENT_UNIT_INVALID_CHAR: &str =
    "characters in instrument unit must be ASCII";

/// Default bucket boundaries applied when a histogram is built without
/// explicit ones.
const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// Provides access to instrument creation for a single instrumentation
/// scope.
///
/// Instrument creation never fails from the caller's perspective: an
/// invalid configuration is logged and yields a no-op instrument whose
/// measurements are silently dropped.
#[derive(Clone)]
pub struct Meter {
    pub(crate) instrument_provider: Arc<dyn InstrumentProvider>,
}

impl Meter {
    pub(crate) fn new(instrument_provider: Arc<dyn InstrumentProvider>) -> Self {
        Meter {
            instrument_provider,
        }
    }

    /// Creates a builder for a [Counter].
    pub fn counter(&self, name: impl Into<Cow<'static, str>>) -> InstrumentBuilder<'_, Counter> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [UpDownCounter].
    pub fn up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, UpDownCounter> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for a [Histogram].
    pub fn histogram(&self, name: impl Into<Cow<'static, str>>) -> HistogramBuilder<'_> {
        HistogramBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableCounter].
    pub fn observable_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> ObservableBuilder<'_, ObservableCounter> {
        ObservableBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableUpDownCounter].
    pub fn observable_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> ObservableBuilder<'_, ObservableUpDownCounter> {
        ObservableBuilder::new(self, name.into())
    }

    /// Creates a builder for an [ObservableGauge].
    pub fn observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> ObservableBuilder<'_, ObservableGauge> {
        ObservableBuilder::new(self, name.into())
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Meter")
    }
}

/// The instrument constructors a [Meter] dispatches to.
pub(crate) trait InstrumentProvider: Send + Sync {
    fn counter(&self, descriptor: InstrumentDescriptor) -> Counter;
    fn up_down_counter(&self, descriptor: InstrumentDescriptor) -> UpDownCounter;
    fn histogram(&self, descriptor: InstrumentDescriptor, boundaries: Option<Vec<f64>>)
        -> Histogram;
    fn observable_counter(
        &self,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<Callback>,
    ) -> ObservableCounter;
    fn observable_up_down_counter(
        &self,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<Callback>,
    ) -> ObservableUpDownCounter;
    fn observable_gauge(
        &self,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<Callback>,
    ) -> ObservableGauge;
}

/// The SDK-backed meter: registers every created instrument with the
/// pipeline of each configured reader.
pub(crate) struct SdkMeter {
    scope: InstrumentationScope,
    pipes: Arc<Pipelines>,
}

impl SdkMeter {
    pub(crate) fn new(scope: InstrumentationScope, pipes: Arc<Pipelines>) -> Self {
        SdkMeter { scope, pipes }
    }

    fn check(&self, descriptor: &InstrumentDescriptor) -> bool {
        match validate_instrument_config(descriptor.name(), descriptor.unit()) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    name = descriptor.name(),
                    error = %err,
                    "instrument creation failed, measurements will be dropped"
                );
                false
            }
        }
    }
}

impl InstrumentProvider for SdkMeter {
    fn counter(&self, descriptor: InstrumentDescriptor) -> Counter {
        if !self.check(&descriptor) {
            return Counter::new(Arc::new(NoopSyncInstrument::new()));
        }
        let mut measures = Vec::new();
        for pipe in self.pipes.iter() {
            match pipe.register_sum(&self.scope, &descriptor) {
                Ok(measure) => measures.push(measure),
                Err(err) => {
                    tracing::error!(name = descriptor.name(), error = %err, "instrument registration failed");
                    return Counter::new(Arc::new(NoopSyncInstrument::new()));
                }
            }
        }
        Counter::new(Arc::new(ResolvedSumMeasures { measures }))
    }

    fn up_down_counter(&self, descriptor: InstrumentDescriptor) -> UpDownCounter {
        if !self.check(&descriptor) {
            return UpDownCounter::new(Arc::new(NoopSyncInstrument::new()));
        }
        let mut measures = Vec::new();
        for pipe in self.pipes.iter() {
            match pipe.register_sum(&self.scope, &descriptor) {
                Ok(measure) => measures.push(measure),
                Err(err) => {
                    tracing::error!(name = descriptor.name(), error = %err, "instrument registration failed");
                    return UpDownCounter::new(Arc::new(NoopSyncInstrument::new()));
                }
            }
        }
        UpDownCounter::new(Arc::new(ResolvedSumMeasures { measures }))
    }

    fn histogram(
        &self,
        descriptor: InstrumentDescriptor,
        boundaries: Option<Vec<f64>>,
    ) -> Histogram {
        if !self.check(&descriptor) {
            return Histogram::new(Arc::new(NoopSyncInstrument::new()));
        }
        let bounds = boundaries.unwrap_or_else(|| DEFAULT_HISTOGRAM_BOUNDARIES.to_vec());
        if let Err(err) = validate_bucket_boundaries(&bounds) {
            tracing::error!(
                name = descriptor.name(),
                error = %err,
                "instrument creation failed, measurements will be dropped"
            );
            return Histogram::new(Arc::new(NoopSyncInstrument::new()));
        }
        let mut measures = Vec::new();
        for pipe in self.pipes.iter() {
            match pipe.register_histogram(&self.scope, &descriptor, &bounds) {
                Ok(measure) => measures.push(measure),
                Err(err) => {
                    tracing::error!(name = descriptor.name(), error = %err, "instrument registration failed");
                    return Histogram::new(Arc::new(NoopSyncInstrument::new()));
                }
            }
        }
        Histogram::new(Arc::new(ResolvedHistogramMeasures { measures }))
    }

    fn observable_counter(
        &self,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<Callback>,
    ) -> ObservableCounter {
        self.register_observable(&descriptor, callbacks);
        ObservableCounter::new(descriptor)
    }

    fn observable_up_down_counter(
        &self,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<Callback>,
    ) -> ObservableUpDownCounter {
        self.register_observable(&descriptor, callbacks);
        ObservableUpDownCounter::new(descriptor)
    }

    fn observable_gauge(
        &self,
        descriptor: InstrumentDescriptor,
        callbacks: Vec<Callback>,
    ) -> ObservableGauge {
        self.register_observable(&descriptor, callbacks);
        ObservableGauge::new(descriptor)
    }
}

impl SdkMeter {
    fn register_observable(&self, descriptor: &InstrumentDescriptor, callbacks: Vec<Callback>) {
        if !self.check(descriptor) {
            return;
        }
        for pipe in self.pipes.iter() {
            if let Err(err) = pipe.register_observable(&self.scope, descriptor, callbacks.clone()) {
                tracing::error!(name = descriptor.name(), error = %err, "instrument registration failed");
                return;
            }
        }
    }
}

pub(crate) fn validate_instrument_config(name: &str, unit: &str) -> MetricResult<()> {
    validate_instrument_name(name)?;
    validate_instrument_unit(unit)
}

fn validate_instrument_name(name: &str) -> MetricResult<()> {
    if name.is_empty() {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_EMPTY,
        ));
    }
    if name.len() > INSTRUMENT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_LENGTH,
        ));
    }
    if name.starts_with(|c: char| !c.is_ascii_alphabetic()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_FIRST_ALPHABETIC,
        ));
    }
    if name.contains(|c: char| {
        !c.is_ascii_alphanumeric() && !INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS.contains(&c)
    }) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_INVALID_CHAR,
        ));
    }
    Ok(())
}

fn validate_instrument_unit(unit: &str) -> MetricResult<()> {
    if unit.len() > INSTRUMENT_UNIT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_LENGTH,
        ));
    }
    if unit.contains(|c: char| !c.is_ascii()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_UNIT_INVALID_CHAR,
        ));
    }
    Ok(())
}

fn validate_bucket_boundaries(boundaries: &[f64]) -> MetricResult<()> {
    for boundary in boundaries {
        if boundary.is_nan() || boundary.is_infinite() {
            return Err(MetricError::InvalidInstrumentConfiguration(
                "bucket boundaries must not contain NaN, Infinity, or -Infinity",
            ));
        }
    }
    for i in 1..boundaries.len() {
        if boundaries[i] <= boundaries[i - 1] {
            return Err(MetricError::InvalidInstrumentConfiguration(
                "bucket boundaries must be sorted and not contain any duplicates",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_name_validation() {
        // (name, expected error)
        let instrument_name_test_cases = vec![
            ("validateName", ""),
            ("_startWithNoneAlphabet", INSTRUMENT_NAME_FIRST_ALPHABETIC),
            ("utf8char锈", INSTRUMENT_NAME_INVALID_CHAR),
            ("a".repeat(255).leak(), ""),
            ("a".repeat(256).leak(), INSTRUMENT_NAME_LENGTH),
            ("invalid name", INSTRUMENT_NAME_INVALID_CHAR),
            ("allow/slash", ""),
            ("allow_under_score", ""),
            ("allow.dots.ok", ""),
            ("", INSTRUMENT_NAME_EMPTY),
            ("\\allow\\slash /sec", INSTRUMENT_NAME_FIRST_ALPHABETIC),
            ("Total $ Count", INSTRUMENT_NAME_INVALID_CHAR),
            ("/not / allowed", INSTRUMENT_NAME_FIRST_ALPHABETIC),
        ];

        for (name, expected_error) in instrument_name_test_cases {
            let result = validate_instrument_name(name);
            if expected_error.is_empty() {
                assert!(
                    result.is_ok(),
                    "expected successful validation for name '{name}', got {:?}",
                    result.err()
                );
            } else {
                let err = result.err().unwrap();
                assert!(
                    matches!(
                        err,
                        MetricError::InvalidInstrumentConfiguration(msg) if msg == expected_error
                    ),
                    "for name '{name}', expected error '{expected_error}'"
                );
            }
        }
    }

    #[test]
    fn instrument_unit_validation() {
        // (unit, expected error)
        let instrument_unit_test_cases = vec![
            (
                "0123456789012345678901234567890123456789012345678901234567890123",
                INSTRUMENT_UNIT_LENGTH,
            ),
            ("utf8char锈", INSTRUMENT_UNIT_INVALID_CHAR),
            ("kb", ""),
            ("Kb/sec", ""),
            ("%", ""),
            ("", ""),
        ];

        for (unit, expected_error) in instrument_unit_test_cases {
            let result = validate_instrument_unit(unit);
            if expected_error.is_empty() {
                assert!(
                    result.is_ok(),
                    "expected successful validation for unit '{unit}', got {:?}",
                    result.err()
                );
            } else {
                let err = result.err().unwrap();
                assert!(
                    matches!(
                        err,
                        MetricError::InvalidInstrumentConfiguration(msg) if msg == expected_error
                    ),
                    "for unit '{unit}', expected error '{expected_error}'"
                );
            }
        }
    }

    #[test]
    fn bucket_boundary_validation() {
        assert!(validate_bucket_boundaries(&[1.0, 2.0, 5.0]).is_ok());
        assert!(validate_bucket_boundaries(&[]).is_ok());
        assert!(validate_bucket_boundaries(&[1.0, f64::NAN]).is_err());
        assert!(validate_bucket_boundaries(&[1.0, f64::INFINITY]).is_err());
        assert!(validate_bucket_boundaries(&[1.0, 5.0, 2.0]).is_err());
        assert!(validate_bucket_boundaries(&[1.0, 5.0, 5.0]).is_err());
    }
}
