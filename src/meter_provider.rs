//! Configuration and entry point of the SDK.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{MetricError, MetricResult};
use crate::instrumentation::InstrumentationScope;
use crate::meter::{Meter, SdkMeter};
use crate::noop::NoopMeter;
use crate::pipeline::Pipelines;
use crate::reader::ManualReader;
use crate::resource::Resource;

/// Handles the creation of [Meter]s and coordinates their collection
/// through the configured readers.
///
/// Cloning a provider is cheap; all clones share the same pipelines.
///
/// # Example
///
/// ```
/// use metrics_sdk::{KeyValue, ManualReader, Resource, SdkMeterProvider};
///
/// let reader = ManualReader::builder().build();
/// let provider = SdkMeterProvider::builder()
///     .with_resource(Resource::builder().with_service_name("checkout").build())
///     .with_reader(reader.clone())
///     .build();
///
/// let meter = provider.meter("app");
/// let requests = meter.counter("requests").with_unit("1").build();
/// requests.add(1.0, &[KeyValue::new("route", "/pay")]);
///
/// let snapshot = reader.collect().expect("collection succeeds");
/// assert!(snapshot.errors.is_empty());
/// ```
#[derive(Clone)]
pub struct SdkMeterProvider {
    inner: Arc<SdkMeterProviderInner>,
}

struct SdkMeterProviderInner {
    pipes: Arc<Pipelines>,
    meters: Mutex<HashMap<InstrumentationScope, Meter>>,
    shutdown_invoked: AtomicBool,
}

impl SdkMeterProvider {
    /// Returns a builder for configuring a provider.
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Returns a [Meter] for the named instrumentation scope with no
    /// version.
    pub fn meter(&self, name: impl Into<Cow<'static, str>>) -> Meter {
        self.meter_with_scope(InstrumentationScope::builder(name).build())
    }

    /// Returns the [Meter] for the given instrumentation scope, creating it
    /// on first use. Equal scopes share one meter.
    pub fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        if self.inner.shutdown_invoked.load(Ordering::Relaxed) {
            tracing::warn!(
                scope = scope.name(),
                "meter requested after provider shutdown, returning a no-op meter"
            );
            return Meter::new(Arc::new(NoopMeter::new()));
        }

        match self.inner.meters.lock() {
            Ok(mut meters) => meters
                .entry(scope)
                .or_insert_with_key(|scope| {
                    Meter::new(Arc::new(SdkMeter::new(
                        scope.clone(),
                        Arc::clone(&self.inner.pipes),
                    )))
                })
                .clone(),
            Err(_) => Meter::new(Arc::new(NoopMeter::new())),
        }
    }

    /// Shuts down every configured reader; subsequent collections fail.
    ///
    /// Returns an error when invoked a second time.
    pub fn shutdown(&self) -> MetricResult<()> {
        if self.inner.shutdown_invoked.swap(true, Ordering::SeqCst) {
            return Err(MetricError::Other(
                "shutdown was already invoked on this provider".into(),
            ));
        }
        self.inner.pipes.shutdown()
    }
}

impl fmt::Debug for SdkMeterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkMeterProvider")
            .field(
                "shutdown_invoked",
                &self.inner.shutdown_invoked.load(Ordering::Relaxed),
            )
            .finish()
    }
}

/// Configuration options for a [SdkMeterProvider].
#[derive(Default, Debug)]
pub struct MeterProviderBuilder {
    resource: Option<Resource>,
    readers: Vec<ManualReader>,
}

impl MeterProviderBuilder {
    /// Associate a [Resource] with the provider.
    ///
    /// The resource identifies the producing process and is attached to
    /// every collected snapshot. Multiple calls overwrite previous ones.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Associate a reader with the provider. Each reader collects through
    /// its own pipeline with independent temporality state.
    pub fn with_reader(mut self, reader: ManualReader) -> Self {
        self.readers.push(reader);
        self
    }

    /// Construct the provider and register every reader's pipeline.
    pub fn build(self) -> SdkMeterProvider {
        SdkMeterProvider {
            inner: Arc::new(SdkMeterProviderInner {
                pipes: Arc::new(Pipelines::new(
                    self.resource.unwrap_or_default(),
                    self.readers,
                )),
                meters: Mutex::new(HashMap::new()),
                shutdown_invoked: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_scopes_share_one_meter_and_its_instruments() {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        let a = provider.meter_with_scope(
            InstrumentationScope::builder("http")
                .with_version("1.0")
                .build(),
        );
        let b = provider.meter_with_scope(
            InstrumentationScope::builder("http")
                .with_version("1.0")
                .build(),
        );

        a.counter("hits").build().add(1.0, &[]);
        b.counter("hits").build().add(2.0, &[]);

        let result = reader.collect().unwrap();
        let scope = &result.resource_metrics.scope_metrics[0];
        assert_eq!(scope.metrics.len(), 1);
        match &scope.metrics[0].points {
            crate::data::MetricPoints::Singular(points) => {
                assert_eq!(points.len(), 1);
                assert_eq!(points[0].value, 3.0);
            }
            other => panic!("unexpected points: {other:?}"),
        }
    }

    #[test]
    fn shutdown_is_rejected_twice() {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        assert!(provider.shutdown().is_ok());
        assert!(provider.shutdown().is_err());
    }
}
