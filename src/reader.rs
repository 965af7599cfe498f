//! Interfaces for reading metrics on demand.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::data::{CollectionResult, ResourceMetrics, ScopeMetrics};
use crate::error::{CollectionError, MetricError, MetricResult};
use crate::pipeline::Pipeline;
use crate::temporality::Temporality;

/// Produces metrics from a source outside the SDK's own instruments, merged
/// into the snapshot of the reader it is registered with.
pub trait MetricProducer: Send + Sync {
    /// Returns the aggregated metrics of one collection cycle.
    fn produce(&self) -> MetricResult<ScopeMetrics>;
}

/// A reader that collects metrics on demand.
///
/// Collection calls on one reader serialize: a cycle must finish before the
/// next one starts. Cloning is cheap and every clone drives the same
/// pipeline, so a reader can be handed to the provider and kept for
/// collecting.
///
/// # Example
///
/// ```
/// use metrics_sdk::{ManualReader, Temporality};
///
/// let reader = ManualReader::builder()
///     .with_temporality(Temporality::Delta)
///     .build();
/// # drop(reader)
/// ```
#[derive(Clone)]
pub struct ManualReader {
    inner: Arc<ManualReaderInner>,
}

struct ManualReaderInner {
    temporality: Option<Temporality>,
    callback_timeout: Option<Duration>,
    state: Mutex<ManualReaderState>,
}

#[derive(Default)]
struct ManualReaderState {
    pipeline: Option<Weak<Pipeline>>,
    is_shutdown: bool,
    producers: Vec<Box<dyn MetricProducer>>,
}

impl Default for ManualReader {
    fn default() -> Self {
        ManualReader::builder().build()
    }
}

impl fmt::Debug for ManualReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ManualReader")
    }
}

impl ManualReader {
    /// Configuration for this reader.
    pub fn builder() -> ManualReaderBuilder {
        ManualReaderBuilder::default()
    }

    /// The temporality this reader asks instruments to report with, if it
    /// overrides their per-kind preference.
    pub(crate) fn temporality(&self) -> Option<Temporality> {
        self.inner.temporality
    }

    /// The bound applied around each observable callback invocation.
    pub(crate) fn callback_timeout(&self) -> Option<Duration> {
        self.inner.callback_timeout
    }

    /// Register the pipeline this reader collects from. Only the first
    /// registration takes effect.
    pub(crate) fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        let _ = self.inner.state.lock().map(|mut state| {
            if state.pipeline.is_none() {
                state.pipeline = Some(pipeline);
            } else {
                tracing::warn!(
                    "duplicate reader registration, did not register manual reader"
                );
            }
        });
    }

    /// Registers an external [MetricProducer] whose output is merged into
    /// every collected snapshot.
    pub fn register_producer(&self, producer: Box<dyn MetricProducer>) {
        let _ = self.inner.state.lock().map(|mut state| {
            if !state.is_shutdown {
                state.producers.push(producer);
            }
        });
    }

    /// Runs one collection cycle and returns its snapshot.
    ///
    /// All registered instruments are read, invoking any observable
    /// callbacks; individual instrument faults are returned inside the
    /// [CollectionResult] while the rest of the snapshot stays intact.
    /// Returns an error if called after shutdown, before registration with a
    /// provider, or when the registry itself is corrupted.
    pub fn collect(&self) -> MetricResult<CollectionResult> {
        // Holding the state lock for the full cycle serializes collections
        // on this reader.
        let state = self.inner.state.lock()?;
        if state.is_shutdown {
            return Err(MetricError::Other("reader is shut down".into()));
        }
        let pipeline = state
            .pipeline
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                MetricError::Other("reader is not registered with a meter provider".into())
            })?;

        let mut result = pipeline.produce()?;
        for producer in &state.producers {
            match producer.produce() {
                Ok(scope_metrics) => {
                    merge_scope(&mut result.resource_metrics, &mut result.errors, scope_metrics)?
                }
                Err(err) => result.errors.push(CollectionError::ExternalProducer {
                    message: err.to_string(),
                }),
            }
        }

        result
            .resource_metrics
            .scope_metrics
            .sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(result)
    }

    /// Stops this reader; any later call to `collect` returns an error.
    pub fn shutdown(&self) -> MetricResult<()> {
        let mut state = self.inner.state.lock()?;
        state.pipeline = None;
        state.is_shutdown = true;
        state.producers = Vec::new();
        Ok(())
    }
}

/// Merges one externally produced [ScopeMetrics] into the snapshot.
///
/// Equal scope keys merge into the existing entry rather than duplicate;
/// metrics violating the data model are dropped with a recorded fault, and
/// a duplicate instrument identity within one scope is structural.
fn merge_scope(
    resource_metrics: &mut ResourceMetrics,
    errors: &mut Vec<CollectionError>,
    produced: ScopeMetrics,
) -> MetricResult<()> {
    let ScopeMetrics { scope, metrics } = produced;

    let mut incoming = Vec::with_capacity(metrics.len());
    for metric in metrics {
        if let Err(reason) = metric.points.validate() {
            errors.push(CollectionError::InvalidMeasurement {
                descriptor: metric.descriptor.clone(),
                reason,
            });
            continue;
        }
        incoming.push(metric);
    }

    match resource_metrics
        .scope_metrics
        .iter_mut()
        .find(|existing| existing.scope == scope)
    {
        Some(existing) => {
            for metric in incoming {
                let identity = metric.descriptor.identity();
                if existing
                    .metrics
                    .iter()
                    .any(|m| m.descriptor.identity() == identity)
                {
                    return Err(MetricError::Structural(format!(
                        "duplicate instrument identity `{}` within scope `{}`",
                        metric.descriptor,
                        scope.name()
                    )));
                }
                existing.metrics.push(metric);
            }
        }
        None => {
            let mut seen = HashSet::with_capacity(incoming.len());
            for metric in &incoming {
                if !seen.insert(metric.descriptor.identity()) {
                    return Err(MetricError::Structural(format!(
                        "duplicate instrument identity `{}` within scope `{}`",
                        metric.descriptor,
                        scope.name()
                    )));
                }
            }
            resource_metrics.scope_metrics.push(ScopeMetrics {
                scope,
                metrics: incoming,
            });
        }
    }
    Ok(())
}

/// Configuration for a [ManualReader].
#[derive(Default, Debug)]
pub struct ManualReaderBuilder {
    temporality: Option<Temporality>,
    callback_timeout: Option<Duration>,
}

impl ManualReaderBuilder {
    /// New manual builder configuration.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the [Temporality] instruments report with, overriding their
    /// per-kind preference.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = Some(temporality);
        self
    }

    /// Bounds each observable callback invocation; exceeding the bound is
    /// reported as a fault of the owning instrument.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = Some(timeout);
        self
    }

    /// Create a new [ManualReader] from this configuration.
    pub fn build(self) -> ManualReader {
        ManualReader {
            inner: Arc::new(ManualReaderInner {
                temporality: self.temporality,
                callback_timeout: self.callback_timeout,
                state: Mutex::new(ManualReaderState::default()),
            }),
        }
    }
}
