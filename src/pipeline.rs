//! Connects instruments to the reader and assembles collection results.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::data::{CollectionResult, MetricData, ResourceMetrics, ScopeMetrics};
use crate::error::{MetricError, MetricResult};
use crate::instrument::{InstrumentDescriptor, InstrumentId};
use crate::instrumentation::InstrumentationScope;
use crate::instruments::Callback;
use crate::internal::histogram::HistogramAccumulator;
use crate::internal::observable::{ObservableProducer, ObservableSemantics};
use crate::internal::sum::SumAccumulator;
use crate::internal::InstrumentFault;
use crate::reader::ManualReader;
use crate::resource::Resource;
use crate::temporality::Temporality;
use crate::time;
use crate::InstrumentKind;

/// Connects all of the instruments created by a meter provider to one
/// reader.
///
/// Instruments register here as they are created; one collection cycle walks
/// the registry in stable scope order and produces a single
/// [CollectionResult].
pub(crate) struct Pipeline {
    resource: Resource,
    reader: ManualReader,
    temporality_override: Option<Temporality>,
    callback_timeout: Option<Duration>,
    inner: Mutex<PipelineInner>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pipeline")
    }
}

#[derive(Default)]
struct PipelineInner {
    scopes: BTreeMap<InstrumentationScope, Vec<InstrumentSync>>,
}

/// A synchronization point between the pipeline and one instrument's
/// aggregation state.
struct InstrumentSync {
    id: InstrumentId,
    descriptor: InstrumentDescriptor,
    temporality: Temporality,
    producer: ProducerHandle,
}

/// The closed set of aggregation states an instrument can collect from.
enum ProducerHandle {
    Sum(Arc<SumAccumulator>),
    Histogram(Arc<HistogramAccumulator>),
    Observable(Arc<ObservableProducer>),
}

impl Pipeline {
    fn resolve(&self, descriptor: &InstrumentDescriptor) -> Temporality {
        descriptor
            .kind()
            .resolve_temporality(self.temporality_override)
    }

    /// Registers a sum-aggregated instrument, reusing the accumulator of an
    /// identical registration.
    pub(crate) fn register_sum(
        &self,
        scope: &InstrumentationScope,
        descriptor: &InstrumentDescriptor,
    ) -> MetricResult<Arc<SumAccumulator>> {
        let mut inner = self.inner.lock()?;
        let instruments = inner.scopes.entry(scope.clone()).or_default();
        let id = descriptor.identity();

        if let Some(existing) = instruments.iter().find(|sync| sync.id == id) {
            return match &existing.producer {
                ProducerHandle::Sum(accumulator) => Ok(Arc::clone(accumulator)),
                _ => Err(MetricError::Config(format!(
                    "instrument `{descriptor}` is already registered with a different aggregation"
                ))),
            };
        }
        log_conflict(instruments, &id);

        let temporality = self.resolve(descriptor);
        let accumulator = Arc::new(SumAccumulator::new(
            temporality,
            descriptor.kind().is_monotonic(),
        ));
        tracing::debug!(name = descriptor.name(), "instrument created");
        instruments.push(InstrumentSync {
            id,
            descriptor: descriptor.clone(),
            temporality,
            producer: ProducerHandle::Sum(Arc::clone(&accumulator)),
        });
        Ok(accumulator)
    }

    /// Registers a histogram instrument, reusing the accumulator of an
    /// identical registration.
    pub(crate) fn register_histogram(
        &self,
        scope: &InstrumentationScope,
        descriptor: &InstrumentDescriptor,
        bounds: &[f64],
    ) -> MetricResult<Arc<HistogramAccumulator>> {
        let mut inner = self.inner.lock()?;
        let instruments = inner.scopes.entry(scope.clone()).or_default();
        let id = descriptor.identity();

        if let Some(existing) = instruments.iter().find(|sync| sync.id == id) {
            return match &existing.producer {
                ProducerHandle::Histogram(accumulator) => Ok(Arc::clone(accumulator)),
                _ => Err(MetricError::Config(format!(
                    "instrument `{descriptor}` is already registered with a different aggregation"
                ))),
            };
        }
        log_conflict(instruments, &id);

        let temporality = self.resolve(descriptor);
        let accumulator = Arc::new(HistogramAccumulator::new(temporality, bounds.to_vec()));
        tracing::debug!(name = descriptor.name(), "instrument created");
        instruments.push(InstrumentSync {
            id,
            descriptor: descriptor.clone(),
            temporality,
            producer: ProducerHandle::Histogram(Arc::clone(&accumulator)),
        });
        Ok(accumulator)
    }

    /// Registers an observable instrument and its callbacks. Creating an
    /// identical observable twice merges the callback lists.
    pub(crate) fn register_observable(
        &self,
        scope: &InstrumentationScope,
        descriptor: &InstrumentDescriptor,
        callbacks: Vec<Callback>,
    ) -> MetricResult<()> {
        let mut inner = self.inner.lock()?;
        let instruments = inner.scopes.entry(scope.clone()).or_default();
        let id = descriptor.identity();

        if let Some(existing) = instruments.iter().find(|sync| sync.id == id) {
            return match &existing.producer {
                ProducerHandle::Observable(producer) => {
                    producer.add_callbacks(callbacks);
                    Ok(())
                }
                _ => Err(MetricError::Config(format!(
                    "instrument `{descriptor}` is already registered with a different aggregation"
                ))),
            };
        }
        log_conflict(instruments, &id);

        debug_assert!(descriptor.kind().is_observable());
        let semantics = match descriptor.kind() {
            InstrumentKind::ObservableCounter => ObservableSemantics::MonotonicSum,
            InstrumentKind::ObservableUpDownCounter => ObservableSemantics::Sum,
            _ => ObservableSemantics::Gauge,
        };
        let temporality = self.resolve(descriptor);
        let producer = Arc::new(ObservableProducer::new(
            semantics,
            temporality,
            self.callback_timeout,
            callbacks,
        ));
        tracing::debug!(name = descriptor.name(), "instrument created");
        instruments.push(InstrumentSync {
            id,
            descriptor: descriptor.clone(),
            temporality,
            producer: ProducerHandle::Observable(producer),
        });
        Ok(())
    }

    /// Assembles the metrics of a single collection cycle.
    ///
    /// Faults of individual instruments are captured in the result's error
    /// sequence; only a violated registry invariant aborts the cycle.
    pub(crate) fn produce(&self) -> MetricResult<CollectionResult> {
        let inner = self.inner.lock()?;
        let end_time = time::now();
        let mut errors = Vec::new();
        let mut scope_metrics = Vec::with_capacity(inner.scopes.len());

        for (scope, instruments) in inner.scopes.iter() {
            let mut seen = HashSet::with_capacity(instruments.len());
            for sync in instruments {
                if !seen.insert(&sync.id) {
                    return Err(MetricError::Structural(format!(
                        "duplicate instrument identity `{}` within scope `{}`",
                        sync.descriptor,
                        scope.name()
                    )));
                }
            }

            let mut metrics = Vec::with_capacity(instruments.len());
            for sync in instruments {
                let produced = match &sync.producer {
                    ProducerHandle::Sum(accumulator) => accumulator.produce(end_time),
                    ProducerHandle::Histogram(accumulator) => accumulator.produce(end_time),
                    ProducerHandle::Observable(producer) => producer.produce(end_time),
                };
                match produced {
                    Ok(points) => {
                        if let Err(reason) = points.validate() {
                            errors.push(
                                InstrumentFault::InvalidMeasurement { reason }
                                    .attribute_to(&sync.descriptor),
                            );
                            continue;
                        }
                        metrics.push(MetricData {
                            descriptor: sync.descriptor.clone(),
                            temporality: sync.temporality,
                            points,
                        });
                    }
                    Err(fault) => {
                        let error = fault.attribute_to(&sync.descriptor);
                        tracing::debug!(error = %error, "instrument collection fault recorded");
                        errors.push(error);
                    }
                }
            }
            scope_metrics.push(ScopeMetrics {
                scope: scope.clone(),
                metrics,
            });
        }

        Ok(CollectionResult {
            resource_metrics: ResourceMetrics {
                resource: self.resource.clone(),
                scope_metrics,
            },
            errors,
        })
    }
}

fn log_conflict(instruments: &[InstrumentSync], id: &InstrumentId) {
    if let Some(existing) = instruments
        .iter()
        .find(|sync| sync.id.name == id.name && sync.id != *id)
    {
        tracing::warn!(
            name = id.name.as_ref(),
            existing_kind = ?existing.id.kind,
            requested_kind = ?id.kind,
            "duplicate metric stream definitions"
        );
    }
}

/// The group of pipelines connecting readers with instrument measurement.
#[derive(Clone, Debug)]
pub(crate) struct Pipelines(Vec<Arc<Pipeline>>);

impl Pipelines {
    pub(crate) fn new(resource: Resource, readers: Vec<ManualReader>) -> Self {
        let mut pipes = Vec::with_capacity(readers.len());
        for reader in readers {
            let pipe = Arc::new(Pipeline {
                resource: resource.clone(),
                temporality_override: reader.temporality(),
                callback_timeout: reader.callback_timeout(),
                reader,
                inner: Mutex::new(PipelineInner::default()),
            });
            pipe.reader.register_pipeline(Arc::downgrade(&pipe));
            pipes.push(pipe);
        }
        Pipelines(pipes)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Pipeline>> {
        self.0.iter()
    }

    /// Shut down every reader attached to these pipelines.
    pub(crate) fn shutdown(&self) -> MetricResult<()> {
        let mut errs = Vec::new();
        for pipe in &self.0 {
            if let Err(err) = pipe.reader.shutdown() {
                errs.push(err);
            }
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(MetricError::Other(format!("{errs:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &'static str) -> InstrumentDescriptor {
        InstrumentDescriptor::new(name.into(), InstrumentKind::Counter, "1".into(), "".into())
    }

    #[test]
    fn duplicate_identity_in_registry_aborts_the_cycle() {
        let reader = ManualReader::builder().build();
        let pipelines = Pipelines::new(Resource::empty(), vec![reader]);
        let pipeline = pipelines.iter().next().unwrap();
        let scope = InstrumentationScope::builder("corrupted").build();

        // Bypass registration dedup to corrupt the registry the way a buggy
        // caller of the internals could.
        {
            let mut inner = pipeline.inner.lock().unwrap();
            let instruments = inner.scopes.entry(scope).or_default();
            for _ in 0..2 {
                let descriptor = descriptor("requests");
                instruments.push(InstrumentSync {
                    id: descriptor.identity(),
                    temporality: Temporality::Cumulative,
                    producer: ProducerHandle::Sum(Arc::new(SumAccumulator::new(
                        Temporality::Cumulative,
                        true,
                    ))),
                    descriptor,
                });
            }
        }

        assert!(matches!(
            pipeline.produce(),
            Err(MetricError::Structural(_))
        ));
    }

    #[test]
    fn identical_registrations_share_one_accumulator() {
        let reader = ManualReader::builder().build();
        let pipelines = Pipelines::new(Resource::empty(), vec![reader]);
        let pipeline = pipelines.iter().next().unwrap();
        let scope = InstrumentationScope::builder("app").build();

        let first = pipeline.register_sum(&scope, &descriptor("requests")).unwrap();
        let second = pipeline.register_sum(&scope, &descriptor("requests")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let result = pipeline.produce().unwrap();
        assert_eq!(result.resource_metrics.scope_metrics[0].metrics.len(), 1);
    }

    #[test]
    fn same_name_different_kind_registers_separately() {
        let reader = ManualReader::builder().build();
        let pipelines = Pipelines::new(Resource::empty(), vec![reader]);
        let pipeline = pipelines.iter().next().unwrap();
        let scope = InstrumentationScope::builder("app").build();

        pipeline.register_sum(&scope, &descriptor("latency")).unwrap();
        // Same name and unit under a different kind is a distinct identity
        // and registers alongside, not in place of, the counter.
        let histogram = InstrumentDescriptor::new(
            "latency".into(),
            InstrumentKind::Histogram,
            "1".into(),
            "".into(),
        );
        assert!(pipeline
            .register_histogram(&scope, &histogram, &[1.0, 2.0])
            .is_ok());

        let result = pipeline.produce().unwrap();
        assert_eq!(result.resource_metrics.scope_metrics[0].metrics.len(), 2);
    }
}
