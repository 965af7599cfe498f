//! A metrics collection and aggregation SDK.
//!
//! Instruments record raw measurements; on demand, a reader turns them into
//! a structured snapshot of time series data grouped by instrumentation
//! scope under one resource. A faulty instrument (for example an observable
//! callback that fails) never takes down a cycle: its fault is returned
//! next to the successfully collected metrics of every other instrument.
//!
//! ## Getting started
//!
//! ```
//! use metrics_sdk::{KeyValue, ManualReader, Resource, SdkMeterProvider};
//!
//! // Configure a provider with the identity of this process and a reader
//! // to collect through.
//! let reader = ManualReader::builder().build();
//! let provider = SdkMeterProvider::builder()
//!     .with_resource(Resource::builder().with_service_name("checkout").build())
//!     .with_reader(reader.clone())
//!     .build();
//!
//! // Create instruments scoped to a meter.
//! let meter = provider.meter("app");
//! let requests = meter.counter("requests").with_unit("1").build();
//!
//! // Record measurements on the hot path.
//! requests.add(1.0, &[KeyValue::new("route", "/pay")]);
//!
//! // Collect a snapshot whenever the reader wants one.
//! let snapshot = reader.collect().expect("collection succeeds");
//! assert!(snapshot.errors.is_empty());
//! assert_eq!(snapshot.resource_metrics.scope_metrics.len(), 1);
//! ```
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]

pub mod data;

mod common;
mod error;
mod instrument;
mod instrumentation;
mod instruments;
mod internal;
mod meter;
mod meter_provider;
mod noop;
mod pipeline;
mod reader;
mod resource;
mod temporality;
mod time;

pub use common::{Array, Key, KeyValue, StringValue, Value};
pub use error::{CollectionError, MetricError, MetricResult};
pub use instrument::{InstrumentDescriptor, InstrumentKind};
pub use instrumentation::{InstrumentationScope, InstrumentationScopeBuilder};
pub use instruments::{
    CallbackError, Counter, Histogram, HistogramBuilder, InstrumentBuilder, ObservableBuilder,
    ObservableCounter, ObservableGauge, ObservableUpDownCounter, Observer, UpDownCounter,
};
pub use meter::Meter;
pub use meter_provider::{MeterProviderBuilder, SdkMeterProvider};
pub use noop::NoopMeterProvider;
pub use reader::{ManualReader, ManualReaderBuilder, MetricProducer};
pub use resource::{Resource, ResourceBuilder};
pub use temporality::Temporality;
