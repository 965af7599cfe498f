//! Error types of the collection pipeline.
//!
//! Two failure classes exist. [MetricError] is fatal to an operation: the
//! shape of a result can no longer be trusted (structural corruption) or a
//! configuration is unusable. [CollectionError] is per-instrument data: a
//! single instrument's collection failed, the fault is carried in the
//! [CollectionResult] next to the metrics of every other instrument.
//!
//! [CollectionResult]: crate::data::CollectionResult

use std::result;
use std::sync::PoisonError;
use std::time::Duration;

use thiserror::Error;

use crate::instrument::InstrumentDescriptor;

/// A specialized `Result` type for metric operations.
pub type MetricResult<T> = result::Result<T, MetricError>;

/// Errors that fail a whole operation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricError {
    /// A registry or grouping invariant was violated; the collection cycle is
    /// aborted because the result shape cannot be trusted.
    #[error("Structural error: {0}")]
    Structural(String),
    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),
    /// Invalid instrument configuration such as invalid instrument name,
    /// invalid instrument description or invalid instrument unit.
    #[error("Invalid instrument configuration: {0}")]
    InvalidInstrumentConfiguration(&'static str),
    /// Other errors not covered by specific cases.
    #[error("Metrics error: {0}")]
    Other(String),
}

impl<T> From<PoisonError<T>> for MetricError {
    fn from(err: PoisonError<T>) -> Self {
        MetricError::Structural(err.to_string())
    }
}

/// A fault raised by a single instrument during one collection cycle.
///
/// Carried in the `errors` sequence of a collection result; the snapshot
/// still contains the data of every instrument that collected cleanly.
#[derive(Error, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum CollectionError {
    /// An observable callback returned an error or panicked.
    #[error("observable callback failed for instrument `{descriptor}`: {message}")]
    Callback {
        /// The instrument whose callback failed.
        descriptor: InstrumentDescriptor,
        /// Description of the underlying cause.
        message: String,
    },
    /// An observable callback did not complete within the configured bound.
    #[error("observable callback for instrument `{descriptor}` timed out after {timeout:?}")]
    CallbackTimeout {
        /// The instrument whose callback timed out.
        descriptor: InstrumentDescriptor,
        /// The configured bound.
        timeout: Duration,
    },
    /// A recorded or produced value violated a data model constraint.
    #[error("invalid measurement on instrument `{descriptor}`: {reason}")]
    InvalidMeasurement {
        /// The instrument that carried the invalid value.
        descriptor: InstrumentDescriptor,
        /// Which constraint was violated.
        reason: String,
    },
    /// A cumulative reading decreased on an instrument that only increases.
    #[error(
        "non-monotonic reading on instrument `{descriptor}`: previous {previous}, current {current}"
    )]
    NonMonotonic {
        /// The offending instrument.
        descriptor: InstrumentDescriptor,
        /// The last successfully reported cumulative value.
        previous: f64,
        /// The decreased reading observed this cycle.
        current: f64,
    },
    /// An externally registered metric producer failed to produce.
    #[error("external metric producer failed: {message}")]
    ExternalProducer {
        /// Description of the underlying cause.
        message: String,
    },
}

impl CollectionError {
    /// The descriptor of the instrument this fault is attributed to, if any.
    pub fn descriptor(&self) -> Option<&InstrumentDescriptor> {
        match self {
            CollectionError::Callback { descriptor, .. }
            | CollectionError::CallbackTimeout { descriptor, .. }
            | CollectionError::InvalidMeasurement { descriptor, .. }
            | CollectionError::NonMonotonic { descriptor, .. } => Some(descriptor),
            CollectionError::ExternalProducer { .. } => None,
        }
    }
}
