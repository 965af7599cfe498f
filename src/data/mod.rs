//! Types for delivery of pre-aggregated metric time series data.
//!
//! One collection cycle produces a single [CollectionResult]: a
//! [ResourceMetrics] snapshot grouping every instrument's output by
//! instrumentation scope, plus the per-instrument faults captured while the
//! snapshot was assembled. Everything in this module is plain data, created
//! fresh each cycle by the pipeline and handed to the reader by value.

use std::time::SystemTime;

use crate::error::CollectionError;
use crate::instrument::InstrumentDescriptor;
use crate::instrumentation::InstrumentationScope;
use crate::resource::Resource;
use crate::temporality::Temporality;
use crate::KeyValue;

/// A single data point in a time series.
///
/// `start_time` and `end_time` delimit the window the value was aggregated
/// over: for cumulative temporality the start is fixed at instrument creation
/// for the instrument's lifetime, for delta temporality it is the end of the
/// previous collection window. `start_time <= end_time` always holds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataPoint<V> {
    /// The start of the aggregation window.
    pub start_time: SystemTime,
    /// The time the value was collected.
    pub end_time: SystemTime,
    /// The set of key value pairs that uniquely identify the time series.
    /// Keys are unique within one point.
    pub attributes: Vec<KeyValue>,
    /// The aggregated value over the window.
    pub value: V,
}

/// Summary of a distribution of recorded values over explicit bucket
/// boundaries.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HistogramValue {
    /// The number of values recorded in the window.
    pub count: u64,
    /// The sum of the values recorded.
    pub sum: f64,
    /// The minimum value recorded in the window, if any value was.
    pub min: Option<f64>,
    /// The maximum value recorded in the window, if any value was.
    pub max: Option<f64>,
    /// The upper bounds of the buckets.
    ///
    /// Because the last boundary is +infinity it is implied, so
    /// `bucket_counts` always has one more entry than `bounds`.
    pub bounds: Vec<f64>,
    /// The count of each of the buckets.
    pub bucket_counts: Vec<u64>,
}

impl HistogramValue {
    /// Checks the structural constraints every histogram value must satisfy:
    /// one more bucket than boundaries, and bucket counts summing to `count`.
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_counts.len() != self.bounds.len() + 1 {
            return Err(format!(
                "expected {} bucket counts for {} boundaries, found {}",
                self.bounds.len() + 1,
                self.bounds.len(),
                self.bucket_counts.len()
            ));
        }
        let total: u64 = self.bucket_counts.iter().sum();
        if total != self.count {
            return Err(format!(
                "bucket counts sum to {total} but count is {}",
                self.count
            ));
        }
        Ok(())
    }
}

/// A set of bucket counts, encoded in a contiguous array of counts.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ExponentialBucket {
    /// The bucket index of the first entry in the `counts` vec.
    pub offset: i32,
    /// A vec where `counts[i]` carries the count of the bucket at index
    /// `offset + i`.
    pub counts: Vec<u64>,
}

/// Summary of a distribution of recorded values over exponentially sized
/// buckets.
///
/// No built-in instrument produces this shape; it exists so externally
/// produced data can flow through the same grouping and export path.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ExponentialHistogramValue {
    /// The number of values recorded in the window.
    pub count: u64,
    /// The sum of the values recorded.
    pub sum: f64,
    /// The minimum value recorded in the window, if any value was.
    pub min: Option<f64>,
    /// The maximum value recorded in the window, if any value was.
    pub max: Option<f64>,
    /// Describes the resolution of the histogram: boundaries are located at
    /// powers of the base, where `base = 2 ^ (2 ^ -scale)`.
    pub scale: i8,
    /// The number of values rounded to zero.
    pub zero_count: u64,
    /// The range of positive value bucket counts.
    pub positive: ExponentialBucket,
    /// The range of negative value bucket counts.
    pub negative: ExponentialBucket,
}

impl ExponentialHistogramValue {
    /// Checks that the zero, positive, and negative bucket counts sum to
    /// `count`.
    pub fn validate(&self) -> Result<(), String> {
        let total: u64 = self.zero_count
            + self.positive.counts.iter().sum::<u64>()
            + self.negative.counts.iter().sum::<u64>();
        if total != self.count {
            return Err(format!(
                "bucket counts sum to {total} but count is {}",
                self.count
            ));
        }
        Ok(())
    }
}

/// The type of point data an instrument reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DataPointType {
    /// A single numeric value per point.
    Singular,
    /// A bucketed distribution summary per point.
    Histogram,
    /// A distribution summary with exponentially scaled buckets per point.
    ExponentialHistogram,
}

/// The data points of one instrument for one collection cycle, tagged by
/// point type.
///
/// The element type of each variant matches its tag, so an exporter can
/// match once and handle every point uniformly.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MetricPoints {
    /// Points carrying one numeric value each.
    Singular(Vec<DataPoint<f64>>),
    /// Points carrying a bucketed distribution summary each.
    Histogram(Vec<DataPoint<HistogramValue>>),
    /// Points carrying an exponentially bucketed distribution summary each.
    ExponentialHistogram(Vec<DataPoint<ExponentialHistogramValue>>),
}

impl MetricPoints {
    /// The point type tag of this sequence.
    pub fn point_type(&self) -> DataPointType {
        match self {
            MetricPoints::Singular(_) => DataPointType::Singular,
            MetricPoints::Histogram(_) => DataPointType::Histogram,
            MetricPoints::ExponentialHistogram(_) => DataPointType::ExponentialHistogram,
        }
    }

    /// Number of data points in the sequence.
    pub fn len(&self) -> usize {
        match self {
            MetricPoints::Singular(points) => points.len(),
            MetricPoints::Histogram(points) => points.len(),
            MetricPoints::ExponentialHistogram(points) => points.len(),
        }
    }

    /// Whether the sequence holds no points.
    ///
    /// An instrument with no recorded measurements yields an empty sequence,
    /// not an omitted entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks the window ordering of every point and the structural
    /// constraints of every histogram value.
    pub(crate) fn validate(&self) -> Result<(), String> {
        fn windows<V>(points: &[DataPoint<V>]) -> Result<(), String> {
            for point in points {
                if point.start_time > point.end_time {
                    return Err("data point start time is after its end time".into());
                }
            }
            Ok(())
        }

        match self {
            MetricPoints::Singular(points) => windows(points),
            MetricPoints::Histogram(points) => {
                windows(points)?;
                points.iter().try_for_each(|p| p.value.validate())
            }
            MetricPoints::ExponentialHistogram(points) => {
                windows(points)?;
                points.iter().try_for_each(|p| p.value.validate())
            }
        }
    }
}

/// A collection of one or more aggregated time series from an instrument.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MetricData {
    /// The identity of the instrument that created this data.
    pub descriptor: InstrumentDescriptor,
    /// Describes if the aggregation is reported as the change from the last
    /// report time, or the cumulative changes since a fixed start time.
    pub temporality: Temporality,
    /// The aggregated data points, tagged by point type.
    pub points: MetricPoints,
}

/// A collection of metrics produced by instruments sharing one
/// [InstrumentationScope].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScopeMetrics {
    /// The scope the instruments were created under.
    pub scope: InstrumentationScope,
    /// The list of aggregations created by those instruments.
    pub metrics: Vec<MetricData>,
}

/// A collection of [ScopeMetrics] and the associated [Resource] that created
/// them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ResourceMetrics {
    /// The entity that collected the metrics.
    pub resource: Resource,
    /// The collection of metrics with unique scopes, in stable scope order.
    pub scope_metrics: Vec<ScopeMetrics>,
}

/// The outcome of one collection cycle.
///
/// If any instrument's collection fails, its fault is recorded here and the
/// successfully collected metrics of every other instrument are still
/// returned. An empty `errors` sequence indicates a fully clean cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CollectionResult {
    /// The collected metrics.
    pub resource_metrics: ResourceMetrics,
    /// Faults captured per instrument while collecting.
    pub errors: Vec<CollectionError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;

    fn histogram(bounds: Vec<f64>, bucket_counts: Vec<u64>, count: u64) -> HistogramValue {
        HistogramValue {
            count,
            sum: 10.0,
            min: Some(1.0),
            max: Some(9.0),
            bounds,
            bucket_counts,
        }
    }

    #[test]
    fn histogram_bucket_layout_is_checked() {
        assert!(histogram(vec![5.0], vec![1, 1], 2).validate().is_ok());
        assert!(histogram(vec![5.0], vec![1], 1).validate().is_err());
        assert!(histogram(vec![5.0], vec![1, 1, 1], 3).validate().is_err());
    }

    #[test]
    fn histogram_count_must_match_buckets() {
        assert!(histogram(vec![5.0], vec![1, 1], 3).validate().is_err());
    }

    #[test]
    fn exponential_histogram_count_must_match_buckets() {
        let mut value = ExponentialHistogramValue {
            count: 4,
            sum: 7.5,
            min: Some(0.5),
            max: Some(4.0),
            scale: 0,
            zero_count: 1,
            positive: ExponentialBucket {
                offset: 0,
                counts: vec![2, 1],
            },
            negative: ExponentialBucket {
                offset: 0,
                counts: vec![],
            },
        };
        assert!(value.validate().is_ok());

        value.count = 5;
        assert!(value.validate().is_err());
    }

    #[test]
    fn point_windows_are_ordered() {
        let now = time::now();
        let later = now + std::time::Duration::from_secs(1);

        let ordered = MetricPoints::Singular(vec![DataPoint {
            start_time: now,
            end_time: later,
            attributes: vec![],
            value: 1.0,
        }]);
        assert!(ordered.validate().is_ok());

        let inverted = MetricPoints::Singular(vec![DataPoint {
            start_time: later,
            end_time: now,
            attributes: vec![],
            value: 1.0,
        }]);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn point_type_matches_variant() {
        assert_eq!(
            MetricPoints::Singular(vec![]).point_type(),
            DataPointType::Singular
        );
        assert_eq!(
            MetricPoints::Histogram(vec![]).point_type(),
            DataPointType::Histogram
        );
        assert_eq!(
            MetricPoints::ExponentialHistogram(vec![]).point_type(),
            DataPointType::ExponentialHistogram
        );
    }
}
