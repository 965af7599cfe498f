//! Explicit-bucket histogram aggregation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::data::{DataPoint, HistogramValue, MetricPoints};
use crate::internal::{AttributeSet, InstrumentFault, ValueMap};
use crate::temporality::Temporality;
use crate::time;
use crate::KeyValue;

/// Running distribution state for one attribute set, covering the
/// instrument's whole lifetime.
#[derive(Clone, Debug)]
struct HistogramCell {
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramCell {
    fn new(buckets: usize) -> Self {
        HistogramCell {
            bucket_counts: vec![0; buckets],
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

/// The distribution state last reported for one attribute set, used to
/// derive the next delta window.
#[derive(Clone, Debug)]
struct ReportedCell {
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

/// Summarizes a set of measurements as a histogram with explicitly defined
/// buckets.
///
/// Delta output subtracts the previously reported distribution per bucket
/// and per count/sum; min and max under delta come from window-local
/// extrema, which reset together with the baseline on successful report.
pub(crate) struct HistogramAccumulator {
    temporality: Temporality,
    bounds: Vec<f64>,
    start: Mutex<SystemTime>,
    cells: Mutex<ValueMap<HistogramCell>>,
    window_extrema: Mutex<HashMap<AttributeSet, (f64, f64)>>,
    reported: Mutex<HashMap<AttributeSet, ReportedCell>>,
    invalid: Mutex<Option<String>>,
}

impl HistogramAccumulator {
    pub(crate) fn new(temporality: Temporality, bounds: Vec<f64>) -> Self {
        HistogramAccumulator {
            temporality,
            bounds,
            start: Mutex::new(time::now()),
            cells: Mutex::new(ValueMap::new()),
            window_extrema: Mutex::new(HashMap::new()),
            reported: Mutex::new(HashMap::new()),
            invalid: Mutex::new(None),
        }
    }

    pub(crate) fn measure(&self, value: f64, attributes: &[KeyValue]) {
        if !value.is_finite() {
            tracing::warn!(value, "non-finite histogram measurement dropped");
            if let Ok(mut invalid) = self.invalid.lock() {
                invalid.get_or_insert_with(|| format!("recorded non-finite value {value}"));
            }
            return;
        }

        // Values greater than every boundary land in the implied +infinity
        // bucket at the end.
        let index = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());

        if let Ok(mut cells) = self.cells.lock() {
            cells.update(
                attributes,
                || HistogramCell::new(self.bounds.len() + 1),
                |cell| {
                    cell.bucket_counts[index] += 1;
                    cell.count += 1;
                    cell.sum += value;
                    cell.min = cell.min.min(value);
                    cell.max = cell.max.max(value);
                },
            );
        }
        if let Ok(mut extrema) = self.window_extrema.lock() {
            let entry = extrema
                .entry(AttributeSet::new(attributes))
                .or_insert((f64::INFINITY, f64::NEG_INFINITY));
            entry.0 = entry.0.min(value);
            entry.1 = entry.1.max(value);
        }
    }

    pub(crate) fn produce(&self, end_time: SystemTime) -> Result<MetricPoints, InstrumentFault> {
        if let Some(reason) = self.invalid.lock().ok().and_then(|mut i| i.take()) {
            return Err(InstrumentFault::InvalidMeasurement { reason });
        }

        let cells = self.cells.lock().map_err(poisoned)?;
        let mut start = self.start.lock().map_err(poisoned)?;
        let prev_start = *start;
        let end_time = end_time.max(prev_start);
        let mut points = Vec::with_capacity(cells.len());

        match self.temporality {
            Temporality::Cumulative => {
                for (attributes, cell) in cells.iter() {
                    points.push(DataPoint {
                        start_time: prev_start,
                        end_time,
                        attributes: attributes.to_vec(),
                        value: HistogramValue {
                            count: cell.count,
                            sum: cell.sum,
                            min: (cell.count > 0).then_some(cell.min),
                            max: (cell.count > 0).then_some(cell.max),
                            bounds: self.bounds.clone(),
                            bucket_counts: cell.bucket_counts.clone(),
                        },
                    });
                }
            }
            Temporality::Delta => {
                let mut reported = self.reported.lock().map_err(poisoned)?;
                let mut extrema = self.window_extrema.lock().map_err(poisoned)?;
                for (attributes, cell) in cells.iter() {
                    let previous = reported.get(attributes);
                    let delta_count = cell.count - previous.map_or(0, |r| r.count);
                    // Attribute sets with no new observations this window are
                    // omitted from the delta output.
                    if delta_count == 0 && previous.is_some() {
                        continue;
                    }
                    let bucket_counts = match previous {
                        Some(previous) => cell
                            .bucket_counts
                            .iter()
                            .zip(previous.bucket_counts.iter())
                            .map(|(current, prior)| current - prior)
                            .collect(),
                        None => cell.bucket_counts.clone(),
                    };
                    let (min, max) = match extrema.get(attributes) {
                        Some((min, max)) => (Some(*min), Some(*max)),
                        None => (None, None),
                    };
                    points.push(DataPoint {
                        start_time: prev_start,
                        end_time,
                        attributes: attributes.to_vec(),
                        value: HistogramValue {
                            count: delta_count,
                            sum: cell.sum - previous.map_or(0.0, |r| r.sum),
                            min,
                            max,
                            bounds: self.bounds.clone(),
                            bucket_counts,
                        },
                    });
                }
                // Committed only on the successful return below.
                for (attributes, cell) in cells.iter() {
                    reported.insert(
                        attributes.clone(),
                        ReportedCell {
                            bucket_counts: cell.bucket_counts.clone(),
                            count: cell.count,
                            sum: cell.sum,
                        },
                    );
                }
                extrema.clear();
                *start = end_time;
            }
        }

        Ok(MetricPoints::Histogram(points))
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> InstrumentFault {
    InstrumentFault::InvalidMeasurement {
        reason: format!("instrument state lock poisoned: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unwrap_histogram(points: MetricPoints) -> Vec<DataPoint<HistogramValue>> {
        match points {
            MetricPoints::Histogram(points) => points,
            other => panic!("unexpected points: {other:?}"),
        }
    }

    #[test]
    fn cumulative_distribution_obeys_bucket_invariants() {
        let histogram = HistogramAccumulator::new(Temporality::Cumulative, vec![1.0, 5.0]);
        for value in [0.5, 3.0, 7.0, 4.0] {
            histogram.measure(value, &[]);
        }

        let points = unwrap_histogram(histogram.produce(time::now()).unwrap());
        assert_eq!(points.len(), 1);
        let value = &points[0].value;
        assert!(value.validate().is_ok());
        assert_eq!(value.count, 4);
        assert_eq!(value.bucket_counts, vec![1, 2, 1]);
        assert_eq!(value.sum, 14.5);
        assert_eq!(value.min, Some(0.5));
        assert_eq!(value.max, Some(7.0));
    }

    #[test]
    fn boundary_values_fall_in_the_lower_bucket() {
        let histogram = HistogramAccumulator::new(Temporality::Cumulative, vec![1.0, 5.0]);
        histogram.measure(1.0, &[]);
        histogram.measure(5.0, &[]);

        let points = unwrap_histogram(histogram.produce(time::now()).unwrap());
        assert_eq!(points[0].value.bucket_counts, vec![1, 1, 0]);
    }

    #[test]
    fn delta_windows_track_their_own_extrema() {
        let histogram = HistogramAccumulator::new(Temporality::Delta, vec![10.0]);
        histogram.measure(9.0, &[]);
        histogram.measure(2.0, &[]);

        let first = unwrap_histogram(histogram.produce(time::now()).unwrap());
        assert_eq!(first[0].value.count, 2);
        assert_eq!(first[0].value.min, Some(2.0));
        assert_eq!(first[0].value.max, Some(9.0));

        histogram.measure(5.0, &[]);
        let second = unwrap_histogram(histogram.produce(time::now()).unwrap());
        assert_eq!(second[0].value.count, 1);
        assert_eq!(second[0].value.sum, 5.0);
        assert_eq!(second[0].value.min, Some(5.0));
        assert_eq!(second[0].value.max, Some(5.0));
        assert!(second[0].value.validate().is_ok());

        // No new observations: the attribute set is omitted entirely.
        let third = unwrap_histogram(histogram.produce(time::now()).unwrap());
        assert!(third.is_empty());
    }
}
