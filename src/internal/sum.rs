//! Arithmetic sum aggregation for synchronous additive instruments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::data::{DataPoint, MetricPoints};
use crate::internal::{AttributeSet, InstrumentFault, ValueMap};
use crate::temporality::Temporality;
use crate::time;
use crate::KeyValue;

/// Summarizes a set of measurements made as their arithmetic sum.
///
/// The running totals since instrument creation are the only state mutated
/// by measurements; delta output is derived by subtracting the totals
/// reported by the previous successful cycle, and that baseline moves only
/// at the exact point of a successful report.
pub(crate) struct SumAccumulator {
    temporality: Temporality,
    monotonic: bool,
    start: Mutex<SystemTime>,
    values: Mutex<ValueMap<f64>>,
    reported: Mutex<HashMap<AttributeSet, f64>>,
    invalid: Mutex<Option<String>>,
}

impl SumAccumulator {
    pub(crate) fn new(temporality: Temporality, monotonic: bool) -> Self {
        SumAccumulator {
            temporality,
            monotonic,
            start: Mutex::new(time::now()),
            values: Mutex::new(ValueMap::new()),
            reported: Mutex::new(HashMap::new()),
            invalid: Mutex::new(None),
        }
    }

    pub(crate) fn measure(&self, value: f64, attributes: &[KeyValue]) {
        if !value.is_finite() {
            self.mark_invalid(format!("recorded non-finite value {value}"));
            return;
        }
        if self.monotonic && value < 0.0 {
            self.mark_invalid(format!(
                "recorded negative value {value} on a monotonic instrument"
            ));
            return;
        }
        if let Ok(mut values) = self.values.lock() {
            values.update(attributes, || 0.0, |total| *total += value);
        }
    }

    fn mark_invalid(&self, reason: String) {
        tracing::warn!(reason = reason.as_str(), "measurement dropped");
        if let Ok(mut invalid) = self.invalid.lock() {
            invalid.get_or_insert(reason);
        }
    }

    pub(crate) fn produce(&self, end_time: SystemTime) -> Result<MetricPoints, InstrumentFault> {
        if let Some(reason) = self.invalid.lock().ok().and_then(|mut i| i.take()) {
            return Err(InstrumentFault::InvalidMeasurement { reason });
        }

        let values = self.values.lock().map_err(poisoned)?;
        let mut start = self.start.lock().map_err(poisoned)?;
        let prev_start = *start;
        let end_time = end_time.max(prev_start);
        let mut points = Vec::with_capacity(values.len());

        match self.temporality {
            Temporality::Cumulative => {
                for (attributes, total) in values.iter() {
                    points.push(DataPoint {
                        start_time: prev_start,
                        end_time,
                        attributes: attributes.to_vec(),
                        value: *total,
                    });
                }
            }
            Temporality::Delta => {
                let mut reported = self.reported.lock().map_err(poisoned)?;
                for (attributes, total) in values.iter() {
                    let previous = reported.get(attributes).copied();
                    let delta = total - previous.unwrap_or(0.0);
                    if delta == 0.0 && previous.is_some() {
                        continue;
                    }
                    points.push(DataPoint {
                        start_time: prev_start,
                        end_time,
                        attributes: attributes.to_vec(),
                        value: delta,
                    });
                }
                // The new baseline and window are committed only on the
                // successful return below.
                for (attributes, total) in values.iter() {
                    reported.insert(attributes.clone(), *total);
                }
                *start = end_time;
            }
        }

        Ok(MetricPoints::Singular(points))
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

    #[test]
    fn cumulative_totals_survive_re_reads() {
        let sum = SumAccumulator::new(Temporality::Cumulative, true);
        sum.measure(5.0, &[]);
        sum.measure(3.0, &[]);

        let first = sum.produce(time::now()).unwrap();
        let second = sum.produce(time::now()).unwrap();
        for points in [first, second] {
            match points {
                MetricPoints::Singular(points) => {
                    assert_eq!(points.len(), 1);
                    assert_eq!(points[0].value, 8.0);
                }
                other => panic!("unexpected points: {other:?}"),
            }
        }
    }

    #[test]
    fn delta_windows_drain_and_sum_to_cumulative_total() {
        let sum = SumAccumulator::new(Temporality::Delta, true);
        sum.measure(5.0, &[]);

        let first = match sum.produce(time::now()).unwrap() {
            MetricPoints::Singular(points) => points[0].value,
            other => panic!("unexpected points: {other:?}"),
        };
        sum.measure(2.0, &[]);
        let second = match sum.produce(time::now()).unwrap() {
            MetricPoints::Singular(points) => points[0].value,
            other => panic!("unexpected points: {other:?}"),
        };
        assert_eq!(first, 5.0);
        assert_eq!(second, 2.0);
        assert_eq!(first + second, 7.0);

        // An idle window produces no points at all.
        match sum.produce(time::now()).unwrap() {
            MetricPoints::Singular(points) => assert!(points.is_empty()),
            other => panic!("unexpected points: {other:?}"),
        }
    }

    #[test]
    fn negative_add_on_monotonic_sum_is_a_fault_once() {
        let sum = SumAccumulator::new(Temporality::Cumulative, true);
        sum.measure(2.0, &[]);
        sum.measure(-1.0, &[]);

        assert!(matches!(
            sum.produce(time::now()),
            Err(InstrumentFault::InvalidMeasurement { .. })
        ));

        // The dropped measurement does not poison the running total and the
        // fault is reported for a single cycle only.
        match sum.produce(time::now()).unwrap() {
            MetricPoints::Singular(points) => assert_eq!(points[0].value, 2.0),
            other => panic!("unexpected points: {other:?}"),
        }
    }
}
