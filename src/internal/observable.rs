//! Callback-driven aggregation for observable instruments.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::data::{DataPoint, MetricPoints};
use crate::instruments::{Callback, Observer};
use crate::internal::{AttributeSet, InstrumentFault};
use crate::temporality::Temporality;
use crate::time;

/// How the readings of an observable instrument are interpreted.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ObservableSemantics {
    /// Readings are cumulative totals that may only increase.
    MonotonicSum,
    /// Readings are cumulative totals that may move in both directions.
    Sum,
    /// Readings are current values, reported as observed.
    Gauge,
}

/// Runs an instrument's callbacks inside the collection cycle and derives
/// data points from what they observed.
///
/// The previously reported readings are the baseline for delta output and
/// for monotonicity checks; like the window start, they advance only at the
/// exact point of a successful report, so a faulted cycle leaves the next
/// one a clean re-read.
pub(crate) struct ObservableProducer {
    semantics: ObservableSemantics,
    temporality: Temporality,
    callback_timeout: Option<Duration>,
    observer: Arc<Observer>,
    callbacks: Mutex<Vec<Callback>>,
    start: Mutex<SystemTime>,
    reported: Mutex<HashMap<AttributeSet, f64>>,
}

impl ObservableProducer {
    pub(crate) fn new(
        semantics: ObservableSemantics,
        temporality: Temporality,
        callback_timeout: Option<Duration>,
        callbacks: Vec<Callback>,
    ) -> Self {
        ObservableProducer {
            semantics,
            temporality,
            callback_timeout,
            observer: Arc::new(Observer::new()),
            callbacks: Mutex::new(callbacks),
            start: Mutex::new(time::now()),
            reported: Mutex::new(HashMap::new()),
        }
    }

    /// Adds callbacks to an already registered instrument, as happens when
    /// an identical observable is created twice.
    pub(crate) fn add_callbacks(&self, callbacks: Vec<Callback>) {
        if let Ok(mut existing) = self.callbacks.lock() {
            existing.extend(callbacks);
        }
    }

    pub(crate) fn produce(&self, end_time: SystemTime) -> Result<MetricPoints, InstrumentFault> {
        self.observer.reset();

        let callbacks: Vec<Callback> = self.callbacks.lock().map_err(poisoned)?.clone();
        for callback in &callbacks {
            run_callback(callback, &self.observer, self.callback_timeout)?;
        }
        if let Some(reason) = self.observer.take_invalid() {
            return Err(InstrumentFault::InvalidMeasurement { reason });
        }

        let observed = self.observer.snapshot();
        let mut start = self.start.lock().map_err(poisoned)?;
        let mut reported = self.reported.lock().map_err(poisoned)?;
        let prev_start = *start;
        let end_time = end_time.max(prev_start);
        let mut points = Vec::with_capacity(observed.len());

        for (attributes, value) in &observed {
            if matches!(self.semantics, ObservableSemantics::MonotonicSum) {
                if let Some(previous) = reported.get(attributes) {
                    if value < previous {
                        return Err(InstrumentFault::NonMonotonic {
                            previous: *previous,
                            current: *value,
                        });
                    }
                }
            }

            let value = match (self.semantics, self.temporality) {
                (ObservableSemantics::Gauge, _) => *value,
                (_, Temporality::Cumulative) => *value,
                // The first delta equals the first cumulative reading.
                (_, Temporality::Delta) => value - reported.get(attributes).copied().unwrap_or(0.0),
            };
            points.push(DataPoint {
                start_time: prev_start,
                end_time,
                attributes: attributes.to_vec(),
                value,
            });
        }

        // Committed only on the successful return below.
        for (attributes, value) in observed {
            reported.insert(attributes, value);
        }
        if self.temporality == Temporality::Delta {
            *start = end_time;
        }

        Ok(MetricPoints::Singular(points))
    }
}

fn run_callback(
    callback: &Callback,
    observer: &Arc<Observer>,
    timeout: Option<Duration>,
) -> Result<(), InstrumentFault> {
    let Some(timeout) = timeout else {
        return match panic::catch_unwind(AssertUnwindSafe(|| callback(observer))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(InstrumentFault::Callback {
                message: err.to_string(),
            }),
            Err(payload) => Err(InstrumentFault::Callback {
                message: panic_message(payload),
            }),
        };
    };

    let (tx, rx) = mpsc::channel();
    let callback = Arc::clone(callback);
    let observer = Arc::clone(observer);
    let spawned = thread::Builder::new()
        .name("observable-callback".to_owned())
        .spawn(move || {
            let _ = tx.send(callback(&observer).map_err(|err| err.to_string()));
        });
    if let Err(err) = spawned {
        return Err(InstrumentFault::Callback {
            message: format!("failed to spawn callback watchdog: {err}"),
        });
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(InstrumentFault::Callback { message }),
        Err(RecvTimeoutError::Timeout) => Err(InstrumentFault::CallbackTimeout { timeout }),
        Err(RecvTimeoutError::Disconnected) => Err(InstrumentFault::Callback {
            message: "observable callback panicked".to_owned(),
        }),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "observable callback panicked".to_owned()
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
    use crate::KeyValue;

    fn singular(points: MetricPoints) -> Vec<DataPoint<f64>> {
        match points {
            MetricPoints::Singular(points) => points,
            other => panic!("unexpected points: {other:?}"),
        }
    }

    fn counter_with(readings: Vec<f64>) -> ObservableProducer {
        let cycle = Mutex::new(readings.into_iter());
        ObservableProducer::new(
            ObservableSemantics::MonotonicSum,
            Temporality::Delta,
            None,
            vec![Arc::new(move |observer: &Observer| {
                if let Some(value) = cycle.lock().unwrap().next() {
                    observer.observe(value, &[KeyValue::new("disk", "sda")]);
                }
                Ok(())
            })],
        )
    }

    #[test]
    fn delta_readings_subtract_the_previous_cycle() {
        let producer = counter_with(vec![10.0, 17.0]);

        let first = singular(producer.produce(time::now()).unwrap());
        assert_eq!(first[0].value, 10.0);

        let second = singular(producer.produce(time::now()).unwrap());
        assert_eq!(second[0].value, 7.0);
    }

    #[test]
    fn decreasing_counter_reading_is_a_fault_that_keeps_the_baseline() {
        let producer = counter_with(vec![10.0, 4.0, 12.0]);

        singular(producer.produce(time::now()).unwrap());
        assert!(matches!(
            producer.produce(time::now()),
            Err(InstrumentFault::NonMonotonic {
                previous,
                current,
            }) if previous == 10.0 && current == 4.0
        ));

        // The faulted cycle did not move the baseline.
        let third = singular(producer.produce(time::now()).unwrap());
        assert_eq!(third[0].value, 2.0);
    }

    #[test]
    fn callback_error_becomes_a_fault() {
        let producer = ObservableProducer::new(
            ObservableSemantics::Sum,
            Temporality::Cumulative,
            None,
            vec![Arc::new(|_: &Observer| Err("telemetry socket closed".into()))],
        );

        assert!(matches!(
            producer.produce(time::now()),
            Err(InstrumentFault::Callback { message }) if message.contains("telemetry socket closed")
        ));
    }

    #[test]
    fn callback_panic_is_contained() {
        let producer = ObservableProducer::new(
            ObservableSemantics::Gauge,
            Temporality::Delta,
            None,
            vec![Arc::new(|_: &Observer| panic!("gauge backend gone"))],
        );

        assert!(matches!(
            producer.produce(time::now()),
            Err(InstrumentFault::Callback { message }) if message.contains("gauge backend gone")
        ));
    }

    #[test]
    fn slow_callback_times_out() {
        let producer = ObservableProducer::new(
            ObservableSemantics::Gauge,
            Temporality::Delta,
            Some(Duration::from_millis(20)),
            vec![Arc::new(|_: &Observer| {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            })],
        );

        assert!(matches!(
            producer.produce(time::now()),
            Err(InstrumentFault::CallbackTimeout { .. })
        ));
    }
}
