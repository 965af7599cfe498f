//! Instrument identity and per-kind collection behavior.

use std::borrow::Cow;
use std::fmt;

use crate::temporality::Temporality;

/// The identifier of a group of instruments that all perform the same
/// function.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum InstrumentKind {
    /// Instruments that record increasing values synchronously with the code
    /// path they are measuring.
    Counter,
    /// Instruments that record increasing and decreasing values synchronously
    /// with the code path they are measuring.
    UpDownCounter,
    /// Instruments that record a distribution of values synchronously with
    /// the code path they are measuring.
    Histogram,
    /// Instruments that report increasing values from a callback.
    ObservableCounter,
    /// Instruments that report increasing and decreasing values from a
    /// callback.
    ObservableUpDownCounter,
    /// Instruments that report a current value from a callback.
    ObservableGauge,
}

impl InstrumentKind {
    /// Whether values reported by this kind only ever increase.
    pub fn is_monotonic(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::ObservableCounter
        )
    }

    /// Whether this kind reports through callbacks instead of synchronous
    /// recording.
    pub fn is_observable(&self) -> bool {
        matches!(
            self,
            InstrumentKind::ObservableCounter
                | InstrumentKind::ObservableUpDownCounter
                | InstrumentKind::ObservableGauge
        )
    }

    /// The [Temporality] this kind reports with when the reader does not ask
    /// for a specific one.
    pub(crate) fn preferred_temporality(&self) -> Temporality {
        match self {
            InstrumentKind::ObservableGauge => Temporality::Delta,
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::Histogram
            | InstrumentKind::ObservableCounter
            | InstrumentKind::ObservableUpDownCounter => Temporality::Cumulative,
        }
    }

    /// Resolves the reporting [Temporality] for this kind.
    ///
    /// Every kind supports both temporalities, so a reader-level request
    /// always applies; without one the kind's preference is used.
    pub(crate) fn resolve_temporality(&self, requested: Option<Temporality>) -> Temporality {
        requested.unwrap_or_else(|| self.preferred_temporality())
    }
}

/// The immutable identity of an instrument: name, kind, unit, and
/// description.
///
/// Created when the instrument is registered and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InstrumentDescriptor {
    name: Cow<'static, str>,
    kind: InstrumentKind,
    unit: Cow<'static, str>,
    description: Cow<'static, str>,
}

impl InstrumentDescriptor {
    pub(crate) fn new(
        name: Cow<'static, str>,
        kind: InstrumentKind,
        unit: Cow<'static, str>,
        description: Cow<'static, str>,
    ) -> Self {
        InstrumentDescriptor {
            name,
            kind,
            unit,
            description,
        }
    }

    /// The human-readable identifier of the instrument.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The functional group of the instrument.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// The unit of measurement the instrument reports in.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Describes the purpose of the instrument.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The identifying properties of this instrument within a scope.
    pub(crate) fn identity(&self) -> InstrumentId {
        InstrumentId {
            name: if self.name.chars().any(|c| c.is_ascii_uppercase()) {
                Cow::Owned(self.name.to_ascii_lowercase())
            } else {
                self.name.clone()
            },
            kind: self.kind,
            unit: self.unit.clone(),
            description: self.description.clone(),
        }
    }
}

impl fmt::Display for InstrumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The identifying properties of an instrument.
///
/// Instrument names are considered case-insensitive ASCII, so the name held
/// here is normalized to lowercase for comparison via hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct InstrumentId {
    pub(crate) name: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) unit: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(InstrumentKind::Counter, Temporality::Cumulative)]
    #[case(InstrumentKind::UpDownCounter, Temporality::Cumulative)]
    #[case(InstrumentKind::Histogram, Temporality::Cumulative)]
    #[case(InstrumentKind::ObservableCounter, Temporality::Cumulative)]
    #[case(InstrumentKind::ObservableUpDownCounter, Temporality::Cumulative)]
    #[case(InstrumentKind::ObservableGauge, Temporality::Delta)]
    fn preferred_temporality(#[case] kind: InstrumentKind, #[case] expected: Temporality) {
        assert_eq!(kind.resolve_temporality(None), expected);
    }

    #[rstest]
    #[case(InstrumentKind::Counter)]
    #[case(InstrumentKind::UpDownCounter)]
    #[case(InstrumentKind::Histogram)]
    #[case(InstrumentKind::ObservableCounter)]
    #[case(InstrumentKind::ObservableUpDownCounter)]
    #[case(InstrumentKind::ObservableGauge)]
    fn reader_request_overrides_preference(#[case] kind: InstrumentKind) {
        assert_eq!(
            kind.resolve_temporality(Some(Temporality::Delta)),
            Temporality::Delta
        );
        assert_eq!(
            kind.resolve_temporality(Some(Temporality::Cumulative)),
            Temporality::Cumulative
        );
    }

    #[test]
    fn identity_normalizes_name_casing() {
        let a = InstrumentDescriptor::new(
            "Requests.Total".into(),
            InstrumentKind::Counter,
            "1".into(),
            "".into(),
        );
        let b = InstrumentDescriptor::new(
            "requests.total".into(),
            InstrumentKind::Counter,
            "1".into(),
            "".into(),
        );
        assert_eq!(a.identity(), b.identity());
    }
}
