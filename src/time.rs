//! Timestamp source used by every collection component.

use std::time::SystemTime;

/// Returns the current time, so all components stamp data points consistently.
pub(crate) fn now() -> SystemTime {
    SystemTime::now()
}
