//! Error types for the core data model.

use thiserror::Error;

use crate::delivery::DeliveryStatus;

/// A wire string did not name a known variant.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseError {
    /// Which enum was being parsed (`"change type"`, `"tier"`, ...).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// An illegal delivery status transition was attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("illegal delivery status transition {from} -> {to}")]
pub struct TransitionError {
    /// Status before the attempted transition.
    pub from: DeliveryStatus,
    /// Requested status.
    pub to: DeliveryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = ParseError::new("tier", "critical");
        assert_eq!(err.to_string(), "unknown tier: \"critical\"");
    }

    #[test]
    fn transition_error_display() {
        let err = TransitionError {
            from: DeliveryStatus::Delivered,
            to: DeliveryStatus::InFlight,
        };
        assert_eq!(
            err.to_string(),
            "illegal delivery status transition delivered -> in_flight"
        );
    }
}
