//! Notification values delivered to subscribers.

use serde::Serialize;

/// A notification delivered through a [`Subscription`](crate::Subscription).
///
/// `connection_reset` is a synthetic marker: it is the first value a
/// subscription receives after a (re)connection, and tells the consumer that
/// notifications may have been missed and its state should be resynchronized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Payload sent with `NOTIFY`. Empty for reset markers.
    pub payload: String,
    /// Set when delivery has just (re)started on a new connection.
    pub connection_reset: bool,
}

impl Notification {
    /// Create a notification carrying a payload.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            connection_reset: false,
        }
    }

    /// Create a connection-reset marker.
    pub fn reset() -> Self {
        Self {
            payload: String::new(),
            connection_reset: true,
        }
    }

    /// Whether this is a connection-reset marker.
    pub fn is_reset(&self) -> bool {
        self.connection_reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let n = Notification::new("42");
        assert_eq!(n.payload, "42");
        assert!(!n.is_reset());

        let r = Notification::reset();
        assert!(r.is_reset());
        assert!(r.payload.is_empty());
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&Notification::new("x")).unwrap();
        assert_eq!(json, r#"{"payload":"x","connection_reset":false}"#);
    }
}
