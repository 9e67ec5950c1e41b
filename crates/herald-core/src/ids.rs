//! Branded ID newtypes for type safety.
//!
//! Every entity in the pipeline has a distinct ID type implemented as a
//! newtype wrapper around `String`. This prevents accidentally passing an
//! event ID where a delivery task ID (the idempotency key) is expected.
//!
//! Event IDs are assigned by the upstream policy engine. Task IDs are derived
//! deterministically so that re-dispatching the same work reuses the same
//! idempotency key. Alert IDs are UUID v7 (time-ordered).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::delivery::Channel;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a policy-change event, assigned upstream.
    EventId
}

branded_id! {
    /// Identifier of a delivery task. Doubles as the adapter idempotency key.
    TaskId
}

branded_id! {
    /// Identifier of an operator alert.
    AlertId
}

impl TaskId {
    /// Task ID for delivering `event_id` through `channel`.
    #[must_use]
    pub fn for_event(event_id: &EventId, channel: Channel) -> Self {
        Self(format!("{event_id}:{channel}"))
    }

    /// Task ID for the digest covering the window starting at `window_start_ms`.
    #[must_use]
    pub fn for_digest(window_start_ms: i64) -> Self {
        Self(format!("digest:{window_start_ms}"))
    }

    /// Whether this task delivers a digest rather than a single event.
    #[must_use]
    pub fn is_digest(&self) -> bool {
        self.0.starts_with("digest:")
    }
}

impl AlertId {
    /// Create a new time-ordered alert ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("alert_{}", Uuid::now_v7()))
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
