//! Publishable event contract
//!
//! Anything sent through the publisher carries a globally unique identity and
//! a UTC creation timestamp, both assigned exactly once at construction.
//! Concrete event types embed [`EventMeta`] (flattened) and delegate the
//! trait accessors to it; there is no shared mutable base type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability contract for events the publisher accepts.
pub trait PublishableEvent: Serialize + Send + Sync {
    /// Globally unique event identity, immutable after construction.
    fn event_id(&self) -> Uuid;

    /// UTC creation timestamp, immutable after construction.
    fn created_at(&self) -> DateTime<Utc>;
}

/// Identity and creation timestamp for a publishable event.
///
/// Fields are private and set once by [`EventMeta::new`]; the wire payload
/// carries them as `id` (hyphenated UUID) and `created` (ISO-8601).
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize)]
/// struct OrderPlaced {
///     #[serde(flatten)]
///     meta: EventMeta,
///     order_number: String,
/// }
///
/// impl PublishableEvent for OrderPlaced {
///     fn event_id(&self) -> Uuid {
///         self.meta.id()
///     }
///     fn created_at(&self) -> DateTime<Utc> {
///         self.meta.created()
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    id: Uuid,
    created: DateTime<Utc>,
}

impl EventMeta {
    /// Assign a fresh identity and the current UTC time.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created: Utc::now(),
        }
    }

    /// The event identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The creation timestamp.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}
