//! Lifecycle fields shared by every tracked record.
//!
//! A tracked record remembers who added it and when, whether it is the
//! current version, who removed it, and when it last changed. Mutations go
//! through [`apply_mutation`] so `modified_at` is stamped in exactly one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Provenance and lifecycle columns embedded in tracked records.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Tracking {
    /// Actor that created the record.
    pub added_by: String,

    /// When the record was created.
    pub added_at: DateTime<Utc>,

    /// `false` marks a logical delete.
    pub is_current: bool,

    /// Actor that removed the record, if it was removed.
    pub removed_by: Option<String>,

    /// When the record was removed.
    pub removed_at: Option<DateTime<Utc>>,

    /// Timestamp of the last mutation.
    pub modified_at: DateTime<Utc>,
}

impl Tracking {
    /// Fresh lifecycle state for a record created by `actor` at `now`.
    pub fn new(actor: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            added_by: actor.into(),
            added_at: now,
            is_current: true,
            removed_by: None,
            removed_at: None,
            modified_at: now,
        }
    }
}

/// Records that carry [`Tracking`] fields.
pub trait Tracked {
    fn tracking(&self) -> &Tracking;
    fn tracking_mut(&mut self) -> &mut Tracking;
}

/// Apply `change` to `record` and stamp `modified_at` with `now`.
pub fn apply_mutation<T, F>(record: &mut T, now: DateTime<Utc>, change: F)
where
    T: Tracked,
    F: FnOnce(&mut T),
{
    change(record);
    record.tracking_mut().modified_at = now;
}

/// Reinstate `record` as the current version.
pub fn mark_current<T: Tracked>(record: &mut T, actor: &str, now: DateTime<Utc>) {
    apply_mutation(record, now, |r| {
        let tracking = r.tracking_mut();
        tracking.is_current = true;
        tracking.removed_by = None;
        tracking.removed_at = None;
    });
    tracing::trace!(actor, "record marked current");
}

/// Logically delete `record` on behalf of `actor`.
pub fn mark_removed<T: Tracked>(record: &mut T, actor: &str, now: DateTime<Utc>) {
    apply_mutation(record, now, |r| {
        let tracking = r.tracking_mut();
        tracking.is_current = false;
        tracking.removed_by = Some(actor.to_string());
        tracking.removed_at = Some(now);
    });
}
