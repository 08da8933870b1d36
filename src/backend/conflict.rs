// Conflict resolution between a locally-held shape state and an incoming
// remote edit, using vector-clock causality with a per-property timestamp
// tie-break for genuinely concurrent edits.

use crate::event::{Properties, PropertyTimestamps};
use crate::vector_clock::{Causality, VectorClock};

/// The decision the resolver reaches for one incoming remote edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The remote edit is causally stale; keep the local state untouched.
    KeepLocal,
    /// The local state is causally stale; adopt the remote properties.
    ApplyRemote,
    /// Neither side dominates; per-property timestamps decide.
    Merge {
        properties: Properties,
        property_timestamps: PropertyTimestamps,
    },
}

/// One side of a conflict: the properties as currently known plus the
/// causal and per-property timestamp context needed to resolve a clash.
#[derive(Debug, Clone)]
pub struct ShapeSide {
    pub properties: Properties,
    pub vector_clock: VectorClock,
    pub property_timestamps: PropertyTimestamps,
}

/// Resolves a remote edit against the locally-held state of the same shape.
///
/// On [`Resolution::Merge`], the caller is responsible for folding the
/// remote clock into the local one via [`VectorClock::merge`] — this
/// function only decides the properties, it doesn't mutate either side.
pub fn resolve(local: &ShapeSide, remote: &ShapeSide) -> Resolution {
    match local.vector_clock.compare(&remote.vector_clock) {
        Causality::Before => Resolution::ApplyRemote,
        Causality::After => Resolution::KeepLocal,
        Causality::Equal => Resolution::KeepLocal,
        Causality::Concurrent => {
            let (properties, property_timestamps) = merge_by_property_timestamp(local, remote);
            Resolution::Merge {
                properties,
                property_timestamps,
            }
        }
    }
}

/// Per-property timestamp merge: for every key touched on either side, the
/// value with the greater timestamp wins; a tie favors the remote side.
///
/// Exposed beyond causality-driven merges so a caller with no vector clock
/// to compare (e.g. the server's recency heuristic) can still fold a
/// concurrent edit in by timestamp instead of discarding it outright.
pub(crate) fn merge_by_property_timestamp(
    local: &ShapeSide,
    remote: &ShapeSide,
) -> (Properties, PropertyTimestamps) {
    let mut properties = local.properties.clone();
    let mut property_timestamps = local.property_timestamps.clone();

    for (key, remote_value) in &remote.properties {
        let remote_ts = remote
            .property_timestamps
            .get(key)
            .copied()
            .unwrap_or(i64::MIN);
        let local_ts = local.property_timestamps.get(key).copied().unwrap_or(i64::MIN);

        if remote_ts >= local_ts {
            properties.insert(key.clone(), remote_value.clone());
            property_timestamps.insert(key.clone(), remote_ts);
        }
    }

    (properties, property_timestamps)
}

/// Server-side conflict heuristic (see design notes): when the caller
/// cannot supply a vector clock, a shape update is treated as conflicting
/// with the previous one if it lands within this window of it.
pub const CONFLICT_WINDOW_MILLIS: i64 = 1000;

pub fn within_conflict_window(previous_update_millis: i64, incoming_millis: i64) -> bool {
    (incoming_millis - previous_update_millis).abs() < CONFLICT_WINDOW_MILLIS
}
