//! Monotonic clock for temporary record identifiers.
//!
//! Pending records need an identifier before the store assigns one. The
//! clock hands out readings that never repeat, even when the wall clock
//! stalls or steps backwards, so two adds in the same millisecond still get
//! distinct identifiers.

use crate::RecordId;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic source of temporary identifiers.
///
/// Readings are milliseconds since the epoch, bumped by one whenever the
/// wall clock would not advance past the previous reading.
#[derive(Debug)]
pub struct TempIdClock {
    prefix: String,
    last: AtomicU64,
}

impl TempIdClock {
    /// Create a clock issuing identifiers with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last: AtomicU64::new(0),
        }
    }

    /// Advance the clock to at least `wall_millis` and return the new reading.
    pub fn tick_at(&self, wall_millis: u64) -> u64 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall_millis.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Issue a fresh temporary identifier using the system clock.
    pub fn next_id(&self) -> RecordId {
        let wall = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        self.id_at(wall)
    }

    /// Issue a fresh temporary identifier for a given wall-clock reading.
    pub fn id_at(&self, wall_millis: u64) -> RecordId {
        format!("{}{}", self.prefix, self.tick_at(wall_millis))
    }

    /// Whether `id` was issued by a clock with this prefix.
    pub fn is_temporary(&self, id: &str) -> bool {
        id.starts_with(&self.prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
