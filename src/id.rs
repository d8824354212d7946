//! Snowflake-style id generation.
//!
//! Ids are 64-bit integers combining a millisecond timestamp (41 bits), a
//! worker id (10 bits) and a per-tick sequence (12 bits), so they sort by
//! creation time and stay unique across processes configured with
//! distinct worker ids. The decimal string form is the canonical
//! representation used in events and read models.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_WORKER_ID: u64 = (1 << WORKER_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Custom epoch (2020-01-01T00:00:00Z) leaves 41 timestamp bits enough
/// headroom for several decades.
const EPOCH_MS: u64 = 1_577_836_800_000;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("worker id {0} out of range (max {MAX_WORKER_ID})")]
    WorkerIdOutOfRange(u64),
}

#[derive(Debug)]
struct Tick {
    last_timestamp: u64,
    sequence: u64,
}

/// Monotonic, sortable, globally-unique id source.
///
/// Ids produced by one instance are non-decreasing even when the wall
/// clock steps backwards: the generator then keeps issuing against the
/// last observed timestamp until the clock catches up.
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: u64,
    tick: Mutex<Tick>,
}

impl IdGenerator {
    pub fn new(worker_id: u64) -> Result<Self, IdError> {
        if worker_id > MAX_WORKER_ID {
            return Err(IdError::WorkerIdOutOfRange(worker_id));
        }
        Ok(Self {
            worker_id,
            tick: Mutex::new(Tick {
                last_timestamp: 0,
                sequence: 0,
            }),
        })
    }

    /// Next id as a raw 64-bit integer.
    pub fn next_id(&self) -> u64 {
        let mut tick = self.tick.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut now = Self::current_millis();
        if now < tick.last_timestamp {
            // Clock went backwards: keep the last timestamp and burn
            // sequence numbers until real time catches up.
            now = tick.last_timestamp;
        }

        if now == tick.last_timestamp {
            tick.sequence = (tick.sequence + 1) & SEQUENCE_MASK;
            if tick.sequence == 0 {
                // Sequence exhausted within this millisecond.
                now = tick.last_timestamp + 1;
            }
        } else {
            tick.sequence = 0;
        }
        tick.last_timestamp = now;

        (now.saturating_sub(EPOCH_MS) << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | tick.sequence
    }

    /// Next id in its canonical decimal string form.
    pub fn next_id_string(&self) -> String {
        self.next_id().to_string()
    }

    fn current_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(EPOCH_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_worker() {
        assert!(IdGenerator::new(MAX_WORKER_ID).is_ok());
        assert_eq!(
            IdGenerator::new(MAX_WORKER_ID + 1).unwrap_err(),
            IdError::WorkerIdOutOfRange(MAX_WORKER_ID + 1)
        );
    }

    #[test]
    fn ids_are_monotonic_within_a_process() {
        let generator = IdGenerator::new(1).unwrap();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(id >= last);
            last = id;
        }
    }

    #[test]
    fn ids_are_unique_within_a_process() {
        let generator = IdGenerator::new(7).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generator.next_id()));
        }
    }

    #[test]
    fn distinct_workers_never_collide_on_the_same_tick() {
        let a = IdGenerator::new(1).unwrap();
        let b = IdGenerator::new(2).unwrap();
        // Worker bits sit between timestamp and sequence, so equal
        // timestamps still differ.
        assert_ne!(a.next_id() >> SEQUENCE_BITS & MAX_WORKER_ID, b.next_id() >> SEQUENCE_BITS & MAX_WORKER_ID);
    }

    #[test]
    fn decimal_form_round_trips() {
        let generator = IdGenerator::new(3).unwrap();
        let id = generator.next_id();
        let text = id.to_string();
        assert_eq!(text.parse::<u64>().unwrap(), id);
    }
}
