//! Time-ordered 64-bit message IDs.
//!
//! Layout: 41 bits of millisecond timestamp relative to the Fika epoch,
//! 10 bits of worker ID, 12 bits of per-millisecond sequence. IDs generated
//! by a single worker are strictly increasing, and IDs from distinct workers
//! never collide.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Fika epoch (2024-01-01T00:00:00Z).
const FIKA_EPOCH_MS: i64 = 1_704_067_200_000;

const WORKER_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;

const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

pub struct SnowflakeGenerator {
    worker_id: u16,
    state: Mutex<State>,
}

struct State {
    last_ms: i64,
    sequence: u16,
}

impl SnowflakeGenerator {
    /// # Panics
    ///
    /// Panics if `worker_id` does not fit in 10 bits.
    pub fn new(worker_id: u16) -> Self {
        assert!(
            worker_id <= MAX_WORKER_ID,
            "worker_id {} exceeds {}",
            worker_id,
            MAX_WORKER_ID
        );
        Self {
            worker_id,
            state: Mutex::new(State {
                last_ms: -1,
                sequence: 0,
            }),
        }
    }

    /// Returns the next ID. Spins into the following millisecond if the
    /// 12-bit sequence is exhausted within the current one.
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        let mut now = current_ms();

        if now < state.last_ms {
            // Clock went backwards. Refusing to generate is better than
            // handing out colliding or out-of-order IDs.
            panic!(
                "system clock moved backwards: {} < {}",
                now, state.last_ms
            );
        }

        if now == state.last_ms {
            state.sequence = state.sequence.wrapping_add(1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    now = current_ms();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        let ts = now - FIKA_EPOCH_MS;
        (ts << (WORKER_BITS + SEQUENCE_BITS))
            | ((self.worker_id as i64) << SEQUENCE_BITS)
            | (state.sequence as i64)
    }
}

/// Extracts the unix millisecond timestamp embedded in `id`.
pub fn snowflake_timestamp_ms(id: i64) -> i64 {
    (id >> (WORKER_BITS + SEQUENCE_BITS)) + FIKA_EPOCH_MS
}

fn current_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as i64
}
