use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

/// Custom epoch: 2025-01-01T00:00:00Z in milliseconds since Unix epoch.
const SONAR_EPOCH_MS: i64 = 1_735_689_600_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

struct State {
    last_ms: i64,
    sequence: u64,
}

/// 64-bit time-ordered ID generator for chat messages.
///
/// Layout (MSB → LSB):
/// - Bits 63–22: Timestamp (42 bits), ms since the Sonar epoch
/// - Bits 21–12: Worker ID (10 bits)
/// - Bits 11–0:  Sequence (12 bits), per-ms counter
///
/// If the wall clock steps backwards the generator keeps issuing IDs from the
/// last observed millisecond, so IDs never go backwards.
pub struct SnowflakeGenerator {
    worker_id: u64,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    /// Create a generator. `worker_id` is truncated to 10 bits.
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: u64::from(worker_id) & ((1 << WORKER_BITS) - 1),
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> i64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut now_ms = Utc::now().timestamp_millis().max(state.last_ms);

        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; borrow the next one.
                now_ms += 1;
            }
        } else {
            state.sequence = 0;
        }

        state.last_ms = now_ms;

        let ts = (now_ms - SONAR_EPOCH_MS) as u64;
        let id = (ts << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence;

        id as i64
    }
}

/// Extract the creation timestamp (ms since Unix epoch) from a snowflake ID.
pub fn snowflake_timestamp_ms(id: i64) -> i64 {
    ((id as u64) >> (WORKER_BITS + SEQUENCE_BITS)) as i64 + SONAR_EPOCH_MS
}

/// Creation time of a snowflake ID as a UTC timestamp.
pub fn snowflake_datetime(id: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(snowflake_timestamp_ms(id))
        .single()
        .unwrap_or_else(Utc::now)
}
