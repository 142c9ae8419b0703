use crate::model::{DAY_MS, Ms};

pub const MAX_COURTS: usize = 1_000;
pub const MAX_RESERVATIONS_PER_COURT: usize = 100_000;
pub const MAX_PARTICIPANTS: usize = 16;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_NOTE_LEN: usize = 512;
pub const MAX_OPEN_CHALLENGES: usize = 10_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Nobody holds a court for more than a day.
pub const MAX_RESERVATION_DURATION_MS: Ms = DAY_MS;

/// Largest encoded event a WAL record may carry.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;
