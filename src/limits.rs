use crate::model::Ms;

/// Earliest instant accepted for an appointment boundary (1970-01-01T00:00:00Z).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest instant accepted for an appointment boundary (9999-12-31T23:59:59.999Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// An appointment may not run longer than 30 days.
pub const MAX_SPAN_DURATION_MS: Ms = 30 * 24 * 3_600_000;

/// Max length of a professional, patient or clinic reference.
pub const MAX_ID_LEN: usize = 256;

/// Max length of the appointment type tag.
pub const MAX_TYPE_LEN: usize = 128;

/// Capacity of the group-commit channel in front of the WAL writer.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;

/// Largest encoded event the WAL writes or trusts on replay.
pub const MAX_EVENT_BYTES: usize = 64 * 1024;
