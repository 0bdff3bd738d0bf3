//! Hard limits enforced at the engine boundary. Exceeding any of them is
//! reported as invalid input, never silently truncated.

pub const MAX_LISTINGS: usize = 100_000;
pub const MAX_PARKING_REQUESTS: usize = 100_000;

/// Non-cancelled reservations on one (listing, date) schedule.
pub const MAX_RESERVATIONS_PER_SCHEDULE: usize = 1_440;

pub const MAX_LABEL_LEN: usize = 200;
pub const MAX_RATE_LEN: usize = 100;
pub const MAX_AVAILABILITY_LEN: usize = 500;
pub const MAX_VEHICLE_INFO_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 1_000;

/// Half the Earth's circumference, in km.
pub const MAX_RADIUS_KM: f64 = 20_016.0;

pub const DEFAULT_SUGGESTION_LIMIT: usize = 8;
pub const MAX_SUGGESTIONS: usize = 50;
pub const MIN_SUGGESTION_PREFIX_LEN: usize = 2;
