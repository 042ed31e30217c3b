//! Hard caps on stored field sizes and directory counts. These are abuse
//! guards, not business rules — policy limits (duration, advance window,
//! booking caps) live in `Settings` and `engine::rules`.

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_PURPOSE_LEN: usize = 500;
pub const MAX_TOPIC_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 1000;
pub const MAX_AMENITIES: usize = 32;

pub const MAX_ROOMS: usize = 500;
pub const MAX_LIBRARIANS: usize = 200;

/// Settings bounds, matching the admin form's validation.
pub const MIN_BOOKING_DURATION_HOURS: u8 = 1;
pub const MAX_BOOKING_DURATION_HOURS: u8 = 12;
pub const MIN_ADVANCE_DAYS: u16 = 1;
pub const MAX_ADVANCE_DAYS: u16 = 60;
