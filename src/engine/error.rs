use chrono::Weekday;
use ulid::Ulid;

use crate::model::ClockTime;

/// How a rejection should be handled at the boundary: HTTP status, retry
/// guidance, and the metrics label all key off the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed input — fix the request, never retry as-is.
    Validation,
    /// A business rule said no — deterministic, pick different parameters.
    Policy,
    /// Someone else holds the slot, or the record is already in a terminal
    /// state — possibly transient, but never retry the same parameters.
    Conflict,
    /// The caller may not act on this record.
    Authorization,
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    // Validation
    InvalidInterval,
    MissingField(&'static str),
    LimitExceeded(&'static str),
    InvalidSetting(&'static str),

    // Policy
    DateTooSoon,
    DateTooFar { max_days: u16 },
    OutsideOperatingHours { open: ClockTime, close: ClockTime },
    DurationExceeded { max_hours: u8 },
    DailyLimitReached,
    WeeklyLimitReached,
    LibrarianUnavailable,
    NonWorkingDay(Weekday),
    OutsideWorkingHours { open: ClockTime, close: ClockTime },
    RoomUnavailable(Ulid),

    // Conflict
    RoomConflict(Ulid),
    SelfOverlap(Ulid),
    SlotTaken,
    TerminalState(&'static str),

    // Authorization / lookup
    Forbidden(&'static str),
    NotFound(Ulid),

    // Internal
    WalError(String),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        use EngineError::*;
        match self {
            InvalidInterval | MissingField(_) | LimitExceeded(_) | InvalidSetting(_) => {
                ErrorCategory::Validation
            }
            DateTooSoon
            | DateTooFar { .. }
            | OutsideOperatingHours { .. }
            | DurationExceeded { .. }
            | DailyLimitReached
            | WeeklyLimitReached
            | LibrarianUnavailable
            | NonWorkingDay(_)
            | OutsideWorkingHours { .. }
            | RoomUnavailable(_) => ErrorCategory::Policy,
            RoomConflict(_) | SelfOverlap(_) | SlotTaken | TerminalState(_) => {
                ErrorCategory::Conflict
            }
            Forbidden(_) => ErrorCategory::Authorization,
            NotFound(_) => ErrorCategory::NotFound,
            WalError(_) => ErrorCategory::Internal,
        }
    }

    /// Stable machine-readable label carried alongside the human message.
    pub fn kind(&self) -> &'static str {
        use EngineError::*;
        match self {
            InvalidInterval => "invalid_interval",
            MissingField(_) => "missing_field",
            LimitExceeded(_) => "limit_exceeded",
            InvalidSetting(_) => "invalid_setting",
            DateTooSoon => "date_too_soon",
            DateTooFar { .. } => "date_too_far",
            OutsideOperatingHours { .. } => "outside_operating_hours",
            DurationExceeded { .. } => "duration_exceeded",
            DailyLimitReached => "daily_limit_reached",
            WeeklyLimitReached => "weekly_limit_reached",
            LibrarianUnavailable => "librarian_unavailable",
            NonWorkingDay(_) => "non_working_day",
            OutsideWorkingHours { .. } => "outside_working_hours",
            RoomUnavailable(_) => "room_unavailable",
            RoomConflict(_) => "room_conflict",
            SelfOverlap(_) => "self_overlap",
            SlotTaken => "slot_taken",
            TerminalState(_) => "terminal_state",
            Forbidden(_) => "forbidden",
            NotFound(_) => "not_found",
            WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use EngineError::*;
        match self {
            InvalidInterval => write!(f, "start time must be before end time"),
            MissingField(field) => write!(f, "{field} is required"),
            LimitExceeded(what) => write!(f, "limit exceeded: {what}"),
            InvalidSetting(what) => write!(f, "invalid setting: {what}"),
            DateTooSoon => {
                write!(f, "reservations must be made at least one day in advance")
            }
            DateTooFar { max_days } => {
                write!(f, "reservations can be made at most {max_days} days in advance")
            }
            OutsideOperatingHours { open, close } => {
                write!(f, "the library is open {open} – {close} on that day")
            }
            DurationExceeded { max_hours } => {
                write!(f, "bookings are limited to {max_hours} hours")
            }
            DailyLimitReached => write!(f, "you already have a reservation on this day"),
            WeeklyLimitReached => {
                write!(f, "you already have two bookings this week")
            }
            LibrarianUnavailable => write!(f, "this librarian is currently unavailable"),
            NonWorkingDay(day) => write!(f, "this librarian does not work on {day}"),
            OutsideWorkingHours { open, close } => {
                write!(f, "this librarian's hours on that day are {open} – {close}")
            }
            RoomUnavailable(id) => write!(f, "room {id} is not open for booking"),
            RoomConflict(id) => {
                write!(f, "the room is already booked for that time (booking {id})")
            }
            SelfOverlap(id) => {
                write!(f, "this overlaps your own booking {id} on the same day")
            }
            SlotTaken => write!(f, "that slot is already taken; choose a different time"),
            TerminalState(state) => {
                write!(f, "the reservation is already {state} and cannot change")
            }
            Forbidden(what) => write!(f, "not authorized: {what}"),
            NotFound(id) => write!(f, "not found: {id}"),
            WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
