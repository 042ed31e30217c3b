//! The pure half of the constraint engine: calendar math and every policy
//! check that needs no ledger access. Checks run in a fixed order and the
//! first failure wins, so callers can surface exactly one reason.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Weekday};

use crate::model::{ClockTime, Librarian, Settings, TimeRange};

use super::EngineError;

pub(crate) fn now_ms() -> crate::model::Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as crate::model::Ms
}

/// Global library hours bounding all room bookings, keyed by weekday only —
/// individual rooms carry no time restriction of their own.
pub fn library_hours(day: Weekday) -> TimeRange {
    let hm = |h, m| ClockTime::from_hm(h, m).unwrap();
    match day {
        Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri => {
            TimeRange::new(hm(8, 0), hm(22, 0))
        }
        Weekday::Sat => TimeRange::new(hm(9, 0), hm(18, 0)),
        Weekday::Sun => TimeRange::new(hm(12, 0), hm(18, 0)),
    }
}

/// Monday..Sunday calendar week containing `date`, inclusive on both ends.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let offset = date.weekday().num_days_from_monday() as u64;
    let start = date
        .checked_sub_days(Days::new(offset))
        .expect("date within calendar range");
    let end = start
        .checked_add_days(Days::new(6))
        .expect("date within calendar range");
    (start, end)
}

/// Shared advance-window rule: reservations start tomorrow at the earliest
/// and reach at most `max_advance_days` past today.
fn check_advance_window(
    date: NaiveDate,
    settings: &Settings,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let today = now.date();
    if date <= today {
        return Err(EngineError::DateTooSoon);
    }
    let horizon = today
        .checked_add_days(Days::new(settings.max_advance_days as u64))
        .expect("date within calendar range");
    if date > horizon {
        return Err(EngineError::DateTooFar {
            max_days: settings.max_advance_days,
        });
    }
    Ok(())
}

/// Booking checks that precede any ledger lookup: advance window, interval
/// sanity, library hours, and the duration cap — in that order.
pub fn validate_booking_window(
    date: NaiveDate,
    start: ClockTime,
    end: ClockTime,
    settings: &Settings,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    check_advance_window(date, settings, now)?;

    if start >= end {
        return Err(EngineError::InvalidInterval);
    }

    let hours = library_hours(date.weekday());
    let requested = TimeRange::new(start, end);
    if !hours.contains(&requested) {
        return Err(EngineError::OutsideOperatingHours {
            open: hours.start,
            close: hours.end,
        });
    }

    let max_minutes = settings.max_booking_duration as u16 * 60;
    if requested.duration_minutes() > max_minutes {
        return Err(EngineError::DurationExceeded {
            max_hours: settings.max_booking_duration,
        });
    }

    Ok(())
}

/// Meeting checks that precede the slot lookup: advance window, then the
/// librarian's own availability and day schedule.
pub fn validate_meeting_window(
    date: NaiveDate,
    slot: ClockTime,
    librarian: &Librarian,
    settings: &Settings,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    check_advance_window(date, settings, now)?;

    if !librarian.is_available {
        return Err(EngineError::LibrarianUnavailable);
    }

    let day = date.weekday();
    let hours = librarian.working_hours.for_day(day);
    if !hours.enabled {
        return Err(EngineError::NonWorkingDay(day));
    }
    if slot < hours.open || slot >= hours.close {
        return Err(EngineError::OutsideWorkingHours {
            open: hours.open,
            close: hours.close,
        });
    }

    Ok(())
}
