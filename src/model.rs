use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Unix milliseconds — used for audit timestamps (created/cancelled/reviewed).
pub type Ms = i64;

/// Wall-clock time of day in minutes since midnight.
///
/// Parses from and renders as zero-padded "HH:MM", so its ordering matches
/// the lexicographic order of the strings the clients exchange. The whole
/// application runs in the institution's local timezone; no conversion is
/// ever performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self(hour * 60 + minute))
        } else {
            None
        }
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }

    pub fn total_minutes(&self) -> u16 {
        self.0
    }

    /// Whole minutes from `self` to `later`. Zero if `later` is not after.
    pub fn minutes_until(&self, later: ClockTime) -> u16 {
        later.0.saturating_sub(self.0)
    }
}

impl From<NaiveTime> for ClockTime {
    fn from(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = ParseClockTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s.split_once(':').ok_or(ParseClockTimeError)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(ParseClockTimeError);
        }
        let hour: u16 = h.parse().map_err(|_| ParseClockTimeError)?;
        let minute: u16 = m.parse().map_err(|_| ParseClockTimeError)?;
        ClockTime::from_hm(hour, minute).ok_or(ParseClockTimeError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseClockTimeError;

impl fmt::Display for ParseClockTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected zero-padded \"HH:MM\"")
    }
}

impl std::error::Error for ParseClockTimeError {}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeRange {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u16 {
        self.start.minutes_until(self.end)
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`, endpoints included.
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_instant(&self, t: ClockTime) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Librarian,
    Admin,
}

/// An already-authenticated caller. Token issuance and password handling
/// live upstream; the engine only ever sees (user, role).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user: Ulid,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Librarian)
    }
}

// ── Directories ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub location: String,
    pub amenities: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Soft-delete flag. Retired rooms are invisible to booking but their
    /// historical reservations remain.
    pub is_active: bool,
}

/// Open window for one weekday of a librarian's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub enabled: bool,
    pub open: ClockTime,
    pub close: ClockTime,
}

impl DayHours {
    fn weekday_default() -> Self {
        Self {
            enabled: true,
            open: ClockTime::from_hm(9, 0).unwrap(),
            close: ClockTime::from_hm(17, 0).unwrap(),
        }
    }

    fn weekend_default() -> Self {
        Self {
            enabled: false,
            open: ClockTime::from_hm(9, 0).unwrap(),
            close: ClockTime::from_hm(13, 0).unwrap(),
        }
    }
}

/// Per-weekday windows during which a librarian accepts meetings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekSchedule {
    pub mon: DayHours,
    pub tue: DayHours,
    pub wed: DayHours,
    pub thu: DayHours,
    pub fri: DayHours,
    pub sat: DayHours,
    pub sun: DayHours,
}

impl Default for WeekSchedule {
    fn default() -> Self {
        Self {
            mon: DayHours::weekday_default(),
            tue: DayHours::weekday_default(),
            wed: DayHours::weekday_default(),
            thu: DayHours::weekday_default(),
            fri: DayHours::weekday_default(),
            sat: DayHours::weekend_default(),
            sun: DayHours::weekend_default(),
        }
    }
}

impl WeekSchedule {
    pub fn for_day(&self, day: Weekday) -> &DayHours {
        match day {
            Weekday::Mon => &self.mon,
            Weekday::Tue => &self.tue,
            Weekday::Wed => &self.wed,
            Weekday::Thu => &self.thu,
            Weekday::Fri => &self.fri,
            Weekday::Sat => &self.sat,
            Weekday::Sun => &self.sun,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Librarian {
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub specialty: String,
    /// Master toggle — when false the librarian is hidden from the student
    /// scheduler and no meeting requests are admitted.
    pub is_available: bool,
    pub working_hours: WeekSchedule,
}

// ── Settings singleton ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Longest room booking a student may make, in hours.
    pub max_booking_duration: u8,
    /// How many days past today a reservation date may fall.
    pub max_advance_days: u16,
    pub library_name: String,
    pub support_email: String,
    pub librarian_code: String,
    pub student_code: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_booking_duration: 4,
            max_advance_days: 7,
            library_name: "University Central Library".into(),
            support_email: "library@university.edu".into(),
            librarian_code: "ADMIN2026".into(),
            student_code: "STUDENT2026".into(),
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────
//
// Bookings and meetings are kept as two distinct types: rooms collide on
// overlapping intervals, meetings on exact slots, and their lifecycles
// diverge (a booking is confirmed on creation, a meeting awaits review).
// Only the interval math is shared.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Active reservations count toward collision and limit checks.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub student: Ulid,
    pub room: Ulid,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(default)]
    pub purpose: String,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
}

impl Booking {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    /// True once the booking's end has passed on the wall clock.
    pub fn is_over(&self, now: chrono::NaiveDateTime) -> bool {
        self.date < now.date()
            || (self.date == now.date() && self.end_time < ClockTime::from(now.time()))
    }

    /// The one authoritative status derivation: an active booking whose end
    /// has passed reads as completed everywhere, whether or not the sweep
    /// has persisted it yet.
    pub fn effective_status(&self, now: chrono::NaiveDateTime) -> BookingStatus {
        if self.status.is_active() && self.is_over(now) {
            BookingStatus::Completed
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl MeetingStatus {
    /// Pending and approved meetings hold their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, MeetingStatus::Pending | MeetingStatus::Approved)
    }

    /// Every state except pending is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MeetingStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MeetingStatus::Pending => "pending",
            MeetingStatus::Approved => "approved",
            MeetingStatus::Rejected => "rejected",
            MeetingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: Ulid,
    pub student: Ulid,
    pub librarian: Ulid,
    pub date: NaiveDate,
    /// Discrete slot, not an interval — collisions are exact matches.
    pub preferred_time: ClockTime,
    pub topic: String,
    #[serde(default)]
    pub notes: String,
    pub status: MeetingStatus,
    #[serde(default)]
    pub librarian_note: String,
    pub reviewed_by: Option<Ulid>,
    pub reviewed_at: Option<Ms>,
    pub created_at: Ms,
}

// ── Directory mutation payloads ──────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub name: String,
    pub capacity: u32,
    pub location: String,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub location: Option<String>,
    pub amenities: Option<Vec<String>>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLibrarian {
    pub name: String,
    #[serde(default)]
    pub specialty: String,
    pub working_hours: Option<WeekSchedule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarianPatch {
    pub name: Option<String>,
    pub specialty: Option<String>,
    pub is_available: Option<bool>,
    pub working_hours: Option<WeekSchedule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub max_booking_duration: Option<u8>,
    pub max_advance_days: Option<u16>,
    pub library_name: Option<String>,
    pub support_email: Option<String>,
    pub librarian_code: Option<String>,
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
/// Reservation records carry their full current shape so a compacted log
/// replays to identical state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SettingsChanged {
        settings: Settings,
    },
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomRetired {
        id: Ulid,
    },
    LibrarianRegistered {
        librarian: Librarian,
    },
    LibrarianUpdated {
        librarian: Librarian,
    },
    BookingConfirmed {
        booking: Booking,
    },
    BookingRescheduled {
        id: Ulid,
        date: NaiveDate,
        start_time: ClockTime,
        end_time: ClockTime,
        purpose: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        at: Ms,
    },
    /// Batch persistence of the passive pending/confirmed → completed sweep.
    BookingsCompleted {
        ids: Vec<Ulid>,
    },
    MeetingRequested {
        meeting: Meeting,
    },
    MeetingReviewed {
        id: Ulid,
        status: MeetingStatus,
        note: Option<String>,
        reviewed_by: Ulid,
        at: Ms,
    },
    MeetingCancelled {
        id: Ulid,
        at: Ms,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u16, m: u16) -> ClockTime {
        ClockTime::from_hm(h, m).unwrap()
    }

    #[test]
    fn clock_time_parse_and_display() {
        let nine = "09:00".parse::<ClockTime>().unwrap();
        assert_eq!(nine, t(9, 0));
        assert_eq!(nine.to_string(), "09:00");
        assert_eq!("23:59".parse::<ClockTime>().unwrap(), t(23, 59));
    }

    #[test]
    fn clock_time_rejects_malformed() {
        assert!("9:00".parse::<ClockTime>().is_err()); // not zero-padded
        assert!("24:00".parse::<ClockTime>().is_err());
        assert!("12:60".parse::<ClockTime>().is_err());
        assert!("noon".parse::<ClockTime>().is_err());
        assert!("12-30".parse::<ClockTime>().is_err());
    }

    #[test]
    fn clock_time_order_matches_string_order() {
        let times = ["08:00", "08:30", "09:00", "13:45", "22:00"];
        for pair in times.windows(2) {
            let a: ClockTime = pair[0].parse().unwrap();
            let b: ClockTime = pair[1].parse().unwrap();
            assert!(a < b, "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn range_overlap() {
        let a = TimeRange::new(t(9, 0), t(11, 0));
        let b = TimeRange::new(t(10, 0), t(12, 0));
        let c = TimeRange::new(t(11, 0), t(12, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn range_duration_and_containment() {
        let r = TimeRange::new(t(9, 30), t(11, 0));
        assert_eq!(r.duration_minutes(), 90);
        let hours = TimeRange::new(t(8, 0), t(22, 0));
        assert!(hours.contains(&r));
        assert!(hours.contains(&hours));
        assert!(!r.contains(&hours));
        assert!(r.contains_instant(t(9, 30)));
        assert!(!r.contains_instant(t(11, 0))); // half-open
    }

    #[test]
    fn default_week_schedule_matches_seed() {
        let ws = WeekSchedule::default();
        assert!(ws.mon.enabled && ws.fri.enabled);
        assert!(!ws.sat.enabled && !ws.sun.enabled);
        assert_eq!(ws.wed.open, t(9, 0));
        assert_eq!(ws.wed.close, t(17, 0));
    }

    #[test]
    fn booking_effective_status_derivation() {
        let now = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let mut b = Booking {
            id: Ulid::new(),
            student: Ulid::new(),
            room: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start_time: t(9, 0),
            end_time: t(11, 0),
            purpose: String::new(),
            status: BookingStatus::Confirmed,
            created_at: 0,
            cancelled_at: None,
        };
        // Ended an hour ago → reads completed even though the store says confirmed.
        assert_eq!(b.effective_status(now), BookingStatus::Completed);

        // Still running at noon.
        b.end_time = t(14, 0);
        assert_eq!(b.effective_status(now), BookingStatus::Confirmed);

        // Cancelled bookings never flip to completed.
        b.end_time = t(11, 0);
        b.status = BookingStatus::Cancelled;
        assert_eq!(b.effective_status(now), BookingStatus::Cancelled);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCancelled {
            id: Ulid::new(),
            at: 1_700_000_000_000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn clock_time_json_is_string() {
        let json = serde_json::to_string(&t(8, 5)).unwrap();
        assert_eq!(json, "\"08:05\"");
        let back: ClockTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t(8, 5));
    }
}
