//! In-memory reservation ledgers with the secondary indexes the constraint
//! checks query: (resource, date) and (requester, date). Records are never
//! removed — cancellation and completion are status writes — so the indexes
//! only ever move entries on a reschedule.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, ClockTime, Event, Meeting, MeetingStatus, TimeRange};

use super::rules::week_bounds;
use super::EngineError;

fn push_key(index: &mut HashMap<(Ulid, NaiveDate), Vec<Ulid>>, key: (Ulid, NaiveDate), id: Ulid) {
    index.entry(key).or_default().push(id);
}

fn drop_key(index: &mut HashMap<(Ulid, NaiveDate), Vec<Ulid>>, key: (Ulid, NaiveDate), id: Ulid) {
    if let Some(ids) = index.get_mut(&key) {
        ids.retain(|x| *x != id);
        if ids.is_empty() {
            index.remove(&key);
        }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct BookingLedger {
    by_id: HashMap<Ulid, Booking>,
    by_room_date: HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
    by_student_date: HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
}

impl BookingLedger {
    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.by_id.values()
    }

    fn active<'a>(
        &'a self,
        index: &'a HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
        key: (Ulid, NaiveDate),
    ) -> impl Iterator<Item = &'a Booking> {
        index
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .filter(|b| b.status.is_active())
    }

    /// One active booking per student per day, no matter the room.
    pub fn check_daily_limit(
        &self,
        student: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let held = self
            .active(&self.by_student_date, (student, date))
            .any(|b| Some(b.id) != exclude);
        if held {
            Err(EngineError::DailyLimitReached)
        } else {
            Ok(())
        }
    }

    /// At most two active bookings in the Monday–Sunday week containing
    /// `date`.
    pub fn check_weekly_limit(
        &self,
        student: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let (start, _end) = week_bounds(date);
        let mut count = 0usize;
        for offset in 0..7u64 {
            let day = start
                .checked_add_days(Days::new(offset))
                .expect("date within calendar range");
            count += self
                .active(&self.by_student_date, (student, day))
                .filter(|b| Some(b.id) != exclude)
                .count();
        }
        if count >= 2 {
            Err(EngineError::WeeklyLimitReached)
        } else {
            Ok(())
        }
    }

    /// No other active booking on the room+date may overlap the range.
    pub fn check_room_conflict(
        &self,
        room: Ulid,
        date: NaiveDate,
        range: TimeRange,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let hit = self
            .active(&self.by_room_date, (room, date))
            .find(|b| Some(b.id) != exclude && b.range().overlaps(&range));
        match hit {
            Some(b) => Err(EngineError::RoomConflict(b.id)),
            None => Ok(()),
        }
    }

    /// No active booking by the same student on the date (any room) may
    /// overlap the range.
    pub fn check_self_overlap(
        &self,
        student: Ulid,
        date: NaiveDate,
        range: TimeRange,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let hit = self
            .active(&self.by_student_date, (student, date))
            .find(|b| Some(b.id) != exclude && b.range().overlaps(&range));
        match hit {
            Some(b) => Err(EngineError::SelfOverlap(b.id)),
            None => Ok(()),
        }
    }

    /// Active taken ranges per room on `date`, sorted by start.
    pub fn taken_by_room(&self, date: NaiveDate) -> HashMap<Ulid, Vec<TimeRange>> {
        let mut out: HashMap<Ulid, Vec<TimeRange>> = HashMap::new();
        for b in self.by_id.values() {
            if b.date == date && b.status.is_active() {
                out.entry(b.room).or_default().push(b.range());
            }
        }
        for ranges in out.values_mut() {
            ranges.sort_by_key(|r| r.start);
        }
        out
    }

    /// Active bookings whose end has passed — the sweep's work list.
    pub fn finished_active(&self, now: chrono::NaiveDateTime) -> Vec<Ulid> {
        self.by_id
            .values()
            .filter(|b| b.status.is_active() && b.is_over(now))
            .map(|b| b.id)
            .collect()
    }

    /// Apply a booking event. Caller holds the write guard; WAL append has
    /// already succeeded.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingConfirmed { booking } => {
                push_key(&mut self.by_room_date, (booking.room, booking.date), booking.id);
                push_key(
                    &mut self.by_student_date,
                    (booking.student, booking.date),
                    booking.id,
                );
                self.by_id.insert(booking.id, booking.clone());
            }
            Event::BookingRescheduled {
                id,
                date,
                start_time,
                end_time,
                purpose,
            } => {
                if let Some(b) = self.by_id.get_mut(id) {
                    if b.date != *date {
                        drop_key(&mut self.by_room_date, (b.room, b.date), *id);
                        drop_key(&mut self.by_student_date, (b.student, b.date), *id);
                        push_key(&mut self.by_room_date, (b.room, *date), *id);
                        push_key(&mut self.by_student_date, (b.student, *date), *id);
                    }
                    b.date = *date;
                    b.start_time = *start_time;
                    b.end_time = *end_time;
                    if let Some(p) = purpose {
                        b.purpose = p.clone();
                    }
                }
            }
            Event::BookingCancelled { id, at } => {
                if let Some(b) = self.by_id.get_mut(id) {
                    b.status = BookingStatus::Cancelled;
                    b.cancelled_at = Some(*at);
                }
            }
            Event::BookingsCompleted { ids } => {
                for id in ids {
                    if let Some(b) = self.by_id.get_mut(id)
                        && b.status.is_active()
                    {
                        b.status = BookingStatus::Completed;
                    }
                }
            }
            _ => {}
        }
    }
}

// ── Meetings ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MeetingLedger {
    by_id: HashMap<Ulid, Meeting>,
    by_librarian_date: HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
    by_student_date: HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
}

impl MeetingLedger {
    pub fn get(&self, id: &Ulid) -> Option<&Meeting> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Meeting> {
        self.by_id.values()
    }

    fn active<'a>(
        &'a self,
        index: &'a HashMap<(Ulid, NaiveDate), Vec<Ulid>>,
        key: (Ulid, NaiveDate),
    ) -> impl Iterator<Item = &'a Meeting> {
        index
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .filter(|m| m.status.is_active())
    }

    /// Meetings collide on the exact slot, not on interval overlap.
    pub fn check_slot_free(
        &self,
        librarian: Ulid,
        date: NaiveDate,
        slot: ClockTime,
    ) -> Result<(), EngineError> {
        let taken = self
            .active(&self.by_librarian_date, (librarian, date))
            .any(|m| m.preferred_time == slot);
        if taken {
            Err(EngineError::SlotTaken)
        } else {
            Ok(())
        }
    }

    /// One active meeting per student per day, across all librarians.
    pub fn check_daily_limit(&self, student: Ulid, date: NaiveDate) -> Result<(), EngineError> {
        if self.active(&self.by_student_date, (student, date)).next().is_some() {
            Err(EngineError::DailyLimitReached)
        } else {
            Ok(())
        }
    }

    /// Taken slots for one librarian on one date, sorted.
    pub fn taken_slots(&self, librarian: Ulid, date: NaiveDate) -> Vec<ClockTime> {
        let mut slots: Vec<ClockTime> = self
            .active(&self.by_librarian_date, (librarian, date))
            .map(|m| m.preferred_time)
            .collect();
        slots.sort();
        slots
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::MeetingRequested { meeting } => {
                push_key(
                    &mut self.by_librarian_date,
                    (meeting.librarian, meeting.date),
                    meeting.id,
                );
                push_key(
                    &mut self.by_student_date,
                    (meeting.student, meeting.date),
                    meeting.id,
                );
                self.by_id.insert(meeting.id, meeting.clone());
            }
            Event::MeetingReviewed {
                id,
                status,
                note,
                reviewed_by,
                at,
            } => {
                if let Some(m) = self.by_id.get_mut(id) {
                    m.status = *status;
                    if let Some(n) = note {
                        m.librarian_note = n.clone();
                    }
                    m.reviewed_by = Some(*reviewed_by);
                    m.reviewed_at = Some(*at);
                }
            }
            Event::MeetingCancelled { id, .. } => {
                if let Some(m) = self.by_id.get_mut(id) {
                    m.status = MeetingStatus::Cancelled;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ms;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn t(h: u16, m: u16) -> ClockTime {
        ClockTime::from_hm(h, m).unwrap()
    }

    fn booking(student: Ulid, room: Ulid, day: u32, sh: u16, eh: u16) -> Booking {
        Booking {
            id: Ulid::new(),
            student,
            room,
            date: d(day),
            start_time: t(sh, 0),
            end_time: t(eh, 0),
            purpose: String::new(),
            status: BookingStatus::Confirmed,
            created_at: 0 as Ms,
            cancelled_at: None,
        }
    }

    fn insert(ledger: &mut BookingLedger, b: &Booking) {
        ledger.apply(&Event::BookingConfirmed { booking: b.clone() });
    }

    #[test]
    fn room_conflict_respects_adjacency() {
        let mut ledger = BookingLedger::default();
        let room = Ulid::new();
        let existing = booking(Ulid::new(), room, 2, 9, 11);
        insert(&mut ledger, &existing);

        let overlap = TimeRange::new(t(10, 0), t(12, 0));
        let err = ledger
            .check_room_conflict(room, d(2), overlap, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::RoomConflict(id) if id == existing.id));

        // Back-to-back is allowed: [9,11) then [11,12).
        let adjacent = TimeRange::new(t(11, 0), t(12, 0));
        assert!(ledger.check_room_conflict(room, d(2), adjacent, None).is_ok());
    }

    #[test]
    fn cancelled_bookings_do_not_conflict() {
        let mut ledger = BookingLedger::default();
        let room = Ulid::new();
        let b = booking(Ulid::new(), room, 2, 9, 11);
        insert(&mut ledger, &b);
        ledger.apply(&Event::BookingCancelled { id: b.id, at: 1 });

        let range = TimeRange::new(t(9, 0), t(11, 0));
        assert!(ledger.check_room_conflict(room, d(2), range, None).is_ok());
        assert!(ledger.check_daily_limit(b.student, d(2), None).is_ok());
    }

    #[test]
    fn daily_limit_counts_any_room() {
        let mut ledger = BookingLedger::default();
        let student = Ulid::new();
        insert(&mut ledger, &booking(student, Ulid::new(), 2, 9, 11));

        let err = ledger.check_daily_limit(student, d(2), None).unwrap_err();
        assert!(matches!(err, EngineError::DailyLimitReached));
        // Other students unaffected.
        assert!(ledger.check_daily_limit(Ulid::new(), d(2), None).is_ok());
        // Other days unaffected.
        assert!(ledger.check_daily_limit(student, d(3), None).is_ok());
    }

    #[test]
    fn weekly_limit_is_two_in_monday_week() {
        let mut ledger = BookingLedger::default();
        let student = Ulid::new();
        // 2026-03-02 (Mon) and 03-04 (Wed) — two bookings in the week.
        insert(&mut ledger, &booking(student, Ulid::new(), 2, 9, 11));
        assert!(ledger.check_weekly_limit(student, d(4), None).is_ok());
        insert(&mut ledger, &booking(student, Ulid::new(), 4, 9, 11));

        let err = ledger.check_weekly_limit(student, d(6), None).unwrap_err();
        assert!(matches!(err, EngineError::WeeklyLimitReached));
        // Next week (Mon 03-09) is a fresh count.
        assert!(ledger.check_weekly_limit(student, d(9), None).is_ok());
    }

    #[test]
    fn self_overlap_across_rooms() {
        let mut ledger = BookingLedger::default();
        let student = Ulid::new();
        let b = booking(student, Ulid::new(), 2, 9, 11);
        insert(&mut ledger, &b);

        let other_room_range = TimeRange::new(t(10, 0), t(12, 0));
        let err = ledger
            .check_self_overlap(student, d(2), other_room_range, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::SelfOverlap(id) if id == b.id));

        // Excluding the booking itself (reschedule path) clears the check.
        assert!(ledger
            .check_self_overlap(student, d(2), other_room_range, Some(b.id))
            .is_ok());
    }

    #[test]
    fn reschedule_moves_indexes() {
        let mut ledger = BookingLedger::default();
        let room = Ulid::new();
        let b = booking(Ulid::new(), room, 2, 9, 11);
        insert(&mut ledger, &b);

        ledger.apply(&Event::BookingRescheduled {
            id: b.id,
            date: d(3),
            start_time: t(14, 0),
            end_time: t(16, 0),
            purpose: None,
        });

        let range = TimeRange::new(t(9, 0), t(11, 0));
        assert!(ledger.check_room_conflict(room, d(2), range, None).is_ok());
        let moved = TimeRange::new(t(15, 0), t(17, 0));
        assert!(ledger.check_room_conflict(room, d(3), moved, None).is_err());
        assert_eq!(ledger.get(&b.id).unwrap().start_time, t(14, 0));
    }

    #[test]
    fn sweep_work_list_skips_future_and_terminal() {
        let mut ledger = BookingLedger::default();
        let past = booking(Ulid::new(), Ulid::new(), 2, 9, 11);
        let future = booking(Ulid::new(), Ulid::new(), 4, 9, 11);
        let cancelled = booking(Ulid::new(), Ulid::new(), 2, 9, 11);
        insert(&mut ledger, &past);
        insert(&mut ledger, &future);
        insert(&mut ledger, &cancelled);
        ledger.apply(&Event::BookingCancelled { id: cancelled.id, at: 1 });

        let now = d(3).and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(ledger.finished_active(now), vec![past.id]);

        ledger.apply(&Event::BookingsCompleted { ids: vec![past.id] });
        assert!(ledger.finished_active(now).is_empty());
        assert_eq!(ledger.get(&past.id).unwrap().status, BookingStatus::Completed);
    }

    fn meeting(student: Ulid, librarian: Ulid, day: u32, slot: ClockTime) -> Meeting {
        Meeting {
            id: Ulid::new(),
            student,
            librarian,
            date: d(day),
            preferred_time: slot,
            topic: "citations".into(),
            notes: String::new(),
            status: MeetingStatus::Pending,
            librarian_note: String::new(),
            reviewed_by: None,
            reviewed_at: None,
            created_at: 0,
        }
    }

    #[test]
    fn slot_collision_is_exact_match() {
        let mut ledger = MeetingLedger::default();
        let librarian = Ulid::new();
        let m = meeting(Ulid::new(), librarian, 2, t(10, 0));
        ledger.apply(&Event::MeetingRequested { meeting: m });

        assert!(ledger.check_slot_free(librarian, d(2), t(10, 0)).is_err());
        // A different slot the same day is fine — no interval semantics.
        assert!(ledger.check_slot_free(librarian, d(2), t(10, 30)).is_ok());
        assert!(ledger.check_slot_free(librarian, d(2), t(11, 0)).is_ok());
    }

    #[test]
    fn rejected_meeting_frees_slot_and_day() {
        let mut ledger = MeetingLedger::default();
        let librarian = Ulid::new();
        let student = Ulid::new();
        let m = meeting(student, librarian, 2, t(10, 0));
        let reviewer = Ulid::new();
        ledger.apply(&Event::MeetingRequested { meeting: m.clone() });
        ledger.apply(&Event::MeetingReviewed {
            id: m.id,
            status: MeetingStatus::Rejected,
            note: Some("try the FAQ first".into()),
            reviewed_by: reviewer,
            at: 99,
        });

        assert!(ledger.check_slot_free(librarian, d(2), t(10, 0)).is_ok());
        assert!(ledger.check_daily_limit(student, d(2)).is_ok());
        let stored = ledger.get(&m.id).unwrap();
        assert_eq!(stored.reviewed_by, Some(reviewer));
        assert_eq!(stored.librarian_note, "try the FAQ first");
    }

    #[test]
    fn approved_meeting_still_holds_slot() {
        let mut ledger = MeetingLedger::default();
        let librarian = Ulid::new();
        let m = meeting(Ulid::new(), librarian, 2, t(10, 0));
        ledger.apply(&Event::MeetingRequested { meeting: m.clone() });
        ledger.apply(&Event::MeetingReviewed {
            id: m.id,
            status: MeetingStatus::Approved,
            note: None,
            reviewed_by: Ulid::new(),
            at: 99,
        });

        assert!(ledger.check_slot_free(librarian, d(2), t(10, 0)).is_err());
        assert_eq!(ledger.taken_slots(librarian, d(2)), vec![t(10, 0)]);
    }
}
