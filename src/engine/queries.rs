use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::availability::free_within;
use super::rules::library_hours;
use super::{Engine, EngineError};

impl Engine {
    // ── Reservations ─────────────────────────────────────────

    /// A student's own bookings, newest first. Statuses are the derived
    /// view — a booking whose end has passed reads as completed even
    /// before the sweep persists it.
    pub async fn my_bookings(&self, caller: &Identity, now: NaiveDateTime) -> Vec<Booking> {
        let ledger = self.bookings.read().await;
        let mut mine: Vec<Booking> = ledger
            .iter()
            .filter(|b| b.student == caller.user)
            .cloned()
            .map(|mut b| {
                b.status = b.effective_status(now);
                b
            })
            .collect();
        mine.sort_by(|a, b| b.date.cmp(&a.date).then(a.start_time.cmp(&b.start_time)));
        mine
    }

    /// Every booking, for the admin view. Runs the completion sweep first,
    /// so the statuses it returns are persisted, not just derived.
    pub async fn list_all_bookings(
        &self,
        caller: &Identity,
        now: NaiveDateTime,
    ) -> Result<Vec<Booking>, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        self.sweep_completed(now).await?;

        let ledger = self.bookings.read().await;
        let mut all: Vec<Booking> = ledger.iter().cloned().collect();
        all.sort_by(|a, b| b.date.cmp(&a.date).then(a.start_time.cmp(&b.start_time)));
        Ok(all)
    }

    /// A student's own meeting requests, newest first.
    pub async fn my_meetings(&self, caller: &Identity) -> Vec<Meeting> {
        let ledger = self.meetings.read().await;
        let mut mine: Vec<Meeting> = ledger
            .iter()
            .filter(|m| m.student == caller.user)
            .cloned()
            .collect();
        mine.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(b.preferred_time.cmp(&a.preferred_time))
        });
        mine
    }

    /// Staff meeting listing: admins see everything, librarians only the
    /// meetings assigned to them.
    pub async fn list_meetings(&self, caller: &Identity) -> Result<Vec<Meeting>, EngineError> {
        if !caller.is_staff() {
            return Err(EngineError::Forbidden("staff only"));
        }
        let ledger = self.meetings.read().await;
        let mut out: Vec<Meeting> = ledger
            .iter()
            .filter(|m| caller.is_admin() || m.librarian == caller.user)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(b.preferred_time.cmp(&a.preferred_time))
        });
        Ok(out)
    }

    // ── Availability projections ─────────────────────────────
    //
    // Pure reads for display. They may be stale by the time a request is
    // attempted; admission re-validates under the ledger write guard.

    /// Taken intervals per room on `date` (active bookings only).
    pub async fn taken_slots(&self, date: NaiveDate) -> HashMap<Ulid, Vec<TimeRange>> {
        self.bookings.read().await.taken_by_room(date)
    }

    /// Taken discrete slots for one librarian on `date`.
    pub async fn taken_meeting_slots(&self, librarian: Ulid, date: NaiveDate) -> Vec<ClockTime> {
        self.meetings.read().await.taken_slots(librarian, date)
    }

    /// Free intervals for one room on `date`: the library-hours window for
    /// that weekday minus the taken intervals.
    pub async fn free_room_ranges(
        &self,
        room_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TimeRange>, EngineError> {
        let room = self
            .rooms
            .get(&room_id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::NotFound(room_id))?;
        if !room.is_active {
            return Err(EngineError::RoomUnavailable(room_id));
        }

        let window = library_hours(date.weekday());
        let ledger = self.bookings.read().await;
        let taken = ledger
            .taken_by_room(date)
            .remove(&room_id)
            .unwrap_or_default();
        Ok(free_within(window, &taken))
    }

    // ── Directories & settings ───────────────────────────────

    /// Rooms open for booking, sorted by name — the student view.
    pub fn list_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|e| e.value().is_active)
            .map(|e| e.value().clone())
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Every room including retired ones — the admin view.
    pub fn list_all_rooms(&self, caller: &Identity) -> Result<Vec<Room>, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<Room> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Librarians accepting meetings, sorted by name — the student view.
    pub fn list_librarians(&self) -> Vec<Librarian> {
        let mut libs: Vec<Librarian> = self
            .librarians
            .iter()
            .filter(|e| e.value().is_available)
            .map(|e| e.value().clone())
            .collect();
        libs.sort_by(|a, b| a.name.cmp(&b.name));
        libs
    }

    pub fn list_all_librarians(&self, caller: &Identity) -> Result<Vec<Librarian>, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        let mut libs: Vec<Librarian> = self.librarians.iter().map(|e| e.value().clone()).collect();
        libs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(libs)
    }

    pub fn get_librarian(&self, id: &Ulid) -> Option<Librarian> {
        self.librarians.get(id).map(|e| e.value().clone())
    }

    /// Current policy values. Public — the student booking page needs the
    /// duration cap and advance window to render its form.
    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }
}
