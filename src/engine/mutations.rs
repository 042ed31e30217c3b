use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::{now_ms, validate_booking_window, validate_meeting_window};
use super::{Engine, EngineError};

impl Engine {
    // ── Bookings ─────────────────────────────────────────────

    /// Admit or reject a room booking. Checks run in a fixed order and the
    /// first failure wins; on success the booking is persisted directly as
    /// confirmed (pending is reserved for administrator repurposing).
    pub async fn create_booking(
        &self,
        requester: &Identity,
        room_id: Ulid,
        date: NaiveDate,
        start_time: ClockTime,
        end_time: ClockTime,
        purpose: String,
        now: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        if purpose.len() > MAX_PURPOSE_LEN {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }
        let room = self
            .rooms
            .get(&room_id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::NotFound(room_id))?;
        if !room.is_active {
            return Err(EngineError::RoomUnavailable(room_id));
        }

        let settings = self.settings.read().await.clone();
        validate_booking_window(date, start_time, end_time, &settings, now)?;

        // Ledger checks and the insert share one write guard: a concurrent
        // request for the same room, slot, or student serializes behind us
        // and re-validates against the state we leave behind.
        let mut ledger = self.bookings.write().await;
        ledger.check_daily_limit(requester.user, date, None)?;
        ledger.check_weekly_limit(requester.user, date, None)?;
        let range = TimeRange::new(start_time, end_time);
        ledger.check_room_conflict(room_id, date, range, None)?;
        ledger.check_self_overlap(requester.user, date, range, None)?;

        let booking = Booking {
            id: Ulid::new(),
            student: requester.user,
            room: room_id,
            date,
            start_time,
            end_time,
            purpose,
            status: BookingStatus::Confirmed,
            created_at: now_ms(),
            cancelled_at: None,
        };
        self.commit_booking(
            &mut ledger,
            room_id,
            Event::BookingConfirmed {
                booking: booking.clone(),
            },
        )
        .await?;
        Ok(booking)
    }

    /// Move an existing booking (owner or admin). The collision re-check
    /// excludes the booking being moved — this is the one path where the
    /// self-overlap rule does real work, since the daily cap ignores it.
    pub async fn reschedule_booking(
        &self,
        requester: &Identity,
        id: Ulid,
        date: NaiveDate,
        start_time: ClockTime,
        end_time: ClockTime,
        purpose: Option<String>,
        now: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        if let Some(ref p) = purpose
            && p.len() > MAX_PURPOSE_LEN
        {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }

        let mut ledger = self.bookings.write().await;
        let current = ledger.get(&id).ok_or(EngineError::NotFound(id))?.clone();
        if !requester.is_admin() && current.student != requester.user {
            return Err(EngineError::Forbidden("you can only change your own bookings"));
        }
        let effective = current.effective_status(now);
        if effective.is_terminal() {
            return Err(EngineError::TerminalState(effective.label()));
        }

        let settings = self.settings.read().await.clone();
        validate_booking_window(date, start_time, end_time, &settings, now)?;

        let range = TimeRange::new(start_time, end_time);
        ledger.check_room_conflict(current.room, date, range, Some(id))?;
        ledger.check_self_overlap(current.student, date, range, Some(id))?;

        self.commit_booking(
            &mut ledger,
            current.room,
            Event::BookingRescheduled {
                id,
                date,
                start_time,
                end_time,
                purpose,
            },
        )
        .await?;
        ledger.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Cancel a booking (owner or admin). Cancellation is a status write,
    /// never a delete, and a booking that already ran to completion —
    /// swept or not — can no longer be cancelled.
    pub async fn cancel_booking(
        &self,
        requester: &Identity,
        id: Ulid,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        let mut ledger = self.bookings.write().await;
        let current = ledger.get(&id).ok_or(EngineError::NotFound(id))?;
        if !requester.is_admin() && current.student != requester.user {
            return Err(EngineError::Forbidden("you can only cancel your own bookings"));
        }
        let effective = current.effective_status(now);
        if effective.is_terminal() {
            return Err(EngineError::TerminalState(effective.label()));
        }

        let room = current.room;
        self.commit_booking(
            &mut ledger,
            room,
            Event::BookingCancelled { id, at: now_ms() },
        )
        .await
    }

    /// Batch-persist the passive pending/confirmed → completed transition
    /// for every booking whose end has passed. Called by the background
    /// sweeper and by the admin listing.
    pub async fn sweep_completed(&self, now: NaiveDateTime) -> Result<Vec<Ulid>, EngineError> {
        let mut ledger = self.bookings.write().await;
        let ids = ledger.finished_active(now);
        if ids.is_empty() {
            return Ok(ids);
        }
        let event = Event::BookingsCompleted { ids: ids.clone() };
        self.wal_append(&event).await?;
        ledger.apply(&event);
        metrics::counter!(crate::observability::BOOKINGS_SWEPT_TOTAL)
            .increment(ids.len() as u64);
        Ok(ids)
    }

    // ── Meetings ─────────────────────────────────────────────

    /// Admit or reject a consultation request. Meetings are discretized to
    /// slots and always start life pending staff review.
    pub async fn create_meeting(
        &self,
        requester: &Identity,
        librarian_id: Ulid,
        date: NaiveDate,
        preferred_time: ClockTime,
        topic: String,
        notes: String,
        now: NaiveDateTime,
    ) -> Result<Meeting, EngineError> {
        if topic.trim().is_empty() {
            return Err(EngineError::MissingField("topic"));
        }
        if topic.len() > MAX_TOPIC_LEN {
            return Err(EngineError::LimitExceeded("topic too long"));
        }
        if notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let librarian = self
            .librarians
            .get(&librarian_id)
            .map(|l| l.value().clone())
            .ok_or(EngineError::NotFound(librarian_id))?;

        let settings = self.settings.read().await.clone();
        validate_meeting_window(date, preferred_time, &librarian, &settings, now)?;

        let mut ledger = self.meetings.write().await;
        ledger.check_slot_free(librarian_id, date, preferred_time)?;
        ledger.check_daily_limit(requester.user, date)?;

        let meeting = Meeting {
            id: Ulid::new(),
            student: requester.user,
            librarian: librarian_id,
            date,
            preferred_time,
            topic,
            notes,
            status: MeetingStatus::Pending,
            librarian_note: String::new(),
            reviewed_by: None,
            reviewed_at: None,
            created_at: now_ms(),
        };
        self.commit_meeting(
            &mut ledger,
            librarian_id,
            Event::MeetingRequested {
                meeting: meeting.clone(),
            },
        )
        .await?;
        Ok(meeting)
    }

    /// Approve or reject a pending meeting. Admins may review any meeting;
    /// librarians only the ones assigned to them.
    pub async fn review_meeting(
        &self,
        reviewer: &Identity,
        id: Ulid,
        decision: ReviewDecision,
        note: Option<String>,
    ) -> Result<Meeting, EngineError> {
        if !reviewer.is_staff() {
            return Err(EngineError::Forbidden("only staff may review meetings"));
        }
        if let Some(ref n) = note
            && n.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("note too long"));
        }

        let mut ledger = self.meetings.write().await;
        let current = ledger.get(&id).ok_or(EngineError::NotFound(id))?;
        if reviewer.role == Role::Librarian && current.librarian != reviewer.user {
            return Err(EngineError::Forbidden(
                "you can only review meetings assigned to you",
            ));
        }
        if current.status.is_terminal() {
            return Err(EngineError::TerminalState(current.status.label()));
        }

        let librarian = current.librarian;
        let status = match decision {
            ReviewDecision::Approve => MeetingStatus::Approved,
            ReviewDecision::Reject => MeetingStatus::Rejected,
        };
        self.commit_meeting(
            &mut ledger,
            librarian,
            Event::MeetingReviewed {
                id,
                status,
                note,
                reviewed_by: reviewer.user,
                at: now_ms(),
            },
        )
        .await?;
        ledger.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Cancel a meeting: the requesting student, an admin, or the assigned
    /// librarian. Only pending meetings can be cancelled — every reviewed
    /// state is final.
    pub async fn cancel_meeting(&self, requester: &Identity, id: Ulid) -> Result<(), EngineError> {
        let mut ledger = self.meetings.write().await;
        let current = ledger.get(&id).ok_or(EngineError::NotFound(id))?;

        let is_owner = current.student == requester.user;
        let is_assigned = requester.role == Role::Librarian && current.librarian == requester.user;
        if !is_owner && !requester.is_admin() && !is_assigned {
            return Err(EngineError::Forbidden("you can only cancel your own meetings"));
        }
        if current.status.is_terminal() {
            return Err(EngineError::TerminalState(current.status.label()));
        }

        let librarian = current.librarian;
        self.commit_meeting(
            &mut ledger,
            librarian,
            Event::MeetingCancelled { id, at: now_ms() },
        )
        .await
    }

    // ── Directories ──────────────────────────────────────────

    pub async fn create_room(&self, caller: &Identity, new: NewRoom) -> Result<Room, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        validate_room_fields(&new.name, &new.location, &new.amenities)?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let room = Room {
            id: Ulid::new(),
            name: new.name,
            capacity: new.capacity,
            location: new.location,
            amenities: new.amenities,
            description: new.description,
            is_active: true,
        };
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms.insert(room.id, room.clone());
        self.notify.publish(room.id, &event);
        Ok(room)
    }

    pub async fn update_room(
        &self,
        caller: &Identity,
        id: Ulid,
        patch: RoomPatch,
    ) -> Result<Room, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        let mut room = self
            .rooms
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::NotFound(id))?;

        if let Some(name) = patch.name {
            room.name = name;
        }
        if let Some(capacity) = patch.capacity {
            room.capacity = capacity;
        }
        if let Some(location) = patch.location {
            room.location = location;
        }
        if let Some(amenities) = patch.amenities {
            room.amenities = amenities;
        }
        if let Some(description) = patch.description {
            room.description = description;
        }
        if let Some(is_active) = patch.is_active {
            room.is_active = is_active;
        }
        validate_room_fields(&room.name, &room.location, &room.amenities)?;

        let event = Event::RoomUpdated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms.insert(id, room.clone());
        self.notify.publish(id, &event);
        Ok(room)
    }

    /// Soft-delete: the room disappears from booking but its historical
    /// reservations remain.
    pub async fn retire_room(&self, caller: &Identity, id: Ulid) -> Result<(), EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        if !self.rooms.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::RoomRetired { id };
        self.wal_append(&event).await?;
        if let Some(mut room) = self.rooms.get_mut(&id) {
            room.is_active = false;
        }
        self.notify.publish(id, &event);
        Ok(())
    }

    pub async fn register_librarian(
        &self,
        caller: &Identity,
        new: NewLibrarian,
    ) -> Result<Librarian, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }
        if new.name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }
        if new.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if self.librarians.len() >= MAX_LIBRARIANS {
            return Err(EngineError::LimitExceeded("too many librarians"));
        }

        let librarian = Librarian {
            id: Ulid::new(),
            name: new.name,
            specialty: new.specialty,
            is_available: true,
            working_hours: new.working_hours.unwrap_or_default(),
        };
        let event = Event::LibrarianRegistered {
            librarian: librarian.clone(),
        };
        self.wal_append(&event).await?;
        self.librarians.insert(librarian.id, librarian.clone());
        self.notify.publish(librarian.id, &event);
        Ok(librarian)
    }

    /// Admins manage any librarian; librarians manage their own schedule
    /// and availability toggle.
    pub async fn update_librarian(
        &self,
        caller: &Identity,
        id: Ulid,
        patch: LibrarianPatch,
    ) -> Result<Librarian, EngineError> {
        if !caller.is_admin() && !(caller.role == Role::Librarian && caller.user == id) {
            return Err(EngineError::Forbidden("you can only edit your own schedule"));
        }
        let mut librarian = self
            .librarians
            .get(&id)
            .map(|l| l.value().clone())
            .ok_or(EngineError::NotFound(id))?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(EngineError::MissingField("name"));
            }
            if name.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("name too long"));
            }
            librarian.name = name;
        }
        if let Some(specialty) = patch.specialty {
            librarian.specialty = specialty;
        }
        if let Some(is_available) = patch.is_available {
            librarian.is_available = is_available;
        }
        if let Some(working_hours) = patch.working_hours {
            for day in [
                &working_hours.mon,
                &working_hours.tue,
                &working_hours.wed,
                &working_hours.thu,
                &working_hours.fri,
                &working_hours.sat,
                &working_hours.sun,
            ] {
                if day.enabled && day.open >= day.close {
                    return Err(EngineError::InvalidSetting("open must be before close"));
                }
            }
            librarian.working_hours = working_hours;
        }

        let event = Event::LibrarianUpdated {
            librarian: librarian.clone(),
        };
        self.wal_append(&event).await?;
        self.librarians.insert(id, librarian.clone());
        self.notify.publish(id, &event);
        Ok(librarian)
    }

    // ── Settings ─────────────────────────────────────────────

    /// Update the policy singleton. New values govern the next validation
    /// call, never anything already admitted.
    pub async fn update_settings(
        &self,
        caller: &Identity,
        patch: SettingsPatch,
    ) -> Result<Settings, EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden("admin only"));
        }

        let mut guard = self.settings.write().await;
        let mut next = guard.clone();
        if let Some(hours) = patch.max_booking_duration {
            if !(MIN_BOOKING_DURATION_HOURS..=MAX_BOOKING_DURATION_HOURS).contains(&hours) {
                return Err(EngineError::InvalidSetting("maxBookingDuration out of range"));
            }
            next.max_booking_duration = hours;
        }
        if let Some(days) = patch.max_advance_days {
            if !(MIN_ADVANCE_DAYS..=MAX_ADVANCE_DAYS).contains(&days) {
                return Err(EngineError::InvalidSetting("maxAdvanceDays out of range"));
            }
            next.max_advance_days = days;
        }
        if let Some(name) = patch.library_name {
            next.library_name = name;
        }
        if let Some(email) = patch.support_email {
            next.support_email = email;
        }
        if let Some(code) = patch.librarian_code {
            next.librarian_code = code;
        }

        self.wal_append(&Event::SettingsChanged {
            settings: next.clone(),
        })
        .await?;
        *guard = next.clone();
        Ok(next)
    }
}

fn validate_room_fields(
    name: &str,
    location: &str,
    amenities: &[String],
) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::MissingField("name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    if location.len() > MAX_LOCATION_LEN {
        return Err(EngineError::LimitExceeded("location too long"));
    }
    if amenities.len() > MAX_AMENITIES {
        return Err(EngineError::LimitExceeded("too many amenities"));
    }
    Ok(())
}
