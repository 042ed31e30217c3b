//! End-to-end exercise of the reservation engine through its public API:
//! a student's full journey, the staff review flow, change notifications,
//! and durability across a restart.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use carrel::engine::{Engine, EngineError};
use carrel::model::*;
use carrel::notify::NotifyHub;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("carrel_int_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn t(h: u16, m: u16) -> ClockTime {
    ClockTime::from_hm(h, m).unwrap()
}

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

/// Noon on Sunday 2026-03-01.
fn now() -> NaiveDateTime {
    d(1).and_hms_opt(12, 0, 0).unwrap()
}

fn ident(role: Role) -> Identity {
    Identity {
        user: Ulid::new(),
        role,
    }
}

#[tokio::test]
async fn student_journey_with_restart() {
    let path = test_wal_path("journey.wal");
    let admin = ident(Role::Admin);
    let alice = ident(Role::Student);

    let (room_id, booking_id, librarian_id, meeting_id) = {
        let engine = Engine::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();

        // Admin sets up the directory.
        let room = engine
            .create_room(
                &admin,
                NewRoom {
                    name: "Group Study A".into(),
                    capacity: 6,
                    location: "Level 2 North".into(),
                    amenities: vec!["Whiteboard".into(), "Projector".into()],
                    description: "Six-seat room with a wall screen".into(),
                },
            )
            .await
            .unwrap();
        let librarian = engine
            .register_librarian(
                &admin,
                NewLibrarian {
                    name: "R. Okafor".into(),
                    specialty: "systematic reviews".into(),
                    working_hours: None,
                },
            )
            .await
            .unwrap();

        // Alice books a room for Monday and requests a consultation Tuesday.
        let booking = engine
            .create_booking(
                &alice,
                room.id,
                d(2),
                t(9, 0),
                t(11, 0),
                "capstone group".into(),
                now(),
            )
            .await
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);

        let meeting = engine
            .create_meeting(
                &alice,
                librarian.id,
                d(3),
                t(10, 0),
                "search strategy".into(),
                "first-year project".into(),
                now(),
            )
            .await
            .unwrap();
        assert_eq!(meeting.status, MeetingStatus::Pending);

        // The scheduler page sees both projections.
        let taken = engine.taken_slots(d(2)).await;
        assert_eq!(taken[&room.id], vec![TimeRange::new(t(9, 0), t(11, 0))]);
        assert_eq!(
            engine.taken_meeting_slots(librarian.id, d(3)).await,
            vec![t(10, 0)]
        );

        (room.id, booking.id, librarian.id, meeting.id)
    };

    // Restart: everything replays from the WAL.
    let engine = Engine::open(path, Arc::new(NotifyHub::new())).unwrap();

    let mine = engine.my_bookings(&alice, now()).await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, booking_id);
    assert_eq!(mine[0].purpose, "capstone group");

    // The librarian reviews the replayed meeting.
    let reviewer = Identity {
        user: librarian_id,
        role: Role::Librarian,
    };
    let approved = engine
        .review_meeting(&reviewer, meeting_id, ReviewDecision::Approve, None)
        .await
        .unwrap();
    assert_eq!(approved.status, MeetingStatus::Approved);

    // The replayed booking still defends its slot...
    let bob = ident(Role::Student);
    let err = engine
        .create_booking(&bob, room_id, d(2), t(10, 0), t(12, 0), String::new(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RoomConflict(_)));

    // ...until Alice cancels, after which Bob gets it.
    engine.cancel_booking(&alice, booking_id, now()).await.unwrap();
    engine
        .create_booking(&bob, room_id, d(2), t(10, 0), t(12, 0), String::new(), now())
        .await
        .unwrap();

    // Double-cancel is a conflict, not a silent no-op.
    let err = engine
        .cancel_booking(&alice, booking_id, now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TerminalState("cancelled")));
}

#[tokio::test]
async fn change_notifications_follow_the_ledger() {
    let path = test_wal_path("notify.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::open(path, notify.clone()).unwrap();

    let admin = ident(Role::Admin);
    let alice = ident(Role::Student);
    let room = engine
        .create_room(
            &admin,
            NewRoom {
                name: "Carrel 12".into(),
                capacity: 1,
                location: "Quiet floor".into(),
                amenities: vec![],
                description: String::new(),
            },
        )
        .await
        .unwrap();

    let mut rx = notify.subscribe(room.id);

    let booking = engine
        .create_booking(&alice, room.id, d(2), t(9, 0), t(10, 0), String::new(), now())
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        Event::BookingConfirmed { booking: b } => assert_eq!(b.id, booking.id),
        other => panic!("expected BookingConfirmed, got {other:?}"),
    }

    engine.cancel_booking(&alice, booking.id, now()).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::BookingCancelled { id, .. } => assert_eq!(id, booking.id),
        other => panic!("expected BookingCancelled, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_request_leaves_no_trace() {
    let path = test_wal_path("no_trace.wal");
    let engine = Engine::open(path, Arc::new(NotifyHub::new())).unwrap();

    let admin = ident(Role::Admin);
    let alice = ident(Role::Student);
    let room = engine
        .create_room(
            &admin,
            NewRoom {
                name: "Room B".into(),
                capacity: 4,
                location: "Level 1".into(),
                amenities: vec![],
                description: String::new(),
            },
        )
        .await
        .unwrap();

    // Fails on the duration cap (default 4h) — after the slot was free.
    let err = engine
        .create_booking(&alice, room.id, d(2), t(9, 0), t(14, 0), String::new(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DurationExceeded { .. }));

    // Nothing was persisted: the day is wide open and Alice holds nothing.
    assert!(engine.taken_slots(d(2)).await.is_empty());
    assert!(engine.my_bookings(&alice, now()).await.is_empty());
}
