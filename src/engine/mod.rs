mod availability;
mod error;
mod ledger;
mod mutations;
mod queries;
mod rules;

pub use availability::{free_within, merge_ranges, subtract_ranges};
pub use error::{EngineError, ErrorCategory};
pub use rules::{library_hours, week_bounds};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::{Event, Librarian, Room, Settings};
use crate::notify::NotifyHub;
use crate::wal::Wal;

use ledger::{BookingLedger, MeetingLedger};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task owning the WAL. Appends are batched for group commit:
/// block on the first append, drain whatever else is immediately queued,
/// then flush+fsync once for the whole batch and acknowledge every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => {
                            batch.push((event, response));
                        }
                        other => {
                            // Flush the batch first so the deferred command
                            // sees it.
                            deferred = Some(other);
                            break;
                        }
                    }
                }

                flush_and_respond(&mut wal, batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let start = std::time::Instant::now();

    let mut result: io::Result<()> = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch (these callers are all told the batch failed).
    let flush = wal.flush_sync();
    if result.is_ok() {
        result = flush;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let ack = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(ack);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The constraint engine and everything it arbitrates: directories, the
/// settings singleton, and both reservation ledgers. Each ledger sits
/// behind one RwLock whose write guard spans validate-and-insert, so the
/// check-then-act sequence can never admit two conflicting reservations.
pub struct Engine {
    rooms: DashMap<Ulid, Room>,
    librarians: DashMap<Ulid, Librarian>,
    settings: RwLock<Settings>,
    bookings: RwLock<BookingLedger>,
    meetings: RwLock<MeetingLedger>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            librarians: DashMap::new(),
            settings: RwLock::new(Settings::default()),
            bookings: RwLock::new(BookingLedger::default()),
            meetings: RwLock::new(MeetingLedger::default()),
            wal_tx,
            notify,
        };

        // We are the sole owner here, so try_write always succeeds — and
        // blocking_write would panic if replay runs inside an async context.
        for event in &events {
            engine.apply_replayed(event);
        }

        Ok(engine)
    }

    fn apply_replayed(&self, event: &Event) {
        match event {
            Event::SettingsChanged { settings } => {
                *self
                    .settings
                    .try_write()
                    .expect("replay: uncontended write") = settings.clone();
            }
            Event::RoomCreated { room } | Event::RoomUpdated { room } => {
                self.rooms.insert(room.id, room.clone());
            }
            Event::RoomRetired { id } => {
                if let Some(mut room) = self.rooms.get_mut(id) {
                    room.is_active = false;
                }
            }
            Event::LibrarianRegistered { librarian } | Event::LibrarianUpdated { librarian } => {
                self.librarians.insert(librarian.id, librarian.clone());
            }
            Event::BookingConfirmed { .. }
            | Event::BookingRescheduled { .. }
            | Event::BookingCancelled { .. }
            | Event::BookingsCompleted { .. } => {
                self.bookings
                    .try_write()
                    .expect("replay: uncontended write")
                    .apply(event);
            }
            Event::MeetingRequested { .. }
            | Event::MeetingReviewed { .. }
            | Event::MeetingCancelled { .. } => {
                self.meetings
                    .try_write()
                    .expect("replay: uncontended write")
                    .apply(event);
            }
        }
    }

    /// Write an event to the WAL via the group-commit writer and wait for
    /// the fsync acknowledgement.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify for a booking event. The caller holds
    /// the ledger write guard, so nothing is visible until it commits.
    pub(super) async fn commit_booking(
        &self,
        ledger: &mut BookingLedger,
        touched_room: Ulid,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        ledger.apply(&event);
        self.notify.publish(touched_room, &event);
        Ok(())
    }

    pub(super) async fn commit_meeting(
        &self,
        ledger: &mut MeetingLedger,
        touched_librarian: Ulid,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        ledger.apply(&event);
        self.notify.publish(touched_librarian, &event);
        Ok(())
    }

    /// Minimal event set that recreates current state; reservation records
    /// carry their full shape, so one event per record suffices.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.push(Event::SettingsChanged {
            settings: self.settings.read().await.clone(),
        });
        for entry in self.rooms.iter() {
            events.push(Event::RoomCreated {
                room: entry.value().clone(),
            });
        }
        for entry in self.librarians.iter() {
            events.push(Event::LibrarianRegistered {
                librarian: entry.value().clone(),
            });
        }
        {
            let ledger = self.bookings.read().await;
            for booking in ledger.iter() {
                events.push(Event::BookingConfirmed {
                    booking: booking.clone(),
                });
            }
        }
        {
            let ledger = self.meetings.read().await;
            for meeting in ledger.iter() {
                events.push(Event::MeetingRequested {
                    meeting: meeting.clone(),
                });
            }
        }
        events
    }

    /// Rewrite the WAL with a snapshot of current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = self.snapshot_events().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
