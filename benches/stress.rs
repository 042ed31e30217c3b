//! Engine stress harness: write throughput, contended admission, and read
//! latency under write load. Run with `cargo bench`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use carrel::engine::Engine;
use carrel::model::{ClockTime, Identity, NewRoom, Role, SettingsPatch};
use carrel::notify::NotifyHub;

/// Fixed clock so the advance-window rule admits the whole bench week.
fn bench_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn date_offset(days: u64) -> NaiveDate {
    bench_now().date().checked_add_days(Days::new(days)).unwrap()
}

fn hour(h: u16) -> ClockTime {
    ClockTime::from_hm(h, 0).unwrap()
}

fn student() -> Identity {
    Identity {
        user: Ulid::new(),
        role: Role::Student,
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn fresh_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("carrel_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::open(dir.join(name), Arc::new(NotifyHub::new())).unwrap());

    // Widen policy so the bench isn't bounded by the business caps.
    let admin = Identity {
        user: Ulid::new(),
        role: Role::Admin,
    };
    engine
        .update_settings(
            &admin,
            SettingsPatch {
                max_advance_days: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine
}

async fn seed_rooms(engine: &Engine, count: usize) -> Vec<Ulid> {
    let admin = Identity {
        user: Ulid::new(),
        role: Role::Admin,
    };
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let room = engine
            .create_room(
                &admin,
                NewRoom {
                    name: format!("Room {i}"),
                    capacity: 4,
                    location: "bench".into(),
                    amenities: vec![],
                    description: String::new(),
                },
            )
            .await
            .unwrap();
        ids.push(room.id);
    }
    ids
}

/// Non-conflicting bookings spread over rooms × days × hourly slots.
async fn phase1_sequential(engine: &Engine, rooms: &[Ulid]) {
    let n = 900;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let slot = 8 + (i % 14) as u16;
        let date = date_offset(1 + ((i / 14) % 7) as u64);
        let room = rooms[(i / 98) % rooms.len()];
        let who = student();

        let t = Instant::now();
        engine
            .create_booking(
                &who,
                room,
                date,
                hour(slot),
                hour(slot + 1),
                String::new(),
                bench_now(),
            )
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admit latency", &mut latencies);
}

/// Every task fights for the same room and day. At most 14 hourly slots
/// exist, so at most 14 requests can win — and none may overlap.
async fn phase2_contended(engine: &Arc<Engine>, room: Ulid) {
    let n_tasks = 10;
    let n_per_task = 100;
    let date = date_offset(10);

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut admitted = 0usize;
            for i in 0..n_per_task {
                let slot = 8 + ((task * 7 + i) % 14) as u16;
                let who = student();
                if engine
                    .create_booking(
                        &who,
                        room,
                        date,
                        hour(slot),
                        hour(slot + 1),
                        String::new(),
                        bench_now(),
                    )
                    .await
                    .is_ok()
                {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let mut admitted = 0;
    for h in handles {
        admitted += h.await.unwrap();
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {total} contended requests in {:.2}s, {admitted} admitted",
        elapsed.as_secs_f64()
    );

    // Invariant: whatever won, nothing overlaps.
    let taken = engine.taken_slots(date).await;
    let ranges = &taken[&room];
    assert!(admitted <= 14, "more admissions than slots: {admitted}");
    assert_eq!(ranges.len(), admitted);
    for pair in ranges.windows(2) {
        assert!(pair[0].end <= pair[1].start, "overlap admitted: {pair:?}");
    }
    println!("  no-overlap invariant holds ({} slots filled)", ranges.len());
}

/// Availability reads while writers keep appending in the background.
async fn phase3_read_under_load(engine: &Arc<Engine>, rooms: &[Ulid]) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let mut writers = Vec::new();
    for w in 0..4usize {
        let engine = engine.clone();
        let stop = stop.clone();
        let rooms = rooms.to_vec();
        writers.push(tokio::spawn(async move {
            let mut i = 0usize;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let slot = 8 + (i % 14) as u16;
                let date = date_offset(20 + ((w * 7 + i / 14) % 7) as u64);
                let who = student();
                let _ = engine
                    .create_booking(
                        &who,
                        rooms[(w + i) % rooms.len()],
                        date,
                        hour(slot),
                        hour(slot + 1),
                        String::new(),
                        bench_now(),
                    )
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 8;
    let reads_per_reader = 500;
    let mut readers = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        let rooms = rooms.to_vec();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let date = date_offset(1 + ((r + i) % 7) as u64);
                let room = rooms[(r + i) % rooms.len()];
                let t = Instant::now();
                let _ = engine.taken_slots(date).await;
                let _ = engine.free_room_ranges(room, date).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }

    print_latency("availability read", &mut all);
}

#[tokio::main]
async fn main() {
    println!("=== carrel stress benchmark ===\n");

    println!("[setup]");
    let engine = fresh_engine("stress.wal").await;
    let rooms = seed_rooms(&engine, 10).await;
    println!("  created {} rooms", rooms.len());

    println!("\n[phase 1] sequential admission throughput");
    phase1_sequential(&engine, &rooms).await;

    println!("\n[phase 2] contended admission (one room, one day)");
    phase2_contended(&engine, rooms[0]).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&engine, &rooms).await;

    println!("\n=== benchmark complete ===");
}
