use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, NaiveTime};
use ulid::Ulid;

use parkspace::engine::{Engine, NewReservation};
use parkspace::model::*;

const LISTINGS: usize = 8;
const TASKS: usize = 64;
const BOOKINGS_PER_TASK: usize = 40;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn setup(engine: &Engine) -> Vec<Ulid> {
    let lister = Actor::lister(Ulid::new());
    let mut ids = Vec::with_capacity(LISTINGS);
    for i in 0..LISTINGS {
        let draft = ListingDraft {
            label: format!("Bench lot {i}"),
            coordinate: Coordinate::new(18.52 + i as f64 * 0.001, 73.85),
            rate: "120/hour".into(),
            availability: "24x7".into(),
        };
        ids.push(engine.create_listing(&lister, None, draft).await.unwrap().id);
    }
    ids
}

/// Every task books the same hour on the same few (listing, date) keys, so
/// nearly every attempt collides with another task's commit.
async fn hot_keys(engine: Arc<Engine>, listings: Arc<Vec<Ulid>>, day: NaiveDate) {
    let started = Instant::now();
    let mut handles = Vec::with_capacity(TASKS);
    for task in 0..TASKS {
        let engine = engine.clone();
        let listings = listings.clone();
        handles.push(tokio::spawn(async move {
            let user = Actor::user(Ulid::new());
            let mut ok = Vec::new();
            let mut conflicts = Vec::new();
            for i in 0..BOOKINGS_PER_TASK {
                let hour = ((task + i) % 24) as u32;
                let req = NewReservation {
                    listing_id: listings[i % listings.len()],
                    booking_date: day,
                    start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(hour, 59, 0).unwrap(),
                    vehicle_info: None,
                    notes: None,
                };
                let t = Instant::now();
                match engine.create_reservation(&user, req).await {
                    Ok(_) => ok.push(t.elapsed()),
                    Err(_) => conflicts.push(t.elapsed()),
                }
            }
            (ok, conflicts)
        }));
    }

    let mut ok = Vec::new();
    let mut conflicts = Vec::new();
    for handle in handles {
        let (o, c) = handle.await.unwrap();
        ok.extend(o);
        conflicts.extend(c);
    }
    let elapsed = started.elapsed();
    println!(
        "hot keys: {} booked, {} refused in {:.2}s ({:.0} attempts/s)",
        ok.len(),
        conflicts.len(),
        elapsed.as_secs_f64(),
        (ok.len() + conflicts.len()) as f64 / elapsed.as_secs_f64()
    );
    assert!(ok.len() <= LISTINGS * 24, "double booking detected");
    print_latency("booked", &mut ok);
    print_latency("conflict", &mut conflicts);
}

/// Every task owns its own dates: no two attempts share a schedule key.
async fn spread_keys(engine: Arc<Engine>, listings: Arc<Vec<Ulid>>, first_day: NaiveDate) {
    let started = Instant::now();
    let mut handles = Vec::with_capacity(TASKS);
    for task in 0..TASKS {
        let engine = engine.clone();
        let listings = listings.clone();
        handles.push(tokio::spawn(async move {
            let user = Actor::user(Ulid::new());
            let day = first_day + Days::new(task as u64);
            let mut latencies = Vec::new();
            for i in 0..BOOKINGS_PER_TASK.min(24) {
                let hour = i as u32;
                let req = NewReservation {
                    listing_id: listings[task % listings.len()],
                    booking_date: day,
                    start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(hour, 59, 0).unwrap(),
                    vehicle_info: Some("MH12 AB 1234".into()),
                    notes: None,
                };
                let t = Instant::now();
                engine.create_reservation(&user, req).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for handle in handles {
        latencies.extend(handle.await.unwrap());
    }
    let elapsed = started.elapsed();
    println!(
        "spread keys: {} booked in {:.2}s ({:.0} bookings/s)",
        latencies.len(),
        elapsed.as_secs_f64(),
        latencies.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("booked", &mut latencies);
}

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    runtime.block_on(async {
        let dir = std::env::temp_dir().join(format!("parkspace_bench_{}", Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let engine = Arc::new(Engine::new(dir.join("parkspace.wal")).unwrap());
        let listings = Arc::new(setup(&engine).await);

        let day = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        hot_keys(engine.clone(), listings.clone(), day).await;
        spread_keys(engine.clone(), listings, day + Days::new(1)).await;

        let t = Instant::now();
        let written = engine.compact_wal().await.unwrap();
        println!(
            "compaction: {written} events in {:.2}ms",
            t.elapsed().as_secs_f64() * 1000.0
        );

        let _ = std::fs::remove_dir_all(&dir);
    });
}
