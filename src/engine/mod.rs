mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
mod queries;

pub use error::{EngineError, ErrorKind};
pub use mutations::NewReservation;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<DaySchedule>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the log. Appends that queue up while a flush is in progress are
/// written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush of {} events failed: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a half-written batch never
    // prefixes the next one.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// In-memory state of the marketplace, rebuilt from the WAL on start.
///
/// Records live in plain maps. Serialization happens on separate locks:
/// the per-day schedule lock for anything that books or frees a slot, the
/// per-listing lock for listing edits (bookings take it shared so a listing
/// cannot be deactivated mid-booking), and the per-request lock for reviews.
/// Every commit also holds `commit_gate` shared across its WAL append and
/// in-memory apply; compaction takes it exclusively so the snapshot it
/// writes is never missing an acknowledged event.
pub struct Engine {
    pub(super) listings: DashMap<Ulid, Listing>,
    pub(super) requests: DashMap<Ulid, ParkingRequest>,
    pub(super) reservations: DashMap<Ulid, Reservation>,
    pub(super) schedules: DashMap<ScheduleKey, SharedSchedule>,
    pub(super) listing_locks: DashMap<Ulid, Arc<RwLock<()>>>,
    pub(super) request_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Replay the log at `wal_path` and start its writer task. Must be called
    /// from within a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            tracing::warn!(
                "discarding torn WAL tail after {} bytes in {}",
                replay.valid_len,
                wal_path.display()
            );
        }
        let wal = Wal::open(&wal_path, Some(replay.valid_len))?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            listings: DashMap::new(),
            requests: DashMap::new(),
            reservations: DashMap::new(),
            schedules: DashMap::new(),
            listing_locks: DashMap::new(),
            request_locks: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
        };

        for event in &replay.events {
            engine.apply(event, None);
        }
        engine.rebuild_schedules();

        tracing::info!(
            "replayed {} events: {} listings, {} reservations, {} parking requests",
            replay.events.len(),
            engine.listings.len(),
            engine.reservations.len(),
            engine.requests.len()
        );
        Ok(engine)
    }

    /// Apply an event to the record maps. `day` is the already-locked
    /// schedule of the reservation being created or changed; during replay
    /// it is `None` and schedules are rebuilt afterwards.
    fn apply(&self, event: &Event, day: Option<&mut DaySchedule>) {
        match event {
            Event::ListingCreated { listing } => {
                self.listings.insert(listing.id, listing.clone());
            }
            Event::ListingUpdated { id, patch } => {
                if let Some(mut listing) = self.listings.get_mut(id) {
                    if let Some(label) = &patch.label {
                        listing.label = label.clone();
                    }
                    if let Some(rate) = &patch.rate {
                        listing.rate = rate.clone();
                    }
                    if let Some(availability) = &patch.availability {
                        listing.availability = availability.clone();
                    }
                    if let Some(is_active) = patch.is_active {
                        listing.is_active = is_active;
                    }
                }
            }
            Event::ParkingRequestSubmitted { request } => {
                self.requests.insert(request.id, request.clone());
            }
            Event::ParkingRequestReviewed { id, status, listing_id } => {
                let Some(mut request) = self.requests.get_mut(id) else {
                    return;
                };
                request.status = *status;
                request.listing_id = *listing_id;
                if let (RequestStatus::Approved, Some(listing_id)) = (status, listing_id) {
                    let listing = Listing {
                        id: *listing_id,
                        lister_id: request.lister_id,
                        label: request.draft.label.clone(),
                        coordinate: request.draft.coordinate,
                        rate: request.draft.rate.clone(),
                        availability: request.draft.availability.clone(),
                        is_active: true,
                    };
                    drop(request);
                    self.listings.insert(listing.id, listing);
                }
            }
            Event::ReservationCreated { reservation } => {
                if let Some(day) = day
                    && reservation.status != ReservationStatus::Cancelled
                {
                    day.insert_slot(BookedSlot {
                        reservation_id: reservation.id,
                        slot: reservation.slot(),
                    });
                }
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationStatusChanged { id, status, payment_status } => {
                if let Some(mut reservation) = self.reservations.get_mut(id) {
                    reservation.status = *status;
                    reservation.payment_status = *payment_status;
                }
                if *status == ReservationStatus::Cancelled
                    && let Some(day) = day
                {
                    day.remove_slot(*id);
                }
            }
            Event::PaymentStatusChanged { id, payment_status } => {
                if let Some(mut reservation) = self.reservations.get_mut(id) {
                    reservation.payment_status = *payment_status;
                }
            }
        }
    }

    fn rebuild_schedules(&self) {
        self.schedules.clear();
        let mut days: std::collections::HashMap<ScheduleKey, DaySchedule> =
            std::collections::HashMap::new();
        for entry in self.reservations.iter() {
            let r = entry.value();
            if r.status == ReservationStatus::Cancelled {
                continue;
            }
            let key = r.schedule_key();
            days.entry(key)
                .or_insert_with(|| DaySchedule::new(key))
                .insert_slot(BookedSlot {
                    reservation_id: r.id,
                    slot: r.slot(),
                });
        }
        for (key, day) in days {
            self.schedules.insert(key, Arc::new(RwLock::new(day)));
        }
    }

    /// Send an event to the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        event: Event,
        day: Option<&mut DaySchedule>,
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.apply(&event, day);
        Ok(())
    }

    /// Schedule for `key`, created empty on first use.
    pub(super) fn schedule_for(&self, key: ScheduleKey) -> SharedSchedule {
        self.schedules
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new(key))))
            .clone()
    }

    pub(super) fn existing_schedule(&self, key: &ScheduleKey) -> Option<SharedSchedule> {
        self.schedules.get(key).map(|e| e.value().clone())
    }

    /// Edit lock of an existing listing. Unknown ids get no entry, so the
    /// lock map never outgrows the listing map.
    pub(super) fn listing_lock(&self, id: Ulid) -> Option<Arc<RwLock<()>>> {
        if !self.listings.contains_key(&id) {
            return None;
        }
        Some(self.listing_locks.entry(id).or_default().clone())
    }

    pub(super) fn request_lock(&self, id: Ulid) -> Option<Arc<Mutex<()>>> {
        if !self.requests.contains_key(&id) {
            return None;
        }
        Some(self.request_locks.entry(id).or_default().clone())
    }

    pub(super) fn listing(&self, id: &Ulid) -> Option<Listing> {
        self.listings.get(id).map(|e| e.value().clone())
    }

    pub(super) fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub(super) fn request(&self, id: &Ulid) -> Option<ParkingRequest> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    /// Minimal event list that recreates the current state: every record as
    /// its creation event carrying its current fields.
    fn snapshot_events(&self) -> Vec<Event> {
        let mut listings: Vec<Listing> = self.listings.iter().map(|e| e.value().clone()).collect();
        let mut requests: Vec<ParkingRequest> =
            self.requests.iter().map(|e| e.value().clone()).collect();
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        listings.sort_by_key(|l| l.id);
        requests.sort_by_key(|r| r.id);
        reservations.sort_by_key(|r| r.id);

        let mut events = Vec::with_capacity(listings.len() + requests.len() + reservations.len());
        events.extend(listings.into_iter().map(|listing| Event::ListingCreated { listing }));
        events.extend(
            requests
                .into_iter()
                .map(|request| Event::ParkingRequestSubmitted { request }),
        );
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );
        events
    }
}
