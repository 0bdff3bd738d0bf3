use chrono::{NaiveDate, NaiveTime};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing;

use super::conflict::*;
use super::lifecycle::{self, ReservationAction};
use super::{Engine, EngineError, WalCommand};

/// Booking request as submitted by a User.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub listing_id: Ulid,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub vehicle_info: Option<String>,
    pub notes: Option<String>,
}

fn not_found(entity: &'static str, id: Ulid) -> EngineError {
    EngineError::NotFound { entity, id }
}

impl Engine {
    // ── Reservations ─────────────────────────────────────────

    /// Book a slot. The overlap check and the commit happen under the
    /// write lock of the `(listing, date)` schedule, so two overlapping
    /// requests can never both succeed.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        req: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let slot = validate_slot(req.start_time, req.end_time)?;
        validate_optional_text("vehicle_info", req.vehicle_info.as_deref(), MAX_VEHICLE_INFO_LEN)?;
        validate_optional_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)?;
        lifecycle::authorize_create(actor)?;

        let listing_lock = self
            .listing_lock(req.listing_id)
            .ok_or_else(|| not_found("listing", req.listing_id))?;
        let _listing_guard = listing_lock.read().await;
        let listing = self
            .listing(&req.listing_id)
            .filter(|l| l.is_active)
            .ok_or_else(|| not_found("listing", req.listing_id))?;
        let total_amount = pricing::compute_amount(&listing.rate, slot.start, slot.end)
            .ok_or_else(|| EngineError::invalid("rate", "listing rate is too large to price"))?;

        let key = ScheduleKey {
            listing_id: listing.id,
            date: req.booking_date,
        };
        let schedule = self.schedule_for(key);
        let mut day = schedule.write().await;
        if day.slots.len() >= MAX_RESERVATIONS_PER_SCHEDULE {
            return Err(EngineError::LimitExceeded("too many reservations on this date"));
        }
        if let Err(e) = check_no_conflict(&day, &slot) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!("booking conflict on {} {}: {e}", listing.id, req.booking_date);
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            listing_id: listing.id,
            user_id: actor.id,
            lister_id: listing.lister_id,
            booking_date: req.booking_date,
            start_time: slot.start,
            end_time: slot.end,
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount,
            vehicle_info: req.vehicle_info,
            notes: req.notes,
            created_at: now_ms(),
        };
        self.persist_and_apply(
            Event::ReservationCreated {
                reservation: reservation.clone(),
            },
            Some(&mut day),
        )
        .await?;

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        tracing::info!(
            "reservation {} on {} {} {} for {}",
            reservation.id,
            listing.id,
            reservation.booking_date,
            slot,
            reservation.total_amount
        );
        Ok(reservation)
    }

    /// Move a reservation to `status`. Cancelling a paid reservation refunds
    /// it in the same event.
    pub async fn transition_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let found = self.reservation(&id).ok_or_else(|| not_found("reservation", id))?;
        lifecycle::authorize(actor, ReservationAction::SetStatus(status), &found)?;

        let schedule = self.schedule_for(found.schedule_key());
        let mut day = schedule.write().await;
        // Status only changes under this lock; re-read to plan from the latest.
        let current = self.reservation(&id).ok_or_else(|| not_found("reservation", id))?;
        let (next, payment_status) = lifecycle::plan_status_change(&current, status)?;

        self.persist_and_apply(
            Event::ReservationStatusChanged {
                id,
                status: next,
                payment_status,
            },
            Some(&mut day),
        )
        .await?;

        metrics::counter!(
            observability::RESERVATION_TRANSITIONS_TOTAL,
            "from" => current.status.as_str(),
            "to" => next.as_str()
        )
        .increment(1);
        if payment_status != current.payment_status {
            tracing::info!("reservation {id} {next}, payment {payment_status}");
        } else {
            tracing::info!("reservation {id} {next}");
        }
        Ok(Reservation {
            status: next,
            payment_status,
            ..current
        })
    }

    pub async fn set_payment_status(
        &self,
        actor: &Actor,
        id: Ulid,
        payment_status: PaymentStatus,
    ) -> Result<Reservation, EngineError> {
        let found = self.reservation(&id).ok_or_else(|| not_found("reservation", id))?;
        lifecycle::authorize(actor, ReservationAction::SetPayment, &found)?;

        // Same lock as status changes, so a concurrent cancel sees the
        // payment it has to refund.
        let schedule = self.schedule_for(found.schedule_key());
        let _day = schedule.write().await;
        let current = self.reservation(&id).ok_or_else(|| not_found("reservation", id))?;
        let next = lifecycle::plan_payment_change(&current, payment_status)?;

        self.persist_and_apply(
            Event::PaymentStatusChanged {
                id,
                payment_status: next,
            },
            None,
        )
        .await?;
        tracing::info!("reservation {id} payment {next}");
        Ok(Reservation {
            payment_status: next,
            ..current
        })
    }

    // ── Listings ─────────────────────────────────────────────

    /// Listers create for themselves; admins create on behalf of `lister_id`.
    pub async fn create_listing(
        &self,
        actor: &Actor,
        lister_id: Option<Ulid>,
        draft: ListingDraft,
    ) -> Result<Listing, EngineError> {
        validate_draft(&draft)?;
        let owner = lifecycle::authorize_listing_create(actor, lister_id)?;
        if self.listings.len() >= MAX_LISTINGS {
            return Err(EngineError::LimitExceeded("too many listings"));
        }

        let listing = Listing {
            id: Ulid::new(),
            lister_id: owner,
            label: draft.label,
            coordinate: draft.coordinate,
            rate: draft.rate,
            availability: draft.availability,
            is_active: true,
        };
        self.persist_and_apply(
            Event::ListingCreated {
                listing: listing.clone(),
            },
            None,
        )
        .await?;
        tracing::info!("listing {} created for lister {}", listing.id, listing.lister_id);
        Ok(listing)
    }

    pub async fn update_listing(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: ListingPatch,
    ) -> Result<Listing, EngineError> {
        validate_patch(&patch)?;

        let lock = self.listing_lock(id).ok_or_else(|| not_found("listing", id))?;
        let _guard = lock.write().await;
        let mut listing = self.listing(&id).ok_or_else(|| not_found("listing", id))?;
        lifecycle::authorize_listing_update(actor, &listing)?;

        self.persist_and_apply(
            Event::ListingUpdated {
                id,
                patch: patch.clone(),
            },
            None,
        )
        .await?;

        if let Some(label) = patch.label {
            listing.label = label;
        }
        if let Some(rate) = patch.rate {
            listing.rate = rate;
        }
        if let Some(availability) = patch.availability {
            listing.availability = availability;
        }
        if let Some(is_active) = patch.is_active {
            listing.is_active = is_active;
        }
        Ok(listing)
    }

    /// Soft (de)activation. Existing reservations are unaffected.
    pub async fn set_listing_active(
        &self,
        actor: &Actor,
        id: Ulid,
        is_active: bool,
    ) -> Result<Listing, EngineError> {
        let patch = ListingPatch {
            is_active: Some(is_active),
            ..Default::default()
        };
        self.update_listing(actor, id, patch).await
    }

    // ── Parking requests ─────────────────────────────────────

    pub async fn submit_parking_request(
        &self,
        actor: &Actor,
        draft: ListingDraft,
    ) -> Result<ParkingRequest, EngineError> {
        validate_draft(&draft)?;
        lifecycle::authorize_request_submit(actor)?;
        if self.requests.len() >= MAX_PARKING_REQUESTS {
            return Err(EngineError::LimitExceeded("too many parking requests"));
        }

        let request = ParkingRequest {
            id: Ulid::new(),
            lister_id: actor.id,
            draft,
            status: RequestStatus::Pending,
            listing_id: None,
        };
        self.persist_and_apply(
            Event::ParkingRequestSubmitted {
                request: request.clone(),
            },
            None,
        )
        .await?;
        tracing::info!("parking request {} submitted by {}", request.id, actor.id);
        Ok(request)
    }

    /// Approve or reject a pending request. Approval creates the listing in
    /// the same event.
    pub async fn review_parking_request(
        &self,
        actor: &Actor,
        id: Ulid,
        decision: RequestStatus,
    ) -> Result<ParkingRequest, EngineError> {
        if decision == RequestStatus::Pending {
            return Err(EngineError::invalid("status", "review must approve or reject"));
        }
        lifecycle::authorize_request_review(actor)?;

        let lock = self
            .request_lock(id)
            .ok_or_else(|| not_found("parking request", id))?;
        let _guard = lock.lock().await;
        let current = self.request(&id).ok_or_else(|| not_found("parking request", id))?;
        let status = lifecycle::plan_review(&current, decision)?;

        let listing_id = match status {
            RequestStatus::Approved => {
                if self.listings.len() >= MAX_LISTINGS {
                    return Err(EngineError::LimitExceeded("too many listings"));
                }
                Some(Ulid::new())
            }
            _ => None,
        };
        self.persist_and_apply(
            Event::ParkingRequestReviewed {
                id,
                status,
                listing_id,
            },
            None,
        )
        .await?;

        match listing_id {
            Some(listing_id) => {
                tracing::info!("parking request {id} approved as listing {listing_id}")
            }
            None => tracing::info!("parking request {id} {status}"),
        }
        Ok(ParkingRequest {
            status,
            listing_id,
            ..current
        })
    }

    // ── WAL housekeeping ─────────────────────────────────────

    /// Rewrite the WAL as one creation event per live record. Blocks new
    /// commits for the duration. Returns the number of events written.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events();
        let written = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(written)
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
