use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::geo::{self, BoundingBox};
use crate::model::*;

use super::conflict::{count_conflicts, validate_coordinate, validate_radius, validate_slot};
use super::lifecycle;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_reservation(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        let reservation = self
            .reservation(&id)
            .ok_or(EngineError::NotFound { entity: "reservation", id })?;
        lifecycle::authorize(actor, lifecycle::ReservationAction::Read, &reservation)?;
        Ok(reservation)
    }

    /// Reservations visible to `actor` that match `filter`, ordered by date,
    /// start time, then id. Users see their own, listers those on their
    /// listings, admins everything.
    pub fn list_reservations(&self, actor: &Actor, filter: &ReservationFilter) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| filter.matches(e.value()) && lifecycle::can_read(actor, e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            (a.booking_date, a.start_time, a.id).cmp(&(b.booking_date, b.start_time, b.id))
        });
        out
    }

    fn active_listing(&self, id: Ulid) -> Result<Listing, EngineError> {
        self.listing(&id)
            .filter(|l| l.is_active)
            .ok_or(EngineError::NotFound { entity: "listing", id })
    }

    /// Whether `[start, end)` on `date` is free, and how many live
    /// reservations overlap it. Advisory: `create_reservation` re-checks.
    pub async fn check_availability(
        &self,
        listing_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<AvailabilityInfo, EngineError> {
        let slot = validate_slot(start, end)?;
        self.active_listing(listing_id)?;

        let conflict_count = match self.existing_schedule(&ScheduleKey { listing_id, date }) {
            Some(schedule) => {
                let day = schedule.read().await;
                count_conflicts(&day, &slot)
            }
            None => 0,
        };
        Ok(AvailabilityInfo {
            available: conflict_count == 0,
            conflict_count,
        })
    }

    /// Occupied windows of a listing on `date`, in start order. Carries no
    /// reservation ids, so any caller may see it.
    pub async fn booked_slots(
        &self,
        listing_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, EngineError> {
        self.active_listing(listing_id)?;
        let Some(schedule) = self.existing_schedule(&ScheduleKey { listing_id, date }) else {
            return Ok(Vec::new());
        };
        let day = schedule.read().await;
        Ok(day.slots.iter().map(|b| b.slot).collect())
    }

    pub fn get_listing(&self, actor: &Actor, id: Ulid) -> Result<Listing, EngineError> {
        self.listing(&id)
            .filter(|l| lifecycle::can_view_listing(actor, l))
            .ok_or(EngineError::NotFound { entity: "listing", id })
    }

    /// Listers see their own listings (active or not) plus every active
    /// one; admins see all; users see active listings.
    pub fn list_listings(&self, actor: &Actor) -> Vec<Listing> {
        let mut out: Vec<Listing> = self
            .listings
            .iter()
            .filter(|e| lifecycle::can_view_listing(actor, e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|l| l.id);
        out
    }

    pub fn list_parking_requests(&self, actor: &Actor) -> Result<Vec<ParkingRequest>, EngineError> {
        if actor.role == Role::User {
            return Err(EngineError::Forbidden("users cannot view parking requests"));
        }
        let mut out: Vec<ParkingRequest> = self
            .requests
            .iter()
            .filter(|e| lifecycle::can_view_request(actor, e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    /// Active listings within `radius_km` of `center`, nearest first.
    /// Admins may ask for inactive ones too.
    pub fn nearby_listings(
        &self,
        actor: &Actor,
        center: Coordinate,
        radius_km: f64,
        include_inactive: bool,
    ) -> Result<Vec<NearbyListing>, EngineError> {
        validate_coordinate(&center)?;
        validate_radius(radius_km)?;
        let active_only = !(include_inactive && actor.is_admin());

        let bbox = BoundingBox::around(center, radius_km);
        let candidates: Vec<Listing> = self
            .listings
            .iter()
            .filter(|e| bbox.contains(e.coordinate))
            .map(|e| e.value().clone())
            .collect();
        Ok(geo::find_nearby(&candidates, center, radius_km, active_only))
    }

    pub fn location_suggestions(&self, prefix: &str, limit: usize) -> Vec<LocationSuggestion> {
        let candidates: Vec<Listing> = self
            .listings
            .iter()
            .filter(|e| e.is_active)
            .map(|e| e.value().clone())
            .collect();
        geo::suggest_locations(&candidates, prefix, limit)
    }
}
