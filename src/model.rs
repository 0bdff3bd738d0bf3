use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// The one overlap rule: half-open intervals `[a_start, a_end)` and
/// `[b_start, b_end)` conflict iff each starts before the other ends.
/// Back-to-back intervals do not overlap.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Half-open time-of-day interval `[start, end)` on a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { start, end }
    }

    /// `None` when the slot is empty or runs backwards (cross-midnight spans
    /// are not representable).
    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    User,
    Lister,
    Admin,
}

/// An authenticated caller. Supplied by the identity provider and trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn user(id: Ulid) -> Self {
        Self { id, role: Role::User }
    }

    pub fn lister(id: Ulid) -> Self {
        Self { id, role: Role::Lister }
    }

    pub fn admin(id: Ulid) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

string_enum!(ReservationStatus, "reservation status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

string_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
    Refunded => "refunded",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

string_enum!(RequestStatus, "request status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

string_enum!(Role, "role", {
    User => "user",
    Lister => "lister",
    Admin => "admin",
});

// ── Records ──────────────────────────────────────────────────────

/// A parking space published by a Lister.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Ulid,
    pub lister_id: Ulid,
    pub label: String,
    pub coordinate: Coordinate,
    /// Free text, e.g. "150/hour". Only the first number is ever priced.
    pub rate: String,
    pub availability: String,
    pub is_active: bool,
}

/// Partial update of a listing's mutable fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingPatch {
    pub label: Option<String>,
    pub rate: Option<String>,
    pub availability: Option<String>,
    pub is_active: Option<bool>,
}

impl ListingPatch {
    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.rate.is_none()
            && self.availability.is_none()
            && self.is_active.is_none()
    }
}

/// Fields shared by a listing and the request that drafts one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub label: String,
    pub coordinate: Coordinate,
    pub rate: String,
    pub availability: String,
}

/// A Lister's listing draft awaiting Admin review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingRequest {
    pub id: Ulid,
    pub lister_id: Ulid,
    pub draft: ListingDraft,
    pub status: RequestStatus,
    /// Listing materialized on approval.
    pub listing_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub user_id: Ulid,
    /// Owner of the listing when the reservation was made. Copied, never re-derived.
    pub lister_id: Ulid,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub vehicle_info: Option<String>,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }

    /// Key of the schedule this reservation occupies.
    pub fn schedule_key(&self) -> ScheduleKey {
        ScheduleKey {
            listing_id: self.listing_id,
            date: self.booking_date,
        }
    }
}

// ── Per-day schedule ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleKey {
    pub listing_id: Ulid,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedSlot {
    pub reservation_id: Ulid,
    pub slot: TimeSlot,
}

/// Non-cancelled reservations of one listing on one date, sorted by start.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub key: ScheduleKey,
    pub slots: Vec<BookedSlot>,
}

impl DaySchedule {
    pub fn new(key: ScheduleKey) -> Self {
        Self {
            key,
            slots: Vec::new(),
        }
    }

    /// Insert maintaining sort order by slot start.
    pub fn insert_slot(&mut self, booked: BookedSlot) {
        let pos = self
            .slots
            .binary_search_by_key(&booked.slot.start, |b| b.slot.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, booked);
    }

    pub fn remove_slot(&mut self, reservation_id: Ulid) -> Option<BookedSlot> {
        let pos = self
            .slots
            .iter()
            .position(|b| b.reservation_id == reservation_id)?;
        Some(self.slots.remove(pos))
    }

    /// Booked slots overlapping `query`. Slots starting at or after
    /// `query.end` are skipped by binary search.
    pub fn overlapping(&self, query: &TimeSlot) -> impl Iterator<Item = &BookedSlot> {
        let right_bound = self.slots.partition_point(|b| b.slot.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |b| b.slot.overlaps(query))
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// Flat event log. Every state change is one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ListingCreated {
        listing: Listing,
    },
    ListingUpdated {
        id: Ulid,
        patch: ListingPatch,
    },
    ParkingRequestSubmitted {
        request: ParkingRequest,
    },
    ParkingRequestReviewed {
        id: Ulid,
        status: RequestStatus,
        listing_id: Option<Ulid>,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        status: ReservationStatus,
        payment_status: PaymentStatus,
    },
    PaymentStatusChanged {
        id: Ulid,
        payment_status: PaymentStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityInfo {
    pub available: bool,
    pub conflict_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyListing {
    pub listing: Listing,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationSuggestion {
    pub listing_id: Ulid,
    pub label: String,
    pub lat: f64,
    pub lng: f64,
}

/// Optional narrowing of a reservation listing. Role scoping is applied on top.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub id: Option<Ulid>,
    pub listing_id: Option<Ulid>,
    pub booking_date: Option<NaiveDate>,
    pub status: Option<ReservationStatus>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.id.is_none_or(|id| r.id == id)
            && self.listing_id.is_none_or(|id| r.listing_id == id)
            && self.booking_date.is_none_or(|d| r.booking_date == d)
            && self.status.is_none_or(|s| r.status == s)
    }
}
