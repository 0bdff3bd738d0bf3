//! Reservation state machines and the authorization matrix.
//!
//! Every role check in the engine goes through this module. Callers look the
//! record up first (so a missing id is `NotFound` for everyone), then ask
//! here whether the actor may act on it, then ask whether the transition is
//! legal from the record's current state.
//!
//! | action            | user          | lister              | admin |
//! |-------------------|---------------|---------------------|-------|
//! | create            | as requester  | no                  | no    |
//! | confirm, complete | no            | own listing's       | yes   |
//! | cancel            | own           | no                  | yes   |
//! | payment change    | no            | own listing's       | yes   |
//! | read              | own           | own listing's       | yes   |

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationAction {
    Read,
    SetStatus(ReservationStatus),
    SetPayment,
}

pub fn authorize_create(actor: &Actor) -> Result<(), EngineError> {
    match actor.role {
        Role::User => Ok(()),
        Role::Lister | Role::Admin => Err(EngineError::Forbidden(
            "only users can create reservations",
        )),
    }
}

pub fn authorize(
    actor: &Actor,
    action: ReservationAction,
    reservation: &Reservation,
) -> Result<(), EngineError> {
    use ReservationAction::*;
    use ReservationStatus::*;

    match actor.role {
        Role::Admin => Ok(()),
        Role::User => {
            let own = reservation.user_id == actor.id;
            match action {
                Read | SetStatus(Cancelled) if own => Ok(()),
                Read | SetStatus(Cancelled) => Err(EngineError::Forbidden(
                    "users may only access their own reservations",
                )),
                SetStatus(_) | SetPayment => Err(EngineError::Forbidden(
                    "users may only cancel reservations",
                )),
            }
        }
        Role::Lister => {
            let own = reservation.lister_id == actor.id;
            match action {
                SetStatus(Cancelled) => Err(EngineError::Forbidden(
                    "listers cannot cancel reservations",
                )),
                SetStatus(Pending) => Err(EngineError::Forbidden(
                    "reservations become pending only on creation",
                )),
                Read | SetStatus(Confirmed) | SetStatus(Completed) | SetPayment if own => Ok(()),
                Read | SetStatus(Confirmed) | SetStatus(Completed) | SetPayment => {
                    Err(EngineError::Forbidden(
                        "listers may only manage reservations on their own listings",
                    ))
                }
            }
        }
    }
}

pub fn can_read(actor: &Actor, reservation: &Reservation) -> bool {
    authorize(actor, ReservationAction::Read, reservation).is_ok()
}

/// `pending → confirmed → completed`, and `cancelled` from either of the
/// first two. Nothing leaves `completed` or `cancelled`.
pub fn status_transition_allowed(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Cancelled)
            | (Confirmed, Completed)
            | (Confirmed, Cancelled)
    )
}

/// `pending → paid → refunded`.
pub fn payment_transition_allowed(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!((from, to), (Pending, Paid) | (Paid, Refunded))
}

/// Resulting `(status, payment_status)` of moving `reservation` to `next`.
/// Cancelling a paid reservation refunds it in the same step.
pub fn plan_status_change(
    reservation: &Reservation,
    next: ReservationStatus,
) -> Result<(ReservationStatus, PaymentStatus), EngineError> {
    if !status_transition_allowed(reservation.status, next) {
        return Err(EngineError::InvalidTransition {
            field: "status",
            from: reservation.status.as_str(),
            to: next.as_str(),
        });
    }
    let payment = match (next, reservation.payment_status) {
        (ReservationStatus::Cancelled, PaymentStatus::Paid) => PaymentStatus::Refunded,
        (_, current) => current,
    };
    Ok((next, payment))
}

pub fn plan_payment_change(
    reservation: &Reservation,
    next: PaymentStatus,
) -> Result<PaymentStatus, EngineError> {
    let invalid = EngineError::InvalidTransition {
        field: "payment_status",
        from: reservation.payment_status.as_str(),
        to: next.as_str(),
    };
    if !payment_transition_allowed(reservation.payment_status, next) {
        return Err(invalid);
    }
    if reservation.status == ReservationStatus::Cancelled && next == PaymentStatus::Paid {
        return Err(invalid);
    }
    Ok(next)
}

// ── Listings & parking requests ──────────────────────────────────

/// Owner of a listing about to be created. Listers create for themselves;
/// admins must name the lister.
pub fn authorize_listing_create(
    actor: &Actor,
    lister_id: Option<Ulid>,
) -> Result<Ulid, EngineError> {
    match (actor.role, lister_id) {
        (Role::Lister, None) => Ok(actor.id),
        (Role::Lister, Some(id)) if id == actor.id => Ok(actor.id),
        (Role::Lister, Some(_)) => Err(EngineError::Forbidden(
            "listers may only create their own listings",
        )),
        (Role::Admin, Some(id)) => Ok(id),
        (Role::Admin, None) => Err(EngineError::invalid(
            "lister_id",
            "required when an admin creates a listing",
        )),
        (Role::User, _) => Err(EngineError::Forbidden("users cannot create listings")),
    }
}

pub fn authorize_listing_update(actor: &Actor, listing: &Listing) -> Result<(), EngineError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Lister if listing.lister_id == actor.id => Ok(()),
        _ => Err(EngineError::Forbidden(
            "only the owning lister or an admin may modify a listing",
        )),
    }
}

/// Inactive listings are visible only to their owner and admins.
pub fn can_view_listing(actor: &Actor, listing: &Listing) -> bool {
    listing.is_active || authorize_listing_update(actor, listing).is_ok()
}

pub fn authorize_request_submit(actor: &Actor) -> Result<(), EngineError> {
    match actor.role {
        Role::Lister => Ok(()),
        Role::User | Role::Admin => Err(EngineError::Forbidden(
            "only listers can submit parking requests",
        )),
    }
}

pub fn authorize_request_review(actor: &Actor) -> Result<(), EngineError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::User | Role::Lister => Err(EngineError::Forbidden(
            "only admins can review parking requests",
        )),
    }
}

pub fn can_view_request(actor: &Actor, request: &ParkingRequest) -> bool {
    actor.is_admin() || (actor.role == Role::Lister && request.lister_id == actor.id)
}

pub fn plan_review(
    request: &ParkingRequest,
    decision: RequestStatus,
) -> Result<RequestStatus, EngineError> {
    if decision == RequestStatus::Pending {
        return Err(EngineError::invalid("status", "review must approve or reject"));
    }
    if request.status != RequestStatus::Pending {
        return Err(EngineError::InvalidTransition {
            field: "request status",
            from: request.status.as_str(),
            to: decision.as_str(),
        });
    }
    Ok(decision)
}
