//! Advisory reservation pricing. Payment state is tracked elsewhere; this
//! only derives the amount shown on a new reservation.

use chrono::NaiveTime;
use rust_decimal::prelude::*;

/// Currency scale.
const DECIMAL_PLACES: u32 = 2;

/// Shortest billable duration: half an hour.
const MIN_BILLABLE_HOURS: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

const MINUTES_PER_HOUR: Decimal = Decimal::from_parts(60, 0, 0, false, 0);

/// First `digits[.digits]` token of a free-text rate such as "150/hour" or
/// "Rs 40.50 per hr". Anything unparseable prices at zero.
pub fn hourly_rate(descriptor: &str) -> Decimal {
    let bytes = descriptor.as_bytes();
    let Some(start) = bytes.iter().position(u8::is_ascii_digit) else {
        return Decimal::ZERO;
    };
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    Decimal::from_str(&descriptor[start..end]).unwrap_or(Decimal::ZERO)
}

/// Billable hours between two times of day, never less than half an hour.
pub fn billable_hours(start: NaiveTime, end: NaiveTime) -> Decimal {
    let seconds = (end - start).num_seconds();
    let hours = Decimal::from(seconds) / Decimal::from(60) / MINUTES_PER_HOUR;
    hours.max(MIN_BILLABLE_HOURS)
}

/// `hourly_rate(rate) × billable_hours(start, end)`, rounded to cents.
/// `None` when the product does not fit a `Decimal`.
pub fn compute_amount(rate: &str, start: NaiveTime, end: NaiveTime) -> Option<Decimal> {
    let amount = hourly_rate(rate).checked_mul(billable_hours(start, end))?;
    Some(amount.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero))
}
