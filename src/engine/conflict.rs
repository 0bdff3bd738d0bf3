use chrono::NaiveTime;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_slot(start: NaiveTime, end: NaiveTime) -> Result<TimeSlot, EngineError> {
    TimeSlot::try_new(start, end).ok_or_else(|| {
        EngineError::invalid(
            "end_time",
            format!("{} is not after start_time {}", end.format("%H:%M"), start.format("%H:%M")),
        )
    })
}

pub(crate) fn validate_coordinate(coordinate: &Coordinate) -> Result<(), EngineError> {
    if !coordinate.is_valid() {
        return Err(EngineError::invalid(
            "coordinate",
            format!("({}, {}) is not a WGS84 lat/lng", coordinate.lat, coordinate.lng),
        ));
    }
    Ok(())
}

pub(crate) fn validate_radius(radius_km: f64) -> Result<(), EngineError> {
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(EngineError::invalid("radius_km", "must be a non-negative number"));
    }
    if radius_km > MAX_RADIUS_KM {
        return Err(EngineError::LimitExceeded("radius too large"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), EngineError> {
    if value.len() > max_len {
        return Err(EngineError::invalid(field, format!("longer than {max_len} bytes")));
    }
    Ok(())
}

pub(crate) fn validate_optional_text(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<(), EngineError> {
    value.map_or(Ok(()), |v| validate_text(field, v, max_len))
}

pub(crate) fn validate_draft(draft: &ListingDraft) -> Result<(), EngineError> {
    if draft.label.trim().is_empty() {
        return Err(EngineError::invalid("label", "must not be empty"));
    }
    validate_text("label", &draft.label, MAX_LABEL_LEN)?;
    validate_text("rate", &draft.rate, MAX_RATE_LEN)?;
    validate_text("availability", &draft.availability, MAX_AVAILABILITY_LEN)?;
    validate_coordinate(&draft.coordinate)
}

pub(crate) fn validate_patch(patch: &ListingPatch) -> Result<(), EngineError> {
    if patch.is_empty() {
        return Err(EngineError::invalid("listing", "nothing to update"));
    }
    if let Some(label) = &patch.label
        && label.trim().is_empty()
    {
        return Err(EngineError::invalid("label", "must not be empty"));
    }
    validate_optional_text("label", patch.label.as_deref(), MAX_LABEL_LEN)?;
    validate_optional_text("rate", patch.rate.as_deref(), MAX_RATE_LEN)?;
    validate_optional_text("availability", patch.availability.as_deref(), MAX_AVAILABILITY_LEN)
}

/// Number of booked slots on the day that overlap `slot`.
pub(crate) fn count_conflicts(day: &DaySchedule, slot: &TimeSlot) -> usize {
    day.overlapping(slot).count()
}

/// Cancelled reservations are never in the schedule, so every overlap is a
/// live conflict.
pub(crate) fn check_no_conflict(day: &DaySchedule, slot: &TimeSlot) -> Result<(), EngineError> {
    if day.overlapping(slot).next().is_some() {
        return Err(EngineError::Conflict {
            date: day.key.date,
            slot: *slot,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day_with(slots: &[(NaiveTime, NaiveTime)]) -> DaySchedule {
        let mut day = DaySchedule::new(ScheduleKey {
            listing_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        });
        for &(start, end) in slots {
            day.insert_slot(BookedSlot {
                reservation_id: Ulid::new(),
                slot: TimeSlot::new(start, end),
            });
        }
        day
    }

    #[test]
    fn adjacent_slots_do_not_conflict() {
        let day = day_with(&[(t(9, 0), t(10, 0))]);
        assert!(check_no_conflict(&day, &TimeSlot::new(t(10, 0), t(11, 0))).is_ok());
        assert!(check_no_conflict(&day, &TimeSlot::new(t(8, 0), t(9, 0))).is_ok());
    }

    #[test]
    fn partial_overlap_conflicts() {
        let day = day_with(&[(t(9, 0), t(10, 0))]);
        let result = check_no_conflict(&day, &TimeSlot::new(t(9, 30), t(10, 30)));
        assert!(matches!(result, Err(EngineError::Conflict { .. })));
    }

    #[test]
    fn count_reports_every_overlap() {
        let day = day_with(&[(t(8, 0), t(9, 0)), (t(9, 0), t(10, 0)), (t(11, 0), t(12, 0))]);
        assert_eq!(count_conflicts(&day, &TimeSlot::new(t(8, 30), t(11, 30))), 3);
        assert_eq!(count_conflicts(&day, &TimeSlot::new(t(10, 0), t(11, 0))), 0);
    }

    #[test]
    fn slot_validation() {
        assert!(validate_slot(t(9, 0), t(9, 1)).is_ok());
        let err = validate_slot(t(23, 0), t(1, 0)).unwrap_err();
        assert_eq!(err.to_string(), "invalid end_time: 01:00 is not after start_time 23:00");
    }

    #[test]
    fn radius_validation() {
        assert!(validate_radius(0.0).is_ok());
        assert!(validate_radius(25.0).is_ok());
        assert!(validate_radius(-1.0).is_err());
        assert!(validate_radius(f64::NAN).is_err());
        assert!(matches!(validate_radius(1e6), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn draft_validation() {
        let mut draft = ListingDraft {
            label: "FC Road".into(),
            coordinate: Coordinate::new(18.52, 73.84),
            rate: "50/hour".into(),
            availability: "9am-9pm".into(),
        };
        assert!(validate_draft(&draft).is_ok());
        draft.label = "   ".into();
        assert!(validate_draft(&draft).is_err());
        draft.label = "FC Road".into();
        draft.coordinate = Coordinate::new(100.0, 0.0);
        assert!(validate_draft(&draft).is_err());
    }

    #[test]
    fn empty_patch_rejected() {
        assert!(validate_patch(&ListingPatch::default()).is_err());
        let patch = ListingPatch {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(validate_patch(&patch).is_ok());
    }
}
