//! Proximity search and location suggestions over listings.
//!
//! Everything here is a pure function of the listings passed in; callers
//! hand over a snapshot and every call recomputes from scratch.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::limits::*;
use crate::model::{Coordinate, Listing, LocationSuggestion, NearbyListing};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Length of one degree of latitude on the sphere above.
const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// Great-circle distance in km.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Coarse lat/lng window guaranteed to contain every point within
/// `radius_km` of `center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    /// `None` when the window wraps the antimeridian or reaches a pole:
    /// every longitude passes.
    pub lng_range: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(center: Coordinate, radius_km: f64) -> Self {
        // Pad by a small margin so floating-point rounding never excludes a
        // point the exact pass would accept.
        let lat_delta = radius_km / KM_PER_DEGREE * 1.000_001 + 1e-9;
        let min_lat = center.lat - lat_delta;
        let max_lat = center.lat + lat_delta;

        let lng_range = if min_lat <= -90.0 || max_lat >= 90.0 {
            None
        } else {
            let widest = center.lat.abs().max(min_lat.abs()).max(max_lat.abs());
            let lng_delta = lat_delta / widest.to_radians().cos();
            let (lo, hi) = (center.lng - lng_delta, center.lng + lng_delta);
            if lo < -180.0 || hi > 180.0 || lng_delta >= 180.0 {
                None
            } else {
                Some((lo, hi))
            }
        };

        Self {
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
            lng_range,
        }
    }

    pub fn contains(&self, p: Coordinate) -> bool {
        if p.lat < self.min_lat || p.lat > self.max_lat {
            return false;
        }
        match self.lng_range {
            Some((lo, hi)) => p.lng >= lo && p.lng <= hi,
            None => true,
        }
    }
}

/// Listings within `radius_km` of `center`, nearest first.
/// Equal distances are ordered by listing id so results are stable.
pub fn find_nearby<'a>(
    listings: impl IntoIterator<Item = &'a Listing>,
    center: Coordinate,
    radius_km: f64,
    active_only: bool,
) -> Vec<NearbyListing> {
    let bbox = BoundingBox::around(center, radius_km);
    let mut hits: Vec<NearbyListing> = listings
        .into_iter()
        .filter(|l| !active_only || l.is_active)
        .filter(|l| bbox.contains(l.coordinate))
        .filter_map(|l| {
            let distance_km = haversine_km(center, l.coordinate);
            (distance_km <= radius_km).then(|| NearbyListing {
                listing: l.clone(),
                distance_km,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.listing.id.cmp(&b.listing.id))
    });
    hits
}

/// Prefix-first label suggestions for active listings, deduplicated by
/// case-insensitive label. A prefix under two characters yields nothing.
pub fn suggest_locations<'a>(
    listings: impl IntoIterator<Item = &'a Listing>,
    prefix: &str,
    limit: usize,
) -> Vec<LocationSuggestion> {
    let needle = prefix.trim().to_lowercase();
    if needle.chars().count() < MIN_SUGGESTION_PREFIX_LEN {
        return Vec::new();
    }
    let limit = limit.clamp(1, MAX_SUGGESTIONS);

    // (rank, lowercased label, listing): rank 0 = starts with, 1 = contains.
    let mut candidates: Vec<(u8, String, &Listing)> = listings
        .into_iter()
        .filter(|l| l.is_active)
        .filter_map(|l| {
            let folded = l.label.trim().to_lowercase();
            if folded.starts_with(&needle) {
                Some((0, folded, l))
            } else if folded.contains(&needle) {
                Some((1, folded, l))
            } else {
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.id.cmp(&b.2.id))
    });

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|(_, folded, _)| seen.insert(folded.clone()))
        .take(limit)
        .map(|(_, _, l)| LocationSuggestion {
            listing_id: l.id,
            label: l.label.trim().to_string(),
            lat: l.coordinate.lat,
            lng: l.coordinate.lng,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn listing(label: &str, lat: f64, lng: f64, is_active: bool) -> Listing {
        Listing {
            id: Ulid::new(),
            lister_id: Ulid::new(),
            label: label.into(),
            coordinate: Coordinate::new(lat, lng),
            rate: "100/hour".into(),
            availability: "24x7".into(),
            is_active,
        }
    }

    const PUNE: Coordinate = Coordinate { lat: 18.5204, lng: 73.8567 };
    const MUMBAI: Coordinate = Coordinate { lat: 19.0760, lng: 72.8777 };

    #[test]
    fn haversine_known_distance() {
        let d = haversine_km(PUNE, MUMBAI);
        assert!((d - 119.9).abs() < 1.0, "pune-mumbai was {d}");
        assert_eq!(haversine_km(PUNE, PUNE), 0.0);
        assert!((haversine_km(PUNE, MUMBAI) - haversine_km(MUMBAI, PUNE)).abs() < 1e-9);
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_km(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - KM_PER_DEGREE).abs() < 1e-6);
    }

    #[test]
    fn nearby_sorted_by_distance() {
        let far = listing("Camp", 18.5100, 73.8800, true);
        let near = listing("FC Road", 18.5236, 73.8478, true);
        let here = listing("Shivajinagar", 18.5204, 73.8567, true);
        let listings = vec![far.clone(), near.clone(), here.clone()];

        let hits = find_nearby(&listings, PUNE, 10.0, true);
        let ids: Vec<_> = hits.iter().map(|h| h.listing.id).collect();
        assert_eq!(ids, vec![here.id, near.id, far.id]);
        assert!(hits.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[test]
    fn nearby_radius_is_inclusive_and_monotonic() {
        let listings = vec![
            listing("A", 18.53, 73.86, true),
            listing("B", 18.60, 73.90, true),
            listing("C", 19.00, 73.00, true),
            listing("Mumbai", MUMBAI.lat, MUMBAI.lng, true),
        ];
        let mut previous: Vec<Ulid> = Vec::new();
        for radius in [0.5, 2.0, 10.0, 100.0, 150.0, 1000.0] {
            let ids: Vec<Ulid> = find_nearby(&listings, PUNE, radius, true)
                .into_iter()
                .map(|h| h.listing.id)
                .collect();
            assert!(previous.iter().all(|id| ids.contains(id)), "radius {radius} dropped a hit");
            previous = ids;
        }
        assert_eq!(previous.len(), 4);

        let exact = haversine_km(PUNE, MUMBAI);
        let at_boundary = find_nearby(&listings[3..], PUNE, exact, true);
        assert_eq!(at_boundary.len(), 1);
    }

    #[test]
    fn nearby_skips_inactive_when_asked() {
        let listings = vec![listing("Closed", 18.5204, 73.8567, false)];
        assert!(find_nearby(&listings, PUNE, 5.0, true).is_empty());
        assert_eq!(find_nearby(&listings, PUNE, 5.0, false).len(), 1);
    }

    #[test]
    fn nearby_zero_radius_matches_exact_point() {
        let listings = vec![listing("Here", PUNE.lat, PUNE.lng, true)];
        assert_eq!(find_nearby(&listings, PUNE, 0.0, true).len(), 1);
    }

    #[test]
    fn bounding_box_never_excludes_exact_hits() {
        let centers = [
            PUNE,
            Coordinate::new(0.0, 179.9),
            Coordinate::new(89.5, 10.0),
            Coordinate::new(-60.0, -170.0),
        ];
        for center in centers {
            for radius in [1.0, 50.0, 500.0] {
                let bbox = BoundingBox::around(center, radius);
                for i in -20..=20 {
                    for j in -20..=20 {
                        let p = Coordinate::new(
                            (center.lat + i as f64 * 0.25).clamp(-90.0, 90.0),
                            ((center.lng + j as f64 * 0.25 + 540.0) % 360.0) - 180.0,
                        );
                        if haversine_km(center, p) <= radius {
                            assert!(bbox.contains(p), "{p:?} within {radius} km of {center:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn bounding_box_wraps_antimeridian() {
        let bbox = BoundingBox::around(Coordinate::new(0.0, 179.95), 20.0);
        assert!(bbox.lng_range.is_none());
        assert!(bbox.contains(Coordinate::new(0.0, -179.95)));
    }

    #[test]
    fn suggestions_rank_prefix_before_contains() {
        let listings = vec![
            listing("Old Pune Station", 18.52, 73.87, true),
            listing("Pune Camp", 18.51, 73.88, true),
            listing("Punawale", 18.63, 73.74, true),
            listing("Mumbai Central", 18.97, 72.82, true),
        ];
        let labels: Vec<_> = suggest_locations(&listings, "pun", 8)
            .into_iter()
            .map(|s| s.label)
            .collect();
        assert_eq!(labels, vec!["Punawale", "Pune Camp", "Old Pune Station"]);
    }

    #[test]
    fn suggestions_dedupe_case_insensitively() {
        let listings = vec![
            listing("Baner Road", 18.56, 73.78, true),
            listing("baner road", 18.57, 73.79, true),
            listing("BANER ROAD ", 18.58, 73.80, true),
        ];
        let hits = suggest_locations(&listings, "Baner", 8);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn suggestions_short_prefix_is_empty() {
        let listings = vec![listing("Aundh", 18.56, 73.80, true)];
        assert!(suggest_locations(&listings, "A", 8).is_empty());
        assert!(suggest_locations(&listings, "  ", 8).is_empty());
        assert_eq!(suggest_locations(&listings, "au", 8).len(), 1);
    }

    #[test]
    fn suggestions_respect_limit_and_activity() {
        let mut listings: Vec<Listing> = (0..12)
            .map(|i| listing(&format!("Kothrud Lane {i:02}"), 18.5, 73.8, true))
            .collect();
        listings.push(listing("Kothrud Depot", 18.5, 73.8, false));

        let hits = suggest_locations(&listings, "kothrud", DEFAULT_SUGGESTION_LIMIT);
        assert_eq!(hits.len(), DEFAULT_SUGGESTION_LIMIT);
        assert!(hits.iter().all(|s| s.label != "Kothrud Depot"));
        assert_eq!(hits[0].label, "Kothrud Lane 00");
    }
}
