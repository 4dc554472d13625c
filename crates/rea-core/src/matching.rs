//! Alert × listing matching.
//!
//! All rules are AND-combined. An alert bound that is `None` does not
//! constrain anything; a listing field that is `None` fails every rule that
//! looks at it.

use crate::domain::{normalize_location, Alert, AlertCriteria, Listing};

/// Does `listing` satisfy `alert`? Pure and total.
pub fn matches(alert: &Alert, listing: &Listing) -> bool {
    criteria_match(&alert.criteria, listing)
}

pub fn criteria_match(c: &AlertCriteria, listing: &Listing) -> bool {
    let Some(location) = listing.location.as_deref() else {
        return false;
    };
    if normalize_location(location) != normalize_location(&c.city) {
        return false;
    }

    if listing.offer_kind != Some(c.offer_kind) {
        return false;
    }

    if !at_least(listing.rooms, c.min_rooms) || !at_most(listing.rooms, c.max_rooms) {
        return false;
    }
    if !at_most(listing.price, c.max_price) {
        return false;
    }
    if !at_least(listing.surface, c.min_surface) {
        return false;
    }

    if let Some(category) = c.category {
        if listing.category != Some(category) {
            return false;
        }
    }

    true
}

fn at_least(value: Option<f64>, bound: Option<f64>) -> bool {
    match (value, bound) {
        (_, None) => true,
        (Some(v), Some(b)) => v >= b,
        (None, Some(_)) => false,
    }
}

fn at_most(value: Option<f64>, bound: Option<f64>) -> bool {
    match (value, bound) {
        (_, None) => true,
        (Some(v), Some(b)) => v <= b,
        (None, Some(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertId, ObjectCategory, OfferKind, OwnerId};
    use chrono::Utc;

    fn lugano_rent_alert() -> Alert {
        let mut criteria = AlertCriteria::new("Lugano", OfferKind::Rent);
        criteria.max_price = Some(2000.0);
        criteria.min_rooms = Some(2.0);
        Alert {
            id: AlertId(1),
            owner: OwnerId(1),
            criteria,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn listing(id: &str, price: f64) -> Listing {
        Listing {
            location: Some("Lugano".to_string()),
            offer_kind: Some(OfferKind::Rent),
            price: Some(price),
            rooms: Some(3.0),
            surface: Some(80.0),
            ..Listing::new(id)
        }
    }

    #[test]
    fn lugano_rent_scenario() {
        let alert = lugano_rent_alert();
        assert!(matches(&alert, &listing("P1", 1800.0)));
        assert!(!matches(&alert, &listing("P2", 2500.0)));
    }

    #[test]
    fn bounds_are_inclusive() {
        let mut alert = lugano_rent_alert();
        alert.criteria.max_rooms = Some(3.0);
        alert.criteria.min_surface = Some(80.0);
        assert!(matches(&alert, &listing("P1", 2000.0)));
    }

    #[test]
    fn location_is_case_insensitive_but_exact() {
        let alert = lugano_rent_alert();
        let mut l = listing("P1", 1500.0);
        l.location = Some("  LUGANO".to_string());
        assert!(matches(&alert, &l));

        l.location = Some("Lugano-Paradiso".to_string());
        assert!(!matches(&alert, &l));
    }

    #[test]
    fn offer_kind_must_agree() {
        let alert = lugano_rent_alert();
        let mut l = listing("P1", 1500.0);
        l.offer_kind = Some(OfferKind::Sale);
        assert!(!matches(&alert, &l));
    }

    #[test]
    fn missing_constrained_field_fails_closed() {
        let alert = lugano_rent_alert();

        let mut no_price = listing("P1", 1500.0);
        no_price.price = None;
        assert!(!matches(&alert, &no_price));

        let mut no_rooms = listing("P1", 1500.0);
        no_rooms.rooms = None;
        assert!(!matches(&alert, &no_rooms));

        let mut no_location = listing("P1", 1500.0);
        no_location.location = None;
        assert!(!matches(&alert, &no_location));

        let mut no_kind = listing("P1", 1500.0);
        no_kind.offer_kind = None;
        assert!(!matches(&alert, &no_kind));
    }

    #[test]
    fn missing_unconstrained_field_is_ignored() {
        let alert = lugano_rent_alert();
        let mut l = listing("P1", 1500.0);
        l.surface = None;
        l.category = None;
        assert!(matches(&alert, &l));
    }

    #[test]
    fn category_constraint() {
        let mut alert = lugano_rent_alert();
        alert.criteria.category = Some(ObjectCategory::Apartment);

        let mut l = listing("P1", 1500.0);
        assert!(!matches(&alert, &l));
        l.category = Some(ObjectCategory::House);
        assert!(!matches(&alert, &l));
        l.category = Some(ObjectCategory::Apartment);
        assert!(matches(&alert, &l));
    }

    #[test]
    fn matching_is_deterministic() {
        let alert = lugano_rent_alert();
        let l = listing("P1", 1999.0);
        let first = matches(&alert, &l);
        for _ in 0..10 {
            assert_eq!(matches(&alert, &l), first);
        }
    }
}
