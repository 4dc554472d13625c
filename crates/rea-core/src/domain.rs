use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Alert owner. Owners are Telegram users, so this doubles as their private chat id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl From<OwnerId> for ChatId {
    fn from(owner: OwnerId) -> Self {
        ChatId(owner.0)
    }
}

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Source-assigned property identifier (opaque, stable across polls).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned alert id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OfferKind {
    Rent,
    Sale,
}

impl OfferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OfferKind::Rent => "RENT",
            OfferKind::Sale => "SALE",
        }
    }
}

impl fmt::Display for OfferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RENT" => Ok(OfferKind::Rent),
            "SALE" | "BUY" => Ok(OfferKind::Sale),
            other => Err(Error::InvalidAlert(format!(
                "offer kind must be RENT or SALE, got {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectCategory {
    Apartment,
    House,
    Park,
    Industry,
    Shared,
}

impl ObjectCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectCategory::Apartment => "APARTMENT",
            ObjectCategory::House => "HOUSE",
            ObjectCategory::Park => "PARK",
            ObjectCategory::Industry => "INDUSTRY",
            ObjectCategory::Shared => "SHARED",
        }
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APARTMENT" => Ok(ObjectCategory::Apartment),
            "HOUSE" => Ok(ObjectCategory::House),
            "PARK" => Ok(ObjectCategory::Park),
            "INDUSTRY" => Ok(ObjectCategory::Industry),
            "SHARED" => Ok(ObjectCategory::Shared),
            other => Err(Error::InvalidAlert(format!("unknown category {other:?}"))),
        }
    }
}

/// Search criteria of an alert. Every `None` means "no constraint".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertCriteria {
    pub city: String,
    pub offer_kind: OfferKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rooms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rooms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_surface: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ObjectCategory>,
}

impl AlertCriteria {
    pub fn new(city: impl Into<String>, offer_kind: OfferKind) -> Self {
        Self {
            city: city.into(),
            offer_kind,
            min_rooms: None,
            max_rooms: None,
            max_price: None,
            min_surface: None,
            category: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.city.trim().is_empty() {
            return Err(Error::InvalidAlert("city must not be empty".to_string()));
        }

        let bounds = [
            ("min_rooms", self.min_rooms),
            ("max_rooms", self.max_rooms),
            ("max_price", self.max_price),
            ("min_surface", self.min_surface),
        ];
        for (name, value) in bounds {
            let Some(v) = value else {
                continue;
            };
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidAlert(format!(
                    "{name} must be a non-negative number, got {v}"
                )));
            }
        }

        if let (Some(min), Some(max)) = (self.min_rooms, self.max_rooms) {
            if min > max {
                return Err(Error::InvalidAlert(format!(
                    "min_rooms ({min}) is greater than max_rooms ({max})"
                )));
            }
        }

        Ok(())
    }

    pub fn shape(&self) -> FilterShape {
        FilterShape::new(&self.city, self.offer_kind)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub owner: OwnerId,
    #[serde(flatten)]
    pub criteria: AlertCriteria,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn shape(&self) -> FilterShape {
        self.criteria.shape()
    }
}

/// One property record as seen during a single poll.
///
/// Every matchable field is optional because the source may omit it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Listing {
    pub id: PropertyId,
    pub location: Option<String>,
    pub offer_kind: Option<OfferKind>,
    pub rooms: Option<f64>,
    pub price: Option<f64>,
    pub surface: Option<f64>,
    pub category: Option<ObjectCategory>,
    /// Last-modified marker, when the source provides one.
    pub version: Option<String>,

    // Presentation only.
    pub title: Option<String>,
    pub address: Option<String>,
    pub price_unit: Option<String>,
    pub url: Option<String>,
}

impl Listing {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: PropertyId::new(id),
            ..Self::default()
        }
    }
}

/// Coarse query key shared by all alerts that need the same source request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterShape {
    /// Normalized (trimmed, lowercased) location.
    pub location: String,
    pub offer_kind: OfferKind,
}

impl FilterShape {
    pub fn new(location: &str, offer_kind: OfferKind) -> Self {
        Self {
            location: normalize_location(location),
            offer_kind,
        }
    }
}

impl fmt::Display for FilterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location, self.offer_kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub owner: OwnerId,
    pub property: PropertyId,
    pub notified_at: DateTime<Utc>,
}

pub fn normalize_location(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_validation_rejects_inverted_room_range() {
        let mut c = AlertCriteria::new("Lugano", OfferKind::Rent);
        c.min_rooms = Some(4.0);
        c.max_rooms = Some(2.5);
        assert!(matches!(c.validate(), Err(Error::InvalidAlert(_))));

        c.max_rooms = Some(4.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn criteria_validation_rejects_negative_or_nan_bounds() {
        let mut c = AlertCriteria::new("Lugano", OfferKind::Rent);
        c.max_price = Some(-1.0);
        assert!(c.validate().is_err());

        c.max_price = Some(0.0);
        c.min_surface = Some(f64::NAN);
        assert!(c.validate().is_err());

        c.min_surface = None;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn criteria_validation_requires_city() {
        let c = AlertCriteria::new("   ", OfferKind::Sale);
        assert!(c.validate().is_err());
    }

    #[test]
    fn shape_normalizes_location() {
        let a = FilterShape::new("  Lugano ", OfferKind::Rent);
        let b = FilterShape::new("LUGANO", OfferKind::Rent);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "lugano/RENT");
        assert_ne!(a, FilterShape::new("Lugano", OfferKind::Sale));
    }

    #[test]
    fn offer_kind_and_category_parse_case_insensitively() {
        assert_eq!("rent".parse::<OfferKind>().unwrap(), OfferKind::Rent);
        assert_eq!(" Sale ".parse::<OfferKind>().unwrap(), OfferKind::Sale);
        assert!("lease".parse::<OfferKind>().is_err());
        assert_eq!(
            "apartment".parse::<ObjectCategory>().unwrap(),
            ObjectCategory::Apartment
        );
    }

    #[test]
    fn alert_roundtrips_through_json_with_flattened_criteria() {
        let mut criteria = AlertCriteria::new("Lugano", OfferKind::Rent);
        criteria.max_price = Some(2000.0);
        let alert = Alert {
            id: AlertId(7),
            owner: OwnerId(42),
            criteria,
            active: true,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        };

        let v = serde_json::to_value(&alert).unwrap();
        assert_eq!(v["city"], "Lugano");
        assert_eq!(v["offer_kind"], "RENT");
        assert!(v.get("min_rooms").is_none());

        let back: Alert = serde_json::from_value(v).unwrap();
        assert_eq!(back, alert);
    }
}
