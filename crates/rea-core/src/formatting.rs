//! Telegram HTML rendering for notifications and alert summaries.

use crate::domain::{Alert, Listing, ObjectCategory};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Integer part with `'` as thousands separator (Swiss style).
fn group_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('\'');
        }
        out.push(ch);
    }
    if value < 0.0 {
        out.insert(0, '-');
    }
    out
}

/// `1.0` → `1`, `3.5` → `3.5`.
fn trim_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

pub fn format_price(price: Option<f64>, unit: Option<&str>) -> String {
    let Some(price) = price.filter(|p| *p > 0.0) else {
        return "price on request".to_string();
    };

    let amount = format!("CHF {}", group_thousands(price));
    match unit.map(str::trim).filter(|u| !u.is_empty()) {
        None | Some("once") => amount,
        Some("monthly") => format!("{amount} / month"),
        Some(other) => format!("{amount} / {other}"),
    }
}

fn category_emoji(category: Option<ObjectCategory>) -> &'static str {
    match category {
        Some(ObjectCategory::Apartment) => "🏢",
        Some(ObjectCategory::House) => "🏡",
        Some(ObjectCategory::Park) => "🅿️",
        Some(ObjectCategory::Industry) => "🏭",
        Some(ObjectCategory::Shared) => "🛏",
        None => "🏠",
    }
}

/// Notification body for one matched listing.
pub fn format_listing_html(listing: &Listing) -> String {
    let mut title = listing
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Property")
        .to_string();
    if let Some(rooms) = listing.rooms {
        title.push_str(&format!(" - {} rooms", trim_number(rooms)));
    }

    let mut lines = vec![
        "🔔 <b>New property</b>".to_string(),
        String::new(),
        format!(
            "{} <b>{}</b>",
            category_emoji(listing.category),
            escape_html(&title)
        ),
    ];

    let address = listing
        .address
        .as_deref()
        .or(listing.location.as_deref())
        .unwrap_or("address not available");
    lines.push(format!("📍 {}", escape_html(address)));
    lines.push(format!(
        "💰 {}",
        escape_html(&format_price(listing.price, listing.price_unit.as_deref()))
    ));
    if let Some(surface) = listing.surface {
        lines.push(format!("📐 {} m²", trim_number(surface.floor())));
    }
    if let Some(url) = &listing.url {
        lines.push(String::new());
        lines.push(format!(
            "<a href=\"{}\">View listing</a>",
            escape_html(url)
        ));
    }

    lines.join("\n")
}

/// One-line summary of an alert, used by `/alerts`.
pub fn format_alert_line(alert: &Alert) -> String {
    let c = &alert.criteria;
    let mut parts = vec![format!("{} {}", escape_html(c.city.trim()), c.offer_kind)];

    match (c.min_rooms, c.max_rooms) {
        (Some(min), Some(max)) => {
            parts.push(format!("{}-{} rooms", trim_number(min), trim_number(max)))
        }
        (Some(min), None) => parts.push(format!("≥{} rooms", trim_number(min))),
        (None, Some(max)) => parts.push(format!("≤{} rooms", trim_number(max))),
        (None, None) => {}
    }
    if let Some(max) = c.max_price {
        parts.push(format!("≤ CHF {}", group_thousands(max)));
    }
    if let Some(min) = c.min_surface {
        parts.push(format!("≥{} m²", trim_number(min)));
    }
    if let Some(cat) = c.category {
        parts.push(cat.as_str().to_lowercase());
    }

    let state = if alert.active { "active" } else { "paused" };
    format!("<b>{}</b> {} ({state})", alert.id, parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertCriteria, AlertId, OfferKind, OwnerId};

    #[test]
    fn escapes_html() {
        assert_eq!(
            escape_html(r#"<b>"Via & Co"</b>"#),
            "&lt;b&gt;&quot;Via &amp; Co&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn prices_use_swiss_grouping_and_units() {
        assert_eq!(format_price(Some(1800.0), Some("monthly")), "CHF 1'800 / month");
        assert_eq!(format_price(Some(1_250_000.0), Some("once")), "CHF 1'250'000");
        assert_eq!(format_price(Some(950.0), None), "CHF 950");
        assert_eq!(format_price(Some(12.0), Some("yearly")), "CHF 12 / yearly");
        assert_eq!(format_price(None, Some("monthly")), "price on request");
        assert_eq!(format_price(Some(0.0), None), "price on request");
    }

    #[test]
    fn listing_message_includes_escaped_fields_and_link() {
        let listing = Listing {
            title: Some("Loft <attic>".to_string()),
            address: Some("Via Nassa 5, 6900 Lugano".to_string()),
            rooms: Some(3.5),
            price: Some(1800.0),
            price_unit: Some("monthly".to_string()),
            surface: Some(82.6),
            category: Some(ObjectCategory::Apartment),
            url: Some("https://flatfox.ch/en/flat/1/?a=1&b=2".to_string()),
            ..Listing::new("P1")
        };

        let html = format_listing_html(&listing);
        assert!(html.starts_with("🔔 <b>New property</b>"));
        assert!(html.contains("🏢 <b>Loft &lt;attic&gt; - 3.5 rooms</b>"));
        assert!(html.contains("📍 Via Nassa 5, 6900 Lugano"));
        assert!(html.contains("💰 CHF 1'800 / month"));
        assert!(html.contains("📐 82 m²"));
        assert!(html.contains(r#"<a href="https://flatfox.ch/en/flat/1/?a=1&amp;b=2">"#));
    }

    #[test]
    fn sparse_listing_still_renders() {
        let html = format_listing_html(&Listing::new("P2"));
        assert!(html.contains("🏠 <b>Property</b>"));
        assert!(html.contains("address not available"));
        assert!(html.contains("price on request"));
        assert!(!html.contains("href"));
    }

    #[test]
    fn alert_line_lists_constraints() {
        let mut criteria = AlertCriteria::new("Lugano", OfferKind::Rent);
        criteria.min_rooms = Some(2.0);
        criteria.max_rooms = Some(3.5);
        criteria.max_price = Some(2000.0);
        let alert = Alert {
            id: AlertId(4),
            owner: OwnerId(1),
            criteria,
            active: false,
            created_at: chrono::Utc::now(),
        };

        assert_eq!(
            format_alert_line(&alert),
            "<b>#4</b> Lugano RENT, 2-3.5 rooms, ≤ CHF 2'000 (paused)"
        );
    }
}
