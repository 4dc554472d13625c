use std::sync::Arc;

use teloxide::prelude::*;

use rea_core::{
    domain::{AlertCriteria, AlertId, ChatId, OfferKind, OwnerId},
    formatting::{escape_html, format_alert_line, format_listing_html},
    scheduler::{SchedulerStatus, TriggerOutcome},
    search::{search, SearchLimits, SearchResults},
    Error, Result,
};

use crate::router::AppState;

const HELP: &str = "🏠 <b>Property alerts</b>\n\n\
I check the listings regularly and message you once per new property that matches one of your alerts.\n\n\
<b>📋 Commands:</b>\n\
/newalert &lt;city&gt; &lt;rent|sale&gt; [rooms=MIN-MAX] [price=MAX] [surface=MIN] [category=KIND] - Create an alert\n\
/editalert &lt;id&gt; &lt;city&gt; &lt;rent|sale&gt; [options] - Replace an alert's criteria\n\
/alerts - List your alerts\n\
/search &lt;id&gt; - Show current listings for an alert\n\
/search &lt;city&gt; &lt;rent|sale&gt; [options] - One-off search\n\
/pause &lt;id&gt; - Pause an alert\n\
/resume &lt;id&gt; - Resume a paused alert\n\
/status - Polling status\n\
/help - Show this message\n\n\
<b>💡 Example:</b>\n\
<code>/newalert Lugano rent rooms=2-3.5 price=2000</code>";

const SEARCH_RESULTS: usize = 5;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Parse `/newalert` arguments: `<city...> <rent|sale> [key=value...]`.
fn parse_new_alert(args: &str) -> Result<AlertCriteria> {
    let mut words = Vec::new();
    let mut options = Vec::new();
    for token in args.split_whitespace() {
        match token.split_once('=') {
            Some(kv) => options.push(kv),
            None => words.push(token),
        }
    }

    let Some((kind, city)) = words.split_last() else {
        return Err(Error::InvalidAlert("city and rent|sale are required".into()));
    };
    let offer_kind: OfferKind = kind.parse()?;
    if city.is_empty() {
        return Err(Error::InvalidAlert("city is required".into()));
    }

    let mut criteria = AlertCriteria::new(city.join(" "), offer_kind);
    for (key, value) in options {
        match key.to_lowercase().as_str() {
            "rooms" => {
                let (min, max) = parse_range(value)?;
                criteria.min_rooms = min;
                criteria.max_rooms = max;
            }
            "price" => criteria.max_price = Some(parse_number(key, value)?),
            "surface" => criteria.min_surface = Some(parse_number(key, value)?),
            "category" => criteria.category = Some(value.parse()?),
            other => {
                return Err(Error::InvalidAlert(format!("unknown option {other:?}")));
            }
        }
    }

    criteria.validate()?;
    Ok(criteria)
}

fn parse_number(key: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .replace('\'', "")
        .parse::<f64>()
        .map_err(|_| Error::InvalidAlert(format!("{key}: {value:?} is not a number")))
}

/// `3` (at least 3), `2-4`, `2-` or `-4`.
fn parse_range(value: &str) -> Result<(Option<f64>, Option<f64>)> {
    let bound = |s: &str| -> Result<Option<f64>> {
        if s.trim().is_empty() {
            Ok(None)
        } else {
            parse_number("rooms", s).map(Some)
        }
    };

    match value.split_once('-') {
        Some((min, max)) => {
            let range = (bound(min)?, bound(max)?);
            if range == (None, None) {
                return Err(Error::InvalidAlert("rooms: empty range".into()));
            }
            Ok(range)
        }
        None => Ok((Some(parse_number("rooms", value)?), None)),
    }
}

/// `<id> <criteria...>` for `/editalert`.
fn parse_edit_alert(args: &str) -> Result<(AlertId, AlertCriteria)> {
    let args = args.trim();
    let (id, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let id = parse_alert_id(id)
        .ok_or_else(|| Error::InvalidAlert("an alert id is required".into()))?;
    Ok((id, parse_new_alert(rest)?))
}

enum SearchTarget {
    Alert(AlertId),
    Criteria(AlertCriteria),
}

fn parse_search(args: &str) -> Result<SearchTarget> {
    match parse_alert_id(args) {
        Some(id) => Ok(SearchTarget::Alert(id)),
        None => parse_new_alert(args).map(SearchTarget::Criteria),
    }
}

fn parse_alert_id(arg: &str) -> Option<AlertId> {
    arg.trim()
        .trim_start_matches('#')
        .parse::<u64>()
        .ok()
        .map(AlertId)
}

fn format_status(status: &SchedulerStatus, active: usize, total: usize, notified: usize) -> String {
    let mut lines = vec![
        "📊 <b>Status</b>".to_string(),
        String::new(),
        format!(
            "Polling every {} min, currently {}",
            status.interval.as_secs() / 60,
            status.phase
        ),
        format!(
            "Cycles: {} completed, {} failed, {} triggers skipped",
            status.cycles_completed, status.cycles_failed, status.skipped_triggers
        ),
    ];
    if let Some(at) = status.last_finished_at {
        lines.push(format!("Last cycle: {}", at.format("%Y-%m-%d %H:%M UTC")));
    }
    if let Some(report) = &status.last_report {
        lines.push(format!("Last report: {}", escape_html(&report.to_string())));
    }
    if let Some(err) = &status.last_error {
        lines.push(format!("Last error: <code>{}</code>", escape_html(err)));
    }
    lines.push(String::new());
    lines.push(format!("Your alerts: {active} active of {total}"));
    lines.push(format!("Properties sent to you: {notified}"));
    lines.join("\n")
}

fn format_search_summary(criteria: &AlertCriteria, res: &SearchResults) -> String {
    let what = format!(
        "{} in {}",
        criteria.offer_kind.as_str().to_lowercase(),
        escape_html(&criteria.city)
    );
    match res.listings.len() {
        0 => format!(
            "🔍 No matching listings for {what} among the {} latest.",
            res.scanned
        ),
        n if res.truncated => format!(
            "🔍 First {n} matches for {what} (more among the {} latest):",
            res.scanned
        ),
        n => format!("🔍 {n} matches for {what}:"),
    }
}

async fn run_search(state: &AppState, chat_id: i64, owner: OwnerId, arg: &str) -> Result<()> {
    let criteria = match parse_search(arg)? {
        SearchTarget::Criteria(criteria) => criteria,
        SearchTarget::Alert(id) => state
            .alerts
            .get(owner)
            .await?
            .into_iter()
            .find(|a| a.id == id)
            .map(|a| a.criteria)
            .ok_or(Error::AlertNotFound(id))?,
    };

    let limits = SearchLimits {
        scan: state.cfg.max_listings_per_shape,
        results: SEARCH_RESULTS,
        timeout: state.cfg.fetch_timeout,
    };
    let res = search(state.source.as_ref(), &criteria, &limits).await?;

    reply(state, chat_id, &format_search_summary(&criteria, &res)).await;
    for listing in &res.listings {
        reply(state, chat_id, &format_listing_html(listing)).await;
    }
    Ok(())
}

async fn reply(state: &AppState, chat_id: i64, html: &str) {
    if let Err(e) = state.messenger.send_html(ChatId(chat_id), html).await {
        tracing::warn!(chat_id, "command reply failed: {e}");
    }
}

fn user_error(e: &Error) -> String {
    match e {
        Error::InvalidAlert(m) => format!("❌ {}", escape_html(m)),
        Error::AlertNotFound(id) => format!("❌ Alert {id} not found"),
        Error::SourceUnavailable(_) => {
            tracing::warn!("search failed: {e}");
            "❌ Listings are unavailable right now, please try again later.".to_string()
        }
        other => {
            tracing::error!("command failed: {other}");
            "❌ Something went wrong, please try again later.".to_string()
        }
    }
}

pub async fn handle_command(
    chat_id: i64,
    user_id: i64,
    text: &str,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let owner = OwnerId(user_id);
    let (cmd, arg) = parse_command(text);

    let body = match cmd.as_str() {
        "start" | "help" => HELP.to_string(),

        "newalert" => match parse_new_alert(&arg) {
            Ok(criteria) => match state.alerts.create(owner, criteria).await {
                Ok(alert) => {
                    // Run a cycle right away so the owner does not wait a full interval.
                    if let TriggerOutcome::Skipped = state.scheduler.trigger() {
                        tracing::debug!("cycle already running, new alert picked up next time");
                    }
                    format!("✅ Alert created\n\n{}", format_alert_line(&alert))
                }
                Err(e) => user_error(&e),
            },
            Err(e) => format!(
                "{}\n\nUsage: <code>/newalert Lugano rent rooms=2-4 price=2000</code>",
                user_error(&e)
            ),
        },

        "editalert" => match parse_edit_alert(&arg) {
            Ok((id, criteria)) => match state.alerts.update(owner, id, criteria).await {
                Ok(alert) => format!("✏️ Alert updated\n\n{}", format_alert_line(&alert)),
                Err(e) => user_error(&e),
            },
            Err(e) => format!(
                "{}\n\nUsage: <code>/editalert 3 Lugano rent rooms=2-4 price=2200</code>",
                user_error(&e)
            ),
        },

        "search" => match run_search(&state, chat_id, owner, &arg).await {
            Ok(()) => return Ok(()),
            Err(e @ Error::InvalidAlert(_)) => format!(
                "{}\n\nUsage: <code>/search 3</code> or <code>/search Lugano rent price=2000</code>",
                user_error(&e)
            ),
            Err(e) => user_error(&e),
        },

        "alerts" => match state.alerts.get(owner).await {
            Ok(alerts) if alerts.is_empty() => {
                "You have no alerts yet. Create one with /newalert.".to_string()
            }
            Ok(alerts) => {
                let mut lines = vec!["📋 <b>Your alerts</b>".to_string(), String::new()];
                lines.extend(alerts.iter().map(format_alert_line));
                lines.join("\n")
            }
            Err(e) => user_error(&e),
        },

        "pause" | "resume" => match parse_alert_id(&arg) {
            None => format!("Usage: /{cmd} &lt;id&gt;"),
            Some(id) => {
                let res = if cmd == "pause" {
                    state.alerts.deactivate(owner, id).await
                } else {
                    state.alerts.activate(owner, id).await
                };
                match res {
                    Ok(alert) => format_alert_line(&alert),
                    Err(e) => user_error(&e),
                }
            }
        },

        "status" => {
            let alerts = state.alerts.get(owner).await;
            let notified = state.ledger.count_for(owner).await;
            match (alerts, notified) {
                (Ok(alerts), Ok(notified)) => {
                    let active = alerts.iter().filter(|a| a.active).count();
                    format_status(&state.scheduler.status(), active, alerts.len(), notified)
                }
                (Err(e), _) | (_, Err(e)) => user_error(&e),
            }
        }

        _ => "Unknown command. Send /help for the list.".to_string(),
    };

    reply(&state, chat_id, &body).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rea_core::{domain::ObjectCategory, engine::CyclePhase, engine::CycleReport};
    use std::time::Duration;

    #[test]
    fn parses_command_with_bot_suffix() {
        assert_eq!(
            parse_command("/NewAlert@rea_bot Lugano rent"),
            ("newalert".to_string(), "Lugano rent".to_string())
        );
        assert_eq!(parse_command("/alerts"), ("alerts".to_string(), String::new()));
    }

    #[test]
    fn new_alert_with_all_options() {
        let c = parse_new_alert("Lugano rent rooms=2-3.5 price=2'000 surface=60 category=apartment")
            .unwrap();
        assert_eq!(c.city, "Lugano");
        assert_eq!(c.offer_kind, OfferKind::Rent);
        assert_eq!(c.min_rooms, Some(2.0));
        assert_eq!(c.max_rooms, Some(3.5));
        assert_eq!(c.max_price, Some(2000.0));
        assert_eq!(c.min_surface, Some(60.0));
        assert_eq!(c.category, Some(ObjectCategory::Apartment));
    }

    #[test]
    fn new_alert_accepts_multi_word_cities_and_open_ranges() {
        let c = parse_new_alert("San Nazzaro sale rooms=4-").unwrap();
        assert_eq!(c.city, "San Nazzaro");
        assert_eq!(c.offer_kind, OfferKind::Sale);
        assert_eq!((c.min_rooms, c.max_rooms), (Some(4.0), None));

        let c = parse_new_alert("Locarno rent rooms=-2").unwrap();
        assert_eq!((c.min_rooms, c.max_rooms), (None, Some(2.0)));

        let c = parse_new_alert("Locarno rent rooms=3").unwrap();
        assert_eq!((c.min_rooms, c.max_rooms), (Some(3.0), None));
    }

    #[test]
    fn new_alert_rejects_bad_input() {
        for args in [
            "",
            "rent",
            "Lugano lease",
            "Lugano rent rooms=4-2",
            "Lugano rent price=cheap",
            "Lugano rent price=-5",
            "Lugano rent colour=blue",
            "Lugano rent rooms=-",
            "Lugano rent category=castle",
        ] {
            assert!(
                matches!(parse_new_alert(args), Err(Error::InvalidAlert(_))),
                "{args:?}"
            );
        }
    }

    #[test]
    fn alert_ids_accept_hash_prefix() {
        assert_eq!(parse_alert_id("#12"), Some(AlertId(12)));
        assert_eq!(parse_alert_id(" 3 "), Some(AlertId(3)));
        assert_eq!(parse_alert_id("abc"), None);
        assert_eq!(parse_alert_id(""), None);
    }

    #[test]
    fn edit_alert_takes_an_id_then_criteria() {
        let (id, c) = parse_edit_alert("#4 Locarno sale price=900000").unwrap();
        assert_eq!(id, AlertId(4));
        assert_eq!(c.city, "Locarno");
        assert_eq!(c.offer_kind, OfferKind::Sale);
        assert_eq!(c.max_price, Some(900000.0));

        for args in ["", "4", "Locarno sale", "4 Locarno lease"] {
            assert!(
                matches!(parse_edit_alert(args), Err(Error::InvalidAlert(_))),
                "{args:?}"
            );
        }
    }

    #[test]
    fn search_accepts_an_alert_id_or_criteria() {
        assert!(matches!(parse_search(" #7 "), Ok(SearchTarget::Alert(AlertId(7)))));
        match parse_search("Lugano rent price=2000") {
            Ok(SearchTarget::Criteria(c)) => {
                assert_eq!(c.city, "Lugano");
                assert_eq!(c.max_price, Some(2000.0));
            }
            _ => panic!("expected ad-hoc criteria"),
        }
        assert!(matches!(parse_search(""), Err(Error::InvalidAlert(_))));
    }

    #[test]
    fn search_summary_reports_counts() {
        let c = AlertCriteria::new("Lugano", OfferKind::Rent);
        let listing = |id: &str| rea_core::domain::Listing::new(id);

        let none = SearchResults {
            scanned: 50,
            ..SearchResults::default()
        };
        assert_eq!(
            format_search_summary(&c, &none),
            "🔍 No matching listings for rent in Lugano among the 50 latest."
        );

        let some = SearchResults {
            listings: vec![listing("P1"), listing("P2")],
            scanned: 12,
            truncated: false,
        };
        assert_eq!(format_search_summary(&c, &some), "🔍 2 matches for rent in Lugano:");

        let capped = SearchResults {
            truncated: true,
            ..some
        };
        assert!(format_search_summary(&c, &capped).starts_with("🔍 First 2 matches"));
    }

    #[test]
    fn status_shows_last_report_and_owner_counts() {
        let status = SchedulerStatus {
            interval: Duration::from_secs(3600),
            phase: CyclePhase::Idle,
            running: false,
            cycles_completed: 5,
            cycles_failed: 1,
            skipped_triggers: 2,
            last_report: Some(CycleReport {
                alerts: 3,
                shapes: 2,
                delivered: 4,
                ..CycleReport::default()
            }),
            last_error: Some("store unavailable: <disk>".to_string()),
            last_finished_at: None,
        };

        let html = format_status(&status, 1, 2, 7);
        assert!(html.contains("Polling every 60 min, currently idle"));
        assert!(html.contains("5 completed, 1 failed, 2 triggers skipped"));
        assert!(html.contains("3 alerts, 2 shapes (0 failed)"));
        assert!(html.contains("&lt;disk&gt;"));
        assert!(html.contains("Your alerts: 1 active of 2"));
        assert!(html.contains("Properties sent to you: 7"));
    }
}
