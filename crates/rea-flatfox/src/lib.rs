//! Flatfox adapter (public listing API).
//!
//! Implements `ListingSource` over `GET /api/v1/public-listing/`, paging by
//! offset until the source runs out or the engine stops pulling.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use rea_core::{
    config::Config,
    domain::{FilterShape, Listing, ObjectCategory, OfferKind, PropertyId},
    ports::{ListingCursor, ListingSource},
    Error, Result,
};

const FLATFOX_BASE: &str = "https://flatfox.ch";
const USER_AGENT: &str = concat!("rea/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub struct FlatfoxConfig {
    pub api_url: String,
    /// Canton filter applied to every query.
    pub state: String,
    pub page_size: usize,
    pub timeout: Duration,
}

impl From<&Config> for FlatfoxConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            api_url: cfg.flatfox_api_url.clone(),
            state: cfg.flatfox_state.clone(),
            page_size: cfg.flatfox_page_size,
            timeout: cfg.fetch_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FlatfoxClient {
    cfg: FlatfoxConfig,
    http: reqwest::Client,
}

impl FlatfoxClient {
    pub fn new(cfg: FlatfoxConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("flatfox http client: {e}")))?;
        Ok(Self { cfg, http })
    }

    async fn fetch_page(&self, shape: &FilterShape, offset: usize) -> Result<Page> {
        let city = display_city(&shape.location);
        let limit = self.cfg.page_size.to_string();
        let offset_s = offset.to_string();
        let query = [
            ("state", self.cfg.state.as_str()),
            ("city", city.as_str()),
            ("offer_type", shape.offer_kind.as_str()),
            ("limit", limit.as_str()),
            ("offset", offset_s.as_str()),
        ];

        tracing::debug!(shape = %shape, offset, "requesting flatfox page");

        let resp = self
            .http
            .get(&self.cfg.api_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if let Some(kind) = classify_status(status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(kind(format!(
                "flatfox returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                Error::SourceUnavailable(format!("flatfox body timed out: {e}"))
            } else {
                Error::SourceProtocol(format!("flatfox json error: {e}"))
            }
        })?;

        parse_page(&v)
    }
}

#[async_trait]
impl ListingSource for FlatfoxClient {
    fn name(&self) -> &'static str {
        "flatfox"
    }

    async fn fetch(&self, shape: &FilterShape) -> Result<Box<dyn ListingCursor>> {
        let mut cursor = FlatfoxCursor {
            client: self.clone(),
            shape: shape.clone(),
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        };
        // Fetch the first page eagerly so an unreachable source fails here.
        cursor.fill().await?;
        Ok(Box::new(cursor))
    }
}

/// Pages through one query lazily.
pub struct FlatfoxCursor {
    client: FlatfoxClient,
    shape: FilterShape,
    offset: usize,
    buffer: VecDeque<Listing>,
    exhausted: bool,
}

impl FlatfoxCursor {
    async fn fill(&mut self) -> Result<()> {
        let page = self.client.fetch_page(&self.shape, self.offset).await?;
        self.offset += page.raw_len;
        self.exhausted = page.is_last();
        self.buffer.extend(page.items);
        Ok(())
    }
}

#[async_trait]
impl ListingCursor for FlatfoxCursor {
    async fn next_listing(&mut self) -> Result<Option<Listing>> {
        loop {
            if let Some(listing) = self.buffer.pop_front() {
                return Ok(Some(listing));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill().await?;
        }
    }
}

#[derive(Debug)]
struct Page {
    items: Vec<Listing>,
    /// Items on the page before parsing, used to advance the offset.
    raw_len: usize,
    has_next: bool,
}

impl Page {
    /// The server may cap `limit` below the requested page size, so a short
    /// page only ends the query when there is no `next` link.
    fn is_last(&self) -> bool {
        !self.has_next || self.raw_len == 0
    }
}

fn classify_transport(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::SourceProtocol(format!("flatfox response error: {e}"))
    } else {
        // Timeouts, connect failures, resets.
        Error::SourceUnavailable(format!("flatfox request error: {e}"))
    }
}

/// Error constructor for a non-2xx status, `None` on success.
fn classify_status(status: StatusCode) -> Option<fn(String) -> Error> {
    if status.is_success() {
        return None;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Some(Error::SourceUnavailable);
    }
    Some(Error::SourceProtocol)
}

fn parse_page(v: &Value) -> Result<Page> {
    let results = v
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::SourceProtocol("flatfox response has no results array".into()))?;

    let items = results
        .iter()
        .filter_map(|item| {
            let parsed = parse_listing(item);
            if parsed.is_none() {
                tracing::warn!("skipping flatfox item without pk");
            }
            parsed
        })
        .collect();

    let has_next = !matches!(v.get("next"), None | Some(Value::Null));
    Ok(Page {
        items,
        raw_len: results.len(),
        has_next,
    })
}

fn parse_listing(item: &Value) -> Option<Listing> {
    let id = match item.get("pk")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return None,
    };

    let city = str_field(item, "city");
    let offer_kind = str_field(item, "offer_type").and_then(|s| s.parse::<OfferKind>().ok());
    let category =
        str_field(item, "object_category").and_then(|s| s.parse::<ObjectCategory>().ok());

    Some(Listing {
        id: PropertyId::new(id),
        offer_kind,
        category,
        rooms: num_field(item, "number_of_rooms"),
        price: num_field(item, "price_display"),
        surface: num_field(item, "livingspace"),
        version: str_field(item, "updated").or_else(|| str_field(item, "published")),
        title: str_field(item, "short_title").or_else(|| str_field(item, "description_title")),
        address: format_address(item),
        price_unit: str_field(item, "price_unit"),
        url: str_field(item, "url").map(|u| absolute_url(&u)),
        location: city,
    })
}

fn str_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers may arrive as JSON numbers or numeric strings ("3.5").
fn num_field(item: &Value, key: &str) -> Option<f64> {
    let n = match item.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn format_address(item: &Value) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(street) = str_field(item, "street") {
        match str_field(item, "street_number") {
            Some(no) => parts.push(format!("{street} {no}")),
            None => parts.push(street),
        }
    }
    match (str_field(item, "zipcode"), str_field(item, "city")) {
        (Some(zip), Some(city)) => parts.push(format!("{zip} {city}")),
        (None, Some(city)) => parts.push(city),
        _ => {}
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn absolute_url(url: &str) -> String {
    if url.starts_with('/') {
        format!("{FLATFOX_BASE}{url}")
    } else {
        url.to_string()
    }
}

/// Shapes carry a lowercased location; the API expects the place name as written.
fn display_city(location: &str) -> String {
    location
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
