use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{Alert, AlertCriteria, AlertId, FilterShape, Listing, OwnerId, PropertyId},
    Result,
};

/// Hexagonal port for the external listing source.
///
/// `fetch` re-queries the source on every call; the returned cursor hides
/// the source's pagination. No caching, no deduplication.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, shape: &FilterShape) -> Result<Box<dyn ListingCursor>>;
}

/// Lazy, finite sequence of listings for one `fetch` call.
#[async_trait]
pub trait ListingCursor: Send {
    /// Next listing, `Ok(None)` once exhausted.
    async fn next_listing(&mut self) -> Result<Option<Listing>>;
}

/// Pull at most `max` listings from a cursor.
pub async fn take_listings(cursor: &mut dyn ListingCursor, max: usize) -> Result<Vec<Listing>> {
    let mut out = Vec::new();
    while out.len() < max {
        match cursor.next_listing().await? {
            Some(listing) => out.push(listing),
            None => break,
        }
    }
    Ok(out)
}

/// Cursor over an already materialized page.
#[derive(Debug, Default)]
pub struct VecCursor {
    items: VecDeque<Listing>,
}

impl VecCursor {
    pub fn new(items: impl IntoIterator<Item = Listing>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ListingCursor for VecCursor {
    async fn next_listing(&mut self) -> Result<Option<Listing>> {
        Ok(self.items.pop_front())
    }
}

/// Durable repository of alert definitions.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// All active alerts at call time, ordered by id.
    async fn list_active(&self) -> Result<Vec<Alert>>;

    /// All alerts (active or not) of one owner, ordered by id.
    async fn get(&self, owner: OwnerId) -> Result<Vec<Alert>>;

    async fn create(&self, owner: OwnerId, criteria: AlertCriteria) -> Result<Alert>;

    async fn update(&self, owner: OwnerId, id: AlertId, criteria: AlertCriteria) -> Result<Alert>;

    async fn deactivate(&self, owner: OwnerId, id: AlertId) -> Result<Alert>;

    async fn activate(&self, owner: OwnerId, id: AlertId) -> Result<Alert>;
}

/// Append-only record of (owner, property) pairs already notified.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn has_notified(&self, owner: OwnerId, property: &PropertyId) -> Result<bool>;

    /// Insert-if-absent. `Ok(true)` when this call wrote the record,
    /// `Ok(false)` when the pair was already present.
    async fn record_notified(&self, owner: OwnerId, property: &PropertyId) -> Result<bool>;

    async fn count_for(&self, owner: OwnerId) -> Result<usize>;
}

/// Outbound delivery of one matched listing to its owner.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, owner: OwnerId, listing: &Listing) -> Result<()>;
}

/// Wall clock used for persisted timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
