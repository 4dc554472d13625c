//! Fakes shared by the engine and scheduler tests.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{
        Alert, AlertCriteria, AlertId, ChatId, FilterShape, Listing, MessageId, MessageRef,
        OfferKind, OwnerId, PropertyId,
    },
    messaging::port::{MessagingCapabilities, MessagingPort},
    ports::{
        AlertStore, Clock, Delivery, ListingCursor, ListingSource, NotificationLedger, VecCursor,
    },
    store::JsonLedger,
    Error, Result,
};

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Default for FixedClock {
    fn default() -> Self {
        Self(DateTime::<Utc>::from_timestamp(1_767_225_600, 0).unwrap())
    }
}

impl FixedClock {
    pub fn arc() -> Arc<dyn Clock> {
        Arc::new(Self::default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn temp_dir(tag: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let n = SEQ.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("rea-{tag}-{}-{n}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn rent_listing(id: &str, city: &str, price: f64, rooms: f64) -> Listing {
    Listing {
        location: Some(city.to_string()),
        offer_kind: Some(OfferKind::Rent),
        price: Some(price),
        rooms: Some(rooms),
        surface: Some(80.0),
        ..Listing::new(id)
    }
}

pub fn criteria(city: &str, kind: OfferKind) -> AlertCriteria {
    AlertCriteria::new(city, kind)
}

enum Behavior {
    Listings(Vec<Listing>),
    Fail(fn(String) -> Error),
}

/// Scripted listing source. Unknown shapes return an empty page.
#[derive(Default)]
pub struct FakeSource {
    behaviors: Mutex<HashMap<FilterShape, Behavior>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn with_listings(&self, shape: FilterShape, listings: Vec<Listing>) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(shape, Behavior::Listings(listings));
    }

    pub fn failing(&self, shape: FilterShape, err: fn(String) -> Error) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(shape, Behavior::Fail(err));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, shape: &FilterShape) -> Result<Box<dyn ListingCursor>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let out = match self.behaviors.lock().unwrap().get(shape) {
            Some(Behavior::Listings(items)) => {
                Ok(Box::new(VecCursor::new(items.clone())) as Box<dyn ListingCursor>)
            }
            Some(Behavior::Fail(make)) => Err(make(format!("scripted failure for {shape}"))),
            None => Ok(Box::new(VecCursor::default()) as Box<dyn ListingCursor>),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

/// Delivery that records every call; owners in `failing` get an error.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(OwnerId, String)>>,
    failing: Mutex<Vec<OwnerId>>,
    cancel_on_deliver: Mutex<Option<CancellationToken>>,
}

impl RecordingDelivery {
    pub fn fail_for(&self, owner: OwnerId) {
        self.failing.lock().unwrap().push(owner);
    }

    /// Request shutdown from inside the first delivery.
    pub fn cancel_on_deliver(&self, token: CancellationToken) {
        *self.cancel_on_deliver.lock().unwrap() = Some(token);
    }

    pub fn sent(&self) -> Vec<(OwnerId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, owner: OwnerId, listing: &Listing) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((owner, listing.id.as_str().to_string()));
        if let Some(token) = self.cancel_on_deliver.lock().unwrap().take() {
            token.cancel();
        }
        if self.failing.lock().unwrap().contains(&owner) {
            return Err(Error::Delivery("scripted delivery failure".to_string()));
        }
        Ok(())
    }
}

/// In-memory ledger whose writes fail for chosen properties.
pub struct FlakyLedger {
    inner: JsonLedger,
    failing: Mutex<Vec<PropertyId>>,
}

impl FlakyLedger {
    pub fn new(failing: &[&str]) -> Self {
        Self {
            inner: JsonLedger::in_memory(FixedClock::arc()),
            failing: Mutex::new(failing.iter().map(|p| PropertyId::new(*p)).collect()),
        }
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationLedger for FlakyLedger {
    async fn has_notified(&self, owner: OwnerId, property: &PropertyId) -> Result<bool> {
        self.inner.has_notified(owner, property).await
    }

    async fn record_notified(&self, owner: OwnerId, property: &PropertyId) -> Result<bool> {
        if self.failing.lock().unwrap().contains(property) {
            return Err(Error::StoreUnavailable(format!("cannot record {property}")));
        }
        self.inner.record_notified(owner, property).await
    }

    async fn count_for(&self, owner: OwnerId) -> Result<usize> {
        self.inner.count_for(owner).await
    }
}

/// Messenger that keeps every sent message in memory.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(ChatId, String)>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingMessenger {
    pub fn fail_with(&self, reason: &str) {
        *self.fail_with.lock().unwrap() = Some(reason.to_string());
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(Error::Delivery(reason));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id, html.to_string()));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sent.len() as i32),
        })
    }
}

/// Alert store that is always unreachable.
pub struct DownAlertStore;

#[async_trait]
impl AlertStore for DownAlertStore {
    async fn list_active(&self) -> Result<Vec<Alert>> {
        Err(Error::StoreUnavailable("alert store is down".to_string()))
    }

    async fn get(&self, _owner: OwnerId) -> Result<Vec<Alert>> {
        Err(Error::StoreUnavailable("alert store is down".to_string()))
    }

    async fn create(&self, _owner: OwnerId, _criteria: AlertCriteria) -> Result<Alert> {
        Err(Error::StoreUnavailable("alert store is down".to_string()))
    }

    async fn update(&self, _o: OwnerId, _id: AlertId, _c: AlertCriteria) -> Result<Alert> {
        Err(Error::StoreUnavailable("alert store is down".to_string()))
    }

    async fn deactivate(&self, _owner: OwnerId, _id: AlertId) -> Result<Alert> {
        Err(Error::StoreUnavailable("alert store is down".to_string()))
    }

    async fn activate(&self, _owner: OwnerId, _id: AlertId) -> Result<Alert> {
        Err(Error::StoreUnavailable("alert store is down".to_string()))
    }
}
