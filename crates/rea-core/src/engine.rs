//! One fetch → match → dedup → deliver pass over all active alerts.
//!
//! The ledger is the only dedup authority: a pair is delivered only after
//! `record_notified` reported a fresh insert, and a record is never rolled
//! back when delivery fails (at-most-once).

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    sync::{watch, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::{Alert, AlertId, FilterShape, Listing, OwnerId},
    matching::matches,
    ports::{take_listings, AlertStore, Delivery, ListingSource, NotificationLedger},
    Error, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Matching,
    Delivering,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Matching => "matching",
            CyclePhase::Delivering => "delivering",
        };
        f.write_str(s)
    }
}

/// Counters for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub alerts: usize,
    pub shapes: usize,
    pub shapes_failed: usize,
    pub candidates: usize,
    /// Distinct (owner, property) pairs that matched at least one alert.
    pub matched_pairs: usize,
    pub fresh: usize,
    pub already_notified: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    pub ledger_failures: usize,
    /// Shutdown was requested before all work was started.
    pub cancelled: bool,
}

impl CycleReport {
    fn absorb(&mut self, o: OwnerOutcome) {
        self.fresh += o.fresh;
        self.already_notified += o.already_notified;
        self.delivered += o.delivered;
        self.delivery_failures += o.delivery_failures;
        self.ledger_failures += o.ledger_failures;
        self.cancelled |= o.cancelled;
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} alerts, {} shapes ({} failed), {} candidates, {} matches, {} new, {} delivered",
            self.alerts,
            self.shapes,
            self.shapes_failed,
            self.candidates,
            self.matched_pairs,
            self.fresh,
            self.delivered
        )?;
        if self.delivery_failures > 0 || self.ledger_failures > 0 {
            write!(
                f,
                ", {} delivery failures, {} ledger failures",
                self.delivery_failures, self.ledger_failures
            )?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub fetch_timeout: Duration,
    pub max_listings_per_shape: usize,
    pub max_concurrent_fetches: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            max_listings_per_shape: 50,
            max_concurrent_fetches: 4,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            fetch_timeout: cfg.fetch_timeout,
            max_listings_per_shape: cfg.max_listings_per_shape,
            max_concurrent_fetches: cfg.max_concurrent_fetches,
        }
    }
}

struct Pair {
    owner: OwnerId,
    alert_id: AlertId,
    listing: Arc<Listing>,
}

#[derive(Default)]
struct OwnerOutcome {
    fresh: usize,
    already_notified: usize,
    delivered: usize,
    delivery_failures: usize,
    ledger_failures: usize,
    cancelled: bool,
}

pub struct AlertEngine {
    alerts: Arc<dyn AlertStore>,
    ledger: Arc<dyn NotificationLedger>,
    source: Arc<dyn ListingSource>,
    delivery: Arc<dyn Delivery>,
    settings: EngineSettings,
    phase: watch::Sender<CyclePhase>,
}

/// Puts the engine back to `Idle` however the cycle ends.
struct IdleOnDrop<'a>(&'a watch::Sender<CyclePhase>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(CyclePhase::Idle);
    }
}

impl AlertEngine {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        ledger: Arc<dyn NotificationLedger>,
        source: Arc<dyn ListingSource>,
        delivery: Arc<dyn Delivery>,
        settings: EngineSettings,
    ) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            alerts,
            ledger,
            source,
            delivery,
            settings,
            phase,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    /// Run one cycle.
    ///
    /// Only a failure to load the active alerts is returned as an error;
    /// source, ledger and delivery failures are isolated and counted.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let started = Instant::now();
        let _idle = IdleOnDrop(&self.phase);
        let mut report = CycleReport::default();

        self.phase.send_replace(CyclePhase::Fetching);
        let alerts = self.alerts.list_active().await?;
        report.alerts = alerts.len();

        let groups = group_by_shape(alerts);
        report.shapes = groups.len();

        let fetched = self.fetch_all(&groups, cancel).await;
        if fetched.len() < groups.len() {
            report.cancelled = true;
        }

        self.phase.send_replace(CyclePhase::Matching);
        let mut candidates = BTreeMap::new();
        for (shape, res) in fetched {
            match res {
                Ok(listings) => {
                    report.candidates += listings.len();
                    candidates.insert(shape, listings);
                }
                Err(e) => {
                    report.shapes_failed += 1;
                    log_fetch_failure(&shape, &e);
                }
            }
        }
        let pairs = match_pairs(&groups, candidates);
        report.matched_pairs = pairs.len();

        self.phase.send_replace(CyclePhase::Delivering);
        let mut owners = JoinSet::new();
        for (owner, owner_pairs) in by_owner(pairs) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let ledger = self.ledger.clone();
            let delivery = self.delivery.clone();
            let cancel = cancel.clone();
            owners.spawn(async move {
                notify_owner(ledger, delivery, owner, owner_pairs, cancel).await
            });
        }
        while let Some(joined) = owners.join_next().await {
            match joined {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => tracing::error!("delivery task failed: {e}"),
            }
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle finished: {report}"
        );
        Ok(report)
    }

    /// Fetch every shape once, in parallel up to `max_concurrent_fetches`.
    ///
    /// Shapes not started because of shutdown are absent from the result.
    async fn fetch_all(
        &self,
        groups: &BTreeMap<FilterShape, Vec<Alert>>,
        cancel: &CancellationToken,
    ) -> BTreeMap<FilterShape, Result<Vec<Listing>>> {
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_fetches.max(1)));
        let mut tasks = JoinSet::new();

        for shape in groups.keys().cloned() {
            let source = self.source.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let timeout = self.settings.fetch_timeout;
            let max = self.settings.max_listings_per_shape;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (shape, None);
                };
                if cancel.is_cancelled() {
                    return (shape, None);
                }
                let res = fetch_shape(source.as_ref(), &shape, timeout, max).await;
                (shape, Some(res))
            });
        }

        let mut out = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((shape, Some(res))) => {
                    out.insert(shape, res);
                }
                Ok((shape, None)) => {
                    tracing::info!(shape = %shape, "shutdown requested, fetch not started");
                }
                Err(e) => tracing::error!("fetch task failed: {e}"),
            }
        }
        out
    }
}

async fn fetch_shape(
    source: &dyn ListingSource,
    shape: &FilterShape,
    timeout: Duration,
    max: usize,
) -> Result<Vec<Listing>> {
    let fetch = async {
        let mut cursor = source.fetch(shape).await?;
        take_listings(cursor.as_mut(), max).await
    };

    match tokio::time::timeout(timeout, fetch).await {
        Ok(res) => {
            if let Ok(listings) = &res {
                tracing::debug!(shape = %shape, count = listings.len(), "fetched candidates");
            }
            res
        }
        Err(_) => Err(Error::SourceUnavailable(format!(
            "{} fetch timed out after {timeout:?}",
            source.name()
        ))),
    }
}

fn log_fetch_failure(shape: &FilterShape, e: &Error) {
    match e {
        Error::SourceProtocol(_) => {
            tracing::error!(shape = %shape, "skipping shape, malformed source data: {e}")
        }
        _ => tracing::warn!(shape = %shape, "skipping shape: {e}"),
    }
}

fn group_by_shape(alerts: Vec<Alert>) -> BTreeMap<FilterShape, Vec<Alert>> {
    let mut groups: BTreeMap<FilterShape, Vec<Alert>> = BTreeMap::new();
    for alert in alerts {
        groups.entry(alert.shape()).or_default().push(alert);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|a| a.id);
    }
    groups
}

/// Distinct matching (owner, property) pairs, in source order per shape.
fn match_pairs(
    groups: &BTreeMap<FilterShape, Vec<Alert>>,
    candidates: BTreeMap<FilterShape, Vec<Listing>>,
) -> Vec<Pair> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();

    for (shape, listings) in candidates {
        let Some(alerts) = groups.get(&shape) else {
            continue;
        };
        for listing in listings {
            let listing = Arc::new(listing);
            for alert in alerts {
                if !matches(alert, &listing) {
                    continue;
                }
                if seen.insert((alert.owner, listing.id.clone())) {
                    pairs.push(Pair {
                        owner: alert.owner,
                        alert_id: alert.id,
                        listing: listing.clone(),
                    });
                }
            }
        }
    }
    pairs
}

fn by_owner(pairs: Vec<Pair>) -> BTreeMap<OwnerId, Vec<Pair>> {
    let mut out: BTreeMap<OwnerId, Vec<Pair>> = BTreeMap::new();
    for pair in pairs {
        out.entry(pair.owner).or_default().push(pair);
    }
    out
}

/// Record-then-deliver for one owner's pairs, in order.
async fn notify_owner(
    ledger: Arc<dyn NotificationLedger>,
    delivery: Arc<dyn Delivery>,
    owner: OwnerId,
    pairs: Vec<Pair>,
    cancel: CancellationToken,
) -> OwnerOutcome {
    let mut out = OwnerOutcome::default();

    for pair in pairs {
        if cancel.is_cancelled() {
            out.cancelled = true;
            break;
        }

        let property = &pair.listing.id;
        match ledger.record_notified(owner, property).await {
            Ok(true) => {
                out.fresh += 1;
                match delivery.deliver(owner, &pair.listing).await {
                    Ok(()) => {
                        out.delivered += 1;
                        tracing::debug!(
                            owner = %owner,
                            property = %property,
                            alert_id = %pair.alert_id,
                            "notification delivered"
                        );
                    }
                    Err(e) => {
                        out.delivery_failures += 1;
                        tracing::warn!(
                            owner = %owner,
                            property = %property,
                            "delivery failed, not retried: {e}"
                        );
                    }
                }
            }
            Ok(false) => {
                out.already_notified += 1;
                tracing::debug!(owner = %owner, property = %property, "already notified");
            }
            Err(e) => {
                out.ledger_failures += 1;
                tracing::error!(owner = %owner, property = %property, "ledger write failed: {e}");
            }
        }
    }

    out
}
