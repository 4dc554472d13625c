//! On-demand search: one pass over the source for a single set of criteria.
//!
//! Uses the same cursor and matching rules as the polling cycle but never
//! reads or writes the notification ledger.

use std::time::Duration;

use crate::{
    domain::{AlertCriteria, Listing},
    matching::criteria_match,
    ports::ListingSource,
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct SearchLimits {
    /// Listings pulled from the source before giving up.
    pub scan: usize,
    /// Matches returned to the caller.
    pub results: usize,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
pub struct SearchResults {
    pub listings: Vec<Listing>,
    pub scanned: usize,
    /// More matches exist within the scanned listings than were returned.
    pub truncated: bool,
}

pub async fn search(
    source: &dyn ListingSource,
    criteria: &AlertCriteria,
    limits: &SearchLimits,
) -> Result<SearchResults> {
    let shape = criteria.shape();
    let run = async {
        let mut cursor = source.fetch(&shape).await?;
        let mut out = SearchResults::default();
        while out.scanned < limits.scan {
            let Some(listing) = cursor.next_listing().await? else {
                break;
            };
            out.scanned += 1;
            if !criteria_match(criteria, &listing) {
                continue;
            }
            if out.listings.len() == limits.results {
                out.truncated = true;
                break;
            }
            out.listings.push(listing);
        }
        Ok::<_, Error>(out)
    };

    let out = tokio::time::timeout(limits.timeout, run)
        .await
        .map_err(|_| {
            Error::SourceUnavailable(format!(
                "{} search timed out after {:?}",
                source.name(),
                limits.timeout
            ))
        })??;

    tracing::info!(
        shape = %shape,
        scanned = out.scanned,
        found = out.listings.len(),
        "search finished"
    );
    Ok(out)
}
