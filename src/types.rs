use std::path::PathBuf;

use thiserror::Error;

use crate::utils::{self, UNKNOWN};

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("page failed to render: {0}")]
    Render(String),
    #[error("not a valid listing page: {0}")]
    Extraction(String),
    #[error("seller profile not found: {0}")]
    ProfileNotFound(String),
    #[error("download of {url} failed after {attempts} attempt(s): {cause}")]
    Download {
        url: String,
        attempts: u32,
        cause: anyhow::Error,
    },
    #[error("invalid marketplace url: {0}")]
    InvalidUrl(String),
    #[error("file operation failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Item,
    Profile,
}

/// A discovered listing, keyed by the numeric id in its url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRef {
    pub url: String,
    pub id: String,
}

impl ListingRef {
    // the query string is stripped so the same item reached through different
    // catalog filters collapses to one reference
    pub fn from_url(url: &str) -> Option<ListingRef> {
        let url = utils::strip_query(url);
        let id = utils::listing_id(&url)?;
        Some(ListingRef { url, id })
    }
}

/// Fields extracted from one listing page. Fields that could not be located
/// hold the literal "unknown" rather than being omitted.
#[derive(Debug, Clone)]
pub struct ListingDetails {
    pub title: String,
    pub price: String,
    pub size: String,
    pub condition: String,
    pub color: String,
    pub description: String,
    // fully qualified, deduplicated, display order
    pub image_urls: Vec<String>,
}

impl Default for ListingDetails {
    fn default() -> Self {
        ListingDetails {
            title: UNKNOWN.into(),
            price: UNKNOWN.into(),
            size: UNKNOWN.into(),
            condition: UNKNOWN.into(),
            color: UNKNOWN.into(),
            description: UNKNOWN.into(),
            image_urls: vec![],
        }
    }
}

impl ListingDetails {
    pub fn has_content(&self) -> bool {
        !self.image_urls.is_empty()
            || [
                &self.title,
                &self.price,
                &self.size,
                &self.condition,
                &self.color,
                &self.description,
            ]
            .iter()
            .any(|f| f.as_str() != UNKNOWN)
    }
}

#[derive(Debug)]
pub struct SellerProfile {
    pub handle: String,
    pub listing_refs: Vec<ListingRef>,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub destination_path: PathBuf,
    pub source_url: String,
    pub expected_byte_length: Option<u64>,
}

#[derive(Debug)]
pub struct ListingFailure {
    pub listing: ListingRef,
    pub reason: String,
}

/// Outcome of one run. Append-only while the run is in flight, finalized when
/// the orchestrator returns it.
#[derive(Debug, Default)]
pub struct RunResult {
    pub succeeded: Vec<ListingRef>,
    pub failed: Vec<ListingFailure>,
}

impl RunResult {
    pub fn record_success(&mut self, listing: ListingRef) {
        self.succeeded.push(listing);
    }

    pub fn record_failure(&mut self, listing: ListingRef, reason: impl Into<String>) {
        self.failed.push(ListingFailure {
            listing,
            reason: reason.into(),
        });
    }

    /// Folds one listing's outcome into the run. Ok carries the reasons for
    /// any assets that could not be fetched: the listing still counts as
    /// processed and each lost asset is reported. Err means the whole listing
    /// failed; it is recorded and the run moves on to the next one.
    pub fn record_outcome(
        &mut self,
        listing: &ListingRef,
        outcome: Result<Vec<String>, ScrapeError>,
    ) {
        match outcome {
            Ok(asset_failures) => {
                self.record_success(listing.clone());
                for reason in asset_failures {
                    self.record_failure(listing.clone(), reason);
                }
            }
            Err(e) => self.record_failure(listing.clone(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn listing_ref_from_url() {
        let r =
            ListingRef::from_url("https://www.vinted.com/items/123456-wool-coat?referrer=catalog")
                .unwrap();
        assert_eq!(r.id, "123456");
        assert_eq!(r.url, "https://www.vinted.com/items/123456-wool-coat");
    }

    #[test]
    fn listing_ref_rejects_non_listing_urls() {
        assert!(ListingRef::from_url("https://www.vinted.com/member/999-maria").is_none());
    }

    #[test]
    fn empty_details_have_no_content() {
        let details = ListingDetails::default();
        assert!(!details.has_content());

        let with_price = ListingDetails {
            price: "12.00".into(),
            ..Default::default()
        };
        assert!(with_price.has_content());

        let with_image = ListingDetails {
            image_urls: vec!["https://images1.vinted.net/t/a/f800/1.jpeg".into()],
            ..Default::default()
        };
        assert!(with_image.has_content());
    }

    #[test]
    fn malformed_listing_is_recorded_and_the_run_continues() {
        let listings: Vec<ListingRef> = (1..=3)
            .map(|n| {
                ListingRef::from_url(&format!("https://www.vinted.com/items/{}-thing", n)).unwrap()
            })
            .collect();
        let outcomes = vec![
            Ok(vec![]),
            Err(ScrapeError::Extraction(
                "listing unavailable: This item is no longer available".into(),
            )),
            Ok(vec![]),
        ];

        let mut result = RunResult::default();
        for (listing, outcome) in listings.iter().zip(outcomes) {
            result.record_outcome(listing, outcome);
        }

        assert_eq!(result.succeeded.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].listing.id, "2");
        assert!(result.failed[0].reason.contains("not a valid listing page"));
    }

    #[test]
    fn lost_asset_keeps_the_listing_partially_successful() {
        let listing = ListingRef::from_url("https://www.vinted.com/items/9-coat").unwrap();
        let mut result = RunResult::default();
        result.record_outcome(
            &listing,
            Ok(vec!["4.jpg: download failed after 3 attempt(s)".into()]),
        );

        // the listing is processed, the lost asset is reported, not dropped
        assert_eq!(result.succeeded, vec![listing.clone()]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].listing.id, listing.id);
        assert!(result.failed[0].reason.starts_with("4.jpg"));
    }

    #[test]
    fn run_result_is_append_only() {
        let mut result = RunResult::default();
        let listing = ListingRef::from_url("https://www.vinted.com/items/1-a").unwrap();
        result.record_success(listing.clone());
        result.record_failure(listing, "4.jpg: download failed");
        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].reason, "4.jpg: download failed");
    }
}
