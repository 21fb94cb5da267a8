use std::collections::HashSet;

use scraper::{Html, Selector};

use crate::{
    extractor::{select_attr, select_text, FieldSelectors},
    types::{ListingRef, ScrapeError, SellerProfile},
    utils,
};

/// Something that can be scrolled for more results and snapshotted. The live
/// implementation is `RenderedPage`; tests feed synthetic pages.
pub trait ListingSource {
    /// Trigger loading of the next batch of results and wait for the page to
    /// settle.
    fn load_more(&self) -> Result<(), ScrapeError>;
    fn html(&self) -> Result<String, ScrapeError>;
    fn url(&self) -> String;
}

pub struct Paginator {
    max_rounds: usize,
}

impl Paginator {
    pub fn new(max_rounds: usize) -> Self {
        Paginator {
            max_rounds: max_rounds.max(1),
        }
    }

    /// Drives the profile page to a fixed point: scroll, collect visible
    /// listing links, union by id, stop once a full round adds nothing new or
    /// the round cap is hit. A closet with zero listings is a valid empty
    /// result.
    pub fn discover<S: ListingSource>(
        &self,
        source: &S,
        selectors: &FieldSelectors,
    ) -> Result<SellerProfile, ScrapeError> {
        let page_url = source.url();
        let first = source.html()?;

        let (handle, profile_picture_url, expected) =
            parse_profile_info(&page_url, &first, selectors);

        let handle = match handle {
            Some(h) => h,
            None => {
                if let Some(alert) = missing_profile_alert(&first, selectors) {
                    return Err(ScrapeError::ProfileNotFound(alert));
                }
                // page rendered but the username selector drifted; fall back
                // to the handle embedded in the url
                utils::profile_handle_from_url(&page_url).ok_or_else(|| {
                    ScrapeError::ProfileNotFound(format!(
                        "no profile information on {}",
                        page_url
                    ))
                })?
            }
        };

        if let Some(n) = expected {
            debug!("closet header advertises {} item(s)", n);
        }

        let mut refs: Vec<ListingRef> = vec![];
        let mut seen: HashSet<String> = HashSet::new();

        for round in 1..=self.max_rounds {
            source.load_more()?;
            let html = source.html()?;
            let added = collect_listing_refs(
                &page_url,
                &html,
                &selectors.listing_link,
                &mut refs,
                &mut seen,
            );
            debug!(
                "pagination round {}: {} new link(s), {} total",
                round,
                added,
                refs.len()
            );
            if added == 0 {
                break;
            }
            if let Some(n) = expected {
                if refs.len() >= n {
                    debug!("all {} advertised items loaded", n);
                    break;
                }
            }
        }

        info!("discovered {} listing(s) for {}", refs.len(), handle);

        Ok(SellerProfile {
            handle,
            listing_refs: refs,
            profile_picture_url,
        })
    }
}

fn collect_listing_refs(
    page_url: &str,
    html: &str,
    link_selector: &str,
    refs: &mut Vec<ListingRef>,
    seen: &mut HashSet<String>,
) -> usize {
    let doc = Html::parse_document(html);
    let sel = match Selector::parse(link_selector) {
        Ok(s) => s,
        Err(_) => {
            warn!("invalid listing link selector '{}'", link_selector);
            return 0;
        }
    };
    let mut added = 0;
    for anchor in doc.select(&sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(absolute) = utils::absolutize(page_url, href) else {
            continue;
        };
        let Some(listing) = ListingRef::from_url(&absolute) else {
            continue;
        };
        if seen.insert(listing.id.clone()) {
            refs.push(listing);
            added += 1;
        }
    }
    added
}

fn parse_profile_info(
    page_url: &str,
    html: &str,
    selectors: &FieldSelectors,
) -> (Option<String>, Option<String>, Option<usize>) {
    let doc = Html::parse_document(html);
    let handle = select_text(&doc, &selectors.profile_handle)
        .map(|h| utils::sanitize_filename(&h))
        .filter(|h| !h.is_empty());
    let picture = select_attr(&doc, &selectors.profile_picture, "src")
        .and_then(|src| utils::absolutize(page_url, &src));
    let expected = select_text(&doc, &selectors.closet_header).and_then(|t| utils::first_number(&t));
    (handle, picture, expected)
}

fn missing_profile_alert(html: &str, selectors: &FieldSelectors) -> Option<String> {
    let doc = Html::parse_document(html);
    let alert = select_text(&doc, &selectors.removed_marker)?;
    let alert_lc = alert.to_lowercase();
    if selectors
        .profile_missing_phrases
        .iter()
        .any(|p| alert_lc.contains(p.as_str()))
    {
        Some(alert)
    } else {
        None
    }
}
