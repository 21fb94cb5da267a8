use itertools::Itertools;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    types::{ListingDetails, ScrapeError},
    utils::{self, UNKNOWN},
};

/// Selector-to-field mapping table. Site markup changes are absorbed here
/// (or in a json override passed on the command line) instead of in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSelectors {
    // marker element whose appearance means the dynamic content has settled
    pub page_ready: String,
    pub title: String,
    pub price: String,
    pub size: String,
    pub condition: String,
    pub color: String,
    pub description: String,
    pub removed_marker: String,
    pub removed_phrases: Vec<String>,
    pub profile_missing_phrases: Vec<String>,
    // tried in order, first selector that yields anything wins
    pub images: Vec<String>,
    pub image_url_filters: Vec<String>,
    pub listing_link: String,
    pub profile_handle: String,
    pub profile_picture: String,
    pub closet_header: String,
}

impl Default for FieldSelectors {
    fn default() -> Self {
        FieldSelectors {
            page_ready: "#content".into(),
            title: "h1.web_ui__Text__text.web_ui__Text__title.web_ui__Text__left".into(),
            price: "div[data-testid='item-price'] p.web_ui__Text__text".into(),
            size: "div[itemprop='size'] span".into(),
            condition: "div[itemprop='status'] span".into(),
            color: "div[itemprop='color'] span".into(),
            description: "div[itemprop='description'] span span".into(),
            removed_marker: ".web_ui__Alert__content".into(),
            removed_phrases: vec![
                "no longer available".into(),
                "does not exist".into(),
                "has been deleted".into(),
            ],
            profile_missing_phrases: vec![
                "not exist".into(),
                "deactivated".into(),
                "not found".into(),
            ],
            images: vec![
                "figure.item-description img.web_ui__Image__content".into(),
                "figure.item-photo img.web_ui__Image__content".into(),
                "li.web_ui__Carousel__content img.web_ui__Image__content".into(),
                "img.web_ui__Image__content:not([role='img'])".into(),
            ],
            image_url_filters: vec!["vinted.net".into(), "/t/".into()],
            listing_link: "a[href*='/items/']".into(),
            profile_handle: "[data-testid='profile-username']".into(),
            profile_picture: "div.web_ui__Image__circle img.web_ui__Image__content".into(),
            closet_header: "h2.web_ui__Text__text.web_ui__Text__title.web_ui__Text__left".into(),
        }
    }
}

/// Pulls the structured fields and image urls out of a rendered listing page.
///
/// A field whose selector matches nothing becomes "unknown"; the extraction
/// only fails when the page is not a listing at all (removed-listing alert,
/// or nothing extractable whatsoever).
pub fn extract(
    page_url: &str,
    html: &str,
    selectors: &FieldSelectors,
) -> Result<ListingDetails, ScrapeError> {
    let doc = Html::parse_document(html);

    if let Some(alert) = select_text(&doc, &selectors.removed_marker) {
        let alert_lc = alert.to_lowercase();
        if selectors
            .removed_phrases
            .iter()
            .any(|p| alert_lc.contains(p.as_str()))
        {
            return Err(ScrapeError::Extraction(format!(
                "listing unavailable: {}",
                alert
            )));
        }
    }

    let details = ListingDetails {
        title: field(&doc, &selectors.title),
        price: field(&doc, &selectors.price),
        size: field(&doc, &selectors.size),
        condition: field(&doc, &selectors.condition),
        color: field(&doc, &selectors.color),
        description: field(&doc, &selectors.description),
        image_urls: collect_image_urls(page_url, &doc, selectors),
    };

    if !details.has_content() {
        return Err(ScrapeError::Extraction(
            "no listing content found on page".into(),
        ));
    }
    Ok(details)
}

fn field(doc: &Html, selector: &str) -> String {
    select_text(doc, selector).unwrap_or_else(|| UNKNOWN.into())
}

pub(crate) fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let text: String = doc.select(&sel).next()?.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub(crate) fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()?
        .value()
        .attr(attr)
        .map(String::from)
}

// deduplicated by canonical photo id, first-seen (display) order preserved
fn collect_image_urls(page_url: &str, doc: &Html, selectors: &FieldSelectors) -> Vec<String> {
    for selector in &selectors.images {
        let parsed = match Selector::parse(selector) {
            Ok(s) => s,
            Err(_) => {
                warn!("invalid image selector '{}', skipping", selector);
                continue;
            }
        };
        let urls: Vec<String> = doc
            .select(&parsed)
            .filter_map(|img| img.value().attr("src"))
            .filter_map(|src| utils::absolutize(page_url, src))
            .filter(|url| {
                selectors
                    .image_url_filters
                    .iter()
                    .all(|f| url.contains(f.as_str()))
            })
            .unique_by(|url| utils::canonical_image_id(url))
            .collect();
        if !urls.is_empty() {
            debug!("selector '{}' yielded {} image(s)", selector, urls.len());
            return urls;
        }
    }
    vec![]
}
