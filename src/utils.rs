use rand::{distributions::Alphanumeric, thread_rng, Rng};
use reqwest::Url;
use std::{fs, path::PathBuf};

use crate::types::RunMode;

pub const UNKNOWN: &str = "unknown";
pub const DESCRIPTION_FILE: &str = "description.txt";
pub const PROFILE_PICTURE_FILE: &str = "profile_picture.jpg";
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MAX_FOLDER_NAME_CHARS: usize = 60;

lazy_static! {
    pub static ref DEFAULT_OUTPUT_DIR: String = {
        match std::env::var("VINTED_OUTPUT_DIR") {
            Ok(dir) if !dir.is_empty() => dir,
            _ => "listings".into(),
        }
    };
}

/// Strips characters that are invalid in folder names and collapses
/// whitespace. Long titles are cut so paths stay workable.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| {
            !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control()
        })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = cleaned.trim_matches('.').trim();
    cleaned
        .chars()
        .take(MAX_FOLDER_NAME_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Normalizes user input into a fully qualified marketplace url, or None if it
/// does not point at a listing, profile or catalog page on a vinted domain.
pub fn validate_url(url: &str) -> Option<String> {
    let mut url = url.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("https://{}", url);
    }
    let parsed = Url::parse(&url).ok()?;
    let host = parsed.host_str()?;
    if !host.contains("vinted.") {
        return None;
    }
    let path = parsed.path().to_lowercase();
    let valid = ["/items/", "/member/", "/catalog/", "/user/"]
        .iter()
        .any(|p| path.starts_with(p));
    if valid {
        Some(url)
    } else {
        None
    }
}

pub fn resolve_mode(url: &str) -> RunMode {
    match Url::parse(url) {
        Ok(u) if u.path().to_lowercase().starts_with("/items/") => RunMode::Item,
        _ => RunMode::Profile,
    }
}

/// The numeric id leading the `/items/<id>-<slug>` path segment. Slugs with no
/// leading digits are used whole.
pub fn listing_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let pos = segments.iter().position(|s| *s == "items")?;
    let slug = segments.get(pos + 1)?;
    let digits: String = slug.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        Some((*slug).to_string())
    } else {
        Some(digits)
    }
}

pub fn profile_handle_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let pos = segments
        .iter()
        .position(|s| *s == "member" || *s == "user")?;
    let handle = sanitize_filename(segments.get(pos + 1)?);
    if handle.is_empty() {
        None
    } else {
        Some(handle)
    }
}

pub fn strip_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut u) => {
            u.set_query(None);
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Resolves an href against the page it appeared on, dropping fragments.
pub fn absolutize(page_url: &str, href: &str) -> Option<String> {
    match Url::parse(href) {
        Ok(mut u) => {
            u.set_fragment(None);
            Some(u.to_string())
        }
        Err(_) => {
            let base = Url::parse(page_url).ok()?;
            let mut u = base.join(href).ok()?;
            u.set_fragment(None);
            Some(u.to_string())
        }
    }
}

/// Identifier shared by all resized variants of one photo. Vinted CDN urls
/// look like `…vinted.net/t/<bucket>/<size>/<file>.jpeg` where only the size
/// segment (`310x430`, `f800`) differs between thumbnail and full resolution.
pub fn canonical_image_id(url: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(p) => p,
        Err(_) => return url.to_string(),
    };
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    match segments.iter().position(|s| *s == "t") {
        Some(pos) => {
            let stable: Vec<&str> = segments[pos + 1..]
                .iter()
                .filter(|s| !is_size_segment(s))
                .copied()
                .collect();
            if stable.is_empty() {
                parsed.path().to_string()
            } else {
                stable.join("/")
            }
        }
        None => parsed.path().to_string(),
    }
}

fn is_size_segment(segment: &str) -> bool {
    if let Some((w, h)) = segment.split_once('x') {
        if !w.is_empty()
            && !h.is_empty()
            && w.chars().all(|c| c.is_ascii_digit())
            && h.chars().all(|c| c.is_ascii_digit())
        {
            return true;
        }
    }
    segment.len() > 1
        && segment.starts_with('f')
        && segment[1..].chars().all(|c| c.is_ascii_digit())
}

pub fn ext_for_url(url: &str) -> &'static str {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_lowercase(),
        Err(_) => url.to_lowercase(),
    };
    if path.ends_with(".png") {
        "png"
    } else if path.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

pub fn first_number(text: &str) -> Option<usize> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

pub fn get_random_string(len: i32) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect()
}

pub fn create_random_tmp_folder() -> anyhow::Result<PathBuf> {
    let rand_folder_name: String = get_random_string(11);

    let path = std::env::temp_dir().join(format!("vinted-archiver-{}", rand_folder_name));
    fs::create_dir(&path)?;
    Ok(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitizes_folder_names() {
        assert_eq!(sanitize_filename("Wool coat / navy*"), "Wool coat navy");
        assert_eq!(sanitize_filename("  spaced   out  "), "spaced out");
        assert_eq!(sanitize_filename("<>:\"/\\|?*"), "");
        let long = "a".repeat(200);
        assert_eq!(sanitize_filename(&long).chars().count(), 60);
    }

    #[test]
    fn validates_marketplace_urls() {
        assert_eq!(
            validate_url("www.vinted.com/items/123-coat").unwrap(),
            "https://www.vinted.com/items/123-coat"
        );
        assert!(validate_url("https://www.vinted.fr/member/999-maria").is_some());
        assert!(validate_url("https://example.com/items/123").is_none());
        assert!(validate_url("https://www.vinted.com/about").is_none());
    }

    #[test]
    fn resolves_run_mode_from_path() {
        assert_eq!(
            resolve_mode("https://www.vinted.com/items/123-coat"),
            RunMode::Item
        );
        assert_eq!(
            resolve_mode("https://www.vinted.com/member/999-maria"),
            RunMode::Profile
        );
    }

    #[test]
    fn derives_listing_ids() {
        assert_eq!(
            listing_id("https://www.vinted.com/items/123456-wool-coat").unwrap(),
            "123456"
        );
        assert_eq!(
            listing_id("https://www.vinted.com/items/wool-coat").unwrap(),
            "wool-coat"
        );
        assert!(listing_id("https://www.vinted.com/member/999").is_none());
    }

    #[test]
    fn derives_profile_handles() {
        assert_eq!(
            profile_handle_from_url("https://www.vinted.com/member/999-maria").unwrap(),
            "999-maria"
        );
        assert!(profile_handle_from_url("https://www.vinted.com/catalog").is_none());
    }

    #[test]
    fn strips_queries_and_fragments() {
        assert_eq!(
            strip_query("https://www.vinted.com/items/1-a?referrer=catalog#photos"),
            "https://www.vinted.com/items/1-a"
        );
    }

    #[test]
    fn absolutizes_relative_hrefs() {
        assert_eq!(
            absolutize("https://www.vinted.com/member/1", "/items/2-b").unwrap(),
            "https://www.vinted.com/items/2-b"
        );
        assert_eq!(
            absolutize("https://www.vinted.com/", "https://images1.vinted.net/t/a/b.jpeg#x")
                .unwrap(),
            "https://images1.vinted.net/t/a/b.jpeg"
        );
    }

    #[test]
    fn thumbnail_and_full_size_share_a_canonical_id() {
        let thumb = "https://images1.vinted.net/t/01_ab_cd/310x430/123_photo.jpeg?s=abc";
        let full = "https://images1.vinted.net/t/01_ab_cd/f800/123_photo.jpeg";
        assert_eq!(canonical_image_id(thumb), canonical_image_id(full));

        let other = "https://images1.vinted.net/t/01_ab_cd/f800/124_other.jpeg";
        assert_ne!(canonical_image_id(full), canonical_image_id(other));
    }

    #[test]
    fn guesses_extensions() {
        assert_eq!(ext_for_url("https://x.vinted.net/t/a/b.jpeg"), "jpg");
        assert_eq!(ext_for_url("https://x.vinted.net/t/a/b.PNG?s=1"), "png");
        assert_eq!(ext_for_url("https://x.vinted.net/t/a/b.webp"), "webp");
    }

    #[test]
    fn finds_the_first_number() {
        assert_eq!(first_number("42 items"), Some(42));
        assert_eq!(first_number("Closet (7)"), Some(7));
        assert_eq!(first_number("no digits"), None);
    }

    #[test]
    fn creates_a_random_folder() {
        let p = create_random_tmp_folder().unwrap();
        assert!(p.exists());
        fs::remove_dir(p).unwrap();
    }
}
