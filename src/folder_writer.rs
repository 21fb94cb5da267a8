use std::{collections::HashSet, fs, path::PathBuf};

use crate::{
    types::{DownloadTarget, ListingDetails, ListingRef, ScrapeError},
    utils::{self, DESCRIPTION_FILE, UNKNOWN},
};

/// Lays out one folder per listing under a run root and plans the asset
/// downloads. Folder names are unique within the run; everything else is
/// idempotent so an interrupted run can be resumed by re-invocation.
pub struct FolderWriter {
    root: PathBuf,
    used_names: HashSet<String>,
}

#[derive(Debug)]
pub struct PlannedFolder {
    pub dir: PathBuf,
    pub targets: Vec<DownloadTarget>,
}

impl FolderWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FolderWriter {
            root: root.into(),
            used_names: HashSet::new(),
        }
    }

    /// Creates the listing folder, writes `description.txt` and returns one
    /// numbered `DownloadTarget` per image url, in display order.
    pub fn plan(
        &mut self,
        listing: &ListingRef,
        details: &ListingDetails,
    ) -> Result<PlannedFolder, ScrapeError> {
        let name = self.reserve_name(listing, details);
        let dir = self.root.join(&name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(DESCRIPTION_FILE), format_description(details))?;
        debug!("wrote {:?}", dir.join(DESCRIPTION_FILE));

        let targets = details
            .image_urls
            .iter()
            .enumerate()
            .map(|(index, url)| DownloadTarget {
                destination_path: dir.join(format!("{}.{}", index + 1, utils::ext_for_url(url))),
                source_url: url.clone(),
                expected_byte_length: None,
            })
            .collect();

        Ok(PlannedFolder { dir, targets })
    }

    fn reserve_name(&mut self, listing: &ListingRef, details: &ListingDetails) -> String {
        let title = utils::sanitize_filename(&details.title);
        let base = if title.is_empty() || details.title == UNKNOWN {
            listing.id.clone()
        } else {
            format!("{}-{}", title, listing.id)
        };
        let mut name = base.clone();
        let mut suffix = 2;
        while !self.used_names.insert(name.clone()) {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        name
    }
}

pub fn format_description(details: &ListingDetails) -> String {
    format!(
        "Title: {}\nPrice: {}\nSize: {}\nCondition: {}\nColor: {}\nDescription: {}\n",
        details.title,
        details.price,
        details.size,
        details.condition,
        details.color,
        details.description
    )
}
