use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use signal_hook::consts::{SIGINT, SIGTERM};
use tokio::task;

use crate::{
    browser_controller::BrowserController,
    downloader::{Downloader, RetryPolicy},
    extractor::{self, FieldSelectors},
    folder_writer::FolderWriter,
    paginator::Paginator,
    types::{DownloadTarget, ListingRef, RunMode, RunResult, ScrapeError, SellerProfile},
    utils::{self, PROFILE_PICTURE_FILE},
};

/// Drives a whole run: resolves the mode from the url, discovers listings in
/// profile mode, then walks each listing through extraction, folder writing
/// and asset download. Listing-level failures are recorded and never abort
/// the run; only session establishment and profile resolution are fatal.
pub struct Runner {
    browser: BrowserController,
    downloader: Downloader,
    options: RunnerOptions,
    should_terminate: Arc<AtomicBool>,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // root directory listing folders are written under
    #[builder(default = "self.default_output_dir()")]
    output_dir: PathBuf,
    // maximum time in seconds the browser waits for an event before timing out
    #[builder(default = "45")]
    browser_timeout: u64,
    // minimum wait time after navigation in seconds
    #[builder(default = "2")]
    min_wait_after_navigation: u64,
    // maximum wait time after navigation in seconds
    #[builder(default = "4")]
    max_wait_after_navigation: u64,
    // pause after each scroll so lazily loaded results can attach
    #[builder(default = "2000")]
    scroll_settle_ms: u64,
    // cap on profile pagination rounds
    #[builder(default = "30")]
    max_scroll_rounds: usize,
    // download attempts per asset
    #[builder(default = "3")]
    download_attempts: u32,
    #[builder(default = "500")]
    retry_base_delay_ms: u64,
    // concurrent image downloads within one listing
    #[builder(default = "4")]
    concurrent_downloads: usize,
    #[builder(default = "true")]
    headless: bool,
    #[builder(default)]
    selectors: FieldSelectors,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

impl RunnerOptionsBuilder {
    fn default_output_dir(&self) -> PathBuf {
        PathBuf::from(utils::DEFAULT_OUTPUT_DIR.as_str())
    }
}

impl Runner {
    pub fn new(options: RunnerOptions) -> anyhow::Result<Self> {
        let browser = BrowserController::new(
            Duration::from_secs(options.browser_timeout),
            options.min_wait_after_navigation,
            options.max_wait_after_navigation,
            Duration::from_millis(options.scroll_settle_ms),
            options.headless,
        )
        .context("could not establish rendering session")?;

        let downloader = Downloader::new(RetryPolicy {
            max_attempts: options.download_attempts,
            base_delay: Duration::from_millis(options.retry_base_delay_ms),
        })?;

        let should_terminate = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

        Ok(Runner {
            browser,
            downloader,
            options,
            should_terminate,
        })
    }

    pub async fn run(&self, url: &str) -> Result<RunResult, ScrapeError> {
        let url =
            utils::validate_url(url).ok_or_else(|| ScrapeError::InvalidUrl(url.to_string()))?;
        match utils::resolve_mode(&url) {
            RunMode::Item => self.run_item(&url).await,
            RunMode::Profile => self.run_profile(&url).await,
        }
    }

    async fn run_item(&self, url: &str) -> Result<RunResult, ScrapeError> {
        let listing =
            ListingRef::from_url(url).ok_or_else(|| ScrapeError::InvalidUrl(url.to_string()))?;
        let mut writer = FolderWriter::new(self.options.output_dir.clone());
        let mut result = RunResult::default();
        info!("processing single listing {}", listing.url);
        self.process_listing(&mut writer, &listing, &mut result)
            .await;
        Ok(result)
    }

    async fn run_profile(&self, url: &str) -> Result<RunResult, ScrapeError> {
        info!("discovering listings for profile {}", url);
        let page = self
            .browser
            .open(url, &self.options.selectors.page_ready)
            .await
            .map_err(|e| ScrapeError::ProfileNotFound(e.to_string()))?;

        // pagination scrolls and sleeps synchronously, so it runs on the
        // blocking pool instead of a runtime worker
        let paginator = Paginator::new(self.options.max_scroll_rounds);
        let selectors = self.options.selectors.clone();
        let profile = task::spawn_blocking(move || paginator.discover(&page, &selectors))
            .await
            .map_err(|e| ScrapeError::Render(format!("pagination task failed: {}", e)))??;

        let root = self.options.output_dir.join(&profile.handle);
        let mut writer = FolderWriter::new(root.clone());
        let mut result = RunResult::default();

        self.fetch_profile_picture(&profile, &root).await;

        let total = profile.listing_refs.len();
        for (index, listing) in profile.listing_refs.iter().enumerate() {
            if self.should_terminate.load(Ordering::Relaxed) {
                warn!(
                    "termination requested, stopping after {} of {} listings",
                    index, total
                );
                break;
            }
            info!("processing listing {} of {}: {}", index + 1, total, listing.url);
            self.process_listing(&mut writer, listing, &mut result)
                .await;
        }
        Ok(result)
    }

    // best effort, a missing avatar never affects the run
    async fn fetch_profile_picture(&self, profile: &SellerProfile, root: &Path) {
        let Some(url) = &profile.profile_picture_url else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(root) {
            warn!("could not create profile dir {:?}: {}", root, e);
            return;
        }
        let target = DownloadTarget {
            destination_path: root.join(PROFILE_PICTURE_FILE),
            source_url: url.clone(),
            expected_byte_length: None,
        };
        if let Err(e) = self.downloader.fetch(&target).await {
            warn!("could not download profile picture: {}", e);
        }
    }

    async fn process_listing(
        &self,
        writer: &mut FolderWriter,
        listing: &ListingRef,
        result: &mut RunResult,
    ) {
        let outcome = self.scrape_listing(writer, listing).await;
        if let Err(e) = &outcome {
            error!("listing {} failed: {}", listing.url, e);
        }
        result.record_outcome(listing, outcome);
    }

    // returns the reasons for any assets that could not be fetched; the
    // listing still counts as processed once its folder is written
    async fn scrape_listing(
        &self,
        writer: &mut FolderWriter,
        listing: &ListingRef,
    ) -> Result<Vec<String>, ScrapeError> {
        let page = self
            .browser
            .open(&listing.url, &self.options.selectors.page_ready)
            .await?;
        let html = page.html()?;
        let details = extractor::extract(&listing.url, &html, &self.options.selectors)?;

        let folder = writer.plan(listing, &details)?;
        debug!(
            "downloading {} image(s) into {:?}",
            folder.targets.len(),
            folder.dir
        );
        let outcomes = self
            .downloader
            .fetch_all(&folder.targets, self.options.concurrent_downloads)
            .await;

        let mut failures = vec![];
        for (target, outcome) in folder.targets.iter().zip(outcomes) {
            if let Err(e) = outcome {
                let file = target
                    .destination_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("asset");
                failures.push(format!("{}: {}", file, e));
            }
        }
        Ok(failures)
    }
}
