use anyhow::{Context, Result};
use headless_chrome::Tab;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions};
use rand::Rng;
use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::time::sleep;

use crate::paginator::ListingSource;
use crate::types::ScrapeError;

fn get_scroll_script(step_ms: i128) -> String {
    format!(
        r#" new Promise((resolve) => {{
            var totalHeight = 0;
            var distance = 100;
            var timer = setInterval(() => {{
                var scrollHeight = document.body.scrollHeight;
                window.scrollBy(0, distance);
                totalHeight += distance;

                if(totalHeight >= scrollHeight - window.innerHeight){{
                    clearInterval(timer);
                    resolve("ok");
                }}
            }}, {});
        }});"#,
        step_ms
    )
}

/// One browser session per run: acquired before the first page, killed on
/// drop, never shared across concurrent navigations.
pub struct BrowserController {
    browser: Browser,
    timeout: Duration,
    min_wait_secs: u64,
    max_wait_secs: u64,
    settle: Duration,
}

impl BrowserController {
    pub fn new(
        timeout: Duration,
        min_wait_secs: u64,
        max_wait_secs: u64,
        settle: Duration,
        headless: bool,
    ) -> Result<Self> {
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let options = LaunchOptions::default_builder()
            .path(Some(default_executable().unwrap()))
            .headless(headless)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(timeout)
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .args(vec![OsStr::new("--disable-blink-features=AutomationControlled")])
            .build()
            .expect("Couldn't find appropriate Chrome binary.");
        let browser = Browser::new(options).context("browser launching error")?;

        Ok(BrowserController {
            browser,
            timeout,
            min_wait_secs,
            max_wait_secs,
            settle,
        })
    }

    /// Navigates a fresh incognito tab and blocks until `ready_selector`
    /// appears (bounded wait, retried once at the session level).
    pub async fn open(&self, url: &str, ready_selector: &str) -> Result<RenderedPage, ScrapeError> {
        // we create a new incognito window (no context)
        let ctx = self
            .browser
            .new_context()
            .map_err(|e| ScrapeError::Render(format!("could not create incognito context: {}", e)))?;
        let tab = ctx
            .new_tab()
            .map_err(|e| ScrapeError::Render(format!("could not create new tab: {}", e)))?;
        tab.set_default_timeout(self.timeout);

        let nv = match tab.navigate_to(url) {
            Ok(t) => t,
            Err(e) => {
                error!("could not navigate to {} with error {}", url, e);
                tab.navigate_to(url)
                    .map_err(|e| ScrapeError::Render(e.to_string()))?
            }
        };
        if let Err(e) = nv.wait_until_navigated() {
            // we wait one more timeout
            warn!("error waiting for navigation, retrying {}", e);
            nv.wait_until_navigated()
                .map_err(|e| ScrapeError::Render(e.to_string()))?;
        }

        if let Err(e) = tab.wait_for_element_with_custom_timeout(ready_selector, self.timeout) {
            warn!(
                "marker '{}' not ready on {}, retrying: {}",
                ready_selector, url, e
            );
            tab.wait_for_element_with_custom_timeout(ready_selector, self.timeout)
                .map_err(|e| {
                    ScrapeError::Render(format!("{} never became ready: {}", url, e))
                })?;
        }

        let rndm = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.min_wait_secs..self.max_wait_secs.max(self.min_wait_secs + 1))
        };
        debug!("sleeping for {} seconds", rndm);
        sleep(Duration::from_secs(rndm)).await;

        Ok(RenderedPage {
            tab,
            settle: self.settle,
        })
    }

    pub fn kill(&self) -> bool {
        let pid = self
            .browser
            .get_process_id()
            .context("could not get process id for browser")
            .unwrap();
        let s = System::new();
        if let Some(process) = s.process(Pid::from_u32(pid)) {
            debug!("killing process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }
}

impl Drop for BrowserController {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}

/// A settled page held by one live tab.
pub struct RenderedPage {
    tab: Arc<Tab>,
    settle: Duration,
}

impl RenderedPage {
    pub fn html(&self) -> Result<String, ScrapeError> {
        self.tab
            .get_content()
            .map_err(|e| ScrapeError::Render(format!("could not read page content: {}", e)))
    }

    pub fn scroll_to_bottom(&self) -> Result<(), ScrapeError> {
        match self.tab.evaluate(&get_scroll_script(60), true) {
            Ok(_) => Ok(()),
            Err(_) => {
                // we retry
                warn!("scrolling for url {} is retrying", self.url());
                self.tab
                    .evaluate(&get_scroll_script(30), true)
                    .map_err(|e| ScrapeError::Render(format!("scrolling failed: {}", e)))?;
                Ok(())
            }
        }
    }

    pub fn url(&self) -> String {
        self.tab.get_url()
    }
}

impl ListingSource for RenderedPage {
    fn load_more(&self) -> Result<(), ScrapeError> {
        self.scroll_to_bottom()?;
        // lazily loaded results need a moment to attach; this sleep blocks,
        // so pagination runs on the blocking pool, not on a runtime worker
        thread::sleep(self.settle);
        Ok(())
    }

    fn html(&self) -> Result<String, ScrapeError> {
        RenderedPage::html(self)
    }

    fn url(&self) -> String {
        RenderedPage::url(self)
    }
}
