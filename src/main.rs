use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use log::debug;
use vinted_archiver::{
    extractor::FieldSelectors,
    runner::{Runner, RunnerOptions},
    types::{RunMode, RunResult},
    utils,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Vinted listing archiver CLI", long_about = None)]
struct Args {
    /// Vinted listing URL (single item)
    #[arg(long, conflicts_with = "all", required_unless_present = "all")]
    item: Option<String>,
    /// Vinted seller profile URL, downloads every listing in the closet
    #[arg(long)]
    all: Option<String>,
    /// Root directory listing folders are written under
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,
    /// Maximum time in seconds the browser will wait for an event before timing out
    #[arg(long, default_value_t = 45)]
    browser_timeout: u64,
    /// Minimum time in seconds to wait after a tab navigates to a page
    #[arg(long, default_value_t = 2)]
    min_wait_after_navigation: u64,
    /// Maximum time in seconds to wait after a tab navigates to a page
    #[arg(long, default_value_t = 4)]
    max_wait_after_navigation: u64,
    /// Maximum number of scroll rounds when paginating a profile
    #[arg(long, default_value_t = 30)]
    max_scroll_rounds: usize,
    /// Number of download attempts per asset
    #[arg(short = 'r', long, default_value_t = 3)]
    download_attempts: u32,
    /// Base delay in milliseconds between download attempts
    #[arg(long, default_value_t = 500)]
    retry_base_delay_ms: u64,
    /// Number of concurrent image downloads per listing
    #[arg(short = 'c', long, default_value_t = 4)]
    concurrent_downloads: usize,
    /// JSON file overriding the field selector table
    #[arg(long)]
    selectors: Option<PathBuf>,
    /// Run the browser with a visible window
    #[arg(long, default_value_t = false)]
    headful: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let raw_url = match (args.item.as_deref(), args.all.as_deref()) {
        (Some(u), _) => u.to_string(),
        (_, Some(u)) => u.to_string(),
        _ => bail!("specify --item <URL> or --all <USER URL>"),
    };

    let url = utils::validate_url(&raw_url)
        .ok_or_else(|| anyhow!("invalid vinted url: {}", raw_url))?;

    // the flags are only a cross-check; the runner resolves the mode from the url
    let mode = utils::resolve_mode(&url);
    if args.item.is_some() && mode != RunMode::Item {
        bail!("--item expects a listing url like https://www.vinted.com/items/123-name");
    }
    if args.all.is_some() && mode != RunMode::Profile {
        bail!("--all expects a profile url like https://www.vinted.com/member/username");
    }

    let selectors = match &args.selectors {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .context(format!("could not read selector table {:?}", path))?;
            serde_json::from_str::<FieldSelectors>(&raw).context("invalid selector table")?
        }
        None => FieldSelectors::default(),
    };

    let options = RunnerOptions::default_builder()
        .output_dir(
            args.output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(utils::DEFAULT_OUTPUT_DIR.as_str())),
        )
        .browser_timeout(args.browser_timeout)
        .min_wait_after_navigation(args.min_wait_after_navigation)
        .max_wait_after_navigation(args.max_wait_after_navigation)
        .max_scroll_rounds(args.max_scroll_rounds)
        .download_attempts(args.download_attempts)
        .retry_base_delay_ms(args.retry_base_delay_ms)
        .concurrent_downloads(args.concurrent_downloads)
        .selectors(selectors)
        .headless(!args.headful)
        .build()?;

    debug!("starting run with {:#?}", args);

    let runner = Runner::new(options)?;
    let result = runner.run(&url).await?;

    print_summary(&result);
    Ok(())
}

fn print_summary(result: &RunResult) {
    println!();
    println!(
        "{} listing(s) archived, {} failure(s)",
        result.succeeded.len(),
        result.failed.len()
    );
    for failure in &result.failed {
        println!(
            "  failed {} ({}): {}",
            failure.listing.id, failure.listing.url, failure.reason
        );
    }
}
