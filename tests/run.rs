use std::path::PathBuf;

use vinted_archiver::{
    runner::{Runner, RunnerOptions},
    utils,
};

macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

/*
RUST_LOG=debug cargo test --package vinted-archiver --test run -- archive_single_item --exact --ignored
*/
#[test]
#[ignore = "live run against vinted, needs chrome + network"]
fn archive_single_item() -> anyhow::Result<()> {
    env_logger::init();
    let out = utils::create_random_tmp_folder()?;
    let options = RunnerOptions::default_builder()
        .output_dir(out.clone())
        .browser_timeout(45u64)
        .download_attempts(3u32)
        .build()?;
    let runner = Runner::new(options)?;
    let result = aw!(runner.run("https://www.vinted.com/items/1234567890-dress"))?;
    println!("{result:#?}");

    // every archived listing folder holds a description plus its images
    for listing in &result.succeeded {
        let folders: Vec<PathBuf> = std::fs::read_dir(&out)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        assert!(
            folders
                .iter()
                .any(|f| f.to_string_lossy().contains(listing.id.as_str())),
            "no folder for {}",
            listing.id
        );
    }
    Ok(())
}

#[test]
#[ignore = "live run against vinted, needs chrome + network"]
fn archive_whole_closet() -> anyhow::Result<()> {
    env_logger::init();
    let out = utils::create_random_tmp_folder()?;
    let options = RunnerOptions::default_builder()
        .output_dir(out)
        .max_scroll_rounds(30usize)
        .build()?;
    let runner = Runner::new(options)?;
    let result = aw!(runner.run("https://www.vinted.com/member/username"))?;
    println!(
        "{} succeeded / {} failed",
        result.succeeded.len(),
        result.failed.len()
    );
    Ok(())
}

#[test]
#[ignore = "needs chrome"]
fn profile_that_does_not_exist_is_fatal() -> anyhow::Result<()> {
    env_logger::init();
    let options = RunnerOptions::default_builder().build()?;
    let runner = Runner::new(options)?;
    let err = aw!(runner.run("https://www.vinted.com/member/0-no-such-seller-xyz")).unwrap_err();
    println!("{err}");
    Ok(())
}
