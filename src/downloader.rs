use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use futures::{stream, StreamExt};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, time::sleep};
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::{
    types::{DownloadTarget, ScrapeError},
    utils,
};

const TRANSIENT_STATUSES: [StatusCode; 6] = [
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Bounded retry schedule: `max_attempts` tries in total, doubling jittered
/// delays starting at `base_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// The delays slept between attempts; one fewer than the attempt count.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(StatusCode),
    #[error("truncated body: got {got} of {expected} bytes")]
    Truncated { got: u64, expected: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn is_transient(err: &FetchError) -> bool {
    match err {
        FetchError::Http(e) => e.is_timeout() || e.is_connect(),
        FetchError::Status(code) => TRANSIENT_STATUSES.contains(code),
        FetchError::Truncated { .. } => true,
        FetchError::Io(_) => false,
    }
}

pub struct Downloader {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl Downloader {
    pub fn new(policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(utils::USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .context("could not build http client")?;
        Ok(Downloader { client, policy })
    }

    /// Fetches one asset, retrying transient failures per the policy. The
    /// exhausted error carries the attempt count and the last cause; it is for
    /// the caller to record, a failed asset never takes siblings down.
    pub async fn fetch(&self, target: &DownloadTarget) -> Result<u64, ScrapeError> {
        let mut delays = self.policy.delays();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.try_fetch(target).await {
                Ok(written) => {
                    debug!(
                        "saved {} to {:?} ({} bytes)",
                        target.source_url, target.destination_path, written
                    );
                    return Ok(written);
                }
                Err(e) if is_transient(&e) => match delays.next() {
                    Some(delay) => {
                        warn!(
                            "transient failure on {} (attempt {}): {}, retrying in {:?}",
                            target.source_url, attempts, e, delay
                        );
                        sleep(delay).await;
                    }
                    None => {
                        return Err(ScrapeError::Download {
                            url: target.source_url.clone(),
                            attempts,
                            cause: e.into(),
                        })
                    }
                },
                Err(e) => {
                    return Err(ScrapeError::Download {
                        url: target.source_url.clone(),
                        attempts,
                        cause: e.into(),
                    })
                }
            }
        }
    }

    // streams into <dest>.part and renames on success, so a failed or crashed
    // run never leaves a file under the final name
    async fn try_fetch(&self, target: &DownloadTarget) -> Result<u64, FetchError> {
        let mut response = self.client.get(&target.source_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let expected = target.expected_byte_length.or_else(|| response.content_length());

        let tmp_path = part_path(&target.destination_path);
        let outcome = stream_body(&mut response, &tmp_path, expected).await;
        finalize(&tmp_path, &target.destination_path, outcome).await
    }

    /// Runs one listing's downloads with bounded concurrency; outcomes are
    /// returned in target order.
    pub async fn fetch_all(
        &self,
        targets: &[DownloadTarget],
        concurrency: usize,
    ) -> Vec<Result<u64, ScrapeError>> {
        stream::iter(targets)
            .map(|target| self.fetch(target))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

async fn stream_body(
    response: &mut reqwest::Response,
    tmp_path: &Path,
    expected: Option<u64>,
) -> Result<u64, FetchError> {
    let mut file = fs::File::create(tmp_path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = expected {
        if written != expected {
            return Err(FetchError::Truncated {
                got: written,
                expected,
            });
        }
    }
    Ok(written)
}

// the temp file only ever survives under the final name; every error exit
// removes it
async fn finalize(
    tmp_path: &Path,
    destination: &Path,
    outcome: Result<u64, FetchError>,
) -> Result<u64, FetchError> {
    match outcome {
        Ok(written) => match fs::rename(tmp_path, destination).await {
            Ok(()) => Ok(written),
            Err(e) => {
                let _ = fs::remove_file(tmp_path).await;
                Err(e.into())
            }
        },
        Err(e) => {
            let _ = fs::remove_file(tmp_path).await;
            Err(e)
        }
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut os = destination.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn policy_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(delays.len(), 2);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));

        let single = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(single.delays().count(), 0);
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient(&FetchError::Status(
            StatusCode::SERVICE_UNAVAILABLE
        )));
        assert!(is_transient(&FetchError::Status(
            StatusCode::TOO_MANY_REQUESTS
        )));
        assert!(!is_transient(&FetchError::Status(StatusCode::NOT_FOUND)));
        assert!(!is_transient(&FetchError::Status(StatusCode::FORBIDDEN)));
        assert!(is_transient(&FetchError::Truncated {
            got: 10,
            expected: 20
        }));
        assert!(!is_transient(&FetchError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied"
        ))));
    }

    #[test]
    fn part_path_keeps_the_final_name_clean() {
        let p = part_path(Path::new("/tmp/closet/1.jpg"));
        assert_eq!(p, PathBuf::from("/tmp/closet/1.jpg.part"));
    }

    #[tokio::test]
    async fn error_exits_remove_the_part_file() {
        let dir = utils::create_random_tmp_folder().unwrap();
        let dest = dir.join("1.jpg");
        let tmp = part_path(&dest);
        fs::write(&tmp, b"partial").await.unwrap();

        let outcome = finalize(&tmp, &dest, Err(FetchError::Truncated { got: 7, expected: 9 })).await;
        assert!(outcome.is_err());
        assert!(!tmp.exists());
        assert!(!dest.exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn only_a_complete_download_lands_under_the_final_name() {
        let dir = utils::create_random_tmp_folder().unwrap();
        let dest = dir.join("2.jpg");
        let tmp = part_path(&dest);
        fs::write(&tmp, b"all of it").await.unwrap();

        let written = finalize(&tmp, &dest, Ok(9)).await.unwrap();
        assert_eq!(written, 9);
        assert!(!tmp.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"all of it");
        std::fs::remove_dir_all(dir).unwrap();
    }

    // RUST_LOG=debug cargo test --package vinted-archiver fetches_a_real_file -- --ignored
    #[tokio::test]
    #[ignore = "network"]
    async fn fetches_a_real_file() {
        env_logger::init();
        let dir = utils::create_random_tmp_folder().unwrap();
        let downloader = Downloader::new(RetryPolicy::default()).unwrap();
        let target = DownloadTarget {
            destination_path: dir.join("example.html"),
            source_url: "https://example.com/".into(),
            expected_byte_length: None,
        };
        let written = downloader.fetch(&target).await.unwrap();
        assert!(written > 0);
        assert!(target.destination_path.exists());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
