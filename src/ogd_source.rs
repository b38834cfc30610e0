//! Yearly OGD payload retrieval with an on-disk cache.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::records::{parse_ogd_csv, CategoryMap, Observation, RecordParseError};

pub const OGD_BASE_URL: &str = "https://data.stadt-zuerich.ch/dataset/ugz_verkehrsdaten_stundenwerte_rosengartenbruecke/download/";
pub const FIRST_PUBLISHED_YEAR: i32 = 2020;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OgdSourceConfig {
    pub base_url: String,
    pub cache_root: PathBuf,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub past_year_ttl_secs: u64,
    pub current_year_ttl_secs: u64,
    pub accept_invalid_certs: bool,
}

impl Default for OgdSourceConfig {
    fn default() -> Self {
        Self {
            base_url: OGD_BASE_URL.to_string(),
            cache_root: PathBuf::from("data/ogd"),
            http_timeout_ms: 60_000,
            max_retries: 2,
            retry_backoff_ms: 200,
            past_year_ttl_secs: 86_400,
            current_year_ttl_secs: 3_600,
            // The portal has served broken certificate chains before.
            accept_invalid_certs: true,
        }
    }
}

impl OgdSourceConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("OGD_BASE_URL") {
            let trimmed = base_url.trim();
            if !trimmed.is_empty() {
                config.base_url = trimmed.to_string();
            }
        }

        if let Ok(cache_root) = std::env::var("OGD_CACHE_ROOT") {
            let trimmed = cache_root.trim();
            if !trimmed.is_empty() {
                config.cache_root = PathBuf::from(trimmed);
            }
        }

        if let Some(timeout) = std::env::var("OGD_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
        {
            config.http_timeout_ms = timeout;
        }

        config
    }

    pub fn ttl_for(&self, year: i32, current_year: i32) -> StdDuration {
        let secs = if year >= current_year {
            self.current_year_ttl_secs
        } else {
            self.past_year_ttl_secs
        };
        StdDuration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadSource {
    Cached,
    Downloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearlyPayload {
    pub year: i32,
    pub url: String,
    pub local_path: PathBuf,
    pub source: PayloadSource,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearLoadFailure {
    pub year: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedDataset {
    pub observations: Vec<Observation>,
    pub loaded_years: Vec<i32>,
    pub failed_years: Vec<YearLoadFailure>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("payload for {year} could not be parsed: {source}")]
    Parse {
        year: i32,
        #[source]
        source: RecordParseError,
    },
    #[error("invalid cache path: {0}")]
    InvalidCachePath(PathBuf),
}

pub fn yearly_payload_url(base_url: &str, year: i32) -> String {
    format!("{base_url}ugz_ogd_traffic_rosengartenbruecke_h1_{year}.csv")
}

pub fn current_year() -> i32 {
    Local::now().year()
}

/// Years from a comma-separated list such as `"2021, 2023"`. Unparseable
/// entries are skipped; the result is sorted and deduplicated.
pub fn parse_years(raw: &str) -> Vec<i32> {
    let mut years: Vec<i32> = raw
        .split(',')
        .filter_map(|part| part.trim().parse::<i32>().ok())
        .collect();
    years.sort_unstable();
    years.dedup();
    years
}

pub fn available_years(current_year: i32) -> Vec<i32> {
    (FIRST_PUBLISHED_YEAR..=current_year).collect()
}

pub fn load_years(
    years: &[i32],
    cfg: &OgdSourceConfig,
    categories: &CategoryMap,
) -> Result<LoadedDataset, SourceError> {
    info!(
        component = "ogd_source",
        event = "ogd.load.start",
        years = ?years,
        cache_root = %cfg.cache_root.display()
    );

    let fetcher = ReqwestBlockingFetcher::new(cfg)?;
    Ok(load_years_with_fetcher(
        years,
        current_year(),
        cfg,
        categories,
        &fetcher,
    ))
}

fn load_years_with_fetcher(
    years: &[i32],
    current_year: i32,
    cfg: &OgdSourceConfig,
    categories: &CategoryMap,
    fetcher: &dyn HttpFetcher,
) -> LoadedDataset {
    let mut dataset = LoadedDataset::default();

    for &year in years {
        let loaded = sync_year_with_fetcher(year, current_year, cfg, fetcher).and_then(|payload| {
            let bytes = fs::read(&payload.local_path)?;
            parse_ogd_csv(&bytes, categories).map_err(|source| SourceError::Parse { year, source })
        });

        match loaded {
            Ok(mut rows) if !rows.is_empty() => {
                info!(
                    component = "ogd_source",
                    event = "ogd.load.year",
                    year,
                    rows = rows.len()
                );
                dataset.observations.append(&mut rows);
                dataset.loaded_years.push(year);
            }
            Ok(_) => {
                warn!(
                    component = "ogd_source",
                    event = "ogd.load.year_empty",
                    year
                );
                dataset.failed_years.push(YearLoadFailure {
                    year,
                    message: "payload contained no rows".to_string(),
                });
            }
            Err(err) => {
                warn!(
                    component = "ogd_source",
                    event = "ogd.sync.year.failed",
                    year,
                    error = %err
                );
                dataset.failed_years.push(YearLoadFailure {
                    year,
                    message: err.to_string(),
                });
            }
        }
    }

    dataset.observations.sort_by_key(|obs| obs.timestamp);

    info!(
        component = "ogd_source",
        event = "ogd.load.finish",
        observations = dataset.observations.len(),
        loaded_years = ?dataset.loaded_years,
        failed_years = dataset.failed_years.len()
    );

    dataset
}

fn sync_year_with_fetcher(
    year: i32,
    current_year: i32,
    cfg: &OgdSourceConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<YearlyPayload, SourceError> {
    let url = yearly_payload_url(&cfg.base_url, year);
    let local_path = cfg.cache_root.join(format!("{year}.csv"));
    let checksum_path = checksum_path_for(&local_path)?;
    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let ttl = cfg.ttl_for(year, current_year);
    if let Some(sha256) = fresh_cached_checksum(&local_path, &checksum_path, ttl)? {
        info!(
            component = "ogd_source",
            event = "ogd.sync.file.cached",
            year,
            path = %local_path.display()
        );
        return Ok(YearlyPayload {
            year,
            url,
            local_path,
            source: PayloadSource::Cached,
            sha256,
        });
    }

    let bytes = retry(cfg, || fetcher.get_bytes(&url))?;
    let sha256 = sha256_hex(&bytes);
    write_atomic(&local_path, &bytes)?;
    write_atomic(&checksum_path, sha256.as_bytes())?;

    info!(
        component = "ogd_source",
        event = "ogd.sync.file.downloaded",
        year,
        path = %local_path.display(),
        bytes = bytes.len()
    );
    debug!(
        component = "ogd_source",
        event = "ogd.sync.file.downloaded.debug",
        url = %url
    );

    Ok(YearlyPayload {
        year,
        url,
        local_path,
        source: PayloadSource::Downloaded,
        sha256,
    })
}

/// Checksum of the cached payload when it is younger than `ttl` and matches
/// its sidecar.
fn fresh_cached_checksum(
    local_path: &Path,
    checksum_path: &Path,
    ttl: StdDuration,
) -> Result<Option<String>, SourceError> {
    if !local_path.exists() || !checksum_path.exists() {
        return Ok(None);
    }

    let modified = fs::metadata(local_path)?.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(StdDuration::ZERO);
    if age >= ttl {
        debug!(
            component = "ogd_source",
            event = "ogd.sync.file.expired",
            path = %local_path.display(),
            age_secs = age.as_secs(),
            ttl_secs = ttl.as_secs()
        );
        return Ok(None);
    }

    let expected = fs::read_to_string(checksum_path)?.trim().to_ascii_lowercase();
    let actual = sha256_hex(&fs::read(local_path)?);
    if actual != expected {
        warn!(
            component = "ogd_source",
            event = "ogd.sync.file.checksum_failed",
            path = %local_path.display(),
            expected = %expected,
            actual = %actual
        );
        return Ok(None);
    }

    Ok(Some(actual))
}

fn checksum_path_for(path: &Path) -> Result<PathBuf, SourceError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| SourceError::InvalidCachePath(path.to_path_buf()))?;
    Ok(path.with_file_name(format!("{file_name}.sha256")))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SourceError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| SourceError::InvalidCachePath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

trait HttpFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, SourceError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    fn new(cfg: &OgdSourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_millis(cfg.http_timeout_ms))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .build()
            .map_err(|err| SourceError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SourceError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpRequest {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| SourceError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

fn retry<T>(
    cfg: &OgdSourceConfig,
    mut f: impl FnMut() -> Result<T, SourceError>,
) -> Result<T, SourceError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries => return Err(err),
            Err(_) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let factor = 1u64 << shift;
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(factor);
                std::thread::sleep(StdDuration::from_millis(sleep_ms));
            }
        }
    }
}
