//! Bufo catalog loading and filtering.
//!
//! The catalog is served by the find-bufo search API as a JSON `results`
//! array. Entries missing a name or URL are dropped rather than failing the
//! load; an empty catalog is the caller's problem (startup treats it as
//! fatal).

use std::time::Duration;

use anyhow::{Context, Result};
use regex::RegexSet;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

const CATALOG_TIMEOUT: Duration = Duration::from_secs(30);

/// One reaction image: the filename that doubles as its identity, and the
/// URL it can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bufo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

/// Client for the catalog search API.
pub struct CatalogClient {
    http: Client,
    url: String,
}

impl CatalogClient {
    pub fn new(url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(CATALOG_TIMEOUT)
            .build()
            .context("failed to build catalog http client")?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    /// Fetch the full catalog, preserving the order the API returned.
    pub async fn load(&self) -> Result<Vec<Bufo>> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("catalog request failed")?
            .error_for_status()
            .context("catalog request rejected")?;
        let body: SearchResponse = resp
            .json()
            .await
            .context("catalog response was not valid JSON")?;

        let total = body.results.len();
        let bufos: Vec<Bufo> = body
            .results
            .into_iter()
            .filter(|r| !r.name.is_empty() && !r.url.is_empty())
            .map(|r| Bufo {
                name: r.name,
                url: r.url,
            })
            .collect();
        if bufos.len() < total {
            warn!(
                "dropped {} catalog entries missing a name or url",
                total - bufos.len()
            );
        }
        info!("loaded {} bufos from catalog", bufos.len());
        Ok(bufos)
    }
}

/// Drop bufos whose name matches any exclusion pattern. An empty pattern
/// list keeps everything.
pub fn filter_excluded(bufos: Vec<Bufo>, patterns: &[String]) -> Result<Vec<Bufo>> {
    if patterns.is_empty() {
        return Ok(bufos);
    }
    let set = RegexSet::new(patterns).context("invalid exclude pattern")?;
    let before = bufos.len();
    let kept: Vec<Bufo> = bufos.into_iter().filter(|b| !set.is_match(&b.name)).collect();
    if kept.len() < before {
        info!("excluded {} bufos by pattern", before - kept.len());
    }
    Ok(kept)
}
