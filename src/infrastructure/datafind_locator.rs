// Archive discovery through a remote datafind service
use crate::application::archive_repository::{ArchiveError, ArchiveLocator, ArchiveUnit};
use crate::infrastructure::config::render_template;
use crate::infrastructure::directory_archive::parse_unit_name;
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct DatafindLocator {
    host: Option<String>,
    url_template: String,
    client: reqwest::Client,
}

impl DatafindLocator {
    pub fn new(host: Option<String>, url_template: String) -> Self {
        Self {
            host: host.map(|h| h.trim_end_matches('/').to_string()),
            url_template,
            client: reqwest::Client::new(),
        }
    }

    fn build_url(
        &self,
        host: &str,
        site: &str,
        stream_type: &str,
        start: f64,
        end: f64,
    ) -> Result<String, ArchiveError> {
        let vars = [
            ("host", host.to_string()),
            ("site", urlencoding::encode(site).into_owned()),
            ("type", urlencoding::encode(stream_type).into_owned()),
            ("start", format!("{}", start.floor() as i64)),
            ("end", format!("{}", end.ceil() as i64)),
        ];
        render_template(&self.url_template, &vars).map_err(|e| {
            ArchiveError::DiscoveryUnconfigured(format!("archive.url_template: {}", e))
        })
    }
}

/// Turns the service's file URLs into archive units, keeping those that
/// overlap `[start, end)`, ordered by start.
fn units_from_urls(urls: Vec<String>, start: f64, end: f64) -> Vec<ArchiveUnit> {
    let mut units: Vec<ArchiveUnit> = urls
        .into_iter()
        .filter_map(|url| {
            let location = url.strip_prefix("file://").unwrap_or(&url).to_string();
            let (_, _, span) = parse_unit_name(Path::new(&location))?;
            Some(ArchiveUnit { location, span })
        })
        .filter(|u| u.overlaps(start, end))
        .collect();
    units.sort_by(|a, b| a.span.start.total_cmp(&b.span.start));
    units
}

#[async_trait]
impl ArchiveLocator for DatafindLocator {
    async fn locate(
        &self,
        site: &str,
        stream_type: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<ArchiveUnit>, ArchiveError> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| ArchiveError::DiscoveryUnconfigured("archive.host".to_string()))?;
        let url = self.build_url(host, site, stream_type, start, end)?;

        tracing::debug!("Querying datafind: {}", url);
        let urls: Vec<String> = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let units = units_from_urls(urls, start, end);
        if units.is_empty() {
            return Err(ArchiveError::NoUnits {
                site: site.to_string(),
                stream_type: stream_type.to_string(),
                start,
                end,
            });
        }
        Ok(units)
    }
}
