// State-interval provider backed by a remote segment database
use crate::application::archive_repository::{ArchiveError, StateProvider};
use crate::domain::segments::{Segment, SegmentList};
use crate::infrastructure::config::render_template;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FlagResponse {
    #[serde(default)]
    active: SegmentList,
}

#[derive(Debug, Clone)]
pub struct SegmentDbProvider {
    host: String,
    url_template: String,
    client: reqwest::Client,
}

impl SegmentDbProvider {
    pub fn new(host: String, url_template: String) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            url_template,
            client: reqwest::Client::new(),
        }
    }

    fn build_url(&self, flag: &str, start: f64, end: f64) -> Result<String, ArchiveError> {
        let vars = [
            ("host", self.host.clone()),
            ("flag", urlencoding::encode(flag).into_owned()),
            ("start", format!("{}", start.floor() as i64)),
            ("end", format!("{}", end.ceil() as i64)),
        ];
        render_template(&self.url_template, &vars).map_err(|e| {
            ArchiveError::DiscoveryUnconfigured(format!("state.url_template: {}", e))
        })
    }
}

#[async_trait]
impl StateProvider for SegmentDbProvider {
    async fn query(&self, flag: &str, start: f64, end: f64) -> Result<SegmentList, ArchiveError> {
        let url = self.build_url(flag, start, end)?;
        tracing::debug!("Querying segment database: {}", url);

        let response: FlagResponse = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.active.restrict(Segment::new(start, end)))
    }
}
