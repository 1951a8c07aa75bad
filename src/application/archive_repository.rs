// Repository traits for archived sample data and state intervals
use crate::domain::segments::{Segment, SegmentList};
use crate::domain::stream::SampleStream;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no {stream_type} archive units for {site} covering [{start}, {end})")]
    NoUnits {
        site: String,
        stream_type: String,
        start: f64,
        end: f64,
    },

    #[error("archive discovery is not configured: {0}")]
    DiscoveryUnconfigured(String),

    #[error("channel {0} not found in archive")]
    ChannelNotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("discovery request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One archived file covering a contiguous span of time.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveUnit {
    pub location: String,
    pub span: Segment,
}

impl ArchiveUnit {
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.span.start < end && start < self.span.end
    }
}

#[async_trait]
pub trait ArchiveLocator: Send + Sync {
    /// Archive units covering `[start, end)`, ordered by start time.
    /// Fails with `NoUnits` when nothing covers the span.
    async fn locate(
        &self,
        site: &str,
        stream_type: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<ArchiveUnit>, ArchiveError>;
}

#[async_trait]
pub trait SampleReader: Send + Sync {
    /// Names of every channel recorded in `unit`
    async fn channels(&self, unit: &ArchiveUnit) -> Result<Vec<String>, ArchiveError>;

    /// Reads `channels` over `[start, end)` from `units`.
    /// Fails with `ChannelNotFound` naming the first absent channel.
    async fn read(
        &self,
        units: &[ArchiveUnit],
        channels: &[String],
        start: f64,
        end: f64,
        parallelism: usize,
    ) -> Result<HashMap<String, SampleStream>, ArchiveError>;
}

#[async_trait]
pub trait StateProvider: Send + Sync {
    /// Externally validated good-data segments for `flag` within `[start, end)`.
    async fn query(&self, flag: &str, start: f64, end: f64) -> Result<SegmentList, ArchiveError>;
}
