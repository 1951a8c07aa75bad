// In-memory archive used by the service tests
use crate::application::archive_repository::{
    ArchiveError, ArchiveLocator, ArchiveUnit, SampleReader,
};
use crate::domain::segments::Segment;
use crate::domain::stream::SampleStream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MemoryArchive {
    span: Segment,
    streams: HashMap<String, SampleStream>,
    reads: AtomicUsize,
    requested: Mutex<Vec<Vec<String>>>,
}

impl MemoryArchive {
    pub fn new(span: Segment, streams: Vec<SampleStream>) -> Self {
        Self {
            span,
            streams: streams.into_iter().map(|s| (s.channel.clone(), s)).collect(),
            reads: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Channel lists passed to each `read` call, in call order.
    pub fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }

    pub fn was_read(&self, channel: &str) -> bool {
        self.requested()
            .iter()
            .any(|names| names.iter().any(|n| n == channel))
    }
}

#[async_trait]
impl ArchiveLocator for MemoryArchive {
    async fn locate(
        &self,
        site: &str,
        stream_type: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<ArchiveUnit>, ArchiveError> {
        let unit = ArchiveUnit {
            location: "memory".to_string(),
            span: self.span,
        };
        if !unit.overlaps(start, end) {
            return Err(ArchiveError::NoUnits {
                site: site.to_string(),
                stream_type: stream_type.to_string(),
                start,
                end,
            });
        }
        Ok(vec![unit])
    }
}

#[async_trait]
impl SampleReader for MemoryArchive {
    async fn channels(&self, _unit: &ArchiveUnit) -> Result<Vec<String>, ArchiveError> {
        let mut names: Vec<String> = self.streams.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn read(
        &self,
        _units: &[ArchiveUnit],
        channels: &[String],
        start: f64,
        end: f64,
        _parallelism: usize,
    ) -> Result<HashMap<String, SampleStream>, ArchiveError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(channels.to_vec());

        channels
            .iter()
            .map(|name| {
                self.streams
                    .get(name)
                    .map(|s| (name.clone(), s.crop(start, end)))
                    .ok_or_else(|| ArchiveError::ChannelNotFound(name.clone()))
            })
            .collect()
    }
}
