// The time span and run parameters shared by both analyses
use crate::application::archive_repository::{ArchiveError, StateProvider};
use crate::domain::flag::FaultFlagMap;
use crate::domain::segments::{Segment, SegmentList};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Saturations,
    Overflows,
}

impl AnalysisKind {
    /// Tag used in artifact names
    pub fn tag(&self) -> &'static str {
        match self {
            AnalysisKind::Saturations => "SOFTWARE_SATURATIONS",
            AnalysisKind::Overflows => "ADC_OVERFLOWS",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AnalysisKind::Saturations => "Software saturations",
            AnalysisKind::Overflows => "ADC overflows",
        }
    }
}

/// Everything a finished analysis hands to the writers.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub flags: FaultFlagMap,
    /// Overflow event times per channel, filled in event mode only
    pub events: BTreeMap<String, Vec<f64>>,
    pub analyzed: SegmentList,
    /// Number of units (limiters or front-end controllers) examined
    pub monitored: usize,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub site: String,
    pub stream_type: String,
    pub start: f64,
    pub end: f64,
    /// Restrict analysis to the active segments of this state flag
    pub state_flag: Option<String>,
    pub chunk_seconds: f64,
    pub max_batch: usize,
    pub round_segments: bool,
}

impl AnalysisRequest {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn span(&self) -> Segment {
        Segment::new(self.start, self.end)
    }

    /// The spans to analyze: the full request, or its intersection with the
    /// state flag when one is configured.
    pub async fn analysis_spans(
        &self,
        state: Option<&dyn StateProvider>,
    ) -> Result<SegmentList, ArchiveError> {
        match (&self.state_flag, state) {
            (Some(flag), Some(provider)) => {
                let active = provider.query(flag, self.start, self.end).await?;
                tracing::info!(
                    "State flag {} leaves {:.0}s of {:.0}s to analyze",
                    flag,
                    active.restrict(self.span()).total_duration(),
                    self.duration()
                );
                Ok(active.restrict(self.span()))
            }
            (Some(flag), None) => {
                tracing::warn!("No state provider configured, ignoring state flag {}", flag);
                Ok(SegmentList::from_segments([self.span()]))
            }
            _ => Ok(SegmentList::from_segments([self.span()])),
        }
    }
}

/// Splits each span into consecutive chunks of at most `chunk_seconds`.
pub fn split_chunks(spans: &SegmentList, chunk_seconds: f64) -> Vec<Segment> {
    let mut chunks = Vec::new();
    for span in spans.iter() {
        if chunk_seconds <= 0.0 {
            chunks.push(*span);
            continue;
        }
        let mut start = span.start;
        while start < span.end {
            let end = (start + chunk_seconds).min(span.end);
            chunks.push(Segment::new(start, end));
            start = end;
        }
    }
    chunks
}
