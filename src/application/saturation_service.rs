// Software saturation detection - limiter outputs pinned at their clip limit
use crate::application::analysis_request::{AnalysisOutcome, AnalysisRequest, split_chunks};
use crate::application::archive_repository::{
    ArchiveError, ArchiveLocator, ArchiveUnit, SampleReader, StateProvider,
};
use crate::application::batch_planner::BatchPlanner;
use crate::application::worker_pool::WorkerPool;
use crate::domain::channel::{Indicator, MonitoredUnit, SuffixConvention, find_limit_channels};
use crate::domain::flag::{FaultFlag, FaultFlagMap};
use crate::domain::segments::{Segment, SegmentList};
use crate::domain::stream::SampleStream;
use anyhow::{Context, anyhow};
use std::collections::HashMap;
use std::sync::Arc;

/// Output, limit and enable/status word.
const STREAMS_PER_UNIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaturationParams {
    /// Fraction of the limit the output must reach to count as saturated
    pub precision: f64,
    /// Limits with magnitude at or below this never saturate
    pub epsilon: f64,
    /// Bit of the status word that switches the limiter on
    pub limiter_bit: u32,
}

impl Default for SaturationParams {
    fn default() -> Self {
        Self {
            precision: 0.99,
            epsilon: 1e-9,
            limiter_bit: 13,
        }
    }
}

/// Per-sample limiter state from an enable word (non-zero) or a status word
/// (limiter bit set).
pub fn gate_mask(gate: &SampleStream, indicator: Indicator, limiter_bit: u32) -> Vec<bool> {
    gate.values
        .iter()
        .map(|&v| match indicator {
            Indicator::Enable => v != 0.0,
            Indicator::Status => (v as i64 >> limiter_bit) & 1 == 1,
        })
        .collect()
}

/// Times where `|output| >= precision * |limit|` while the limiter is enabled.
pub fn saturation_segments(
    output: &SampleStream,
    limit: &SampleStream,
    gate: Option<&[bool]>,
    params: SaturationParams,
) -> SegmentList {
    let n = output.len().min(limit.len());
    let limits = &limit.values;
    output.segments_where(|i, out| {
        if i >= n {
            return false;
        }
        let enabled = gate.is_none_or(|g| g.get(i).copied().unwrap_or(false));
        let lim = limits[i].abs();
        enabled && lim > params.epsilon && out.abs() >= params.precision * lim
    })
}

pub fn detect_saturation(
    name: &str,
    output: &SampleStream,
    limit: &SampleStream,
    gate: Option<&[bool]>,
    params: SaturationParams,
) -> FaultFlag {
    let n = output.len().min(limit.len());
    let known = SegmentList::from_segments([Segment::new(output.start, output.time_at(n))]);
    FaultFlag::new(name, known, saturation_segments(output, limit, gate, params))
}

#[derive(Debug, Clone)]
pub struct SaturationSettings {
    pub params: SaturationParams,
    pub skip: Vec<String>,
    pub suffixes: SuffixConvention,
}

#[derive(Debug, Clone)]
struct BatchTask {
    chunk: Segment,
    archive: Vec<ArchiveUnit>,
    units: Vec<MonitoredUnit>,
}

#[derive(Clone)]
pub struct SaturationService {
    locator: Arc<dyn ArchiveLocator>,
    reader: Arc<dyn SampleReader>,
    state: Option<Arc<dyn StateProvider>>,
    settings: Arc<SaturationSettings>,
    pool: WorkerPool,
}

impl SaturationService {
    pub fn new(
        locator: Arc<dyn ArchiveLocator>,
        reader: Arc<dyn SampleReader>,
        state: Option<Arc<dyn StateProvider>>,
        settings: SaturationSettings,
        pool: WorkerPool,
    ) -> Self {
        Self {
            locator,
            reader,
            state,
            settings: Arc::new(settings),
            pool,
        }
    }

    pub async fn run(&self, request: &AnalysisRequest) -> anyhow::Result<AnalysisOutcome> {
        let archive = self
            .locator
            .locate(&request.site, &request.stream_type, request.start, request.end)
            .await
            .with_context(|| {
                format!(
                    "failed to locate {} data for {} in [{}, {})",
                    request.stream_type, request.site, request.start, request.end
                )
            })?;
        let first = archive
            .first()
            .ok_or_else(|| anyhow!("archive locator returned no units"))?;

        let spans = request
            .analysis_spans(self.state.as_deref())
            .await
            .context("failed to query analysis state segments")?;

        let channels = self
            .reader
            .channels(first)
            .await
            .with_context(|| format!("failed to list channels in {}", first.location))?;
        let pairs = find_limit_channels(&channels, &self.settings.skip, &self.settings.suffixes);
        tracing::info!(
            "Monitoring {} limiters ({} with enable word, {} with status word)",
            pairs.len(),
            pairs.enable_paired.len(),
            pairs.status_paired.len()
        );
        if pairs.is_empty() {
            tracing::warn!("No limit channel has an enable or status companion");
        }
        let monitored = pairs.units();

        let planner = BatchPlanner::default().with_streams_per_channel(STREAMS_PER_UNIT);
        let mut tasks = Vec::new();
        for chunk in split_chunks(&spans, request.chunk_seconds) {
            let covering: Vec<ArchiveUnit> = archive
                .iter()
                .filter(|u| u.overlaps(chunk.start, chunk.end))
                .cloned()
                .collect();
            if covering.is_empty() {
                tracing::warn!("No archive data for [{}, {}), skipping", chunk.start, chunk.end);
                continue;
            }
            let size =
                planner.batch_size(monitored.len(), request.max_batch, Some(chunk.duration()));
            for batch in monitored.chunks(size) {
                tasks.push(BatchTask {
                    chunk,
                    archive: covering.clone(),
                    units: batch.to_vec(),
                });
            }
        }
        tracing::info!("Processing {} batches on {} workers", tasks.len(), self.pool.workers());

        let read_parallelism = if self.pool.is_sequential() {
            WorkerPool::default_workers()
        } else {
            1
        };
        let results = self
            .pool
            .run(tasks, |task| {
                scan_batch(self.reader.clone(), self.settings.clone(), task, read_parallelism)
            })
            .await?;

        let mut flags = FaultFlagMap::new();
        for result in results {
            match result {
                Ok(batch) => flags.merge_all(batch.into_iter().map(|f| {
                    if request.round_segments { f.round_outward() } else { f }
                })),
                Err(e) => tracing::warn!("Skipping batch: {:#}", e),
            }
        }

        tracing::info!(
            "{} of {} limiters saturated",
            flags.faulted().count(),
            flags.len()
        );
        Ok(AnalysisOutcome {
            flags,
            events: Default::default(),
            analyzed: spans,
            monitored: monitored.len(),
        })
    }
}

async fn scan_batch(
    reader: Arc<dyn SampleReader>,
    settings: Arc<SaturationSettings>,
    task: BatchTask,
    parallelism: usize,
) -> anyhow::Result<Vec<FaultFlag>> {
    let mut units = task.units;
    let data = loop {
        let names: Vec<String> = units
            .iter()
            .flat_map(|u| u.channels(&settings.suffixes))
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }
        match reader
            .read(&task.archive, &names, task.chunk.start, task.chunk.end, parallelism)
            .await
        {
            Ok(data) => break data,
            Err(ArchiveError::ChannelNotFound(missing)) => {
                let before = units.len();
                units.retain(|u| !u.channels(&settings.suffixes).contains(&missing));
                if units.len() == before {
                    return Err(ArchiveError::ChannelNotFound(missing).into());
                }
                tracing::warn!("Skipping limiter using {}: channel not readable", missing);
            }
            Err(e) => return Err(e.into()),
        }
    };

    let flags = tokio::task::spawn_blocking(move || detect_batch(&units, &data, &settings))
        .await
        .context("saturation detection panicked")?;
    Ok(flags)
}

fn detect_batch(
    units: &[MonitoredUnit],
    data: &HashMap<String, SampleStream>,
    settings: &SaturationSettings,
) -> Vec<FaultFlag> {
    units
        .iter()
        .filter_map(|unit| {
            let [output_name, limit_name, gate_name] = unit.channels(&settings.suffixes);
            let output = data.get(&output_name)?;
            let limit = data.get(&limit_name)?;
            let gate = data.get(&gate_name)?;
            let mask = gate_mask(gate, unit.indicator, settings.params.limiter_bit);
            let flag = detect_saturation(&limit_name, output, limit, Some(&mask), settings.params);
            if flag.is_faulted() {
                tracing::debug!(
                    "{} saturated for {:.2}s",
                    limit_name,
                    flag.active.total_duration()
                );
            }
            Some(flag)
        })
        .collect()
}
