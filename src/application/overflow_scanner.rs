// Two-stage overflow search: cheap indicator check, then targeted deep scan
use crate::application::analysis_request::{AnalysisOutcome, AnalysisRequest, split_chunks};
use crate::application::archive_repository::{
    ArchiveError, ArchiveLocator, ArchiveUnit, SampleReader, StateProvider,
};
use crate::application::overflow_detector::{OverflowRule, overflow_segments, overflow_times};
use crate::application::worker_pool::WorkerPool;
use crate::domain::channel::{OverflowConvention, OverflowUnit, group_overflow_channels};
use crate::domain::flag::FaultFlag;
use crate::domain::segments::{Segment, SegmentList};
use crate::domain::stream::SampleStream;
use anyhow::{Context, anyhow};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowMode {
    #[default]
    Segments,
    Events,
}

#[derive(Debug, Clone)]
pub struct OverflowSettings {
    /// Guard band in seconds added around each flagged indicator segment
    /// before the member channels are re-read
    pub expansion: f64,
    pub indicator_rule: OverflowRule,
    pub member_rule: OverflowRule,
    pub mode: OverflowMode,
    pub skip: Vec<String>,
    pub naming: OverflowConvention,
}

impl Default for OverflowSettings {
    fn default() -> Self {
        Self {
            expansion: 2.0,
            indicator_rule: OverflowRule::Pinned,
            member_rule: OverflowRule::Pinned,
            mode: OverflowMode::Segments,
            skip: Vec::new(),
            naming: OverflowConvention::default(),
        }
    }
}

/// Result of scanning one unit over one chunk.
#[derive(Debug, Default)]
pub struct UnitScan {
    pub flags: Vec<FaultFlag>,
    pub events: Vec<(String, Vec<f64>)>,
    /// Whether the member channels had to be read
    pub deep: bool,
}

/// Scans one front-end controller over `chunk`.
///
/// Only the cumulative indicator is read first. When it shows no overflow
/// every member is recorded clean for the chunk without being read. Otherwise
/// the members are read over the flagged segments widened by the expansion
/// guard band, and every member gets a flag whose known span is the chunk.
/// Reads start early by the rule's lead-in so a step on the first sample of
/// the chunk is still seen.
pub async fn scan_unit(
    reader: &dyn SampleReader,
    archive: &[ArchiveUnit],
    unit: &OverflowUnit,
    chunk: Segment,
    settings: &OverflowSettings,
    parallelism: usize,
) -> anyhow::Result<UnitScan> {
    let indicator_rule = settings.indicator_rule;
    let indicator = reader
        .read(
            archive,
            &[unit.indicator.clone()],
            chunk.start - indicator_rule.lead_in(),
            chunk.end,
            parallelism,
        )
        .await?
        .remove(&unit.indicator)
        .ok_or_else(|| ArchiveError::ChannelNotFound(unit.indicator.clone()))?;

    let flagged = tokio::task::spawn_blocking(move || {
        overflow_segments(&indicator, indicator_rule)
    })
    .await
    .context("overflow detection panicked")?
    .restrict(chunk);
    if flagged.is_empty() {
        return Ok(UnitScan {
            flags: unit
                .members
                .iter()
                .map(|m| FaultFlag::clean(m.clone(), chunk))
                .collect(),
            ..Default::default()
        });
    }

    let windows = flagged.protract(settings.expansion).restrict(chunk);
    tracing::debug!(
        "{} indicator overflowed for {:.2}s in [{}, {}), reading {} members over {} windows",
        unit.unit,
        flagged.total_duration(),
        chunk.start,
        chunk.end,
        unit.members.len(),
        windows.len()
    );

    let (member_rule, mode) = (settings.member_rule, settings.mode);
    let mut members = unit.members.clone();
    let mut active: HashMap<String, SegmentList> = HashMap::new();
    let mut events: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for window in windows.iter().copied() {
        let read_span = Segment::new(window.start - member_rule.lead_in(), window.end);
        let data = read_available(reader, archive, &mut members, read_span, parallelism).await?;
        let hits = tokio::task::spawn_blocking(move || {
            detect_members(data, member_rule, mode, window)
        })
        .await
        .context("overflow detection panicked")?;
        for (name, found, times) in hits {
            if !times.is_empty() {
                events.entry(name.clone()).or_default().extend(times);
            }
            let entry = active.entry(name).or_default();
            *entry = entry.union(&found);
        }
    }

    let known = SegmentList::from_segments([chunk]);
    let flags = members
        .iter()
        .map(|m| {
            let found = active.remove(m).unwrap_or_default();
            FaultFlag::new(m.clone(), known.clone(), found)
        })
        .collect();
    Ok(UnitScan {
        flags,
        events: events.into_iter().collect(),
        deep: true,
    })
}

/// Overflow segments and, in events mode, sample times of each member,
/// limited to `window`.
fn detect_members(
    data: HashMap<String, SampleStream>,
    rule: OverflowRule,
    mode: OverflowMode,
    window: Segment,
) -> Vec<(String, SegmentList, Vec<f64>)> {
    data.into_iter()
        .map(|(name, stream)| {
            let found = overflow_segments(&stream, rule).restrict(window);
            let times = match mode {
                OverflowMode::Segments => Vec::new(),
                OverflowMode::Events => overflow_times(&stream, rule)
                    .into_iter()
                    .filter(|&t| t >= window.start && t < window.end)
                    .collect(),
            };
            (name, found, times)
        })
        .collect()
}

/// Reads `members` over `span`, dropping members the archive does not have.
async fn read_available(
    reader: &dyn SampleReader,
    archive: &[ArchiveUnit],
    members: &mut Vec<String>,
    span: Segment,
    parallelism: usize,
) -> Result<HashMap<String, SampleStream>, ArchiveError> {
    loop {
        if members.is_empty() {
            return Ok(HashMap::new());
        }
        match reader
            .read(archive, members.as_slice(), span.start, span.end, parallelism)
            .await
        {
            Err(ArchiveError::ChannelNotFound(missing)) if members.contains(&missing) => {
                tracing::warn!("Skipping {}: channel not readable", missing);
                members.retain(|m| *m != missing);
            }
            other => return other,
        }
    }
}

#[derive(Debug, Clone)]
struct UnitTask {
    chunk: Segment,
    archive: Arc<Vec<ArchiveUnit>>,
    unit: OverflowUnit,
}

#[derive(Clone)]
pub struct OverflowScanner {
    locator: Arc<dyn ArchiveLocator>,
    reader: Arc<dyn SampleReader>,
    state: Option<Arc<dyn StateProvider>>,
    settings: Arc<OverflowSettings>,
    pool: WorkerPool,
}

impl OverflowScanner {
    pub fn new(
        locator: Arc<dyn ArchiveLocator>,
        reader: Arc<dyn SampleReader>,
        state: Option<Arc<dyn StateProvider>>,
        settings: OverflowSettings,
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
        let units = group_overflow_channels(&channels, &self.settings.skip, &self.settings.naming);
        tracing::info!(
            "Monitoring {} front-end controllers with {} member channels",
            units.len(),
            units.iter().map(|u| u.members.len()).sum::<usize>()
        );

        let lead_in = self
            .settings
            .indicator_rule
            .lead_in()
            .max(self.settings.member_rule.lead_in());
        let mut tasks = Vec::new();
        for chunk in split_chunks(&spans, request.chunk_seconds) {
            let covering: Arc<Vec<ArchiveUnit>> = Arc::new(
                archive
                    .iter()
                    .filter(|u| u.overlaps(chunk.start - lead_in, chunk.end))
                    .cloned()
                    .collect(),
            );
            if covering.is_empty() {
                tracing::warn!("No archive data for [{}, {}), skipping", chunk.start, chunk.end);
                continue;
            }
            tasks.extend(units.iter().map(|unit| UnitTask {
                chunk,
                archive: covering.clone(),
                unit: unit.clone(),
            }));
        }

        let read_parallelism = if self.pool.is_sequential() {
            WorkerPool::default_workers()
        } else {
            1
        };
        let results = self
            .pool
            .run(tasks, |task| {
                let reader = self.reader.clone();
                let settings = self.settings.clone();
                async move {
                    let scan = scan_unit(
                        reader.as_ref(),
                        &task.archive,
                        &task.unit,
                        task.chunk,
                        &settings,
                        read_parallelism,
                    )
                    .await;
                    (task, scan)
                }
            })
            .await?;

        let mut outcome = AnalysisOutcome {
            analyzed: spans,
            monitored: units.len(),
            ..Default::default()
        };
        let mut deep_scans = 0;
        for (task, scan) in results {
            match scan {
                Ok(scan) => {
                    deep_scans += usize::from(scan.deep);
                    outcome.flags.merge_all(scan.flags.into_iter().map(|f| {
                        if request.round_segments { f.round_outward() } else { f }
                    }));
                    for (name, times) in scan.events {
                        outcome.events.entry(name).or_default().extend(times);
                    }
                }
                Err(e) => tracing::warn!(
                    "Skipping {} in [{}, {}): {:#}",
                    task.unit.unit,
                    task.chunk.start,
                    task.chunk.end,
                    e
                ),
            }
        }
        for times in outcome.events.values_mut() {
            times.sort_by(f64::total_cmp);
            times.dedup();
        }

        tracing::info!(
            "{} of {} channels overflowed ({} deep scans)",
            outcome.flags.faulted().count(),
            outcome.flags.len(),
            deep_scans
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::MemoryArchive;
    use crate::domain::stream::DataType;

    const TOP: f64 = i16::MAX as f64;

    fn stream(name: &str, pinned: &[usize]) -> SampleStream {
        let mut values = vec![0.0; 40];
        for &i in pinned {
            values[i] = TOP;
        }
        SampleStream::new(name, 0.0, 1.0, DataType::Int16, values)
    }

    fn unit(members: &[&str]) -> OverflowUnit {
        OverflowUnit {
            unit: "FEC-8".to_string(),
            indicator: "FEC-8_ACCUM_OVERFLOW".to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn archive_unit() -> Vec<ArchiveUnit> {
        vec![ArchiveUnit {
            location: "memory".to_string(),
            span: Segment::new(0.0, 40.0),
        }]
    }

    #[tokio::test]
    async fn test_clean_indicator_skips_member_reads() {
        let archive = MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                stream("FEC-8_ACCUM_OVERFLOW", &[]),
                stream("FEC-8_ADC_OVERFLOW_0_0", &[5]),
                stream("FEC-8_ADC_OVERFLOW_0_1", &[]),
            ],
        );
        let chunk = Segment::new(0.0, 40.0);
        let scan = scan_unit(
            &archive,
            &archive_unit(),
            &unit(&["FEC-8_ADC_OVERFLOW_0_0", "FEC-8_ADC_OVERFLOW_0_1"]),
            chunk,
            &OverflowSettings::default(),
            1,
        )
        .await
        .unwrap();

        assert_eq!(archive.read_count(), 1);
        assert!(!archive.was_read("FEC-8_ADC_OVERFLOW_0_0"));
        assert!(!scan.deep);
        assert_eq!(scan.flags.len(), 2);
        for flag in &scan.flags {
            assert_eq!(flag.known, SegmentList::single(0.0, 40.0));
            assert!(flag.active.is_empty());
        }
    }

    #[tokio::test]
    async fn test_deep_scan_reads_only_expanded_window() {
        let archive = MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                stream("FEC-8_ACCUM_OVERFLOW", &[10]),
                stream("FEC-8_ADC_OVERFLOW_0_0", &[11]),
                stream("FEC-8_ADC_OVERFLOW_0_1", &[30]),
            ],
        );
        let settings = OverflowSettings {
            mode: OverflowMode::Events,
            ..Default::default()
        };
        let scan = scan_unit(
            &archive,
            &archive_unit(),
            &unit(&["FEC-8_ADC_OVERFLOW_0_0", "FEC-8_ADC_OVERFLOW_0_1"]),
            Segment::new(0.0, 40.0),
            &settings,
            1,
        )
        .await
        .unwrap();

        assert!(scan.deep);
        assert_eq!(archive.read_count(), 2);
        assert_eq!(scan.flags[0].name, "FEC-8_ADC_OVERFLOW_0_0");
        assert_eq!(scan.flags[0].active, SegmentList::single(11.0, 12.0));
        assert_eq!(scan.flags[0].known, SegmentList::single(0.0, 40.0));
        // Outside the guard band, so never read
        assert!(scan.flags[1].active.is_empty());
        assert_eq!(
            scan.events,
            vec![("FEC-8_ADC_OVERFLOW_0_0".to_string(), vec![11.0])]
        );
    }

    #[tokio::test]
    async fn test_expansion_is_configurable() {
        let archive = MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                stream("FEC-8_ACCUM_OVERFLOW", &[10]),
                stream("FEC-8_ADC_OVERFLOW_0_0", &[14]),
            ],
        );
        let narrow = scan_unit(
            &archive,
            &archive_unit(),
            &unit(&["FEC-8_ADC_OVERFLOW_0_0"]),
            Segment::new(0.0, 40.0),
            &OverflowSettings::default(),
            1,
        )
        .await
        .unwrap();
        assert!(narrow.flags[0].active.is_empty());

        let wide = scan_unit(
            &archive,
            &archive_unit(),
            &unit(&["FEC-8_ADC_OVERFLOW_0_0"]),
            Segment::new(0.0, 40.0),
            &OverflowSettings {
                expansion: 5.0,
                ..Default::default()
            },
            1,
        )
        .await
        .unwrap();
        assert_eq!(wide.flags[0].active, SegmentList::single(14.0, 15.0));
    }

    #[tokio::test]
    async fn test_missing_member_is_dropped() {
        let archive = MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                stream("FEC-8_ACCUM_OVERFLOW", &[10]),
                stream("FEC-8_ADC_OVERFLOW_0_0", &[10]),
            ],
        );
        let scan = scan_unit(
            &archive,
            &archive_unit(),
            &unit(&["FEC-8_ADC_OVERFLOW_0_0", "FEC-8_ADC_OVERFLOW_0_9"]),
            Segment::new(0.0, 40.0),
            &OverflowSettings::default(),
            1,
        )
        .await
        .unwrap();
        assert_eq!(scan.flags.len(), 1);
        assert_eq!(scan.flags[0].active, SegmentList::single(10.0, 11.0));
    }

    fn scanner_archive() -> Arc<MemoryArchive> {
        Arc::new(MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                stream("FEC-8_ACCUM_OVERFLOW", &[25]),
                stream("FEC-8_ADC_OVERFLOW_0_0", &[25, 26]),
                stream("FEC-8_ADC_OVERFLOW_0_1", &[]),
                stream("FEC-9_ACCUM_OVERFLOW", &[]),
                stream("FEC-9_ADC_OVERFLOW_0_0", &[3]),
            ],
        ))
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            site: "L1".to_string(),
            stream_type: "L1_R".to_string(),
            start: 0.0,
            end: 40.0,
            state_flag: None,
            chunk_seconds: 20.0,
            max_batch: 16,
            round_segments: false,
        }
    }

    async fn run_scanner(
        archive: Arc<MemoryArchive>,
        settings: OverflowSettings,
        request: &AnalysisRequest,
        workers: usize,
    ) -> AnalysisOutcome {
        let scanner = OverflowScanner::new(
            archive.clone(),
            archive,
            None,
            settings,
            WorkerPool::new(workers),
        );
        scanner.run(request).await.unwrap()
    }

    async fn run_with(workers: usize) -> (AnalysisOutcome, Arc<MemoryArchive>) {
        let archive = scanner_archive();
        let outcome =
            run_scanner(archive.clone(), OverflowSettings::default(), &request(), workers).await;
        (outcome, archive)
    }

    #[tokio::test]
    async fn test_scanner_accumulates_chunks_and_units() {
        let (outcome, archive) = run_with(1).await;

        assert_eq!(outcome.monitored, 2);
        assert_eq!(outcome.flags.len(), 3);
        let hit = outcome.flags.get("FEC-8_ADC_OVERFLOW_0_0").unwrap();
        assert_eq!(hit.known, SegmentList::single(0.0, 40.0));
        assert_eq!(hit.active, SegmentList::single(25.0, 27.0));
        // FEC-9's indicator never fired, so its member was never read
        let quiet = outcome.flags.get("FEC-9_ADC_OVERFLOW_0_0").unwrap();
        assert!(quiet.active.is_empty());
        assert_eq!(quiet.known, SegmentList::single(0.0, 40.0));
        assert!(!archive.was_read("FEC-9_ADC_OVERFLOW_0_0"));
        // 2 chunks x 2 indicators + 1 deep read
        assert_eq!(archive.read_count(), 5);
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn test_scanner_parallel_matches_sequential() {
        let (sequential, _) = run_with(1).await;
        let (parallel, _) = run_with(3).await;
        assert_eq!(sequential.flags, parallel.flags);
    }

    #[tokio::test]
    async fn test_counter_step_on_chunk_start_is_caught() {
        let counter: Vec<f64> = (0..40).map(|i| if i < 20 { 0.0 } else { 1.0 }).collect();
        let archive = Arc::new(MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                SampleStream::new("FEC-8_ACCUM_OVERFLOW", 0.0, 1.0, DataType::Int32, counter),
                stream("FEC-8_ADC_OVERFLOW_0_0", &[20]),
            ],
        ));
        let settings = OverflowSettings {
            indicator_rule: OverflowRule::Increment,
            ..Default::default()
        };

        let outcome = run_scanner(archive.clone(), settings, &request(), 1).await;

        assert!(archive.was_read("FEC-8_ADC_OVERFLOW_0_0"));
        let member = outcome.flags.get("FEC-8_ADC_OVERFLOW_0_0").unwrap();
        assert_eq!(member.active, SegmentList::single(20.0, 21.0));
        assert_eq!(member.known, SegmentList::single(0.0, 40.0));
    }

    fn events_archive() -> Arc<MemoryArchive> {
        Arc::new(MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                stream("FEC-8_ACCUM_OVERFLOW", &[5, 25]),
                stream("FEC-8_ADC_OVERFLOW_0_0", &[5, 6, 25]),
                stream("FEC-8_ADC_OVERFLOW_0_1", &[]),
                stream("FEC-9_ACCUM_OVERFLOW", &[30]),
                stream("FEC-9_ADC_OVERFLOW_0_0", &[31]),
            ],
        ))
    }

    #[tokio::test]
    async fn test_events_accumulate_across_chunks_and_units() {
        let settings = OverflowSettings {
            mode: OverflowMode::Events,
            ..Default::default()
        };
        let outcome = run_scanner(events_archive(), settings, &request(), 3).await;

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events["FEC-8_ADC_OVERFLOW_0_0"], vec![5.0, 6.0, 25.0]);
        assert_eq!(outcome.events["FEC-9_ADC_OVERFLOW_0_0"], vec![31.0]);
        // Read and clean, so it has a flag but no event list
        assert!(!outcome.events.contains_key("FEC-8_ADC_OVERFLOW_0_1"));
        assert!(!outcome.flags.get("FEC-8_ADC_OVERFLOW_0_1").unwrap().is_faulted());
        assert_eq!(
            outcome.flags.get("FEC-8_ADC_OVERFLOW_0_0").unwrap().active,
            SegmentList::from_segments([Segment::new(5.0, 7.0), Segment::new(25.0, 26.0)])
        );
    }

    #[tokio::test]
    async fn test_rounded_segments_are_widened_to_seconds() {
        let mut indicator = vec![0.0; 160];
        indicator[101] = TOP;
        let at_4hz = |name: &str, values: Vec<f64>| {
            SampleStream::new(name, 0.0, 4.0, DataType::Int16, values)
        };
        let archive = Arc::new(MemoryArchive::new(
            Segment::new(0.0, 40.0),
            vec![
                at_4hz("FEC-8_ACCUM_OVERFLOW", indicator.clone()),
                at_4hz("FEC-8_ADC_OVERFLOW_0_0", indicator),
            ],
        ));
        let mut rounded = request();
        rounded.round_segments = true;

        let exact = run_scanner(archive.clone(), OverflowSettings::default(), &request(), 1).await;
        let widened = run_scanner(archive, OverflowSettings::default(), &rounded, 1).await;

        let name = "FEC-8_ADC_OVERFLOW_0_0";
        assert_eq!(exact.flags.get(name).unwrap().active, SegmentList::single(25.25, 25.5));
        assert_eq!(widened.flags.get(name).unwrap().active, SegmentList::single(25.0, 26.0));
        assert_eq!(widened.flags.get(name).unwrap().known, SegmentList::single(0.0, 40.0));
    }
}
