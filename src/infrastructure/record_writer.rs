// Interval-record file: one row of known/active segments per channel
use crate::application::analysis_request::{AnalysisKind, AnalysisOutcome, AnalysisRequest};
use crate::domain::segments::SegmentList;
use anyhow::Context;
use async_compression::tokio::bufread::BrotliEncoder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

#[derive(Serialize)]
struct IntervalRecord<'a> {
    site: &'a str,
    analysis: &'static str,
    start: f64,
    end: f64,
    analyzed: &'a SegmentList,
    rows: Vec<RecordRow<'a>>,
}

#[derive(Serialize)]
struct RecordRow<'a> {
    name: &'a str,
    known: &'a SegmentList,
    active: &'a SegmentList,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<&'a Vec<f64>>,
}

/// `{SITE}-{TAG}-{START}-{DURATION}`, with whole-second start and duration.
pub fn artifact_stem(site: &str, kind: AnalysisKind, start: f64, duration: f64) -> String {
    format!(
        "{}-{}-{}-{}",
        site,
        kind.tag(),
        start.floor() as i64,
        duration.ceil() as i64
    )
}

/// Writes the record as JSON into `directory`, Brotli-compressed with a
/// `.br` suffix when `compress` is set. Returns the written path.
pub async fn write_interval_record(
    directory: &Path,
    kind: AnalysisKind,
    request: &AnalysisRequest,
    outcome: &AnalysisOutcome,
    compress: bool,
) -> anyhow::Result<PathBuf> {
    let record = IntervalRecord {
        site: &request.site,
        analysis: kind.tag(),
        start: request.start,
        end: request.end,
        analyzed: &outcome.analyzed,
        rows: outcome
            .flags
            .flags()
            .map(|flag| RecordRow {
                name: &flag.name,
                known: &flag.known,
                active: &flag.active,
                events: outcome.events.get(&flag.name),
            })
            .collect(),
    };
    let json = serde_json::to_vec_pretty(&record).context("failed to serialize interval record")?;

    let stem = artifact_stem(&request.site, kind, request.start, request.duration());
    let (path, payload) = if compress {
        let mut encoder = BrotliEncoder::new(std::io::Cursor::new(json));
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).await?;
        (directory.join(format!("{}.json.br", stem)), compressed)
    } else {
        (directory.join(format!("{}.json", stem)), json)
    };

    tokio::fs::create_dir_all(directory)
        .await
        .with_context(|| format!("failed to create {}", directory.display()))?;
    tokio::fs::write(&path, &payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("Wrote interval record to {} ({} bytes)", path.display(), payload.len());
    Ok(path)
}
