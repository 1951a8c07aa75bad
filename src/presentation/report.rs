// Human-readable run summary
use crate::application::analysis_request::{AnalysisKind, AnalysisOutcome, AnalysisRequest};
use crate::infrastructure::record_writer::artifact_stem;
use anyhow::Context;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Markdown summary of the analyzed span, run parameters, pass/fail counts
/// and every faulted channel.
pub fn render_report(
    kind: AnalysisKind,
    request: &AnalysisRequest,
    outcome: &AnalysisOutcome,
    parameters: &[(String, String)],
) -> String {
    let mut out = String::new();
    let faulted: Vec<_> = outcome.flags.faulted().collect();
    let total = outcome.flags.len();

    let _ = writeln!(out, "# {} - {}\n", request.site, kind.title());
    let _ = writeln!(
        out,
        "Requested span: [{}, {}) ({:.0} s), analyzed {:.0} s in {} segments.\n",
        request.start,
        request.end,
        request.duration(),
        outcome.analyzed.total_duration(),
        outcome.analyzed.len()
    );

    let _ = writeln!(out, "## Parameters\n");
    let _ = writeln!(out, "| Parameter | Value |\n|---|---|");
    for (name, value) in parameters {
        let _ = writeln!(out, "| {} | {} |", name, value);
    }

    let _ = writeln!(out, "\n## Summary\n");
    let _ = writeln!(out, "- Units monitored: {}", outcome.monitored);
    let _ = writeln!(out, "- Channels analyzed: {}", total);
    let _ = writeln!(out, "- Passed: {}", total - faulted.len());
    let _ = writeln!(out, "- Failed: {}", faulted.len());

    if faulted.is_empty() {
        let _ = writeln!(out, "\nNo faults found.");
        return out;
    }

    let with_events = !outcome.events.is_empty();
    let _ = writeln!(out, "\n## Faulted channels\n");
    if with_events {
        let _ = writeln!(out, "| Channel | Active (s) | Segments | Events |\n|---|---|---|---|");
    } else {
        let _ = writeln!(out, "| Channel | Active (s) | Segments |\n|---|---|---|");
    }
    for flag in faulted {
        let _ = write!(
            out,
            "| {} | {:.3} | {} |",
            flag.name,
            flag.active.total_duration(),
            flag.active.len()
        );
        if with_events {
            let count = outcome.events.get(&flag.name).map_or(0, Vec::len);
            let _ = write!(out, " {} |", count);
        }
        out.push('\n');
    }
    out
}

pub async fn write_report(
    directory: &Path,
    kind: AnalysisKind,
    request: &AnalysisRequest,
    body: &str,
) -> anyhow::Result<PathBuf> {
    let stem = artifact_stem(&request.site, kind, request.start, request.duration());
    let path = directory.join(format!("{}.md", stem));
    tokio::fs::create_dir_all(directory)
        .await
        .with_context(|| format!("failed to create {}", directory.display()))?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("Wrote report to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flag::{FaultFlag, FaultFlagMap};
    use crate::domain::segments::{Segment, SegmentList};

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            site: "L1".to_string(),
            stream_type: "L1_R".to_string(),
            start: 0.0,
            end: 100.0,
            state_flag: None,
            chunk_seconds: 100.0,
            max_batch: 8,
            round_segments: false,
        }
    }

    #[test]
    fn test_report_counts() {
        let mut flags = FaultFlagMap::new();
        flags.merge(FaultFlag::new(
            "SUS-ETMX_L1_LOCK_L_LIMIT",
            SegmentList::single(0.0, 100.0),
            SegmentList::from_segments([Segment::new(1.0, 2.5), Segment::new(50.0, 51.0)]),
        ));
        flags.merge(FaultFlag::clean("SUS-ETMY_L1_LOCK_L_LIMIT", Segment::new(0.0, 100.0)));
        let outcome = AnalysisOutcome {
            flags,
            analyzed: SegmentList::single(0.0, 100.0),
            monitored: 2,
            ..Default::default()
        };

        let report = render_report(
            AnalysisKind::Saturations,
            &request(),
            &outcome,
            &[("precision".to_string(), "0.99".to_string())],
        );

        assert!(report.starts_with("# L1 - Software saturations"));
        assert!(report.contains("| precision | 0.99 |"));
        assert!(report.contains("- Passed: 1"));
        assert!(report.contains("- Failed: 1"));
        assert!(report.contains("| SUS-ETMX_L1_LOCK_L_LIMIT | 2.500 | 2 |"));
        assert!(!report.contains("SUS-ETMY_L1_LOCK_L_LIMIT |"));
    }

    #[test]
    fn test_clean_report() {
        let outcome = AnalysisOutcome::default();
        let report = render_report(AnalysisKind::Overflows, &request(), &outcome, &[]);
        assert!(report.contains("No faults found."));
        assert!(report.contains("- Channels analyzed: 0"));
    }
}
