use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use contrack_core::Platform;
use tokio::fs;

use crate::aggregate::AggregationOutcome;

/// Writes `run_brief.md` and `run_outcome.json` under `<reports_dir>/<run_id>/`. Registry notes
/// for the platforms touched by the run are listed in the brief.
pub async fn write_run_report(
    reports_dir: &Path,
    outcome: &AggregationOutcome,
    source_notes: &BTreeMap<Platform, String>,
) -> Result<PathBuf> {
    let run_dir = reports_dir.join(outcome.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    fs::write(run_dir.join("run_brief.md"), render_brief(outcome, source_notes))
        .await
        .context("writing run_brief.md")?;

    let json = serde_json::to_vec_pretty(outcome).context("serializing run outcome")?;
    fs::write(run_dir.join("run_outcome.json"), json)
        .await
        .context("writing run_outcome.json")?;

    Ok(run_dir)
}

fn render_brief(outcome: &AggregationOutcome, source_notes: &BTreeMap<Platform, String>) -> String {
    let mut rejected: BTreeMap<Platform, usize> = BTreeMap::new();
    for record in &outcome.rejected {
        *rejected.entry(record.platform).or_default() += 1;
    }

    let mut lines = vec![
        "# Contest Tracker Run Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", outcome.run_id),
        format!("- Sequence: {}", outcome.sequence),
        format!("- Started: {}", outcome.started_at),
        format!("- Finished: {}", outcome.finished_at),
        format!("- Disposition: {:?}", outcome.disposition),
        format!("- Contests in batch: {}", outcome.contests_in_batch),
    ];
    if let Some(summary) = &outcome.reconcile {
        lines.push(format!(
            "- Inserted: {} / updated: {} / unchanged: {} / retained: {}",
            summary.applied_inserts, summary.applied_updates, summary.unchanged, summary.retained
        ));
    }
    if let Some(notice) = &outcome.notice {
        lines.push(format!("- Notice: {notice}"));
    }

    lines.push(String::new());
    lines.push("## Sources".to_string());
    for ok in &outcome.sources_ok {
        lines.push(format!(
            "- {}: {} drafts, {} skipped upstream, {} rejected",
            ok.platform.display_name(),
            ok.drafts,
            ok.skipped,
            rejected.get(&ok.platform).copied().unwrap_or(0)
        ));
    }
    for failed in &outcome.failed_sources {
        lines.push(format!("- {}: FAILED ({})", failed.platform.display_name(), failed.reason));
    }

    let noted = outcome
        .sources_ok
        .iter()
        .map(|s| s.platform)
        .chain(outcome.failed_sources.iter().map(|f| f.platform))
        .filter_map(|platform| source_notes.get(&platform).map(|note| (platform, note)))
        .collect::<BTreeMap<_, _>>();
    if !noted.is_empty() {
        lines.push(String::new());
        lines.push("## Source Notes".to_string());
        for (platform, note) in noted {
            lines.push(format!("- {}: {note}", platform.display_name()));
        }
    }

    if !outcome.rejected.is_empty() {
        lines.push(String::new());
        lines.push("## Rejected Records".to_string());
        for record in &outcome.rejected {
            lines.push(format!(
                "- {} `{}`: {}",
                record.platform.display_name(),
                record.native_id,
                record.reason
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}
