//! Rendering of scan results and validation outcomes
//!
//! Container results render as indented text or JSON. Outcome sets render as a
//! Markdown compatibility matrix (datasets by environments, followed by a
//! detail section per task), as CSV or as JSON. [`exit_code`] applies the CLI
//! convention: non-zero when any task failed or any scan found a problem.

use crate::error::ScanError;
use crate::structures::ContainerResult;
use crate::task::ValidationOutcome;
use crate::Result;
use csv::WriterBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

const PASS: &str = "✅";
const FAIL: &str = "❌";
const SKIPPED: &str = "⏭️";

/// Output formats for outcome sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutcomeFormat {
    #[default]
    Markdown,
    Csv,
    Json,
}

/// Render `outcomes` in `format`
pub fn render_outcomes(outcomes: &[ValidationOutcome], format: OutcomeFormat) -> Result<String> {
    match format {
        OutcomeFormat::Markdown => Ok(render_outcomes_markdown(outcomes)),
        OutcomeFormat::Csv => render_outcomes_csv(outcomes),
        OutcomeFormat::Json => render_json(outcomes),
    }
}

pub fn render_container_text(result: &ContainerResult) -> String {
    result.to_string()
}

/// Pretty JSON for any record
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Parse a container result previously rendered as JSON
pub fn parse_container_json(json: &str) -> Result<ContainerResult> {
    Ok(serde_json::from_str(json)?)
}

fn status_mark(outcome: &ValidationOutcome) -> &'static str {
    if outcome.is_clean() {
        PASS
    } else {
        FAIL
    }
}

/// Markdown matrix of datasets by environments plus per-task details
pub fn render_outcomes_markdown(outcomes: &[ValidationOutcome]) -> String {
    let mut environments: Vec<&str> = Vec::new();
    let mut datasets: BTreeMap<&str, BTreeMap<&str, &ValidationOutcome>> = BTreeMap::new();
    for outcome in outcomes {
        let env = outcome.task_id.environment.as_str();
        if !environments.contains(&env) {
            environments.push(env);
        }
        datasets
            .entry(outcome.task_id.dataset.as_str())
            .or_default()
            .insert(env, outcome);
    }

    let mut out = String::new();
    let _ = writeln!(out, "# Dataset Compatibility Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);

    let _ = write!(out, "| Dataset |");
    for env in &environments {
        let _ = write!(out, " {} |", env);
    }
    let _ = writeln!(out, " Location |");
    let _ = write!(out, "|---------|");
    for _ in &environments {
        let _ = write!(out, "--------|");
    }
    let _ = writeln!(out, "----------|");

    for (dataset, by_env) in &datasets {
        let _ = write!(out, "| {} |", dataset);
        for env in &environments {
            let mark = by_env.get(env).map_or(SKIPPED, |o| status_mark(o));
            let _ = write!(out, " {} |", mark);
        }
        let location = by_env.values().next().map_or("", |o| o.location.as_str());
        let _ = writeln!(out, " `{}` |", location);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Legend: {} Success | {} Failed | {} Not tested", PASS, FAIL, SKIPPED);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Detailed Results");
    let _ = writeln!(out);

    for (dataset, by_env) in &datasets {
        let _ = writeln!(out, "### {}", dataset);
        let _ = writeln!(out);
        for env in &environments {
            if let Some(outcome) = by_env.get(env) {
                write_outcome_detail(&mut out, env, outcome);
            }
        }
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
    }

    out
}

fn write_outcome_detail(out: &mut String, env: &str, outcome: &ValidationOutcome) {
    let _ = writeln!(out, "#### {}", env);
    let _ = writeln!(out);

    if !outcome.succeeded {
        let _ = writeln!(out, "**Status:** {} Failed", FAIL);
        let _ = writeln!(out);
        let kind = outcome.error_kind.map_or("Unknown", |k| k.as_str());
        let _ = writeln!(out, "**Error Type:** `{}`", kind);
        let _ = writeln!(out);
        let _ = writeln!(out, "**Error Message:**");
        let _ = writeln!(out, "```");
        let _ = writeln!(out, "{}", outcome.error_message.as_deref().unwrap_or("No error message"));
        let _ = writeln!(out, "```");
        let _ = writeln!(out);
        return;
    }

    let status = if outcome.is_clean() {
        "Success"
    } else {
        "Loaded, integrity problems found"
    };
    let _ = writeln!(out, "**Status:** {} {}", status_mark(outcome), status);
    let _ = writeln!(out);

    if let Some(summary) = &outcome.extracted_summary {
        if !summary.elements.is_empty() {
            let _ = writeln!(out, "**Elements:**");
            for (group, names) in &summary.elements {
                if names.is_empty() {
                    let _ = writeln!(out, "- {}: present", group);
                } else {
                    let _ = writeln!(out, "- {}: {}", group, names.join(", "));
                }
            }
            let _ = writeln!(out);
        }
        if !summary.coordinate_systems.is_empty() {
            let _ = writeln!(out, "**Coordinate Systems:** {}", summary.coordinate_systems.join(", "));
            let _ = writeln!(out);
        }
    }

    if let Some(integrity) = &outcome.integrity {
        let _ = writeln!(
            out,
            "**Integrity:** {} element(s), {} chunk(s) checked, {} invalid, {} structural error(s)",
            integrity.elements().len(),
            integrity.total_chunks_checked(),
            integrity.invalid_elements().count(),
            integrity.structural_errors().len()
        );
        let _ = writeln!(out);
        if !integrity.is_valid() {
            let _ = writeln!(out, "```");
            let _ = writeln!(out, "{}", integrity);
            let _ = writeln!(out, "```");
            let _ = writeln!(out);
        }
    }
}

/// One row per outcome
pub fn render_outcomes_csv(outcomes: &[ValidationOutcome]) -> Result<String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record([
        "Dataset",
        "Location",
        "Environment",
        "Success",
        "State",
        "Error Type",
        "Error Message",
        "Elements",
        "Coordinate Systems",
        "Integrity Valid",
        "Chunks Checked",
        "Elapsed Ms",
    ])?;

    for outcome in outcomes {
        let (elements, coordinate_systems) = match &outcome.extracted_summary {
            Some(summary) => (
                if summary.elements.is_empty() {
                    String::new()
                } else {
                    serde_json::to_string(&summary.elements)?
                },
                if summary.coordinate_systems.is_empty() {
                    String::new()
                } else {
                    serde_json::to_string(&summary.coordinate_systems)?
                },
            ),
            None => (String::new(), String::new()),
        };
        let (integrity_valid, chunks_checked) = match &outcome.integrity {
            Some(integrity) => (
                integrity.is_valid().to_string(),
                integrity.total_chunks_checked().to_string(),
            ),
            None => (String::new(), String::new()),
        };

        writer.write_record([
            outcome.task_id.dataset.clone(),
            outcome.location.clone(),
            outcome.task_id.environment.clone(),
            outcome.succeeded.to_string(),
            format!("{:?}", outcome.state()),
            outcome.error_kind.map(|k| k.to_string()).unwrap_or_default(),
            outcome.error_message.clone().unwrap_or_default(),
            elements,
            coordinate_systems,
            integrity_valid,
            chunks_checked,
            outcome.elapsed_ms.to_string(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|err| ScanError::Io(err.into_error()))?;
    String::from_utf8(bytes).map_err(|e| ScanError::Report(format!("CSV output is not UTF-8: {}", e)))
}

/// Process exit status for a finished run
pub fn exit_code(outcomes: &[ValidationOutcome]) -> i32 {
    if outcomes.iter().all(ValidationOutcome::is_clean) {
        0
    } else {
        1
    }
}
