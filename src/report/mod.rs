pub mod types;

pub use types::{MatchLine, Report, Verdict};

use crate::pipeline::{AnalysisOutcome, Decision};
use crate::pr::PullRequestData;
use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Build a Report from a finished analysis and the PR it ran on.
pub fn build(outcome: &AnalysisOutcome, pr: &PullRequestData) -> Report {
    let (verdict, threshold, mut matches) = match outcome {
        AnalysisOutcome::Disabled | AnalysisOutcome::QuickExit(_) => {
            (Verdict::Skipped, None, Vec::new())
        }
        AnalysisOutcome::NoCandidates | AnalysisOutcome::NoCheapMatches { .. } => {
            (Verdict::Unique, None, Vec::new())
        }
        AnalysisOutcome::Decided {
            decision,
            threshold,
            matches,
        } => {
            let verdict = match decision {
                Decision::CommentDuplicate { pr_number, .. } => Verdict::Duplicate(*pr_number),
                Decision::NoAction => Verdict::Unique,
            };
            let lines = matches
                .iter()
                .map(|m| MatchLine {
                    pr_number: m.pr_number,
                    confidence: m.final_confidence,
                    problem_similarity: m.scores.problem_similarity,
                    component_overlap: m.scores.component_overlap,
                    behavioral_equivalence: m.scores.behavioral_equivalence,
                    justification: m.justification.clone(),
                    file_overlap: m.file_overlap,
                    matched_files: m.matched_files.clone(),
                })
                .collect();
            (verdict, Some(*threshold), lines)
        }
    };
    matches.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Report {
        repo_full_name: pr.repo_full_name.clone(),
        pr_number: pr.number,
        pr_title: pr.title.clone(),
        author: pr.author.clone(),
        draft: pr.is_draft,
        opened_at: pr.created_at,
        updated_at: pr.updated_at,
        files_changed: pr.files.len(),
        additions: pr.files.iter().map(|f| f.additions).sum(),
        deletions: pr.files.iter().map(|f| f.deletions).sum(),
        summary: outcome.to_string(),
        verdict,
        threshold,
        matches,
    }
}

/// Output the report to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(pr = report.pr_number, verdict = %report.verdict))]
pub fn output(report: &Report, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            write_markdown_report(report, path)
        }
    }
}

fn print_terminal_report(report: &Report) {
    println!();
    println!(
        "{} PR #{}: \"{}\"",
        report.repo_full_name, report.pr_number, report.pr_title
    );
    println!(
        "Author: {} | Files changed: {} | +{} -{}",
        report.author, report.files_changed, report.additions, report.deletions
    );
    println!("{}", activity_line(report));
    println!("Outcome: {}", report.summary);
    println!();

    if !report.matches.is_empty() {
        println!("═══ Semantic Matches ═══");
        for line in &report.matches {
            println!(
                "  • PR #{} ({}) {}",
                line.pr_number,
                format_confidence(line.confidence, report.threshold),
                line.justification
            );
            println!(
                "    problem {:.2} | behavior {:.2} | component {:.2} | file overlap {:.2}",
                line.problem_similarity,
                line.behavioral_equivalence,
                line.component_overlap,
                line.file_overlap
            );
            if !line.matched_files.is_empty() {
                println!("    Shared files: {}", line.matched_files.join(", "));
            }
        }
        if let Some(threshold) = report.threshold {
            println!("  Threshold: {:.2}", threshold);
        }
        println!();
    }

    println!("═══ Verdict: {} ═══", colorize_verdict(&report.verdict));
    println!();
}

fn write_markdown_report(report: &Report, path: &Path) -> Result<(), ReportError> {
    let mut md = String::new();
    md.push_str(&format!(
        "# {} PR #{}: \"{}\"\n\n",
        report.repo_full_name, report.pr_number, report.pr_title
    ));
    md.push_str(&format!(
        "**Author:** {} | **Files changed:** {} | **+{} -{}**\n\n",
        report.author, report.files_changed, report.additions, report.deletions
    ));
    md.push_str(&format!("{}\n\n", activity_line(report)));
    md.push_str(&format!("**Outcome:** {}\n\n", report.summary));

    if !report.matches.is_empty() {
        md.push_str("## Semantic Matches\n\n");
        md.push_str(
            "| PR | Confidence | Problem | Behavior | Component | File overlap | Justification |\n\
             |----|-----------|---------|----------|-----------|--------------|---------------|\n",
        );
        for line in &report.matches {
            md.push_str(&format!(
                "| #{} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {} |\n",
                line.pr_number,
                line.confidence,
                line.problem_similarity,
                line.behavioral_equivalence,
                line.component_overlap,
                line.file_overlap,
                line.justification.replace('|', "\\|")
            ));
        }
        md.push('\n');
        for line in report.matches.iter().filter(|l| !l.matched_files.is_empty()) {
            md.push_str(&format!("### Shared files with #{}\n\n", line.pr_number));
            for file in &line.matched_files {
                md.push_str(&format!("- `{}`\n", file));
            }
            md.push('\n');
        }
        if let Some(threshold) = report.threshold {
            md.push_str(&format!("Decision threshold: {:.2}\n\n", threshold));
        }
    }

    md.push_str(&format!("## Verdict: {}\n", report.verdict));

    std::fs::write(path, md)?;
    Ok(())
}

fn activity_line(report: &Report) -> String {
    format!(
        "{}Opened {} | Updated {}",
        if report.draft { "Draft | " } else { "" },
        report.opened_at.format("%Y-%m-%d %H:%M UTC"),
        report.updated_at.format("%Y-%m-%d %H:%M UTC")
    )
}

fn format_confidence(confidence: f64, threshold: Option<f64>) -> colored::ColoredString {
    let text = format!("{:.2}", confidence);
    match threshold {
        Some(t) if confidence > t => text.red().bold(),
        _ => text.normal(),
    }
}

fn colorize_verdict(verdict: &Verdict) -> colored::ColoredString {
    let text = verdict.to_string();
    match verdict {
        Verdict::Duplicate(_) => text.red().bold(),
        Verdict::Unique => text.green().bold(),
        Verdict::Skipped => text.yellow().bold(),
    }
}
