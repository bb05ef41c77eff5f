use std::cmp::Ordering;
use std::collections::BTreeSet;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, instrument, warn};

use super::embeddings::EmbeddingCandidate;
use super::{PipelineError, RunContext};
use crate::config::MonorepoConfig;
use crate::pr::packages::{is_unscoped, map_files_to_packages};
use crate::store::VectorStore;

/// A candidate that survived the file-overlap filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOverlap {
    pub pr_number: u64,
    /// Jaccard similarity of the two changed-file sets
    pub score: f64,
    /// Files changed by both PRs, sorted
    pub matched_files: Vec<String>,
}

/// Stage 2: keep candidates whose changed files overlap the PR's enough.
///
/// In monorepo mode a candidate is dropped before scoring when it touches
/// none of the PR's packages, unless either side touches the root or a
/// shared package. Candidates whose file list was never stored score 0.
#[instrument(skip_all, fields(repo = %ctx.pr.repo_full_name, pr = ctx.pr.number, candidates = candidates.len()))]
pub async fn narrow(
    ctx: &RunContext<'_>,
    candidates: &[EmbeddingCandidate],
    vectors: &dyn VectorStore,
) -> Result<Vec<FileOverlap>, PipelineError> {
    let (pr, config) = (ctx.pr, ctx.config);
    let ignored = ignore_set(&config.ignore_files);
    let source_files = file_set(pr.files.iter().map(|f| f.path.as_str()), &ignored);
    let source_scoped = !is_unscoped(&pr.packages_touched, &config.monorepo);

    let mut results = Vec::new();
    for candidate in candidates {
        let files = match vectors
            .changed_files(&pr.repo_full_name, candidate.pr_number)
            .await?
        {
            Some(files) => files,
            None => {
                debug!(candidate = candidate.pr_number, "no stored file list");
                Vec::new()
            }
        };

        if source_scoped {
            let candidate_packages = map_files_to_packages(&files, &config.monorepo);
            if !packages_compatible(&pr.packages_touched, &candidate_packages, &config.monorepo) {
                debug!(
                    candidate = candidate.pr_number,
                    packages = ?candidate_packages,
                    "skipping candidate in unrelated packages"
                );
                continue;
            }
        }

        let candidate_files = file_set(files.iter().map(String::as_str), &ignored);
        let score = jaccard(&source_files, &candidate_files);
        if score >= config.cheap_score_threshold {
            results.push(FileOverlap {
                pr_number: candidate.pr_number,
                score,
                matched_files: source_files
                    .intersection(&candidate_files)
                    .map(|f| f.to_string())
                    .collect(),
            });
        }
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    info!(cheap_matches = results.len(), "file overlap");
    Ok(results)
}

/// `|A ∩ B| / |A ∪ B|`, defined as 0 when both sets are empty.
pub fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Whether two package sets may describe the same change.
pub fn packages_compatible(source: &[String], candidate: &[String], config: &MonorepoConfig) -> bool {
    is_unscoped(source, config)
        || is_unscoped(candidate, config)
        || source.iter().any(|p| candidate.contains(p))
}

fn file_set<'a>(paths: impl Iterator<Item = &'a str>, ignored: &GlobSet) -> BTreeSet<&'a str> {
    paths.filter(|p| !ignored.is_match(p)).collect()
}

fn ignore_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "ignoring invalid ignore_files pattern"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "failed to build ignore_files matcher");
        GlobSet::empty()
    })
}
