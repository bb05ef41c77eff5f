use super::RunContext;

/// Login suffix GitHub gives app and bot accounts.
const BOT_SUFFIX: &str = "[bot]";

/// Why a PR was skipped without analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    AuthorIsBot,
    AuthorBypass,
    IgnoredLabel,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::AuthorIsBot => "author_is_bot",
            ExitReason::AuthorBypass => "author_bypass",
            ExitReason::IgnoredLabel => "ignored_label",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage 0: cheap checks that end the run before any I/O.
/// The first matching check wins.
pub fn check(ctx: &RunContext<'_>) -> Option<ExitReason> {
    let (pr, config) = (ctx.pr, ctx.config);

    if pr.author.ends_with(BOT_SUFFIX) {
        return Some(ExitReason::AuthorIsBot);
    }
    if config.bypass_authors.iter().any(|a| a == &pr.author) {
        return Some(ExitReason::AuthorBypass);
    }
    if pr
        .labels
        .iter()
        .any(|label| config.ignore_labels.contains(label))
    {
        return Some(ExitReason::IgnoredLabel);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::testing::sample_pr;

    fn run(author: &str, labels: &[&str], config: &RepoConfig) -> Option<ExitReason> {
        let mut pr = sample_pr(1, &["src/lib.rs"]);
        pr.author = author.to_string();
        pr.labels = labels.iter().map(|l| l.to_string()).collect();
        check(&RunContext { pr: &pr, config })
    }

    #[test]
    fn test_bot_author_exits() {
        let config = RepoConfig::default();
        assert_eq!(run("dependabot[bot]", &[], &config), Some(ExitReason::AuthorIsBot));
        assert_eq!(run("botanist", &[], &config), None);
    }

    #[test]
    fn test_bypass_author_exits() {
        let config = RepoConfig {
            bypass_authors: vec!["release-manager".to_string()],
            ..RepoConfig::default()
        };
        assert_eq!(run("release-manager", &[], &config), Some(ExitReason::AuthorBypass));
        assert_eq!(run("alice", &[], &config), None);
    }

    #[test]
    fn test_bot_check_runs_before_bypass() {
        let config = RepoConfig {
            bypass_authors: vec!["renovate[bot]".to_string()],
            ..RepoConfig::default()
        };
        assert_eq!(run("renovate[bot]", &[], &config), Some(ExitReason::AuthorIsBot));
    }

    #[test]
    fn test_ignored_label_independent_of_author() {
        let config = RepoConfig {
            ignore_labels: vec!["skip-dedup".to_string(), "wip".to_string()],
            ..RepoConfig::default()
        };
        for author in ["alice", "bob"] {
            assert_eq!(
                run(author, &["bug", "wip"], &config),
                Some(ExitReason::IgnoredLabel)
            );
            assert_eq!(run(author, &["bug"], &config), None);
        }
    }

    #[test]
    fn test_empty_labels_never_trigger() {
        let config = RepoConfig {
            ignore_labels: vec!["wip".to_string()],
            ..RepoConfig::default()
        };
        assert_eq!(run("alice", &[], &config), None);
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(ExitReason::AuthorIsBot.to_string(), "author_is_bot");
        assert_eq!(ExitReason::AuthorBypass.to_string(), "author_bypass");
        assert_eq!(ExitReason::IgnoredLabel.to_string(), "ignored_label");
    }
}
