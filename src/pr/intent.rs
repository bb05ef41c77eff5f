use serde::{Deserialize, Serialize};

/// Structured summary of what a pull request is for.
///
/// Field names follow the camelCase JSON the extraction prompt asks the
/// model for, so the same shape round-trips through the intent cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestIntent {
    pub problem_being_solved: String,
    pub affected_component: String,
    pub behavioral_change: String,
    pub change_type: ChangeType,
    pub change_magnitude: ChangeMagnitude,
    #[serde(default)]
    pub key_changes: KeyChanges,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyChanges {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Bugfix,
    Feature,
    Refactor,
    Performance,
    Docs,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMagnitude {
    Minor,
    Moderate,
    Major,
}

impl PullRequestIntent {
    /// Placeholder intent recorded when extraction fails, so later runs for
    /// the same head commit don't hit the model again.
    pub fn fallback(pr_number: u64, reason: &str, files: Vec<String>) -> Self {
        Self {
            problem_being_solved: format!("Analysis failed for PR #{}: {}", pr_number, reason),
            affected_component: "unknown".to_string(),
            behavioral_change: "unknown".to_string(),
            change_type: ChangeType::Refactor,
            change_magnitude: ChangeMagnitude::Minor,
            key_changes: KeyChanges {
                files,
                functions: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_model_json() {
        let value = serde_json::json!({
            "problemBeingSolved": "Login fails with special characters",
            "affectedComponent": "Auth",
            "behavioralChange": "Passwords are escaped before hashing",
            "changeType": "bugfix",
            "changeMagnitude": "minor",
            "keyChanges": { "files": ["src/auth.rs"], "functions": ["hash_password"] }
        });
        let intent: PullRequestIntent = serde_json::from_value(value).unwrap();
        assert_eq!(intent.change_type, ChangeType::Bugfix);
        assert_eq!(intent.key_changes.functions, vec!["hash_password"]);
    }

    #[test]
    fn test_missing_key_changes_defaults_to_empty() {
        let value = serde_json::json!({
            "problemBeingSolved": "p",
            "affectedComponent": "c",
            "behavioralChange": "b",
            "changeType": "docs",
            "changeMagnitude": "major"
        });
        let intent: PullRequestIntent = serde_json::from_value(value).unwrap();
        assert!(intent.key_changes.files.is_empty());
    }

    #[test]
    fn test_rejects_unknown_change_type() {
        let value = serde_json::json!({
            "problemBeingSolved": "p",
            "affectedComponent": "c",
            "behavioralChange": "b",
            "changeType": "chore",
            "changeMagnitude": "minor"
        });
        assert!(serde_json::from_value::<PullRequestIntent>(value).is_err());
    }

    #[test]
    fn test_fallback_defaults() {
        let intent = PullRequestIntent::fallback(9, "timeout", vec!["a.rs".to_string()]);
        assert!(intent.problem_being_solved.contains("Analysis failed for PR #9"));
        assert_eq!(intent.change_type, ChangeType::Refactor);
        assert_eq!(intent.change_magnitude, ChangeMagnitude::Minor);
        assert_eq!(intent.affected_component, "unknown");
        assert_eq!(intent.behavioral_change, "unknown");
        assert_eq!(intent.key_changes.files, vec!["a.rs"]);
    }
}
