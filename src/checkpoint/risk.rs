use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Risk assessment for a single candidate operation. Stateless; computed on
/// demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRisk {
    pub is_risky: bool,
    pub category: Option<String>,
    pub level: RiskLevel,
    pub requires_checkpoint: bool,
    pub mitigation: Option<String>,
}

impl OperationRisk {
    fn safe() -> Self {
        Self {
            is_risky: false,
            category: None,
            level: RiskLevel::Low,
            requires_checkpoint: false,
            mitigation: None,
        }
    }
}

/// One entry in the ordered risk-rule table. Rules are data, not code, so the
/// table can be tuned per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRule {
    pub pattern: String,
    pub category: String,
    pub level: RiskLevel,
    pub mitigation: String,
}

impl RiskRule {
    pub fn new(pattern: &str, category: &str, level: RiskLevel, mitigation: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            category: category.to_string(),
            level,
            mitigation: mitigation.to_string(),
        }
    }
}

/// Matches operation text against an ordered rule table; the first matching
/// rule wins and unmatched text is not risky.
pub struct RiskClassifier {
    rules: Vec<(Regex, RiskRule)>,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

impl RiskClassifier {
    pub fn new(rules: Vec<RiskRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(re) => Some((re, rule)),
                Err(error) => {
                    warn!(pattern = %rule.pattern, %error, "skipping invalid risk rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn default_rules() -> Vec<RiskRule> {
        vec![
            RiskRule::new(
                r"(?i)git\s+push\s+.*(--force|-f\b)",
                "git_push",
                RiskLevel::High,
                "create a checkpoint and verify the remote branch before force-pushing",
            ),
            RiskRule::new(
                r"(?i)git\s+(rebase|filter-branch|reset\s+--hard|commit\s+--amend)",
                "git_history_rewrite",
                RiskLevel::High,
                "checkpoint first; rewritten history cannot be recovered from the reflog forever",
            ),
            RiskRule::new(
                r"(?i)(rm\s+-rf?\b|delete\s+(all|every|the)\s+\w*\s*(files|director)|remove\s+recursively)",
                "file_deletion",
                RiskLevel::Critical,
                "checkpoint and double-check the target path before deleting",
            ),
            RiskRule::new(
                r"(?i)(drop\s+(table|database|schema)|truncate\s+table?)",
                "database_migration",
                RiskLevel::Critical,
                "take a database backup and a checkpoint before destructive schema changes",
            ),
            RiskRule::new(
                r"(?i)(alter\s+table|run\s+migrations?|database\s+migration)",
                "database_migration",
                RiskLevel::High,
                "checkpoint before applying migrations so the schema change can be reverted",
            ),
            RiskRule::new(
                r"(?i)(sed\s+-i|find\s+.*-exec|(bulk|mass|global)\s+(update|replace|rename)|replace\s+all\b)",
                "bulk_modification",
                RiskLevel::Medium,
                "checkpoint before bulk edits; verify a sample of the changes afterwards",
            ),
        ]
    }

    pub fn classify(&self, operation: &str) -> OperationRisk {
        for (re, rule) in &self.rules {
            if re.is_match(operation) {
                return OperationRisk {
                    is_risky: true,
                    category: Some(rule.category.clone()),
                    level: rule.level,
                    requires_checkpoint: rule.level >= RiskLevel::Medium,
                    mitigation: Some(rule.mitigation.clone()),
                };
            }
        }
        OperationRisk::safe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_push_is_high_risk_git_push() {
        let risk = RiskClassifier::default().classify("git push --force origin main");
        assert!(risk.is_risky);
        assert_eq!(risk.category.as_deref(), Some("git_push"));
        assert_eq!(risk.level, RiskLevel::High);
        assert!(risk.requires_checkpoint);
        assert!(risk.mitigation.is_some());
    }

    #[test]
    fn git_status_is_not_risky() {
        let risk = RiskClassifier::default().classify("git status");
        assert!(!risk.is_risky);
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(!risk.requires_checkpoint);
        assert!(risk.category.is_none());
    }

    #[test]
    fn drop_table_is_critical() {
        let risk = RiskClassifier::default().classify("DROP TABLE users");
        assert_eq!(risk.level, RiskLevel::Critical);
        assert_eq!(risk.category.as_deref(), Some("database_migration"));
    }

    #[test]
    fn bulk_replace_is_medium() {
        let risk = RiskClassifier::default().classify("bulk replace of the logger name");
        assert_eq!(risk.level, RiskLevel::Medium);
        assert_eq!(risk.category.as_deref(), Some("bulk_modification"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let risk = RiskClassifier::default().classify("git push --force after rebase");
        assert_eq!(risk.category.as_deref(), Some("git_push"));
    }

    #[test]
    fn invalid_patterns_are_skipped_not_fatal() {
        let classifier = RiskClassifier::new(vec![RiskRule::new(
            r"([unclosed",
            "broken",
            RiskLevel::High,
            "n/a",
        )]);
        assert!(!classifier.classify("anything").is_risky);
    }
}
