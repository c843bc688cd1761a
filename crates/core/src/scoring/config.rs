//! Configuration for result enrichment.

use serde::{Deserialize, Serialize};

/// Tags attached to a result when its text mentions a keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    /// Matched case-insensitively anywhere in the text.
    pub keyword: String,
    pub tags: Vec<String>,
}

/// Enrichment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Tags used when no rule matches.
    #[serde(default = "default_tags")]
    pub default_tags: Vec<String>,

    #[serde(default = "default_tag_rules")]
    pub tag_rules: Vec<TagRule>,
}

fn default_tags() -> Vec<String> {
    vec!["general".to_string()]
}

fn default_tag_rules() -> Vec<TagRule> {
    vec![TagRule {
        keyword: "money".to_string(),
        tags: vec!["finance".to_string(), "risk".to_string()],
    }]
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_tags: default_tags(),
            tag_rules: default_tag_rules(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScoringConfig::default();
        assert_eq!(config.default_tags, vec!["general"]);
        assert_eq!(config.tag_rules.len(), 1);
        assert_eq!(config.tag_rules[0].keyword, "money");
    }

    #[test]
    fn test_deserialize_rules() {
        let config: ScoringConfig = toml::from_str(
            r#"
default_tags = ["other"]

[[tag_rules]]
keyword = "refund"
tags = ["billing"]

[[tag_rules]]
keyword = "lawyer"
tags = ["legal", "risk"]
"#,
        )
        .unwrap();
        assert_eq!(config.default_tags, vec!["other"]);
        assert_eq!(config.tag_rules.len(), 2);
        assert_eq!(config.tag_rules[1].tags, vec!["legal", "risk"]);
    }
}
