//! Summary and tags attached to completed results.

use super::config::ScoringConfig;

/// Enrichment for one transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub summary: String,
    pub tags: Vec<String>,
}

/// Derives summary and tags from transcript text.
#[derive(Debug, Clone)]
pub struct Enricher {
    default_tags: Vec<String>,
    /// Rules with lowercased keywords.
    rules: Vec<(String, Vec<String>)>,
}

impl Enricher {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            default_tags: config.default_tags.clone(),
            rules: config
                .tag_rules
                .iter()
                .map(|rule| (rule.keyword.to_lowercase(), rule.tags.clone()))
                .collect(),
        }
    }

    pub fn enrich(&self, text: &str) -> Enrichment {
        let lowered = text.to_lowercase();
        let mut tags: Vec<String> = Vec::new();
        for (keyword, rule_tags) in &self.rules {
            if lowered.contains(keyword.as_str()) {
                for tag in rule_tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
            }
        }
        if tags.is_empty() {
            tags = self.default_tags.clone();
        }

        Enrichment {
            summary: format!("Processed text length {}.", text.chars().count()),
            tags,
        }
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}
