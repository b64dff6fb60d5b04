//! Bounded summaries of raw analysis output

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{AnalysisOutput, AnalysisUnit};
use crate::config::SummaryConfig;

/// Summarized, size-bounded result stored on completed jobs and in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub summary: SummaryStats,
    /// First `max_records` units in processing order
    pub data: Vec<AnalysisUnit>,
    /// Units before truncation
    pub total_records: usize,
    pub topics: Vec<ValueCount>,
    /// Top `top_topics` unit categories
    #[serde(default)]
    pub categories: Vec<ValueCount>,
    pub sentiment: Vec<ValueCount>,
    pub quality: QualitySummary,
}

/// Aggregate counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub avg_message_length: u64,
    pub avg_words_per_message: f64,
}

/// One bucket of a categorical distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub collaboration: Vec<ValueCount>,
    pub task_completion: Vec<ValueCount>,
}

impl AnalysisSummary {
    /// Build the bounded view of `output`
    pub fn from_output(output: &AnalysisOutput, limits: &SummaryConfig) -> Self {
        let units = &output.units;

        Self {
            summary: SummaryStats::from_units(units),
            data: units.iter().take(limits.max_records).cloned().collect(),
            total_records: units.len(),
            topics: distribution(
                units.iter().flat_map(|u| u.topics.iter().map(String::as_str)),
                Some(limits.top_topics),
            ),
            categories: distribution(
                units.iter().filter_map(|u| u.category.as_deref()),
                Some(limits.top_topics),
            ),
            sentiment: distribution(units.iter().filter_map(|u| u.sentiment.as_deref()), None),
            quality: QualitySummary {
                collaboration: distribution(
                    units.iter().filter_map(|u| u.collaboration_quality.as_deref()),
                    None,
                ),
                task_completion: distribution(
                    units.iter().filter_map(|u| u.task_completion_status.as_deref()),
                    None,
                ),
            },
        }
    }
}

impl SummaryStats {
    fn from_units(units: &[AnalysisUnit]) -> Self {
        let total = units.len();
        let mut conversations: Vec<&str> = units.iter().map(|u| u.conversation_id.as_str()).collect();
        conversations.sort_unstable();
        conversations.dedup();

        let (avg_message_length, avg_words_per_message) = if total == 0 {
            (0, 0.0)
        } else {
            let chars: usize = units.iter().map(|u| u.content_length).sum();
            let words: usize = units.iter().map(|u| u.word_count).sum();
            let avg_words = words as f64 / total as f64;
            ((chars / total) as u64, (avg_words * 10.0).round() / 10.0)
        };

        Self {
            total_conversations: conversations.len(),
            total_messages: total,
            user_messages: units.iter().filter(|u| u.role == "user").count(),
            assistant_messages: units.iter().filter(|u| u.role == "assistant").count(),
            avg_message_length,
            avg_words_per_message,
        }
    }
}

/// Count values, most frequent first; equal counts keep first-seen order
pub fn distribution<'a>(values: impl Iterator<Item = &'a str>, limit: Option<usize>) -> Vec<ValueCount> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<ValueCount> = Vec::new();

    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match index.get(value) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(value, counts.len());
                counts.push(ValueCount {
                    value: value.to_string(),
                    count: 1,
                });
            }
        }
    }

    // stable: ties stay in first-seen order
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    if let Some(limit) = limit {
        counts.truncate(limit);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(conv: &str, role: &str, len: usize, words: usize) -> AnalysisUnit {
        AnalysisUnit::new(conv, role, len, words)
    }

    #[test]
    fn test_summary_counts() {
        let output = AnalysisOutput {
            units: vec![
                unit("c1", "user", 10, 2),
                unit("c1", "assistant", 21, 4),
                unit("c2", "user", 5, 1),
            ],
        };
        let summary = AnalysisSummary::from_output(&output, &SummaryConfig::default());

        assert_eq!(summary.summary.total_conversations, 2);
        assert_eq!(summary.summary.total_messages, 3);
        assert_eq!(summary.summary.user_messages, 2);
        assert_eq!(summary.summary.assistant_messages, 1);
        assert_eq!(summary.summary.avg_message_length, 12);
        assert_eq!(summary.summary.avg_words_per_message, 2.3);
        assert_eq!(summary.total_records, 3);
    }

    #[test]
    fn test_records_truncated_in_order() {
        let output = AnalysisOutput {
            units: (0..5).map(|i| unit(&format!("c{}", i), "user", i, i)).collect(),
        };
        let limits = SummaryConfig {
            max_records: 2,
            top_topics: 10,
        };
        let summary = AnalysisSummary::from_output(&output, &limits);

        assert_eq!(summary.data.len(), 2);
        assert_eq!(summary.data[0].conversation_id, "c0");
        assert_eq!(summary.data[1].conversation_id, "c1");
        assert_eq!(summary.total_records, 5);
    }

    #[test]
    fn test_distribution_ties_keep_first_seen() {
        let counts = distribution(
            ["rust", "python", "go", "python", "go", "sql"].into_iter(),
            Some(3),
        );
        let values: Vec<_> = counts.iter().map(|c| (c.value.as_str(), c.count)).collect();
        assert_eq!(values, vec![("python", 2), ("go", 2), ("rust", 1)]);
    }

    #[test]
    fn test_tag_distributions() {
        let mut a = unit("c1", "user", 1, 1);
        a.topics = vec!["coding".into(), "rust".into()];
        a.sentiment = Some("positive".into());
        let mut b = unit("c1", "assistant", 1, 1);
        b.topics = vec!["rust".into()];
        b.sentiment = Some("neutral".into());
        b.collaboration_quality = Some("high".into());

        let summary = AnalysisSummary::from_output(
            &AnalysisOutput { units: vec![a, b] },
            &SummaryConfig::default(),
        );
        assert_eq!(summary.topics[0], ValueCount { value: "rust".into(), count: 2 });
        assert_eq!(summary.topics[1].value, "coding");
        assert_eq!(summary.sentiment.len(), 2);
        assert_eq!(summary.sentiment[0].value, "positive");
        assert_eq!(summary.quality.collaboration.len(), 1);
        assert!(summary.quality.task_completion.is_empty());
    }

    #[test]
    fn test_category_distribution_is_capped() {
        let units = ["debugging", "writing", "debugging", "research", "writing", "debugging"]
            .into_iter()
            .map(|category| {
                let mut u = unit("c1", "user", 1, 1);
                u.category = Some(category.into());
                u
            })
            .chain(std::iter::once(unit("c1", "assistant", 1, 1)))
            .collect();
        let limits = SummaryConfig {
            max_records: 10,
            top_topics: 2,
        };

        let summary = AnalysisSummary::from_output(&AnalysisOutput { units }, &limits);
        assert_eq!(
            summary.categories,
            vec![
                ValueCount { value: "debugging".into(), count: 3 },
                ValueCount { value: "writing".into(), count: 2 },
            ]
        );
    }

    #[test]
    fn test_empty_output() {
        let summary = AnalysisSummary::from_output(&AnalysisOutput::default(), &SummaryConfig::default());
        assert_eq!(summary.summary.total_messages, 0);
        assert_eq!(summary.summary.avg_words_per_message, 0.0);
        assert!(summary.data.is_empty());
    }
}
