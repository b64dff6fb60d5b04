//! Structural analyzer for conversation exports

use serde_json::Value;

use super::{AnalysisError, AnalysisOptions, AnalysisOutput, AnalysisUnit, Analyzer, ProgressSink};
use crate::document;

/// Progress band covered by per-conversation reports
const PROGRESS_START: u8 = 25;
const PROGRESS_END: u8 = 70;

/// Built-in analyzer: one unit per message with role, length and word count.
///
/// It does not tag topics or sentiment; tag-producing analyzers plug in
/// through the same [`Analyzer`] trait.
#[derive(Debug, Clone, Default)]
pub struct ConversationAnalyzer;

impl ConversationAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn conversation_id(conversation: &Value, index: usize) -> String {
        ["uuid", "id", "conversation_id"]
            .iter()
            .find_map(|key| match conversation.get(*key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| format!("conversation-{}", index))
    }

    fn role(message: &Value) -> String {
        let raw = message
            .get("sender")
            .or_else(|| message.get("role"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        match raw {
            "human" => "user".to_string(),
            other => other.to_string(),
        }
    }

    fn text(message: &Value) -> &str {
        message
            .get("text")
            .or_else(|| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

impl Analyzer for ConversationAnalyzer {
    fn analyze(
        &self,
        bytes: &[u8],
        _options: &AnalysisOptions,
        progress: &dyn ProgressSink,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let root: Value = serde_json::from_slice(bytes)
            .map_err(|e| AnalysisError::new(format!("Invalid JSON format: {}", e)))?;
        let conversations =
            document::validate_structure(&root).map_err(|e| AnalysisError::new(e.to_string()))?;

        let total = conversations.len();
        let mut units = Vec::new();

        for (index, conversation) in conversations.iter().enumerate() {
            let conversation_id = Self::conversation_id(conversation, index);
            for message in document::message_list(conversation).into_iter().flatten() {
                let text = Self::text(message);
                units.push(AnalysisUnit::new(
                    conversation_id.clone(),
                    Self::role(message),
                    text.chars().count(),
                    text.split_whitespace().count(),
                ));
            }

            let done = (index + 1) as u64;
            let span = (PROGRESS_END - PROGRESS_START) as u64;
            let percent = PROGRESS_START + (span * done / total as u64) as u8;
            progress.report(percent, &format!("Analyzed {}/{} conversations", index + 1, total));
        }

        Ok(AnalysisOutput { units })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u8>>);

    impl ProgressSink for Recorder {
        fn report(&self, percent: u8, _message: &str) {
            self.0.lock().push(percent);
        }
    }

    #[test]
    fn test_units_per_message() {
        let export = r#"{"conversations": [
            {"uuid": "a", "chat_messages": [
                {"sender": "human", "text": "how do lifetimes work"},
                {"sender": "assistant", "text": "they describe borrows"}
            ]},
            {"id": 7, "messages": [{"role": "user", "content": "thanks"}]}
        ]}"#;
        let recorder = Recorder::default();

        let output = ConversationAnalyzer::new()
            .analyze(export.as_bytes(), &AnalysisOptions::default(), &recorder)
            .unwrap();

        assert_eq!(output.units.len(), 3);
        assert_eq!(output.units[0].role, "user");
        assert_eq!(output.units[0].word_count, 4);
        assert_eq!(output.units[1].content_length, "they describe borrows".len());
        assert_eq!(output.units[2].conversation_id, "7");
        assert_eq!(*recorder.0.lock(), vec![47, 70]);
    }

    #[test]
    fn test_rejects_bad_structure() {
        let err = ConversationAnalyzer::new()
            .analyze(b"{}", &AnalysisOptions::default(), &Recorder::default())
            .unwrap_err();
        assert!(err.to_string().contains("conversations"));
    }
}
