//! Deterministic completion used when no model is configured

use super::{CompletionPurpose, CompletionRequest, CompletionService};
use crate::errors::Result;
use async_trait::async_trait;

/// Prompts that carry source text put it after this marker
pub const TEXT_MARKER: &str = "Text:\n";

const SUMMARY_CHARS: usize = 280;

/// Offline stand-in for the completion service.
///
/// Selection gets an empty reference list, synthesis a templated answer,
/// and summaries a condensed prefix of the supplied text.
#[derive(Debug, Default, Clone)]
pub struct OfflineCompletion;

impl OfflineCompletion {
    pub fn new() -> Self {
        Self
    }

    fn answer(&self, prompt: &str) -> String {
        // Extract question from prompt
        if let Some(q_start) = prompt.find("Question:") {
            let question_part = &prompt["Question:".len() + q_start..];
            let question = question_part.lines().next().unwrap_or_default().trim();
            if !question.is_empty() {
                return format!(
                    "Based on the provided context, here is an answer to your question: {}\n\n\
                    The indexed sections above contain the relevant material; \
                    configure an LLM API key for a synthesized answer.\n\n\
                    [Offline response - LLM API key not configured]",
                    question
                );
            }
        }

        "Based on the provided context, the answer requires further investigation. \
        [Offline response - LLM API key not configured]"
            .to_string()
    }

    fn condense(&self, prompt: &str) -> String {
        let source = prompt
            .split_once(TEXT_MARKER)
            .map(|(_, text)| text)
            .unwrap_or(prompt);
        let flat = source.split_whitespace().collect::<Vec<_>>().join(" ");

        if flat.chars().count() <= SUMMARY_CHARS {
            return flat;
        }
        let mut cut: String = flat.chars().take(SUMMARY_CHARS).collect();
        if let Some(space) = cut.rfind(' ') {
            cut.truncate(space);
        }
        cut.push_str("...");
        cut
    }
}

#[async_trait]
impl CompletionService for OfflineCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        Ok(match request.purpose {
            CompletionPurpose::Selection => "[]".to_string(),
            CompletionPurpose::Synthesis => self.answer(&request.user),
            CompletionPurpose::Summary | CompletionPurpose::Description => {
                self.condense(&request.user)
            }
        })
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answer_echoes_question() {
        let offline = OfflineCompletion::new();
        let request = CompletionRequest::new(
            CompletionPurpose::Synthesis,
            "sys",
            "Context from documents:\n\nstuff\n\nQuestion: What is the conclusion?\n\nPlease answer.",
        );
        let answer = offline.complete(&request).await.unwrap();
        assert!(answer.contains("What is the conclusion?"));
        assert!(answer.contains("Offline response"));
    }

    #[test]
    fn test_selection_is_empty_list() {
        let offline = OfflineCompletion::new();
        let request = CompletionRequest::new(CompletionPurpose::Selection, "sys", "tree");
        let reply = tokio_test::block_on(offline.complete(&request)).unwrap();
        assert_eq!(reply, "[]");
    }

    #[tokio::test]
    async fn test_summary_condenses_marked_text() {
        let offline = OfflineCompletion::new();
        let long_text = "word ".repeat(200);
        let request = CompletionRequest::new(
            CompletionPurpose::Summary,
            "sys",
            format!("Summarize this section.\n\n{}{}", TEXT_MARKER, long_text),
        );
        let summary = offline.complete(&request).await.unwrap();
        assert!(summary.starts_with("word word"));
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= SUMMARY_CHARS + 3);
        assert!(!summary.contains("Summarize"));
    }
}
