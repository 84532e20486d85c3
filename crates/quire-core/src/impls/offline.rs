//! Deterministic generation client that never leaves the process.
//!
//! Builds every stage's artifact from its input alone, so a drain can be run
//! end to end without a model behind it. The final document always passes
//! article validation.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::{
    Difficulty, HistoryEntry, Role, Stage, StageArtifact, StageInput, StageOutput, UsageMetrics,
};
use crate::ports::{GenerationClient, GenerationError, StageContext};

const FALLBACK_WORDS: [&str; 3] = ["harbor", "lantern", "meadow"];

/// The same task always yields the same article.
#[derive(Debug, Clone)]
pub struct OfflineGenerationClient {
    model: String,
    words_per_article: usize,
}

impl Default for OfflineGenerationClient {
    fn default() -> Self {
        Self {
            model: "offline".to_string(),
            words_per_article: 5,
        }
    }
}

impl OfflineGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn select_words(&self, candidates: Option<Vec<String>>) -> Vec<String> {
        let mut words: Vec<String> = candidates
            .unwrap_or_else(|| FALLBACK_WORDS.iter().map(|w| w.to_string()).collect())
            .into_iter()
            .filter(|w| !w.trim().is_empty())
            .collect();
        words.sort();
        words.dedup();
        words.truncate(self.words_per_article);
        words
    }

    fn document(&self, context: &StageContext, draft: &str, history: &[HistoryEntry]) -> serde_json::Value {
        let words: Vec<&str> = history
            .iter()
            .filter(|e| e.stage == Stage::WordSelection && e.role == Role::Assistant)
            .flat_map(|e| e.content.split(", "))
            .filter(|w| !w.is_empty())
            .collect();
        let sources: Vec<&str> = history
            .iter()
            .filter(|e| e.stage == Stage::Research && e.role == Role::Assistant)
            .flat_map(|e| e.content.lines())
            .collect();

        let variants: Vec<serde_json::Value> = Difficulty::ALL
            .iter()
            .map(|difficulty| {
                let content = format!("[{difficulty}] {draft}");
                let word_count = content.split_whitespace().count() as u32;
                json!({
                    "difficulty": difficulty,
                    "content": content,
                    "metadata": {
                        "summary": format!("{difficulty} reading for {}", context.date),
                        "word_count": word_count,
                        "reading_minutes": word_count.div_ceil(200).max(1),
                    }
                })
            })
            .collect();

        let definitions: Vec<serde_json::Value> = words
            .iter()
            .map(|w| json!({ "word": w, "definition": format!("meaning of {w}") }))
            .collect();

        json!({
            "title": format!("Words for {}", context.date),
            "topic": context.llm_hint.clone().unwrap_or_else(|| "daily vocabulary".to_string()),
            "sources": sources,
            "variants": variants,
            "word_usage": { "used": words, "missing": [] },
            "definitions": definitions,
        })
    }

    fn usage(&self, prompt: &str, reply: &str) -> UsageMetrics {
        UsageMetrics {
            model: Some(self.model.clone()),
            input_tokens: prompt.split_whitespace().count() as u64,
            output_tokens: reply.split_whitespace().count() as u64,
        }
    }
}

#[async_trait]
impl GenerationClient for OfflineGenerationClient {
    async fn run_stage(
        &self,
        context: &StageContext,
        history: &[HistoryEntry],
        input: StageInput,
    ) -> Result<StageOutput, GenerationError> {
        let stage = input.stage();
        let (prompt, reply, artifact) = match input {
            StageInput::WordSelection { candidates } => {
                let words = self.select_words(candidates);
                if words.is_empty() {
                    return Err(GenerationError::new("no usable candidate words"));
                }
                let reply = words.join(", ");
                ("select words".to_string(), reply, StageArtifact::Words(words))
            }
            StageInput::Research { words } => {
                let sources: Vec<String> = words
                    .iter()
                    .map(|w| format!("offline://{}/{w}", context.date))
                    .collect();
                (
                    format!("research {}", words.join(" ")),
                    sources.join("\n"),
                    StageArtifact::Sources(sources),
                )
            }
            StageInput::Draft { words, sources } => {
                let draft = format!(
                    "A short piece using {} drawing on {} sources.",
                    words.join(", "),
                    sources.len()
                );
                ("write draft".to_string(), draft.clone(), StageArtifact::Draft(draft))
            }
            StageInput::Conversion { draft } => {
                let document = self.document(context, &draft, history);
                (
                    format!("convert {draft}"),
                    document.to_string(),
                    StageArtifact::Document(document),
                )
            }
        };

        let usage = self.usage(&prompt, &reply);
        Ok(StageOutput {
            entries: vec![
                HistoryEntry::new(stage, Role::User, prompt),
                HistoryEntry::new(stage, Role::Assistant, reply),
            ],
            artifact,
            usage,
        })
    }
}
