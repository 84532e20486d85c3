//! Final article document produced by the conversion stage.
//!
//! The downstream materializer reads this shape from the checkpoint of a
//! succeeded task, so anything that does not decode and validate here fails
//! the task instead of being published.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Advanced,
    ];
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        };
        f.write_str(s)
    }
}

/// The validated final document of a succeeded task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub topic: String,
    pub sources: Vec<String>,
    /// Exactly one per difficulty level.
    pub variants: Vec<ArticleVariant>,
    pub word_usage: WordUsage,
    pub definitions: Vec<WordDefinition>,
}

/// The article rewritten for one difficulty level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleVariant {
    pub difficulty: Difficulty,
    pub content: String,
    pub metadata: VariantMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantMetadata {
    pub summary: String,
    pub word_count: u32,
    pub reading_minutes: u32,
}

/// Reconciliation of the selected words against what the draft used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordUsage {
    pub used: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordDefinition {
    pub word: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
}

impl Article {
    /// Decode and validate a raw conversion payload.
    pub fn from_document(document: &serde_json::Value) -> Result<Self, String> {
        let article: Article = serde_json::from_value(document.clone())
            .map_err(|e| format!("document does not match the article shape: {e}"))?;
        article.validate()?;
        Ok(article)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is empty".to_string());
        }
        if self.topic.trim().is_empty() {
            return Err("topic is empty".to_string());
        }

        for difficulty in Difficulty::ALL {
            let mut matching = self.variants.iter().filter(|v| v.difficulty == difficulty);
            let Some(variant) = matching.next() else {
                return Err(format!("missing {difficulty} variant"));
            };
            if matching.next().is_some() {
                return Err(format!("more than one {difficulty} variant"));
            }
            if variant.content.trim().is_empty() {
                return Err(format!("{difficulty} variant has no content"));
            }
        }

        for definition in &self.definitions {
            if definition.word.trim().is_empty() || definition.definition.trim().is_empty() {
                return Err("definition entries need both a word and a definition".to_string());
            }
        }
        for word in &self.word_usage.used {
            let defined = self
                .definitions
                .iter()
                .any(|d| d.word.eq_ignore_ascii_case(word));
            if !defined {
                return Err(format!("no definition for used word '{word}'"));
            }
        }

        Ok(())
    }
}
