//! Passage generation collaborator boundary
//!
//! The generator is a slow, occasionally-failing external call. The fallback
//! source keeps the previously served passage (or a built-in placeholder) so
//! a generator outage never blocks pairing.

use crate::error::{DuelError, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::warn;

/// Placeholder served when no passage has ever been generated
pub const PLACEHOLDER_PASSAGE: &str =
    "The quick brown fox jumps over the lazy dog while the patient typist keeps a steady rhythm.";

/// External passage generation boundary
#[async_trait]
pub trait PassageProvider: Send + Sync {
    /// Generate a passage of at most `max_length` characters in `language`.
    async fn generate(&self, max_length: u32, language: &str, topic: Option<&str>) -> Result<String>;
}

/// Static provider with built-in passages per language.
///
/// Used by tests and the race-tester binary; also a reasonable offline
/// default when no generator service is configured.
#[derive(Debug, Default)]
pub struct StaticPassageProvider;

impl StaticPassageProvider {
    pub fn new() -> Self {
        Self
    }

    fn passages_for(language: &str) -> &'static [&'static str] {
        match language {
            "en" => &[
                "Practice does not make perfect, it makes permanent, so practice deliberately.",
                "A keyboard is a piano for prose, and every sentence is a small performance.",
                "Speed follows accuracy the way thunder follows lightning, never the other way.",
            ],
            "fr" => &[
                "La vitesse vient avec la pratique, mais la justesse vient avec l'attention.",
                "Chaque phrase est une petite course contre soi-meme et contre le temps.",
            ],
            "de" => &[
                "Uebung macht den Meister, aber Genauigkeit macht die Geschwindigkeit.",
                "Wer schnell tippen will, muss zuerst langsam und richtig tippen.",
            ],
            _ => &[],
        }
    }
}

#[async_trait]
impl PassageProvider for StaticPassageProvider {
    async fn generate(&self, max_length: u32, language: &str, _topic: Option<&str>) -> Result<String> {
        let candidates = Self::passages_for(language);
        if candidates.is_empty() {
            return Err(DuelError::InvalidRequest {
                reason: format!("No passages available for language '{}'", language),
            }
            .into());
        }

        // Prefer the longest passage that still fits the cap
        let fitting = candidates
            .iter()
            .filter(|p| p.len() <= max_length as usize)
            .max_by_key(|p| p.len());

        match fitting {
            Some(passage) => Ok((*passage).to_string()),
            None => {
                // Cap shorter than every candidate: truncate at a word boundary
                let shortest = candidates.iter().min_by_key(|p| p.len()).unwrap();
                let mut truncated = String::new();
                for word in shortest.split_whitespace() {
                    let next_len = if truncated.is_empty() {
                        word.len()
                    } else {
                        truncated.len() + 1 + word.len()
                    };
                    if next_len > max_length as usize {
                        break;
                    }
                    if !truncated.is_empty() {
                        truncated.push(' ');
                    }
                    truncated.push_str(word);
                }
                if truncated.is_empty() {
                    return Err(DuelError::InvalidRequest {
                        reason: format!("Passage length cap {} too small", max_length),
                    }
                    .into());
                }
                Ok(truncated)
            }
        }
    }
}

/// Wrapper that tolerates generator failure by re-serving the last passage.
pub struct FallbackPassageSource {
    inner: std::sync::Arc<dyn PassageProvider>,
    last_served: Mutex<Option<String>>,
}

impl FallbackPassageSource {
    pub fn new(inner: std::sync::Arc<dyn PassageProvider>) -> Self {
        Self {
            inner,
            last_served: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PassageProvider for FallbackPassageSource {
    async fn generate(&self, max_length: u32, language: &str, topic: Option<&str>) -> Result<String> {
        match self.inner.generate(max_length, language, topic).await {
            Ok(passage) if !passage.is_empty() => {
                if let Ok(mut last) = self.last_served.lock() {
                    *last = Some(passage.clone());
                }
                Ok(passage)
            }
            Ok(_) | Err(_) => {
                let fallback = self
                    .last_served
                    .lock()
                    .ok()
                    .and_then(|last| last.clone())
                    .unwrap_or_else(|| PLACEHOLDER_PASSAGE.to_string());
                warn!(
                    "Passage generator unavailable for '{}', serving fallback",
                    language
                );
                Ok(fallback)
            }
        }
    }
}
