//! Per-utterance matching against a behavior's expected phrases or semantic
//! description, selected by `detection_hint`.

use crate::embedding::{cosine_similarity, EmbeddingService};
use qa_core::DetectionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub match_type: MatchType,
    pub matched_text: String,
    pub confidence: f32,
}

fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn exact_match(utterance: &str, phrases: &[String]) -> Option<MatchOutcome> {
    let normalized_utterance = normalize(utterance);
    phrases.iter().find_map(|phrase| {
        let normalized_phrase = normalize(phrase);
        if !normalized_phrase.is_empty() && normalized_utterance.contains(&normalized_phrase) {
            Some(MatchOutcome {
                match_type: MatchType::Exact,
                matched_text: utterance.to_string(),
                confidence: 1.0,
            })
        } else {
            None
        }
    })
}

async fn semantic_match(
    utterance: &str,
    description: &str,
    phrases: Option<&[String]>,
    embeddings: &EmbeddingService,
    threshold: f64,
) -> Option<MatchOutcome> {
    let mut reference = description.to_string();
    if let Some(phrases) = phrases {
        reference.push_str(" || ");
        reference.push_str(&phrases.join(" "));
    }
    let utterance_vec = embeddings.embed(utterance).await;
    let reference_vec = embeddings.embed(&reference).await;
    let similarity = cosine_similarity(&utterance_vec, &reference_vec);

    if (similarity as f64) >= threshold {
        Some(MatchOutcome {
            match_type: MatchType::Semantic,
            matched_text: utterance.to_string(),
            confidence: similarity,
        })
    } else {
        None
    }
}

/// Dispatches on `detection_hint`. `hybrid` tries exact first, falling back
/// to semantic, and keeps whichever has the higher confidence.
pub async fn match_behavior(
    utterance: &str,
    description: &str,
    phrases: Option<&[String]>,
    detection_hint: DetectionMode,
    embeddings: &EmbeddingService,
    semantic_threshold: f64,
) -> Option<MatchOutcome> {
    match detection_hint {
        DetectionMode::ExactPhrase => phrases.and_then(|p| exact_match(utterance, p)),
        DetectionMode::Semantic => semantic_match(utterance, description, phrases, embeddings, semantic_threshold).await,
        DetectionMode::Hybrid => {
            let exact = phrases.and_then(|p| exact_match(utterance, p));
            let semantic = semantic_match(utterance, description, phrases, embeddings, semantic_threshold).await;
            match (exact, semantic) {
                (Some(e), Some(s)) => {
                    if s.confidence > e.confidence {
                        Some(s)
                    } else {
                        Some(e)
                    }
                }
                (Some(e), None) => Some(e),
                (None, Some(s)) => Some(s),
                (None, None) => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_phrase_match_is_confidence_one() {
        let phrases = vec!["thank you for calling".to_string()];
        let outcome = exact_match("Hello, THANK YOU FOR CALLING today", &phrases).unwrap();
        assert_eq!(outcome.confidence, 1.0);
    }

    #[tokio::test]
    async fn semantic_match_respects_threshold() {
        let embeddings = EmbeddingService::new();
        let outcome = semantic_match("completely unrelated text about weather", "verify customer identity", None, &embeddings, 0.999).await;
        assert!(outcome.is_none());
    }
}
