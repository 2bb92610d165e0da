//! Grounded answer assembly: context building, generation, citations.
//!
//! The [`AnswerAssembler`] turns a ranked chunk list into the shape the
//! chat endpoint returns: response text, ordered citations, and a
//! confidence score. Two rules are absolute:
//!
//! - generation is never invoked with zero grounding context: an empty
//!   ranking short-circuits to the insufficient-information template with
//!   confidence 0.0 and no citations;
//! - generation failures degrade to that same template rather than
//!   propagating, so the caller always receives a well-formed [`Answer`].
//!
//! Context is built from ranked chunks in order, whole chunks only, until
//! the token budget would be exceeded. Each context block is tagged `[n]`;
//! the generated text's `[n]` markers decide which chunks become citations,
//! so every citation points at a chunk that was actually handed to the
//! model, never one that was merely retrieved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::retriever::RetrievalResult;

/// Fixed response used whenever no grounded answer can be produced.
pub const INSUFFICIENT_INFORMATION: &str =
    "I could not find enough information in the indexed documents to answer that question.";

/// Error raised by a generation provider.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("generation request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },

    #[error("generation service returned malformed output: {message}")]
    Malformed { message: String },
}

/// Output of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    /// The model's own certainty signal in [0, 1].
    pub certainty: f32,
}

/// Capability of producing a grounded natural-language answer.
///
/// The concrete model behind this trait is swappable without touching
/// ranking or citation logic.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, query: &str, context: &str) -> Result<Generation, GenerateError>;
}

/// HTTP client for a generation service.
///
/// Posts `{ "query": ..., "context": ... }` and expects
/// `{ "text": ..., "certainty": ... }`; a missing certainty field is read
/// as 0.5 (the service answered but did not self-assess).
pub struct HttpGenerationProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    query: &'a str,
    context: &'a str,
}

#[derive(Deserialize)]
struct GenerationResponse {
    text: String,
    #[serde(default = "default_certainty")]
    certainty: f32,
}

fn default_certainty() -> f32 {
    0.5
}

impl HttpGenerationProvider {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GenerateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(&self, query: &str, context: &str) -> Result<Generation, GenerateError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerationRequest { query, context })
            .send()
            .await?
            .error_for_status()?;

        let body: GenerationResponse = response.json().await?;
        if body.text.trim().is_empty() {
            return Err(GenerateError::Malformed {
                message: "empty response text".to_string(),
            });
        }

        Ok(Generation {
            text: body.text,
            certainty: body.certainty.clamp(0.0, 1.0),
        })
    }
}

/// Canned generation provider for tests and offline runs.
pub struct StaticGenerationProvider {
    text: String,
    certainty: f32,
    fail: bool,
}

impl StaticGenerationProvider {
    pub fn new(text: impl Into<String>, certainty: f32) -> Self {
        Self {
            text: text.into(),
            certainty,
            fail: false,
        }
    }

    /// A provider whose every call fails, for exercising degradation.
    pub fn failing() -> Self {
        Self {
            text: String::new(),
            certainty: 0.0,
            fail: true,
        }
    }
}

#[async_trait]
impl GenerationProvider for StaticGenerationProvider {
    async fn generate(&self, _query: &str, _context: &str) -> Result<Generation, GenerateError> {
        if self.fail {
            return Err(GenerateError::Malformed {
                message: "static provider configured to fail".to_string(),
            });
        }
        Ok(Generation {
            text: self.text.clone(),
            certainty: self.certainty,
        })
    }
}

/// A reference from an answer back to a source chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub source_title: String,
    pub page: Option<i64>,
    /// Verbatim excerpt from the cited chunk.
    pub excerpt: String,
}

/// The chat endpoint's answer shape.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub response_text: String,
    pub citations: Vec<Citation>,
    /// Reliability estimate in [0, 1]; 0.0 for degenerate answers.
    pub confidence: f32,
}

impl Answer {
    /// The degenerate answer: template text, no citations, zero confidence.
    pub fn insufficient() -> Self {
        Self {
            response_text: INSUFFICIENT_INFORMATION.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// Tuning for context assembly.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Token budget for the grounding context; chunks are added whole, in
    /// rank order, until the next one would overflow it.
    pub context_budget_tokens: usize,
    /// Citation excerpts are capped at this many characters.
    pub max_excerpt_chars: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            context_budget_tokens: 3000,
            max_excerpt_chars: 240,
        }
    }
}

/// Composes grounded answers from ranked chunks.
pub struct AnswerAssembler {
    provider: Arc<dyn GenerationProvider>,
    config: AssemblerConfig,
}

impl AnswerAssembler {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: AssemblerConfig) -> Self {
        Self { provider, config }
    }

    /// Produce an [`Answer`] for `query` from the ranked chunks.
    ///
    /// Always returns a well-formed answer; see the module docs for the
    /// degradation rules.
    pub async fn assemble(&self, query: &str, ranked: &[RetrievalResult]) -> Answer {
        if ranked.is_empty() {
            debug!("no retrieval results; answering with the insufficient-information template");
            return Answer::insufficient();
        }

        let selected = self.select_within_budget(ranked);
        if selected.is_empty() {
            // The top chunk alone overflows the budget; with no grounding
            // context permitted, generation must not run.
            warn!(
                budget = self.config.context_budget_tokens,
                "context budget too small for any chunk"
            );
            return Answer::insufficient();
        }

        let context = build_context(&selected);

        let generation = match self.provider.generate(query, &context).await {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "generation failed; degrading to insufficient-information");
                return Answer::insufficient();
            }
        };

        let citations = cited_markers(&generation.text, selected.len())
            .into_iter()
            .map(|marker| {
                let result = selected[marker - 1];
                Citation {
                    source_title: result.document.title.clone(),
                    page: result
                        .chunk
                        .metadata
                        .get("page")
                        .and_then(|v| v.as_i64()),
                    excerpt: excerpt_of(&result.chunk.content, self.config.max_excerpt_chars),
                }
            })
            .collect();

        let top_score = ranked[0].score.clamp(0.0, 1.0);
        let confidence = (0.55 * generation.certainty + 0.45 * top_score).clamp(0.0, 1.0);

        Answer {
            response_text: generation.text,
            citations,
            confidence,
        }
    }

    /// Take ranked chunks in order while the token budget holds. Chunks are
    /// never split.
    fn select_within_budget<'a>(&self, ranked: &'a [RetrievalResult]) -> Vec<&'a RetrievalResult> {
        let mut selected = Vec::new();
        let mut used_tokens = 0usize;

        for result in ranked {
            let cost = regqa_chunk::count_tokens(&result.chunk.content);
            if used_tokens + cost > self.config.context_budget_tokens {
                break;
            }
            used_tokens += cost;
            selected.push(result);
        }

        selected
    }
}

/// Render the `[n]`-tagged grounding context handed to the model.
fn build_context(selected: &[&RetrievalResult]) -> String {
    let mut context = String::new();
    for (i, result) in selected.iter().enumerate() {
        let page = result
            .chunk
            .metadata
            .get("page")
            .and_then(|v| v.as_i64())
            .map(|p| format!(", page {p}"))
            .unwrap_or_default();
        context.push_str(&format!(
            "[{}] {}{}\n{}\n\n",
            i + 1,
            result.document.title,
            page,
            result.chunk.content
        ));
    }
    context
}

/// Collect `[n]` markers from the generated text, in first-appearance
/// order, deduplicated, keeping only markers that name a context block.
fn cited_markers(text: &str, block_count: usize) -> Vec<usize> {
    let mut seen = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                if let Ok(marker) = text[i + 1..j].parse::<usize>() {
                    if marker >= 1 && marker <= block_count && !seen.contains(&marker) {
                        seen.push(marker);
                    }
                }
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }

    seen
}

/// Verbatim prefix of `content`, capped at `max_chars` on a char boundary.
fn excerpt_of(content: &str, max_chars: usize) -> String {
    let excerpt: String = content.chars().take(max_chars).collect();
    if excerpt.len() < content.len() {
        format!("{excerpt}...")
    } else {
        excerpt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::retriever::Signal;
    use crate::storage::{ChunkRecord, DocumentSummary};

    fn ranked_chunk(seq: i64, content: &str, score: f32, page: i64) -> RetrievalResult {
        RetrievalResult {
            chunk: ChunkRecord {
                id: seq,
                document_id: 1,
                seq_index: seq,
                content: content.to_string(),
                embedding: None,
                model_id: Some("test".to_string()),
                metadata: serde_json::json!({ "page": page }),
                created_at: 0,
            },
            document: DocumentSummary {
                id: 1,
                title: "Income Tax Proclamation".to_string(),
                source_url: None,
                language: Some("en".to_string()),
                created_at: 0,
            },
            score,
            signal: Signal::Both,
        }
    }

    fn assembler(provider: StaticGenerationProvider) -> AnswerAssembler {
        AnswerAssembler::new(Arc::new(provider), AssemblerConfig::default())
    }

    #[tokio::test]
    async fn test_empty_ranking_short_circuits() {
        // The provider would panic the test if it were ever reached with an
        // answer, so a failing provider proves generation is not invoked.
        let assembler = assembler(StaticGenerationProvider::failing());
        let answer = assembler.assemble("anything", &[]).await;

        assert_eq!(answer.response_text, INSUFFICIENT_INFORMATION);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_citations_follow_answer_markers() {
        let assembler = assembler(StaticGenerationProvider::new(
            "Registration is required above the threshold [2]. See also [1].",
            0.9,
        ));
        let ranked = vec![
            ranked_chunk(0, "threshold definitions", 0.8, 3),
            ranked_chunk(1, "registration duties", 0.7, 7),
            ranked_chunk(2, "unrelated transitional rules", 0.2, 9),
        ];

        let answer = assembler.assemble("when must I register?", &ranked).await;

        assert_eq!(answer.citations.len(), 2);
        // First-appearance order: [2] then [1].
        assert_eq!(answer.citations[0].page, Some(7));
        assert_eq!(answer.citations[0].excerpt, "registration duties");
        assert_eq!(answer.citations[1].page, Some(3));
        assert!(answer.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_unmarked_answer_carries_no_citations() {
        let assembler = assembler(StaticGenerationProvider::new("A plain answer.", 0.8));
        let ranked = vec![ranked_chunk(0, "some grounding", 0.9, 1)];

        let answer = assembler.assemble("q", &ranked).await;
        assert!(answer.citations.is_empty());
        assert_eq!(answer.response_text, "A plain answer.");
    }

    #[tokio::test]
    async fn test_generation_failure_degrades() {
        let assembler = assembler(StaticGenerationProvider::failing());
        let ranked = vec![ranked_chunk(0, "grounding", 0.9, 1)];

        let answer = assembler.assemble("q", &ranked).await;
        assert_eq!(answer.response_text, INSUFFICIENT_INFORMATION);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_confidence_tracks_certainty_and_retrieval() {
        let ranked = vec![ranked_chunk(0, "grounding", 1.0, 1)];

        let sure = assembler(StaticGenerationProvider::new("yes [1]", 1.0))
            .assemble("q", &ranked)
            .await;
        let unsure = assembler(StaticGenerationProvider::new("maybe [1]", 0.1))
            .assemble("q", &ranked)
            .await;

        assert!(sure.confidence > unsure.confidence);
        assert!(sure.confidence <= 1.0);
        assert!(unsure.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_context_budget_takes_whole_chunks_in_rank_order() {
        let assembler = AnswerAssembler::new(
            Arc::new(StaticGenerationProvider::new("ok [1] [2] [3]", 0.9)),
            AssemblerConfig {
                context_budget_tokens: 5,
                max_excerpt_chars: 240,
            },
        );
        // 3 + 3 tokens fit; the third chunk would overflow.
        let ranked = vec![
            ranked_chunk(0, "alpha beta gamma", 0.9, 1),
            ranked_chunk(1, "delta epsilon", 0.8, 1),
            ranked_chunk(2, "zeta eta theta", 0.7, 1),
        ];

        let answer = assembler.assemble("q", &ranked).await;
        // Marker [3] names no context block, so only two citations survive.
        assert_eq!(answer.citations.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_smaller_than_top_chunk_degrades() {
        let assembler = AnswerAssembler::new(
            Arc::new(StaticGenerationProvider::new("should not run", 0.9)),
            AssemblerConfig {
                context_budget_tokens: 2,
                max_excerpt_chars: 240,
            },
        );
        let ranked = vec![ranked_chunk(0, "one two three four", 0.9, 1)];

        let answer = assembler.assemble("q", &ranked).await;
        assert_eq!(answer.response_text, INSUFFICIENT_INFORMATION);
        assert_eq!(answer.confidence, 0.0);
    }

    #[test]
    fn test_cited_markers_parsing() {
        assert_eq!(cited_markers("see [1] and [2]", 3), vec![1, 2]);
        assert_eq!(cited_markers("[2] before [1], [2] again", 2), vec![2, 1]);
        // Out-of-range and malformed markers are ignored.
        assert_eq!(cited_markers("[9] [0] [x] [12", 3), Vec::<usize>::new());
        assert_eq!(cited_markers("no markers", 3), Vec::<usize>::new());
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "ሀብት ግብር መመሪያ ሰነድ"; // multi-byte chars
        let excerpt = excerpt_of(text, 4);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.chars().count() <= 7);

        assert_eq!(excerpt_of("short", 240), "short");
    }

    #[test]
    fn test_context_includes_titles_and_pages() {
        let ranked = vec![ranked_chunk(0, "body text", 0.9, 4)];
        let selected: Vec<&RetrievalResult> = ranked.iter().collect();
        let context = build_context(&selected);

        assert!(context.contains("[1] Income Tax Proclamation, page 4"));
        assert!(context.contains("body text"));
    }
}
