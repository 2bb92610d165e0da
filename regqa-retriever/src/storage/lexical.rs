//! Trigram text similarity for the lexical retrieval signal.
//!
//! Scoring follows the pg_trgm convention: text is lowercased and split into
//! alphanumeric words, each word is padded with two leading and one trailing
//! space, and similarity is the Jaccard ratio of the two trigram sets. This
//! recovers exact-term matches (article numbers, proper names, Amharic legal
//! terms) that dense embeddings blur.

use std::collections::HashSet;

/// Extract the padded trigram set of `text`.
pub fn trigrams(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    let mut set = HashSet::new();

    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {word} ").chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }

    set
}

/// Jaccard similarity between a precomputed query trigram set and `text`.
///
/// Returns 0.0 when either side has no trigrams. Precomputing the query set
/// lets one query be scored against many chunks without rebuilding it.
pub fn similarity_to(query: &HashSet<String>, text: &str) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let candidate = trigrams(text);
    if candidate.is_empty() {
        return 0.0;
    }

    let intersection = query.intersection(&candidate).count();
    let union = query.len() + candidate.len() - intersection;
    intersection as f32 / union as f32
}
