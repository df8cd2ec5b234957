use crate::search::models::Candidate;
use std::collections::HashSet;

const EXACT_TITLE_BONUS: f64 = 10.0;
const TITLE_TERM_WEIGHT: f64 = 2.0;
const CONTENT_TERM_WEIGHT: f64 = 0.5;
const PRIOR_WEIGHT: f64 = 5.0;

/// Rule-based scorer. Needs no model or network and never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn name(&self) -> &'static str {
        "lexical"
    }

    /// Score every candidate and return the best `top_k`, stable on ties.
    pub fn rank(&self, query: &str, candidates: &[Candidate], top_k: usize) -> Vec<Candidate> {
        let query_lower = query.to_lowercase();
        let query_terms: HashSet<&str> = query_lower.split_whitespace().collect();

        let mut scored: Vec<Candidate> = candidates
            .iter()
            .map(|c| {
                let mut c = c.clone();
                c.rerank_score = Some(score(&query_lower, &query_terms, &c));
                c.rerank_source = Some(self.name().to_string());
                c
            })
            .collect();

        scored.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
        scored.truncate(top_k.max(1));
        scored
    }
}

fn score(query_lower: &str, query_terms: &HashSet<&str>, candidate: &Candidate) -> f64 {
    let title = candidate.title.to_lowercase();
    let content = candidate.content.to_lowercase();

    let mut score = 0.0;
    if !query_lower.trim().is_empty() && title.contains(query_lower) {
        score += EXACT_TITLE_BONUS;
    }

    let title_terms: HashSet<&str> = title.split_whitespace().collect();
    score += query_terms.intersection(&title_terms).count() as f64 * TITLE_TERM_WEIGHT;

    let content_terms: HashSet<&str> = content.split_whitespace().collect();
    score += query_terms.intersection(&content_terms).count() as f64 * CONTENT_TERM_WEIGHT;

    score + candidate.combined_score * PRIOR_WEIGHT
}
