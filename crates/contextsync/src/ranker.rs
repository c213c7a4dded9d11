//! Keyword-density relevance scoring.

/// Score assigned to every document when there is no query.
pub const NEUTRAL_RELEVANCE: f64 = 0.5;

/// Scores document text against a query.
///
/// Relevance is the share of words that are query hits, scaled by 100 and
/// capped at 1.0: `min(1, occurrences / words * 100)`.  Normalizing by
/// word count keeps long documents from winning on volume alone; one hit
/// per hundred words already saturates the score.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceRanker;

impl RelevanceRanker {
    pub fn new() -> Self {
        Self
    }

    /// Relevance of `content` for `query`, always within `[0.0, 1.0]`.
    pub fn score(&self, content: &str, query: Option<&str>) -> f64 {
        let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            return NEUTRAL_RELEVANCE;
        };

        let words = content.split_whitespace().count();
        if words == 0 {
            return 0.0;
        }

        let occurrences = content
            .to_lowercase()
            .matches(&query.to_lowercase())
            .count();

        (occurrences as f64 / words as f64 * 100.0).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_query_is_neutral() {
        let r = RelevanceRanker::new();
        assert_eq!(r.score("anything at all", None), NEUTRAL_RELEVANCE);
        assert_eq!(r.score("", Some("  ")), NEUTRAL_RELEVANCE);
    }

    #[test]
    fn empty_document_scores_zero() {
        assert_eq!(RelevanceRanker::new().score("   \n", Some("rust")), 0.0);
    }

    #[test]
    fn density_is_case_insensitive() {
        let r = RelevanceRanker::new();
        // 1 hit in 200 words -> 0.5
        let mut doc = vec!["filler"; 199];
        doc.push("Rust");
        let text = doc.join(" ");
        let score = r.score(&text, Some("rust"));
        assert!((score - 0.5).abs() < 1e-9, "score = {score}");
    }

    #[test]
    fn dense_documents_are_capped() {
        let r = RelevanceRanker::new();
        assert_eq!(r.score("rust rust rust", Some("rust")), 1.0);
    }

    #[test]
    fn long_documents_are_not_favoured() {
        let r = RelevanceRanker::new();
        let short = format!("rust {}", vec!["x"; 299].join(" "));
        let long = format!("rust rust {}", vec!["x"; 998].join(" "));
        assert!(r.score(&short, Some("rust")) > r.score(&long, Some("rust")));
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let r = RelevanceRanker::new();
        for doc in ["", "a", "a a a a", "b c d e f g", "aaaa"] {
            for q in [None, Some("a"), Some("zz"), Some("")] {
                let s = r.score(doc, q);
                assert!((0.0..=1.0).contains(&s), "{doc:?} {q:?} -> {s}");
            }
        }
    }
}
