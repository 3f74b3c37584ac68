//! Collaborator seams of the resolution pipeline.
//!
//! The collection resolves free-text queries against a fuzzy index built
//! elsewhere and pushes whatever it finds into a report sink. Both sides
//! are traits so the store logic stays independent of the index
//! implementation and of where results end up.

use crate::collection_db::TrackResult;
use crate::resolution_gate::SearchQuery;
use tracing::info;

/// One candidate track produced by a fuzzy lookup, best matches first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub track_id: i64,
    pub score: f32,
}

/// A ready-to-query fuzzy index over a store's tracks.
pub trait FuzzyIndex: Send + Sync {
    /// Candidate row ids for `query`, ordered best first.
    fn search(&self, query: &SearchQuery) -> Vec<IndexHit>;
}

/// Receives resolved results, including empty ones.
pub trait ReportSink: Send + Sync {
    fn report(&self, query: &SearchQuery, results: Vec<TrackResult>, resolver_id: &str);
}

/// Case-insensitive substring index, scored by how much of the indexed
/// text the query covers.
pub struct SubstringFuzzyIndex {
    entries: Vec<(i64, String)>,
}

impl SubstringFuzzyIndex {
    pub fn new(entries: Vec<(i64, String)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(id, text)| (id, text.to_lowercase()))
            .collect();
        SubstringFuzzyIndex { entries }
    }
}

impl FuzzyIndex for SubstringFuzzyIndex {
    fn search(&self, query: &SearchQuery) -> Vec<IndexHit> {
        let needle = query.fulltext.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .filter(|(_, text)| text.contains(&needle))
            .map(|(id, text)| IndexHit {
                track_id: *id,
                score: needle.len() as f32 / text.len().max(1) as f32,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits
    }
}

/// Logs every report. The default sink when nothing downstream consumes
/// results.
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn report(&self, query: &SearchQuery, results: Vec<TrackResult>, resolver_id: &str) {
        info!(
            "Resolved {:?} to {} result(s) via {}",
            query.fulltext,
            results.len(),
            resolver_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SubstringFuzzyIndex {
        SubstringFuzzyIndex::new(vec![
            (1, "Breathe Pink Floyd The Dark Side of the Moon".to_string()),
            (2, "Time Pink Floyd The Dark Side of the Moon".to_string()),
            (3, "Echoes Pink Floyd Meddle".to_string()),
        ])
    }

    #[test]
    fn matches_are_case_insensitive() {
        let hits = index().search(&SearchQuery::new("pink floyd"));
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn narrower_queries_narrow_the_hits() {
        let hits = index().search(&SearchQuery::new("Meddle"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].track_id, 3);
    }

    #[test]
    fn better_coverage_scores_first() {
        let hits = index().search(&SearchQuery::new("Pink Floyd"));
        // The shortest indexed text is covered the most by the query.
        assert_eq!(hits[0].track_id, 3);
    }

    #[test]
    fn blank_query_finds_nothing() {
        assert!(index().search(&SearchQuery::new("   ")).is_empty());
    }
}
