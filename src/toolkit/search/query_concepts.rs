

use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::core::models::Concept;
use crate::toolkit::dedup::canonicalize;

pub const MAX_QUERY_CONCEPTS: usize = 5;

/// Phrase match bounded by non-word characters or the ends of the text,
/// so "ai" does not match inside "explain".
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    Regex::new(&format!(r"(?:^|\W){}(?:$|\W)", regex::escape(phrase)))
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

fn mentions(query_lower: &str, query_canonical: &str, concept: &Concept) -> bool {
    let canonical = concept.canonical_name.as_str();
    if !canonical.is_empty() && (query_canonical == canonical || contains_phrase(query_lower, canonical)) {
        return true;
    }
    concept.aliases.iter().any(|alias| {
        let alias = alias.trim().to_lowercase();
        !alias.is_empty() && contains_phrase(query_lower, &alias)
    })
}

/// Known concepts mentioned in the query text, in store order.
pub fn match_query_concepts(query: &str, concepts: &[Concept], max: usize) -> Vec<Uuid> {
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() || max == 0 {
        return Vec::new();
    }
    let query_canonical = canonicalize(&query_lower);

    let matched: Vec<Uuid> = concepts
        .iter()
        .filter(|c| mentions(&query_lower, &query_canonical, c))
        .map(|c| c.id)
        .take(max)
        .collect();
    debug!("Query '{}' mentions {} known concepts", crate::safe_truncate(query, 100), matched.len());
    matched
}
