

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::core::models::{Citation, Source};
use crate::utils::word_tokens;

/// Title similarity required alongside an author and year match.
const AUTHOR_ASSISTED_THRESHOLD: f64 = 0.6;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Doi,
    Arxiv,
    Title,
    TitleAuthorYear,
}


#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CitationMatch {
    pub source_id: Uuid,
    pub method: MatchMethod,
    pub title_similarity: f64,
}


fn normalize_title(title: &str) -> String {
    word_tokens(title).join(" ")
}

fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

fn surname(author: &str) -> Option<String> {
    let author = author.trim();
    let last = match author.split_once(',') {
        Some((last, _)) => last,
        None => author.split_whitespace().last()?,
    };
    let last = last.trim().to_lowercase();
    (!last.is_empty()).then_some(last)
}

/// Trigram set similarity over space-padded words.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let mut out = HashSet::new();
    for word in word_tokens(text) {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
        for w in padded.windows(3) {
            out.insert([w[0], w[1], w[2]]);
        }
    }
    out
}

fn years_compatible(a: Option<i32>, b: Option<i32>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Matches extracted citations against the corpus: DOI, then arXiv id,
/// then title with a compatible year, then title plus first author and year.
pub struct CitationMatcher {
    sources: Vec<Source>,
    normalized_titles: Vec<String>,
    by_doi: HashMap<String, usize>,
    by_arxiv: HashMap<String, usize>,
    title_threshold: f64,
}

impl CitationMatcher {
    pub fn new(sources: Vec<Source>, title_threshold: f64) -> Self {
        let mut by_doi = HashMap::new();
        let mut by_arxiv = HashMap::new();
        for (i, s) in sources.iter().enumerate() {
            if let Some(doi) = &s.doi {
                by_doi.entry(normalize_id(doi)).or_insert(i);
            }
            if let Some(arxiv) = &s.arxiv_id {
                by_arxiv.entry(normalize_id(arxiv)).or_insert(i);
            }
        }
        let normalized_titles = sources.iter().map(|s| normalize_title(&s.title)).collect();
        Self {
            sources,
            normalized_titles,
            by_doi,
            by_arxiv,
            title_threshold,
        }
    }

    pub fn source(&self, id: &Uuid) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == *id)
    }

    /// `None` for an external reference. A source never matches itself.
    pub fn match_citation(&self, citation: &Citation) -> Option<CitationMatch> {
        let not_self = |idx: &usize| self.sources[*idx].id != citation.source_id;

        if let Some(idx) = citation
            .doi
            .as_deref()
            .and_then(|d| self.by_doi.get(&normalize_id(d)))
            .filter(|i| not_self(i))
        {
            return Some(self.hit(*idx, MatchMethod::Doi, 1.0));
        }
        if let Some(idx) = citation
            .arxiv_id
            .as_deref()
            .and_then(|a| self.by_arxiv.get(&normalize_id(a)))
            .filter(|i| not_self(i))
        {
            return Some(self.hit(*idx, MatchMethod::Arxiv, 1.0));
        }

        let title = normalize_title(citation.title.as_deref().unwrap_or(""));
        if title.is_empty() {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in self.normalized_titles.iter().enumerate() {
            if !not_self(&idx) || !years_compatible(citation.year, self.sources[idx].year) {
                continue;
            }
            let sim = if *candidate == title { 1.0 } else { trigram_similarity(&title, candidate) };
            if best.is_none_or(|(_, b)| sim > b) {
                best = Some((idx, sim));
            }
        }
        if let Some((idx, sim)) = best.filter(|(_, sim)| *sim >= self.title_threshold) {
            return Some(self.hit(idx, MatchMethod::Title, sim));
        }

        let first_author = citation.authors.first().and_then(|a| surname(a))?;
        let year = citation.year?;
        self.normalized_titles
            .iter()
            .enumerate()
            .filter(|(idx, _)| not_self(idx) && self.sources[*idx].year == Some(year))
            .filter(|(idx, _)| {
                self.sources[*idx]
                    .authors
                    .first()
                    .and_then(|a| surname(a))
                    .is_some_and(|s| s == first_author)
            })
            .map(|(idx, candidate)| (idx, trigram_similarity(&title, candidate)))
            .filter(|(_, sim)| *sim >= AUTHOR_ASSISTED_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, sim)| self.hit(idx, MatchMethod::TitleAuthorYear, sim))
    }

    fn hit(&self, idx: usize, method: MatchMethod, title_similarity: f64) -> CitationMatch {
        CitationMatch {
            source_id: self.sources[idx].id,
            method,
            title_similarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::SourceType;

    fn corpus() -> (Vec<Source>, Uuid) {
        let mut angrist = Source::new(
            SourceType::Textbook,
            "Mostly Harmless Econometrics: An Empiricist's Companion",
            Some(2009),
        );
        angrist.authors = vec!["Angrist, Joshua".to_string()];
        let mut dml = Source::new(
            SourceType::Paper,
            "Double/Debiased Machine Learning for Treatment and Structural Parameters",
            Some(2018),
        );
        dml.doi = Some("10.1111/ectj.12097".to_string());
        dml.arxiv_id = Some("1608.00060".to_string());
        dml.authors = vec!["Victor Chernozhukov".to_string()];
        let citing = Source::new(SourceType::Paper, "Some applied paper", Some(2021));
        let citing_id = citing.id;
        (vec![angrist, dml, citing], citing_id)
    }

    #[test]
    fn test_identifier_priority() {
        let (sources, citing) = corpus();
        let dml_id = sources[1].id;
        let matcher = CitationMatcher::new(sources, 0.85);

        let mut by_doi = Citation::new(citing, "unrelated title", None);
        by_doi.doi = Some("10.1111/ECTJ.12097 ".to_string());
        let hit = matcher.match_citation(&by_doi).unwrap();
        assert_eq!((hit.source_id, hit.method), (dml_id, MatchMethod::Doi));

        let mut by_arxiv = Citation::new(citing, "", None);
        by_arxiv.arxiv_id = Some("1608.00060".to_string());
        assert_eq!(matcher.match_citation(&by_arxiv).unwrap().method, MatchMethod::Arxiv);
    }

    #[test]
    fn test_title_match_requires_compatible_year() {
        let (sources, citing) = corpus();
        let matcher = CitationMatcher::new(sources, 0.85);

        let exact = Citation::new(citing, "Mostly harmless econometrics: an empiricist's companion", Some(2009));
        assert_eq!(matcher.match_citation(&exact).unwrap().method, MatchMethod::Title);

        let no_year = Citation::new(citing, "Mostly Harmless Econometrics - An Empiricist's Companion", None);
        assert!(matcher.match_citation(&no_year).is_some());

        let wrong_year = Citation::new(citing, "Mostly Harmless Econometrics: An Empiricist's Companion", Some(2015));
        assert!(matcher.match_citation(&wrong_year).is_none());
    }

    #[test]
    fn test_author_assisted_fallback() {
        let (sources, citing) = corpus();
        let matcher = CitationMatcher::new(sources, 0.85);
        let mut cit = Citation::new(citing, "Double machine learning for treatment parameters", Some(2018));
        cit.authors = vec!["Chernozhukov, V.".to_string()];
        let hit = matcher.match_citation(&cit).unwrap();
        assert_eq!(hit.method, MatchMethod::TitleAuthorYear);
    }

    #[test]
    fn test_external_reference_and_self_citation() {
        let (sources, citing) = corpus();
        let matcher = CitationMatcher::new(sources, 0.85);
        let external = Citation::new(citing, "A Theory of Justice", Some(1971));
        assert!(matcher.match_citation(&external).is_none());

        let own = Citation::new(citing, "Some applied paper", Some(2021));
        assert!(matcher.match_citation(&own).is_none());
    }

    #[test]
    fn test_trigram_similarity_bounds() {
        assert_eq!(trigram_similarity("causal inference", "causal inference"), 1.0);
        assert_eq!(trigram_similarity("", "x"), 0.0);
        let near = trigram_similarity("causal inference", "causal inferences");
        assert!(near > 0.6 && near < 1.0);
    }
}
