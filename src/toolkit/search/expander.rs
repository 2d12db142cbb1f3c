

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::query_concepts::match_query_concepts;
use crate::core::error::{KbError, Result};
use crate::db::WeightedTerm;
use crate::llm::{ExpansionProvider, SignalGuard};
use crate::toolkit::graph::GraphQueryEngine;
use crate::utils::word_tokens;

pub const ORIGINAL_TERM_WEIGHT: f64 = 1.0;
pub const EXPANSION_TERM_WEIGHT: f64 = 0.5;

const GRAPH_QUERY_CONCEPTS: usize = 3;
const GRAPH_SEED_CONCEPTS: usize = 2;

lazy_static! {
    static ref DEFAULT_SYNONYMS: HashMap<String, Vec<String>> = {
        let entries: &[(&str, &[&str])] = &[
            ("iv", &["instrumental variables", "instrumental variable", "2sls"]),
            ("instrumental variables", &["iv", "2sls", "two-stage least squares"]),
            ("2sls", &["two-stage least squares", "instrumental variables"]),
            ("did", &["difference-in-differences", "diff-in-diff"]),
            ("difference-in-differences", &["did", "event study"]),
            ("rdd", &["regression discontinuity", "regression discontinuity design"]),
            ("regression discontinuity", &["rdd", "running variable"]),
            ("psm", &["propensity score matching", "matching estimator"]),
            ("propensity score", &["psm", "inverse probability weighting"]),
            ("ate", &["average treatment effect"]),
            ("late", &["local average treatment effect", "complier average causal effect"]),
            ("dml", &["double machine learning", "debiased machine learning"]),
            ("rct", &["randomized controlled trial", "randomized experiment"]),
            ("scm", &["synthetic control method", "synthetic control"]),
            ("endogeneity", &["endogenous regressor", "omitted variable bias"]),
            ("dag", &["directed acyclic graph", "causal graph"]),
        ];
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    };
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExpansionStrategy {
    Synonym,
    Graph,
    Llm,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionTerm {
    pub term: String,
    pub strategy: ExpansionStrategy,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub original: String,
    pub expanded_text: String,
    /// Original words at full weight, expansion words boosted down.
    pub lexical_query: Vec<WeightedTerm>,
    pub terms: Vec<ExpansionTerm>,
    /// More candidate terms than `max_terms`.
    pub truncated: bool,
    /// A graph walk stopped on its traversal budget.
    #[serde(default)]
    pub graph_truncated: bool,
}

impl ExpandedQuery {
    pub fn unchanged(query: &str) -> Self {
        Self {
            original: query.to_string(),
            expanded_text: query.to_string(),
            lexical_query: build_lexical_query(query, &[]),
            terms: Vec::new(),
            truncated: false,
            graph_truncated: false,
        }
    }

    pub fn is_expanded(&self) -> bool {
        !self.terms.is_empty()
    }

    pub fn terms_from(&self, strategy: ExpansionStrategy) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|t| t.strategy == strategy)
            .map(|t| t.term.as_str())
            .collect()
    }
}

/// Word-level weighted terms; a word keeps the highest weight it appears with.
pub fn build_lexical_query(original: &str, expansions: &[ExpansionTerm]) -> Vec<WeightedTerm> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for word in word_tokens(original) {
        if seen.insert(word.clone()) {
            out.push(WeightedTerm::new(word, ORIGINAL_TERM_WEIGHT));
        }
    }
    for term in expansions {
        for word in word_tokens(&term.term) {
            if seen.insert(word.clone()) {
                out.push(WeightedTerm::new(word, EXPANSION_TERM_WEIGHT));
            }
        }
    }
    out
}


/// Lowercased term → synonyms.
#[derive(Debug, Clone, Default)]
pub struct SynonymMap {
    entries: HashMap<String, Vec<String>>,
}

impl SynonymMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self {
            entries: DEFAULT_SYNONYMS.clone(),
        }
    }

    /// JSON object of `term -> [synonym, ...]`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KbError::Config(format!("cannot read synonyms {}: {}", path.display(), e)))?;
        let parsed: HashMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        let mut map = Self::new();
        for (term, synonyms) in parsed {
            map.insert(&term, synonyms);
        }
        info!("Loaded {} synonym entries from {}", map.len(), path.display());
        Ok(map)
    }

    pub fn insert<I, S>(&mut self, term: &str, synonyms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = synonyms
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self.entries.insert(term.trim().to_lowercase(), values);
    }

    pub fn get(&self, term: &str) -> Option<&[String]> {
        self.entries.get(&term.to_lowercase()).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


/// Graph expansion terms and whether a neighbourhood walk was cut short.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphTerms {
    pub terms: Vec<String>,
    pub truncated: bool,
}

struct LlmExpansion {
    provider: Arc<dyn ExpansionProvider>,
    guard: SignalGuard,
    max_terms: usize,
}

/// Adds synonyms, graph neighbours and optionally LLM suggestions to a
/// query for recall.
pub struct QueryExpander {
    synonyms: SynonymMap,
    graph: Option<Arc<GraphQueryEngine>>,
    llm: Option<LlmExpansion>,
    max_terms: usize,
    graph_hops: usize,
}

impl QueryExpander {
    pub fn new(synonyms: SynonymMap, max_terms: usize) -> Self {
        Self {
            synonyms,
            graph: None,
            llm: None,
            max_terms,
            graph_hops: 1,
        }
    }

    pub fn with_graph(mut self, graph: Arc<GraphQueryEngine>, hops: usize) -> Self {
        self.graph = Some(graph);
        self.graph_hops = hops.clamp(1, 2);
        self
    }

    pub fn with_llm(mut self, provider: Arc<dyn ExpansionProvider>, guard: SignalGuard, max_terms: usize) -> Self {
        self.llm = Some(LlmExpansion {
            provider,
            guard,
            max_terms,
        });
        self
    }

    pub fn synonyms(&self) -> &SynonymMap {
        &self.synonyms
    }

    /// Whole query, single words, then any contained multi-word key.
    pub fn expand_with_synonyms(&self, query: &str) -> Vec<String> {
        let query_lower = query.trim().to_lowercase();
        let words = word_tokens(&query_lower);
        let padded = format!(" {} ", words.join(" "));

        let mut keys: Vec<&str> = Vec::new();
        if self.synonyms.entries.contains_key(&query_lower) {
            keys.push(&query_lower);
        }
        for word in &words {
            if self.synonyms.entries.contains_key(word) {
                keys.push(word);
            }
        }
        let mut multi: Vec<&String> = self
            .synonyms
            .entries
            .keys()
            .filter(|k| k.contains(' ') && padded.contains(&format!(" {} ", k)))
            .collect();
        multi.sort();
        keys.extend(multi.into_iter().map(String::as_str));

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for key in keys {
            if !seen.insert(key.to_string()) {
                continue;
            }
            for synonym in self.synonyms.entries.get(key).into_iter().flatten() {
                if !query_lower.contains(synonym.as_str()) && !out.contains(synonym) {
                    out.push(synonym.clone());
                }
            }
        }
        out
    }

    /// Names and aliases of concepts near the ones the query mentions.
    /// Graph trouble yields no terms.
    pub async fn expand_with_graph(&self, query: &str) -> GraphTerms {
        let Some(engine) = &self.graph else {
            return GraphTerms::default();
        };
        let graph = match engine.graph().await {
            Ok(g) => g,
            Err(e) => {
                warn!("Graph expansion skipped: {}", e);
                return GraphTerms::default();
            }
        };
        let seeds: Vec<Uuid> = match_query_concepts(query, graph.concepts(), GRAPH_QUERY_CONCEPTS);
        let query_lower = query.to_lowercase();

        let mut out: Vec<String> = Vec::new();
        let mut truncated = false;
        for seed in seeds.into_iter().take(GRAPH_SEED_CONCEPTS) {
            let neighborhood = match engine.get_neighborhood(seed, self.graph_hops, self.max_terms).await {
                Ok(Some(n)) => n,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Graph expansion for {} failed: {}", seed, e);
                    continue;
                }
            };
            truncated |= neighborhood.truncated;
            for neighbor in &neighborhood.concepts {
                let concept = &neighbor.concept;
                let names = std::iter::once(&concept.canonical_name).chain(concept.aliases.iter());
                for name in names {
                    let lower = name.trim().to_lowercase();
                    if !lower.is_empty() && !query_lower.contains(&lower) && !out.contains(&lower) {
                        out.push(lower);
                    }
                }
            }
        }
        if truncated {
            warn!("Graph expansion for '{}' hit the traversal budget", crate::safe_truncate(query, 100));
        }
        GraphTerms { terms: out, truncated }
    }

    /// Model-suggested terms not already in the query. Any provider
    /// failure yields no terms.
    pub async fn expand_with_llm(&self, query: &str) -> Vec<String> {
        let Some(llm) = &self.llm else {
            return Vec::new();
        };
        let terms = match llm.guard.call(llm.provider.expand(query, llm.max_terms)).await {
            Ok(terms) => terms,
            Err(e) => {
                warn!("LLM expansion failed ({}): {}", llm.provider.provider_name(), e);
                return Vec::new();
            }
        };
        let query_lower = query.to_lowercase();
        let mut out: Vec<String> = Vec::new();
        for term in terms {
            let lower = term.trim().to_lowercase();
            if !lower.is_empty() && !query_lower.contains(&lower) && !out.contains(&lower) {
                out.push(lower);
            }
        }
        out.truncate(llm.max_terms);
        out
    }

    pub async fn expand(&self, query: &str) -> ExpandedQuery {
        let query = query.trim();
        if query.is_empty() {
            return ExpandedQuery::unchanged(query);
        }

        let mut candidates: Vec<ExpansionTerm> = self
            .expand_with_synonyms(query)
            .into_iter()
            .map(|term| ExpansionTerm {
                term,
                strategy: ExpansionStrategy::Synonym,
            })
            .collect();
        let graph_terms = self.expand_with_graph(query).await;
        let graph_truncated = graph_terms.truncated;
        candidates.extend(graph_terms.terms.into_iter().map(|term| ExpansionTerm {
            term,
            strategy: ExpansionStrategy::Graph,
        }));
        candidates.extend(self.expand_with_llm(query).await.into_iter().map(|term| ExpansionTerm {
            term,
            strategy: ExpansionStrategy::Llm,
        }));

        let mut seen = HashSet::new();
        candidates.retain(|t| seen.insert(t.term.to_lowercase()));
        let truncated = candidates.len() > self.max_terms;
        candidates.truncate(self.max_terms);

        if candidates.is_empty() {
            return ExpandedQuery {
                graph_truncated,
                ..ExpandedQuery::unchanged(query)
            };
        }

        let expanded_text = std::iter::once(query)
            .chain(candidates.iter().map(|t| t.term.as_str()))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            "Query expanded: '{}' +{} terms (truncated={})",
            crate::safe_truncate(query, 100),
            candidates.len(),
            truncated
        );

        ExpandedQuery {
            original: query.to_string(),
            expanded_text,
            lexical_query: build_lexical_query(query, &candidates),
            terms: candidates,
            truncated,
            graph_truncated,
        }
    }
}
