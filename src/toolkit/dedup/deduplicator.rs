

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::canonical::canonicalize;
use super::registry::{ConceptRegistry, KnownConcept};
use crate::core::gate::BatchStatus;
use crate::core::models::Concept;
use crate::db::SharedStore;
use crate::llm::{EmbeddingProvider, SignalGuard};
use crate::toolkit::scoring::{raw_cosine, word_jaccard};


pub const MERGE_THRESHOLD: f64 = 0.95;

/// Score for an alias-level match.
pub const ALIAS_SIMILARITY: f64 = 0.95;

const BELOW_EXACT: f64 = 1.0 - 1e-9;


pub fn should_merge(similarity: f64, is_new: bool) -> bool {
    !is_new && similarity > MERGE_THRESHOLD
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptMatch {
    pub concept: Concept,
    pub canonical_name: String,
    pub matched_concept_id: Option<Uuid>,
    pub similarity_score: f64,
    pub is_new: bool,
}

impl ConceptMatch {
    pub fn should_merge(&self) -> bool {
        should_merge(self.similarity_score, self.is_new)
    }

    /// The id the store should use for this concept.
    pub fn resolved_id(&self) -> Uuid {
        self.matched_concept_id.unwrap_or(self.concept.id)
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupReport {
    pub status: BatchStatus,
    pub processed: usize,
    pub clusters: usize,
    pub merged: usize,
    pub errors: usize,
}

impl DedupReport {
    fn empty(status: BatchStatus) -> Self {
        Self {
            status,
            processed: 0,
            clusters: 0,
            merged: 0,
            errors: 0,
        }
    }
}


pub struct Deduplicator {
    registry: Arc<Mutex<ConceptRegistry>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    guard: SignalGuard,
}

impl Deduplicator {
    pub fn new(
        registry: Arc<Mutex<ConceptRegistry>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        guard: SignalGuard,
    ) -> Self {
        Self {
            registry,
            embedder,
            guard,
        }
    }

    pub fn registry(&self) -> &Arc<Mutex<ConceptRegistry>> {
        &self.registry
    }

    /// Exclusive registry access. Writers keep the guard until their
    /// concepts are stored so nobody resolves against an uncommitted id.
    pub async fn lock_registry(&self) -> MutexGuard<'_, ConceptRegistry> {
        self.registry.lock().await
    }

    pub async fn register_known_concept(&self, name: &str, id: Uuid) {
        self.registry.lock().await.register_known_concept(name, id);
    }

    pub async fn load_known_concepts(&self, concepts: &HashMap<String, Uuid>) {
        self.registry.lock().await.load_known_concepts(concepts);
    }

    pub async fn find_existing_concept(&self, name: &str) -> Option<Uuid> {
        self.registry.lock().await.find_existing_concept(name)
    }

    /// Canonical name, canonical aliases and reverse abbreviations.
    pub fn get_all_aliases(concept: &Concept) -> Vec<String> {
        let mut aliases: Vec<String> = KnownConcept::from(concept).all_aliases().into_iter().collect();
        aliases.sort();
        aliases
    }

    pub async fn compute_similarity(&self, a: &Concept, b: &Concept) -> f64 {
        self.similarity(&KnownConcept::from(a), &KnownConcept::from(b)).await
    }

    async fn similarity(&self, a: &KnownConcept, b: &KnownConcept) -> f64 {
        if a.canonical_name == b.canonical_name {
            return 1.0;
        }
        if !a.all_aliases().is_disjoint(&b.all_aliases()) {
            return ALIAS_SIMILARITY;
        }

        let semantic = match (&a.embedding, &b.embedding) {
            (Some(ea), Some(eb)) => Some(raw_cosine(ea, eb)),
            _ => self.embedding_similarity(a, b).await,
        };
        semantic
            .unwrap_or_else(|| word_jaccard(&a.canonical_name, &b.canonical_name))
            .clamp(0.0, BELOW_EXACT)
    }

    async fn embedding_similarity(&self, a: &KnownConcept, b: &KnownConcept) -> Option<f64> {
        let embedder = self.embedder.as_ref()?;
        let (ta, tb) = (a.embedding_text(), b.embedding_text());
        let ea = self.guard.call(embedder.embed(&ta)).await;
        let eb = self.guard.call(embedder.embed(&tb)).await;
        match (ea, eb) {
            (Ok(ea), Ok(eb)) => Some(raw_cosine(&ea, &eb)),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Embedding similarity failed, using lexical fallback: {}", e);
                None
            }
        }
    }

    /// Decides new-vs-existing for each concept in input order, holding
    /// the registry lock for the whole batch.
    pub async fn deduplicate_batch(&self, concepts: Vec<Concept>) -> Vec<ConceptMatch> {
        let mut registry = self.registry.lock().await;
        self.deduplicate_locked(&mut registry, concepts).await
    }

    /// `deduplicate_batch` against a registry the caller already holds.
    pub async fn deduplicate_locked(
        &self,
        registry: &mut ConceptRegistry,
        concepts: Vec<Concept>,
    ) -> Vec<ConceptMatch> {
        if concepts.is_empty() {
            return Vec::new();
        }
        let total = concepts.len();
        let mut results = Vec::with_capacity(total);

        for mut concept in concepts {
            concept.canonical_name = canonicalize(&concept.name);
            let known = KnownConcept::from(&concept);

            let existing = registry
                .find_match(&known)
                .and_then(|id| registry.get(&id).cloned());

            let matched = match existing {
                Some(target) => {
                    let similarity = self.similarity(&known, &target).await;
                    debug!(
                        "'{}' matches {} ({:.2})",
                        concept.name, target.canonical_name, similarity
                    );
                    ConceptMatch {
                        canonical_name: concept.canonical_name.clone(),
                        concept,
                        matched_concept_id: Some(target.id),
                        similarity_score: similarity,
                        is_new: false,
                    }
                }
                None => {
                    registry.register(known);
                    ConceptMatch {
                        canonical_name: concept.canonical_name.clone(),
                        concept,
                        matched_concept_id: None,
                        similarity_score: 0.0,
                        is_new: true,
                    }
                }
            };
            results.push(matched);
        }

        let new_count = results.iter().filter(|m| m.is_new).count();
        info!(
            "Deduplication complete: total={}, new={}, matched={}",
            total,
            new_count,
            total - new_count
        );
        results
    }

    /// Rebuilds the registry from every stored concept. The lock is taken
    /// before listing so no ingest commits between the read and the swap.
    pub async fn load_from_store(&self, store: &SharedStore) -> crate::Result<usize> {
        let mut registry = self.registry.lock().await;
        let concepts = store.list_concepts().await?;
        Ok(reload(&mut registry, &concepts))
    }

    /// Full-corpus pass: concepts sharing a canonical name are folded into
    /// one keeper (validated first, then oldest). The registry stays
    /// locked until it has been rebuilt, so ingests wait for the pass.
    pub async fn deduplicate_corpus(&self, store: &SharedStore) -> DedupReport {
        let mut registry = self.registry.lock().await;
        let concepts = match store.list_concepts().await {
            Ok(c) => c,
            Err(e) => {
                warn!("Corpus dedup aborted, concepts unavailable: {}", e);
                let mut report = DedupReport::empty(BatchStatus::Failed);
                report.errors = 1;
                return report;
            }
        };
        if concepts.is_empty() {
            return DedupReport::empty(BatchStatus::Empty);
        }

        let mut clusters: BTreeMap<String, Vec<Concept>> = BTreeMap::new();
        for concept in &concepts {
            clusters
                .entry(canonicalize(&concept.name))
                .or_default()
                .push(concept.clone());
        }

        let mut report = DedupReport::empty(BatchStatus::Completed);
        report.processed = concepts.len();
        report.clusters = clusters.len();

        for (canonical, mut members) in clusters {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| {
                b.validated
                    .cmp(&a.validated)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
            let keeper = KnownConcept::from(&members[0]);
            let mut merged = Vec::new();
            for member in &members[1..] {
                let similarity = self.similarity(&KnownConcept::from(member), &keeper).await;
                if should_merge(similarity, false) {
                    merged.push(member.id);
                }
            }
            if merged.is_empty() {
                continue;
            }
            match store.merge_concepts(keeper.id, &merged).await {
                Ok(()) => {
                    debug!("Merged {} duplicates of '{}'", merged.len(), canonical);
                    report.merged += merged.len();
                }
                Err(e) => {
                    warn!("Merge into '{}' failed: {}", canonical, e);
                    report.errors += 1;
                }
            }
        }

        match store.list_concepts().await {
            Ok(remaining) => {
                reload(&mut registry, &remaining);
            }
            Err(e) => {
                warn!("Registry reload after corpus dedup failed: {}", e);
                report.errors += 1;
            }
        }
        info!(
            "Corpus dedup complete: processed={}, clusters={}, merged={}, errors={}",
            report.processed, report.clusters, report.merged, report.errors
        );
        report
    }
}

fn reload(registry: &mut ConceptRegistry, concepts: &[Concept]) -> usize {
    registry.clear();
    for concept in concepts {
        registry.register(KnownConcept::from(concept));
    }
    registry.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ConceptType;
    use crate::db::{ConceptStore, InMemoryStore};
    use crate::llm::TokenBucket;
    use std::time::Duration;

    fn dedup() -> Deduplicator {
        Deduplicator::new(
            Arc::new(Mutex::new(ConceptRegistry::new())),
            None,
            SignalGuard::new(Arc::new(TokenBucket::new(100.0, 10)), Duration::from_secs(1)),
        )
    }

    fn method(name: &str) -> Concept {
        Concept::new(name, ConceptType::Method)
    }

    #[test]
    fn test_merge_threshold_is_strict() {
        assert!(!should_merge(0.95, false));
        assert!(should_merge(0.9500001, false));
        assert!(!should_merge(1.0, true));
    }

    #[tokio::test]
    async fn test_iv_cluster() {
        let d = dedup();
        let results = d
            .deduplicate_batch(vec![method("instrumental variables"), method("IV"), method("2SLS")])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_new);
        assert_eq!(results[0].matched_concept_id, None);

        assert!(!results[1].is_new);
        assert_eq!(results[1].matched_concept_id, Some(results[0].concept.id));
        assert_eq!(results[1].similarity_score, 1.0);
        assert!(results[1].should_merge());

        assert!(results[2].is_new);
        assert_eq!(results[2].canonical_name, "two-stage least squares");
    }

    #[tokio::test]
    async fn test_registry_match() {
        let d = dedup();
        let existing = Uuid::new_v4();
        d.register_known_concept("Difference-in-Differences", existing).await;

        let results = d.deduplicate_batch(vec![method("DiD")]).await;
        assert!(!results[0].is_new);
        assert_eq!(results[0].matched_concept_id, Some(existing));
        assert_eq!(d.find_existing_concept("dd").await, Some(existing));
    }

    #[tokio::test]
    async fn test_alias_match_scores_exactly_alias_similarity() {
        let d = dedup();
        let known = method("synthetic control").with_aliases(["synth"]);
        d.registry().lock().await.register(KnownConcept::from(&known));

        let results = d.deduplicate_batch(vec![method("Synth")]).await;
        assert!(!results[0].is_new);
        assert_eq!(results[0].similarity_score, ALIAS_SIMILARITY);
        assert!(!results[0].should_merge());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        assert!(dedup().deduplicate_batch(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_fallbacks() {
        let d = dedup();
        assert_eq!(d.compute_similarity(&method("IV"), &method("instrumental variables")).await, 1.0);

        let mut a = method("double machine learning");
        let mut b = method("debiased learning");
        let lexical = d.compute_similarity(&a, &b).await;
        assert!((lexical - 0.25).abs() < 1e-9);

        a.embedding = Some(vec![1.0, 0.0]);
        b.embedding = Some(vec![1.0, 0.0]);
        let semantic = d.compute_similarity(&a, &b).await;
        assert!(semantic < 1.0 && semantic > MERGE_THRESHOLD);
    }

    #[test]
    fn test_get_all_aliases_includes_reverse_abbreviations() {
        let concept = method("Instrumental Variables").with_aliases(["instruments"]);
        let aliases = Deduplicator::get_all_aliases(&concept);
        assert!(aliases.contains(&"instrumental variables".to_string()));
        assert!(aliases.contains(&"iv".to_string()));
        assert!(aliases.contains(&"instruments".to_string()));
    }

    #[tokio::test]
    async fn test_corpus_pass_merges_and_reloads() {
        let store = Arc::new(InMemoryStore::new());
        let mut keeper = method("Instrumental Variables");
        keeper.validated = true;
        let dup = method("IV");
        let other = method("lasso");
        store
            .create_concepts(&[dup.clone(), keeper.clone(), other.clone()])
            .await
            .unwrap();

        let shared: SharedStore = store.clone();
        let d = dedup();
        let report = d.deduplicate_corpus(&shared).await;

        assert_eq!(report.status, BatchStatus::Completed);
        assert_eq!(report.processed, 3);
        assert_eq!(report.clusters, 2);
        assert_eq!(report.merged, 1);
        assert!(store.concept(dup.id).is_none());
        assert_eq!(d.find_existing_concept("ivs").await, Some(keeper.id));
    }

    #[tokio::test]
    async fn test_corpus_pass_blocks_registry_until_rebuilt() {
        let store = Arc::new(InMemoryStore::new());
        let mut keeper = method("Instrumental Variables");
        keeper.validated = true;
        let dup = method("IV");
        store.create_concepts(&[keeper.clone(), dup.clone()]).await.unwrap();
        store.delay_writes(50);

        let shared: SharedStore = store.clone();
        let d = dedup();
        d.register_known_concept("IV", dup.id).await;

        let (report, seen) = tokio::join!(d.deduplicate_corpus(&shared), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            d.find_existing_concept("iv").await
        });
        assert_eq!(report.merged, 1);
        assert_eq!(seen, Some(keeper.id));
    }

    #[tokio::test]
    async fn test_corpus_pass_on_empty_store() {
        let shared: SharedStore = Arc::new(InMemoryStore::new());
        let report = dedup().deduplicate_corpus(&shared).await;
        assert_eq!(report.status, BatchStatus::Empty);
        assert_eq!(report.merged, 0);
    }
}
