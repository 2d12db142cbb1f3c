

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::canonical::{canonicalize, reverse_abbreviations};
use crate::core::models::Concept;

/// What the registry remembers about an already-known concept.
#[derive(Debug, Clone)]
pub struct KnownConcept {
    pub id: Uuid,
    pub name: String,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub definition: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl From<&Concept> for KnownConcept {
    fn from(c: &Concept) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            canonical_name: canonicalize(&c.name),
            aliases: c.aliases.clone(),
            definition: c.definition.clone(),
            embedding: c.embedding.clone(),
        }
    }
}

impl KnownConcept {
    /// Canonical name, canonical aliases and reverse abbreviation keys.
    pub fn all_aliases(&self) -> HashSet<String> {
        let mut forms: HashSet<String> = HashSet::new();
        forms.insert(self.canonical_name.clone());
        forms.extend(self.aliases.iter().map(|a| canonicalize(a)));
        forms.extend(reverse_abbreviations(&self.canonical_name).map(str::to_string));
        forms
    }

    pub(crate) fn embedding_text(&self) -> String {
        format!("{}: {}", self.name, self.definition.as_deref().unwrap_or(""))
    }
}

/// Canonical name and alias forms to concept id. First registration wins.
#[derive(Debug, Default)]
pub struct ConceptRegistry {
    index: HashMap<String, Uuid>,
    known: HashMap<Uuid, KnownConcept>,
}

impl ConceptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_known_concept(&mut self, name: &str, id: Uuid) {
        let canonical = canonicalize(name);
        self.index.entry(canonical.clone()).or_insert(id);
        self.known.entry(id).or_insert_with(|| KnownConcept {
            id,
            name: name.to_string(),
            canonical_name: canonical,
            aliases: Vec::new(),
            definition: None,
            embedding: None,
        });
    }

    pub fn load_known_concepts(&mut self, concepts: &HashMap<String, Uuid>) {
        for (name, id) in concepts {
            self.register_known_concept(name, *id);
        }
    }

    /// Indexes the canonical name and every alias.
    pub fn register(&mut self, concept: KnownConcept) {
        for form in concept.all_aliases() {
            self.index.entry(form).or_insert(concept.id);
        }
        self.known.entry(concept.id).or_insert(concept);
    }

    pub fn find_existing_concept(&self, name: &str) -> Option<Uuid> {
        self.index.get(&canonicalize(name)).copied()
    }

    /// Looks up the canonical name first, then each alias form.
    pub fn find_match(&self, concept: &KnownConcept) -> Option<Uuid> {
        if let Some(id) = self.index.get(&concept.canonical_name) {
            return Some(*id);
        }
        let mut forms: Vec<String> = concept.all_aliases().into_iter().collect();
        forms.sort();
        forms.iter().find_map(|f| self.index.get(f).copied())
    }

    pub fn get(&self, id: &Uuid) -> Option<&KnownConcept> {
        self.known.get(id)
    }

    /// Drops concepts whose insert never committed.
    pub fn forget(&mut self, ids: &[Uuid]) {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        self.index.retain(|_, id| !ids.contains(id));
        self.known.retain(|id, _| !ids.contains(id));
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.known.clear();
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
