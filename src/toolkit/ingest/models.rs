

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::core::error::{KbError, Result};
use crate::core::gate::BatchStatus;
use crate::core::models::{Concept, ConceptType, RelationshipType};

fn default_concept_confidence() -> f64 {
    0.8
}

fn default_relationship_confidence() -> f64 {
    0.7
}


/// A concept as the extractor emits it, types still strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawConcept {
    pub name: String,
    pub concept_type: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_concept_confidence")]
    pub confidence: f64,
}

impl RawConcept {
    pub fn new(name: impl Into<String>, concept_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concept_type: concept_type.into(),
            definition: None,
            aliases: Vec::new(),
            confidence: default_concept_confidence(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Strict parse into a stored concept. Unknown types are rejected.
    pub fn validate(&self) -> Result<Concept> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(KbError::Validation("concept name is empty".to_string()));
        }
        let concept_type = ConceptType::from_str(self.concept_type.trim()).map_err(|_| {
            KbError::Validation(format!("unknown concept type '{}' for '{}'", self.concept_type, name))
        })?;
        check_confidence(self.confidence, name)?;

        let mut concept = Concept::new(name, concept_type).with_aliases(
            self.aliases
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        );
        concept.definition = self.definition.clone().filter(|d| !d.trim().is_empty());
        concept.confidence_score = self.confidence;
        Ok(concept)
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationship {
    pub source_concept: String,
    pub target_concept: String,
    pub relationship_type: String,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default = "default_relationship_confidence")]
    pub confidence: f64,
}

impl RawRelationship {
    pub fn new(
        source_concept: impl Into<String>,
        target_concept: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            source_concept: source_concept.into(),
            target_concept: target_concept.into(),
            relationship_type: relationship_type.into(),
            evidence: None,
            confidence: default_relationship_confidence(),
        }
    }

    pub fn label(&self) -> String {
        format!("{} -{}-> {}", self.source_concept, self.relationship_type, self.target_concept)
    }

    pub fn parse_type(&self) -> Result<RelationshipType> {
        RelationshipType::from_str(self.relationship_type.trim()).map_err(|_| {
            KbError::Validation(format!("unknown relationship type '{}'", self.relationship_type))
        })
    }
}

fn check_confidence(confidence: f64, item: &str) -> Result<()> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(KbError::Validation(format!(
            "confidence {} for '{}' is outside [0, 1]",
            confidence, item
        )));
    }
    Ok(())
}

pub(crate) fn validate_relationship_confidence(rel: &RawRelationship) -> Result<()> {
    check_confidence(rel.confidence, &rel.label())
}


/// Extractor output for one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub concepts: Vec<RawConcept>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    pub chunk_id: Uuid,
    pub concepts: Vec<RawConcept>,
    pub relationships: Vec<RawRelationship>,
}

impl ExtractionBatch {
    pub fn new(chunk_id: Uuid, extraction: RawExtraction) -> Self {
        Self {
            chunk_id,
            concepts: extraction.concepts,
            relationships: extraction.relationships,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty() && self.relationships.is_empty()
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub item: String,
    pub reason: String,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub chunk_id: Uuid,
    pub status: BatchStatus,
    pub new_concepts: usize,
    pub matched_concepts: usize,
    pub relationships: usize,
    pub links: usize,
    pub below_confidence: usize,
    pub rejected: Vec<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl IngestReport {
    pub(crate) fn new(chunk_id: Uuid) -> Self {
        Self {
            chunk_id,
            status: BatchStatus::Completed,
            new_concepts: 0,
            matched_concepts: 0,
            relationships: 0,
            links: 0,
            below_confidence: 0,
            rejected: Vec::new(),
            failure: None,
        }
    }

    pub(crate) fn reject(&mut self, item: impl Into<String>, error: KbError) {
        self.rejected.push(Rejection {
            item: item.into(),
            reason: error.to_string(),
        });
    }

    pub(crate) fn fail(&mut self, error: KbError) {
        self.status = BatchStatus::Failed;
        self.failure = Some(error.to_string());
    }
}
