

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::toolkit::dedup::canonicalize;


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, IntoStaticStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConceptType {
    Method,
    Assumption,
    Problem,
    Definition,
    Theorem,
}


#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
    Display,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Requires,
    Uses,
    Addresses,
    Generalizes,
    Specializes,
    AlternativeTo,
    Extends,
}


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, IntoStaticStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    Paper,
    Textbook,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: Uuid,
    pub name: String,
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub concept_type: ConceptType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub confidence_score: f64,
    #[serde(default)]
    pub validated: bool,
    pub created_at: DateTime<Utc>,
}

impl Concept {
    pub fn new(name: impl Into<String>, concept_type: ConceptType) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            canonical_name: canonicalize(&name),
            name,
            aliases: Vec::new(),
            concept_type,
            definition: None,
            embedding: None,
            confidence_score: 1.0,
            validated: false,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptRelationship {
    pub id: Uuid,
    pub source_concept_id: Uuid,
    pub target_concept_id: Uuid,
    pub relationship_type: RelationshipType,
    pub strength: f64,
}

impl ConceptRelationship {
    pub fn new(source: Uuid, target: Uuid, relationship_type: RelationshipType) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_concept_id: source,
            target_concept_id: target,
            relationship_type,
            strength: 1.0,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_concept_id == self.target_concept_id
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub source_type: SourceType,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    /// None until the first authority run.
    pub citation_authority: Option<f64>,
}

impl Source {
    pub fn new(source_type: SourceType, title: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_type,
            title: title.into(),
            authors: Vec::new(),
            year,
            doi: None,
            arxiv_id: None,
            citation_authority: None,
        }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub id: Uuid,
    /// The citing source.
    pub source_id: Uuid,
    #[serde(default)]
    pub authors: Vec<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    #[serde(default)]
    pub raw_string: String,
}

impl Citation {
    pub fn new(source_id: Uuid, title: impl Into<String>, year: Option<i32>) -> Self {
        let title = title.into();
        Self {
            id: Uuid::new_v4(),
            source_id,
            authors: Vec::new(),
            raw_string: title.clone(),
            title: Some(title),
            year,
            doi: None,
            arxiv_id: None,
        }
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub citing_source_id: Uuid,
    /// None for an external reference.
    pub cited_source_id: Option<Uuid>,
    pub citation_id: Uuid,
}

impl SourceCitation {
    pub fn is_internal(&self) -> bool {
        self.cited_source_id.is_some()
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub source_id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
}

impl Chunk {
    pub fn new(source_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            content: content.into(),
            embedding: None,
            page_start: None,
            page_end: None,
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkConcept {
    pub chunk_id: Uuid,
    pub concept_id: Uuid,
}
