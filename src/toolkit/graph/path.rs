

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::models::{Concept, RelationshipType};


/// Weight per relationship type, used for path quality and explanation
/// only. Hop counts ignore it.
pub fn relationship_weight(relationship: RelationshipType) -> f64 {
    match relationship {
        RelationshipType::Requires => 1.0,
        RelationshipType::Extends => 0.9,
        RelationshipType::Specializes => 0.85,
        RelationshipType::Generalizes => 0.85,
        RelationshipType::Uses => 0.8,
        RelationshipType::Addresses => 0.75,
        RelationshipType::AlternativeTo => 0.6,
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Walked from the relationship's source to its target.
    Forward,
    Backward,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStep {
    pub from: Uuid,
    pub to: Uuid,
    pub relationship_type: RelationshipType,
    pub direction: Direction,
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptPath {
    pub concepts: Vec<Concept>,
    pub steps: Vec<PathStep>,
}

impl ConceptPath {
    pub fn hops(&self) -> usize {
        self.steps.len()
    }

    /// Product of step weights; 1.0 for the empty path.
    pub fn quality(&self) -> f64 {
        self.steps
            .iter()
            .map(|s| relationship_weight(s.relationship_type))
            .product()
    }

    /// `a --USES--> b <--ADDRESSES-- c`
    pub fn explain(&self) -> String {
        let Some(first) = self.concepts.first() else {
            return String::new();
        };
        let mut out = first.name.clone();
        for (step, concept) in self.steps.iter().zip(self.concepts.iter().skip(1)) {
            let rel: &'static str = step.relationship_type.into();
            match step.direction {
                Direction::Forward => out.push_str(&format!(" --{}--> ", rel)),
                Direction::Backward => out.push_str(&format!(" <--{}-- ", rel)),
            }
            out.push_str(&concept.name);
        }
        out
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PathOutcome {
    Found(ConceptPath),
    /// No path within the hop cap, or the traversal budget ran out.
    NoPath { truncated: bool },
    UnknownConcept { id: Uuid },
}

impl PathOutcome {
    pub fn path(&self) -> Option<&ConceptPath> {
        match self {
            PathOutcome::Found(path) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ConceptType;
    use strum::IntoEnumIterator;

    #[test]
    fn test_weights_in_unit_interval() {
        for rel in RelationshipType::iter() {
            let w = relationship_weight(rel);
            assert!(w > 0.0 && w <= 1.0);
        }
    }

    #[test]
    fn test_explain_and_quality() {
        let iv = Concept::new("instrumental variables", ConceptType::Method);
        let endo = Concept::new("endogeneity", ConceptType::Problem);
        let tsls = Concept::new("two-stage least squares", ConceptType::Method);
        let path = ConceptPath {
            steps: vec![
                PathStep {
                    from: endo.id,
                    to: iv.id,
                    relationship_type: RelationshipType::Addresses,
                    direction: Direction::Backward,
                },
                PathStep {
                    from: iv.id,
                    to: tsls.id,
                    relationship_type: RelationshipType::Uses,
                    direction: Direction::Backward,
                },
            ],
            concepts: vec![endo, iv, tsls],
        };
        assert_eq!(
            path.explain(),
            "endogeneity <--ADDRESSES-- instrumental variables <--USES-- two-stage least squares"
        );
        assert!((path.quality() - 0.6).abs() < 1e-9);
        assert_eq!(path.hops(), 2);
    }
}
