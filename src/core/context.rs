

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, IntoStaticStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ContextType {
    /// Composition work: conceptually related material first.
    Building,
    /// Verification work: precise, well-cited material first.
    Auditing,
    #[default]
    Balanced,
}


#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextWeights {
    pub lexical: f64,
    pub vector: f64,
    pub citation: f64,
}

impl ContextWeights {
    pub const fn new(lexical: f64, vector: f64, citation: f64) -> Self {
        Self { lexical, vector, citation }
    }
}


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPolicy {
    pub building: ContextWeights,
    pub auditing: ContextWeights,
    pub balanced: ContextWeights,
}

impl ContextPolicy {
    #[must_use]
    pub fn weights_for(&self, context: ContextType) -> ContextWeights {
        match context {
            ContextType::Building => self.building,
            ContextType::Auditing => self.auditing,
            ContextType::Balanced => self.balanced,
        }
    }
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            building: ContextWeights::new(0.15, 0.65, 0.05),
            auditing: ContextWeights::new(0.45, 0.25, 0.15),
            balanced: ContextWeights::new(0.35, 0.35, 0.10),
        }
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
    pub graph: f64,
    pub citation: f64,
}

impl FusionWeights {
    /// Graph and citation only take part when graph boosting is on.
    /// The result sums to 1 unless every component is zero.
    #[must_use]
    pub fn resolve(base: ContextWeights, graph_weight: f64, use_graph: bool) -> Self {
        let (graph, citation) = if use_graph {
            (graph_weight.max(0.0), base.citation.max(0.0))
        } else {
            (0.0, 0.0)
        };
        let raw = Self {
            lexical: base.lexical.max(0.0),
            vector: base.vector.max(0.0),
            graph,
            citation,
        };
        let total = raw.lexical + raw.vector + raw.graph + raw.citation;
        if total <= 0.0 {
            return raw;
        }
        Self {
            lexical: raw.lexical / total,
            vector: raw.vector / total,
            graph: raw.graph / total,
            citation: raw.citation / total,
        }
    }
}
