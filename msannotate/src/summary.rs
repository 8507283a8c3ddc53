use serde::{Deserialize, Serialize};

use msformula::data::feature::Feature;

/// Number of ranked formulas reported per feature.
pub const TOP_K: usize = 5;

/// Annotation result of one feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub identifier: String,
    pub mz: f64,
    pub rt: Option<f64>,
    pub adduct: String,
    /// Up to five formula strings, best first.
    pub formulas: Vec<String>,
    /// Estimated FDR of the best formula.
    pub estimated_fdr: Option<f64>,
}

impl FeatureSummary {
    pub fn from_feature(feature: &Feature) -> Self {
        let candidates = feature.candidate_formula_list.as_deref().unwrap_or_default();
        FeatureSummary {
            identifier: feature.identifier.clone(),
            mz: feature.mz,
            rt: feature.rt,
            adduct: feature.adduct.notation.clone(),
            formulas: candidates.iter().take(TOP_K).map(|c| c.formula.elements.to_string()).collect(),
            estimated_fdr: candidates.first().and_then(|c| c.estimated_fdr),
        }
    }

    /// Formula at 1-based `rank`, if present.
    pub fn formula_rank(&self, rank: usize) -> Option<&str> {
        rank.checked_sub(1).and_then(|i| self.formulas.get(i)).map(String::as_str)
    }
}
