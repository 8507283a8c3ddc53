use std::fmt;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::chemistry::formula::Formula;

/// Fragment annotation of a processed MS2 spectrum for one candidate.
///
/// `idx` and `explanations` run in parallel: `idx[k]` is a peak position in
/// the processed MS2 and `explanations[k]` the fragment formula assigned to it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ms2Explanation {
    pub idx: Vec<usize>,
    pub explanations: Vec<Option<Formula>>,
}

impl Ms2Explanation {
    pub fn new(idx: Vec<usize>, explanations: Vec<Option<Formula>>) -> Self {
        Ms2Explanation { idx, explanations }
    }

    /// Number of explained peaks.
    pub fn explained_count(&self) -> usize {
        self.explanations.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.explained_count() == 0
    }
}

/// A candidate molecular formula for a feature together with its scores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateFormula {
    /// Neutral formula of the molecule.
    pub formula: Formula,
    /// Ion formula, `m * formula + net` at the adduct charge.
    pub charged_formula: Option<Formula>,
    /// m/z error in ppm or Da.
    pub mz_error: Option<f64>,
    pub estimated_prob: Option<f64>,
    pub normed_estimated_prob: Option<f64>,
    pub estimated_fdr: Option<f64>,
    pub ms1_isotope_similarity: Option<f64>,
    /// Summed intensity of MS2 peaks explained by subformulas.
    pub exp_ms2_sum_int: Option<f64>,
    pub ms2_raw_explanation: Option<Ms2Explanation>,
    pub db_existed: bool,
}

impl CandidateFormula {
    pub fn new(formula: Formula) -> Self {
        CandidateFormula {
            formula,
            charged_formula: None,
            mz_error: None,
            estimated_prob: None,
            normed_estimated_prob: None,
            estimated_fdr: None,
            ms1_isotope_similarity: None,
            exp_ms2_sum_int: None,
            ms2_raw_explanation: None,
            db_existed: false,
        }
    }

    /// True if subformula assignment explained at least one fragment.
    pub fn has_ms2_explanation(&self) -> bool {
        self.ms2_raw_explanation.as_ref().is_some_and(|e| !e.is_empty())
    }
}

impl Display for CandidateFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}  est_prob: {:?}  est_fdr: {:?}", self.formula, self.estimated_prob, self.estimated_fdr)?;
        if let Some(explanation) = self.ms2_raw_explanation.as_ref().filter(|e| !e.is_empty()) {
            write!(f, " ms2_raw_exp: {}", explanation.explained_count())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explanation_emptiness() {
        let fragment: Formula = "CH3".parse().unwrap();
        assert!(Ms2Explanation::new(vec![0, 1], vec![None, None]).is_empty());
        let explanation = Ms2Explanation::new(vec![0, 1], vec![None, Some(fragment)]);
        assert!(!explanation.is_empty());
        assert_eq!(explanation.explained_count(), 1);
    }

    #[test]
    fn test_candidate_display() {
        let mut candidate = CandidateFormula::new("C6H12O6".parse().unwrap());
        assert!(!candidate.has_ms2_explanation());
        candidate.estimated_prob = Some(0.5);
        assert_eq!(candidate.to_string(), "C6H12O6  est_prob: Some(0.5)  est_fdr: None");
    }
}
