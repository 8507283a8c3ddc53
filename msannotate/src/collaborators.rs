use std::sync::Arc;

use msformula::chemistry::formula::Formula;
use msformula::data::candidate::CandidateFormula;
use msformula::data::feature::Feature;
use msformula::data::tolerance::MzTolerance;

use crate::config::ElementBounds;
use crate::database::FormulaDatabase;
use crate::error::AnnotationError;

/// Enumerates neutral candidate formulas for a preprocessed feature.
///
/// Implementations must be deterministic; they run on pool workers.
pub trait CandidateGenerator: Send + Sync {
    fn enumerate_candidates(
        &self,
        feature: &Feature,
        tolerance: MzTolerance,
        bounds: &ElementBounds,
        db: &FormulaDatabase,
    ) -> Result<Vec<Formula>, AnnotationError>;
}

/// Assigns fragment formulas to the processed MS2 peaks of each candidate,
/// filling `ms2_raw_explanation`.
pub trait FragmentExplainer: Send + Sync {
    fn explain_fragments(&self, feature: &Feature, candidates: &mut [CandidateFormula], tolerance: MzTolerance);
}

/// Fills `estimated_prob` and `normed_estimated_prob` for a whole batch.
pub trait CandidateScorer: Send + Sync {
    fn score_candidates(&self, batch: &mut [Feature], db: &FormulaDatabase);
}

/// Fills `estimated_fdr` for a whole batch of ranked candidates.
pub trait FdrEstimator: Send + Sync {
    fn compute_fdr(&self, batch: &mut [Feature]);
}

/// Looks up the feature's neutral mass window in the formula database and
/// keeps formulas inside the element bounds.
#[derive(Clone, Copy, Debug, Default)]
pub struct DatabaseCandidateGenerator;

impl CandidateGenerator for DatabaseCandidateGenerator {
    fn enumerate_candidates(
        &self,
        feature: &Feature,
        tolerance: MzTolerance,
        bounds: &ElementBounds,
        db: &FormulaDatabase,
    ) -> Result<Vec<Formula>, AnnotationError> {
        let halogen = bounds.upper.has_halogen();
        Ok(db
            .query_precursor_mz(feature.mz, &feature.adduct, tolerance, halogen)
            .into_iter()
            .filter(|f| bounds.contains(&f.elements))
            .cloned()
            .collect())
    }
}

/// The external stages plugged into an annotation pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn CandidateGenerator>,
    pub explainer: Option<Arc<dyn FragmentExplainer>>,
    pub scorer: Option<Arc<dyn CandidateScorer>>,
    pub fdr: Option<Arc<dyn FdrEstimator>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            generator: Arc::new(DatabaseCandidateGenerator),
            explainer: None,
            scorer: None,
            fdr: None,
        }
    }
}

impl Collaborators {
    pub fn with_generator(mut self, generator: impl CandidateGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_explainer(mut self, explainer: impl FragmentExplainer + 'static) -> Self {
        self.explainer = Some(Arc::new(explainer));
        self
    }

    pub fn with_scorer(mut self, scorer: impl CandidateScorer + 'static) -> Self {
        self.scorer = Some(Arc::new(scorer));
        self
    }

    pub fn with_fdr(mut self, fdr: impl FdrEstimator + 'static) -> Self {
        self.fdr = Some(Arc::new(fdr));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnnotationConfig;
    use msformula::chemistry::elements::Element;

    #[test]
    fn test_database_generator_respects_bounds() {
        let db = FormulaDatabase::from_element_vectors(
            ["C6H12O6", "C2H8N6O2"].iter().map(|s| s.parse().unwrap()),
        );
        let glucose = Formula::neutral("C6H12O6".parse().unwrap());
        let feature = Feature::new("g", glucose.mass + 1.007276, 1, None, None).unwrap();

        let config = AnnotationConfig::default();
        let mut bounds = config.element_bounds();
        let hits = DatabaseCandidateGenerator
            .enumerate_candidates(&feature, MzTolerance::Ppm(5.0), &bounds, &db)
            .unwrap();
        assert_eq!(hits.len(), 1);

        bounds.upper = bounds.upper.with(Element::C, 5);
        let hits = DatabaseCandidateGenerator
            .enumerate_candidates(&feature, MzTolerance::Ppm(5.0), &bounds, &db)
            .unwrap();
        assert!(hits.is_empty());
    }
}
