use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use msformula::algorithm::isotope::Ms1IsotopePicker;
use msformula::algorithm::spectrum_processing::Ms2Preprocessor;
use msformula::chemistry::formula::Formula;
use msformula::data::candidate::CandidateFormula;
use msformula::data::feature::Feature;
use msformula::data::tolerance::MzTolerance;

use crate::collaborators::{CandidateGenerator, Collaborators, FragmentExplainer};
use crate::config::{AnnotationConfig, ElementBounds};
use crate::database::FormulaDatabase;
use crate::error::AnnotationError;
use crate::lookup::{mass_to_formula, mz_to_formula, FormulaResult};
use crate::summary::FeatureSummary;

/// Features outside this open m/z interval are dropped before batching.
pub const MIN_FEATURE_MZ: f64 = 1.0;
pub const MAX_FEATURE_MZ: f64 = 1500.0;

/// Progress of the loaded data through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Empty,
    Loaded,
    Filtered,
    Preprocessed,
    CandidatesGenerated,
    SubformulaAssigned,
    Scored,
    FdrComputed,
    Summarized,
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Empty => "empty",
            PipelineStage::Loaded => "loaded",
            PipelineStage::Filtered => "filtered",
            PipelineStage::Preprocessed => "preprocessed",
            PipelineStage::CandidatesGenerated => "candidates generated",
            PipelineStage::SubformulaAssigned => "subformula assigned",
            PipelineStage::Scored => "scored",
            PipelineStage::FdrComputed => "fdr computed",
            PipelineStage::Summarized => "summarized",
        };
        write!(f, "{}", name)
    }
}

/// Everything a worker needs to preprocess one feature and enumerate its candidates.
struct UnitContext {
    isotope_picker: Ms1IsotopePicker,
    ms2_preprocessor: Ms2Preprocessor,
    ms1_tolerance: MzTolerance,
    bounds: ElementBounds,
    db: Arc<FormulaDatabase>,
    generator: Arc<dyn CandidateGenerator>,
}

/// Preprocesses a feature, enumerates its candidates and ranks them by |m/z error|.
fn preprocess_and_enumerate(mut feature: Feature, ctx: &UnitContext) -> Result<Feature, AnnotationError> {
    feature.data_preprocess(&ctx.isotope_picker, &ctx.ms2_preprocessor);
    let formulas = ctx.generator.enumerate_candidates(&feature, ctx.ms1_tolerance, &ctx.bounds, &ctx.db)?;
    feature.candidate_formula_list = Some(wrap_candidates(&feature, formulas, ctx.ms1_tolerance));
    Ok(feature)
}

/// Wraps neutral formulas into candidates with their ion formula and m/z error.
pub fn wrap_candidates(feature: &Feature, formulas: Vec<Formula>, tolerance: MzTolerance) -> Vec<CandidateFormula> {
    let mut candidates: Vec<CandidateFormula> = formulas
        .into_iter()
        .map(|formula| {
            let charged = feature.adduct.charged_formula(&formula.elements);
            let mut candidate = CandidateFormula::new(formula);
            candidate.mz_error = Some(tolerance.error(feature.mz, charged.mass));
            candidate.charged_formula = Some(charged);
            candidate.db_existed = true;
            candidate
        })
        .collect();
    candidates.sort_by_key(|c| OrderedFloat(c.mz_error.map_or(f64::INFINITY, f64::abs)));
    candidates
}

/// Runs the explainer and drops unexplained candidates, unless none is explained.
fn assign_subformula(feature: &mut Feature, explainer: &dyn FragmentExplainer, tolerance: MzTolerance) {
    if !feature.has_processed_ms2() {
        return;
    }
    let Some(mut candidates) = feature.candidate_formula_list.take() else {
        return;
    };
    if !candidates.is_empty() {
        explainer.explain_fragments(feature, &mut candidates, tolerance);
        if candidates.iter().any(CandidateFormula::has_ms2_explanation) {
            candidates.retain(CandidateFormula::has_ms2_explanation);
        }
    }
    feature.candidate_formula_list = Some(candidates);
}

fn rank_by_probability(feature: &mut Feature) {
    if let Some(candidates) = feature.candidate_formula_list.as_mut() {
        candidates.sort_by_key(|c| std::cmp::Reverse(OrderedFloat(c.estimated_prob.unwrap_or(f64::NEG_INFINITY))));
    }
}

fn build_pool(config: &AnnotationConfig) -> Result<Option<ThreadPool>, AnnotationError> {
    if !config.parallel {
        return Ok(None);
    }
    Ok(Some(build_worker_pool(config, "msannotate-worker")?))
}

fn build_worker_pool(config: &AnnotationConfig, prefix: &'static str) -> Result<ThreadPool, AnnotationError> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(config.worker_count())
        .thread_name(move |i| format!("{}-{}", prefix, i))
        .panic_handler(|_| error!("annotation worker panicked, its feature is skipped"))
        .build()?;
    Ok(pool)
}

enum UnitEvent {
    Started(usize),
    Finished(usize, Result<Feature, AnnotationError>),
}

/// Final state of one preprocessing and enumeration unit.
enum UnitOutcome {
    Done(Feature),
    Failed(AnnotationError),
    TimedOut,
    /// No result before the event channel closed.
    Lost,
}

/// Queues unit `idx` on `pool`. A unit already claimed by another pool is skipped.
fn spawn_unit(
    pool: &ThreadPool,
    idx: usize,
    feature: Feature,
    ctx: Arc<UnitContext>,
    claimed: Arc<AtomicBool>,
    events: Sender<UnitEvent>,
) {
    pool.spawn(move || {
        if claimed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = events.send(UnitEvent::Started(idx));
        let result = panic::catch_unwind(AssertUnwindSafe(|| preprocess_and_enumerate(feature, &ctx)))
            .unwrap_or_else(|_| Err(AnnotationError::Candidate("worker panicked".to_string())));
        let _ = events.send(UnitEvent::Finished(idx, result));
    });
}

/// Runs one unit per feature on a dedicated pool, timing each unit from the
/// moment a worker starts it.
///
/// A unit exceeding `timeout` is abandoned together with its pool; units
/// not yet started move to a fresh pool, so an abandoned worker never
/// delays the rest of the batch.
fn run_units(
    features: &[Feature],
    ctx: &Arc<UnitContext>,
    config: &AnnotationConfig,
    timeout: Duration,
) -> Result<Vec<UnitOutcome>, AnnotationError> {
    let n = features.len();
    let (tx, rx) = unbounded();
    let claims: Vec<Arc<AtomicBool>> = (0..n).map(|_| Arc::new(AtomicBool::new(false))).collect();
    let mut started: Vec<Option<Instant>> = vec![None; n];
    let mut outcomes: Vec<Option<UnitOutcome>> = (0..n).map(|_| None).collect();
    let mut remaining = n;

    let spawn_pending = |pool: &ThreadPool, started: &[Option<Instant>], outcomes: &[Option<UnitOutcome>]| {
        for idx in 0..n {
            if started[idx].is_none() && outcomes[idx].is_none() {
                spawn_unit(pool, idx, features[idx].clone(), Arc::clone(ctx), Arc::clone(&claims[idx]), tx.clone());
            }
        }
    };

    let mut pool = build_worker_pool(config, "msannotate-unit")?;
    spawn_pending(&pool, &started, &outcomes);

    while remaining > 0 {
        let now = Instant::now();
        let mut expired = false;
        for idx in 0..n {
            if outcomes[idx].is_none() && started[idx].is_some_and(|t| now.duration_since(t) >= timeout) {
                outcomes[idx] = Some(UnitOutcome::TimedOut);
                remaining -= 1;
                expired = true;
            }
        }
        if expired {
            // the abandoned workers stay with the old pool, which is dropped here
            pool = build_worker_pool(config, "msannotate-unit")?;
            spawn_pending(&pool, &started, &outcomes);
            continue;
        }

        let running = (0..n).filter_map(|idx| if outcomes[idx].is_none() { started[idx] } else { None });
        let wait = running
            .map(|t| (t + timeout).saturating_duration_since(now))
            .min()
            .unwrap_or(timeout);

        match rx.recv_timeout(wait) {
            Ok(UnitEvent::Started(idx)) => {
                if outcomes[idx].is_none() {
                    started[idx] = Some(Instant::now());
                }
            }
            Ok(UnitEvent::Finished(idx, result)) => {
                if outcomes[idx].is_none() {
                    outcomes[idx] = Some(match result {
                        Ok(feature) => UnitOutcome::Done(feature),
                        Err(e) => UnitOutcome::Failed(e),
                    });
                    remaining -= 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(outcomes.into_iter().map(|o| o.unwrap_or(UnitOutcome::Lost)).collect())
}

/// Batch annotation of features: preprocessing, candidate generation,
/// subformula assignment, scoring and FDR estimation.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use msannotate::collaborators::Collaborators;
/// use msannotate::config::AnnotationConfig;
/// use msannotate::database::FormulaDatabase;
/// use msannotate::pipeline::AnnotationPipeline;
/// use msformula::data::feature::Feature;
///
/// let db = FormulaDatabase::from_element_vectors(["C6H12O6"].iter().map(|s| s.parse().unwrap()));
/// let mut pipeline = AnnotationPipeline::new(AnnotationConfig::default(), Arc::new(db), Collaborators::default()).unwrap();
/// pipeline.add_data(vec![Feature::new("glucose", 203.05261, 1, None, Some("[M+Na]+")).unwrap()]);
/// pipeline.annotate().unwrap();
///
/// let summary = pipeline.summarize().unwrap();
/// assert_eq!(summary[0].formula_rank(1), Some("C6H12O6"));
/// ```
pub struct AnnotationPipeline {
    config: AnnotationConfig,
    db: Arc<FormulaDatabase>,
    collaborators: Collaborators,
    /// Runs preprocessing and subformula assignment; candidate enumeration gets its own pools.
    pool: Option<ThreadPool>,
    data: Vec<Feature>,
    stage: PipelineStage,
    n_batch: usize,
}

impl AnnotationPipeline {
    /// Creates a pipeline; the configuration is validated and the worker pool built once.
    pub fn new(config: AnnotationConfig, db: Arc<FormulaDatabase>, collaborators: Collaborators) -> Result<Self, AnnotationError> {
        let config = config.validated();
        let pool = build_pool(&config)?;
        Ok(AnnotationPipeline {
            config,
            db,
            collaborators,
            pool,
            data: Vec::new(),
            stage: PipelineStage::Empty,
            n_batch: 0,
        })
    }

    /// Replaces the configuration and rebuilds the worker pool.
    pub fn update_config(&mut self, config: AnnotationConfig) -> Result<(), AnnotationError> {
        let config = config.validated();
        self.pool = build_pool(&config)?;
        self.config = config;
        Ok(())
    }

    /// Installs a new database handle; takes effect from the next batch.
    pub fn replace_database(&mut self, db: Arc<FormulaDatabase>) {
        self.db = db;
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    pub fn add_data(&mut self, features: Vec<Feature>) {
        self.data = features;
        self.stage = PipelineStage::Loaded;
        self.n_batch = 0;
    }

    pub fn clear_data(&mut self) {
        self.data.clear();
        self.stage = PipelineStage::Empty;
        self.n_batch = 0;
    }

    pub fn data(&self) -> &[Feature] {
        &self.data
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn batch_count(&self) -> usize {
        self.n_batch
    }

    /// Drops features outside the m/z range and returns the number of batches.
    pub fn prepare(&mut self) -> Result<usize, AnnotationError> {
        if self.data.is_empty() {
            return Err(AnnotationError::EmptyInput("no features loaded"));
        }

        let before = self.data.len();
        self.data.retain(|f| f.mz > MIN_FEATURE_MZ && f.mz < MAX_FEATURE_MZ);
        let dropped = before - self.data.len();
        if dropped > 0 {
            warn!("{} features with m/z outside ({}, {}) removed", dropped, MIN_FEATURE_MZ, MAX_FEATURE_MZ);
        }
        if self.data.is_empty() {
            return Err(AnnotationError::EmptyInput("no feature with m/z between 1 and 1500"));
        }

        self.n_batch = self.data.len().div_ceil(self.config.batch_size);
        self.stage = PipelineStage::Filtered;
        info!("{} queries loaded, {} batches in total", self.data.len(), self.n_batch);
        Ok(self.n_batch)
    }

    fn batch_range(&self, n: usize) -> Range<usize> {
        let start = (n * self.config.batch_size).min(self.data.len());
        let end = ((n + 1) * self.config.batch_size).min(self.data.len());
        start..end
    }

    fn unit_context(&self) -> UnitContext {
        UnitContext {
            isotope_picker: self.config.isotope_picker(),
            ms2_preprocessor: self.config.ms2_preprocessor(),
            ms1_tolerance: self.config.ms1_tolerance(),
            bounds: self.config.element_bounds(),
            db: Arc::clone(&self.db),
            generator: Arc::clone(&self.collaborators.generator),
        }
    }

    /// Fills processed spectra of all loaded features without generating candidates.
    pub fn preprocess(&mut self) {
        let picker = self.config.isotope_picker();
        let preprocessor = self.config.ms2_preprocessor();
        match &self.pool {
            Some(pool) => pool.install(|| {
                self.data.par_iter_mut().for_each(|f| f.data_preprocess(&picker, &preprocessor))
            }),
            None => self.data.iter_mut().for_each(|f| f.data_preprocess(&picker, &preprocessor)),
        }
        self.stage = PipelineStage::Preprocessed;
    }

    fn generate_candidates(&mut self, range: Range<usize>) -> Result<(), AnnotationError> {
        let ctx = Arc::new(self.unit_context());

        if self.config.parallel {
            let outcomes = run_units(&self.data[range.clone()], &ctx, &self.config, self.config.unit_timeout())?;
            for (feature, outcome) in self.data[range].iter_mut().zip(outcomes) {
                match outcome {
                    UnitOutcome::Done(done) => *feature = done,
                    UnitOutcome::Failed(e) => warn!(
                        "Candidate generation failed for feature {}, mz={}, rt={:?}, skipped: {}",
                        feature.identifier, feature.mz, feature.rt, e
                    ),
                    UnitOutcome::TimedOut => {
                        let e = AnnotationError::Timeout {
                            identifier: feature.identifier.clone(),
                            mz: feature.mz,
                            rt: feature.rt,
                        };
                        warn!("{}, skipped", e);
                    }
                    UnitOutcome::Lost => warn!(
                        "Worker for feature {}, mz={}, rt={:?} stopped without a result, skipped",
                        feature.identifier, feature.mz, feature.rt
                    ),
                }
            }
        } else {
            for feature in self.data[range].iter_mut() {
                match preprocess_and_enumerate(feature.clone(), &ctx) {
                    Ok(done) => *feature = done,
                    Err(e) => warn!(
                        "Candidate generation failed for feature {}, mz={}, rt={:?}, skipped: {}",
                        feature.identifier, feature.mz, feature.rt, e
                    ),
                }
            }
        }
        self.stage = PipelineStage::CandidatesGenerated;
        Ok(())
    }

    fn assign_subformulas(&mut self, range: Range<usize>) {
        if let Some(explainer) = self.collaborators.explainer.as_deref() {
            let tolerance = self.config.ms2_tolerance();
            let batch = &mut self.data[range];
            match &self.pool {
                Some(pool) => pool.install(|| {
                    batch.par_iter_mut().for_each(|f| assign_subformula(f, explainer, tolerance))
                }),
                None => batch.iter_mut().for_each(|f| assign_subformula(f, explainer, tolerance)),
            }
        }
        self.stage = PipelineStage::SubformulaAssigned;
    }

    fn score(&mut self, range: Range<usize>) {
        if let Some(scorer) = self.collaborators.scorer.as_deref() {
            let batch = &mut self.data[range];
            scorer.score_candidates(batch, &self.db);
            batch.iter_mut().for_each(rank_by_probability);
        }
        self.stage = PipelineStage::Scored;
    }

    fn estimate_fdr(&mut self, range: Range<usize>) {
        if let Some(fdr) = self.collaborators.fdr.as_deref() {
            fdr.compute_fdr(&mut self.data[range]);
        }
        self.stage = PipelineStage::FdrComputed;
    }

    /// Annotates batch `n` (0-based) and returns the range of features it covered.
    ///
    /// `prepare` must have been called.
    pub fn annotate_batch(&mut self, n: usize) -> Result<Range<usize>, AnnotationError> {
        if self.stage < PipelineStage::Filtered {
            return Err(AnnotationError::NotPrepared { batch: n });
        }
        let range = self.batch_range(n);
        info!("Batch {}/{}: features {}..{}", n + 1, self.n_batch, range.start, range.end);

        self.generate_candidates(range.clone())?;
        debug!("batch {}: {}", n + 1, self.stage);
        self.assign_subformulas(range.clone());
        debug!("batch {}: {}", n + 1, self.stage);
        self.score(range.clone());
        debug!("batch {}: {}", n + 1, self.stage);
        self.estimate_fdr(range.clone());
        debug!("batch {}: {}", n + 1, self.stage);

        Ok(range)
    }

    /// Filters the loaded features and annotates every batch in order.
    pub fn annotate(&mut self) -> Result<(), AnnotationError> {
        let n_batch = self.prepare()?;
        for n in 0..n_batch {
            self.annotate_batch(n)?;
        }
        Ok(())
    }

    /// Per-feature result summaries.
    pub fn summarize(&mut self) -> Result<Vec<FeatureSummary>, AnnotationError> {
        if self.data.is_empty() {
            return Err(AnnotationError::EmptyInput("no features loaded"));
        }
        self.stage = PipelineStage::Summarized;
        Ok(self.data.iter().map(FeatureSummary::from_feature).collect())
    }

    /// Formulas of the shared database matching a neutral mass.
    pub fn mass_to_formula(&self, mass: f64, tolerance: MzTolerance, dbe_cutoff: f64) -> Vec<FormulaResult> {
        mass_to_formula(&self.db, mass, tolerance, self.config.halogen, dbe_cutoff)
    }

    /// Formulas of the shared database matching an ion m/z under `adduct`.
    pub fn mz_to_formula(
        &self,
        mz: f64,
        adduct: &str,
        tolerance: MzTolerance,
        dbe_cutoff: f64,
    ) -> Result<Vec<FormulaResult>, AnnotationError> {
        mz_to_formula(&self.db, mz, adduct, tolerance, self.config.halogen, dbe_cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msformula::data::candidate::Ms2Explanation;
    use msformula::data::spectrum::Spectrum;

    fn glucose_db() -> Arc<FormulaDatabase> {
        Arc::new(FormulaDatabase::from_element_vectors(
            ["C6H12O6", "C7H16O5", "C2H6O"].iter().map(|s| s.parse().unwrap()),
        ))
    }

    struct ExplainFirst;

    impl FragmentExplainer for ExplainFirst {
        fn explain_fragments(&self, _feature: &Feature, candidates: &mut [CandidateFormula], _tolerance: MzTolerance) {
            for (k, c) in candidates.iter_mut().enumerate() {
                let formula = (k == 0).then(|| "CH2O".parse().unwrap());
                c.ms2_raw_explanation = Some(Ms2Explanation::new(vec![0], vec![formula]));
            }
        }
    }

    struct ExplainNone;

    impl FragmentExplainer for ExplainNone {
        fn explain_fragments(&self, _feature: &Feature, candidates: &mut [CandidateFormula], _tolerance: MzTolerance) {
            for c in candidates.iter_mut() {
                c.ms2_raw_explanation = Some(Ms2Explanation::new(vec![0], vec![None]));
            }
        }
    }

    fn candidate_feature() -> Feature {
        let ms2 = Spectrum::new(vec![60.0, 120.0], vec![10.0, 20.0]).unwrap();
        let mut feature = Feature::new("f", 181.0707, 1, None, None).unwrap().with_ms2(ms2);
        feature.data_preprocess(&Ms1IsotopePicker::default(), &Ms2Preprocessor::default());
        feature.candidate_formula_list = Some(vec![
            CandidateFormula::new("C6H12O6".parse().unwrap()),
            CandidateFormula::new("C7H16O5".parse().unwrap()),
        ]);
        feature
    }

    #[test]
    fn test_stage_order() {
        assert!(PipelineStage::Loaded < PipelineStage::Filtered);
        assert!(PipelineStage::FdrComputed < PipelineStage::Summarized);
        assert_eq!(PipelineStage::CandidatesGenerated.to_string(), "candidates generated");
    }

    #[test]
    fn test_subformula_keeps_only_explained() {
        let mut feature = candidate_feature();
        assign_subformula(&mut feature, &ExplainFirst, MzTolerance::Ppm(10.0));
        let candidates = feature.candidate_formula_list.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].formula.to_string(), "C6H12O6");
    }

    #[test]
    fn test_subformula_keeps_all_when_nothing_explained() {
        let mut feature = candidate_feature();
        assign_subformula(&mut feature, &ExplainNone, MzTolerance::Ppm(10.0));
        assert_eq!(feature.candidate_count(), 2);
    }

    #[test]
    fn test_subformula_skipped_without_ms2() {
        let mut feature = candidate_feature();
        feature.ms2_processed = None;
        assign_subformula(&mut feature, &ExplainFirst, MzTolerance::Ppm(10.0));
        assert!(feature.candidate_formula_list.unwrap().iter().all(|c| c.ms2_raw_explanation.is_none()));
    }

    #[test]
    fn test_wrap_candidates_sorted_by_error() {
        let feature = Feature::new("f", 181.0707, 1, None, None).unwrap();
        let formulas = vec![
            Formula::neutral("C7H16O5".parse().unwrap()),
            Formula::neutral("C6H12O6".parse().unwrap()),
        ];
        let candidates = wrap_candidates(&feature, formulas, MzTolerance::Ppm(10.0));
        assert_eq!(candidates[0].formula.to_string(), "C6H12O6");
        assert_eq!(candidates[0].charged_formula.as_ref().unwrap().to_string(), "C6H13O6");
        assert!(candidates[0].mz_error.unwrap().abs() < 5.0);
        assert!(candidates.iter().all(|c| c.db_existed));
    }

    #[test]
    fn test_rank_by_probability_is_stable() {
        let mut feature = candidate_feature();
        let candidates = feature.candidate_formula_list.as_mut().unwrap();
        candidates.push(CandidateFormula::new("C2H6O".parse().unwrap()));
        candidates[0].estimated_prob = Some(0.2);
        candidates[1].estimated_prob = Some(0.7);
        candidates[2].estimated_prob = Some(0.2);
        rank_by_probability(&mut feature);
        let order: Vec<String> = feature.candidate_formula_list.unwrap().iter().map(|c| c.formula.to_string()).collect();
        assert_eq!(order, vec!["C7H16O5", "C6H12O6", "C2H6O"]);
    }

    #[test]
    fn test_prepare_errors_on_empty() {
        let mut pipeline = AnnotationPipeline::new(AnnotationConfig::default(), glucose_db(), Collaborators::default()).unwrap();
        assert!(matches!(pipeline.prepare(), Err(AnnotationError::EmptyInput(_))));
        pipeline.add_data(vec![Feature::new("big", 2000.0, 1, None, None).unwrap()]);
        assert!(matches!(pipeline.prepare(), Err(AnnotationError::EmptyInput(_))));
        assert!(matches!(pipeline.annotate_batch(0), Err(AnnotationError::NotPrepared { batch: 0 })));
    }

    #[test]
    fn test_batches() {
        let config = AnnotationConfig { batch_size: 2, ..AnnotationConfig::default() };
        let mut pipeline = AnnotationPipeline::new(config, glucose_db(), Collaborators::default()).unwrap();
        let features = (0..5).map(|i| Feature::new(format!("f{}", i), 181.0707, 1, None, None).unwrap()).collect();
        pipeline.add_data(features);
        assert_eq!(pipeline.prepare().unwrap(), 3);
        assert_eq!(pipeline.annotate_batch(2).unwrap(), 4..5);
        assert_eq!(pipeline.stage(), PipelineStage::FdrComputed);
        assert_eq!(pipeline.data()[4].candidate_count(), 1);
        assert!(pipeline.data()[0].candidate_formula_list.is_none());
    }

    struct CountingGenerator {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl CandidateGenerator for CountingGenerator {
        fn enumerate_candidates(
            &self,
            feature: &Feature,
            _tolerance: MzTolerance,
            _bounds: &ElementBounds,
            _db: &FormulaDatabase,
        ) -> Result<Vec<Formula>, AnnotationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if feature.identifier == "slow" {
                std::thread::sleep(Duration::from_millis(500));
            }
            Ok(vec![Formula::neutral("C6H12O6".parse().unwrap())])
        }
    }

    #[test]
    fn test_units_run_at_most_once_across_replaced_pools() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let config = AnnotationConfig { parallel: true, n_cpu: 1, ..AnnotationConfig::default() }.validated();
        let ctx = Arc::new(UnitContext {
            isotope_picker: config.isotope_picker(),
            ms2_preprocessor: config.ms2_preprocessor(),
            ms1_tolerance: config.ms1_tolerance(),
            bounds: config.element_bounds(),
            db: glucose_db(),
            generator: Arc::new(CountingGenerator { calls: Arc::clone(&calls) }),
        });
        let features: Vec<Feature> = ["slow", "a", "b"]
            .iter()
            .map(|id| Feature::new(*id, 181.0707, 1, None, None).unwrap())
            .collect();

        let outcomes = run_units(&features, &ctx, &config, Duration::from_millis(100)).unwrap();
        assert!(matches!(outcomes[0], UnitOutcome::TimedOut));
        assert!(outcomes[1..].iter().all(|o| matches!(o, UnitOutcome::Done(_))));

        // the abandoned worker finishes and drains its queue without rerunning claimed units
        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_update_config_rebuilds_pool() {
        let mut pipeline = AnnotationPipeline::new(AnnotationConfig::default(), glucose_db(), Collaborators::default()).unwrap();
        assert!(pipeline.pool.is_none());
        pipeline.update_config(AnnotationConfig { parallel: true, n_cpu: 1, ..AnnotationConfig::default() }).unwrap();
        assert!(pipeline.pool.is_some());
        assert_eq!(pipeline.config().n_cpu, 1);
    }
}
