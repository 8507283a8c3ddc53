use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use msformula::chemistry::adduct::{check_adduct, AdductRule};
use msformula::data::tolerance::MzTolerance;
use msformula::error::ParseError;

use crate::database::FormulaDatabase;
use crate::error::AnnotationError;

/// A formula matching a queried mass or m/z.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormulaResult {
    pub formula: String,
    /// Neutral mass or ion m/z of the formula.
    pub mass: f64,
    /// `mass - target`.
    pub mass_error: f64,
}

impl FormulaResult {
    pub fn new(formula: String, mass: f64, target: f64) -> Self {
        FormulaResult { formula, mass, mass_error: mass - target }
    }
}

fn sort_by_abs_error(results: &mut [FormulaResult]) {
    results.sort_by_key(|r| OrderedFloat(r.mass_error.abs()));
}

/// Neutral formulas within `tolerance` of `mass` with DBE at least `dbe_cutoff`.
///
/// Results are sorted by ascending absolute mass error.
///
/// # Examples
///
/// ```
/// use msannotate::database::FormulaDatabase;
/// use msannotate::lookup::mass_to_formula;
/// use msformula::data::tolerance::MzTolerance;
///
/// let db = FormulaDatabase::from_element_vectors(["C6H12O6", "C2H6O"].iter().map(|s| s.parse().unwrap()));
/// let results = mass_to_formula(&db, 180.0634, MzTolerance::Ppm(10.0), false, 0.0);
/// assert_eq!(results[0].formula, "C6H12O6");
/// ```
pub fn mass_to_formula(
    db: &FormulaDatabase,
    mass: f64,
    tolerance: MzTolerance,
    halogen: bool,
    dbe_cutoff: f64,
) -> Vec<FormulaResult> {
    let mut results: Vec<FormulaResult> = db
        .query_neutral_mass(mass, tolerance, halogen)
        .into_iter()
        .filter(|f| f.dbe >= dbe_cutoff)
        .map(|f| FormulaResult::new(f.elements.to_string(), f.mass, mass))
        .collect();
    sort_by_abs_error(&mut results);
    results
}

/// Neutral formulas whose ion under `adduct` lies within `tolerance` of `mz`.
///
/// Fails with a `ParseError` when `adduct` is not a valid notation.
pub fn mz_to_formula(
    db: &FormulaDatabase,
    mz: f64,
    adduct: &str,
    tolerance: MzTolerance,
    halogen: bool,
    dbe_cutoff: f64,
) -> Result<Vec<FormulaResult>, AnnotationError> {
    let pos_mode = check_adduct(adduct).ok_or_else(|| ParseError::InvalidStyle(adduct.to_string()))?;
    let rule = AdductRule::parse(Some(adduct), pos_mode).into_strict()?;

    let mut results: Vec<FormulaResult> = db
        .query_precursor_mz(mz, &rule, tolerance, halogen)
        .into_iter()
        .filter(|f| f.dbe >= dbe_cutoff)
        .map(|f| FormulaResult::new(f.elements.to_string(), rule.ion_mz(f.mass), mz))
        .collect();
    sort_by_abs_error(&mut results);
    Ok(results)
}
