use std::fs;
use std::path::Path;

use bincode::{Decode, Encode};
use log::{debug, info};
use ordered_float::OrderedFloat;

use msformula::chemistry::adduct::AdductRule;
use msformula::chemistry::formula::{ElementVector, Formula};
use msformula::data::tolerance::MzTolerance;

use crate::error::AnnotationError;

const FILE_VERSION: u32 = 1;
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Encode, Decode)]
struct DatabaseFile {
    version: u32,
    formulas: Vec<Formula>,
}

/// Read-only table of known neutral formulas, sorted by mass.
///
/// Shared between workers as `Arc<FormulaDatabase>`; replacing it means
/// installing a new handle, never mutating this one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormulaDatabase {
    formulas: Vec<Formula>,
}

impl FormulaDatabase {
    pub fn new(mut formulas: Vec<Formula>) -> Self {
        formulas.sort_by_key(|f| OrderedFloat(f.mass));
        FormulaDatabase { formulas }
    }

    /// Builds a database from neutral element vectors, computing their masses.
    pub fn from_element_vectors(vectors: impl IntoIterator<Item = ElementVector>) -> Self {
        FormulaDatabase::new(vectors.into_iter().map(Formula::neutral).collect())
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    pub fn formulas(&self) -> &[Formula] {
        &self.formulas
    }

    /// Formulas with mass in `[low, high]`.
    pub fn mass_window(&self, low: f64, high: f64) -> &[Formula] {
        let start = self.formulas.partition_point(|f| f.mass < low);
        let end = self.formulas.partition_point(|f| f.mass <= high);
        &self.formulas[start..end.max(start)]
    }

    /// Neutral formulas within `tolerance` of `mass`.
    ///
    /// # Arguments
    ///
    /// * `mass` - target neutral mass
    /// * `tolerance` - ppm tolerances are taken relative to `mass`
    /// * `halogen` - include formulas containing Br, Cl, F or I
    ///
    /// # Examples
    ///
    /// ```
    /// use msannotate::database::FormulaDatabase;
    /// use msformula::data::tolerance::MzTolerance;
    ///
    /// let db = FormulaDatabase::from_element_vectors(
    ///     ["C6H12O6", "CH4", "C6H11ClO5"].iter().map(|s| s.parse().unwrap()),
    /// );
    /// let hits = db.query_neutral_mass(180.0634, MzTolerance::Ppm(10.0), false);
    /// assert_eq!(hits.len(), 1);
    /// assert_eq!(hits[0].to_string(), "C6H12O6");
    /// ```
    pub fn query_neutral_mass(&self, mass: f64, tolerance: MzTolerance, halogen: bool) -> Vec<&Formula> {
        let window = tolerance.abs_at(mass);
        self.mass_window(mass - window, mass + window)
            .iter()
            .filter(|f| halogen || !f.elements.has_halogen())
            .collect()
    }

    /// Neutral formulas whose ion under `adduct` falls within `tolerance` of `mz`.
    pub fn query_precursor_mz(&self, mz: f64, adduct: &AdductRule, tolerance: MzTolerance, halogen: bool) -> Vec<&Formula> {
        let neutral_mass = adduct.neutral_mass(mz);
        let window = tolerance.abs_at(mz) * adduct.charge.unsigned_abs() as f64 / adduct.m as f64;
        self.query_neutral_mass(neutral_mass, MzTolerance::Da(window), halogen)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AnnotationError> {
        let file = DatabaseFile { version: FILE_VERSION, formulas: self.formulas.clone() };
        Ok(bincode::encode_to_vec(&file, bincode::config::standard())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AnnotationError> {
        let (file, _): (DatabaseFile, usize) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        debug!("decoded formula database version {}", file.version);
        Ok(FormulaDatabase::new(file.formulas))
    }

    /// Writes the database as bincode, optionally zstd-compressed.
    pub fn save(&self, path: impl AsRef<Path>, compress: bool) -> Result<(), AnnotationError> {
        let bytes = self.to_bytes()?;
        let bytes = if compress { zstd::encode_all(&bytes[..], 3)? } else { bytes };
        fs::write(path.as_ref(), bytes)?;
        info!("saved {} formulas to {}", self.len(), path.as_ref().display());
        Ok(())
    }

    /// Reads a database written by [`FormulaDatabase::save`], compressed or not.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnnotationError> {
        let bytes = fs::read(path.as_ref())?;
        let bytes = if bytes.starts_with(&ZSTD_MAGIC) { zstd::decode_all(&bytes[..])? } else { bytes };
        let db = FormulaDatabase::from_bytes(&bytes)?;
        info!("loaded {} formulas from {}", db.len(), path.as_ref().display());
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_db() -> FormulaDatabase {
        FormulaDatabase::from_element_vectors(
            ["C6H12O6", "C7H8N4O2", "C3H7NO2", "C6H11BrO5", "C2H6O"]
                .iter()
                .map(|s| s.parse().unwrap()),
        )
    }

    #[test]
    fn test_sorted_by_mass() {
        let db = small_db();
        assert!(db.formulas().windows(2).all(|w| w[0].mass <= w[1].mass));
        assert_eq!(db.formulas()[0].to_string(), "C2H6O");
    }

    #[test]
    fn test_halogen_filter() {
        let db = small_db();
        let bromo = Formula::neutral("C6H11BrO5".parse().unwrap()).mass;
        assert!(db.query_neutral_mass(bromo, MzTolerance::Da(0.001), false).is_empty());
        assert_eq!(db.query_neutral_mass(bromo, MzTolerance::Da(0.001), true).len(), 1);
    }

    #[test]
    fn test_query_precursor_mz() {
        let db = small_db();
        let adduct = AdductRule::parse(Some("[M-H]-"), false).into_strict().unwrap();
        let glucose = Formula::neutral("C6H12O6".parse().unwrap());
        let mz = adduct.ion_mz(glucose.mass);
        let hits = db.query_precursor_mz(mz, &adduct, MzTolerance::Ppm(5.0), false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].elements, glucose.elements);
    }

    #[test]
    fn test_bytes_round_trip() {
        let db = small_db();
        let restored = FormulaDatabase::from_bytes(&db.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, db);
    }

    #[test]
    fn test_save_and_load_compressed() {
        let db = small_db();
        let path = std::env::temp_dir().join(format!("msannotate-db-{}.bin", std::process::id()));
        db.save(&path, true).unwrap();
        let restored = FormulaDatabase::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(restored, db);
    }

    proptest! {
        #[test]
        fn prop_mass_window_is_bounded(low in 0.0f64..250.0, width in 0.0f64..100.0) {
            let db = small_db();
            let hits = db.mass_window(low, low + width);
            prop_assert!(hits.iter().all(|f| f.mass >= low && f.mass <= low + width));
            let expected = db.formulas().iter().filter(|f| f.mass >= low && f.mass <= low + width).count();
            prop_assert_eq!(hits.len(), expected);
        }
    }
}
