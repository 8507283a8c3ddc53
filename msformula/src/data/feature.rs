use std::fmt;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::algorithm::isotope::Ms1IsotopePicker;
use crate::algorithm::spectrum_processing::Ms2Preprocessor;
use crate::chemistry::adduct::AdductRule;
use crate::data::candidate::CandidateFormula;
use crate::data::spectrum::{ProcessedMs1, ProcessedMs2, Spectrum};
use crate::error::FeatureError;

/// A precursor ion to annotate, with its spectra and candidate formulas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub identifier: String,
    pub mz: f64,
    pub charge: i32,
    /// Retention time in seconds.
    pub rt: Option<f64>,
    pub adduct: AdductRule,
    pub ms1_raw: Option<Spectrum>,
    pub ms1_processed: Option<ProcessedMs1>,
    pub ms2_raw: Option<Spectrum>,
    pub ms2_processed: Option<ProcessedMs2>,
    pub candidate_formula_list: Option<Vec<CandidateFormula>>,
}

impl Feature {
    /// Creates a feature; an unparsable adduct is replaced by the polarity default.
    ///
    /// Polarity follows the sign of `charge`.
    ///
    /// # Arguments
    ///
    /// * `identifier` - record identifier used in logs and summaries
    /// * `mz` - precursor m/z, must be positive
    /// * `charge` - precursor charge, must be nonzero
    /// * `rt` - retention time in seconds
    /// * `adduct` - adduct notation such as `[M+Na]+`, `None` for `[M+H]+` / `[M-H]-`
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::data::feature::Feature;
    ///
    /// let feature = Feature::new("f1", 181.0707, 1, Some(60.0), Some("[M+H]+")).unwrap();
    /// assert_eq!(feature.adduct.charge, 1);
    ///
    /// let negative = Feature::new("f2", 179.0561, -1, None, Some("junk")).unwrap();
    /// assert_eq!(negative.adduct.notation, "[M-H]-");
    ///
    /// assert!(Feature::new("f3", 181.0707, 0, None, None).is_err());
    /// ```
    pub fn new(
        identifier: impl Into<String>,
        mz: f64,
        charge: i32,
        rt: Option<f64>,
        adduct: Option<&str>,
    ) -> Result<Self, FeatureError> {
        let identifier = identifier.into();
        Feature::validate(&identifier, mz, charge)?;
        let adduct = AdductRule::parse(adduct, charge > 0).into_lenient();
        Ok(Feature::with_adduct(identifier, mz, charge, rt, adduct))
    }

    /// Like [`Feature::new`], but an unparsable adduct is an error.
    pub fn new_strict(
        identifier: impl Into<String>,
        mz: f64,
        charge: i32,
        rt: Option<f64>,
        adduct: Option<&str>,
    ) -> Result<Self, FeatureError> {
        let identifier = identifier.into();
        Feature::validate(&identifier, mz, charge)?;
        let adduct = AdductRule::parse(adduct, charge > 0).into_strict()?;
        Ok(Feature::with_adduct(identifier, mz, charge, rt, adduct))
    }

    fn validate(identifier: &str, mz: f64, charge: i32) -> Result<(), FeatureError> {
        if charge == 0 {
            return Err(FeatureError::ZeroCharge(identifier.to_string()));
        }
        if !(mz > 0.0) {
            return Err(FeatureError::InvalidMz { identifier: identifier.to_string(), mz });
        }
        Ok(())
    }

    fn with_adduct(identifier: String, mz: f64, charge: i32, rt: Option<f64>, adduct: AdductRule) -> Self {
        Feature {
            identifier,
            mz,
            charge,
            rt,
            adduct,
            ms1_raw: None,
            ms1_processed: None,
            ms2_raw: None,
            ms2_processed: None,
            candidate_formula_list: None,
        }
    }

    pub fn with_ms1(mut self, ms1: Spectrum) -> Self {
        self.ms1_raw = Some(ms1);
        self
    }

    pub fn with_ms2(mut self, ms2: Spectrum) -> Self {
        self.ms2_raw = Some(ms2);
        self
    }

    /// Fills the processed MS1 and MS2 spectra from the raw ones.
    ///
    /// Empty or missing raw spectra leave the processed slot unset.
    pub fn data_preprocess(&mut self, isotope_picker: &Ms1IsotopePicker, ms2_preprocessor: &Ms2Preprocessor) {
        if let Some(ms1) = self.ms1_raw.as_ref().filter(|s| !s.is_empty()) {
            self.ms1_processed = Some(isotope_picker.pick(self.mz, ms1, self.adduct.charge));
        }
        if let Some(ms2) = self.ms2_raw.as_ref().filter(|s| !s.is_empty()) {
            self.ms2_processed = Some(ms2_preprocessor.process(self.mz, ms2));
        }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidate_formula_list.as_ref().map_or(0, Vec::len)
    }

    pub fn has_processed_ms2(&self) -> bool {
        self.ms2_processed.as_ref().is_some_and(|s| !s.is_empty())
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "mz {}  adduct {}  cf count: {}", self.mz, self.adduct.notation, self.candidate_count())
    }
}
