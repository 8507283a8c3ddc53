use serde::{Deserialize, Serialize};

use crate::chemistry::constants::ISOTOPE_MASS_DIFF;
use crate::data::spectrum::{IndexedSpectrum, ProcessedMs1, Spectrum};
use crate::data::tolerance::MzTolerance;

/// Settings for extracting the MS1 isotope envelope of a precursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ms1IsotopePicker {
    /// Accuracy used to locate the monoisotopic peak.
    pub tolerance: MzTolerance,
    /// Absolute window (Da) around each expected isotope position.
    pub isotope_bin_mztol: f64,
    /// Number of isotope positions inspected, M0 included.
    pub max_isotope_cnt: usize,
}

impl Default for Ms1IsotopePicker {
    fn default() -> Self {
        Ms1IsotopePicker {
            tolerance: MzTolerance::Ppm(5.0),
            isotope_bin_mztol: 0.02,
            max_isotope_cnt: 4,
        }
    }
}

impl Ms1IsotopePicker {
    /// Extracts M0 and the following isotope peaks of a precursor.
    ///
    /// # Arguments
    ///
    /// * `mz` - precursor m/z
    /// * `raw` - raw MS1 spectrum
    /// * `charge` - ion charge, only its magnitude is used
    ///
    /// # Returns
    ///
    /// * `ProcessedMs1` - M0 first, then all peaks matched per isotope step; empty if no M0 is found
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::algorithm::isotope::Ms1IsotopePicker;
    /// use msformula::data::spectrum::Spectrum;
    ///
    /// let raw = Spectrum::new(vec![200.0, 201.0033548, 250.0], vec![100.0, 20.0, 5.0]).unwrap();
    /// let processed = Ms1IsotopePicker::default().pick(200.0, &raw, 1);
    /// assert_eq!(processed.index, vec![0, 1]);
    /// ```
    pub fn pick(&self, mz: f64, raw: &Spectrum, charge: i32) -> ProcessedMs1 {
        let m0 = match find_m0(mz, &raw.mz, self.tolerance.abs_at(mz)) {
            Some(m0) => m0,
            None => return IndexedSpectrum::default(),
        };

        let mut index = vec![m0];
        index.extend(find_isotope_peaks(mz, &raw.mz, charge, self.isotope_bin_mztol, self.max_isotope_cnt));
        IndexedSpectrum::from_indices(raw, index)
    }
}

/// Index of the peak closest to `mz` within `mz_diff`.
///
/// Among peaks at equal distance the first one wins.
pub fn find_m0(mz: f64, mz_array: &[f64], mz_diff: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (k, m) in mz_array.iter().enumerate() {
        let diff = (m - mz).abs();
        let closer = match best {
            None => diff <= mz_diff,
            Some((_, best_diff)) => diff < best_diff,
        };
        if closer {
            best = Some((k, diff));
        }
    }
    best.map(|(k, _)| k)
}

/// Indices of all peaks matching the isotope positions after M0.
///
/// Position `k` lies `k * ISOTOPE_MASS_DIFF / |charge|` above `mz`; the search
/// stops at the first position without a match.
pub fn find_isotope_peaks(
    mz: f64,
    mz_array: &[f64],
    charge: i32,
    isotope_bin_mztol: f64,
    max_isotope_cnt: usize,
) -> Vec<usize> {
    let step = ISOTOPE_MASS_DIFF / charge.unsigned_abs().max(1) as f64;
    let mut index = Vec::new();
    let mut target = mz;

    for _ in 1..max_isotope_cnt {
        target += step;
        let before = index.len();
        index.extend(
            mz_array.iter()
                .enumerate()
                .filter(|(_, m)| (*m - target).abs() <= isotope_bin_mztol)
                .map(|(j, _)| j),
        );
        if index.len() == before {
            break;
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_m0_closest() {
        let mz_array = vec![99.999, 100.0004, 100.0002, 100.01];
        assert_eq!(find_m0(100.0, &mz_array, 0.001), Some(2));
    }

    #[test]
    fn test_find_m0_keeps_first_on_tie() {
        let mz_array = vec![99.5, 100.5];
        assert_eq!(find_m0(100.0, &mz_array, 1.0), Some(0));
    }

    #[test]
    fn test_find_m0_none() {
        assert_eq!(find_m0(100.0, &[99.0, 101.0], 0.001), None);
        assert_eq!(find_m0(100.0, &[], 0.001), None);
    }

    #[test]
    fn test_isotope_peaks_stop_at_gap() {
        let mz_array = vec![100.0, 101.0034, 101.01, 103.0100];
        let peaks = find_isotope_peaks(100.0, &mz_array, 1, 0.02, 4);
        assert_eq!(peaks, vec![1, 2]);
    }

    #[test]
    fn test_isotope_peaks_doubly_charged() {
        let mz_array = vec![500.0, 500.5017, 501.0034];
        let peaks = find_isotope_peaks(500.0, &mz_array, -2, 0.01, 4);
        assert_eq!(peaks, vec![1, 2]);
    }

    #[test]
    fn test_isotope_peaks_respect_max_count() {
        let mz_array = vec![100.0, 101.0034, 102.0067, 103.0101];
        assert_eq!(find_isotope_peaks(100.0, &mz_array, 1, 0.02, 2), vec![1]);
        assert!(find_isotope_peaks(100.0, &mz_array, 1, 0.02, 1).is_empty());
    }

    #[test]
    fn test_pick_target_and_first_isotope() {
        let target = 300.1;
        let raw = Spectrum::new(
            vec![target, target + ISOTOPE_MASS_DIFF],
            vec![1000.0, 150.0],
        ).unwrap();
        let picker = Ms1IsotopePicker { tolerance: MzTolerance::Ppm(5.0), isotope_bin_mztol: 0.02, max_isotope_cnt: 4 };
        let processed = picker.pick(target, &raw, 1);
        assert_eq!(processed.index, vec![0, 1]);
        assert_eq!(processed.intensity, vec![1000.0, 150.0]);
    }

    #[test]
    fn test_pick_without_m0_is_empty() {
        let raw = Spectrum::new(vec![250.0, 251.0034], vec![10.0, 1.0]).unwrap();
        let picker = Ms1IsotopePicker::default();
        assert!(picker.pick(300.0, &raw, 1).is_empty());
    }
}
