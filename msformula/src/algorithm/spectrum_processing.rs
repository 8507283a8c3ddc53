use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::chemistry::constants::{
    FRAGMENT_BIN_WIDTH_DA, FRAGMENT_BUDGET_BASE, FRAGMENT_BUDGET_SLOPE, PRECURSOR_EXCLUSION_DA,
};
use crate::data::spectrum::{IndexedSpectrum, ProcessedMs2, Spectrum};
use crate::data::tolerance::MzTolerance;

/// Configuration for MS2 preprocessing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ms2Preprocessor {
    /// MS2 accuracy, widens the precursor exclusion window (default: 10 ppm)
    pub tolerance: MzTolerance,
    /// Peaks below this fraction of the base peak are dropped (default: 0.01)
    pub rel_int_denoise_cutoff: f64,
    /// Peaks kept per 50 Da window, ties included; 0 or 1 disables the cap (default: 6)
    pub top_n_per_50_da: usize,
}

impl Default for Ms2Preprocessor {
    fn default() -> Self {
        Ms2Preprocessor {
            tolerance: MzTolerance::Ppm(10.0),
            rel_int_denoise_cutoff: 0.01,
            top_n_per_50_da: 6,
        }
    }
}

impl Ms2Preprocessor {
    /// Runs de-precursoring, denoising, the per-window cap and the global fragment cap.
    ///
    /// Every stage after the first only runs while peaks remain.
    ///
    /// # Arguments
    ///
    /// * `precursor_mz` - m/z of the fragmented precursor
    /// * `raw` - raw MS2 spectrum
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::algorithm::spectrum_processing::Ms2Preprocessor;
    /// use msformula::data::spectrum::Spectrum;
    ///
    /// let raw = Spectrum::new(vec![50.0, 90.0, 99.0, 120.0], vec![100.0, 0.5, 30.0, 80.0]).unwrap();
    /// let processed = Ms2Preprocessor::default().process(100.0, &raw);
    /// assert_eq!(processed.index, vec![0]);
    /// ```
    pub fn process(&self, precursor_mz: f64, raw: &Spectrum) -> ProcessedMs2 {
        let mut spectrum = deprecursor(raw, precursor_mz, self.tolerance);

        if !spectrum.is_empty() {
            denoise(&mut spectrum, self.rel_int_denoise_cutoff);
        }
        if !spectrum.is_empty() {
            keep_top_n_per_bin(&mut spectrum, self.top_n_per_50_da, FRAGMENT_BIN_WIDTH_DA as f64);
        }
        if !spectrum.is_empty() {
            cap_fragment_count(&mut spectrum, top_n_fragments(precursor_mz));
        }
        spectrum
    }
}

/// Keeps peaks strictly below `precursor_mz - 1.5 - tolerance`.
pub fn deprecursor(raw: &Spectrum, precursor_mz: f64, tolerance: MzTolerance) -> IndexedSpectrum {
    let limit = precursor_mz - PRECURSOR_EXCLUSION_DA - tolerance.abs_at(precursor_mz);
    IndexedSpectrum::filter_source(raw, |mz, _| mz < limit)
}

/// Keeps peaks with intensity at least `rel_cutoff` times the base peak.
pub fn denoise(spectrum: &mut IndexedSpectrum, rel_cutoff: f64) {
    let base_peak = spectrum.intensity.iter().copied().fold(f64::MIN, f64::max);
    let threshold = rel_cutoff * base_peak;
    let mask: Vec<bool> = spectrum.intensity.iter().map(|&i| i >= threshold).collect();
    spectrum.retain_mask(&mask);
}

/// Intensity of the `n`-th most intense value, `None` if there are `n` or fewer values.
fn nth_highest(intensity: impl Iterator<Item = f64>, n: usize) -> Option<f64> {
    let sorted: Vec<f64> = intensity.sorted_by_key(|i| std::cmp::Reverse(OrderedFloat(*i))).collect();
    if sorted.len() > n && n > 0 {
        Some(sorted[n - 1])
    } else {
        None
    }
}

/// Caps each `bin_width` window of m/z at `top_n` peaks, keeping ties with the `top_n`-th.
///
/// Windows are `floor(mz / bin_width)`. A `top_n` of 0 or 1 leaves the spectrum untouched.
pub fn keep_top_n_per_bin(spectrum: &mut IndexedSpectrum, top_n: usize, bin_width: f64) {
    if top_n <= 1 {
        return;
    }

    let bins = spectrum.mz.iter()
        .enumerate()
        .into_group_map_by(|(_, mz)| (*mz / bin_width).floor() as i64);

    let mut mask = vec![true; spectrum.len()];
    for members in bins.values() {
        let threshold = nth_highest(members.iter().map(|(k, _)| spectrum.intensity[*k]), top_n);
        if let Some(threshold) = threshold {
            for (k, _) in members {
                mask[*k] = spectrum.intensity[*k] >= threshold;
            }
        }
    }
    spectrum.retain_mask(&mask);
}

/// Fragment budget for a precursor: `floor(20 + 0.05 * precursor_mz)`.
///
/// # Examples
///
/// ```
/// use msformula::algorithm::spectrum_processing::top_n_fragments;
///
/// assert_eq!(top_n_fragments(183.005), 29);
/// assert_eq!(top_n_fragments(0.0), 20);
/// ```
pub fn top_n_fragments(precursor_mz: f64) -> usize {
    (FRAGMENT_BUDGET_BASE + FRAGMENT_BUDGET_SLOPE * precursor_mz).floor().max(0.0) as usize
}

/// Keeps peaks with intensity at least the `top_n`-th highest; ties may exceed `top_n`.
pub fn cap_fragment_count(spectrum: &mut IndexedSpectrum, top_n: usize) {
    if let Some(threshold) = nth_highest(spectrum.intensity.iter().copied(), top_n) {
        let mask: Vec<bool> = spectrum.intensity.iter().map(|&i| i >= threshold).collect();
        spectrum.retain_mask(&mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn indexed(mz: Vec<f64>, intensity: Vec<f64>) -> IndexedSpectrum {
        let raw = Spectrum::new(mz, intensity).unwrap();
        IndexedSpectrum::filter_source(&raw, |_, _| true)
    }

    #[test]
    fn test_deprecursor_removes_everything_near_precursor() {
        let raw = Spectrum::new(vec![98.6, 99.0, 100.0, 150.0], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(deprecursor(&raw, 100.0, MzTolerance::Da(0.1)).is_empty());
    }

    #[test]
    fn test_deprecursor_is_strict() {
        let raw = Spectrum::new(vec![98.0, 98.4, 98.5], vec![1.0, 2.0, 3.0]).unwrap();
        let kept = deprecursor(&raw, 100.0, MzTolerance::Da(0.0));
        assert_eq!(kept.index, vec![0, 1]);
    }

    #[test]
    fn test_denoise_relative_cutoff() {
        let mut spectrum = indexed(vec![10.0, 20.0, 30.0], vec![1000.0, 10.0, 9.99]);
        denoise(&mut spectrum, 0.01);
        assert_eq!(spectrum.index, vec![0, 1]);
    }

    #[test]
    fn test_per_bin_cap_keeps_ties() {
        let mut spectrum = indexed(
            vec![10.0, 11.0, 12.0, 13.0, 60.0],
            vec![5.0, 3.0, 3.0, 1.0, 0.5],
        );
        keep_top_n_per_bin(&mut spectrum, 2, 50.0);
        assert_eq!(spectrum.index, vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_per_bin_cap_disabled_for_one() {
        let mut spectrum = indexed(vec![10.0, 11.0, 12.0], vec![5.0, 3.0, 1.0]);
        keep_top_n_per_bin(&mut spectrum, 1, 50.0);
        assert_eq!(spectrum.len(), 3);
    }

    #[test]
    fn test_global_cap() {
        let mut spectrum = indexed(vec![10.0, 20.0, 30.0, 40.0], vec![4.0, 1.0, 3.0, 2.0]);
        cap_fragment_count(&mut spectrum, 2);
        assert_eq!(spectrum.index, vec![0, 2]);

        let mut untouched = indexed(vec![10.0, 20.0], vec![4.0, 1.0]);
        cap_fragment_count(&mut untouched, 2);
        assert_eq!(untouched.len(), 2);
    }

    #[test]
    fn test_process_keeps_original_indices_in_mz_order() {
        let raw = Spectrum::new(
            vec![20.0, 40.0, 70.0, 75.0, 140.0, 199.0],
            vec![10.0, 0.001, 50.0, 40.0, 30.0, 100.0],
        ).unwrap();
        let processed = Ms2Preprocessor::default().process(200.0, &raw);
        assert_eq!(processed.index, vec![0, 2, 3, 4]);
        assert_eq!(processed.mz, vec![20.0, 70.0, 75.0, 140.0]);
    }

    proptest! {
        #[test]
        fn prop_processed_is_bounded(
            peaks in prop::collection::vec((1.0f64..1000.0, 0.0f64..1e6), 0..300),
            precursor in 50.0f64..1000.0,
        ) {
            let (mz, intensity): (Vec<f64>, Vec<f64>) = peaks.into_iter().unzip();
            let raw = Spectrum::new(mz, intensity).unwrap();
            let preprocessor = Ms2Preprocessor::default();
            let processed = preprocessor.process(precursor, &raw);
            let limit = precursor - 1.5 - preprocessor.tolerance.abs_at(precursor);

            prop_assert!(processed.len() <= raw.len());
            prop_assert!(processed.mz.iter().all(|&m| m < limit));
            prop_assert!(processed.index.windows(2).all(|w| w[0] < w[1]));
            for (k, &i) in processed.index.iter().enumerate() {
                prop_assert_eq!(processed.mz[k], raw.mz[i]);
            }
        }
    }
}
