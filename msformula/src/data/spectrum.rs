use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::SpectrumError;

/// A centroided spectrum, sorted ascending by m/z.
///
/// Uses Arc<Vec<T>> so that features can be cloned cheaply into worker units.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub mz: Arc<Vec<f64>>,
    pub intensity: Arc<Vec<f64>>,
}

impl Spectrum {
    /// Constructs a new `Spectrum`, sorting peaks by m/z.
    ///
    /// # Arguments
    ///
    /// * `mz` - A vector of m/z values.
    /// * `intensity` - A vector of intensity values corresponding to the m/z values.
    ///
    /// # Errors
    ///
    /// Fails with `SpectrumError::LengthMismatch` if both vectors differ in length.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msformula::data::spectrum::Spectrum;
    /// let spectrum = Spectrum::new(vec![200.0, 100.0], vec![20.0, 10.0]).unwrap();
    /// assert_eq!(*spectrum.mz, vec![100.0, 200.0]);
    /// assert_eq!(*spectrum.intensity, vec![10.0, 20.0]);
    /// assert!(Spectrum::new(vec![100.0], vec![]).is_err());
    /// ```
    pub fn new(mz: Vec<f64>, intensity: Vec<f64>) -> Result<Self, SpectrumError> {
        if mz.len() != intensity.len() {
            return Err(SpectrumError::LengthMismatch { mz: mz.len(), intensity: intensity.len() });
        }

        let (mz, intensity): (Vec<f64>, Vec<f64>) = if mz.windows(2).all(|w| w[0] <= w[1]) {
            (mz, intensity)
        } else {
            mz.into_iter()
                .zip(intensity)
                .sorted_by_key(|(m, _)| OrderedFloat(*m))
                .unzip()
        };

        Ok(Spectrum { mz: Arc::new(mz), intensity: Arc::new(intensity) })
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    pub fn max_intensity(&self) -> Option<f64> {
        self.intensity.iter().copied().max_by_key(|i| OrderedFloat(*i))
    }
}

impl Display for Spectrum {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let max = self.mz.iter()
            .zip(self.intensity.iter())
            .max_by_key(|(_, i)| OrderedFloat(**i));

        match max {
            Some((mz, i)) => write!(f, "Spectrum(data points: {}, max by intensity:({:.3}, {}))", self.len(), mz, i),
            None => write!(f, "Spectrum(data points: 0)"),
        }
    }
}

/// How intensities of a processed spectrum are rescaled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntensityNormalization {
    Sum,
    Max,
}

/// Peaks selected from a source spectrum, remembering their original indices.
///
/// Never longer than the source. Processed MS1 spectra hold M0 followed by
/// isotope peaks, processed MS2 spectra keep the source m/z order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedSpectrum {
    pub index: Vec<usize>,
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

pub type ProcessedMs1 = IndexedSpectrum;
pub type ProcessedMs2 = IndexedSpectrum;

impl IndexedSpectrum {
    /// Selects the given source indices, in the order they are listed.
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::data::spectrum::{IndexedSpectrum, Spectrum};
    ///
    /// let source = Spectrum::new(vec![100.0, 200.0, 300.0], vec![1.0, 2.0, 3.0]).unwrap();
    /// let picked = IndexedSpectrum::from_indices(&source, vec![2, 0]);
    /// assert_eq!(picked.mz, vec![300.0, 100.0]);
    /// ```
    pub fn from_indices(source: &Spectrum, index: Vec<usize>) -> Self {
        let mz = index.iter().map(|&i| source.mz[i]).collect();
        let intensity = index.iter().map(|&i| source.intensity[i]).collect();
        IndexedSpectrum { index, mz, intensity }
    }

    /// Keeps the source peaks for which `keep(mz, intensity)` holds.
    pub fn filter_source<F>(source: &Spectrum, keep: F) -> Self
    where
        F: Fn(f64, f64) -> bool,
    {
        let index = (0..source.len())
            .filter(|&i| keep(source.mz[i], source.intensity[i]))
            .collect();
        IndexedSpectrum::from_indices(source, index)
    }

    /// Keeps peaks where `mask` is true; `mask` has one entry per peak.
    pub fn retain_mask(&mut self, mask: &[bool]) {
        let mut flags = mask.iter();
        self.index.retain(|_| *flags.next().unwrap_or(&false));
        let mut flags = mask.iter();
        self.mz.retain(|_| *flags.next().unwrap_or(&false));
        let mut flags = mask.iter();
        self.intensity.retain(|_| *flags.next().unwrap_or(&false));
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// Rescales intensities to unit sum or unit maximum; all-zero spectra are left as is.
    pub fn normalize_intensity(&mut self, method: IntensityNormalization) {
        let denominator = match method {
            IntensityNormalization::Sum => self.intensity.iter().sum::<f64>(),
            IntensityNormalization::Max => self.intensity.iter().copied().fold(0.0, f64::max),
        };
        if denominator > 0.0 {
            self.intensity.iter_mut().for_each(|i| *i /= denominator);
        }
    }
}

impl Display for IndexedSpectrum {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "IndexedSpectrum(idx={:?}, mz={:?}, int={:?})", self.index, self.mz, self.intensity)
    }
}
