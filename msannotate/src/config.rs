use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use msformula::algorithm::isotope::Ms1IsotopePicker;
use msformula::algorithm::spectrum_processing::Ms2Preprocessor;
use msformula::chemistry::elements::{Element, ALPHABET_SIZE};
use msformula::chemistry::formula::ElementVector;
use msformula::data::tolerance::MzTolerance;

use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT_SECS: f64 = 300.0;
pub const DEFAULT_POOL_GRACE_SECS: f64 = 30.0;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_ISOTOPE_BIN_MZTOL: f64 = 0.02;
pub const DEFAULT_MAX_ISOTOPE_CNT: i32 = 4;
pub const DEFAULT_TOP_N_PER_50_DA: i32 = 6;

/// Instrument presets; each fixes ppm tolerances for MS1 and MS2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsInstrument {
    Orbitrap,
    Fticr,
    Qtof,
}

impl MsInstrument {
    /// (MS1, MS2) tolerance in ppm.
    pub fn tolerances_ppm(self) -> (f64, f64) {
        match self {
            MsInstrument::Orbitrap => (5.0, 10.0),
            MsInstrument::Fticr => (2.0, 5.0),
            MsInstrument::Qtof => (10.0, 20.0),
        }
    }
}

impl FromStr for MsInstrument {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orbitrap" => Ok(MsInstrument::Orbitrap),
            "fticr" => Ok(MsInstrument::Fticr),
            "qtof" => Ok(MsInstrument::Qtof),
            _ => Err(ConfigError::UnknownInstrument(s.to_string())),
        }
    }
}

impl Display for MsInstrument {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsInstrument::Orbitrap => "orbitrap",
            MsInstrument::Fticr => "fticr",
            MsInstrument::Qtof => "qtof",
        };
        write!(f, "{}", name)
    }
}

/// Inclusive atom count range for one element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRange {
    pub min: i32,
    pub max: i32,
}

impl ElementRange {
    pub const fn new(min: i32, max: i32) -> Self {
        ElementRange { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min >= 0 && self.max >= 0 && self.min <= self.max
    }
}

/// Lower and upper atom counts a candidate formula must respect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementBounds {
    pub lower: ElementVector,
    pub upper: ElementVector,
}

impl ElementBounds {
    pub fn contains(&self, formula: &ElementVector) -> bool {
        (0..ALPHABET_SIZE).all(|i| self.lower.0[i] <= formula.0[i] && formula.0[i] <= self.upper.0[i])
    }
}

/// Configuration of an annotation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Instrument preset; overrides `ppm`, `ms1_tol` and `ms2_tol` when set.
    pub ms_instr: Option<MsInstrument>,
    pub ppm: bool,
    pub ms1_tol: f64,
    pub ms2_tol: f64,
    /// Allow Br, Cl, F and I in candidate formulas.
    pub halogen: bool,
    pub parallel: bool,
    /// Worker count, values outside 1..=cores mean all cores.
    pub n_cpu: i32,
    pub timeout_secs: f64,
    /// Extra wait added to the per-unit timeout when a worker pool is used.
    pub pool_grace_secs: f64,
    pub batch_size: usize,
    pub c_range: ElementRange,
    pub h_range: ElementRange,
    pub n_range: ElementRange,
    pub o_range: ElementRange,
    pub p_range: ElementRange,
    pub s_range: ElementRange,
    pub f_range: ElementRange,
    pub cl_range: ElementRange,
    pub br_range: ElementRange,
    pub i_range: ElementRange,
    pub isotope_bin_mztol: f64,
    pub max_isotope_cnt: i32,
    pub rel_int_denoise_cutoff: f64,
    pub top_n_per_50_da: i32,
}

const DEFAULT_RANGES: [(Element, ElementRange); 10] = [
    (Element::C, ElementRange::new(0, 80)),
    (Element::H, ElementRange::new(0, 150)),
    (Element::N, ElementRange::new(0, 20)),
    (Element::O, ElementRange::new(0, 30)),
    (Element::P, ElementRange::new(0, 10)),
    (Element::S, ElementRange::new(0, 15)),
    (Element::F, ElementRange::new(0, 20)),
    (Element::Cl, ElementRange::new(0, 15)),
    (Element::Br, ElementRange::new(0, 10)),
    (Element::I, ElementRange::new(0, 10)),
];

fn default_range(element: Element) -> ElementRange {
    DEFAULT_RANGES
        .iter()
        .find(|(e, _)| *e == element)
        .map_or(ElementRange::new(0, 0), |(_, r)| *r)
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        AnnotationConfig {
            ms_instr: None,
            ppm: true,
            ms1_tol: 5.0,
            ms2_tol: 10.0,
            halogen: false,
            parallel: false,
            n_cpu: -1,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            pool_grace_secs: DEFAULT_POOL_GRACE_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            c_range: default_range(Element::C),
            h_range: default_range(Element::H),
            n_range: default_range(Element::N),
            o_range: default_range(Element::O),
            p_range: default_range(Element::P),
            s_range: default_range(Element::S),
            f_range: default_range(Element::F),
            cl_range: default_range(Element::Cl),
            br_range: default_range(Element::Br),
            i_range: default_range(Element::I),
            isotope_bin_mztol: DEFAULT_ISOTOPE_BIN_MZTOL,
            max_isotope_cnt: DEFAULT_MAX_ISOTOPE_CNT,
            rel_int_denoise_cutoff: 0.01,
            top_n_per_50_da: DEFAULT_TOP_N_PER_50_DA,
        }
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

impl AnnotationConfig {
    /// Default configuration with the tolerances of an instrument preset.
    ///
    /// # Examples
    ///
    /// ```
    /// use msannotate::config::AnnotationConfig;
    ///
    /// let config = AnnotationConfig::for_instrument("qtof").unwrap();
    /// assert_eq!((config.ms1_tol, config.ms2_tol), (10.0, 20.0));
    /// assert!(AnnotationConfig::for_instrument("sector").is_err());
    /// ```
    pub fn for_instrument(name: &str) -> Result<Self, ConfigError> {
        let instrument: MsInstrument = name.parse()?;
        Ok(AnnotationConfig { ms_instr: Some(instrument), ..AnnotationConfig::default() }.validated())
    }

    fn range_mut(&mut self, element: Element) -> Option<&mut ElementRange> {
        match element {
            Element::C => Some(&mut self.c_range),
            Element::H => Some(&mut self.h_range),
            Element::N => Some(&mut self.n_range),
            Element::O => Some(&mut self.o_range),
            Element::P => Some(&mut self.p_range),
            Element::S => Some(&mut self.s_range),
            Element::F => Some(&mut self.f_range),
            Element::Cl => Some(&mut self.cl_range),
            Element::Br => Some(&mut self.br_range),
            Element::I => Some(&mut self.i_range),
            Element::K | Element::Na => None,
        }
    }

    fn range(&self, element: Element) -> Option<ElementRange> {
        match element {
            Element::C => Some(self.c_range),
            Element::H => Some(self.h_range),
            Element::N => Some(self.n_range),
            Element::O => Some(self.o_range),
            Element::P => Some(self.p_range),
            Element::S => Some(self.s_range),
            Element::F => Some(self.f_range),
            Element::Cl => Some(self.cl_range),
            Element::Br => Some(self.br_range),
            Element::I => Some(self.i_range),
            Element::K | Element::Na => None,
        }
    }

    /// Returns a copy with out-of-range values replaced by defaults, warning for each.
    pub fn validated(mut self) -> Self {
        if let Some(instrument) = self.ms_instr {
            let (ms1, ms2) = instrument.tolerances_ppm();
            self.ppm = true;
            self.ms1_tol = ms1;
            self.ms2_tol = ms2;
        }
        if !(self.ms1_tol > 0.0) {
            let fallback = if self.ppm { 5.0 } else { 0.005 };
            warn!("MS1 tolerance {} is not positive, set to {}", self.ms1_tol, fallback);
            self.ms1_tol = fallback;
        }
        if !(self.ms2_tol > 0.0) {
            let fallback = if self.ppm { 10.0 } else { 0.01 };
            warn!("MS2 tolerance {} is not positive, set to {}", self.ms2_tol, fallback);
            self.ms2_tol = fallback;
        }

        let cores = available_cores();
        if self.n_cpu <= 0 || self.n_cpu as usize > cores {
            if self.n_cpu != -1 {
                warn!("CPU count {} is out of range, set to {}", self.n_cpu, cores);
            }
            self.n_cpu = cores as i32;
        }

        if !(self.timeout_secs > 0.0) || !self.timeout_secs.is_finite() {
            warn!("Timeout {} s is invalid, set to {} s", self.timeout_secs, DEFAULT_TIMEOUT_SECS);
            self.timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        if !(self.pool_grace_secs >= 0.0) || !self.pool_grace_secs.is_finite() {
            warn!("Pool grace period {} s is invalid, set to {} s", self.pool_grace_secs, DEFAULT_POOL_GRACE_SECS);
            self.pool_grace_secs = DEFAULT_POOL_GRACE_SECS;
        }
        if self.batch_size == 0 {
            warn!("Batch size 0 is invalid, set to {}", DEFAULT_BATCH_SIZE);
            self.batch_size = DEFAULT_BATCH_SIZE;
        }

        for (element, default) in DEFAULT_RANGES {
            if let Some(range) = self.range_mut(element) {
                if !range.is_valid() {
                    warn!(
                        "Element range for {} ({}, {}) is invalid, set to ({}, {})",
                        element, range.min, range.max, default.min, default.max
                    );
                    *range = default;
                }
            }
        }

        if !(self.isotope_bin_mztol > 0.0) {
            warn!("Isotope bin m/z tolerance is set to {}", DEFAULT_ISOTOPE_BIN_MZTOL);
            self.isotope_bin_mztol = DEFAULT_ISOTOPE_BIN_MZTOL;
        }
        if self.max_isotope_cnt < 1 {
            warn!("Maximum isotope count is set to {}", DEFAULT_MAX_ISOTOPE_CNT);
            self.max_isotope_cnt = DEFAULT_MAX_ISOTOPE_CNT;
        }
        if !(0.0..1.0).contains(&self.rel_int_denoise_cutoff) {
            warn!("Relative intensity denoise cutoff is set to 0");
            self.rel_int_denoise_cutoff = 0.0;
        }
        if self.top_n_per_50_da < 1 {
            warn!("Top n peaks per 50 Da is set to {}", DEFAULT_TOP_N_PER_50_DA);
            self.top_n_per_50_da = DEFAULT_TOP_N_PER_50_DA;
        }
        self
    }

    pub fn ms1_tolerance(&self) -> MzTolerance {
        MzTolerance::new(self.ms1_tol, self.ppm)
    }

    pub fn ms2_tolerance(&self) -> MzTolerance {
        MzTolerance::new(self.ms2_tol, self.ppm)
    }

    /// Number of pool workers, 1 when running sequentially.
    pub fn worker_count(&self) -> usize {
        if self.parallel {
            self.n_cpu.max(1) as usize
        } else {
            1
        }
    }

    /// How long the orchestrator waits for one preprocessing and enumeration unit.
    pub fn unit_timeout(&self) -> Duration {
        let grace = if self.parallel { self.pool_grace_secs } else { 0.0 };
        Duration::from_secs_f64(self.timeout_secs + grace)
    }

    pub fn isotope_picker(&self) -> Ms1IsotopePicker {
        Ms1IsotopePicker {
            tolerance: self.ms1_tolerance(),
            isotope_bin_mztol: self.isotope_bin_mztol,
            max_isotope_cnt: self.max_isotope_cnt.max(1) as usize,
        }
    }

    pub fn ms2_preprocessor(&self) -> Ms2Preprocessor {
        Ms2Preprocessor {
            tolerance: self.ms2_tolerance(),
            rel_int_denoise_cutoff: self.rel_int_denoise_cutoff,
            top_n_per_50_da: self.top_n_per_50_da.max(0) as usize,
        }
    }

    /// Element bounds for candidate enumeration; K and Na are always 0 and
    /// halogens are 0 unless enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use msannotate::config::AnnotationConfig;
    /// use msformula::chemistry::elements::Element;
    ///
    /// let bounds = AnnotationConfig::default().element_bounds();
    /// assert_eq!(bounds.upper.get(Element::C), 80);
    /// assert_eq!(bounds.upper.get(Element::Cl), 0);
    /// ```
    pub fn element_bounds(&self) -> ElementBounds {
        let mut lower = ElementVector::EMPTY;
        let mut upper = ElementVector::EMPTY;
        for element in Element::ALL {
            if element.is_halogen() && !self.halogen {
                continue;
            }
            if let Some(range) = self.range(element) {
                lower = lower.with(element, range.min);
                upper = upper.with(element, range.max);
            }
        }
        ElementBounds { lower, upper }
    }
}
