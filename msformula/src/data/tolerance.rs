use serde::{Deserialize, Serialize};

/// Mass accuracy, either relative (ppm) or absolute (Da).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum MzTolerance {
    Ppm(f64),
    Da(f64),
}

impl MzTolerance {
    pub fn new(value: f64, ppm: bool) -> Self {
        if ppm {
            MzTolerance::Ppm(value)
        } else {
            MzTolerance::Da(value)
        }
    }

    /// Absolute window in Da around `mz`.
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::data::tolerance::MzTolerance;
    ///
    /// assert!((MzTolerance::Ppm(10.0).abs_at(500.0) - 0.005).abs() < 1e-12);
    /// assert_eq!(MzTolerance::Da(0.01).abs_at(500.0), 0.01);
    /// ```
    pub fn abs_at(&self, mz: f64) -> f64 {
        match self {
            MzTolerance::Ppm(ppm) => mz * ppm * 1e-6,
            MzTolerance::Da(da) => *da,
        }
    }

    /// Signed error of `observed` against `theoretical`, in the unit of this tolerance.
    pub fn error(&self, observed: f64, theoretical: f64) -> f64 {
        match self {
            MzTolerance::Ppm(_) => (observed - theoretical) / theoretical * 1e6,
            MzTolerance::Da(_) => observed - theoretical,
        }
    }

    pub fn contains(&self, observed: f64, theoretical: f64) -> bool {
        (observed - theoretical).abs() <= self.abs_at(theoretical)
    }

    pub fn is_ppm(&self) -> bool {
        matches!(self, MzTolerance::Ppm(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_units() {
        let ppm = MzTolerance::Ppm(5.0);
        assert!((ppm.error(100.001, 100.0) - 10.0).abs() < 1e-6);
        let da = MzTolerance::Da(0.01);
        assert!((da.error(100.001, 100.0) - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_contains() {
        let tol = MzTolerance::new(10.0, true);
        assert!(tol.contains(100.0009, 100.0));
        assert!(!tol.contains(100.0011, 100.0));
        assert!(tol.is_ppm());
        assert!(tol.contains(99.9991, 100.0));
    }
}
