use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::constants::{ISOTOPE_MASS_DIFF, MASS_ELECTRON};
use crate::chemistry::elements::{Element, ALPHABET_SIZE};
use crate::error::FormulaError;

/// Signed atom counts over the closed element alphabet.
///
/// Slots follow the order of `Element::ALL`. Counts are only negative inside
/// intermediate adduct deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode)]
pub struct ElementVector(pub [i32; ALPHABET_SIZE]);

impl ElementVector {
    pub const EMPTY: ElementVector = ElementVector([0; ALPHABET_SIZE]);

    pub fn new(counts: [i32; ALPHABET_SIZE]) -> Self {
        ElementVector(counts)
    }

    /// Builds a vector from (element, count) pairs, summing repeated elements.
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::chemistry::elements::Element;
    /// use msformula::chemistry::formula::ElementVector;
    ///
    /// let water = ElementVector::from_pairs(&[(Element::H, 2), (Element::O, 1)]);
    /// assert_eq!(water.to_string(), "H2O");
    /// ```
    pub fn from_pairs(pairs: &[(Element, i32)]) -> Self {
        pairs.iter().fold(ElementVector::EMPTY, |acc, (element, count)| {
            acc.with(*element, acc.get(*element) + count)
        })
    }

    pub fn get(&self, element: Element) -> i32 {
        self.0[element.index()]
    }

    /// Returns a copy with the count of `element` replaced.
    pub fn with(mut self, element: Element, count: i32) -> Self {
        self.0[element.index()] = count;
        self
    }

    pub fn counts(&self) -> &[i32; ALPHABET_SIZE] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    pub fn has_halogen(&self) -> bool {
        Element::HALOGENS.iter().any(|e| self.get(*e) != 0)
    }

    /// Sum of monoisotopic element masses, accumulated in single precision.
    pub fn monoisotopic_sum(&self) -> f32 {
        Element::ALL
            .iter()
            .map(|e| self.get(*e) as f32 * e.monoisotopic_mass())
            .sum()
    }

    /// Mass of the vector in a given charge and isotope state.
    ///
    /// With `charge == 0` this is the neutral mass plus the isotope offset,
    /// otherwise the electron-corrected mass divided by `|charge|`.
    ///
    /// # Arguments
    ///
    /// * `charge` - ion charge, 0 for a neutral molecule
    /// * `isotope` - isotope index, 0 for the monoisotopic peak
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::chemistry::formula::ElementVector;
    ///
    /// let water: ElementVector = "H2O".parse().unwrap();
    /// assert!((water.mass(0, 0) - 18.010565).abs() < 1e-4);
    /// ```
    pub fn mass(&self, charge: i32, isotope: i32) -> f64 {
        let sum = self.monoisotopic_sum() as f64;
        let shifted = sum + isotope as f64 * ISOTOPE_MASS_DIFF;
        if charge == 0 {
            shifted
        } else {
            (shifted - charge as f64 * MASS_ELECTRON) / charge.unsigned_abs() as f64
        }
    }

    /// m/z of the monoisotopic ion, fails for a neutral charge.
    pub fn mz(&self, charge: i32) -> Result<f64, FormulaError> {
        if charge == 0 {
            return Err(FormulaError::ZeroCharge);
        }
        Ok(self.mass(charge, 0))
    }

    /// Double bond equivalents: `C + 1 - (H + F + Cl + Br + I + Na + K) / 2 + (N + P) / 2`.
    pub fn dbe(&self) -> f64 {
        let monovalent = [Element::H, Element::F, Element::Cl, Element::Br, Element::I, Element::Na, Element::K]
            .iter()
            .map(|e| self.get(*e))
            .sum::<i32>();
        let trivalent = self.get(Element::N) + self.get(Element::P);
        self.get(Element::C) as f64 + 1.0 - monovalent as f64 / 2.0 + trivalent as f64 / 2.0
    }
}

impl Add for ElementVector {
    type Output = ElementVector;

    fn add(self, rhs: ElementVector) -> ElementVector {
        let mut out = self.0;
        out.iter_mut().zip(rhs.0.iter()).for_each(|(a, b)| *a += b);
        ElementVector(out)
    }
}

impl Sub for ElementVector {
    type Output = ElementVector;

    fn sub(self, rhs: ElementVector) -> ElementVector {
        self + (-rhs)
    }
}

impl Neg for ElementVector {
    type Output = ElementVector;

    fn neg(self) -> ElementVector {
        self * -1
    }
}

impl Mul<i32> for ElementVector {
    type Output = ElementVector;

    fn mul(self, rhs: i32) -> ElementVector {
        ElementVector(self.0.map(|c| c * rhs))
    }
}

impl Display for ElementVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for element in Element::ALL {
            match self.get(element) {
                0 => {}
                1 => write!(f, "{}", element)?,
                count => write!(f, "{}{}", element, count)?,
            }
        }
        Ok(())
    }
}

impl FromStr for ElementVector {
    type Err = FormulaError;

    /// Parses a formula such as `C6H12O6`; repeated elements are summed and
    /// counts may carry a leading `-`.
    fn from_str(formula: &str) -> Result<Self, Self::Err> {
        let mut counts = ElementVector::EMPTY;
        let mut chars = formula.chars().peekable();

        while let Some(c) = chars.next() {
            if !c.is_ascii_uppercase() {
                return Err(FormulaError::UnexpectedCharacter(c));
            }
            let mut symbol = c.to_string();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_lowercase() {
                    symbol.push(next);
                    chars.next();
                } else {
                    break;
                }
            }

            let mut count_text = String::new();
            if chars.peek() == Some(&'-') {
                count_text.push('-');
                chars.next();
            }
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() {
                    count_text.push(next);
                    chars.next();
                } else {
                    break;
                }
            }

            let element = Element::from_symbol(&symbol)
                .ok_or_else(|| FormulaError::UnknownElement(symbol.clone()))?;
            let count = if count_text.is_empty() {
                1
            } else {
                count_text.parse::<i32>().map_err(|_| FormulaError::InvalidCount {
                    element: symbol.clone(),
                    count: count_text.clone(),
                })?
            };
            counts = counts.with(element, counts.get(element) + count);
        }

        Ok(counts)
    }
}

/// A molecular formula in a fixed charge and isotope state.
///
/// Mass and DBE are derived once on construction; a mass taken from a
/// formula database can be supplied instead of being recomputed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Formula {
    pub elements: ElementVector,
    pub charge: i32,
    pub isotope: i32,
    pub mass: f64,
    pub dbe: f64,
}

impl Formula {
    /// Creates a monoisotopic formula and computes its charge-adjusted mass.
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::chemistry::formula::Formula;
    ///
    /// let glucose = Formula::new("C6H12O6".parse().unwrap(), 0);
    /// assert_eq!(glucose.dbe, 1.0);
    /// assert!((glucose.mass - 180.06339).abs() < 1e-3);
    /// ```
    pub fn new(elements: ElementVector, charge: i32) -> Self {
        Formula::with_isotope(elements, charge, 0)
    }

    pub fn with_isotope(elements: ElementVector, charge: i32, isotope: i32) -> Self {
        Formula {
            elements,
            charge,
            isotope,
            mass: elements.mass(charge, isotope),
            dbe: elements.dbe(),
        }
    }

    /// Creates a formula with a precomputed mass.
    pub fn with_mass(elements: ElementVector, charge: i32, mass: f64) -> Self {
        Formula {
            elements,
            charge,
            isotope: 0,
            mass,
            dbe: elements.dbe(),
        }
    }

    pub fn neutral(elements: ElementVector) -> Self {
        Formula::new(elements, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn mz(&self) -> Result<f64, FormulaError> {
        if self.charge == 0 {
            return Err(FormulaError::ZeroCharge);
        }
        Ok(self.elements.mass(self.charge, self.isotope))
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Formula::neutral(s.parse()?))
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Null");
        }
        write!(f, "{}", self.elements)
    }
}
