use std::fmt;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Number of elements in the closed formula alphabet.
pub const ALPHABET_SIZE: usize = 12;

/// Monoisotopic masses in alphabet order, kept in single precision.
pub const MONOISOTOPIC_MASSES: [f32; ALPHABET_SIZE] = [
    12.000000, 1.007825, 78.918336, 34.968853, 18.998403, 126.904473,
    38.963707, 14.003074, 22.989769, 15.994915, 30.973762, 31.972071,
];

/// An element of the formula alphabet.
///
/// The discriminant is the slot of the element inside an `ElementVector`,
/// so the declaration order is the canonical formula order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Element {
    C,
    H,
    Br,
    Cl,
    F,
    I,
    K,
    N,
    Na,
    O,
    P,
    S,
}

impl Element {
    pub const ALL: [Element; ALPHABET_SIZE] = [
        Element::C, Element::H, Element::Br, Element::Cl, Element::F, Element::I,
        Element::K, Element::N, Element::Na, Element::O, Element::P, Element::S,
    ];

    pub const HALOGENS: [Element; 4] = [Element::Br, Element::Cl, Element::F, Element::I];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Element::C => "C",
            Element::H => "H",
            Element::Br => "Br",
            Element::Cl => "Cl",
            Element::F => "F",
            Element::I => "I",
            Element::K => "K",
            Element::N => "N",
            Element::Na => "Na",
            Element::O => "O",
            Element::P => "P",
            Element::S => "S",
        }
    }

    /// Returns the element for a symbol, or `None` if it is not in the alphabet.
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::chemistry::elements::Element;
    ///
    /// assert_eq!(Element::from_symbol("Na"), Some(Element::Na));
    /// assert_eq!(Element::from_symbol("Se"), None);
    /// ```
    pub fn from_symbol(symbol: &str) -> Option<Element> {
        Element::ALL.iter().copied().find(|e| e.symbol() == symbol)
    }

    pub fn monoisotopic_mass(self) -> f32 {
        MONOISOTOPIC_MASSES[self.index()]
    }

    pub fn is_halogen(self) -> bool {
        Element::HALOGENS.contains(&self)
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}
