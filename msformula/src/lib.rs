// chemistry module
pub mod chemistry {
    pub mod constants;
    pub mod elements;
    pub mod formula;
    pub mod adduct;
}

// algorithm module
pub mod algorithm {
    pub mod isotope;
    pub mod spectrum_processing;
}

// data module
pub mod data {
    pub mod spectrum;
    pub mod tolerance;
    pub mod candidate;
    pub mod feature;
}

pub mod error;
