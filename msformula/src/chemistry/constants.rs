// Purpose: To store constants that are used in the program
pub const ISOTOPE_MASS_DIFF: f64 = 1.0033548; // 13C - 12C, Unified atomic mass unit
pub const MASS_ELECTRON: f64 = 0.0005486; // Unified atomic mass unit

// Precursor window and fragment budget used during MS2 preprocessing
pub const PRECURSOR_EXCLUSION_DA: f64 = 1.5;
pub const FRAGMENT_BIN_WIDTH_DA: f32 = 50.0;
pub const FRAGMENT_BUDGET_BASE: f64 = 20.0;
pub const FRAGMENT_BUDGET_SLOPE: f64 = 0.05;
