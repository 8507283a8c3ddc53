use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chemistry::constants::MASS_ELECTRON;
use crate::chemistry::elements::Element;
use crate::chemistry::formula::{ElementVector, Formula};
use crate::error::ParseError;

/// Abbreviations replaced before parsing, applied in this order.
///
/// `FA` is rewritten before `TFA` is looked at, so `TFA` always ends up as `THCOOH`
/// and is rejected by the character check.
const ABBREVIATIONS: [(&str, &str); 13] = [
    ("ACN", "C2H3N"),
    ("IsoProp", "C3H8O"),
    ("DMSO", "C2H6OS"),
    ("FA", "HCOOH"),
    ("HFA", "HCOOH"),
    ("Hac", "CH3COOH"),
    ("HAc", "CH3COOH"),
    ("HAC", "CH3COOH"),
    ("Ac", "CH3COO"),
    ("ac", "CH3COO"),
    ("AC", "CH3COO"),
    ("TFA", "CF3COOH"),
    ("MeOH", "CH4O"),
];

static BODY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Br|Cl|Na|[CHFIKNOPS]|[0-9+\-])*$").expect("static adduct body pattern")
});

/// An ion annotation such as `[M+H]+` or `[2M-H2O+Na]+`, resolved into the
/// elemental delta between the neutral molecule and the observed ion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdductRule {
    /// Notation after whitespace removal and abbreviation expansion.
    pub notation: String,
    pub pos_mode: bool,
    /// Number of molecules in the ion (`2` for `[2M+H]+`).
    pub m: u32,
    pub charge: i32,
    /// Atoms added minus atoms lost.
    pub net_formula: Formula,
    pub loss_formula: Option<Formula>,
}

/// Outcome of a lenient adduct parse.
#[derive(Clone, Debug, PartialEq)]
pub enum AdductParse {
    Parsed(AdductRule),
    /// The input could not be parsed and was replaced by the polarity default.
    Fallback { rule: AdductRule, error: ParseError },
}

impl AdductParse {
    pub fn rule(&self) -> &AdductRule {
        match self {
            AdductParse::Parsed(rule) => rule,
            AdductParse::Fallback { rule, .. } => rule,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, AdductParse::Fallback { .. })
    }

    /// Surfaces the parse error instead of the default rule.
    pub fn into_strict(self) -> Result<AdductRule, ParseError> {
        match self {
            AdductParse::Parsed(rule) => Ok(rule),
            AdductParse::Fallback { error, .. } => Err(error),
        }
    }

    /// Returns the parsed rule, or the default rule with a warning.
    pub fn into_lenient(self) -> AdductRule {
        match self {
            AdductParse::Parsed(rule) => rule,
            AdductParse::Fallback { rule, error } => {
                warn!("{}, set to {}", error, rule.notation);
                rule
            }
        }
    }
}

impl AdductRule {
    /// The rule used when no adduct is given: `[M+H]+` or `[M-H]-`.
    pub fn default_for(pos_mode: bool) -> Self {
        let proton = ElementVector::from_pairs(&[(Element::H, 1)]);
        if pos_mode {
            AdductRule::from_parts("[M+H]+".to_string(), true, 1, 1, proton, None)
        } else {
            AdductRule::from_parts("[M-H]-".to_string(), false, 1, -1, -proton, Some(proton))
        }
    }

    fn from_parts(
        notation: String,
        pos_mode: bool,
        m: u32,
        charge: i32,
        net: ElementVector,
        loss: Option<ElementVector>,
    ) -> Self {
        AdductRule {
            notation,
            pos_mode,
            m,
            charge,
            net_formula: Formula::neutral(net),
            loss_formula: loss.map(Formula::neutral),
        }
    }

    /// Parses an adduct string for the given polarity.
    ///
    /// `None` yields the polarity default. Malformed input never fails here;
    /// it is reported as [`AdductParse::Fallback`] carrying the default rule.
    ///
    /// # Arguments
    ///
    /// * `adduct` - adduct notation, e.g. `[M+Na]+`
    /// * `pos_mode` - true for positive ion mode
    ///
    /// # Examples
    ///
    /// ```
    /// use msformula::chemistry::adduct::AdductRule;
    ///
    /// let rule = AdductRule::parse(Some("[M+2H]2+"), true).into_strict().unwrap();
    /// assert_eq!(rule.charge, 2);
    /// assert_eq!(rule.m, 1);
    /// assert_eq!(rule.net_formula.to_string(), "H2");
    ///
    /// let fallback = AdductRule::parse(Some("not-an-adduct"), true);
    /// assert!(fallback.is_fallback());
    /// assert_eq!(fallback.rule().notation, "[M+H]+");
    /// ```
    pub fn parse(adduct: Option<&str>, pos_mode: bool) -> AdductParse {
        let Some(adduct) = adduct else {
            return AdductParse::Parsed(AdductRule::default_for(pos_mode));
        };
        match parse_notation(adduct, pos_mode) {
            Ok(rule) => AdductParse::Parsed(rule),
            Err(error) => AdductParse::Fallback { rule: AdductRule::default_for(pos_mode), error },
        }
    }

    /// m/z of the ion formed by a neutral molecule of the given mass.
    pub fn ion_mz(&self, neutral_mass: f64) -> f64 {
        (self.m as f64 * neutral_mass + self.net_formula.mass - self.charge as f64 * MASS_ELECTRON)
            / self.charge.unsigned_abs() as f64
    }

    /// Neutral molecule mass for an observed ion m/z; inverse of [`AdductRule::ion_mz`].
    pub fn neutral_mass(&self, mz: f64) -> f64 {
        (mz * self.charge.unsigned_abs() as f64 + self.charge as f64 * MASS_ELECTRON - self.net_formula.mass)
            / self.m as f64
    }

    /// Ion formula for a neutral candidate: `m * neutral + net` at the adduct charge.
    pub fn charged_formula(&self, neutral: &ElementVector) -> Formula {
        Formula::new(*neutral * self.m as i32 + self.net_formula.elements, self.charge)
    }
}

impl Display for AdductRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}; charge: {}; m: {}", self.notation, self.charge, self.m)
    }
}

/// Checks bracket and trailing-sign style and reports the polarity.
///
/// Returns `None` for an invalid notation, otherwise `Some(pos_mode)`.
///
/// # Examples
///
/// ```
/// use msformula::chemistry::adduct::check_adduct;
///
/// assert_eq!(check_adduct("[M + Na]+"), Some(true));
/// assert_eq!(check_adduct("[M-H]-"), Some(false));
/// assert_eq!(check_adduct("M+H"), None);
/// ```
pub fn check_adduct(adduct: &str) -> Option<bool> {
    let adduct: String = adduct.chars().filter(|c| !c.is_whitespace()).collect();
    if !has_bracket_style(&adduct) {
        return None;
    }
    match adduct.chars().last() {
        Some('+') => Some(true),
        Some('-') => Some(false),
        _ => None,
    }
}

fn has_bracket_style(adduct: &str) -> bool {
    adduct.matches('[').count() == 1 && adduct.matches(']').count() == 1 && adduct.contains('M')
}

fn common_adduct(pos_mode: bool, notation: &str) -> Option<(ElementVector, Option<ElementVector>)> {
    let pairs = |p: &[(Element, i32)]| ElementVector::from_pairs(p);
    let adduct = match (pos_mode, notation) {
        (true, "[M+H]+") => (pairs(&[(Element::H, 1)]), None),
        (true, "[M+NH4]+") => (pairs(&[(Element::H, 4), (Element::N, 1)]), None),
        (true, "[M+Na]+") => (pairs(&[(Element::Na, 1)]), None),
        (true, "[M+K]+") => (pairs(&[(Element::K, 1)]), None),
        (true, "[M+H-H2O]+") | (true, "[M-H2O+H]+") => (
            pairs(&[(Element::H, -1), (Element::O, -1)]),
            Some(pairs(&[(Element::H, 2), (Element::O, 1)])),
        ),
        (false, "[M-H]-") => (pairs(&[(Element::H, -1)]), Some(pairs(&[(Element::H, 1)]))),
        (false, "[M+Cl]-") => (pairs(&[(Element::Cl, 1)]), None),
        (false, "[M+Br]-") => (pairs(&[(Element::Br, 1)]), None),
        (false, "[M-H2O-H]-") | (false, "[M-H-H2O]-") => (
            pairs(&[(Element::H, -3), (Element::O, -1)]),
            Some(pairs(&[(Element::H, 3), (Element::O, 1)])),
        ),
        _ => return None,
    };
    Some(adduct)
}

fn expand_abbreviations(notation: &str) -> String {
    ABBREVIATIONS
        .iter()
        .fold(notation.to_string(), |acc, (abbreviation, formula)| acc.replace(abbreviation, formula))
}

fn parse_notation(raw: &str, pos_mode: bool) -> Result<AdductRule, ParseError> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let sign = if pos_mode { '+' } else { '-' };

    if !has_bracket_style(&stripped) || !stripped.ends_with(sign) {
        return Err(ParseError::InvalidStyle(raw.to_string()));
    }

    let notation = expand_abbreviations(&stripped);

    if let Some((net, loss)) = common_adduct(pos_mode, &notation) {
        let charge = if pos_mode { 1 } else { -1 };
        return Ok(AdductRule::from_parts(notation, pos_mode, 1, charge, net, loss));
    }

    let (m_index, close_index) = match (notation.find('M'), notation.find(']')) {
        (Some(m), Some(close)) if m < close => (m, close),
        _ => return Err(ParseError::InvalidStyle(raw.to_string())),
    };
    let body = &notation[m_index + 1..close_index];
    if !BODY_PATTERN.is_match(body) {
        return Err(ParseError::InvalidCharacter(raw.to_string()));
    }

    let m = multiplicity(&notation[..m_index]).ok_or_else(|| ParseError::InvalidMultiplicity(raw.to_string()))?;
    let charge = charge_state(&notation[close_index + 1..], pos_mode)
        .ok_or_else(|| ParseError::InvalidCharge(raw.to_string()))?;

    let (add_text, loss_text) = segment_body(body, raw)?;
    let to_formula = |text: &str| {
        text.parse::<ElementVector>().map_err(|source| ParseError::Formula { adduct: raw.to_string(), source })
    };
    let add = to_formula(&add_text)?;
    let loss = to_formula(&loss_text)?;
    let loss = if loss_text.is_empty() { None } else { Some(loss) };

    Ok(AdductRule::from_parts(
        notation,
        pos_mode,
        m,
        charge,
        add - loss.unwrap_or(ElementVector::EMPTY),
        loss,
    ))
}

/// Digit immediately before `M`, 1 when absent; `None` for 0.
fn multiplicity(prefix: &str) -> Option<u32> {
    match prefix.chars().last().and_then(|c| c.to_digit(10)) {
        Some(0) => None,
        Some(m) => Some(m),
        None => Some(1),
    }
}

fn charge_state(suffix: &str, pos_mode: bool) -> Option<i32> {
    let sign = if pos_mode { '+' } else { '-' };
    let magnitude: String = suffix.chars().filter(|c| *c != sign).collect();
    let magnitude = if magnitude.is_empty() { 1 } else { magnitude.parse::<i32>().ok()? };
    if magnitude <= 0 {
        return None;
    }
    Some(if pos_mode { magnitude } else { -magnitude })
}

/// Splits the text between `M` and `]` into concatenated add and loss groups.
///
/// Every `+` or `-` opens a run up to the next marker. A run starting with a
/// digit `d` contributes its group `d` times.
fn segment_body(body: &str, raw: &str) -> Result<(String, String), ParseError> {
    let malformed = || ParseError::MalformedGroup(raw.to_string());
    let mut add = String::new();
    let mut loss = String::new();

    let marker_positions: Vec<usize> = body.match_indices(['+', '-']).map(|(i, _)| i).collect();
    if marker_positions.first() != Some(&0) {
        return Err(if marker_positions.is_empty() {
            ParseError::NoModification(raw.to_string())
        } else {
            malformed()
        });
    }

    for (n, &start) in marker_positions.iter().enumerate() {
        let end = marker_positions.get(n + 1).copied().unwrap_or(body.len());
        let run = &body[start + 1..end];
        if run.is_empty() {
            return Err(malformed());
        }

        let group = match run.chars().next().and_then(|c| c.to_digit(10)) {
            Some(0) => return Err(malformed()),
            Some(times) => {
                let group = &run[1..];
                if group.is_empty() {
                    return Err(malformed());
                }
                group.repeat(times as usize)
            }
            None => run.to_string(),
        };

        if body[start..].starts_with('+') {
            add.push_str(&group);
        } else {
            loss.push_str(&group);
        }
    }
    Ok((add, loss))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(adduct: &str, pos_mode: bool) -> AdductRule {
        AdductRule::parse(Some(adduct), pos_mode).into_strict().unwrap()
    }

    #[test]
    fn test_common_table_positive() {
        let rule = strict("[M+H]+", true);
        assert_eq!(rule.charge, 1);
        assert_eq!(rule.m, 1);
        assert_eq!(rule.net_formula.to_string(), "H");
        assert!(rule.loss_formula.is_none());

        for (notation, net) in [("[M+Na]+", "Na"), ("[M+K]+", "K")] {
            let rule = strict(notation, true);
            assert_eq!((rule.charge, rule.m), (1, 1));
            assert_eq!(rule.net_formula.to_string(), net);
            assert!(rule.loss_formula.is_none());
        }

        let rule = strict("[M+NH4]+", true);
        assert_eq!(rule.charge, 1);
        assert_eq!(rule.m, 1);
        assert_eq!(rule.net_formula.to_string(), "H4N");
        assert!(rule.loss_formula.is_none());

        for notation in ["[M+H-H2O]+", "[M-H2O+H]+"] {
            let rule = strict(notation, true);
            assert_eq!(rule.net_formula.elements.to_string(), "H-1O-1");
            assert_eq!(rule.loss_formula.unwrap().to_string(), "H2O");
        }
    }

    #[test]
    fn test_common_table_negative() {
        let rule = strict("[M-H]-", false);
        assert_eq!(rule.charge, -1);
        assert_eq!(rule.net_formula.elements.to_string(), "H-1");
        assert_eq!(rule.loss_formula.unwrap().to_string(), "H");

        for notation in ["[M-H-H2O]-", "[M-H2O-H]-"] {
            let rule = strict(notation, false);
            assert_eq!((rule.charge, rule.m), (-1, 1));
            assert_eq!(rule.net_formula.elements.to_string(), "H-3O-1");
            assert_eq!(rule.loss_formula.unwrap().to_string(), "H3O");
        }

        for (notation, net) in [("[M+Cl]-", "Cl"), ("[M+Br]-", "Br")] {
            let rule = strict(notation, false);
            assert_eq!((rule.charge, rule.m), (-1, 1));
            assert_eq!(rule.net_formula.to_string(), net);
            assert!(rule.loss_formula.is_none());
        }
    }

    #[test]
    fn test_whitespace_is_ignored() {
        assert_eq!(strict(" [M + Na] + ", true).net_formula.to_string(), "Na");
    }

    #[test]
    fn test_multiply_charged() {
        let rule = strict("[M+2H]2+", true);
        assert_eq!(rule.charge, 2);
        assert_eq!(rule.m, 1);
        assert_eq!(rule.net_formula.to_string(), "H2");
        assert!(rule.loss_formula.is_none());

        let rule = strict("[M-3H]3-", false);
        assert_eq!(rule.charge, -3);
        assert_eq!(rule.net_formula.elements.to_string(), "H-3");
    }

    #[test]
    fn test_multimer() {
        let rule = strict("[2M+Na]+", true);
        assert_eq!(rule.m, 2);
        assert_eq!(rule.net_formula.to_string(), "Na");
    }

    #[test]
    fn test_abbreviation_expansion() {
        let rule = strict("[M+ACN+H]+", true);
        assert_eq!(rule.notation, "[M+C2H3N+H]+");
        assert_eq!(rule.net_formula.to_string(), "C2H4N");

        let rule = strict("[M+FA-H]-", false);
        assert_eq!(rule.net_formula.to_string(), "CHO2");

        let rule = strict("[M+Hac-H]-", false);
        assert_eq!(rule.net_formula.to_string(), "C2H3O2");
    }

    #[test]
    fn test_trifluoroacetate_is_shadowed() {
        let parsed = AdductRule::parse(Some("[M+TFA-H]-"), false);
        assert!(matches!(parsed.into_strict(), Err(ParseError::InvalidCharacter(_))));
    }

    #[test]
    fn test_repeat_groups() {
        let rule = strict("[M-2H2O+H]+", true);
        assert_eq!(rule.net_formula.elements.to_string(), "H-3O-2");
        assert_eq!(rule.loss_formula.unwrap().to_string(), "H4O2");

        let rule = strict("[M+3Na-2H]+", true);
        assert_eq!(rule.net_formula.elements.to_string(), "H-2Na3");
    }

    #[test]
    fn test_interleaved_markers() {
        let rule = strict("[M+H-H2O+Na-H]2+", true);
        assert_eq!(rule.charge, 2);
        assert_eq!(rule.net_formula.elements.to_string(), "H-2NaO-1");
        assert_eq!(rule.loss_formula.unwrap().to_string(), "H3O");
    }

    #[test]
    fn test_ion_mass_round_trip() {
        let rule = strict("[2M+Na]+", true);
        let mz = rule.ion_mz(180.06339);
        assert!((rule.neutral_mass(mz) - 180.06339).abs() < 1e-9);
    }

    #[test]
    fn test_charged_formula() {
        let rule = strict("[M-H]-", false);
        let neutral: ElementVector = "C6H12O6".parse().unwrap();
        let ion = rule.charged_formula(&neutral);
        assert_eq!(ion.to_string(), "C6H11O6");
        assert_eq!(ion.charge, -1);
        assert!((ion.mass - rule.ion_mz(Formula::neutral(neutral).mass)).abs() < 1e-4);
    }

    #[test]
    fn test_default_when_missing() {
        let parsed = AdductRule::parse(None, false);
        assert!(!parsed.is_fallback());
        assert_eq!(parsed.rule().notation, "[M-H]-");
    }

    #[test]
    fn test_fallbacks() {
        let cases = [
            ("not-an-adduct", true),
            ("[M+H]-", true),
            ("[M+H]+", false),
            ("[M+Xe]+", true),
            ("[M]+", true),
            ("[M++H]+", true),
            ("[M+H+]+", true),
            ("[M+0H]+", true),
            ("[M+2]+", true),
            ("[0M+H]+", true),
            ("[M+H]0+", true),
            ("[M+H]x+", true),
        ];
        for (adduct, pos_mode) in cases {
            let parsed = AdductRule::parse(Some(adduct), pos_mode);
            assert!(parsed.is_fallback(), "{adduct} should fall back");
            let rule = parsed.clone().into_lenient();
            assert_eq!(rule, AdductRule::default_for(pos_mode));
            assert!(parsed.into_strict().is_err());
        }
    }

    #[test]
    fn test_fallback_default_values() {
        let rule = AdductRule::parse(Some("not-an-adduct"), true).into_lenient();
        assert_eq!(rule.charge, 1);
        assert_eq!(rule.m, 1);
        assert_eq!(rule.net_formula.to_string(), "H");
        assert!(rule.loss_formula.is_none());

        let rule = AdductRule::parse(Some("garbage"), false).into_lenient();
        assert_eq!(rule.charge, -1);
        assert_eq!(rule.net_formula.elements.to_string(), "H-1");
        assert_eq!(rule.loss_formula.unwrap().to_string(), "H");
    }

    #[test]
    fn test_strict_error_kinds() {
        assert!(matches!(
            AdductRule::parse(Some("[M]+"), true).into_strict(),
            Err(ParseError::NoModification(_))
        ));
        assert!(matches!(
            AdductRule::parse(Some("[M+H]0+"), true).into_strict(),
            Err(ParseError::InvalidCharge(_))
        ));
        assert!(matches!(
            AdductRule::parse(Some("[0M+H]+"), true).into_strict(),
            Err(ParseError::InvalidMultiplicity(_))
        ));
    }

    #[test]
    fn test_check_adduct() {
        assert_eq!(check_adduct("[M+H]+"), Some(true));
        assert_eq!(check_adduct("[M+Cl]-"), Some(false));
        assert_eq!(check_adduct("[M+H]"), None);
        assert_eq!(check_adduct("[M+H+"), None);
    }
}
