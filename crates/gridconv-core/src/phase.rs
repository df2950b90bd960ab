//! Phase letters and phase-set canonicalization.

use serde::{Deserialize, Serialize};

/// One conductor of a distribution circuit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Phase {
    A,
    B,
    C,
    N,
}

/// Phase set assumed wherever a source gives no explicit phases.
pub const THREE_PHASE: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

impl Phase {
    /// Canonical order used for every phase string.
    pub const ORDER: [Phase; 4] = [Phase::A, Phase::B, Phase::C, Phase::N];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
            Phase::N => "N",
        }
    }

    pub fn from_char(c: char) -> Option<Phase> {
        match c.to_ascii_uppercase() {
            'A' => Some(Phase::A),
            'B' => Some(Phase::B),
            'C' => Some(Phase::C),
            'N' => Some(Phase::N),
            _ => None,
        }
    }

    /// OpenDSS node number for this phase.
    pub fn node_number(&self) -> u8 {
        match self {
            Phase::A => 1,
            Phase::B => 2,
            Phase::C => 3,
            Phase::N => 4,
        }
    }

    pub fn from_node_number(node: u32) -> Option<Phase> {
        match node {
            1 => Some(Phase::A),
            2 => Some(Phase::B),
            3 => Some(Phase::C),
            4 => Some(Phase::N),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merge phase tokens into the ordered, de-duplicated string over `A,B,C,N`.
///
/// Tokens may carry several letters and commas (`"A,B"`, `"CN"`); unknown
/// characters are dropped. Returns `None` when no phase letter was seen.
///
/// ```
/// use gridconv_core::phase::canonical_phase_string;
///
/// assert_eq!(canonical_phase_string(["C", "A", "A"]).as_deref(), Some("A,C"));
/// assert_eq!(canonical_phase_string(Vec::<&str>::new()), None);
/// ```
pub fn canonical_phase_string<I, S>(tokens: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = [false; 4];
    for token in tokens {
        for c in token.as_ref().chars() {
            if let Some(phase) = Phase::from_char(c) {
                seen[phase as usize] = true;
            }
        }
    }
    let ordered: Vec<&str> = Phase::ORDER
        .iter()
        .filter(|p| seen[**p as usize])
        .map(Phase::as_str)
        .collect();
    if ordered.is_empty() {
        None
    } else {
        Some(ordered.join(","))
    }
}

/// Energized phases named by a phase text, neutral markers removed.
///
/// Falls back to [`THREE_PHASE`] when the text is absent or names no
/// energized phase.
pub fn phases_from_text(text: Option<&str>) -> Vec<Phase> {
    let phases = text.map(explicit_phases).unwrap_or_default();
    if phases.is_empty() {
        THREE_PHASE.to_vec()
    } else {
        phases
    }
}

/// Energized phases in the text, in canonical order, without defaulting.
pub fn explicit_phases(text: &str) -> Vec<Phase> {
    let mut phases: Vec<Phase> = text
        .chars()
        .filter_map(Phase::from_char)
        .filter(|p| *p != Phase::N)
        .collect();
    phases.sort();
    phases.dedup();
    phases
}

/// Compact phase text such as `"ABC"` used by tank `orderedPhases`.
pub fn phase_letters(phases: &[Phase]) -> String {
    phases.iter().map(Phase::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_is_order_independent() {
        assert_eq!(
            canonical_phase_string(["C", "A", "A"]).as_deref(),
            Some("A,C")
        );
        assert_eq!(
            canonical_phase_string(["N", "b,a", "c"]).as_deref(),
            Some("A,B,C,N")
        );
        assert_eq!(canonical_phase_string(["x", ""]), None);
    }

    #[test]
    fn phases_from_text_strips_neutral() {
        assert_eq!(phases_from_text(Some("AN")), vec![Phase::A]);
        assert_eq!(phases_from_text(Some("C,B")), vec![Phase::B, Phase::C]);
    }

    #[test]
    fn phases_from_text_defaults_to_three_phase() {
        assert_eq!(phases_from_text(None), THREE_PHASE.to_vec());
        assert_eq!(phases_from_text(Some("N")), THREE_PHASE.to_vec());
    }

    #[test]
    fn node_numbers_round_trip() {
        for phase in Phase::ORDER {
            assert_eq!(
                Phase::from_node_number(phase.node_number() as u32),
                Some(phase)
            );
        }
        assert_eq!(Phase::from_node_number(0), None);
    }
}
