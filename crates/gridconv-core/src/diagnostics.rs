//! Diagnostics collected while reading, repairing and writing a system.
//!
//! Readers record data-quality problems here instead of failing the run:
//!
//! - malformed multi-terminal entities that were skipped
//! - ambiguous bus coordinates that were left unset
//! - component kinds with no registered mapper
//!
//! Structural problems (missing fields, unresolved references) are not
//! diagnostics; they abort the run through [`crate::GridError`].
//!
//! # Example
//!
//! ```
//! use gridconv_core::diagnostics::Diagnostics;
//!
//! let mut diag = Diagnostics::new();
//! diag.add_warning_with_entity("topology", "fewer than 2 buses, skipping", "line_12");
//! diag.add_warning("geometry", "Node n3 has more than 1 location");
//!
//! assert_eq!(diag.warning_count(), 2);
//! assert_eq!(diag.summary(), "2 warnings");
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

/// A single non-fatal issue; every diagnostic is a warning.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    /// Category for grouping (e.g., "input", "topology", "geometry", "mapping")
    pub category: String,
    pub message: String,
    /// Component the issue is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl DiagnosticIssue {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            entity: None,
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[warning:{}] {}", self.category, self.message)?;
        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }
        Ok(())
    }
}

/// Collection of diagnostic issues for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, category: &str, message: &str) {
        self.issues.push(DiagnosticIssue::new(category, message));
    }

    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(category, message).with_entity(entity));
    }

    pub fn warning_count(&self) -> usize {
        self.issues.len()
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn summary(&self) -> String {
        match self.warning_count() {
            0 => "No issues".to_string(),
            1 => "1 warning".to_string(),
            n => format!("{} warnings", n),
        }
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Diagnostics: {}", self.summary())?;
        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}

/// Per-kind row and component counters for one read.
///
/// `rows` counts source records handed to a mapper; `parsed` counts the
/// components that came out of it. The two differ when a kind has no
/// mapper or a reader groups several rows into one component.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadStats {
    pub rows: BTreeMap<String, usize>,
    pub parsed: BTreeMap<String, usize>,
}

impl ReadStats {
    pub fn record(&mut self, kind: &str, rows: usize, parsed: usize) {
        *self.rows.entry(kind.to_string()).or_default() += rows;
        *self.parsed.entry(kind.to_string()).or_default() += parsed;
    }

    pub fn total_parsed(&self) -> usize {
        self.parsed.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_display() {
        let issue = DiagnosticIssue::new("parse", "unknown property").with_entity("Line.l1");
        assert_eq!(issue.to_string(), "[warning:parse] unknown property (Line.l1)");
    }

    #[test]
    fn test_summary_counts() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.summary(), "No issues");
        assert!(!diag.has_issues());

        diag.add_warning("topology", "skipped");
        assert_eq!(diag.summary(), "1 warning");
        diag.add_warning_with_entity("mapping", "no mapper", "DistributionSolar");
        assert_eq!(diag.summary(), "2 warnings");
        assert_eq!(
            diag.to_string(),
            "Diagnostics: 2 warnings\n  [warning:topology] skipped\n  [warning:mapping] no mapper (DistributionSolar)\n"
        );
    }

    #[test]
    fn test_read_stats_accumulate() {
        let mut stats = ReadStats::default();
        stats.record("DistributionLoad", 6, 2);
        stats.record("DistributionLoad", 1, 1);
        stats.record("DistributionBus", 3, 3);
        assert_eq!(stats.rows["DistributionLoad"], 7);
        assert_eq!(stats.total_parsed(), 6);
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let mut diag = Diagnostics::new();
        diag.add_warning("geometry", "ambiguous");
        let json = serde_json::to_string(&diag).unwrap();
        assert_eq!(json, r#"{"issues":[{"category":"geometry","message":"ambiguous"}]}"#);
    }
}
