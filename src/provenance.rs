//! Provenance tags: how a relationship came to exist.
//!
//! Every relationship written to the graph carries one of these, so inferred
//! relationships can be told apart from (and cleared independently of)
//! relationships stated in the source file.

use serde::{Deserialize, Serialize};

/// How a relationship was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Stated directly in the source file.
    Declared,
    /// Inferred from geometry by the topological analysis.
    Inferred,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Declared => "declared",
            Provenance::Inferred => "inferred",
        }
    }

    /// Value of the `relationship_source` property written alongside.
    pub fn source_tag(self) -> &'static str {
        match self {
            Provenance::Declared => "ifc_declared",
            Provenance::Inferred => "topological_analysis",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Provenance::Inferred).unwrap();
        assert_eq!(json, "\"inferred\"");
        assert_eq!(Provenance::Declared.to_string(), "declared");
    }
}
