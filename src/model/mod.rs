//! The normalized in-memory model: components, risk patterns, the
//! threat/weakness/countermeasure tables and the flat relation list that
//! ties them together.
//!
//! Every entity is keyed by a stable string `ref` — the external
//! identifier shared by all three serialization formats. Entity tables are
//! insertion-ordered ([`indexmap::IndexMap`]); the mitigation balancer
//! depends on that order ("remainder to the first"), while duplicate and
//! orphan detection do not.

pub mod catalog;
pub mod taxonomy;
pub mod template;

pub use taxonomy::{TaxonomyKind, Taxonomies};
pub use template::Template;

use serde::{Deserialize, Serialize};

/// Discretized C/I/A/ease-of-exploitation scoring attached to a threat.
/// Values are string-encoded members of the {1,25,50,75,100} scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRating {
    pub c: String,
    pub i: String,
    pub a: String,
    pub ee: String,
}

impl Default for RiskRating {
    fn default() -> Self {
        Self {
            c: "100".to_string(),
            i: "100".to_string(),
            a: "100".to_string(),
            ee: "100".to_string(),
        }
    }
}

/// A named URL attached to a threat or countermeasure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub url: String,
}

/// A standard section assigned to a countermeasure, flat form. The YSC
/// format re-groups these as a map standard-ref -> sorted section list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StandardAssignment {
    #[serde(rename = "standard-ref")]
    pub standard_ref: String,
    #[serde(rename = "standard-section")]
    pub section: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(rename = "categoryRef")]
    pub category_ref: String,
    #[serde(default = "default_visible")]
    pub visible: String,
    #[serde(rename = "riskPatternRefs", default)]
    pub risk_pattern_refs: Vec<String>,
}

fn default_visible() -> String {
    "true".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskPattern {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UseCase {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Threat {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(rename = "riskRating", default)]
    pub risk_rating: RiskRating,
    #[serde(default)]
    pub taxonomies: Taxonomies,
    #[serde(default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weakness {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(default = "default_impact")]
    pub impact: String,
}

fn default_impact() -> String {
    "100".to_string()
}

impl Default for Weakness {
    fn default() -> Self {
        Self {
            ref_: String::new(),
            name: String::new(),
            desc: String::new(),
            impact: default_impact(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(default = "default_cost")]
    pub cost: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub question_desc: String,
    #[serde(default)]
    pub dataflow_tags: Vec<String>,
    #[serde(default)]
    pub taxonomies: Taxonomies,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub standards: Vec<StandardAssignment>,
}

fn default_cost() -> String {
    "2".to_string()
}

fn default_state() -> String {
    "Recommended".to_string()
}

impl Default for Control {
    fn default() -> Self {
        Self {
            ref_: String::new(),
            name: String::new(),
            desc: String::new(),
            cost: default_cost(),
            state: default_state(),
            question: String::new(),
            question_desc: String::new(),
            dataflow_tags: Vec::new(),
            taxonomies: Taxonomies::new(),
            references: Vec::new(),
            standards: Vec::new(),
        }
    }
}

/// The join entity. `weakness` and/or `control` may be empty, giving three
/// legal shapes: threat-only (both empty), orphaned control (weakness
/// empty, control set) and the full chain. `mitigation` is a
/// string-encoded integer percentage, meaningful only when `control` is
/// set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "riskPattern")]
    pub risk_pattern: String,
    pub usecase: String,
    pub threat: String,
    #[serde(default)]
    pub weakness: String,
    #[serde(default)]
    pub control: String,
    #[serde(default)]
    pub mitigation: String,
}

impl Relation {
    pub fn full(
        risk_pattern: &str,
        usecase: &str,
        threat: &str,
        weakness: &str,
        control: &str,
        mitigation: &str,
    ) -> Self {
        Self {
            risk_pattern: risk_pattern.to_string(),
            usecase: usecase.to_string(),
            threat: threat.to_string(),
            weakness: weakness.to_string(),
            control: control.to_string(),
            mitigation: mitigation.to_string(),
        }
    }

    pub fn threat_only(risk_pattern: &str, usecase: &str, threat: &str) -> Self {
        Self::full(risk_pattern, usecase, threat, "", "", "")
    }

    pub fn orphaned(risk_pattern: &str, usecase: &str, threat: &str, control: &str, mitigation: &str) -> Self {
        Self::full(risk_pattern, usecase, threat, "", control, mitigation)
    }

    pub fn has_weakness(&self) -> bool {
        !self.weakness.is_empty()
    }

    pub fn has_control(&self) -> bool {
        !self.control.is_empty()
    }

    /// An orphaned control sits directly under its threat.
    pub fn is_orphaned_control(&self) -> bool {
        self.weakness.is_empty() && !self.control.is_empty()
    }

    /// Key identifying the threat this relation belongs to.
    pub fn threat_key(&self) -> (String, String, String) {
        (
            self.risk_pattern.clone(),
            self.usecase.clone(),
            self.threat.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_shapes() {
        let threat_only = Relation::threat_only("RP", "General", "T-1");
        assert!(!threat_only.has_weakness());
        assert!(!threat_only.has_control());
        assert!(!threat_only.is_orphaned_control());

        let orphan = Relation::orphaned("RP", "General", "T-1", "C-1", "100");
        assert!(orphan.is_orphaned_control());

        let full = Relation::full("RP", "General", "T-1", "CWE-89", "C-1", "100");
        assert!(full.has_weakness());
        assert!(full.has_control());
        assert!(!full.is_orphaned_control());
    }

    #[test]
    fn test_relation_serde_uses_external_field_names() {
        let rel = Relation::full("RP", "General", "T-1", "CWE-89", "C-1", "50");
        let json = serde_json::to_value(&rel).expect("serialize");
        assert_eq!(json["riskPattern"], "RP");
        assert_eq!(json["usecase"], "General");
        assert_eq!(json["mitigation"], "50");
    }

    #[test]
    fn test_entity_serde_ref_key() {
        let threat = Threat {
            ref_: "T-EXAMPLE".to_string(),
            name: "Example".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&threat).expect("serialize");
        assert_eq!(json["ref"], "T-EXAMPLE");
        assert_eq!(json["riskRating"]["c"], "100");
    }

    #[test]
    fn test_control_defaults() {
        let control = Control::default();
        assert_eq!(control.cost, "2");
        assert_eq!(control.state, "Recommended");
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let json = r#"{"riskPattern":"RP","usecase":"General","threat":"T-1"}"#;
        let rel: Relation = serde_json::from_str(json).expect("deserialize");
        assert_eq!(rel.weakness, "");
        assert_eq!(rel.control, "");
        assert_eq!(rel.mitigation, "");
    }
}
