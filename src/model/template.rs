//! The authoring document: one component, one risk pattern, the ordered
//! entity tables and the flat relation list. This is what the template
//! store persists between commands and what every codec reads or rebuilds.

use crate::model::{Component, Control, Relation, RiskPattern, Threat, UseCase, Weakness};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Template {
    pub component: Component,
    #[serde(rename = "riskPattern")]
    pub risk_pattern: RiskPattern,
    #[serde(default)]
    pub usecases: IndexMap<String, UseCase>,
    #[serde(default)]
    pub threats: IndexMap<String, Threat>,
    #[serde(default)]
    pub weaknesses: IndexMap<String, Weakness>,
    #[serde(default)]
    pub controls: IndexMap<String, Control>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a use case unless one with the same ref is already present.
    /// First writer wins, matching the import policy of all codecs.
    pub fn add_usecase(&mut self, usecase: UseCase) {
        self.usecases.entry(usecase.ref_.clone()).or_insert(usecase);
    }

    pub fn add_threat(&mut self, threat: Threat) {
        self.threats.entry(threat.ref_.clone()).or_insert(threat);
    }

    pub fn add_weakness(&mut self, weakness: Weakness) {
        self.weaknesses.entry(weakness.ref_.clone()).or_insert(weakness);
    }

    pub fn add_control(&mut self, control: Control) {
        self.controls.entry(control.ref_.clone()).or_insert(control);
    }

    pub fn add_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
    }

    pub fn relations_for_threat(&self, threat_ref: &str) -> Vec<&Relation> {
        self.relations.iter().filter(|r| r.threat == threat_ref).collect()
    }

    /// Remove a threat together with every relation that mentions it.
    pub fn remove_threat(&mut self, threat_ref: &str) -> bool {
        let existed = self.threats.shift_remove(threat_ref).is_some();
        if existed {
            self.relations.retain(|r| r.threat != threat_ref);
        }
        existed
    }

    /// Remove a control. Relations pointing at it stay but lose the
    /// control side: a full-chain relation degrades to weakness-only, an
    /// orphaned-control relation degrades to threat-only.
    pub fn remove_control(&mut self, control_ref: &str) -> bool {
        let existed = self.controls.shift_remove(control_ref).is_some();
        if existed {
            for rel in self.relations.iter_mut().filter(|r| r.control == control_ref) {
                rel.control.clear();
                rel.mitigation.clear();
            }
        }
        existed
    }

    /// The "clean unused elements" sweep: drop weaknesses no relation
    /// references any more. Returns the removed refs.
    pub fn clean_unused_weaknesses(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        let used: Vec<String> = self
            .relations
            .iter()
            .filter(|r| r.has_weakness())
            .map(|r| r.weakness.clone())
            .collect();
        self.weaknesses.retain(|ref_, _| {
            if used.iter().any(|u| u == ref_) {
                true
            } else {
                removed.push(ref_.clone());
                false
            }
        });
        removed
    }

    /// Wipe the threat model part (threats, weaknesses, controls,
    /// relations) keeping the component and risk pattern. Used before
    /// regenerating a model.
    pub fn clear_threat_model(&mut self) {
        self.threats.clear();
        self.weaknesses.clear();
        self.controls.clear();
        self.relations.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.component.ref_.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::catalog::general_use_case;

    fn sample_template() -> Template {
        let mut t = Template::new();
        t.component.ref_ = "CD-V2-SAMPLE".to_string();
        t.component.name = "Sample".to_string();
        t.risk_pattern.ref_ = "RP-V2-SAMPLE".to_string();
        t.add_usecase(general_use_case());
        t.add_threat(Threat {
            ref_: "T-1".to_string(),
            name: "Threat one".to_string(),
            ..Default::default()
        });
        t.add_weakness(Weakness {
            ref_: "CWE-89".to_string(),
            name: "CWE-89".to_string(),
            ..Default::default()
        });
        t.add_control(Control {
            ref_: "C-1".to_string(),
            name: "Control one".to_string(),
            ..Default::default()
        });
        t.add_relation(Relation::full("RP-V2-SAMPLE", "General", "T-1", "CWE-89", "C-1", "100"));
        t
    }

    #[test]
    fn test_first_writer_wins() {
        let mut t = sample_template();
        t.add_threat(Threat {
            ref_: "T-1".to_string(),
            name: "Renamed".to_string(),
            ..Default::default()
        });
        assert_eq!(t.threats["T-1"].name, "Threat one");
    }

    #[test]
    fn test_remove_threat_cascades_relations() {
        let mut t = sample_template();
        assert!(t.remove_threat("T-1"));
        assert!(t.relations.is_empty());
        assert!(!t.remove_threat("T-1"));
    }

    #[test]
    fn test_remove_control_degrades_relations() {
        let mut t = sample_template();
        assert!(t.remove_control("C-1"));
        assert_eq!(t.relations.len(), 1);
        assert_eq!(t.relations[0].control, "");
        assert_eq!(t.relations[0].mitigation, "");
        assert_eq!(t.relations[0].weakness, "CWE-89");
    }

    #[test]
    fn test_clean_unused_weaknesses() {
        let mut t = sample_template();
        t.add_weakness(Weakness {
            ref_: "CWE-79".to_string(),
            name: "CWE-79".to_string(),
            ..Default::default()
        });
        let removed = t.clean_unused_weaknesses();
        assert_eq!(removed, vec!["CWE-79".to_string()]);
        assert!(t.weaknesses.contains_key("CWE-89"));
    }

    #[test]
    fn test_clean_keeps_all_referenced() {
        let mut t = sample_template();
        assert!(t.clean_unused_weaknesses().is_empty());
        assert_eq!(t.weaknesses.len(), 1);
    }

    #[test]
    fn test_template_json_layout() {
        let t = sample_template();
        let json = serde_json::to_value(&t).expect("serialize");
        // Scratch-file layout: entity tables keyed by the entity's own ref
        assert!(json["riskPattern"].is_object());
        assert!(json["threats"]["T-1"].is_object());
        assert!(json["controls"]["C-1"].is_object());
        assert!(json["relations"].is_array());

        let back: Template = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, t);
    }

    #[test]
    fn test_relations_for_threat() {
        let mut t = sample_template();
        t.add_relation(Relation::orphaned("RP-V2-SAMPLE", "General", "T-1", "C-2", ""));
        t.add_relation(Relation::threat_only("RP-V2-SAMPLE", "General", "T-2"));
        assert_eq!(t.relations_for_threat("T-1").len(), 2);
        assert_eq!(t.relations_for_threat("T-2").len(), 1);
    }
}
