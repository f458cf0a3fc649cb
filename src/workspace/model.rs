//! The multi-library workspace aggregate: a project holds versions, a
//! version holds libraries plus the version-scoped shared element tables.
//!
//! Unlike the authoring template, workspace entities carry a `uuid` — the
//! internal identity used to share threats, weaknesses and controls
//! across libraries of one version. Relations here link uuids, not refs.

use crate::model::RiskRating;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub versions: IndexMap<String, Version>,
}

impl Project {
    pub fn new(ref_: &str, name: &str, desc: &str) -> Self {
        Self {
            ref_: ref_.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            versions: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
    #[serde(default)]
    pub libraries: IndexMap<String, Library>,
    #[serde(default)]
    pub usecases: IndexMap<String, WsUseCase>,
    #[serde(default)]
    pub threats: IndexMap<String, WsThreat>,
    #[serde(default)]
    pub weaknesses: IndexMap<String, WsWeakness>,
    #[serde(default)]
    pub controls: IndexMap<String, WsControl>,
    #[serde(default)]
    pub categories: IndexMap<String, WsCategory>,
    #[serde(default)]
    pub references: IndexMap<String, WsReference>,
    #[serde(default)]
    pub supported_standards: IndexMap<String, WsSupportedStandard>,
    #[serde(default)]
    pub standards: IndexMap<String, WsStandard>,
}

impl Version {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Default::default()
        }
    }

    pub fn get_library(&self, library_ref: &str) -> Option<&Library> {
        self.libraries.get(library_ref)
    }

    pub fn get_library_mut(&mut self, library_ref: &str) -> Option<&mut Library> {
        self.libraries.get_mut(library_ref)
    }
}

/// One distributable library: its own risk patterns, component
/// definitions, relations and rules. Threats/weaknesses/controls live at
/// version scope and are linked by uuid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Library {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default = "default_enabled")]
    pub enabled: String,
    #[serde(default)]
    pub risk_patterns: IndexMap<String, WsRiskPattern>,
    #[serde(default)]
    pub component_definitions: IndexMap<String, WsComponentDefinition>,
    #[serde(default)]
    pub relations: IndexMap<String, WsRelation>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_revision() -> String {
    "1".to_string()
}

fn default_enabled() -> String {
    "true".to_string()
}

impl Library {
    pub fn new(ref_: &str) -> Self {
        Self {
            ref_: ref_.to_string(),
            name: ref_.to_string(),
            filename: format!("{ref_}.xml"),
            revision: default_revision(),
            enabled: default_enabled(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WsCategory {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WsComponentDefinition {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    pub category_ref: String,
    pub visible: String,
    #[serde(default)]
    pub risk_pattern_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WsRiskPattern {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WsUseCase {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WsThreat {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub risk_rating: RiskRating,
    #[serde(default)]
    pub mitre: Vec<String>,
    #[serde(default)]
    pub stride: Vec<String>,
    /// Uuids into the version's reference table.
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WsWeakness {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(default = "default_impact")]
    pub impact: String,
    #[serde(default)]
    pub test_steps: String,
    #[serde(default)]
    pub test_references: Vec<String>,
}

fn default_impact() -> String {
    "100".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsControl {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub desc: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub cost: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub test_steps: String,
    #[serde(default)]
    pub test_references: Vec<String>,
    /// Uuids into the version's standard table.
    #[serde(default)]
    pub standards: Vec<String>,
    #[serde(default)]
    pub implementations: Vec<String>,
    #[serde(default)]
    pub base_standard: Vec<String>,
    #[serde(default)]
    pub base_standard_section: Vec<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub mitre: Vec<String>,
}

fn default_state() -> String {
    "Recommended".to_string()
}

impl Default for WsControl {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            ref_: String::new(),
            name: String::new(),
            desc: String::new(),
            state: default_state(),
            cost: "0".to_string(),
            references: Vec::new(),
            test_steps: String::new(),
            test_references: Vec::new(),
            standards: Vec::new(),
            implementations: Vec::new(),
            base_standard: Vec::new(),
            base_standard_section: Vec::new(),
            scope: Vec::new(),
            mitre: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WsReference {
    pub uuid: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WsSupportedStandard {
    pub uuid: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WsStandard {
    pub uuid: String,
    pub supported_standard_ref: String,
    pub standard_ref: String,
}

/// Relation between uuids. The shape rules are the same as for the
/// ref-keyed authoring relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WsRelation {
    pub uuid: String,
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

impl WsRelation {
    pub fn new(
        risk_pattern: &str,
        usecase: &str,
        threat: &str,
        weakness: &str,
        control: &str,
        mitigation: &str,
    ) -> Self {
        Self {
            uuid: new_uuid(),
            risk_pattern: risk_pattern.to_string(),
            usecase: usecase.to_string(),
            threat: threat.to_string(),
            weakness: weakness.to_string(),
            control: control.to_string(),
            mitigation: mitigation.to_string(),
        }
    }

    /// View as a ref-shaped core relation so the tree builder and the
    /// balancer can be reused unchanged.
    pub fn as_core(&self) -> crate::model::Relation {
        crate::model::Relation {
            risk_pattern: self.risk_pattern.clone(),
            usecase: self.usecase.clone(),
            threat: self.threat.clone(),
            weakness: self.weakness.clone(),
            control: self.control.clone(),
            mitigation: self.mitigation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub module: String,
    pub generated_by_gui: String,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleCondition {
    pub name: String,
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleAction {
    pub name: String,
    pub value: String,
    pub project: String,
}
