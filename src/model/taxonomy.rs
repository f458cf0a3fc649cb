//! Taxonomy axes attached to threats and countermeasures.
//!
//! The external XML format packs several axes into one `customField`
//! element (`SF-T-MITRE` carries four technique buckets at once) and
//! pipe-joins multi-valued entries. Inside the model every axis is a plain
//! ordered list keyed by [`TaxonomyKind`]; the grouping and the pipe
//! encoding live entirely at the codec boundary, driven by the static
//! tables below. Adding an axis is a table edit, not a new branch in three
//! codecs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyKind {
    Stride,
    AttackEnterpriseTechnique,
    AttackIcsTechnique,
    AttackMobileTechnique,
    AtlasTechnique,
    AttackEnterpriseMitigation,
    AttackIcsMitigation,
    AttackMobileMitigation,
    AtlasMitigation,
    Scope,
    BaselineStandardRef,
    BaselineStandardSection,
}

impl TaxonomyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomyKind::Stride => "stride",
            TaxonomyKind::AttackEnterpriseTechnique => "attack_enterprise_technique",
            TaxonomyKind::AttackIcsTechnique => "attack_ics_technique",
            TaxonomyKind::AttackMobileTechnique => "attack_mobile_technique",
            TaxonomyKind::AtlasTechnique => "atlas_technique",
            TaxonomyKind::AttackEnterpriseMitigation => "attack_enterprise_mitigation",
            TaxonomyKind::AttackIcsMitigation => "attack_ics_mitigation",
            TaxonomyKind::AttackMobileMitigation => "attack_mobile_mitigation",
            TaxonomyKind::AtlasMitigation => "atlas_mitigation",
            TaxonomyKind::Scope => "scope",
            TaxonomyKind::BaselineStandardRef => "baseline_standard_ref",
            TaxonomyKind::BaselineStandardSection => "baseline_standard_section",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "stride" | "stride_lm" => TaxonomyKind::Stride,
            "attack_enterprise_technique" => TaxonomyKind::AttackEnterpriseTechnique,
            "attack_ics_technique" => TaxonomyKind::AttackIcsTechnique,
            "attack_mobile_technique" => TaxonomyKind::AttackMobileTechnique,
            "atlas_technique" => TaxonomyKind::AtlasTechnique,
            "attack_enterprise_mitigation" => TaxonomyKind::AttackEnterpriseMitigation,
            "attack_ics_mitigation" => TaxonomyKind::AttackIcsMitigation,
            "attack_mobile_mitigation" => TaxonomyKind::AttackMobileMitigation,
            "atlas_mitigation" => TaxonomyKind::AtlasMitigation,
            "scope" => TaxonomyKind::Scope,
            "baseline_standard_ref" => TaxonomyKind::BaselineStandardRef,
            "baseline_standard_section" => TaxonomyKind::BaselineStandardSection,
            _ => return None,
        })
    }
}

/// Axes that may appear on a threat, in serialization order.
pub const THREAT_KINDS: [TaxonomyKind; 5] = [
    TaxonomyKind::Stride,
    TaxonomyKind::AttackEnterpriseTechnique,
    TaxonomyKind::AttackIcsTechnique,
    TaxonomyKind::AttackMobileTechnique,
    TaxonomyKind::AtlasTechnique,
];

/// Axes that may appear on a countermeasure, in serialization order.
pub const CONTROL_KINDS: [TaxonomyKind; 7] = [
    TaxonomyKind::Scope,
    TaxonomyKind::AttackEnterpriseMitigation,
    TaxonomyKind::AttackIcsMitigation,
    TaxonomyKind::AttackMobileMitigation,
    TaxonomyKind::AtlasMitigation,
    TaxonomyKind::BaselineStandardRef,
    TaxonomyKind::BaselineStandardSection,
];

/// How the XML format groups axes into `customField` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomFieldGroup {
    ThreatMitre,
    ThreatStride,
    ControlMitre,
    ControlScope,
    ControlStandardBaseline,
    ControlStandardSection,
}

impl CustomFieldGroup {
    pub fn xml_ref(&self) -> &'static str {
        match self {
            CustomFieldGroup::ThreatMitre => "SF-T-MITRE",
            CustomFieldGroup::ThreatStride => "SF-T-STRIDE-LM",
            CustomFieldGroup::ControlMitre => "SF-C-MITRE",
            CustomFieldGroup::ControlScope => "SF-C-SCOPE",
            CustomFieldGroup::ControlStandardBaseline => "SF-C-STANDARD-BASELINE",
            CustomFieldGroup::ControlStandardSection => "SF-C-STANDARD-SECTION",
        }
    }

    pub fn from_xml_ref(s: &str) -> Option<Self> {
        Some(match s {
            "SF-T-MITRE" => CustomFieldGroup::ThreatMitre,
            "SF-T-STRIDE-LM" => CustomFieldGroup::ThreatStride,
            "SF-C-MITRE" => CustomFieldGroup::ControlMitre,
            "SF-C-SCOPE" => CustomFieldGroup::ControlScope,
            "SF-C-STANDARD-BASELINE" => CustomFieldGroup::ControlStandardBaseline,
            "SF-C-STANDARD-SECTION" => CustomFieldGroup::ControlStandardSection,
            _ => return None,
        })
    }

    /// The axes merged into this custom field, in the order they are joined
    /// on export.
    pub fn kinds(&self) -> &'static [TaxonomyKind] {
        match self {
            CustomFieldGroup::ThreatMitre => &[
                TaxonomyKind::AttackEnterpriseTechnique,
                TaxonomyKind::AttackIcsTechnique,
                TaxonomyKind::AttackMobileTechnique,
                TaxonomyKind::AtlasTechnique,
            ],
            CustomFieldGroup::ThreatStride => &[TaxonomyKind::Stride],
            CustomFieldGroup::ControlMitre => &[
                TaxonomyKind::AttackEnterpriseMitigation,
                TaxonomyKind::AttackIcsMitigation,
                TaxonomyKind::AttackMobileMitigation,
                TaxonomyKind::AtlasMitigation,
            ],
            CustomFieldGroup::ControlScope => &[TaxonomyKind::Scope],
            CustomFieldGroup::ControlStandardBaseline => &[TaxonomyKind::BaselineStandardRef],
            CustomFieldGroup::ControlStandardSection => &[TaxonomyKind::BaselineStandardSection],
        }
    }

    pub const THREAT_GROUPS: [CustomFieldGroup; 2] =
        [CustomFieldGroup::ThreatMitre, CustomFieldGroup::ThreatStride];

    pub const CONTROL_GROUPS: [CustomFieldGroup; 4] = [
        CustomFieldGroup::ControlMitre,
        CustomFieldGroup::ControlScope,
        CustomFieldGroup::ControlStandardBaseline,
        CustomFieldGroup::ControlStandardSection,
    ];
}

/// Classify a MITRE value into its threat-side technique bucket. The
/// labels come from the upstream value lists, e.g. "T0800 - ATT&CK ICS".
pub fn technique_kind_for(value: &str) -> Option<TaxonomyKind> {
    if value.contains("ATT&CK ICS") {
        Some(TaxonomyKind::AttackIcsTechnique)
    } else if value.contains("ATT&CK Enterprise") {
        Some(TaxonomyKind::AttackEnterpriseTechnique)
    } else if value.contains("ATT&CK Mobile") {
        Some(TaxonomyKind::AttackMobileTechnique)
    } else if value.contains("ATLAS") {
        Some(TaxonomyKind::AtlasTechnique)
    } else {
        None
    }
}

/// Classify a MITRE value into its control-side mitigation bucket.
pub fn mitigation_kind_for(value: &str) -> Option<TaxonomyKind> {
    if value.contains("ATT&CK ICS") {
        Some(TaxonomyKind::AttackIcsMitigation)
    } else if value.contains("ATT&CK Enterprise") {
        Some(TaxonomyKind::AttackEnterpriseMitigation)
    } else if value.contains("ATT&CK Mobile") {
        Some(TaxonomyKind::AttackMobileMitigation)
    } else if value.contains("ATLAS") {
        Some(TaxonomyKind::AtlasMitigation)
    } else {
        None
    }
}

/// Ordered multi-valued taxonomy assignment for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Taxonomies(pub IndexMap<TaxonomyKind, Vec<String>>);

impl Taxonomies {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, kind: TaxonomyKind) -> &[String] {
        self.0.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Replace the whole list for one axis. Empty lists are not stored.
    pub fn set(&mut self, kind: TaxonomyKind, values: Vec<String>) {
        let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
        if values.is_empty() {
            self.0.shift_remove(&kind);
        } else {
            self.0.insert(kind, values);
        }
    }

    /// Append a value if not already present (case-insensitive).
    pub fn add(&mut self, kind: TaxonomyKind, value: &str) {
        if value.is_empty() {
            return;
        }
        let list = self.0.entry(kind).or_default();
        if !list.iter().any(|v| v.eq_ignore_ascii_case(value)) {
            list.push(value.to_string());
        }
    }

    /// Sorted copy of one axis, used by the deterministic exports.
    pub fn sorted(&self, kind: TaxonomyKind) -> Vec<String> {
        let mut values = self.get(kind).to_vec();
        values.sort();
        values
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.is_empty())
    }
}
