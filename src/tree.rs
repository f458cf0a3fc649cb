//! Relation-tree reconciliation: turn the flat relation list into the
//! nested ownership hierarchy the codecs and reports walk, and back.
//!
//! Grouping is idempotent: the first relation observed for a key creates
//! the node, later relations with the same key merge into it. The maps
//! preserve insertion order, so rebuilding from the same list yields an
//! identical tree.

use crate::model::Relation;
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlItem {
    pub ref_: String,
    pub mitigation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeaknessItem {
    pub ref_: String,
    pub controls: IndexMap<String, ControlItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreatItem {
    pub ref_: String,
    pub weaknesses: IndexMap<String, WeaknessItem>,
    /// Controls hanging directly off the threat with no intervening
    /// weakness.
    pub orphaned_controls: IndexMap<String, ControlItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UseCaseItem {
    pub ref_: String,
    pub threats: IndexMap<String, ThreatItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RiskPatternItem {
    pub ref_: String,
    pub usecases: IndexMap<String, UseCaseItem>,
}

pub type RelationTree = IndexMap<String, RiskPatternItem>;

/// Group a flat relation list into the four-level ownership hierarchy
/// RiskPattern -> UseCase -> Threat -> { Weakness -> Control }, with a
/// parallel orphaned-controls bucket per threat.
///
/// Relations that cannot be represented are skipped: risk pattern and use
/// case are always required, and a control without a threat has no place
/// to hang.
pub fn build_tree(relations: &[Relation]) -> RelationTree {
    let mut tree: RelationTree = IndexMap::new();

    for r in relations {
        if r.risk_pattern.is_empty() || r.usecase.is_empty() {
            continue;
        }

        let rp = tree
            .entry(r.risk_pattern.clone())
            .or_insert_with(|| RiskPatternItem {
                ref_: r.risk_pattern.clone(),
                usecases: IndexMap::new(),
            });
        let uc = rp
            .usecases
            .entry(r.usecase.clone())
            .or_insert_with(|| UseCaseItem {
                ref_: r.usecase.clone(),
                threats: IndexMap::new(),
            });

        if r.threat.is_empty() {
            // A control with no threat cannot hang anywhere; the risk
            // pattern and use case nodes were still created above.
            continue;
        }

        let threat = uc
            .threats
            .entry(r.threat.clone())
            .or_insert_with(|| ThreatItem {
                ref_: r.threat.clone(),
                weaknesses: IndexMap::new(),
                orphaned_controls: IndexMap::new(),
            });

        match (r.has_weakness(), r.has_control()) {
            (true, true) => {
                let weakness = threat
                    .weaknesses
                    .entry(r.weakness.clone())
                    .or_insert_with(|| WeaknessItem {
                        ref_: r.weakness.clone(),
                        controls: IndexMap::new(),
                    });
                weakness
                    .controls
                    .entry(r.control.clone())
                    .or_insert_with(|| ControlItem {
                        ref_: r.control.clone(),
                        mitigation: r.mitigation.clone(),
                    });
            }
            (false, true) => {
                threat
                    .orphaned_controls
                    .entry(r.control.clone())
                    .or_insert_with(|| ControlItem {
                        ref_: r.control.clone(),
                        mitigation: r.mitigation.clone(),
                    });
            }
            (true, false) => {
                threat
                    .weaknesses
                    .entry(r.weakness.clone())
                    .or_insert_with(|| WeaknessItem {
                        ref_: r.weakness.clone(),
                        controls: IndexMap::new(),
                    });
            }
            // Threat-only relation: the threat node itself is the record.
            (false, false) => {}
        }
    }

    tree
}

/// The inverse of [`build_tree`]: flatten the hierarchy back into a
/// relation list. For deduplicated input covering the three legal shapes,
/// `flatten(build_tree(r))` equals `r` as a multiset.
pub fn flatten(tree: &RelationTree) -> Vec<Relation> {
    let mut relations = Vec::new();

    for rp in tree.values() {
        for uc in rp.usecases.values() {
            for threat in uc.threats.values() {
                if threat.weaknesses.is_empty() && threat.orphaned_controls.is_empty() {
                    relations.push(Relation::threat_only(&rp.ref_, &uc.ref_, &threat.ref_));
                    continue;
                }
                for weakness in threat.weaknesses.values() {
                    if weakness.controls.is_empty() {
                        relations.push(Relation::full(
                            &rp.ref_,
                            &uc.ref_,
                            &threat.ref_,
                            &weakness.ref_,
                            "",
                            "",
                        ));
                        continue;
                    }
                    for control in weakness.controls.values() {
                        relations.push(Relation::full(
                            &rp.ref_,
                            &uc.ref_,
                            &threat.ref_,
                            &weakness.ref_,
                            &control.ref_,
                            &control.mitigation,
                        ));
                    }
                }
                for control in threat.orphaned_controls.values() {
                    relations.push(Relation::orphaned(
                        &rp.ref_,
                        &uc.ref_,
                        &threat.ref_,
                        &control.ref_,
                        &control.mitigation,
                    ));
                }
            }
        }
    }

    relations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn as_multiset(relations: &[Relation]) -> HashMap<Relation, usize> {
        let mut counts = HashMap::new();
        for r in relations {
            *counts.entry(r.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_build_tree_groups_by_every_level() {
        let relations = vec![
            Relation::full("RP", "UC-A", "T-1", "CWE-1", "C-1", "50"),
            Relation::full("RP", "UC-A", "T-1", "CWE-1", "C-2", "50"),
            Relation::full("RP", "UC-A", "T-2", "CWE-2", "C-3", "100"),
            Relation::full("RP", "UC-B", "T-3", "CWE-1", "C-1", "100"),
        ];
        let tree = build_tree(&relations);
        assert_eq!(tree.len(), 1);
        let rp = &tree["RP"];
        assert_eq!(rp.usecases.len(), 2);
        let t1 = &rp.usecases["UC-A"].threats["T-1"];
        assert_eq!(t1.weaknesses["CWE-1"].controls.len(), 2);
        assert_eq!(rp.usecases["UC-B"].threats["T-3"].weaknesses["CWE-1"].controls.len(), 1);
    }

    #[test]
    fn test_threat_only_relation_creates_bare_threat() {
        let relations = vec![Relation::threat_only("RP", "General", "T-1")];
        let tree = build_tree(&relations);
        let threat = &tree["RP"].usecases["General"].threats["T-1"];
        assert!(threat.weaknesses.is_empty());
        assert!(threat.orphaned_controls.is_empty());
    }

    #[test]
    fn test_orphaned_control_goes_to_parallel_bucket() {
        let relations = vec![Relation::orphaned("RP", "General", "T-1", "C-1", "100")];
        let tree = build_tree(&relations);
        let threat = &tree["RP"].usecases["General"].threats["T-1"];
        assert!(threat.weaknesses.is_empty());
        assert_eq!(threat.orphaned_controls["C-1"].mitigation, "100");
    }

    #[test]
    fn test_weakness_without_control() {
        let relations = vec![Relation::full("RP", "General", "T-1", "CWE-89", "", "")];
        let tree = build_tree(&relations);
        let threat = &tree["RP"].usecases["General"].threats["T-1"];
        assert!(threat.weaknesses["CWE-89"].controls.is_empty());
    }

    #[test]
    fn test_shared_control_under_two_weaknesses_is_preserved() {
        let relations = vec![
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", "50"),
            Relation::full("RP", "General", "T-1", "CWE-2", "C-1", "50"),
        ];
        let tree = build_tree(&relations);
        let threat = &tree["RP"].usecases["General"].threats["T-1"];
        assert!(threat.weaknesses["CWE-1"].controls.contains_key("C-1"));
        assert!(threat.weaknesses["CWE-2"].controls.contains_key("C-1"));
    }

    #[test]
    fn test_invalid_relations_are_skipped() {
        let relations = vec![
            Relation::full("", "General", "T-1", "", "C-1", "100"),
            Relation::full("RP", "", "T-1", "", "C-1", "100"),
            // Control with no threat has nowhere to hang
            Relation::full("RP", "General", "", "", "C-1", "100"),
        ];
        let tree = build_tree(&relations);
        assert_eq!(tree.len(), 1);
        assert!(tree["RP"].usecases["General"].threats.is_empty());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let relations = vec![
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", "34"),
            Relation::full("RP", "General", "T-1", "CWE-1", "C-2", "33"),
            Relation::orphaned("RP", "General", "T-1", "C-3", "33"),
        ];
        let first = build_tree(&relations);
        let second = build_tree(&flatten(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn test_flatten_is_inverse_for_all_three_shapes() {
        let relations = vec![
            Relation::threat_only("RP", "General", "T-0"),
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", "34"),
            Relation::full("RP", "General", "T-1", "CWE-1", "C-2", "33"),
            Relation::orphaned("RP", "General", "T-1", "C-3", "33"),
            Relation::full("RP", "UC-STRIDE-SPOOFING", "T-2", "CWE-2", "", ""),
        ];
        let flattened = flatten(&build_tree(&relations));
        assert_eq!(as_multiset(&flattened), as_multiset(&relations));
    }

    #[test]
    fn test_duplicate_relations_merge() {
        let relations = vec![
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", "100"),
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", "100"),
        ];
        let tree = build_tree(&relations);
        assert_eq!(flatten(&tree).len(), 1, "grouping deduplicates literal duplicates");
    }

    #[test]
    fn test_first_mitigation_wins_on_merge() {
        let relations = vec![
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", "60"),
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", "40"),
        ];
        let tree = build_tree(&relations);
        let threat = &tree["RP"].usecases["General"].threats["T-1"];
        assert_eq!(threat.weaknesses["CWE-1"].controls["C-1"].mitigation, "60");
    }
}
