//! Mitigation balancing: redistribute each threat's mitigation
//! percentages so they sum to exactly the goal (100), with a
//! deterministic remainder assignment.
//!
//! The division is `goal / n` per unique control with the whole remainder
//! added to the first control in iteration order. This makes the balancer
//! order-sensitive by design; everything else in this module is not.

use crate::model::catalog::is_unmitigated_exception;
use crate::model::{Relation, Template};
use tracing::debug;

pub const BALANCE_GOAL: u32 = 100;

/// Balance the relations of a single threat in place. Only relations with
/// a non-empty control participate; `n` is the number of unique control
/// refs, but every physical row sharing a control ref receives that
/// control's value. Balancing an already-balanced set is a no-op, as is a
/// threat with no controls.
pub fn balance_threat(relations: &mut [Relation], goal: u32) {
    // Unique controls in first-seen order; the first one takes the
    // remainder.
    let mut unique_controls: Vec<String> = Vec::new();
    for rel in relations.iter() {
        if rel.has_control() && !unique_controls.contains(&rel.control) {
            unique_controls.push(rel.control.clone());
        }
    }

    let n = unique_controls.len() as u32;
    if n == 0 {
        return;
    }

    // Sum over unique controls only; duplicated rows count once.
    let mut seen: Vec<&str> = Vec::new();
    let mut sum: u32 = 0;
    for rel in relations.iter() {
        if rel.has_control() && !seen.contains(&rel.control.as_str()) {
            seen.push(&rel.control);
            sum += rel.mitigation.parse::<u32>().unwrap_or(0);
        }
    }
    if sum == goal {
        return;
    }

    let mean = goal / n;
    let remainder = goal % n;
    debug!(n, mean, remainder, "rebalancing threat");

    for rel in relations.iter_mut() {
        if !rel.has_control() {
            continue;
        }
        let position = unique_controls
            .iter()
            .position(|c| *c == rel.control)
            .unwrap_or(0);
        let value = if position == 0 { mean + remainder } else { mean };
        rel.mitigation = value.to_string();
    }
}

/// Balance every threat of the template, grouping relations by
/// (risk pattern, use case, threat) and skipping the fixed exception
/// pairs.
pub fn balance_template(template: &mut Template) {
    let keys: Vec<(String, String, String)> = {
        let mut keys = Vec::new();
        for rel in &template.relations {
            let key = rel.threat_key();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    };

    for (rp, uc, threat) in keys {
        if is_unmitigated_exception(&rp, &threat) {
            debug!(%rp, %threat, "skipping unmitigated exception");
            continue;
        }
        let indices: Vec<usize> = template
            .relations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.risk_pattern == rp && r.usecase == uc && r.threat == threat)
            .map(|(i, _)| i)
            .collect();

        let mut group: Vec<Relation> = indices
            .iter()
            .map(|&i| template.relations[i].clone())
            .collect();
        balance_threat(&mut group, BALANCE_GOAL);
        for (slot, rel) in indices.into_iter().zip(group) {
            template.relations[slot] = rel;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Relation;

    fn rel(control: &str, mitigation: &str) -> Relation {
        Relation::full("RP", "General", "T-1", "CWE-1", control, mitigation)
    }

    #[test]
    fn test_two_controls_split_evenly() {
        let mut rels = vec![rel("C-1", ""), rel("C-2", "")];
        balance_threat(&mut rels, 100);
        assert_eq!(rels[0].mitigation, "50");
        assert_eq!(rels[1].mitigation, "50");
    }

    #[test]
    fn test_three_controls_remainder_goes_to_first() {
        let mut rels = vec![rel("C-1", ""), rel("C-2", ""), rel("C-3", "")];
        balance_threat(&mut rels, 100);
        assert_eq!(rels[0].mitigation, "34");
        assert_eq!(rels[1].mitigation, "33");
        assert_eq!(rels[2].mitigation, "33");
    }

    #[test]
    fn test_whole_remainder_on_first_not_spread() {
        let mut rels = vec![
            rel("C-1", ""),
            rel("C-2", ""),
            rel("C-3", ""),
            rel("C-4", ""),
            rel("C-5", ""),
            rel("C-6", ""),
        ];
        balance_threat(&mut rels, 100);
        // 100 / 6 = 16 remainder 4: the whole remainder lands on the
        // first control, never one unit at a time across the first four.
        assert_eq!(rels[0].mitigation, "20");
        for r in &rels[1..] {
            assert_eq!(r.mitigation, "16");
        }
    }

    #[test]
    fn test_balance_is_idempotent() {
        let mut rels = vec![rel("C-1", ""), rel("C-2", ""), rel("C-3", "")];
        balance_threat(&mut rels, 100);
        let snapshot = rels.clone();
        balance_threat(&mut rels, 100);
        assert_eq!(rels, snapshot);
    }

    #[test]
    fn test_already_balanced_is_untouched() {
        // 60/40 sums to 100 already; the balancer must not flatten it.
        let mut rels = vec![rel("C-1", "60"), rel("C-2", "40")];
        balance_threat(&mut rels, 100);
        assert_eq!(rels[0].mitigation, "60");
        assert_eq!(rels[1].mitigation, "40");
    }

    #[test]
    fn test_no_controls_is_noop() {
        let mut rels = vec![Relation::threat_only("RP", "General", "T-1")];
        balance_threat(&mut rels, 100);
        assert_eq!(rels[0].mitigation, "");
    }

    #[test]
    fn test_duplicate_control_rows_counted_once_updated_everywhere() {
        // C-1 appears under two weaknesses: one unique control plus C-2
        // means a 50/50 split, and both C-1 rows carry the same value.
        let mut rels = vec![
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", ""),
            Relation::full("RP", "General", "T-1", "CWE-2", "C-1", ""),
            rel("C-2", ""),
        ];
        balance_threat(&mut rels, 100);
        assert_eq!(rels[0].mitigation, "50");
        assert_eq!(rels[1].mitigation, "50");
        assert_eq!(rels[2].mitigation, "50");
    }

    #[test]
    fn test_orphaned_and_linked_controls_balance_together() {
        let mut rels = vec![
            rel("C-1", ""),
            Relation::orphaned("RP", "General", "T-1", "C-2", ""),
        ];
        balance_threat(&mut rels, 100);
        assert_eq!(rels[0].mitigation, "50");
        assert_eq!(rels[1].mitigation, "50");
    }

    #[test]
    fn test_threat_only_rows_are_not_touched() {
        let mut rels = vec![Relation::threat_only("RP", "General", "T-1"), rel("C-1", "")];
        balance_threat(&mut rels, 100);
        assert_eq!(rels[0].mitigation, "");
        assert_eq!(rels[1].mitigation, "100");
    }

    #[test]
    fn test_balance_template_groups_by_threat() {
        let mut template = Template::new();
        template.relations = vec![
            Relation::full("RP", "General", "T-1", "CWE-1", "C-1", ""),
            Relation::full("RP", "General", "T-1", "CWE-1", "C-2", ""),
            Relation::full("RP", "General", "T-2", "CWE-2", "C-3", ""),
        ];
        balance_template(&mut template);
        assert_eq!(template.relations[0].mitigation, "50");
        assert_eq!(template.relations[1].mitigation, "50");
        assert_eq!(template.relations[2].mitigation, "100");
    }

    #[test]
    fn test_balance_template_skips_exception_pairs() {
        let mut template = Template::new();
        template.relations = vec![
            Relation::full("GENERIC-SERVICE:AUTHN-SF", "General", "CAPEC-16", "CWE-1", "C-1", "10"),
            Relation::full("RP", "General", "T-1", "CWE-1", "C-2", "10"),
        ];
        balance_template(&mut template);
        assert_eq!(
            template.relations[0].mitigation, "10",
            "exception pair must stay unmitigated"
        );
        assert_eq!(template.relations[1].mitigation, "100");
    }

    #[test]
    fn test_same_threat_ref_in_two_risk_patterns_balances_separately() {
        let mut template = Template::new();
        template.relations = vec![
            Relation::full("RP-A", "General", "T-1", "CWE-1", "C-1", ""),
            Relation::full("RP-B", "General", "T-1", "CWE-1", "C-2", ""),
            Relation::full("RP-B", "General", "T-1", "CWE-1", "C-3", ""),
        ];
        balance_template(&mut template);
        assert_eq!(template.relations[0].mitigation, "100");
        assert_eq!(template.relations[1].mitigation, "50");
        assert_eq!(template.relations[2].mitigation, "50");
    }
}
