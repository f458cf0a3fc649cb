//! Structural validators over a template. Every rule is a pure function
//! returning human-readable violation messages; an empty list is a pass.
//! Nothing here raises — callers decide whether violations abort the
//! operation (the `check` command does) or are merely printed.

use crate::model::catalog::{
    is_unmitigated_exception, ORPHANED_CONTROL_ALLOWED, SENTINEL_WEAKNESS, STRIDE_USE_CASES,
};
use crate::model::{Relation, TaxonomyKind, Template};
use crate::textutil::find_untranslatable;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Run the whole battery and collect every violation.
pub fn run_all(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    errors.extend(check_mitigation_sums(template));
    errors.extend(check_orphaned_controls(template));
    errors.extend(check_empty_weaknesses(template));
    errors.extend(check_duplicate_relations(template));
    errors.extend(check_duplicated_controls_per_threat(template));
    errors.extend(check_threat_usecase_uniqueness(template));
    errors.extend(check_duplicated_standards(template));
    errors.extend(check_duplicated_references(template));
    errors.extend(check_duplicated_taxonomy_values(template));
    errors.extend(check_referential_integrity(template));
    errors.extend(check_empty_descriptions(template));
    errors.extend(check_question_quotes(template));
    errors.extend(check_non_ascii(template));
    errors.extend(check_name_suffix(template));
    errors.extend(check_name_whitespace(template));
    errors.extend(check_reference_url_whitespace(template));
    errors.extend(check_name_does_not_contain_category(template));
    errors.extend(check_stride_vocabulary(template));
    errors
}

/// For every threat outside the exception list, the mitigations summed
/// over unique non-empty controls must equal exactly 100.
pub fn check_mitigation_sums(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut groups: IndexMap<(String, String, String), Vec<&Relation>> = IndexMap::new();
    for rel in &template.relations {
        groups.entry(rel.threat_key()).or_default().push(rel);
    }

    for ((rp, _uc, threat), rels) in &groups {
        if is_unmitigated_exception(rp, threat) {
            continue;
        }
        let mut seen: Vec<&str> = Vec::new();
        let mut sum: i64 = 0;
        for rel in rels {
            if rel.has_control() && !seen.contains(&rel.control.as_str()) {
                seen.push(&rel.control);
                sum += rel.mitigation.parse::<i64>().unwrap_or(0);
            }
        }
        if !seen.is_empty() && sum != 100 {
            errors.push(format!("{rp} -> {threat} -> Error with mitigation: {sum}"));
        }
    }
    errors
}

/// A relation with a control but no weakness is an orphaned control,
/// flagged unless the owning risk pattern is in the allow-list. A
/// weakness without a control is never an orphan.
pub fn check_orphaned_controls(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut reported: Vec<(&str, &str)> = Vec::new();
    for rel in &template.relations {
        if rel.is_orphaned_control()
            && !ORPHANED_CONTROL_ALLOWED.contains(&rel.risk_pattern.as_str())
        {
            let key = (rel.risk_pattern.as_str(), rel.control.as_str());
            if !reported.contains(&key) {
                reported.push(key);
                errors.push(format!("Orphaned controls: {} -> {}", rel.risk_pattern, rel.control));
            }
        }
    }
    errors
}

/// Weaknesses whose every relation appearance lacks a control, except the
/// sentinel.
pub fn check_empty_weaknesses(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    for weakness_ref in template.weaknesses.keys() {
        if weakness_ref == SENTINEL_WEAKNESS {
            continue;
        }
        let appearances: Vec<&Relation> = template
            .relations
            .iter()
            .filter(|r| r.weakness == *weakness_ref)
            .collect();
        if !appearances.is_empty() && appearances.iter().all(|r| !r.has_control()) {
            errors.push(format!("Weakness without controls: {weakness_ref}"));
        }
    }
    errors
}

/// Literal duplicate relation tuples.
pub fn check_duplicate_relations(template: &Template) -> Vec<String> {
    let mut counts: IndexMap<&Relation, usize> = IndexMap::new();
    for rel in &template.relations {
        *counts.entry(rel).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(rel, count)| {
            format!(
                "Duplicated relation ({}, {}, {}, {}, {}) appears {} times",
                rel.risk_pattern, rel.usecase, rel.threat, rel.weakness, rel.control, count
            )
        })
        .collect()
}

/// A control ref appearing more than once across one threat's relations.
/// Sharing a control across weaknesses is legal for the tree, but the
/// checker still reports it so authors notice the double assignment.
pub fn check_duplicated_controls_per_threat(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut groups: IndexMap<&str, IndexMap<&str, usize>> = IndexMap::new();
    for rel in &template.relations {
        if rel.has_control() {
            *groups
                .entry(rel.threat.as_str())
                .or_default()
                .entry(rel.control.as_str())
                .or_insert(0) += 1;
        }
    }
    for (threat, controls) in groups {
        for (control, count) in controls {
            if count > 1 {
                errors.push(format!(
                    "Threat {threat} -> Countermeasure {control} appears {count} times"
                ));
            }
        }
    }
    errors
}

/// Every threat must belong to exactly one use case.
pub fn check_threat_usecase_uniqueness(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut usecases_by_threat: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for rel in &template.relations {
        let list = usecases_by_threat.entry(rel.threat.as_str()).or_default();
        if !list.contains(&rel.usecase.as_str()) {
            list.push(&rel.usecase);
        }
    }
    for (threat, usecases) in usecases_by_threat {
        if usecases.len() > 1 {
            errors.push(format!(
                "Threat {threat} belongs to {} use cases: {}",
                usecases.len(),
                usecases.join(", ")
            ));
        }
    }
    errors
}

/// The same standard section reachable via two different supported
/// standards on one control, or the same pair assigned twice.
pub fn check_duplicated_standards(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    for control in template.controls.values() {
        let mut sources: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for std in &control.standards {
            let list = sources.entry(std.section.as_str()).or_default();
            list.push(&std.standard_ref);
        }
        for (section, refs) in sources {
            if refs.len() > 1 {
                errors.push(format!(
                    "Control {} -> Standard section {} appears {} times across {}",
                    control.ref_,
                    section,
                    refs.len(),
                    refs.join(", ")
                ));
            }
        }
    }
    errors
}

/// Duplicate references by name and by url, independently, per entity.
pub fn check_duplicated_references(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |owner: &str, refs: &[crate::model::Reference]| {
        let mut names: HashMap<&str, usize> = HashMap::new();
        let mut urls: HashMap<&str, usize> = HashMap::new();
        for r in refs {
            *names.entry(r.name.as_str()).or_insert(0) += 1;
            *urls.entry(r.url.as_str()).or_insert(0) += 1;
        }
        for (name, count) in names {
            if count > 1 {
                errors.push(format!("{owner} -> Reference Name: {name} appears {count} times"));
            }
        }
        for (url, count) in urls {
            if count > 1 {
                errors.push(format!("{owner} -> Reference URL: {url} appears {count} times"));
            }
        }
    };
    for threat in template.threats.values() {
        check(&threat.ref_, &threat.references);
    }
    for control in template.controls.values() {
        check(&control.ref_, &control.references);
    }
    errors
}

/// Repeated values inside one taxonomy axis of one entity.
pub fn check_duplicated_taxonomy_values(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |owner: &str, taxonomies: &crate::model::Taxonomies| {
        for (kind, values) in &taxonomies.0 {
            let mut counts: IndexMap<&str, usize> = IndexMap::new();
            for v in values {
                *counts.entry(v.as_str()).or_insert(0) += 1;
            }
            for (value, count) in counts {
                if count > 1 {
                    errors.push(format!(
                        "{owner} -> {}: value {value} appears {count} times",
                        kind.as_str()
                    ));
                }
            }
        }
    };
    for threat in template.threats.values() {
        check(&threat.ref_, &threat.taxonomies);
    }
    for control in template.controls.values() {
        check(&control.ref_, &control.taxonomies);
    }
    errors
}

/// Refs appearing in relations must resolve in their entity tables, and
/// the component's declared risk-pattern refs must resolve too.
pub fn check_referential_integrity(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();

    for rp_ref in &template.component.risk_pattern_refs {
        if template.risk_pattern.ref_ != *rp_ref {
            errors.push(format!(
                "Component {} declares unknown risk pattern {rp_ref}",
                template.component.ref_
            ));
        }
    }

    for rel in &template.relations {
        if !rel.threat.is_empty() && !template.threats.contains_key(&rel.threat) {
            errors.push(format!("Relation references unknown threat {}", rel.threat));
        }
        if rel.has_weakness() && !template.weaknesses.contains_key(&rel.weakness) {
            errors.push(format!("Relation references unknown weakness {}", rel.weakness));
        }
        if rel.has_control() && !template.controls.contains_key(&rel.control) {
            errors.push(format!("Relation references unknown control {}", rel.control));
        }
        if !rel.usecase.is_empty() && !template.usecases.contains_key(&rel.usecase) {
            errors.push(format!("Relation references unknown use case {}", rel.usecase));
        }
    }
    errors
}

/// Threats and countermeasures must carry a description.
pub fn check_empty_descriptions(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    for threat in template.threats.values() {
        if threat.desc.trim().is_empty() {
            errors.push(format!("Threat {} has an empty description", threat.ref_));
        }
    }
    for control in template.controls.values() {
        if control.desc.trim().is_empty() {
            errors.push(format!("Countermeasure {} has an empty description", control.ref_));
        }
    }
    errors
}

/// Double quotes inside question fields break the downstream rule-engine
/// string interpolation.
pub fn check_question_quotes(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    for control in template.controls.values() {
        for (field, value) in [
            ("question", &control.question),
            ("question_desc", &control.question_desc),
        ] {
            if value.contains('"') {
                errors.push(format!(
                    "Countermeasure {} -> '{field}' contains a double quote character",
                    control.ref_
                ));
            }
        }
    }
    errors
}

/// Non-ASCII characters outside the translation table.
pub fn check_non_ascii(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |owner: &str, field: &str, text: &str| {
        for ch in find_untranslatable(text) {
            errors.push(format!("{owner} -> {field} has untranslatable character '{ch}'"));
        }
    };
    for threat in template.threats.values() {
        check(&threat.ref_, "name", &threat.name);
        check(&threat.ref_, "desc", &threat.desc);
    }
    for control in template.controls.values() {
        check(&control.ref_, "name", &control.name);
        check(&control.ref_, "desc", &control.desc);
    }
    for weakness in template.weaknesses.values() {
        check(&weakness.ref_, "name", &weakness.name);
        check(&weakness.ref_, "desc", &weakness.desc);
    }
    errors
}

static NAME_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\*|"|'|\)|\w|\d+)$"#).expect("static regex"));

/// Names must end in an alphanumeric or accepted punctuation character.
pub fn check_name_suffix(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |kind: &str, ref_: &str, name: &str| {
        if !name.is_empty() && NAME_SUFFIX_RE.find(name).is_none() {
            errors.push(format!("Incorrect name suffix: {kind} {ref_}: ###{name}###"));
        }
    };
    for threat in template.threats.values() {
        check("Threat", &threat.ref_, &threat.name);
    }
    for control in template.controls.values() {
        check("Control", &control.ref_, &control.name);
    }
    for weakness in template.weaknesses.values() {
        check("Weakness", &weakness.ref_, &weakness.name);
    }
    for usecase in template.usecases.values() {
        check("Usecase", &usecase.ref_, &usecase.name);
    }
    errors
}

/// Leading or trailing whitespace in names.
pub fn check_name_whitespace(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |ref_: &str, name: &str| {
        if name != name.trim() {
            errors.push(format!("{ref_} -> Name '{name}' has leading or trailing whitespace"));
        }
    };
    check(&template.component.ref_, &template.component.name);
    check(&template.risk_pattern.ref_, &template.risk_pattern.name);
    for threat in template.threats.values() {
        check(&threat.ref_, &threat.name);
    }
    for control in template.controls.values() {
        check(&control.ref_, &control.name);
    }
    errors
}

/// Whitespace inside reference URLs.
pub fn check_reference_url_whitespace(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |owner: &str, refs: &[crate::model::Reference]| {
        for r in refs {
            if r.url.contains(' ') {
                errors.push(format!("URL with whitespaces: {owner} -> {} -> {}", r.name, r.url));
            }
        }
    };
    for threat in template.threats.values() {
        check(&threat.ref_, &threat.references);
    }
    for control in template.controls.values() {
        check(&control.ref_, &control.references);
    }
    errors
}

/// The component name must not literally contain its category name.
pub fn check_name_does_not_contain_category(template: &Template) -> Vec<String> {
    let category = crate::model::catalog::category_name(&template.component.category_ref);
    if !category.is_empty()
        && !template.component.name.is_empty()
        && template.component.name.contains(category)
    {
        return vec![format!(
            "Component {} has an invalid name: {}",
            template.component.ref_, template.component.name
        )];
    }
    Vec::new()
}

/// STRIDE taxonomy values must come from the controlled vocabulary.
pub fn check_stride_vocabulary(template: &Template) -> Vec<String> {
    let mut errors = Vec::new();
    for threat in template.threats.values() {
        for value in threat.taxonomies.get(TaxonomyKind::Stride) {
            let known = STRIDE_USE_CASES.values().any(|uc| uc.name == *value);
            if !known {
                errors.push(format!(
                    "Threat {} -> stride value '{value}' not found in available system fields",
                    threat.ref_
                ));
            }
        }
    }
    errors
}
