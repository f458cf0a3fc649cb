//! Cross-format conversion: the three codecs must agree on semantic
//! content. Import format A, export format B, re-import B, compare to the
//! original model modulo each codec's documented artifacts.

use std::collections::HashMap;
use threatsmith::balance::balance_template;
use threatsmith::codecs::{xml, ysc};
use threatsmith::integrity;
use threatsmith::model::{Relation, Template};

const YSC_DOC: &str = r#"
component:
  ref: CD-V2-POSTGRESQL
  name: PostgreSQL
  description: Relational database
  category: data-store
  risk_pattern:
    ref: RP-V2-POSTGRESQL
    name: PostgreSQL
    description: Relational database
    type: static
    threats:
      - ref: T-INJECTION
        name: SQL injection
        description: Attacker-controlled SQL reaches the engine
        group: Tampering
        risk_score:
          confidentiality: "100"
          integrity: "100"
          availability: "50"
          ease_of_exploitation: "75"
        taxonomies:
          stride:
            - Tampering
          attack_enterprise_technique:
            - T1190 - Exploit Public-Facing Application - ATT&CK Enterprise
        references:
          - name: OWASP Injection
            url: https://owasp.org/injection
        countermeasures:
          - ref: C-PARAM
            name: Use parameterized queries
            description: Bind variables everywhere
            cost: "1"
            cwe: CWE-89
            cwe_impact: "100"
            question: Are queries parameterized?
            question_desc: Check the data access layer
            dataflow_tags:
              - sql
            taxonomies:
              scope:
                - functional
              attack_enterprise_mitigation:
                - M1041 - Encrypt Sensitive Information - ATT&CK Enterprise
            standards:
              ISO 27001:
                - "8.28"
          - ref: C-LEAST-PRIV
            name: Run with least privilege
            description: Restrict the database account
            cost: "0"
            cwe: CWE-250
            cwe_impact: "75"
            taxonomies:
              scope:
                - functional
      - ref: T-DOS
        name: Connection exhaustion
        description: Too many connections exhaust the server
        group: Denial of Service
        risk_score:
          confidentiality: "1"
          integrity: "1"
          availability: "100"
          ease_of_exploitation: "50"
        countermeasures: []
"#;

fn relation_multiset(template: &Template) -> HashMap<Relation, usize> {
    let mut counts = HashMap::new();
    for r in &template.relations {
        *counts.entry(r.clone()).or_insert(0) += 1;
    }
    counts
}

#[test]
fn test_yaml_to_xml_to_yaml_preserves_model() {
    let mut original = ysc::import_template(YSC_DOC).expect("yaml import");
    balance_template(&mut original);

    let xml_doc = xml::export_template(&original, 1).expect("xml export");
    let from_xml = xml::import_template(&xml_doc, "CD-V2-POSTGRESQL").expect("xml import");

    assert_eq!(from_xml.component, original.component);
    assert_eq!(from_xml.risk_pattern, original.risk_pattern);
    assert_eq!(from_xml.threats, original.threats);
    assert_eq!(from_xml.weaknesses.keys().collect::<Vec<_>>(), original.weaknesses.keys().collect::<Vec<_>>());
    assert_eq!(relation_multiset(&from_xml), relation_multiset(&original));

    // Question and dataflow metadata survive the detour through rules
    let control = &from_xml.controls["C-PARAM"];
    assert_eq!(control.question, "Are queries parameterized?");
    assert_eq!(control.dataflow_tags, vec!["sql".to_string()]);

    let yaml_doc = ysc::export_template(&from_xml).expect("yaml export");
    let back = ysc::import_template(&yaml_doc).expect("yaml reimport");
    assert_eq!(relation_multiset(&back), relation_multiset(&original));
    assert_eq!(back.threats, original.threats);
}

#[test]
fn test_imported_model_passes_integrity_battery() {
    let mut template = ysc::import_template(YSC_DOC).expect("yaml import");
    balance_template(&mut template);
    let violations = integrity::run_all(&template);
    assert!(violations.is_empty(), "unexpected violations: {violations:?}");
}

#[test]
fn test_unbalanced_import_is_caught_then_fixed() {
    let template = ysc::import_template(YSC_DOC).expect("yaml import");
    // Fresh import carries empty mitigations: the sum check must flag the
    // threat with controls and ignore the bare one.
    let violations = integrity::check_mitigation_sums(&template);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].contains("T-INJECTION"));

    let mut balanced = template;
    balance_template(&mut balanced);
    assert!(integrity::check_mitigation_sums(&balanced).is_empty());
}

#[test]
fn test_xml_export_is_deterministic_given_revision() {
    let mut template = ysc::import_template(YSC_DOC).expect("yaml import");
    balance_template(&mut template);
    let first = xml::export_template(&template, 3).expect("export");
    let second = xml::export_template(&template, 3).expect("export");
    assert_eq!(first, second);
}
