//! Threat-model drafting: ask the generator for a JSON threat model,
//! validate it against the embedded schema, and rebuild the template's
//! threat/control tables and relations from it.

use crate::balance::balance_template;
use crate::errors::{CodecError, RemoteError, Result};
use crate::llm::{Generator, PROMPT_THREAT_MODEL};
use crate::model::catalog::{PREFIX_COMPONENT_DEFINITION, PREFIX_COUNTERMEASURE, PREFIX_THREAT};
use crate::model::{catalog, Control, Relation, Template, Threat};
use crate::textutil::extract_json;
use jsonschema::{Draft, Validator};
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::{info, warn};

const TM_SCHEMA: &str = include_str!("../resources/tm_schema.json");

/// The generator rarely answers with clean JSON on the first try; the
/// generate/parse cycle is retried this many times before giving up.
pub const MAX_GENERATION_ATTEMPTS: usize = 5;

static VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    let schema: serde_json::Value =
        serde_json::from_str(TM_SCHEMA).expect("embedded threat-model schema is valid JSON");
    jsonschema::options()
        .with_draft(Draft::Draft7)
        .build(&schema)
        .expect("embedded threat-model schema compiles")
});

#[derive(Debug, Deserialize)]
struct GeneratedModel {
    security_threats: Vec<GeneratedThreat>,
}

#[derive(Debug, Deserialize)]
struct GeneratedThreat {
    threat_id: String,
    threat_name: String,
    description: String,
    countermeasures: Vec<GeneratedControl>,
}

#[derive(Debug, Deserialize)]
struct GeneratedControl {
    countermeasure_id: String,
    countermeasure_name: String,
    description: String,
}

/// Validate a candidate threat-model document, collecting every
/// violation.
pub fn validate_model(doc: &serde_json::Value) -> Result<()> {
    let violations: Vec<String> = VALIDATOR
        .iter_errors(doc)
        .map(|err| format!("Field: {} Reason: {}", err.instance_path, err))
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CodecError::Schema { violations }.into())
    }
}

/// Query the generator until it produces a parseable JSON object, up to
/// the fixed attempt budget. No backoff, no partial retry of sub-steps.
pub fn draft_model(generator: &dyn Generator, context: &str) -> Result<serde_json::Value> {
    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        if attempt > 1 {
            info!(attempt, "retrying threat model generation");
        }
        let answer = generator.generate(PROMPT_THREAT_MODEL, context)?;
        match extract_json(&answer) {
            Some(doc) => return Ok(doc),
            None => warn!(attempt, "generator answer did not contain a JSON object"),
        }
    }
    Err(RemoteError::GeneratorExhausted {
        attempts: MAX_GENERATION_ATTEMPTS,
    }
    .into())
}

/// Replace the template's threat model with a generated one. Existing
/// threats, weaknesses, controls and relations are cleared first; new
/// refs are prefixed and derived from the component ref; mitigations are
/// balanced before returning.
pub fn apply_model(template: &mut Template, doc: &serde_json::Value, company_prefix: &str) -> Result<()> {
    validate_model(doc)?;
    let model: GeneratedModel = serde_json::from_value(doc.clone())
        .map_err(|e| CodecError::Parse {
            format: "threat model".to_string(),
            message: e.to_string(),
        })?;

    let base_ref = template
        .component
        .ref_
        .replace(&format!("{PREFIX_COMPONENT_DEFINITION}{company_prefix}"), "");

    template.clear_threat_model();
    template.add_usecase(catalog::general_use_case());
    let rp_ref = template.risk_pattern.ref_.clone();

    for generated in model.security_threats {
        let threat_ref = format!("{PREFIX_THREAT}{base_ref}-{}", generated.threat_id.to_uppercase());
        template.add_threat(Threat {
            ref_: threat_ref.clone(),
            name: generated.threat_name,
            desc: generated.description,
            ..Default::default()
        });

        if generated.countermeasures.is_empty() {
            template.add_relation(Relation::threat_only(&rp_ref, "General", &threat_ref));
        }

        for countermeasure in generated.countermeasures {
            let control_ref = format!(
                "{PREFIX_COUNTERMEASURE}{base_ref}-{}",
                countermeasure.countermeasure_id.to_uppercase()
            );
            template.add_control(Control {
                ref_: control_ref.clone(),
                name: countermeasure.countermeasure_name,
                desc: countermeasure.description,
                ..Default::default()
            });
            template.add_relation(Relation::orphaned(&rp_ref, "General", &threat_ref, &control_ref, ""));
        }
    }

    balance_template(template);
    info!(
        threats = template.threats.len(),
        controls = template.controls.len(),
        "threat model applied"
    );
    Ok(())
}

/// The whole `tm` flow: draft, validate, apply.
pub fn generate_threat_model(
    template: &mut Template,
    generator: &dyn Generator,
    company_prefix: &str,
) -> Result<()> {
    let context = format!("{}: {}", template.component.ref_, template.component.desc);
    let doc = draft_model(generator, &context)?;
    apply_model(template, &doc, company_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedGenerator;

    fn base_template() -> Template {
        let mut template = Template::new();
        template.component.ref_ = "CD-V2-ACME-REDIS".to_string();
        template.component.name = "Redis".to_string();
        template.component.desc = "In-memory data store".to_string();
        template.risk_pattern.ref_ = "RP-V2-ACME-REDIS".to_string();
        template
    }

    #[test]
    fn test_generate_applies_model_and_balances() {
        let mut template = base_template();
        let generator = CannedGenerator::offline_defaults();
        generate_threat_model(&mut template, &generator, "ACME-").expect("generate");

        assert_eq!(template.threats.len(), 1);
        assert!(template.threats.contains_key("T-REDIS-SPOOFING"));
        assert_eq!(template.controls.len(), 2);
        assert!(template.controls.contains_key("C-REDIS-MFA"));

        // Two countermeasures: balanced 50/50
        let mitigations: Vec<&str> = template
            .relations
            .iter()
            .map(|r| r.mitigation.as_str())
            .collect();
        assert_eq!(mitigations, ["50", "50"]);
    }

    #[test]
    fn test_retry_then_give_up_on_non_json() {
        let mut template = base_template();
        let generator = CannedGenerator::new().with_answer(PROMPT_THREAT_MODEL, "I cannot help with that");
        let err = generate_threat_model(&mut template, &generator, "")
            .expect_err("must exhaust attempts");
        assert!(format!("{err:#}").contains("5 attempts"));
    }

    #[test]
    fn test_schema_rejects_missing_required_fields() {
        let doc = serde_json::json!({
            "security_threats": [{"threat_id": "x", "threat_name": "X"}]
        });
        let err = validate_model(&doc).expect_err("must fail");
        let message = format!("{err:#}");
        assert!(message.contains("description") || message.contains("countermeasures"));
    }

    #[test]
    fn test_apply_replaces_previous_model() {
        let mut template = base_template();
        template.add_threat(Threat {
            ref_: "T-OLD".to_string(),
            name: "Old".to_string(),
            desc: "Old threat".to_string(),
            ..Default::default()
        });
        template.add_relation(Relation::threat_only("RP-V2-ACME-REDIS", "General", "T-OLD"));

        let generator = CannedGenerator::offline_defaults();
        generate_threat_model(&mut template, &generator, "ACME-").expect("generate");
        assert!(!template.threats.contains_key("T-OLD"));
        assert!(template.relations.iter().all(|r| r.threat != "T-OLD"));
    }

    #[test]
    fn test_threat_without_countermeasures_is_recorded() {
        let mut template = base_template();
        let doc = serde_json::json!({
            "security_threats": [{
                "threat_id": "bare",
                "threat_name": "Bare threat",
                "description": "No mitigations yet",
                "countermeasures": []
            }]
        });
        apply_model(&mut template, &doc, "ACME-").expect("apply");
        assert_eq!(template.relations.len(), 1);
        assert!(!template.relations[0].has_control());
    }
}
