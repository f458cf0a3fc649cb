//! Lifting and lowering between the ref-keyed authoring template and the
//! uuid-keyed workspace aggregate. This is how XML and YSC documents
//! enter and leave a version: the template codecs do the parsing, this
//! module does the identity bookkeeping.

use crate::codecs::{xml, ysc};
use crate::errors::{Result, WorkspaceError};
use crate::model::taxonomy::TaxonomyKind;
use crate::model::{catalog, Relation, Template};
use crate::workspace::model::{
    new_uuid, Library, Version, WsCategory, WsComponentDefinition, WsControl, WsReference,
    WsRelation, WsRiskPattern, WsStandard, WsSupportedStandard, WsThreat, WsUseCase, WsWeakness,
};
use tracing::info;

/// Import a library XML document into a version. Returns the library ref.
pub fn import_library_xml(filename: &str, xml_text: &str, version: &mut Version) -> Result<String> {
    let stem = filename.trim_end_matches(".xml");
    let template = xml::import_template(xml_text, stem)?;
    Ok(import_template(&template, filename, version))
}

/// Import a YSC component document into a version. Returns the library
/// ref.
pub fn import_component_ysc(filename: &str, yaml_text: &str, version: &mut Version) -> Result<String> {
    let template = ysc::import_template(yaml_text)?;
    let filename = filename.replace(".yaml", ".xml").replace(".yml", ".xml");
    Ok(import_template(&template, &filename, version))
}

/// Export one library of a version as library XML, bumping its revision.
pub fn export_library_xml(library_ref: &str, version: &mut Version) -> Result<String> {
    let library = version
        .get_library(library_ref)
        .ok_or_else(|| WorkspaceError::LibraryNotFound {
            version: version.version.clone(),
            library: library_ref.to_string(),
        })?;
    let template = template_from_library(library, version);
    let revision: u32 = library.revision.parse().unwrap_or(0);
    let document = xml::export_template(&template, revision + 1)?;
    if let Some(library) = version.get_library_mut(library_ref) {
        library.revision = (revision + 1).to_string();
    }
    Ok(document)
}

/// Uuid of the element with this ref, reusing an existing one ("already
/// imported" wins) or minting a new identity via `create`.
fn reuse_or_insert<T>(
    table: &mut indexmap::IndexMap<String, T>,
    existing: Option<String>,
    create: impl FnOnce(String) -> T,
) -> String {
    match existing {
        Some(uuid) => uuid,
        None => {
            let uuid = new_uuid();
            table.insert(uuid.clone(), create(uuid.clone()));
            uuid
        }
    }
}

/// Lift a template into the version: shared elements land in the version
/// tables (matched by ref, first writer wins), library-scoped ones in a
/// new library registered under the component ref.
pub fn import_template(template: &Template, filename: &str, version: &mut Version) -> String {
    let mut library = Library::new(&template.component.ref_);
    library.desc = template.component.desc.clone();
    library.filename = filename.to_string();

    let category_ref = template.component.category_ref.clone();
    if !category_ref.is_empty()
        && !version.categories.values().any(|c| c.ref_ == category_ref)
    {
        let uuid = new_uuid();
        version.categories.insert(
            uuid.clone(),
            WsCategory {
                uuid,
                ref_: category_ref.clone(),
                name: catalog::category_name(&category_ref).to_string(),
            },
        );
    }

    let rp_uuid = new_uuid();
    library.risk_patterns.insert(
        rp_uuid.clone(),
        WsRiskPattern {
            uuid: rp_uuid.clone(),
            ref_: template.risk_pattern.ref_.clone(),
            name: template.risk_pattern.name.clone(),
            desc: template.risk_pattern.desc.clone(),
        },
    );

    let cd_uuid = new_uuid();
    library.component_definitions.insert(
        cd_uuid.clone(),
        WsComponentDefinition {
            uuid: cd_uuid,
            ref_: template.component.ref_.clone(),
            name: template.component.name.clone(),
            desc: template.component.desc.clone(),
            category_ref,
            visible: template.component.visible.clone(),
            risk_pattern_refs: template.component.risk_pattern_refs.clone(),
        },
    );

    for usecase in template.usecases.values() {
        let existing = version
            .usecases
            .values()
            .find(|uc| uc.ref_ == usecase.ref_)
            .map(|uc| uc.uuid.clone());
        reuse_or_insert(&mut version.usecases, existing, |uuid| WsUseCase {
            uuid,
            ref_: usecase.ref_.clone(),
            name: usecase.name.clone(),
            desc: usecase.desc.clone(),
        });
    }

    for threat in template.threats.values() {
        let existing = version
            .threats
            .values()
            .find(|t| t.ref_ == threat.ref_)
            .map(|t| t.uuid.clone());
        if existing.is_some() {
            continue;
        }
        let references = intern_references(version, &threat.references);
        let mut mitre = Vec::new();
        for kind in [
            TaxonomyKind::AttackEnterpriseTechnique,
            TaxonomyKind::AttackIcsTechnique,
            TaxonomyKind::AttackMobileTechnique,
            TaxonomyKind::AtlasTechnique,
        ] {
            mitre.extend(threat.taxonomies.get(kind).iter().cloned());
        }
        let uuid = new_uuid();
        version.threats.insert(
            uuid.clone(),
            WsThreat {
                uuid,
                ref_: threat.ref_.clone(),
                name: threat.name.clone(),
                desc: threat.desc.clone(),
                risk_rating: threat.risk_rating.clone(),
                mitre,
                stride: threat.taxonomies.get(TaxonomyKind::Stride).to_vec(),
                references,
            },
        );
    }

    for weakness in template.weaknesses.values() {
        let exists = version.weaknesses.values().any(|w| w.ref_ == weakness.ref_);
        if !exists {
            let uuid = new_uuid();
            version.weaknesses.insert(
                uuid.clone(),
                WsWeakness {
                    uuid,
                    ref_: weakness.ref_.clone(),
                    name: weakness.name.clone(),
                    desc: weakness.desc.clone(),
                    impact: weakness.impact.clone(),
                    ..Default::default()
                },
            );
        }
    }

    for control in template.controls.values() {
        let exists = version.controls.values().any(|c| c.ref_ == control.ref_);
        if exists {
            continue;
        }
        let references = intern_references(version, &control.references);
        let mut standards = Vec::new();
        for assignment in &control.standards {
            standards.push(intern_standard(version, &assignment.standard_ref, &assignment.section));
        }
        let mut mitre = Vec::new();
        for kind in [
            TaxonomyKind::AttackEnterpriseMitigation,
            TaxonomyKind::AttackIcsMitigation,
            TaxonomyKind::AttackMobileMitigation,
            TaxonomyKind::AtlasMitigation,
        ] {
            mitre.extend(control.taxonomies.get(kind).iter().cloned());
        }
        let uuid = new_uuid();
        version.controls.insert(
            uuid.clone(),
            WsControl {
                uuid,
                ref_: control.ref_.clone(),
                name: control.name.clone(),
                desc: control.desc.clone(),
                state: control.state.clone(),
                cost: control.cost.clone(),
                references,
                standards,
                base_standard: control.taxonomies.get(TaxonomyKind::BaselineStandardRef).to_vec(),
                base_standard_section: control
                    .taxonomies
                    .get(TaxonomyKind::BaselineStandardSection)
                    .to_vec(),
                scope: control.taxonomies.get(TaxonomyKind::Scope).to_vec(),
                mitre,
                ..Default::default()
            },
        );
    }

    for relation in &template.relations {
        let usecase = find_uuid(version.usecases.values().map(|u| (&u.ref_, &u.uuid)), &relation.usecase);
        let threat = find_uuid(version.threats.values().map(|t| (&t.ref_, &t.uuid)), &relation.threat);
        let weakness = find_uuid(
            version.weaknesses.values().map(|w| (&w.ref_, &w.uuid)),
            &relation.weakness,
        );
        let control = find_uuid(version.controls.values().map(|c| (&c.ref_, &c.uuid)), &relation.control);
        let ws_relation = WsRelation::new(
            &rp_uuid,
            &usecase,
            &threat,
            &weakness,
            &control,
            &relation.mitigation,
        );
        library.relations.insert(ws_relation.uuid.clone(), ws_relation);
    }

    let library_ref = library.ref_.clone();
    info!(library = %library_ref, version = %version.version, "template imported");
    version.libraries.insert(library_ref.clone(), library);
    library_ref
}

fn find_uuid<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>, ref_: &str) -> String {
    if ref_.is_empty() {
        return String::new();
    }
    for (candidate, uuid) in pairs {
        if candidate == ref_ {
            return uuid.clone();
        }
    }
    String::new()
}

fn intern_references(version: &mut Version, references: &[crate::model::Reference]) -> Vec<String> {
    let mut uuids = Vec::new();
    for reference in references {
        let existing = version
            .references
            .values()
            .find(|r| r.name == reference.name && r.url == reference.url)
            .map(|r| r.uuid.clone());
        let uuid = reuse_or_insert(&mut version.references, existing, |uuid| WsReference {
            uuid,
            name: reference.name.clone(),
            url: reference.url.clone(),
        });
        uuids.push(uuid);
    }
    uuids
}

fn intern_standard(version: &mut Version, standard_ref: &str, section: &str) -> String {
    let (supported_ref, supported_name) = catalog::standard_output_name(standard_ref);
    let supported_exists = version
        .supported_standards
        .values()
        .any(|s| s.ref_ == supported_ref);
    if !supported_exists {
        let uuid = new_uuid();
        version.supported_standards.insert(
            uuid.clone(),
            WsSupportedStandard {
                uuid,
                ref_: supported_ref.clone(),
                name: supported_name,
            },
        );
    }

    let existing = version
        .standards
        .values()
        .find(|s| s.supported_standard_ref == supported_ref && s.standard_ref == section)
        .map(|s| s.uuid.clone());
    reuse_or_insert(&mut version.standards, existing, |uuid| WsStandard {
        uuid,
        supported_standard_ref: supported_ref.clone(),
        standard_ref: section.to_string(),
    })
}

/// Lower one library back into a template, resolving uuids through the
/// version tables. The first component definition and risk pattern own
/// the document, matching the single-component authoring shape.
pub fn template_from_library(library: &Library, version: &Version) -> Template {
    let mut template = Template::new();

    if let Some(cd) = library.component_definitions.values().next() {
        template.component.ref_ = cd.ref_.clone();
        template.component.name = cd.name.clone();
        template.component.desc = cd.desc.clone();
        template.component.category_ref = cd.category_ref.clone();
        template.component.visible = cd.visible.clone();
        template.component.risk_pattern_refs = cd.risk_pattern_refs.clone();
    }
    if let Some(rp) = library.risk_patterns.values().next() {
        template.risk_pattern.ref_ = rp.ref_.clone();
        template.risk_pattern.name = rp.name.clone();
        template.risk_pattern.desc = rp.desc.clone();
        if template.component.risk_pattern_refs.is_empty() {
            template.component.risk_pattern_refs = vec![rp.ref_.clone()];
        }
    }

    let rp_ref = template.risk_pattern.ref_.clone();
    for relation in library.relations.values() {
        let usecase_ref = match version.usecases.get(&relation.usecase) {
            Some(usecase) => {
                template.add_usecase(crate::model::UseCase {
                    ref_: usecase.ref_.clone(),
                    name: usecase.name.clone(),
                    desc: usecase.desc.clone(),
                });
                usecase.ref_.clone()
            }
            None => relation.usecase.clone(),
        };

        let threat_ref = match version.threats.get(&relation.threat) {
            Some(threat) => {
                let mut model_threat = crate::model::Threat {
                    ref_: threat.ref_.clone(),
                    name: threat.name.clone(),
                    desc: threat.desc.clone(),
                    risk_rating: threat.risk_rating.clone(),
                    ..Default::default()
                };
                for value in &threat.mitre {
                    if let Some(kind) = crate::model::taxonomy::technique_kind_for(value) {
                        model_threat.taxonomies.add(kind, value);
                    }
                }
                model_threat
                    .taxonomies
                    .set(TaxonomyKind::Stride, threat.stride.clone());
                model_threat.references = resolve_references(version, &threat.references);
                template.add_threat(model_threat);
                threat.ref_.clone()
            }
            None => relation.threat.clone(),
        };

        let weakness_ref = match version.weaknesses.get(&relation.weakness) {
            Some(weakness) => {
                template.add_weakness(crate::model::Weakness {
                    ref_: weakness.ref_.clone(),
                    name: weakness.name.clone(),
                    desc: weakness.desc.clone(),
                    impact: weakness.impact.clone(),
                });
                weakness.ref_.clone()
            }
            None => relation.weakness.clone(),
        };

        let control_ref = match version.controls.get(&relation.control) {
            Some(control) => {
                let mut model_control = crate::model::Control {
                    ref_: control.ref_.clone(),
                    name: control.name.clone(),
                    desc: control.desc.clone(),
                    state: control.state.clone(),
                    cost: control.cost.clone(),
                    ..Default::default()
                };
                for value in &control.mitre {
                    if let Some(kind) = crate::model::taxonomy::mitigation_kind_for(value) {
                        model_control.taxonomies.add(kind, value);
                    }
                }
                model_control
                    .taxonomies
                    .set(TaxonomyKind::Scope, control.scope.clone());
                model_control
                    .taxonomies
                    .set(TaxonomyKind::BaselineStandardRef, control.base_standard.clone());
                model_control.taxonomies.set(
                    TaxonomyKind::BaselineStandardSection,
                    control.base_standard_section.clone(),
                );
                model_control.references = resolve_references(version, &control.references);
                for standard_uuid in &control.standards {
                    if let Some(standard) = version.standards.get(standard_uuid) {
                        model_control.standards.push(crate::model::StandardAssignment {
                            standard_ref: crate::model::catalog::standard_label_for_output_ref(
                                &standard.supported_standard_ref,
                            ),
                            section: standard.standard_ref.clone(),
                        });
                    }
                }
                template.add_control(model_control);
                control.ref_.clone()
            }
            None => relation.control.clone(),
        };

        template.add_relation(Relation::full(
            &rp_ref,
            &usecase_ref,
            &threat_ref,
            &weakness_ref,
            &control_ref,
            &relation.mitigation,
        ));
    }

    template
}

fn resolve_references(version: &Version, uuids: &[String]) -> Vec<crate::model::Reference> {
    uuids
        .iter()
        .filter_map(|uuid| version.references.get(uuid))
        .map(|r| crate::model::Reference {
            name: r.name.clone(),
            url: r.url.clone(),
        })
        .collect()
}
