//! Operations over the multi-library workspace: version/library CRUD,
//! reports, the merge machinery and the per-library replay of the
//! relation-tree and mitigation logic.
//!
//! The workspace is an explicit context object; persistence is an
//! explicit save of the whole aggregate to a `.irius` JSON file, never
//! automatic.

use crate::balance::{balance_threat, BALANCE_GOAL};
use crate::errors::{Result, ThreatsmithError, WorkspaceError};
use crate::model::catalog::is_unmitigated_exception;
use crate::model::Relation;
use crate::textutil::replace_non_ascii;
use crate::tree::{build_tree, RelationTree};
use crate::workspace::model::{Library, Project, Version};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROJECT_EXTENSION: &str = "irius";

static SAFE_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("static regex"));

pub fn is_safe_ref(value: &str) -> bool {
    SAFE_REF_RE.is_match(value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub src_version: String,
    pub src_library: String,
    pub dst_version: String,
    pub dst_library: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryUpdate {
    pub name: String,
    pub desc: String,
    pub revision: String,
    pub filename: String,
    pub enabled: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryReport {
    pub library_ref: String,
    pub library_name: String,
    pub library_desc: String,
    pub revision: String,
    pub enabled: String,
    pub library_filename: String,
    pub num_component_definitions: usize,
    pub num_risk_patterns: usize,
    pub num_rules: usize,
    pub num_usecases: usize,
    pub num_threats: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionReport {
    pub version: String,
    pub num_libraries: usize,
    pub num_risk_patterns: usize,
    pub num_usecases: usize,
    pub num_threats: usize,
    pub num_weaknesses: usize,
    pub num_controls: usize,
    pub num_references: usize,
    pub num_standards: usize,
    pub num_categories: usize,
    pub num_components: usize,
    pub num_rules: usize,
    pub library_reports: Vec<LibraryReport>,
}

#[derive(Debug)]
pub struct Workspace {
    project: Project,
}

impl Workspace {
    pub fn new(ref_: &str, name: &str, desc: &str) -> Result<Self> {
        if !is_safe_ref(ref_) {
            return Err(WorkspaceError::InvalidRef(ref_.to_string()).into());
        }
        Ok(Self {
            project: Project::new(ref_, name, desc),
        })
    }

    pub fn from_project(project: Project) -> Self {
        Self { project }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    // -- versions ----------------------------------------------------------

    pub fn version(&self, version_ref: &str) -> Result<&Version> {
        self.project
            .versions
            .get(version_ref)
            .ok_or_else(|| WorkspaceError::VersionNotFound(version_ref.to_string()).into())
    }

    pub fn version_mut(&mut self, version_ref: &str) -> Result<&mut Version> {
        self.project
            .versions
            .get_mut(version_ref)
            .ok_or_else(|| WorkspaceError::VersionNotFound(version_ref.to_string()).into())
    }

    pub fn create_version(&mut self, version_ref: &str) -> Result<()> {
        if self.project.versions.contains_key(version_ref) {
            return Err(WorkspaceError::VersionExists(version_ref.to_string()).into());
        }
        if !is_safe_ref(version_ref) {
            return Err(WorkspaceError::InvalidRef(version_ref.to_string()).into());
        }
        self.project
            .versions
            .insert(version_ref.to_string(), Version::new(version_ref));
        Ok(())
    }

    pub fn delete_version(&mut self, version_ref: &str) {
        self.project.versions.shift_remove(version_ref);
    }

    /// Deep copy a version under a new ref.
    pub fn copy_version(&mut self, version_ref: &str, new_ref: &str) -> Result<()> {
        if self.project.versions.contains_key(new_ref) {
            return Err(WorkspaceError::VersionExists(new_ref.to_string()).into());
        }
        if !is_safe_ref(new_ref) {
            return Err(WorkspaceError::InvalidRef(new_ref.to_string()).into());
        }
        let mut clone = self.version(version_ref)?.clone();
        clone.version = new_ref.to_string();
        self.project.versions.insert(new_ref.to_string(), clone);
        Ok(())
    }

    // -- libraries ---------------------------------------------------------

    pub fn library(&self, version_ref: &str, library_ref: &str) -> Result<&Library> {
        self.version(version_ref)?
            .get_library(library_ref)
            .ok_or_else(|| {
                WorkspaceError::LibraryNotFound {
                    version: version_ref.to_string(),
                    library: library_ref.to_string(),
                }
                .into()
            })
    }

    pub fn library_mut(&mut self, version_ref: &str, library_ref: &str) -> Result<&mut Library> {
        let version = version_ref.to_string();
        self.version_mut(version_ref)?
            .get_library_mut(library_ref)
            .ok_or_else(|| {
                WorkspaceError::LibraryNotFound {
                    version,
                    library: library_ref.to_string(),
                }
                .into()
            })
    }

    pub fn create_library(&mut self, version_ref: &str, library_ref: &str) -> Result<()> {
        let version = self.version_mut(version_ref)?;
        version
            .libraries
            .insert(library_ref.to_string(), Library::new(library_ref));
        Ok(())
    }

    pub fn delete_library(&mut self, version_ref: &str, library_ref: &str) -> Result<()> {
        self.version_mut(version_ref)?
            .libraries
            .shift_remove(library_ref);
        Ok(())
    }

    pub fn update_library(
        &mut self,
        version_ref: &str,
        library_ref: &str,
        update: &LibraryUpdate,
    ) -> Result<()> {
        let library = self.library_mut(version_ref, library_ref)?;
        library.name = update.name.clone();
        library.desc = update.desc.clone();
        library.revision = update.revision.clone();
        library.filename = update.filename.clone();
        library.enabled = update.enabled.clone();
        Ok(())
    }

    pub fn increment_library_revision(&mut self, version_ref: &str, library_ref: &str) -> Result<()> {
        let library = self.library_mut(version_ref, library_ref)?;
        let current: u32 = library.revision.parse().unwrap_or(0);
        library.revision = (current + 1).to_string();
        Ok(())
    }

    // -- relation tree & mitigation ---------------------------------------

    /// The library's relations as the four-level ownership tree, over
    /// uuids. Relations carrying a control but no mitigation cannot be
    /// represented and are skipped.
    pub fn relations_in_tree(library: &Library) -> RelationTree {
        let relations: Vec<Relation> = library
            .relations
            .values()
            .filter(|r| r.control.is_empty() || !r.mitigation.is_empty())
            .map(|r| r.as_core())
            .collect();
        build_tree(&relations)
    }

    fn threat_ref(version: &Version, uuid: &str) -> String {
        version
            .threats
            .get(uuid)
            .map(|t| t.ref_.clone())
            .unwrap_or_else(|| uuid.to_string())
    }

    fn risk_pattern_ref(library: &Library, uuid: &str) -> String {
        library
            .risk_patterns
            .get(uuid)
            .map(|rp| rp.ref_.clone())
            .unwrap_or_else(|| uuid.to_string())
    }

    /// Mitigation-sum check per threat of one library, honoring the
    /// unmitigated exception pairs. Advisory; messages only.
    pub fn check_mitigation(&self, version_ref: &str, library_ref: &str) -> Result<Vec<String>> {
        let version = self.version(version_ref)?;
        let library = self.library(version_ref, library_ref)?;
        let mut errors = Vec::new();

        let mut groups: IndexMap<(String, String, String), Vec<&crate::workspace::model::WsRelation>> =
            IndexMap::new();
        for rel in library.relations.values() {
            groups
                .entry((rel.risk_pattern.clone(), rel.usecase.clone(), rel.threat.clone()))
                .or_default()
                .push(rel);
        }

        for ((rp_uuid, _uc, threat_uuid), rels) in &groups {
            let rp_ref = Self::risk_pattern_ref(library, rp_uuid);
            let threat_ref = Self::threat_ref(version, threat_uuid);
            if is_unmitigated_exception(&rp_ref, &threat_ref) {
                continue;
            }

            let mut seen: HashSet<&str> = HashSet::new();
            let mut sum: i64 = 0;
            for rel in rels {
                if !rel.control.is_empty() && seen.insert(rel.control.as_str()) {
                    sum += rel.mitigation.parse::<i64>().unwrap_or(0);
                }
            }
            if !seen.is_empty() && sum != 100 {
                errors.push(format!("{rp_ref} -> {threat_ref} -> Error with mitigation: {sum}"));
            }
        }
        Ok(errors)
    }

    /// Rebalance every threat of one library in place.
    pub fn balance_mitigation(&mut self, version_ref: &str, library_ref: &str) -> Result<()> {
        info!(version = version_ref, library = library_ref, "balancing mitigations");
        let version = self.version(version_ref)?.clone();
        let library = self.library_mut(version_ref, library_ref)?;

        let mut groups: IndexMap<(String, String, String), Vec<String>> = IndexMap::new();
        for rel in library.relations.values() {
            groups
                .entry((rel.risk_pattern.clone(), rel.usecase.clone(), rel.threat.clone()))
                .or_default()
                .push(rel.uuid.clone());
        }

        for ((rp_uuid, _uc, threat_uuid), uuids) in groups {
            let rp_ref = Self::risk_pattern_ref(library, &rp_uuid);
            let threat_ref = Self::threat_ref(&version, &threat_uuid);
            if is_unmitigated_exception(&rp_ref, &threat_ref) {
                debug!(%rp_ref, %threat_ref, "skipping unmitigated exception");
                continue;
            }

            let mut group: Vec<Relation> = uuids
                .iter()
                .filter_map(|uuid| library.relations.get(uuid))
                .map(|r| r.as_core())
                .collect();
            balance_threat(&mut group, BALANCE_GOAL);
            for (uuid, balanced) in uuids.iter().zip(group) {
                if let Some(rel) = library.relations.get_mut(uuid) {
                    rel.mitigation = balanced.mitigation;
                }
            }
        }
        Ok(())
    }

    // -- merge -------------------------------------------------------------

    /// Merge one library into another, skipping anything already present
    /// by identity. Across versions the shared version-scoped tables move
    /// too. Returns a human-readable log of what was added.
    pub fn merge_libraries(&mut self, request: &MergeRequest) -> Result<Vec<String>> {
        let equal_version = request.src_version == request.dst_version;
        let src_version = self.version(&request.src_version)?.clone();
        let src_library = src_version
            .get_library(&request.src_library)
            .cloned()
            .ok_or_else(|| {
                ThreatsmithError::from(WorkspaceError::LibraryNotFound {
                    version: request.src_version.clone(),
                    library: request.src_library.clone(),
                })
            })?;

        let mut result = Vec::new();
        let mut categories_to_copy: Vec<String> = Vec::new();

        {
            let dst_library = self.library_mut(&request.dst_version, &request.dst_library)?;

            for component in src_library.component_definitions.values() {
                if !dst_library.component_definitions.contains_key(&component.uuid) {
                    dst_library
                        .component_definitions
                        .insert(component.uuid.clone(), component.clone());
                    result.push(format!("Added component {}", component.ref_));
                    if !equal_version {
                        categories_to_copy.push(component.category_ref.clone());
                    }
                }
            }

            for rule in &src_library.rules {
                if !dst_library.rules.contains(rule) {
                    dst_library.rules.push(rule.clone());
                    result.push(format!("Added rule {}", rule.name));
                }
            }

            for rp in src_library.risk_patterns.values() {
                if !dst_library.risk_patterns.contains_key(&rp.uuid) {
                    dst_library.risk_patterns.insert(rp.uuid.clone(), rp.clone());
                    result.push(format!("Added risk pattern {}", rp.ref_));
                }
            }

            for rel in src_library.relations.values() {
                if !dst_library.relations.contains_key(&rel.uuid) {
                    dst_library.relations.insert(rel.uuid.clone(), rel.clone());
                    result.push(format!("Added relation {}", rel.uuid));
                }
            }
        }

        let dst_version = self.version_mut(&request.dst_version)?;

        for standard in src_version.standards.values() {
            if !dst_version.standards.contains_key(&standard.uuid) {
                dst_version
                    .standards
                    .insert(standard.uuid.clone(), standard.clone());
                result.push(format!("Added standard {}", standard.uuid));
            }
        }

        if !equal_version {
            for category_ref in categories_to_copy {
                let found = src_version
                    .categories
                    .values()
                    .find(|c| c.ref_ == category_ref)
                    .cloned();
                if let Some(category) = found {
                    if !dst_version.categories.contains_key(&category.uuid) {
                        dst_version
                            .categories
                            .insert(category.uuid.clone(), category.clone());
                        result.push(format!("Added category {}", category.ref_));
                    }
                }
            }

            for usecase in src_version.usecases.values() {
                if !dst_version.usecases.contains_key(&usecase.uuid) {
                    dst_version.usecases.insert(usecase.uuid.clone(), usecase.clone());
                    result.push(format!("Added use case {}", usecase.ref_));
                }
            }

            for threat in src_version.threats.values() {
                if !dst_version.threats.contains_key(&threat.uuid) {
                    dst_version.threats.insert(threat.uuid.clone(), threat.clone());
                    result.push(format!("Added threat {}", threat.ref_));
                }
                copy_references(&src_version, dst_version, &threat.references, &mut result);
            }

            for weakness in src_version.weaknesses.values() {
                if !dst_version.weaknesses.contains_key(&weakness.uuid) {
                    dst_version
                        .weaknesses
                        .insert(weakness.uuid.clone(), weakness.clone());
                    result.push(format!("Added weakness {}", weakness.ref_));
                }
                copy_references(&src_version, dst_version, &weakness.test_references, &mut result);
            }

            for control in src_version.controls.values() {
                if !dst_version.controls.contains_key(&control.uuid) {
                    dst_version.controls.insert(control.uuid.clone(), control.clone());
                    result.push(format!("Added control {}", control.ref_));
                }
                copy_references(&src_version, dst_version, &control.references, &mut result);
                copy_references(&src_version, dst_version, &control.test_references, &mut result);
            }
        }

        Ok(result)
    }

    /// Merge every library of a version into one synthetic full library
    /// living in its own `full-version-<source>` version.
    pub fn generate_full_library(&mut self, source: &str) -> Result<String> {
        let full_version = format!("full-version-{source}");
        let full_library = format!("full-library-{source}");

        let library_refs: Vec<String> = self.version(source)?.libraries.keys().cloned().collect();

        if self.project.versions.contains_key(&full_version) {
            self.delete_version(&full_version);
        }
        self.create_version(&full_version)?;
        self.create_library(&full_version, &full_library)?;

        for library_ref in library_refs {
            self.merge_libraries(&MergeRequest {
                src_version: source.to_string(),
                src_library: library_ref,
                dst_version: full_version.clone(),
                dst_library: full_library.clone(),
            })?;
        }
        Ok(full_version)
    }

    // -- hygiene -----------------------------------------------------------

    /// No risk pattern ref may repeat across sibling libraries of one
    /// version; merging would silently collide otherwise.
    pub fn check_duplicated_risk_patterns(&self, version_ref: &str) -> Result<Vec<String>> {
        let version = self.version(version_ref)?;
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for library in version.libraries.values() {
            for rp in library.risk_patterns.values() {
                *counts.entry(rp.ref_.as_str()).or_insert(0) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(ref_, count)| format!("Risk pattern {ref_} appears {count} times"))
            .collect())
    }

    /// The "clean unused elements" sweep at version scope: drop shared
    /// elements no library references any more. Returns what was removed.
    pub fn clean_version(&mut self, version_ref: &str) -> Result<Vec<String>> {
        info!(version = version_ref, "cleaning unused elements");
        let version = self.version_mut(version_ref)?;

        let mut used_usecases = HashSet::new();
        let mut used_threats = HashSet::new();
        let mut used_weaknesses = HashSet::new();
        let mut used_controls = HashSet::new();
        let mut used_categories = HashSet::new();
        for library in version.libraries.values() {
            for rel in library.relations.values() {
                used_usecases.insert(rel.usecase.clone());
                used_threats.insert(rel.threat.clone());
                used_weaknesses.insert(rel.weakness.clone());
                used_controls.insert(rel.control.clone());
            }
            for component in library.component_definitions.values() {
                used_categories.insert(component.category_ref.clone());
            }
        }

        let mut removed = Vec::new();
        version.usecases.retain(|uuid, uc| {
            let keep = used_usecases.contains(uuid);
            if !keep {
                removed.push(format!("usecase {}", uc.ref_));
            }
            keep
        });
        version.threats.retain(|uuid, t| {
            let keep = used_threats.contains(uuid);
            if !keep {
                removed.push(format!("threat {}", t.ref_));
            }
            keep
        });
        version.weaknesses.retain(|uuid, w| {
            let keep = used_weaknesses.contains(uuid);
            if !keep {
                removed.push(format!("weakness {}", w.ref_));
            }
            keep
        });
        version.controls.retain(|uuid, c| {
            let keep = used_controls.contains(uuid);
            if !keep {
                removed.push(format!("control {}", c.ref_));
            }
            keep
        });
        version.categories.retain(|_, category| {
            let keep = used_categories.contains(&category.ref_);
            if !keep {
                removed.push(format!("category {}", category.ref_));
            }
            keep
        });

        // References and standards are reachable only through surviving
        // elements.
        let mut used_references = HashSet::new();
        let mut used_standards = HashSet::new();
        for threat in version.threats.values() {
            used_references.extend(threat.references.iter().cloned());
        }
        for weakness in version.weaknesses.values() {
            used_references.extend(weakness.test_references.iter().cloned());
        }
        for control in version.controls.values() {
            used_references.extend(control.references.iter().cloned());
            used_references.extend(control.test_references.iter().cloned());
            used_standards.extend(control.standards.iter().cloned());
        }
        version.references.retain(|uuid, r| {
            let keep = used_references.contains(uuid);
            if !keep {
                removed.push(format!("reference {}", r.name));
            }
            keep
        });
        version.standards.retain(|uuid, s| {
            let keep = used_standards.contains(uuid);
            if !keep {
                removed.push(format!("standard {}:{}", s.supported_standard_ref, s.standard_ref));
            }
            keep
        });

        let used_supported: HashSet<String> = version
            .standards
            .values()
            .map(|s| s.supported_standard_ref.clone())
            .collect();
        version.supported_standards.retain(|_, s| {
            let keep = used_supported.contains(&s.ref_);
            if !keep {
                removed.push(format!("supported standard {}", s.ref_));
            }
            keep
        });

        Ok(removed)
    }

    /// Normalize non-ASCII characters across every entity of a version.
    pub fn fix_non_ascii(&mut self, version_ref: &str) -> Result<()> {
        let version = self.version_mut(version_ref)?;
        for library in version.libraries.values_mut() {
            for rp in library.risk_patterns.values_mut() {
                rp.name = replace_non_ascii(&rp.name);
                rp.desc = replace_non_ascii(&rp.desc);
            }
            for component in library.component_definitions.values_mut() {
                component.name = replace_non_ascii(&component.name);
                component.desc = replace_non_ascii(&component.desc);
            }
        }
        for usecase in version.usecases.values_mut() {
            usecase.name = replace_non_ascii(&usecase.name);
            usecase.desc = replace_non_ascii(&usecase.desc);
        }
        for threat in version.threats.values_mut() {
            threat.name = replace_non_ascii(&threat.name);
            threat.desc = replace_non_ascii(&threat.desc);
        }
        for weakness in version.weaknesses.values_mut() {
            weakness.name = replace_non_ascii(&weakness.name);
            weakness.desc = replace_non_ascii(&weakness.desc);
            weakness.test_steps = replace_non_ascii(&weakness.test_steps);
        }
        for control in version.controls.values_mut() {
            control.name = replace_non_ascii(&control.name);
            control.desc = replace_non_ascii(&control.desc);
            control.test_steps = replace_non_ascii(&control.test_steps);
        }
        Ok(())
    }

    // -- element CRUD ------------------------------------------------------
    //
    // Shared elements live at version scope, keyed by uuid; risk
    // patterns, component definitions and relations at library scope.
    // Adding mints a uuid when the element does not carry one yet.

    pub fn add_threat(
        &mut self,
        version_ref: &str,
        mut threat: crate::workspace::model::WsThreat,
    ) -> Result<String> {
        if threat.uuid.is_empty() {
            threat.uuid = crate::workspace::model::new_uuid();
        }
        let uuid = threat.uuid.clone();
        self.version_mut(version_ref)?.threats.insert(uuid.clone(), threat);
        Ok(uuid)
    }

    pub fn delete_threat(&mut self, version_ref: &str, uuid: &str) -> Result<()> {
        self.version_mut(version_ref)?
            .threats
            .shift_remove(uuid)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::ElementNotFound(uuid.to_string()).into())
    }

    pub fn add_weakness(
        &mut self,
        version_ref: &str,
        mut weakness: crate::workspace::model::WsWeakness,
    ) -> Result<String> {
        if weakness.uuid.is_empty() {
            weakness.uuid = crate::workspace::model::new_uuid();
        }
        let uuid = weakness.uuid.clone();
        self.version_mut(version_ref)?.weaknesses.insert(uuid.clone(), weakness);
        Ok(uuid)
    }

    pub fn delete_weakness(&mut self, version_ref: &str, uuid: &str) -> Result<()> {
        self.version_mut(version_ref)?
            .weaknesses
            .shift_remove(uuid)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::ElementNotFound(uuid.to_string()).into())
    }

    pub fn add_control(
        &mut self,
        version_ref: &str,
        mut control: crate::workspace::model::WsControl,
    ) -> Result<String> {
        if control.uuid.is_empty() {
            control.uuid = crate::workspace::model::new_uuid();
        }
        let uuid = control.uuid.clone();
        self.version_mut(version_ref)?.controls.insert(uuid.clone(), control);
        Ok(uuid)
    }

    pub fn delete_control(&mut self, version_ref: &str, uuid: &str) -> Result<()> {
        self.version_mut(version_ref)?
            .controls
            .shift_remove(uuid)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::ElementNotFound(uuid.to_string()).into())
    }

    pub fn add_usecase(
        &mut self,
        version_ref: &str,
        mut usecase: crate::workspace::model::WsUseCase,
    ) -> Result<String> {
        if usecase.uuid.is_empty() {
            usecase.uuid = crate::workspace::model::new_uuid();
        }
        let uuid = usecase.uuid.clone();
        self.version_mut(version_ref)?.usecases.insert(uuid.clone(), usecase);
        Ok(uuid)
    }

    pub fn add_reference(&mut self, version_ref: &str, name: &str, url: &str) -> Result<String> {
        let uuid = crate::workspace::model::new_uuid();
        self.version_mut(version_ref)?.references.insert(
            uuid.clone(),
            crate::workspace::model::WsReference {
                uuid: uuid.clone(),
                name: name.to_string(),
                url: url.to_string(),
            },
        );
        Ok(uuid)
    }

    pub fn delete_reference(&mut self, version_ref: &str, uuid: &str) -> Result<()> {
        self.version_mut(version_ref)?
            .references
            .shift_remove(uuid)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::ElementNotFound(uuid.to_string()).into())
    }

    pub fn add_relation(
        &mut self,
        version_ref: &str,
        library_ref: &str,
        relation: crate::workspace::model::WsRelation,
    ) -> Result<String> {
        let uuid = relation.uuid.clone();
        self.library_mut(version_ref, library_ref)?
            .relations
            .insert(uuid.clone(), relation);
        Ok(uuid)
    }

    pub fn delete_relation(&mut self, version_ref: &str, library_ref: &str, uuid: &str) -> Result<()> {
        self.library_mut(version_ref, library_ref)?
            .relations
            .shift_remove(uuid)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::ElementNotFound(uuid.to_string()).into())
    }

    pub fn add_risk_pattern(
        &mut self,
        version_ref: &str,
        library_ref: &str,
        mut risk_pattern: crate::workspace::model::WsRiskPattern,
    ) -> Result<String> {
        if risk_pattern.uuid.is_empty() {
            risk_pattern.uuid = crate::workspace::model::new_uuid();
        }
        let uuid = risk_pattern.uuid.clone();
        self.library_mut(version_ref, library_ref)?
            .risk_patterns
            .insert(uuid.clone(), risk_pattern);
        Ok(uuid)
    }

    pub fn delete_risk_pattern(&mut self, version_ref: &str, library_ref: &str, uuid: &str) -> Result<()> {
        self.library_mut(version_ref, library_ref)?
            .risk_patterns
            .shift_remove(uuid)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::ElementNotFound(uuid.to_string()).into())
    }

    // -- reports -----------------------------------------------------------

    pub fn library_report(&self, version_ref: &str, library_ref: &str) -> Result<LibraryReport> {
        let library = self.library(version_ref, library_ref)?;
        let mut usecases = HashSet::new();
        let mut threats = HashSet::new();
        for rel in library.relations.values() {
            usecases.insert(rel.usecase.as_str());
            threats.insert(rel.threat.as_str());
        }
        Ok(LibraryReport {
            library_ref: library.ref_.clone(),
            library_name: library.name.clone(),
            library_desc: library.desc.clone(),
            revision: library.revision.clone(),
            enabled: library.enabled.clone(),
            library_filename: library.filename.clone(),
            num_component_definitions: library.component_definitions.len(),
            num_risk_patterns: library.risk_patterns.len(),
            num_rules: library.rules.len(),
            num_usecases: usecases.len(),
            num_threats: threats.len(),
        })
    }

    pub fn version_report(&self, version_ref: &str) -> Result<VersionReport> {
        let version = self.version(version_ref)?;
        let mut library_reports = Vec::new();
        for library_ref in version.libraries.keys() {
            library_reports.push(self.library_report(version_ref, library_ref)?);
        }
        Ok(VersionReport {
            version: version.version.clone(),
            num_libraries: version.libraries.len(),
            num_risk_patterns: version.libraries.values().map(|l| l.risk_patterns.len()).sum(),
            num_usecases: version.usecases.len(),
            num_threats: version.threats.len(),
            num_weaknesses: version.weaknesses.len(),
            num_controls: version.controls.len(),
            num_references: version.references.len(),
            num_standards: version.standards.len(),
            num_categories: version.categories.len(),
            num_components: version
                .libraries
                .values()
                .map(|l| l.component_definitions.len())
                .sum(),
            num_rules: version.libraries.values().map(|l| l.rules.len()).sum(),
            library_reports,
        })
    }

    // -- persistence -------------------------------------------------------

    pub fn save_project(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}.{PROJECT_EXTENSION}", self.project.ref_));
        let json = serde_json::to_string_pretty(&self.project)
            .map_err(|e| ThreatsmithError::Internal(e.to_string()))?;
        fs::write(&path, json)
            .map_err(|e| ThreatsmithError::Internal(format!("cannot write {}: {e}", path.display())))?;
        info!(path = %path.display(), "project saved");
        Ok(path)
    }

    pub fn load_project(dir: &Path, project_ref: &str) -> Result<Self> {
        let path = dir.join(format!("{project_ref}.{PROJECT_EXTENSION}"));
        let content = fs::read_to_string(&path)
            .map_err(|e| ThreatsmithError::Internal(format!("cannot read {}: {e}", path.display())))?;
        let project: Project = serde_json::from_str(&content)
            .map_err(|e| ThreatsmithError::Internal(format!("corrupted project file: {e}")))?;
        Ok(Self::from_project(project))
    }

    pub fn list_stored(dir: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(PROJECT_EXTENSION) {
                    path.file_stem().and_then(|s| s.to_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }
}

fn copy_references(
    src_version: &Version,
    dst_version: &mut Version,
    reference_uuids: &[String],
    result: &mut Vec<String>,
) {
    for uuid in reference_uuids {
        if !dst_version.references.contains_key(uuid) {
            if let Some(reference) = src_version.references.get(uuid) {
                dst_version.references.insert(uuid.clone(), reference.clone());
                result.push(format!("Added reference {uuid}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::model::{
        WsControl, WsReference, WsRelation, WsRiskPattern, WsThreat, WsUseCase,
    };

    fn workspace_with_library() -> Workspace {
        let mut ws = Workspace::new("demo", "Demo", "Demo project").expect("workspace");
        ws.create_version("v1").expect("version");
        ws.create_library("v1", "lib-a").expect("library");

        let version = ws.version_mut("v1").expect("v1");
        version.usecases.insert(
            "uc-1".to_string(),
            WsUseCase {
                uuid: "uc-1".to_string(),
                ref_: "General".to_string(),
                name: "General".to_string(),
                desc: String::new(),
            },
        );
        version.threats.insert(
            "t-1".to_string(),
            WsThreat {
                uuid: "t-1".to_string(),
                ref_: "T-1".to_string(),
                name: "Threat".to_string(),
                desc: "x".to_string(),
                ..Default::default()
            },
        );
        version.controls.insert(
            "c-1".to_string(),
            WsControl {
                uuid: "c-1".to_string(),
                ref_: "C-1".to_string(),
                name: "Control".to_string(),
                desc: "x".to_string(),
                ..Default::default()
            },
        );
        version.controls.insert(
            "c-2".to_string(),
            WsControl {
                uuid: "c-2".to_string(),
                ref_: "C-2".to_string(),
                name: "Other control".to_string(),
                desc: "x".to_string(),
                ..Default::default()
            },
        );

        let library = version.get_library_mut("lib-a").expect("lib");
        library.risk_patterns.insert(
            "rp-1".to_string(),
            WsRiskPattern {
                uuid: "rp-1".to_string(),
                ref_: "RP-1".to_string(),
                name: "Pattern".to_string(),
                desc: "x".to_string(),
            },
        );
        for (uuid, control, mitigation) in
            [("rel-1", "c-1", "40"), ("rel-2", "c-2", "40")]
        {
            library.relations.insert(
                uuid.to_string(),
                WsRelation {
                    uuid: uuid.to_string(),
                    risk_pattern: "rp-1".to_string(),
                    usecase: "uc-1".to_string(),
                    threat: "t-1".to_string(),
                    weakness: String::new(),
                    control: control.to_string(),
                    mitigation: mitigation.to_string(),
                },
            );
        }
        ws
    }

    #[test]
    fn test_safe_refs() {
        assert!(is_safe_ref("v1-2026"));
        assert!(!is_safe_ref("v1 2026"));
        assert!(!is_safe_ref("v1/2026"));
        assert!(!is_safe_ref(""));
    }

    #[test]
    fn test_version_lifecycle() {
        let mut ws = Workspace::new("demo", "Demo", "").expect("workspace");
        ws.create_version("v1").expect("create");
        assert!(ws.create_version("v1").is_err(), "duplicate version rejected");
        assert!(ws.create_version("v 1").is_err(), "unsafe ref rejected");

        ws.copy_version("v1", "v2").expect("copy");
        assert!(ws.version("v2").is_ok());
        ws.delete_version("v1");
        assert!(ws.version("v1").is_err());
    }

    #[test]
    fn test_check_mitigation_flags_wrong_sum() {
        let ws = workspace_with_library();
        let errors = ws.check_mitigation("v1", "lib-a").expect("check");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Error with mitigation: 80"));
        assert!(errors[0].contains("RP-1 -> T-1"));
    }

    #[test]
    fn test_balance_mitigation_fixes_sums() {
        let mut ws = workspace_with_library();
        ws.balance_mitigation("v1", "lib-a").expect("balance");
        let errors = ws.check_mitigation("v1", "lib-a").expect("check");
        assert!(errors.is_empty(), "{errors:?}");
        let library = ws.library("v1", "lib-a").expect("lib");
        let values: Vec<&str> = library
            .relations
            .values()
            .map(|r| r.mitigation.as_str())
            .collect();
        assert_eq!(values, ["50", "50"]);
    }

    #[test]
    fn test_relations_in_tree_skips_missing_mitigation() {
        let mut ws = workspace_with_library();
        let library = ws.library_mut("v1", "lib-a").expect("lib");
        library.relations.insert(
            "rel-3".to_string(),
            WsRelation {
                uuid: "rel-3".to_string(),
                risk_pattern: "rp-1".to_string(),
                usecase: "uc-1".to_string(),
                threat: "t-1".to_string(),
                weakness: String::new(),
                control: "c-9".to_string(),
                mitigation: String::new(),
            },
        );
        let library = ws.library("v1", "lib-a").expect("lib");
        let tree = Workspace::relations_in_tree(library);
        let threat = &tree["rp-1"].usecases["uc-1"].threats["t-1"];
        assert_eq!(threat.orphaned_controls.len(), 2, "rel-3 must be skipped");
    }

    #[test]
    fn test_merge_into_other_version_copies_shared_tables() {
        let mut ws = workspace_with_library();
        // Give the threat a reference so the reference table must follow.
        {
            let version = ws.version_mut("v1").expect("v1");
            version.references.insert(
                "ref-1".to_string(),
                WsReference {
                    uuid: "ref-1".to_string(),
                    name: "OWASP".to_string(),
                    url: "https://owasp.org".to_string(),
                },
            );
            version.threats.get_mut("t-1").expect("t-1").references = vec!["ref-1".to_string()];
        }
        ws.create_version("v2").expect("v2");
        ws.create_library("v2", "lib-b").expect("lib-b");

        let log = ws
            .merge_libraries(&MergeRequest {
                src_version: "v1".to_string(),
                src_library: "lib-a".to_string(),
                dst_version: "v2".to_string(),
                dst_library: "lib-b".to_string(),
            })
            .expect("merge");

        assert!(log.iter().any(|l| l.contains("Added risk pattern RP-1")));
        assert!(log.iter().any(|l| l.contains("Added threat T-1")));
        assert!(log.iter().any(|l| l.contains("Added reference ref-1")));
        let v2 = ws.version("v2").expect("v2");
        assert!(v2.threats.contains_key("t-1"));
        assert!(v2.references.contains_key("ref-1"));
        assert_eq!(v2.get_library("lib-b").expect("lib-b").relations.len(), 2);
    }

    #[test]
    fn test_merge_is_idempotent_by_identity() {
        let mut ws = workspace_with_library();
        ws.create_version("v2").expect("v2");
        ws.create_library("v2", "lib-b").expect("lib-b");
        let request = MergeRequest {
            src_version: "v1".to_string(),
            src_library: "lib-a".to_string(),
            dst_version: "v2".to_string(),
            dst_library: "lib-b".to_string(),
        };
        ws.merge_libraries(&request).expect("first merge");
        let second = ws.merge_libraries(&request).expect("second merge");
        assert!(second.is_empty(), "everything already present: {second:?}");
    }

    #[test]
    fn test_generate_full_library() {
        let mut ws = workspace_with_library();
        ws.create_library("v1", "lib-b").expect("lib-b");
        let full = ws.generate_full_library("v1").expect("full");
        assert_eq!(full, "full-version-v1");
        let library = ws.library(&full, "full-library-v1").expect("full library");
        assert_eq!(library.relations.len(), 2);
    }

    #[test]
    fn test_duplicated_risk_patterns_across_libraries() {
        let mut ws = workspace_with_library();
        ws.create_library("v1", "lib-b").expect("lib-b");
        let library = ws.library_mut("v1", "lib-b").expect("lib-b");
        library.risk_patterns.insert(
            "rp-other".to_string(),
            WsRiskPattern {
                uuid: "rp-other".to_string(),
                ref_: "RP-1".to_string(),
                name: "Duplicate".to_string(),
                desc: String::new(),
            },
        );
        let errors = ws.check_duplicated_risk_patterns("v1").expect("check");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("RP-1"));
        assert!(errors[0].contains("2 times"));
    }

    #[test]
    fn test_clean_version_removes_unreferenced() {
        let mut ws = workspace_with_library();
        {
            let version = ws.version_mut("v1").expect("v1");
            version.threats.insert(
                "t-unused".to_string(),
                WsThreat {
                    uuid: "t-unused".to_string(),
                    ref_: "T-UNUSED".to_string(),
                    name: "Unused".to_string(),
                    desc: "x".to_string(),
                    ..Default::default()
                },
            );
            version.references.insert(
                "ref-unused".to_string(),
                WsReference {
                    uuid: "ref-unused".to_string(),
                    name: "Unused".to_string(),
                    url: "https://example.com".to_string(),
                },
            );
        }
        let removed = ws.clean_version("v1").expect("clean");
        assert!(removed.iter().any(|r| r.contains("T-UNUSED")));
        assert!(removed.iter().any(|r| r.contains("reference Unused")));
        let version = ws.version("v1").expect("v1");
        assert!(version.threats.contains_key("t-1"), "used threat survives");
    }

    #[test]
    fn test_fix_non_ascii() {
        let mut ws = workspace_with_library();
        ws.version_mut("v1")
            .expect("v1")
            .threats
            .get_mut("t-1")
            .expect("t-1")
            .desc = "em\u{2014}dash".to_string();
        ws.fix_non_ascii("v1").expect("fix");
        assert_eq!(ws.version("v1").expect("v1").threats["t-1"].desc, "em-dash");
    }

    #[test]
    fn test_reports() {
        let ws = workspace_with_library();
        let report = ws.version_report("v1").expect("report");
        assert_eq!(report.num_libraries, 1);
        assert_eq!(report.num_threats, 1);
        assert_eq!(report.num_controls, 2);
        assert_eq!(report.library_reports[0].num_threats, 1);
        assert_eq!(report.library_reports[0].num_usecases, 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let ws = workspace_with_library();
        ws.save_project(dir.path()).expect("save");
        assert_eq!(Workspace::list_stored(dir.path()), vec!["demo".to_string()]);

        let loaded = Workspace::load_project(dir.path(), "demo").expect("load");
        assert_eq!(loaded.project(), ws.project());
    }

    #[test]
    fn test_unknown_version_is_not_found() {
        let ws = workspace_with_library();
        assert!(matches!(
            ws.version("missing").expect_err("must fail"),
            ThreatsmithError::Workspace(WorkspaceError::VersionNotFound(_))
        ));
    }

    #[test]
    fn test_element_crud_mints_uuids() {
        let mut ws = workspace_with_library();
        let uuid = ws
            .add_threat(
                "v1",
                WsThreat {
                    ref_: "T-NEW".to_string(),
                    name: "New threat".to_string(),
                    desc: "x".to_string(),
                    ..Default::default()
                },
            )
            .expect("add");
        assert!(!uuid.is_empty());
        assert_eq!(ws.version("v1").expect("v1").threats[&uuid].ref_, "T-NEW");

        ws.delete_threat("v1", &uuid).expect("delete");
        assert!(ws.delete_threat("v1", &uuid).is_err(), "already gone");

        let ref_uuid = ws
            .add_reference("v1", "OWASP", "https://owasp.org")
            .expect("reference");
        ws.delete_reference("v1", &ref_uuid).expect("delete reference");

        let rel_uuid = ws
            .add_relation("v1", "lib-a", WsRelation::new("rp-1", "uc-1", "t-1", "", "c-1", "0"))
            .expect("relation");
        ws.delete_relation("v1", "lib-a", &rel_uuid).expect("delete relation");
    }

    #[test]
    fn test_update_library_and_revision() {
        let mut ws = workspace_with_library();
        ws.update_library(
            "v1",
            "lib-a",
            &LibraryUpdate {
                name: "Renamed".to_string(),
                desc: "New desc".to_string(),
                revision: "3".to_string(),
                filename: "lib-a.xml".to_string(),
                enabled: "true".to_string(),
            },
        )
        .expect("update");
        ws.increment_library_revision("v1", "lib-a").expect("bump");
        let library = ws.library("v1", "lib-a").expect("lib");
        assert_eq!(library.name, "Renamed");
        assert_eq!(library.revision, "4");
    }
}
