//! Changelog generation: field-by-field diffs of a library's scalar
//! attributes between two versions, per-version library summaries, and a
//! set-difference changelog over relations.

use crate::errors::Result;
use crate::workspace::model::{Library, Version, WsRelation};
use crate::workspace::service::Workspace;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LibraryDiff {
    pub library_ref: String,
    pub changes: Vec<FieldChange>,
    pub rev_first: String,
    pub rev_second: String,
    /// Content drifted but the revision number was not bumped.
    pub equal_revision_number: bool,
}

impl LibraryDiff {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty() || self.equal_revision_number
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VersionDiff {
    pub added_libraries: Vec<String>,
    pub deleted_libraries: Vec<String>,
    pub libraries: IndexMap<String, LibraryDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LibraryStatus {
    Added,
    Deleted,
    Modified,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibrarySummary {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub name: String,
    pub status: LibraryStatus,
    pub old_revision: Option<String>,
    pub new_revision: Option<String>,
    pub has_changes: bool,
}

/// A relation widened with its owning library, hashable so set
/// differences work directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExtendedRelation {
    pub library_ref: String,
    pub risk_pattern: String,
    pub usecase: String,
    pub threat: String,
    pub weakness: String,
    pub control: String,
    pub mitigation: String,
}

impl ExtendedRelation {
    fn from_relation(library_ref: &str, relation: &WsRelation) -> Self {
        Self {
            library_ref: library_ref.to_string(),
            risk_pattern: relation.risk_pattern.clone(),
            usecase: relation.usecase.clone(),
            threat: relation.threat.clone(),
            weakness: relation.weakness.clone(),
            control: relation.control.clone(),
            mitigation: relation.mitigation.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelationsChangelog {
    pub added: Vec<ExtendedRelation>,
    pub deleted: Vec<ExtendedRelation>,
    /// Controls appearing in new relations that the old version did not
    /// know at all, grouped by control.
    pub new_countermeasures: IndexMap<String, Vec<ExtendedRelation>>,
}

fn field_change(changes: &mut Vec<FieldChange>, field: &str, old: &str, new: &str) {
    if old != new {
        changes.push(FieldChange {
            field: field.to_string(),
            old: old.to_string(),
            new: new.to_string(),
        });
    }
}

/// Whether two renditions of one library differ in content (ignoring the
/// scalar header fields the diff reports separately).
fn library_content_differs(first: &Library, second: &Library) -> bool {
    let relations = |lib: &Library| -> HashSet<ExtendedRelation> {
        lib.relations
            .values()
            .map(|r| ExtendedRelation::from_relation(&lib.ref_, r))
            .collect()
    };
    relations(first) != relations(second)
        || first.risk_patterns != second.risk_patterns
        || first.component_definitions != second.component_definitions
        || first.rules != second.rules
}

/// Diff one library's scalar attributes between two renditions. Flags the
/// case where content drifted without a revision bump.
pub fn diff_library(first: &Library, second: &Library) -> LibraryDiff {
    let mut changes = Vec::new();
    field_change(&mut changes, "revision", &first.revision, &second.revision);
    field_change(&mut changes, "ref", &first.ref_, &second.ref_);
    field_change(&mut changes, "name", &first.name, &second.name);
    field_change(&mut changes, "desc", &first.desc, &second.desc);
    field_change(&mut changes, "filename", &first.filename, &second.filename);
    field_change(&mut changes, "enabled", &first.enabled, &second.enabled);

    let content_drifted = library_content_differs(first, second);
    let equal_revision_number =
        (content_drifted || !changes.is_empty()) && first.revision == second.revision;
    if equal_revision_number {
        info!(library = %second.ref_, "library changed but kept the same revision number");
    }

    LibraryDiff {
        library_ref: second.ref_.clone(),
        changes,
        rev_first: first.revision.clone(),
        rev_second: second.revision.clone(),
        equal_revision_number,
    }
}

/// Diff every library shared between two versions, reporting additions
/// and deletions on the side.
pub fn diff_versions(first: &Version, second: &Version) -> VersionDiff {
    let mut diff = VersionDiff::default();

    for (library_ref, library) in &first.libraries {
        match second.libraries.get(library_ref) {
            Some(other) => {
                diff.libraries
                    .insert(library_ref.clone(), diff_library(library, other));
            }
            None => diff.deleted_libraries.push(library.name.clone()),
        }
    }
    for (library_ref, library) in &second.libraries {
        if !first.libraries.contains_key(library_ref) {
            diff.added_libraries.push(library.name.clone());
        }
    }

    diff
}

/// Per-library summaries of what changed between two versions.
pub fn library_summaries(first: &Version, second: &Version) -> Vec<LibrarySummary> {
    let mut summaries = Vec::new();

    for (library_ref, library) in &second.libraries {
        if !first.libraries.contains_key(library_ref) {
            summaries.push(LibrarySummary {
                ref_: library.ref_.clone(),
                name: library.name.clone(),
                status: LibraryStatus::Added,
                old_revision: None,
                new_revision: Some(library.revision.clone()),
                has_changes: true,
            });
        }
    }
    for (library_ref, library) in &first.libraries {
        if !second.libraries.contains_key(library_ref) {
            summaries.push(LibrarySummary {
                ref_: library.ref_.clone(),
                name: library.name.clone(),
                status: LibraryStatus::Deleted,
                old_revision: Some(library.revision.clone()),
                new_revision: None,
                has_changes: true,
            });
        }
    }
    for (library_ref, old_library) in &first.libraries {
        if let Some(new_library) = second.libraries.get(library_ref) {
            let diff = diff_library(old_library, new_library);
            summaries.push(LibrarySummary {
                ref_: new_library.ref_.clone(),
                name: new_library.name.clone(),
                status: LibraryStatus::Modified,
                old_revision: Some(old_library.revision.clone()),
                new_revision: Some(new_library.revision.clone()),
                has_changes: diff.has_changes(),
            });
        }
    }

    summaries
}

/// Set-difference changelog over every relation of two versions.
pub fn relations_changelog(first: &Version, second: &Version) -> RelationsChangelog {
    let collect = |version: &Version| -> HashSet<ExtendedRelation> {
        version
            .libraries
            .values()
            .flat_map(|lib| {
                lib.relations
                    .values()
                    .map(|r| ExtendedRelation::from_relation(&lib.ref_, r))
            })
            .collect()
    };

    let old_relations = collect(first);
    let new_relations = collect(second);

    let mut added: Vec<ExtendedRelation> = new_relations.difference(&old_relations).cloned().collect();
    let mut deleted: Vec<ExtendedRelation> = old_relations.difference(&new_relations).cloned().collect();
    added.sort_by(|a, b| (&a.library_ref, &a.threat).cmp(&(&b.library_ref, &b.threat)));
    deleted.sort_by(|a, b| (&a.library_ref, &a.threat).cmp(&(&b.library_ref, &b.threat)));

    let mut new_countermeasures: IndexMap<String, Vec<ExtendedRelation>> = IndexMap::new();
    for relation in &added {
        if relation.control.is_empty() {
            continue;
        }
        if !first.controls.contains_key(&relation.control) {
            new_countermeasures
                .entry(relation.control.clone())
                .or_default()
                .push(relation.clone());
        }
    }

    RelationsChangelog {
        added,
        deleted,
        new_countermeasures,
    }
}

/// Convenience wrapper resolving refs through the workspace.
pub fn changelog_between_libraries(
    workspace: &Workspace,
    from_version: &str,
    to_version: &str,
    library_ref: &str,
) -> Result<LibraryDiff> {
    let first = workspace.library(from_version, library_ref)?;
    let second = workspace.library(to_version, library_ref)?;
    Ok(diff_library(first, second))
}
