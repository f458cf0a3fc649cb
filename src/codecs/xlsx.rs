//! Tabular workbook codec for the workspace: one sheet per entity type,
//! positional columns, and a private separator token for multi-valued
//! cells. Styling on export (color bands, alternating rows, width/height
//! normalization) is cosmetic; cell values are the contract.

use crate::errors::{CodecError, Result};
use crate::workspace::model::{
    Library, Rule, RuleAction, RuleCondition, Version, WsCategory, WsComponentDefinition,
    WsControl, WsReference, WsRelation, WsRiskPattern, WsStandard, WsSupportedStandard, WsThreat,
    WsUseCase, WsWeakness,
};
use calamine::{Data, Range, Reader, Xlsx};
use indexmap::IndexMap;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use std::io::Cursor;
use tracing::{debug, info};

/// Joins name:value pairs and plain value lists inside one cell.
pub const SEPARATOR: &str = "##IRIUS##";

// Positional columns. The workbook contract is index-based, not
// header-name based.
mod col {
    pub const COMPONENTS_NAME: usize = 0;
    pub const COMPONENTS_REF: usize = 1;
    pub const COMPONENTS_DESC: usize = 2;
    pub const COMPONENTS_CATEGORY_NAME: usize = 3;
    pub const COMPONENTS_CATEGORY_REF: usize = 4;
    pub const COMPONENTS_CATEGORY_UUID: usize = 5;
    pub const COMPONENTS_RISK_PATTERNS: usize = 6;
    pub const COMPONENTS_VISIBLE: usize = 7;
    pub const COMPONENTS_UUID: usize = 8;

    pub const RULES_NAME: usize = 0;
    pub const RULES_MODULE: usize = 1;
    pub const RULES_GUI: usize = 2;
    pub const RULES_CONDITION_NAME: usize = 3;
    pub const RULES_CONDITION_VALUE: usize = 4;
    pub const RULES_CONDITION_FIELD: usize = 5;
    pub const RULES_ACTION_NAME: usize = 6;
    pub const RULES_ACTION_VALUE: usize = 7;
    pub const RULES_ACTION_PROJECT: usize = 8;
    pub const RULES_LAST: usize = 9;

    pub const SHEET_LAST: usize = 34;
}

struct Palette {
    header: u32,
    row_a: u32,
    row_b: u32,
}

const LIBRARY_PROPERTY: Palette = Palette { header: 0x2A6099, row_a: 0xDEE6EF, row_b: 0xB4C7DC };
const COMPONENT: Palette = Palette { header: 0xFF9900, row_a: 0xFFDBB6, row_b: 0xFFB66C };
const STANDARD: Palette = Palette { header: 0x800080, row_a: 0xE0C2CD, row_b: 0xBF819E };
const RISK_PATTERN: Palette = Palette { header: 0x2A6099, row_a: 0xDEE6EF, row_b: 0xB4C7DC };
const USE_CASE: Palette = Palette { header: 0x800080, row_a: 0xE0C2CD, row_b: 0xBF819E };
const THREAT: Palette = Palette { header: 0xFF0000, row_a: 0xFFD7D7, row_b: 0xFFA6A6 };
const WEAKNESS: Palette = Palette { header: 0x38761D, row_a: 0xDDE8CB, row_b: 0xAFD095 };
const COUNTERMEASURE: Palette = Palette { header: 0xFF9900, row_a: 0xFFDBB6, row_b: 0xFFB66C };
const RULE: Palette = Palette { header: 0x2A6099, row_a: 0xDEE6EF, row_b: 0xB4C7DC };
const RULE_CONDITION: Palette = Palette { header: 0xFF9900, row_a: 0xFFDBB6, row_b: 0xFFB66C };
const RULE_ACTION: Palette = Palette { header: 0x800080, row_a: 0xE0C2CD, row_b: 0xBF819E };

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Import a library workbook into the version. Shared elements land in
/// the version tables, library-scoped ones in a new library registered
/// under its ref. Returns the library ref.
pub fn import_library(filename: &str, bytes: &[u8], version: &mut Version) -> Result<String> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).map_err(|e| CodecError::Parse {
        format: "xlsx".to_string(),
        message: e.to_string(),
    })?;

    let properties = sheet(&mut workbook, "Library properties")?;
    let mut library = Library {
        name: cell(&properties, 1, 1),
        ref_: cell(&properties, 2, 1),
        desc: cell(&properties, 3, 1),
        revision: non_empty_or(cell(&properties, 4, 1), "1"),
        enabled: non_empty_or(cell(&properties, 5, 1), "true"),
        filename: filename.replace(".xlsx", ".xml"),
        ..Default::default()
    };

    import_references(version, &sheet(&mut workbook, "References")?);
    import_supported_standards(version, &sheet(&mut workbook, "Supported standards")?);
    import_standards(version, &sheet(&mut workbook, "Standards")?);
    import_components(version, &mut library, &sheet(&mut workbook, "Components")?);
    import_risk_patterns(&mut library, &sheet(&mut workbook, "Risk Patterns")?);
    import_usecases(version, &sheet(&mut workbook, "Use Cases")?);
    import_threats(version, &sheet(&mut workbook, "Threats")?);
    import_weaknesses(version, &sheet(&mut workbook, "Weaknesses")?);
    import_controls(version, &sheet(&mut workbook, "Controls")?);
    import_relations(&mut library, &sheet(&mut workbook, "Relations")?);
    import_rules(&mut library, &sheet(&mut workbook, "Rules")?);

    let library_ref = library.ref_.clone();
    info!(library = %library_ref, version = %version.version, "workbook imported");
    version.libraries.insert(library_ref.clone(), library);
    Ok(library_ref)
}

fn sheet(workbook: &mut Xlsx<Cursor<&[u8]>>, name: &str) -> Result<Range<Data>> {
    workbook
        .worksheet_range(name)
        .map_err(|_| CodecError::MissingSheet(name.to_string()).into())
}

fn cell(range: &Range<Data>, row: usize, column: usize) -> String {
    match range.get((row, column)) {
        Some(Data::String(s)) => s.clone(),
        Some(Data::Float(f)) if f.fract() == 0.0 => format!("{}", *f as i64),
        Some(Data::Float(f)) => f.to_string(),
        Some(Data::Int(i)) => i.to_string(),
        Some(Data::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn split_cell(value: &str) -> Vec<String> {
    value
        .split(SEPARATOR)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split a `name:value` pair at the first colon.
fn split_pair(value: &str) -> Option<(String, String)> {
    value
        .split_once(':')
        .map(|(a, b)| (a.to_string(), b.to_string()))
}

fn import_references(version: &mut Version, range: &Range<Data>) {
    for row in 1..range.height() {
        let name = cell(range, row, 0);
        let url = cell(range, row, 1);
        let uuid = cell(range, row, 2);
        if !name.is_empty() && !url.is_empty() {
            version
                .references
                .insert(uuid.clone(), WsReference { uuid, name, url });
        }
    }
}

fn import_supported_standards(version: &mut Version, range: &Range<Data>) {
    for row in 1..range.height() {
        let name = cell(range, row, 0);
        let ref_ = cell(range, row, 1);
        let uuid = cell(range, row, 2);
        if !ref_.is_empty() {
            version
                .supported_standards
                .insert(uuid.clone(), WsSupportedStandard { uuid, ref_, name });
        }
    }
}

fn import_standards(version: &mut Version, range: &Range<Data>) {
    for row in 1..range.height() {
        let supported_standard_ref = cell(range, row, 0);
        let standard_ref = cell(range, row, 1);
        let uuid = cell(range, row, 2);
        if !supported_standard_ref.is_empty() {
            version.standards.insert(
                uuid.clone(),
                WsStandard {
                    uuid,
                    supported_standard_ref,
                    standard_ref,
                },
            );
        }
    }
}

fn import_components(version: &mut Version, library: &mut Library, range: &Range<Data>) {
    for row in 1..range.height() {
        let category_ref = cell(range, row, col::COMPONENTS_CATEGORY_REF);
        let category_uuid = cell(range, row, col::COMPONENTS_CATEGORY_UUID);
        if !category_ref.is_empty() && !version.categories.contains_key(&category_uuid) {
            version.categories.insert(
                category_uuid.clone(),
                WsCategory {
                    uuid: category_uuid,
                    ref_: category_ref.clone(),
                    name: cell(range, row, col::COMPONENTS_CATEGORY_NAME),
                },
            );
        }

        let component_ref = cell(range, row, col::COMPONENTS_REF);
        if component_ref.is_empty() {
            continue;
        }
        let uuid = cell(range, row, col::COMPONENTS_UUID);
        let risk_patterns = cell(range, row, col::COMPONENTS_RISK_PATTERNS);
        library.component_definitions.insert(
            uuid.clone(),
            WsComponentDefinition {
                uuid,
                ref_: component_ref,
                name: cell(range, row, col::COMPONENTS_NAME),
                desc: cell(range, row, col::COMPONENTS_DESC),
                category_ref,
                visible: cell(range, row, col::COMPONENTS_VISIBLE),
                risk_pattern_refs: risk_patterns
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        );
    }
}

fn import_risk_patterns(library: &mut Library, range: &Range<Data>) {
    for row in 1..range.height() {
        let ref_ = cell(range, row, 0);
        if ref_.is_empty() {
            continue;
        }
        let uuid = cell(range, row, 3);
        library.risk_patterns.insert(
            uuid.clone(),
            WsRiskPattern {
                uuid,
                ref_,
                name: cell(range, row, 1),
                desc: cell(range, row, 2),
            },
        );
    }
}

fn import_usecases(version: &mut Version, range: &Range<Data>) {
    for row in 1..range.height() {
        let ref_ = cell(range, row, 0);
        if ref_.is_empty() {
            continue;
        }
        let uuid = cell(range, row, 3);
        version.usecases.insert(
            uuid.clone(),
            WsUseCase {
                uuid,
                ref_,
                name: cell(range, row, 1),
                desc: cell(range, row, 2),
            },
        );
    }
}

fn resolve_references(version: &Version, joined: &str) -> Vec<String> {
    let mut out = Vec::new();
    for pair in split_cell(joined) {
        if let Some((name, url)) = split_pair(&pair) {
            if let Some(reference) = version
                .references
                .values()
                .find(|r| r.name == name && r.url == url)
            {
                out.push(reference.uuid.clone());
            }
        }
    }
    out
}

fn import_threats(version: &mut Version, range: &Range<Data>) {
    for row in 1..range.height() {
        let ref_ = cell(range, row, 0);
        if ref_.is_empty() {
            continue;
        }
        let uuid = cell(range, row, 10);
        let references = resolve_references(version, &cell(range, row, 7));
        let mut threat = WsThreat {
            uuid: uuid.clone(),
            ref_,
            name: cell(range, row, 1),
            desc: cell(range, row, 2),
            references,
            mitre: split_cell(&cell(range, row, 8)),
            stride: split_cell(&cell(range, row, 9)),
            ..Default::default()
        };
        threat.risk_rating.c = cell(range, row, 3);
        threat.risk_rating.i = cell(range, row, 4);
        threat.risk_rating.a = cell(range, row, 5);
        threat.risk_rating.ee = cell(range, row, 6);
        version.threats.insert(uuid, threat);
    }
}

fn import_weaknesses(version: &mut Version, range: &Range<Data>) {
    for row in 1..range.height() {
        let ref_ = cell(range, row, 0);
        if ref_.is_empty() {
            continue;
        }
        let uuid = cell(range, row, 6);
        let test_references = resolve_references(version, &cell(range, row, 5));
        version.weaknesses.insert(
            uuid.clone(),
            WsWeakness {
                uuid,
                ref_,
                name: cell(range, row, 1),
                desc: cell(range, row, 2),
                impact: cell(range, row, 3),
                test_steps: cell(range, row, 4),
                test_references,
            },
        );
    }
}

fn import_controls(version: &mut Version, range: &Range<Data>) {
    for row in 1..range.height() {
        let ref_ = cell(range, row, 0);
        if ref_.is_empty() {
            continue;
        }
        let uuid = cell(range, row, 14);

        let mut standards = Vec::new();
        for pair in split_cell(&cell(range, row, 8)) {
            if let Some((supported, standard)) = split_pair(&pair) {
                if let Some(found) = version
                    .standards
                    .values()
                    .find(|s| s.supported_standard_ref == supported && s.standard_ref == standard)
                {
                    standards.push(found.uuid.clone());
                }
            }
        }

        let references = resolve_references(version, &cell(range, row, 5));
        let test_references = resolve_references(version, &cell(range, row, 7));
        version.controls.insert(
            uuid.clone(),
            WsControl {
                uuid,
                ref_,
                name: cell(range, row, 1),
                desc: cell(range, row, 2),
                state: cell(range, row, 3),
                cost: cell(range, row, 4),
                references,
                test_steps: cell(range, row, 6),
                test_references,
                standards,
                implementations: split_cell(&cell(range, row, 9)),
                base_standard: split_cell(&cell(range, row, 10)),
                base_standard_section: split_cell(&cell(range, row, 11)),
                scope: split_cell(&cell(range, row, 12)),
                mitre: split_cell(&cell(range, row, 13)),
            },
        );
    }
}

fn import_relations(library: &mut Library, range: &Range<Data>) {
    for row in 1..range.height() {
        let risk_pattern = cell(range, row, 0);
        if risk_pattern.is_empty() {
            continue;
        }
        let relation = WsRelation::new(
            &risk_pattern,
            &cell(range, row, 1),
            &cell(range, row, 2),
            &cell(range, row, 3),
            &cell(range, row, 4),
            &cell(range, row, 5),
        );
        library.relations.insert(relation.uuid.clone(), relation);
    }
}

/// Rule identity cells may be blank on continuation rows of a span; the
/// nearest rule name above applies.
fn import_rules(library: &mut Library, range: &Range<Data>) {
    debug!("importing rules");
    let mut rules: IndexMap<String, Rule> = IndexMap::new();
    let mut current = String::new();

    for row in 1..range.height() {
        let name_cell = cell(range, row, col::RULES_NAME);
        if !name_cell.is_empty() {
            current = name_cell.clone();
            rules.entry(current.clone()).or_insert_with(|| Rule {
                name: name_cell,
                module: cell(range, row, col::RULES_MODULE),
                generated_by_gui: cell(range, row, col::RULES_GUI),
                ..Default::default()
            });
        }
        let Some(rule) = rules.get_mut(&current) else {
            continue;
        };

        let condition_name = cell(range, row, col::RULES_CONDITION_NAME);
        if !condition_name.is_empty() {
            rule.conditions.push(RuleCondition {
                name: condition_name,
                value: cell(range, row, col::RULES_CONDITION_VALUE),
                field: cell(range, row, col::RULES_CONDITION_FIELD),
            });
        }

        let action_name = cell(range, row, col::RULES_ACTION_NAME);
        if !action_name.is_empty() {
            rule.actions.push(RuleAction {
                name: action_name,
                value: cell(range, row, col::RULES_ACTION_VALUE),
                project: cell(range, row, col::RULES_ACTION_PROJECT),
            });
        }
    }

    library.rules = rules.into_values().collect();
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Export one library (plus the version-scoped elements it shares) as a
/// styled workbook.
pub fn export_library(library: &Library, version: &Version) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();

    write_risk_patterns(workbook.add_worksheet(), library)?;
    write_usecases(workbook.add_worksheet(), library, version)?;
    write_threats(workbook.add_worksheet(), library, version)?;
    write_weaknesses(workbook.add_worksheet(), library, version)?;
    write_controls(workbook.add_worksheet(), library, version)?;
    write_references(workbook.add_worksheet(), version)?;
    write_relations(workbook.add_worksheet(), library)?;
    write_rules(workbook.add_worksheet(), library)?;
    write_properties(workbook.add_worksheet(), library)?;
    write_components(workbook.add_worksheet(), library, version)?;
    write_standards(workbook.add_worksheet(), version)?;
    write_supported_standards(workbook.add_worksheet(), version)?;

    workbook.save_to_buffer().map_err(|e| {
        CodecError::Write {
            format: "xlsx".to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn wr(e: rust_xlsxwriter::XlsxError) -> crate::errors::ThreatsmithError {
    CodecError::Write {
        format: "xlsx".to_string(),
        message: e.to_string(),
    }
    .into()
}

fn header_format(color: u32) -> Format {
    Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(color))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin)
        .set_border_color(Color::White)
}

fn cell_format(color: u32) -> Format {
    Format::new()
        .set_background_color(Color::RGB(color))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap()
        .set_border(FormatBorder::Thin)
        .set_border_color(Color::White)
}

fn write_headers(ws: &mut Worksheet, headers: &[&str], palette: &Palette) -> Result<()> {
    let fmt = header_format(palette.header);
    for (i, header) in headers.iter().enumerate() {
        ws.write_string_with_format(0, i as u16, *header, &fmt)
            .map_err(wr)?;
    }
    Ok(())
}

fn write_row(ws: &mut Worksheet, row: u32, values: &[String], color: u32) -> Result<()> {
    let fmt = cell_format(color);
    for (i, value) in values.iter().enumerate() {
        ws.write_string_with_format(row, i as u16, value, &fmt)
            .map_err(wr)?;
    }
    Ok(())
}

fn normalize(ws: &mut Worksheet, rows: u32, columns: usize) -> Result<()> {
    for column in 0..columns {
        ws.set_column_width(column as u16, 30.0).map_err(wr)?;
    }
    for row in 0..=rows {
        ws.set_row_height(row, 15).map_err(wr)?;
    }
    Ok(())
}

fn alternating(palette: &Palette, toggle: bool) -> u32 {
    if toggle {
        palette.row_a
    } else {
        palette.row_b
    }
}

/// Uuids of one attribute over the library's relations.
fn uuids_in_relations(library: &Library, pick: fn(&WsRelation) -> &str) -> Vec<String> {
    let mut out = Vec::new();
    for rel in library.relations.values() {
        let value = pick(rel);
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

fn joined_references(version: &Version, uuids: &[String]) -> String {
    uuids
        .iter()
        .filter_map(|uuid| version.references.get(uuid))
        .map(|r| format!("{}:{}", r.name, r.url))
        .collect::<Vec<String>>()
        .join(SEPARATOR)
}

fn write_properties(ws: &mut Worksheet, library: &Library) -> Result<()> {
    ws.set_name("Library properties").map_err(wr)?;
    write_headers(ws, &["General", "Values"], &LIBRARY_PROPERTY)?;
    let rows = [
        ("Library Name", library.name.as_str()),
        ("Library Ref", library.ref_.as_str()),
        ("Library Desc", library.desc.as_str()),
        ("Revision", library.revision.as_str()),
        ("Enabled", library.enabled.as_str()),
    ];
    for (i, (label, value)) in rows.iter().enumerate() {
        let color = alternating(&LIBRARY_PROPERTY, i % 2 == 0);
        write_row(
            ws,
            (i + 1) as u32,
            &[label.to_string(), value.to_string()],
            color,
        )?;
    }
    normalize(ws, 6, 2)
}

fn write_risk_patterns(ws: &mut Worksheet, library: &Library) -> Result<()> {
    ws.set_name("Risk Patterns").map_err(wr)?;
    write_headers(ws, &["Ref", "Name", "Desc", "UUID"], &RISK_PATTERN)?;
    let mut toggle = true;
    let mut row = 1u32;
    for rp in library.risk_patterns.values() {
        write_row(
            ws,
            row,
            &[rp.ref_.clone(), rp.name.clone(), rp.desc.clone(), rp.uuid.clone()],
            alternating(&RISK_PATTERN, toggle),
        )?;
        toggle = !toggle;
        row += 1;
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_usecases(ws: &mut Worksheet, library: &Library, version: &Version) -> Result<()> {
    ws.set_name("Use Cases").map_err(wr)?;
    write_headers(ws, &["Ref", "Name", "Desc", "UUID"], &USE_CASE)?;
    let mut toggle = true;
    let mut row = 1u32;
    for uuid in uuids_in_relations(library, |r| &r.usecase) {
        if let Some(uc) = version.usecases.get(&uuid) {
            write_row(
                ws,
                row,
                &[uc.ref_.clone(), uc.name.clone(), uc.desc.clone(), uc.uuid.clone()],
                alternating(&USE_CASE, toggle),
            )?;
            toggle = !toggle;
            row += 1;
        }
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_threats(ws: &mut Worksheet, library: &Library, version: &Version) -> Result<()> {
    ws.set_name("Threats").map_err(wr)?;
    write_headers(
        ws,
        &[
            "Ref",
            "Name",
            "Desc",
            "Confidentiality",
            "Integrity",
            "Availability",
            "Ease Of Exploitation",
            "References",
            "Mitre",
            "STRIDE",
            "UUID",
        ],
        &THREAT,
    )?;
    let mut toggle = true;
    let mut row = 1u32;
    for uuid in uuids_in_relations(library, |r| &r.threat) {
        if let Some(threat) = version.threats.get(&uuid) {
            write_row(
                ws,
                row,
                &[
                    threat.ref_.clone(),
                    threat.name.clone(),
                    threat.desc.clone(),
                    threat.risk_rating.c.clone(),
                    threat.risk_rating.i.clone(),
                    threat.risk_rating.a.clone(),
                    threat.risk_rating.ee.clone(),
                    joined_references(version, &threat.references),
                    threat.mitre.join(SEPARATOR),
                    threat.stride.join(SEPARATOR),
                    threat.uuid.clone(),
                ],
                alternating(&THREAT, toggle),
            )?;
            toggle = !toggle;
            row += 1;
        }
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_weaknesses(ws: &mut Worksheet, library: &Library, version: &Version) -> Result<()> {
    ws.set_name("Weaknesses").map_err(wr)?;
    write_headers(
        ws,
        &["Ref", "Name", "Desc", "Impact", "Test Steps", "Test References", "UUID"],
        &WEAKNESS,
    )?;
    let mut toggle = true;
    let mut row = 1u32;
    for uuid in uuids_in_relations(library, |r| &r.weakness) {
        if let Some(weakness) = version.weaknesses.get(&uuid) {
            write_row(
                ws,
                row,
                &[
                    weakness.ref_.clone(),
                    weakness.name.clone(),
                    weakness.desc.clone(),
                    weakness.impact.clone(),
                    weakness.test_steps.clone(),
                    joined_references(version, &weakness.test_references),
                    weakness.uuid.clone(),
                ],
                alternating(&WEAKNESS, toggle),
            )?;
            toggle = !toggle;
            row += 1;
        }
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_controls(ws: &mut Worksheet, library: &Library, version: &Version) -> Result<()> {
    ws.set_name("Controls").map_err(wr)?;
    write_headers(
        ws,
        &[
            "Ref",
            "Name",
            "Desc",
            "State",
            "Cost",
            "References",
            "Test Steps",
            "Test References",
            "Standards",
            "Implementations",
            "Base Standard",
            "Base Standard Section",
            "Scope",
            "MITRE",
            "UUID",
        ],
        &COUNTERMEASURE,
    )?;
    let mut toggle = true;
    let mut row = 1u32;
    for uuid in uuids_in_relations(library, |r| &r.control) {
        if let Some(control) = version.controls.get(&uuid) {
            let standards = control
                .standards
                .iter()
                .filter_map(|uuid| version.standards.get(uuid))
                .map(|s| format!("{}:{}", s.supported_standard_ref, s.standard_ref))
                .collect::<Vec<String>>()
                .join(SEPARATOR);
            write_row(
                ws,
                row,
                &[
                    control.ref_.clone(),
                    control.name.clone(),
                    control.desc.clone(),
                    control.state.clone(),
                    control.cost.clone(),
                    joined_references(version, &control.references),
                    control.test_steps.clone(),
                    joined_references(version, &control.test_references),
                    standards,
                    control.implementations.join(SEPARATOR),
                    control.base_standard.join(SEPARATOR),
                    control.base_standard_section.join(SEPARATOR),
                    control.scope.join(SEPARATOR),
                    control.mitre.join(SEPARATOR),
                    control.uuid.clone(),
                ],
                alternating(&COUNTERMEASURE, toggle),
            )?;
            toggle = !toggle;
            row += 1;
        }
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_references(ws: &mut Worksheet, version: &Version) -> Result<()> {
    ws.set_name("References").map_err(wr)?;
    write_headers(ws, &["Name", "URL", "UUID"], &RISK_PATTERN)?;
    let mut toggle = true;
    let mut row = 1u32;
    for reference in version.references.values() {
        write_row(
            ws,
            row,
            &[reference.name.clone(), reference.url.clone(), reference.uuid.clone()],
            alternating(&RISK_PATTERN, toggle),
        )?;
        toggle = !toggle;
        row += 1;
    }
    ws.set_column_width(0, 100.0).map_err(wr)?;
    ws.set_column_width(1, 100.0).map_err(wr)?;
    Ok(())
}

fn write_relations(ws: &mut Worksheet, library: &Library) -> Result<()> {
    ws.set_name("Relations").map_err(wr)?;
    write_headers(
        ws,
        &["Risk Pattern", "Use Case", "Threat", "Weakness", "Control", "Mitigation"],
        &RISK_PATTERN,
    )?;
    let mut toggle = true;
    let mut row = 1u32;
    for rel in library.relations.values() {
        write_row(
            ws,
            row,
            &[
                rel.risk_pattern.clone(),
                rel.usecase.clone(),
                rel.threat.clone(),
                rel.weakness.clone(),
                rel.control.clone(),
                rel.mitigation.clone(),
            ],
            alternating(&RISK_PATTERN, toggle),
        )?;
        toggle = !toggle;
        row += 1;
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_components(ws: &mut Worksheet, library: &Library, version: &Version) -> Result<()> {
    ws.set_name("Components").map_err(wr)?;
    write_headers(
        ws,
        &[
            "Component Definition Name",
            "Component Definition Ref",
            "Component Definition Desc",
            "Category Name",
            "Category Ref",
            "Category UUID",
            "Risk Patterns",
            "Visible",
            "Component UUID",
        ],
        &COMPONENT,
    )?;
    let mut toggle = true;
    let mut row = 1u32;
    for cd in library.component_definitions.values() {
        let category = version.categories.values().find(|c| c.ref_ == cd.category_ref);
        write_row(
            ws,
            row,
            &[
                cd.name.clone(),
                cd.ref_.clone(),
                cd.desc.clone(),
                category.map(|c| c.name.clone()).unwrap_or_default(),
                cd.category_ref.clone(),
                category.map(|c| c.uuid.clone()).unwrap_or_default(),
                cd.risk_pattern_refs.join(","),
                cd.visible.clone(),
                cd.uuid.clone(),
            ],
            alternating(&COMPONENT, toggle),
        )?;
        toggle = !toggle;
        row += 1;
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_standards(ws: &mut Worksheet, version: &Version) -> Result<()> {
    ws.set_name("Standards").map_err(wr)?;
    write_headers(ws, &["Supported Standard Ref", "Standard Ref", "Standard UUID"], &STANDARD)?;
    let mut toggle = true;
    let mut row = 1u32;
    for standard in version.standards.values() {
        write_row(
            ws,
            row,
            &[
                standard.supported_standard_ref.clone(),
                standard.standard_ref.clone(),
                standard.uuid.clone(),
            ],
            alternating(&STANDARD, toggle),
        )?;
        toggle = !toggle;
        row += 1;
    }
    normalize(ws, row, col::SHEET_LAST)
}

fn write_supported_standards(ws: &mut Worksheet, version: &Version) -> Result<()> {
    ws.set_name("Supported standards").map_err(wr)?;
    write_headers(
        ws,
        &["Supported Standard Name", "Supported Standard Ref", "Supported Standard UUID"],
        &STANDARD,
    )?;
    let mut toggle = true;
    let mut row = 1u32;
    for supported in version.supported_standards.values() {
        write_row(
            ws,
            row,
            &[supported.name.clone(), supported.ref_.clone(), supported.uuid.clone()],
            alternating(&STANDARD, toggle),
        )?;
        toggle = !toggle;
        row += 1;
    }
    normalize(ws, row, col::SHEET_LAST)
}

/// One row per condition/action pair; rule identity cells are merged
/// across the span when a rule needs more than one row.
fn write_rules(ws: &mut Worksheet, library: &Library) -> Result<()> {
    ws.set_name("Rules").map_err(wr)?;
    let headers = [
        (col::RULES_NAME, "Rule Name", &RULE),
        (col::RULES_MODULE, "Module", &RULE),
        (col::RULES_GUI, "Generated by GUI", &RULE),
        (col::RULES_CONDITION_NAME, "Condition Name", &RULE_CONDITION),
        (col::RULES_CONDITION_VALUE, "Condition Value", &RULE_CONDITION),
        (col::RULES_CONDITION_FIELD, "Condition Field", &RULE_CONDITION),
        (col::RULES_ACTION_NAME, "Action Name", &RULE_ACTION),
        (col::RULES_ACTION_VALUE, "Action Value", &RULE_ACTION),
        (col::RULES_ACTION_PROJECT, "Action Project", &RULE_ACTION),
    ];
    for (column, header, palette) in headers {
        ws.write_string_with_format(0, column as u16, header, &header_format(palette.header))
            .map_err(wr)?;
    }

    let mut rule_toggle = true;
    let mut condition_toggle = true;
    let mut action_toggle = true;
    let mut row = 1u32;

    for rule in &library.rules {
        let span = rule.conditions.len().max(rule.actions.len()).max(1) as u32;
        let rule_color = cell_format(alternating(&RULE, rule_toggle));

        let identity = [
            (col::RULES_NAME, rule.name.as_str()),
            (col::RULES_MODULE, rule.module.as_str()),
            (col::RULES_GUI, rule.generated_by_gui.as_str()),
        ];
        for (column, value) in identity {
            if span > 1 {
                ws.merge_range(row, column as u16, row + span - 1, column as u16, value, &rule_color)
                    .map_err(wr)?;
            } else {
                ws.write_string_with_format(row, column as u16, value, &rule_color)
                    .map_err(wr)?;
            }
        }

        for (i, condition) in rule.conditions.iter().enumerate() {
            let fmt = cell_format(alternating(&RULE_CONDITION, condition_toggle));
            let r = row + i as u32;
            ws.write_string_with_format(r, col::RULES_CONDITION_NAME as u16, &condition.name, &fmt)
                .map_err(wr)?;
            ws.write_string_with_format(r, col::RULES_CONDITION_VALUE as u16, &condition.value, &fmt)
                .map_err(wr)?;
            ws.write_string_with_format(r, col::RULES_CONDITION_FIELD as u16, &condition.field, &fmt)
                .map_err(wr)?;
            condition_toggle = !condition_toggle;
        }

        for (i, action) in rule.actions.iter().enumerate() {
            let fmt = cell_format(alternating(&RULE_ACTION, action_toggle));
            let r = row + i as u32;
            ws.write_string_with_format(r, col::RULES_ACTION_NAME as u16, &action.name, &fmt)
                .map_err(wr)?;
            ws.write_string_with_format(r, col::RULES_ACTION_VALUE as u16, &action.value, &fmt)
                .map_err(wr)?;
            ws.write_string_with_format(r, col::RULES_ACTION_PROJECT as u16, &action.project, &fmt)
                .map_err(wr)?;
            action_toggle = !action_toggle;
        }

        row += span;
        rule_toggle = !rule_toggle;
    }

    normalize(ws, row, col::RULES_LAST)
}
