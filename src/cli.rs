//! Command-line surface. Commands are thin wrappers: load the session,
//! call into the core (codecs, balancer, checker, workspace), write the
//! session back. All interactive confirmation is replaced by explicit
//! `--force` flags.

use crate::balance::balance_template;
use crate::codecs::{xlsx, xml, ysc};
use crate::config::{app_dir, Config};
use crate::integrity;
use crate::llm::{generator_from_config, Generator, PROMPT_COMPONENT_DESCRIPTION};
use crate::model::catalog::{CATEGORIES, PREFIX_COMPONENT_DEFINITION, PREFIX_RISK_PATTERN};
use crate::model::{RiskPattern, Template};
use crate::remote::{HttpPublisher, Publisher};
use crate::store::TemplateStore;
use crate::telemetry::init_tracing;
use crate::textutil::ref_from_name;
use crate::tm::generate_threat_model;
use crate::workspace::changelog;
use crate::workspace::convert;
use crate::workspace::service::{LibraryUpdate, MergeRequest, Workspace};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

pub const WORKSPACE_PROJECT: &str = "workspace";

#[derive(Parser)]
#[command(name = "threatsmith")]
#[command(about = "Threat-model library authoring and migration toolkit")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose diagnostics on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Author the current component
    #[command(subcommand)]
    Component(ComponentCommands),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Multi-library workspace operations
    #[command(subcommand, hide = true)]
    Workspace(WorkspaceCommands),

    /// Information about this application
    About,
}

#[derive(Subcommand)]
enum ComponentCommands {
    /// Start a new component
    New {
        /// Component display name
        name: String,
        /// Description; drafted by the generator when omitted
        #[arg(long)]
        desc: Option<String>,
        /// Category ref, e.g. data-store
        #[arg(long, default_value = "general")]
        category: String,
    },
    /// Load a component from an XML or YSC file
    Load {
        /// Path to the file; when omitted the input folder is scanned
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Save the component to the output folder
    Save {
        /// Output format: xml or yaml
        #[arg(long, default_value = "yaml")]
        format: String,
        /// Print the document instead of writing it
        #[arg(long)]
        preview: bool,
    },
    /// Show the current component
    Info,
    /// Draft a threat model with the generator
    Tm,
    /// Balance mitigation percentages to 100 per threat
    Balance,
    /// Run the integrity battery; nonzero exit on violations
    Check,
    /// Drop weaknesses no relation references any more
    CleanUnused,
    /// Remove exported files from the output folder
    Clean {
        #[arg(long)]
        force: bool,
    },
    /// Remove the current component
    Restart {
        #[arg(long)]
        force: bool,
    },
    /// Upload the component to the remote instance
    Upload,
    /// Pull the component's library from the remote instance
    Pull,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show every configuration value
    List,
    /// Set one configuration value
    Update { key: String, value: String },
    /// Reset the configuration to defaults
    Reset,
    /// Print the app directory path
    Path,
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    CreateVersion {
        version: String,
    },
    DeleteVersion {
        version: String,
    },
    CopyVersion {
        version: String,
        new_ref: String,
    },
    CreateLibrary {
        version: String,
        library: String,
    },
    DeleteLibrary {
        version: String,
        library: String,
    },
    /// Update a library's scalar attributes
    UpdateLibrary {
        version: String,
        library: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        desc: String,
        #[arg(long)]
        revision: String,
        #[arg(long)]
        filename: String,
        #[arg(long, default_value = "true")]
        enabled: String,
    },
    /// Import a workbook into a version
    ImportXlsx {
        version: String,
        file: PathBuf,
    },
    /// Import a library XML or YSC YAML document into a version
    ImportFile {
        version: String,
        file: PathBuf,
    },
    /// Export a library as library XML, bumping its revision
    ExportXml {
        version: String,
        library: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export a library as a workbook
    ExportXlsx {
        version: String,
        library: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Merge one library into another
    Merge {
        src_version: String,
        src_library: String,
        dst_version: String,
        dst_library: String,
    },
    /// Merge every library of a version into one
    FullLibrary {
        version: String,
    },
    /// Mitigation and duplicate-risk-pattern checks for one library
    Check {
        version: String,
        library: String,
    },
    Balance {
        version: String,
        library: String,
    },
    Report {
        version: String,
    },
    CleanVersion {
        version: String,
    },
    FixNonAscii {
        version: String,
    },
    /// Field-by-field changelog for a library between two versions
    Changelog {
        from_version: String,
        to_version: String,
        library: String,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let dir = app_dir()?;
    let config = Config::load(&dir)?;

    match cli.command {
        Commands::Component(command) => {
            let mut store = TemplateStore::open(&dir)?;
            run_component(command, &mut store, &config, &dir)
        }
        Commands::Config(command) => run_config(command, config, &dir),
        Commands::Workspace(command) => run_workspace(command, &dir),
        Commands::About => {
            println!("threatsmith {} - threat-model library authoring toolkit", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_component(
    command: ComponentCommands,
    store: &mut TemplateStore,
    config: &Config,
    dir: &Path,
) -> Result<()> {
    match command {
        ComponentCommands::New { name, desc, category } => {
            let generator = generator_from_config(config)?;
            let template = new_component(store, config, generator.as_ref(), &name, desc.as_deref(), &category)?;
            println!("Component {} created", template.component.ref_.green());
            Ok(())
        }
        ComponentCommands::Load { file } => {
            let path = match file {
                Some(path) => path,
                None => pick_importable(&config.input_dir(dir))?,
            };
            load_component(store, &path)?;
            println!("{}", "Loaded".green());
            Ok(())
        }
        ComponentCommands::Save { format, preview } => {
            if let Some(path) = save_component(store, config, dir, &format, preview)? {
                println!("Component saved in {}", path.display());
            }
            Ok(())
        }
        ComponentCommands::Info => {
            let template = store.read()?;
            print_info(&template);
            Ok(())
        }
        ComponentCommands::Tm => {
            let generator = generator_from_config(config)?;
            let mut template = store.read()?;
            generate_threat_model(&mut template, generator.as_ref(), &config.company_prefix())?;
            store.write(&template)?;
            println!("Threats: {}", template.threats.len());
            println!("Countermeasures: {}", template.controls.len());
            Ok(())
        }
        ComponentCommands::Balance => {
            let mut template = store.read()?;
            balance_template(&mut template);
            store.write(&template)?;
            Ok(())
        }
        ComponentCommands::Check => {
            let template = store.read()?;
            let violations = integrity::run_all(&template);
            if violations.is_empty() {
                println!("{}", "All checks passed".green());
                Ok(())
            } else {
                for violation in &violations {
                    eprintln!("{}", violation.red());
                }
                bail!("{} integrity violations found", violations.len());
            }
        }
        ComponentCommands::CleanUnused => {
            let mut template = store.read()?;
            let removed = template.clean_unused_weaknesses();
            store.write(&template)?;
            for ref_ in &removed {
                println!("Removed unused weakness {ref_}");
            }
            Ok(())
        }
        ComponentCommands::Clean { force } => {
            if !force {
                bail!("this removes every exported file; pass --force to confirm");
            }
            let removed = clean_exports(&config.output_dir(dir))?;
            for file in removed {
                println!("File {file} removed");
            }
            Ok(())
        }
        ComponentCommands::Restart { force } => {
            if !force {
                bail!("this discards the current component; pass --force to confirm");
            }
            store.restart()?;
            println!("Temporal component removed");
            Ok(())
        }
        ComponentCommands::Upload => {
            let publisher = HttpPublisher::new(config)?;
            upload_component(store, &publisher)?;
            println!("{}", "Component uploaded successfully".green());
            Ok(())
        }
        ComponentCommands::Pull => {
            let publisher = HttpPublisher::new(config)?;
            pull_component(store, &publisher)?;
            println!("{}", "Component pulled".green());
            Ok(())
        }
    }
}

/// Create a fresh component. The ref is derived from the name, the
/// description drafted by the generator when not provided.
pub fn new_component(
    store: &mut TemplateStore,
    config: &Config,
    generator: &dyn Generator,
    name: &str,
    desc: Option<&str>,
    category: &str,
) -> Result<Template> {
    if !CATEGORIES.contains_key(category) {
        bail!(
            "unknown category '{category}'; valid categories: {}",
            CATEGORIES.keys().copied().collect::<Vec<_>>().join(", ")
        );
    }

    let mut template = store.initialize()?;

    let component_ref = format!(
        "{PREFIX_COMPONENT_DEFINITION}{}{}",
        config.company_prefix(),
        ref_from_name(name)
    );
    let description = match desc {
        Some(text) => text.to_string(),
        None => generator
            .generate(PROMPT_COMPONENT_DESCRIPTION, name)?
            .trim()
            .trim_end_matches('.')
            .to_string(),
    };

    template.component.ref_ = component_ref.clone();
    template.component.name = name.to_string();
    template.component.desc = description.clone();
    template.component.category_ref = category.to_string();
    let risk_pattern_ref = component_ref.replace(PREFIX_COMPONENT_DEFINITION, PREFIX_RISK_PATTERN);
    template.component.risk_pattern_refs = vec![risk_pattern_ref.clone()];
    template.risk_pattern = RiskPattern {
        ref_: risk_pattern_ref,
        name: name.to_string(),
        desc: description,
    };

    store.replace(&template)?;
    Ok(template)
}

/// Load one importable file into the session, replacing whatever was
/// there (re-importing never appends duplicate relations). XML and YAML
/// imports are rebalanced immediately.
pub fn load_component(store: &mut TemplateStore, path: &Path) -> Result<Template> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let mut template = match extension {
        "xml" => {
            let component_ref = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            xml::import_template(&content, component_ref)?
        }
        "yaml" | "yml" => ysc::import_template(&content)?,
        other => bail!("unsupported import format '{other}' (expected xml or yaml)"),
    };

    balance_template(&mut template);
    store.replace(&template)?;
    Ok(template)
}

/// Save the session to the output folder. XML is rebalanced and carries a
/// bumped revision; YAML is exported as-is.
pub fn save_component(
    store: &mut TemplateStore,
    config: &Config,
    dir: &Path,
    format: &str,
    preview: bool,
) -> Result<Option<PathBuf>> {
    let mut template = store.read()?;
    let output_dir = config.output_dir(dir);

    let (document, path) = match format {
        "xml" => {
            balance_template(&mut template);
            store.write(&template)?;
            let path = output_dir.join(format!("{}.xml", template.component.ref_));
            let existing = fs::read_to_string(&path).ok();
            let revision = xml::next_revision(existing.as_deref());
            (xml::export_template(&template, revision)?, path)
        }
        "yaml" => {
            let path = output_dir.join(format!("{}.yaml", template.component.ref_));
            (ysc::export_template(&template)?, path)
        }
        other => bail!("invalid format: {other}"),
    };

    if preview {
        println!("{document}");
        return Ok(None);
    }
    fs::write(&path, document)
        .with_context(|| format!("failed to write {}", path.display()))?;
    store.mark_saved();
    Ok(Some(path))
}

/// The only importable file in the input folder, or an error listing the
/// candidates when the choice is ambiguous.
fn pick_importable(input_dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(input_dir)
        .with_context(|| format!("cannot scan {}", input_dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("xml") | Some("yaml") | Some("yml")
            )
        })
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => bail!("no components to load in {}", input_dir.display()),
        1 => Ok(candidates.remove(0)),
        _ => bail!(
            "several components found, pass --file to choose one of: {}",
            candidates
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn clean_exports(output_dir: &Path) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for entry in fs::read_dir(output_dir)
        .with_context(|| format!("cannot scan {}", output_dir.display()))?
        .flatten()
    {
        let path = entry.path();
        if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("xml") | Some("yaml") | Some("xlsx")
        ) {
            fs::remove_file(&path)
                .with_context(|| format!("cannot remove {}", path.display()))?;
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                removed.push(name.to_string());
            }
        }
    }
    Ok(removed)
}

/// Upload: rebalance, export XML with a fresh revision, push.
pub fn upload_component(store: &mut TemplateStore, publisher: &dyn Publisher) -> Result<()> {
    let mut template = store.read()?;
    balance_template(&mut template);
    store.write(&template)?;
    let document = xml::export_template(&template, 1)?;
    publisher.upload(&document)?;
    Ok(())
}

/// Pull: fetch the remote library and replace the session with it.
pub fn pull_component(store: &mut TemplateStore, publisher: &dyn Publisher) -> Result<()> {
    let current = store.read()?;
    let remote_xml = publisher.pull(&current.component.ref_)?;
    let mut template = xml::import_template(&remote_xml, &current.component.ref_)?;
    balance_template(&mut template);
    store.replace(&template)?;
    Ok(())
}

fn print_info(template: &Template) {
    println!("{}", format!("Component: {}", template.component.ref_).red());
    println!("  name: {}", template.component.name);
    println!("  category: {}", template.component.category_ref);
    println!("{}", format!("Risk pattern: {}", template.risk_pattern.ref_).red());
    println!("{}", format!("Use cases ({}):", template.usecases.len()).red());
    for usecase in template.usecases.values() {
        println!("  {} ({})", usecase.name, usecase.ref_);
    }
    println!("{}", format!("Threats ({}):", template.threats.len()).red());
    for threat in template.threats.values() {
        println!("  {} - {}", threat.ref_, threat.name);
    }
    println!("{}", format!("Weaknesses ({}):", template.weaknesses.len()).red());
    for weakness in template.weaknesses.values() {
        println!("  {}", weakness.ref_);
    }
    println!("{}", format!("Countermeasures ({}):", template.controls.len()).red());
    for control in template.controls.values() {
        println!("  {} - {}", control.ref_, control.name);
    }
    println!("{}", format!("Relations ({}):", template.relations.len()).red());
    for rel in &template.relations {
        let mitigation = if rel.mitigation.is_empty() {
            "Not defined"
        } else {
            &rel.mitigation
        };
        println!(
            "  {} | {} | {} | {} | {} | {}",
            rel.risk_pattern, rel.usecase, rel.threat, rel.weakness, rel.control, mitigation
        );
    }
}

fn run_config(command: ConfigCommands, mut config: Config, dir: &Path) -> Result<()> {
    match command {
        ConfigCommands::List => {
            for (key, value) in config.entries() {
                println!("{key} = {value}");
            }
            Ok(())
        }
        ConfigCommands::Update { key, value } => {
            config.set(&key, &value)?;
            config.save(dir)?;
            println!("{key} updated");
            Ok(())
        }
        ConfigCommands::Reset => {
            Config::default().save(dir)?;
            println!("Configuration reset");
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", dir.display());
            Ok(())
        }
    }
}

/// Workspace commands load the shared project file, operate and save it
/// back, mirroring the read-modify-write discipline of the template
/// store.
fn run_workspace(command: WorkspaceCommands, dir: &Path) -> Result<()> {
    let mut workspace = match Workspace::load_project(dir, WORKSPACE_PROJECT) {
        Ok(ws) => ws,
        Err(_) => Workspace::new(WORKSPACE_PROJECT, "Workspace", "Local workspace project")
            .map_err(anyhow::Error::from)?,
    };

    match command {
        WorkspaceCommands::CreateVersion { version } => {
            workspace.create_version(&version)?;
        }
        WorkspaceCommands::DeleteVersion { version } => {
            workspace.delete_version(&version);
        }
        WorkspaceCommands::CopyVersion { version, new_ref } => {
            workspace.copy_version(&version, &new_ref)?;
        }
        WorkspaceCommands::CreateLibrary { version, library } => {
            workspace.create_library(&version, &library)?;
        }
        WorkspaceCommands::DeleteLibrary { version, library } => {
            workspace.delete_library(&version, &library)?;
        }
        WorkspaceCommands::UpdateLibrary {
            version,
            library,
            name,
            desc,
            revision,
            filename,
            enabled,
        } => {
            workspace.update_library(
                &version,
                &library,
                &LibraryUpdate {
                    name,
                    desc,
                    revision,
                    filename,
                    enabled,
                },
            )?;
        }
        WorkspaceCommands::ImportXlsx { version, file } => {
            if workspace.version(&version).is_err() {
                workspace.create_version(&version)?;
            }
            let bytes = fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("library.xlsx");
            let library_ref =
                xlsx::import_library(filename, &bytes, workspace.version_mut(&version)?)?;
            println!("Imported library {library_ref} into {version}");
        }
        WorkspaceCommands::ImportFile { version, file } => {
            if workspace.version(&version).is_err() {
                workspace.create_version(&version)?;
            }
            let content = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("library.xml");
            let target = workspace.version_mut(&version)?;
            let library_ref = match file.extension().and_then(|e| e.to_str()) {
                Some("xml") => convert::import_library_xml(filename, &content, target)?,
                Some("yaml") | Some("yml") => {
                    convert::import_component_ysc(filename, &content, target)?
                }
                other => bail!("unsupported import format {other:?} (expected xml or yaml)"),
            };
            println!("Imported library {library_ref} into {version}");
        }
        WorkspaceCommands::ExportXml { version, library, out } => {
            let document = convert::export_library_xml(&library, workspace.version_mut(&version)?)?;
            let path = out.unwrap_or_else(|| dir.join(format!("{library}.xml")));
            fs::write(&path, document)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Library exported to {}", path.display());
        }
        WorkspaceCommands::ExportXlsx { version, library, out } => {
            let bytes = {
                let version_data = workspace.version(&version)?;
                let library_data = workspace.library(&version, &library)?;
                xlsx::export_library(library_data, version_data)?
            };
            let path = out.unwrap_or_else(|| dir.join(format!("{library}.xlsx")));
            fs::write(&path, bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Library exported to {}", path.display());
        }
        WorkspaceCommands::Merge {
            src_version,
            src_library,
            dst_version,
            dst_library,
        } => {
            let log = workspace.merge_libraries(&MergeRequest {
                src_version,
                src_library,
                dst_version,
                dst_library,
            })?;
            for line in log {
                println!("{line}");
            }
        }
        WorkspaceCommands::FullLibrary { version } => {
            let full = workspace.generate_full_library(&version)?;
            println!("Created {full}");
        }
        WorkspaceCommands::Check { version, library } => {
            let mut violations = workspace.check_mitigation(&version, &library)?;
            violations.extend(workspace.check_duplicated_risk_patterns(&version)?);
            if violations.is_empty() {
                println!("{}", "All checks passed".green());
            } else {
                for violation in &violations {
                    eprintln!("{}", violation.red());
                }
                bail!("{} violations found", violations.len());
            }
        }
        WorkspaceCommands::Balance { version, library } => {
            workspace.balance_mitigation(&version, &library)?;
        }
        WorkspaceCommands::Report { version } => {
            let report = workspace.version_report(&version)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        WorkspaceCommands::CleanVersion { version } => {
            for removed in workspace.clean_version(&version)? {
                println!("Removed {removed}");
            }
        }
        WorkspaceCommands::FixNonAscii { version } => {
            workspace.fix_non_ascii(&version)?;
        }
        WorkspaceCommands::Changelog {
            from_version,
            to_version,
            library,
        } => {
            let diff =
                changelog::changelog_between_libraries(&workspace, &from_version, &to_version, &library)?;
            println!("{}", serde_json::to_string_pretty(&diff)?);
            let relations = changelog::relations_changelog(
                workspace.version(&from_version)?,
                workspace.version(&to_version)?,
            );
            println!("Added relations: {}", relations.added.len());
            println!("Deleted relations: {}", relations.deleted.len());
        }
    }

    workspace.save_project(dir)?;
    Ok(())
}
