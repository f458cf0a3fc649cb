//! threatsmith - threat-model library authoring and migration toolkit
//!
//! A content-authoring workbench for threat-modeling knowledge bases:
//! components, risk patterns, threats, weaknesses and countermeasures,
//! plus the many-to-many relation web that ties them together.
//!
//! - **Model**: ref-keyed entity tables and the flat relation list
//! - **Tree**: the four-level ownership hierarchy and its inverse
//! - **Balance**: mitigation percentages summing to exactly 100
//! - **Integrity**: an advisory battery of structural validators
//! - **Codecs**: lossless round trips through XML, YSC YAML and XLSX
//! - **Workspace**: multi-library versions, merges and changelogs
//!
//! # Quick Start
//!
//! ```ignore
//! use threatsmith::codecs::ysc;
//! use threatsmith::balance::balance_template;
//!
//! let mut template = ysc::import_template(&document)?;
//! balance_template(&mut template);
//! let exported = ysc::export_template(&template)?;
//! ```

pub mod balance;
pub mod cli;
pub mod codecs;
pub mod config;
pub mod errors;
pub mod integrity;
pub mod llm;
pub mod model;
pub mod remote;
pub mod store;
pub mod telemetry;
pub mod textutil;
pub mod tm;
pub mod tree;
pub mod workspace;

pub use errors::{Result, ThreatsmithError};
pub use model::Template;
