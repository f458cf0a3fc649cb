//! The template store: one scratch JSON file per authoring session,
//! always read and written wholesale.
//!
//! The session is an explicit context object handed to every command, not
//! process-global state, and its lifecycle is a small state machine:
//! Empty -> Loaded (new/load) -> Dirty (mutation) -> Saved (save), with
//! `restart` dropping back to Empty.

use crate::errors::{Result, StoreError};
use crate::model::Template;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TEMPLATE_FILE: &str = "template.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Loaded,
    Dirty,
    Saved,
}

#[derive(Debug)]
pub struct TemplateStore {
    path: PathBuf,
    state: SessionState,
}

impl TemplateStore {
    /// Open a store rooted at the given directory. The state reflects
    /// whether a scratch file already exists.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(TEMPLATE_FILE);
        let state = if path.exists() {
            SessionState::Saved
        } else {
            SessionState::Empty
        };
        Ok(Self { path, state })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create a fresh empty template. Fails if a session is already in
    /// progress; restart first.
    pub fn initialize(&mut self) -> Result<Template> {
        if self.exists() {
            return Err(StoreError::ComponentExists.into());
        }
        let template = Template::new();
        self.write_file(&template)?;
        self.state = SessionState::Loaded;
        Ok(template)
    }

    /// Read the current component, failing with "no component
    /// initialized" when no session exists.
    pub fn read(&self) -> Result<Template> {
        if !self.exists() {
            return Err(StoreError::NoComponent.into());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| StoreError::Storage {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let template: Template =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupted(e.to_string()))?;
        Ok(template)
    }

    /// Replace the whole document. Every command mutation funnels through
    /// here; there is no partial write.
    pub fn write(&mut self, template: &Template) -> Result<()> {
        if !self.exists() {
            return Err(StoreError::NoComponent.into());
        }
        self.write_file(template)?;
        self.state = SessionState::Dirty;
        Ok(())
    }

    /// Replace the document as part of a load, creating the file if the
    /// session was empty.
    pub fn replace(&mut self, template: &Template) -> Result<()> {
        self.write_file(template)?;
        self.state = SessionState::Loaded;
        Ok(())
    }

    pub fn mark_saved(&mut self) {
        if self.state == SessionState::Dirty {
            self.state = SessionState::Saved;
        }
    }

    /// Drop the session and its scratch file.
    pub fn restart(&mut self) -> Result<()> {
        if !self.exists() {
            return Err(StoreError::NoComponent.into());
        }
        fs::remove_file(&self.path).map_err(|e| StoreError::Storage {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        self.state = SessionState::Empty;
        info!("temporal component removed");
        Ok(())
    }

    fn write_file(&self, template: &Template) -> Result<()> {
        let json = serde_json::to_string_pretty(template)
            .map_err(|e| StoreError::Corrupted(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| StoreError::Storage {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
