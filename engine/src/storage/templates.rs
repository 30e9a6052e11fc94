//! Template catalog
//!
//! Resolves a template id to the structure the planner consumes.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::template::Template;

#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Fails with `NotFound` for unknown ids
    async fn get(&self, template_id: &str) -> Result<Template, EngineError>;
}

/// In-memory template catalog
#[derive(Default)]
pub struct InMemoryTemplateCatalog {
    templates: RwLock<HashMap<String, Template>>,
}

impl InMemoryTemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template: Template) {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        templates.insert(template.id.clone(), template);
    }

    pub fn len(&self) -> usize {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TemplateCatalog for InMemoryTemplateCatalog {
    async fn get(&self, template_id: &str) -> Result<Template, EngineError> {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Template {}", template_id)))
    }
}

/// Catalog backed by a directory of `<template_id>.json` files
///
/// Files are read on every lookup so edits are picked up without a restart.
pub struct DirTemplateCatalog {
    dir: Dir,
}

impl DirTemplateCatalog {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    /// Persist a template as `<id>.json`
    pub async fn save(&self, template: &Template) -> Result<(), EngineError> {
        validate_template_id(&template.id)?;
        self.dir
            .file(&format!("{}.json", template.id))
            .write_json(template)
            .await
    }

    /// Load every template in the directory, skipping unreadable files
    pub async fn load_all(&self) -> Result<Vec<Template>, EngineError> {
        let mut templates = Vec::new();
        for file in self.dir.json_files().await? {
            match file.read_json::<Template>().await {
                Ok(template) => templates.push(template),
                Err(e) => warn!("Skipping unreadable template {:?}: {}", file.path(), e),
            }
        }
        Ok(templates)
    }
}

#[async_trait]
impl TemplateCatalog for DirTemplateCatalog {
    async fn get(&self, template_id: &str) -> Result<Template, EngineError> {
        validate_template_id(template_id)?;

        let file = self.dir.file(&format!("{}.json", template_id));
        debug!("Loading template from {:?}", file.path());
        let template: Template = file
            .read_json_opt()
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Template {}", template_id)))?;
        if template.id != template_id {
            return Err(EngineError::ValidationError(format!(
                "Template file {} declares id {}",
                template_id, template.id
            )));
        }
        Ok(template)
    }
}

/// Template ids become file names, so keep them to a safe alphabet
fn validate_template_id(template_id: &str) -> Result<(), EngineError> {
    let valid = !template_id.is_empty()
        && template_id.len() <= 128
        && !template_id.starts_with('.')
        && template_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(EngineError::ValidationError(format!(
            "Invalid template id: {}",
            template_id
        )));
    }
    Ok(())
}
