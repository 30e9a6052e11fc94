//! Template models
//!
//! A template is the declarative description of a target ERP configuration.
//! The engine never edits templates; it only reads the structure below and
//! turns it into deployment steps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::deployment::TemplateType;

/// A template as resolved from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub template_type: TemplateType,
    #[serde(default)]
    pub structure: TemplateStructure,
}

/// Declarative content of a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateStructure {
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,

    #[serde(default)]
    pub custom_fields: Vec<CustomFieldSpec>,

    #[serde(default)]
    pub workflows: Vec<WorkflowSpec>,

    #[serde(default)]
    pub dashboards: Vec<DashboardSpec>,

    #[serde(default)]
    pub seed_data: Vec<SeedDataSpec>,
}

/// ERP module to install
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
}

/// Custom field to add to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldSpec {
    pub model: String,
    pub name: String,
    pub field_type: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,

    /// Module that provides `model`
    #[serde(default)]
    pub module: Option<String>,
}

/// Approval/stage workflow on a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub stages: Vec<String>,

    /// Custom fields of `model` the workflow reads
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Dashboard view over a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSpec {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub widgets: Vec<serde_json::Value>,
}

/// Records to create once the configuration is in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedDataSpec {
    pub model: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
}

/// Caller-supplied overrides
///
/// Known keys are interpreted by the planner; anything else is kept
/// verbatim in `extra` so it round-trips through the deployment record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customizations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_modules: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_modules: Vec<String>,

    /// Field name -> label override
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
