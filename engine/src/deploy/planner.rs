//! Step planner
//!
//! Expands a template structure into the ordered list of steps the executor
//! runs. Planning is pure: no I/O, same input gives the same plan. Every
//! reference is resolved here so that a broken template is rejected before
//! the instance is touched.
//!
//! Plan order is modules, custom fields, workflows, seed data, dashboards.
//! Within a kind the template's own order is kept.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::deploy::step::{CustomField, Dashboard, DeploymentStep, SeedData, Workflow};
use crate::models::deployment::TemplateType;
use crate::models::template::{Customizations, TemplateStructure};

/// What kind of thing a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Module,
    Field,
}

/// A reference the planner could not resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    /// Template element holding the reference, e.g. `workflow 'Onboarding'`
    pub source: String,
    pub kind: ReferenceKind,
    pub name: String,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ReferenceKind::Module => "module",
            ReferenceKind::Field => "field",
        };
        write!(f, "{} references unknown {} '{}'", self.source, kind, self.name)
    }
}

/// Template could not be turned into a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningError {
    pub unresolved: Vec<UnresolvedReference>,
    pub duplicates: Vec<String>,
}

impl fmt::Display for PlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut problems: Vec<String> = self.unresolved.iter().map(|r| r.to_string()).collect();
        problems.extend(
            self.duplicates
                .iter()
                .map(|d| format!("custom field '{}' is declared more than once", d)),
        );
        write!(f, "{}", problems.join("; "))
    }
}

impl std::error::Error for PlanningError {}

struct Resolver {
    modules: HashSet<String>,
    fields: HashSet<(String, String)>,
    unresolved: Vec<UnresolvedReference>,
}

impl Resolver {
    fn check_module(&mut self, source: &str, module: Option<&String>) {
        if let Some(module) = module {
            if !self.modules.contains(module) {
                self.unresolved.push(UnresolvedReference {
                    source: source.to_string(),
                    kind: ReferenceKind::Module,
                    name: module.clone(),
                });
            }
        }
    }

    fn check_fields(&mut self, source: &str, model: &str, fields: &[String]) {
        for field in fields {
            if !self.fields.contains(&(model.to_string(), field.clone())) {
                self.unresolved.push(UnresolvedReference {
                    source: source.to_string(),
                    kind: ReferenceKind::Field,
                    name: format!("{}.{}", model, field),
                });
            }
        }
    }
}

/// Build the ordered step list for a template
pub fn plan(
    template_type: TemplateType,
    structure: &TemplateStructure,
    customizations: &Customizations,
) -> Result<Vec<DeploymentStep>, PlanningError> {
    let skipped: HashSet<&str> = customizations.skip_modules.iter().map(String::as_str).collect();

    // Base module first, then the template's, then the caller's extras
    let mut module_order: Vec<String> = Vec::new();
    let candidates = template_type
        .base_module()
        .map(str::to_string)
        .into_iter()
        .chain(structure.modules.iter().map(|m| m.name.clone()))
        .chain(customizations.extra_modules.iter().cloned());
    for module in candidates {
        if module.is_empty() || skipped.contains(module.as_str()) || module_order.contains(&module) {
            continue;
        }
        module_order.push(module);
    }

    let mut resolver = Resolver {
        modules: module_order.iter().cloned().collect(),
        fields: HashSet::new(),
        unresolved: Vec::new(),
    };
    let mut duplicates = Vec::new();

    let mut steps: Vec<DeploymentStep> = module_order
        .iter()
        .map(|module| DeploymentStep::InstallModule {
            module: module.clone(),
        })
        .collect();

    for field in &structure.custom_fields {
        let source = format!("custom field '{}.{}'", field.model, field.name);
        resolver.check_module(&source, field.module.as_ref());

        if !resolver.fields.insert((field.model.clone(), field.name.clone())) {
            duplicates.push(format!("{}.{}", field.model, field.name));
            continue;
        }

        let label = customizations
            .field_labels
            .get(&field.name)
            .cloned()
            .unwrap_or_else(|| field.label.clone());
        steps.push(DeploymentStep::CreateCustomField(CustomField {
            model: field.model.clone(),
            name: field.name.clone(),
            field_type: field.field_type.clone(),
            label,
            required: field.required,
        }));
    }

    for workflow in &structure.workflows {
        let source = format!("workflow '{}'", workflow.name);
        resolver.check_module(&source, workflow.module.as_ref());
        resolver.check_fields(&source, &workflow.model, &workflow.fields);
        steps.push(DeploymentStep::CreateWorkflow(Workflow {
            name: workflow.name.clone(),
            model: workflow.model.clone(),
            stages: workflow.stages.clone(),
            fields: workflow.fields.clone(),
        }));
    }

    for seed in &structure.seed_data {
        let source = format!("seed data for '{}'", seed.model);
        resolver.check_module(&source, seed.module.as_ref());
        steps.push(DeploymentStep::SeedData(SeedData {
            model: seed.model.clone(),
            records: seed.records.clone(),
        }));
    }

    for dashboard in &structure.dashboards {
        let source = format!("dashboard '{}'", dashboard.name);
        resolver.check_module(&source, dashboard.module.as_ref());
        resolver.check_fields(&source, &dashboard.model, &dashboard.fields);
        steps.push(DeploymentStep::CreateDashboard(Dashboard {
            name: dashboard.name.clone(),
            model: dashboard.model.clone(),
            fields: dashboard.fields.clone(),
            widgets: dashboard.widgets.clone(),
        }));
    }

    if !resolver.unresolved.is_empty() || !duplicates.is_empty() {
        return Err(PlanningError {
            unresolved: resolver.unresolved,
            duplicates,
        });
    }

    Ok(steps)
}
