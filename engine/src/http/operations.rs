//! Deployment operations against an ERP instance

use async_trait::async_trait;
use openapi_client::models::{
    CreateCustomFieldRequest, CreateDashboardRequest, CreateWorkflowRequest, InstallModuleRequest,
    SeedDataRequest,
};

use crate::deploy::remote::{RemoteResult, RemoteSystemClient};
use crate::deploy::step::{CustomField, Dashboard, SeedData, Workflow};
use crate::http::client::ErpHttpClient;

#[async_trait]
impl RemoteSystemClient for ErpHttpClient {
    async fn install_module(&self, instance_id: &str, module: &str) -> RemoteResult {
        let body = InstallModuleRequest {
            name: module.to_string(),
        };
        self.post(instance_id, &["modules"], &body).await
    }

    async fn uninstall_module(&self, instance_id: &str, module: &str) -> RemoteResult {
        self.delete(instance_id, &["modules", module]).await
    }

    async fn create_custom_field(&self, instance_id: &str, field: &CustomField) -> RemoteResult {
        let body = CreateCustomFieldRequest {
            model: field.model.clone(),
            name: field.name.clone(),
            field_type: field.field_type.clone(),
            label: field.label.clone(),
            required: field.required,
        };
        self.post(instance_id, &["custom-fields"], &body).await
    }

    async fn delete_custom_field(&self, instance_id: &str, model: &str, name: &str) -> RemoteResult {
        self.delete(instance_id, &["custom-fields", model, name]).await
    }

    async fn create_workflow(&self, instance_id: &str, workflow: &Workflow) -> RemoteResult {
        let body = CreateWorkflowRequest {
            name: workflow.name.clone(),
            model: workflow.model.clone(),
            stages: workflow.stages.clone(),
            fields: workflow.fields.clone(),
        };
        self.post(instance_id, &["workflows"], &body).await
    }

    async fn delete_workflow(&self, instance_id: &str, model: &str, name: &str) -> RemoteResult {
        self.delete(instance_id, &["workflows", model, name]).await
    }

    async fn create_dashboard(&self, instance_id: &str, dashboard: &Dashboard) -> RemoteResult {
        let body = CreateDashboardRequest {
            name: dashboard.name.clone(),
            model: dashboard.model.clone(),
            fields: dashboard.fields.clone(),
            widgets: dashboard.widgets.clone(),
        };
        self.post(instance_id, &["dashboards"], &body).await
    }

    async fn delete_dashboard(&self, instance_id: &str, name: &str) -> RemoteResult {
        self.delete(instance_id, &["dashboards", name]).await
    }

    async fn seed_data(&self, instance_id: &str, seed: &SeedData) -> RemoteResult {
        let body = SeedDataRequest {
            model: seed.model.clone(),
            records: seed.records.clone(),
        };
        self.post(instance_id, &["seed-data"], &body).await
    }
}
