//! Shared fixtures: a scripted remote client, templates and an engine harness

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use deployd::deploy::executor::{DeploymentEngine, SubmitRequest};
use deployd::deploy::fsm::FsmSettings;
use deployd::deploy::remote::{
    RemoteError, RemoteErrorKind, RemoteOutcome, RemoteResult, RemoteSystemClient,
};
use deployd::deploy::step::{AppliedStep, CustomField, Dashboard, SeedData, Workflow};
use deployd::errors::EngineError;
use deployd::models::deployment::{Deployment, DeploymentStatus, TemplateType};
use deployd::models::template::{
    CustomFieldSpec, Customizations, DashboardSpec, ModuleSpec, SeedDataSpec, Template,
    TemplateStructure, WorkflowSpec,
};
use deployd::storage::deployments::{DeploymentFilter, DeploymentStore, InMemoryDeploymentStore};
use deployd::storage::log_store::InMemoryLogStore;
use deployd::storage::templates::InMemoryTemplateCatalog;

// ================================ REMOTE CLIENT =================================== //

/// Remote client answering from per-operation scripts
///
/// Operations are keyed as `"<operation> <target>"`, e.g. `"install_module hr"`
/// or `"create_custom_field hr.employee.x_badge"`. Unscripted calls succeed
/// with `Applied`.
#[derive(Default)]
pub struct ScriptedClient {
    calls: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, VecDeque<RemoteResult>>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue results for an operation, consumed one per call
    pub fn script(&self, key: &str, results: Vec<RemoteResult>) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(key.to_string()).or_default().extend(results);
    }

    pub fn fail(&self, key: &str, kind: RemoteErrorKind, message: &str) {
        self.script(key, vec![Err(RemoteError::new(kind, message))]);
    }

    /// Make every call of an operation take `delay`
    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, key: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == key).count()
    }

    async fn respond(&self, key: String) -> RemoteResult {
        self.calls.lock().unwrap().push(key.clone());

        let delay = self.delays.lock().unwrap().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or(Ok(RemoteOutcome::Applied))
    }
}

#[async_trait]
impl RemoteSystemClient for ScriptedClient {
    async fn install_module(&self, _instance_id: &str, module: &str) -> RemoteResult {
        self.respond(format!("install_module {}", module)).await
    }

    async fn uninstall_module(&self, _instance_id: &str, module: &str) -> RemoteResult {
        self.respond(format!("uninstall_module {}", module)).await
    }

    async fn create_custom_field(&self, _instance_id: &str, field: &CustomField) -> RemoteResult {
        self.respond(format!("create_custom_field {}.{}", field.model, field.name))
            .await
    }

    async fn delete_custom_field(&self, _instance_id: &str, model: &str, name: &str) -> RemoteResult {
        self.respond(format!("delete_custom_field {}.{}", model, name)).await
    }

    async fn create_workflow(&self, _instance_id: &str, workflow: &Workflow) -> RemoteResult {
        self.respond(format!("create_workflow {}", workflow.name)).await
    }

    async fn delete_workflow(&self, _instance_id: &str, _model: &str, name: &str) -> RemoteResult {
        self.respond(format!("delete_workflow {}", name)).await
    }

    async fn create_dashboard(&self, _instance_id: &str, dashboard: &Dashboard) -> RemoteResult {
        self.respond(format!("create_dashboard {}", dashboard.name)).await
    }

    async fn delete_dashboard(&self, _instance_id: &str, name: &str) -> RemoteResult {
        self.respond(format!("delete_dashboard {}", name)).await
    }

    async fn seed_data(&self, _instance_id: &str, seed: &SeedData) -> RemoteResult {
        self.respond(format!("seed_data {}", seed.model)).await
    }
}

// ================================== TEMPLATES ===================================== //

/// HR template: base module `hr`, one extra module, a field, a workflow, seed
/// data and a dashboard (6 steps)
pub fn hr_template() -> Template {
    Template {
        id: "hr-onboarding".to_string(),
        name: "HR onboarding".to_string(),
        template_type: TemplateType::Hr,
        structure: TemplateStructure {
            modules: vec![ModuleSpec {
                name: "hr_holidays".to_string(),
            }],
            custom_fields: vec![CustomFieldSpec {
                model: "hr.employee".to_string(),
                name: "x_badge".to_string(),
                field_type: "char".to_string(),
                label: "Badge".to_string(),
                required: false,
                module: Some("hr".to_string()),
            }],
            workflows: vec![WorkflowSpec {
                name: "Onboarding".to_string(),
                model: "hr.employee".to_string(),
                module: Some("hr".to_string()),
                stages: vec!["new".to_string(), "done".to_string()],
                fields: vec!["x_badge".to_string()],
            }],
            dashboards: vec![DashboardSpec {
                name: "HR Overview".to_string(),
                model: "hr.employee".to_string(),
                module: Some("hr".to_string()),
                fields: vec!["x_badge".to_string()],
                widgets: vec![],
            }],
            seed_data: vec![SeedDataSpec {
                model: "hr.department".to_string(),
                module: Some("hr".to_string()),
                records: vec![serde_json::json!({"name": "Operations"})],
            }],
        },
    }
}

/// Custom template planning exactly three steps:
/// install `sale`, create `sale.order.x_region`, create dashboard `Sales`
pub fn three_step_template() -> Template {
    Template {
        id: "template-A".to_string(),
        name: "Sales basics".to_string(),
        template_type: TemplateType::Custom,
        structure: TemplateStructure {
            modules: vec![ModuleSpec {
                name: "sale".to_string(),
            }],
            custom_fields: vec![CustomFieldSpec {
                model: "sale.order".to_string(),
                name: "x_region".to_string(),
                field_type: "selection".to_string(),
                label: "Region".to_string(),
                required: true,
                module: Some("sale".to_string()),
            }],
            dashboards: vec![DashboardSpec {
                name: "Sales".to_string(),
                model: "sale.order".to_string(),
                module: Some("sale".to_string()),
                fields: vec!["x_region".to_string()],
                widgets: vec![],
            }],
            ..Default::default()
        },
    }
}

/// Custom template with nothing to do
pub fn empty_template() -> Template {
    Template {
        id: "empty".to_string(),
        name: "Empty".to_string(),
        template_type: TemplateType::Custom,
        structure: TemplateStructure::default(),
    }
}

pub fn request(instance_id: &str, template: &Template) -> SubmitRequest {
    SubmitRequest {
        instance_id: instance_id.to_string(),
        template_id: template.id.clone(),
        template_type: template.template_type,
        customizations: Customizations::default(),
        requested_by: "consultant@example.com".to_string(),
        auto_rollback_on_failure: false,
    }
}

// =================================== HARNESS ====================================== //

pub fn fast_settings() -> FsmSettings {
    FsmSettings {
        step_timeout: Duration::from_secs(2),
        max_attempts: 3,
        retry_delay: Duration::from_millis(5),
    }
}

pub struct Harness {
    pub engine: DeploymentEngine,
    pub client: Arc<ScriptedClient>,
    pub records: Arc<InMemoryDeploymentStore>,
    pub logs: Arc<InMemoryLogStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: FsmSettings) -> Self {
        let client = ScriptedClient::new();
        let records = Arc::new(InMemoryDeploymentStore::new());
        let logs = Arc::new(InMemoryLogStore::new());
        let engine = DeploymentEngine::new(
            records.clone(),
            logs.clone(),
            Arc::new(catalog()),
            client.clone(),
            settings,
        );

        Self {
            engine,
            client,
            records,
            logs,
        }
    }

    /// Wait until no task drives the deployment, then return its record
    pub async fn settle(&self, deployment_id: &str) -> Deployment {
        wait_idle(&self.engine, deployment_id).await;
        self.engine
            .monitoring()
            .get_deployment_status(deployment_id)
            .await
            .unwrap()
    }
}

/// Catalog holding every fixture template
pub fn catalog() -> InMemoryTemplateCatalog {
    let catalog = InMemoryTemplateCatalog::new();
    catalog.insert(hr_template());
    catalog.insert(three_step_template());
    catalog.insert(empty_template());
    catalog
}

/// Engine over the fixture catalog and an arbitrary record store
pub fn engine_with_store(
    records: Arc<dyn DeploymentStore>,
    client: Arc<ScriptedClient>,
) -> DeploymentEngine {
    DeploymentEngine::new(
        records,
        Arc::new(InMemoryLogStore::new()),
        Arc::new(catalog()),
        client,
        fast_settings(),
    )
}

/// Wait until no task drives the deployment
pub async fn wait_idle(engine: &DeploymentEngine, deployment_id: &str) {
    let wait = async {
        while engine.is_running(deployment_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("deployment task did not finish");
}

// ================================== RECORDS ======================================= //

/// Bare record for store and monitoring tests
pub fn record(
    id: &str,
    instance_id: &str,
    template_type: TemplateType,
    status: DeploymentStatus,
    age_secs: i64,
) -> Deployment {
    let created = Utc::now() - chrono::Duration::seconds(age_secs);
    Deployment {
        id: id.to_string(),
        instance_id: instance_id.to_string(),
        template_id: "tpl".to_string(),
        template_type,
        customizations: Customizations::default(),
        status,
        progress: if status == DeploymentStatus::Success { 100 } else { 0 },
        current_step: None,
        total_steps: 3,
        completed_steps: 0,
        error_message: None,
        error_kind: None,
        auto_rollback: false,
        plan_digest: String::new(),
        created_by: "tester".to_string(),
        created_at: created,
        started_at: Some(created),
        updated_at: created,
        completed_at: None,
        duration_seconds: None,
    }
}

/// Record store that counts listing calls
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryDeploymentStore,
    list_calls: AtomicUsize,
}

impl CountingStore {
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentStore for CountingStore {
    async fn insert(&self, deployment: &Deployment) -> Result<(), EngineError> {
        self.inner.insert(deployment).await
    }

    async fn update(&self, deployment: &Deployment) -> Result<(), EngineError> {
        self.inner.update(deployment).await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError> {
        self.inner.get(id).await
    }

    async fn list_active(&self) -> Result<Vec<Deployment>, EngineError> {
        self.inner.list_active().await
    }

    async fn find_active_by_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<Deployment>, EngineError> {
        self.inner.find_active_by_instance(instance_id).await
    }

    async fn list(
        &self,
        filter: &DeploymentFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, EngineError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list(filter, limit, offset).await
    }

    async fn list_all(&self) -> Result<Vec<Deployment>, EngineError> {
        self.inner.list_all().await
    }

    async fn append_applied_step(
        &self,
        deployment_id: &str,
        step: AppliedStep,
    ) -> Result<(), EngineError> {
        self.inner.append_applied_step(deployment_id, step).await
    }

    async fn applied_steps(&self, deployment_id: &str) -> Result<Vec<AppliedStep>, EngineError> {
        self.inner.applied_steps(deployment_id).await
    }
}

/// Record store with injectable faults
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryDeploymentStore,
    get_delay: Option<Duration>,
    fail_journal_writes: bool,
    fail_journal_reads: bool,
}

impl FaultyStore {
    /// `get` reads the record, then sleeps before returning it
    pub fn slow_get(delay: Duration) -> Self {
        Self {
            get_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn failing_journal_writes() -> Self {
        Self {
            fail_journal_writes: true,
            ..Default::default()
        }
    }

    pub fn failing_journal_reads() -> Self {
        Self {
            fail_journal_reads: true,
            ..Default::default()
        }
    }

    /// Read without the injected delay
    pub async fn peek(&self, id: &str) -> Option<Deployment> {
        self.inner.get(id).await.unwrap()
    }
}

#[async_trait]
impl DeploymentStore for FaultyStore {
    async fn insert(&self, deployment: &Deployment) -> Result<(), EngineError> {
        self.inner.insert(deployment).await
    }

    async fn update(&self, deployment: &Deployment) -> Result<(), EngineError> {
        self.inner.update(deployment).await
    }

    async fn get(&self, id: &str) -> Result<Option<Deployment>, EngineError> {
        let snapshot = self.inner.get(id).await;
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        snapshot
    }

    async fn list_active(&self) -> Result<Vec<Deployment>, EngineError> {
        self.inner.list_active().await
    }

    async fn find_active_by_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<Deployment>, EngineError> {
        self.inner.find_active_by_instance(instance_id).await
    }

    async fn list(
        &self,
        filter: &DeploymentFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, EngineError> {
        self.inner.list(filter, limit, offset).await
    }

    async fn list_all(&self) -> Result<Vec<Deployment>, EngineError> {
        self.inner.list_all().await
    }

    async fn append_applied_step(
        &self,
        deployment_id: &str,
        step: AppliedStep,
    ) -> Result<(), EngineError> {
        if self.fail_journal_writes {
            return Err(EngineError::StorageError("journal unavailable".to_string()));
        }
        self.inner.append_applied_step(deployment_id, step).await
    }

    async fn applied_steps(&self, deployment_id: &str) -> Result<Vec<AppliedStep>, EngineError> {
        if self.fail_journal_reads {
            return Err(EngineError::StorageError("journal unavailable".to_string()));
        }
        self.inner.applied_steps(deployment_id).await
    }
}
