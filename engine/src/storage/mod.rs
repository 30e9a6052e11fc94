//! Persistence for deployments, logs, templates and settings

pub mod deployments;
pub mod log_store;
pub mod settings;
pub mod templates;
